use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, warn};

use super::error::BackendError;
use super::types::{BackendDescriptor, BackendResult, CorpusSize, Query, ResultItem};
use crate::intent::{QueryIntent, classify_query};
use crate::model::FactDocument;
use crate::semantic::{EmbeddingModel, cosine_similarity, embedding_text_hash, normalize_whitespace};
use crate::store::{EntityStore, answer_intent};

/// Cooperative per-call budget handed to `retrieve`.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    timeout_ms: u64,
}

impl Deadline {
    pub fn start(timeout_ms: u64) -> Self {
        Self {
            started: Instant::now(),
            timeout_ms,
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    pub fn expired(&self) -> bool {
        self.elapsed_ms() > self.timeout_ms as f64
    }

    pub fn enforce(&self, stage: &str) -> Result<(), BackendError> {
        if !self.expired() {
            return Ok(());
        }
        Err(BackendError::Timeout {
            timeout_ms: self.timeout_ms,
            stage: stage.to_string(),
        })
    }
}

/// Uniform query-execution contract every retrieval backend implements.
///
/// Implementations are read-only with respect to the data they search; a
/// call abandoned on timeout leaves nothing behind.
pub trait BackendAdapter: Send + Sync {
    fn identity(&self) -> BackendDescriptor;

    /// Setup probe run once per comparison before any timed work.
    fn check_available(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Counts of the data the backend searches, read once after the probe.
    fn corpus_size(&self) -> Option<CorpusSize> {
        None
    }

    fn retrieve(
        &self,
        query: &Query,
        top_k: usize,
        deadline: &Deadline,
    ) -> Result<Vec<ResultItem>, BackendError>;

    fn execute(&self, query: &Query, top_k: usize, timeout_ms: u64) -> BackendResult {
        let deadline = Deadline::start(timeout_ms);
        let outcome = self
            .retrieve(query, top_k, &deadline)
            .and_then(|items| deadline.enforce("result materialization").map(|()| items));
        let elapsed_ms = deadline.elapsed_ms();

        let backend_id = self.identity().backend_id;
        match outcome {
            Ok(items) => BackendResult::ok(&backend_id, &query.id, items, elapsed_ms),
            Err(error) => BackendResult::failed(&backend_id, &query.id, &error, elapsed_ms),
        }
    }
}

/// Keyword-match backend over any entity store.
pub struct KeywordBackend {
    descriptor: BackendDescriptor,
    store: Result<Mutex<Box<dyn EntityStore>>, String>,
}

impl KeywordBackend {
    pub fn new(descriptor: BackendDescriptor, store: Box<dyn EntityStore>) -> Self {
        Self {
            descriptor,
            store: Ok(Mutex::new(store)),
        }
    }

    /// Backend whose store could not be opened; it reports unavailable.
    pub fn unavailable(descriptor: BackendDescriptor, reason: String) -> Self {
        Self {
            descriptor,
            store: Err(reason),
        }
    }

    fn store(&self) -> Result<&Mutex<Box<dyn EntityStore>>, BackendError> {
        self.store
            .as_ref()
            .map_err(|reason| BackendError::Unavailable(reason.clone()))
    }
}

impl BackendAdapter for KeywordBackend {
    fn identity(&self) -> BackendDescriptor {
        self.descriptor.clone()
    }

    fn check_available(&self) -> Result<(), BackendError> {
        let store = self
            .store()?
            .lock()
            .map_err(|_| BackendError::Unavailable("store lock poisoned".to_string()))?;
        let stats = store
            .stats()
            .map_err(|err| BackendError::Unavailable(format!("{err:#}")))?;
        if stats.entities_count == 0 {
            return Err(BackendError::Unavailable(format!(
                "{} store holds no entities; run `wikifacts load` first",
                store.store_kind()
            )));
        }
        Ok(())
    }

    fn corpus_size(&self) -> Option<CorpusSize> {
        let store = self.store().ok()?.lock().ok()?;
        match store.stats() {
            Ok(stats) => Some(CorpusSize {
                entities: stats.entities_count,
                properties: stats.properties_count,
                statements: stats.statements_count,
            }),
            Err(err) => {
                warn!(
                    backend_id = %self.descriptor.backend_id,
                    error = %format!("{err:#}"),
                    "store size unreadable"
                );
                None
            }
        }
    }

    fn retrieve(
        &self,
        query: &Query,
        top_k: usize,
        deadline: &Deadline,
    ) -> Result<Vec<ResultItem>, BackendError> {
        let intent = classify_query(&query.text).ok_or_else(|| {
            BackendError::MalformedQuery(format!(
                "query '{}' has no searchable content",
                query.id
            ))
        })?;
        debug!(
            backend_id = %self.descriptor.backend_id,
            query_id = %query.id,
            ?intent,
            "classified query"
        );

        let store = self
            .store()?
            .lock()
            .map_err(|_| BackendError::Failed("store lock poisoned".to_string()))?;
        deadline.enforce("store acquisition")?;

        let hits = answer_intent(&**store, &intent, top_k)
            .map_err(|err| BackendError::Failed(format!("{err:#}")))?;

        Ok(hits
            .into_iter()
            .enumerate()
            .map(|(rank, hit)| ResultItem {
                entity_id: hit.item_id,
                rank,
                score: None,
            })
            .collect())
    }
}

struct IndexedFact {
    fact_id: String,
    entity_id: String,
    property_id: String,
    haystack: String,
    embedding: Arc<Vec<f32>>,
}

/// Embedding-based backend over a fact corpus embedded at construction.
///
/// Fact questions are answered with fact ids. Lookup questions are answered
/// with entity ids, so both backend kinds rank items of the same kind.
pub struct SemanticBackend {
    descriptor: BackendDescriptor,
    model: Arc<EmbeddingModel>,
    corpus: Vec<IndexedFact>,
}

impl SemanticBackend {
    pub fn new(
        descriptor: BackendDescriptor,
        model: Arc<EmbeddingModel>,
        documents: Vec<FactDocument>,
    ) -> Self {
        let mut embeddings_by_hash = HashMap::<String, Arc<Vec<f32>>>::new();
        let corpus = documents
            .into_iter()
            .map(|document| {
                let embedding = embeddings_by_hash
                    .entry(embedding_text_hash(&document.text))
                    .or_insert_with(|| Arc::new(model.embed(&document.text)))
                    .clone();
                IndexedFact {
                    fact_id: document.fact_id,
                    entity_id: document.entity_id,
                    property_id: document.property_id,
                    haystack: document.text.to_lowercase(),
                    embedding,
                }
            })
            .collect::<Vec<IndexedFact>>();

        debug!(
            backend_id = %descriptor.backend_id,
            facts = corpus.len(),
            distinct_embeddings = embeddings_by_hash.len(),
            "semantic corpus embedded"
        );

        Self {
            descriptor,
            model,
            corpus,
        }
    }

    pub fn corpus_len(&self) -> usize {
        self.corpus.len()
    }
}

impl BackendAdapter for SemanticBackend {
    fn identity(&self) -> BackendDescriptor {
        self.descriptor.clone()
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.corpus.is_empty() {
            return Err(BackendError::Unavailable(format!(
                "semantic index is empty for model '{}'",
                self.model.config().model_id
            )));
        }
        Ok(())
    }

    fn corpus_size(&self) -> Option<CorpusSize> {
        let entities = self
            .corpus
            .iter()
            .map(|fact| fact.entity_id.as_str())
            .collect::<HashSet<&str>>();
        let properties = self
            .corpus
            .iter()
            .map(|fact| fact.property_id.as_str())
            .collect::<HashSet<&str>>();
        Some(CorpusSize {
            entities: entities.len(),
            properties: properties.len(),
            statements: self.corpus.len(),
        })
    }

    fn retrieve(
        &self,
        query: &Query,
        top_k: usize,
        deadline: &Deadline,
    ) -> Result<Vec<ResultItem>, BackendError> {
        let intent = classify_query(&query.text).ok_or_else(|| {
            BackendError::MalformedQuery(format!(
                "query '{}' has no searchable content",
                query.id
            ))
        })?;
        let query_text = normalize_whitespace(&query.text);
        let query_tokens = query_signal_tokens(&query_text);
        let query_embedding = self.model.embed(&query_text);

        let mut scored = Vec::<(f64, &IndexedFact)>::new();
        for (index, fact) in self.corpus.iter().enumerate() {
            if index % 64 == 63 {
                deadline.enforce("semantic candidate scan")?;
            }
            let semantic_score = cosine_similarity(&query_embedding, &fact.embedding);
            let lexical_bonus = lexical_signal_bonus(&query_tokens, &fact.haystack);
            let score = semantic_score * 0.45 + lexical_bonus * 0.55;
            if score > 0.0 {
                scored.push((score, fact));
            }
        }

        scored.sort_by(|left, right| {
            right
                .0
                .total_cmp(&left.0)
                .then(left.1.fact_id.cmp(&right.1.fact_id))
        });

        // Lookup hits collapse onto their entity, keeping its best-scored fact.
        let entity_level = matches!(intent, QueryIntent::Lookup { .. });
        let mut seen = HashSet::<&str>::new();
        Ok(scored
            .into_iter()
            .map(|(score, fact)| {
                if entity_level {
                    (score, fact.entity_id.as_str())
                } else {
                    (score, fact.fact_id.as_str())
                }
            })
            .filter(|(_, item_id)| seen.insert(*item_id))
            .take(top_k)
            .enumerate()
            .map(|(rank, (score, item_id))| ResultItem {
                entity_id: item_id.to_string(),
                rank,
                score: Some(score),
            })
            .collect())
    }
}

fn query_signal_tokens(query_text: &str) -> Vec<String> {
    const STOPWORDS: &[&str] = &[
        "about", "and", "are", "does", "for", "how", "many", "tell", "the", "what", "where",
        "which", "who", "with",
    ];

    let mut tokens = query_text
        .to_lowercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| token.chars().count() >= 3)
        .filter(|token| STOPWORDS.iter().all(|stopword| stopword != token))
        .map(str::to_string)
        .collect::<Vec<String>>();
    tokens.sort();
    tokens.dedup();
    tokens
}

fn lexical_signal_bonus(query_tokens: &[String], haystack: &str) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }

    let overlap = query_tokens
        .iter()
        .filter(|token| haystack.contains(token.as_str()))
        .count();
    overlap as f64 / query_tokens.len() as f64
}
