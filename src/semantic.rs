use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::util::sha256_hex;

pub const DEFAULT_MODEL_ID: &str = "miniLM-L6-v2-local-v1";
pub const DEFAULT_MODEL_NAME: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_EMBEDDING_DIM: usize = 384;
pub const DEFAULT_NORMALIZATION: &str = "l2";
pub const DEFAULT_BACKEND: &str = "local-hash-v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticModelConfig {
    pub model_id: String,
    pub model_name: String,
    pub dimensions: usize,
    pub normalization: String,
    pub backend: String,
}

pub fn resolve_model_config(model_id: &str) -> SemanticModelConfig {
    let trimmed = model_id.trim();
    let resolved_id = if trimmed.is_empty() {
        DEFAULT_MODEL_ID
    } else {
        trimmed
    };

    let model_name = if resolved_id == DEFAULT_MODEL_ID {
        DEFAULT_MODEL_NAME
    } else {
        resolved_id
    };

    SemanticModelConfig {
        model_id: resolved_id.to_string(),
        model_name: model_name.to_string(),
        dimensions: DEFAULT_EMBEDDING_DIM,
        normalization: DEFAULT_NORMALIZATION.to_string(),
        backend: DEFAULT_BACKEND.to_string(),
    }
}

/// Process-wide embedding model. Obtain it through [`ModelScope`].
#[derive(Debug)]
pub struct EmbeddingModel {
    config: SemanticModelConfig,
}

impl EmbeddingModel {
    pub fn config(&self) -> &SemanticModelConfig {
        &self.config
    }

    pub fn embed(&self, payload: &str) -> Vec<f32> {
        embed_text_local(payload, self.config.dimensions)
    }
}

/// Scoped ownership of the embedding model: acquired once before any timed
/// work, released when the scope drops after the comparison completes.
pub struct ModelScope {
    model: Arc<EmbeddingModel>,
    acquired_at: Instant,
}

impl ModelScope {
    pub fn acquire(model_id: &str) -> Result<Self> {
        let config = resolve_model_config(model_id);
        if config.dimensions < 8 {
            bail!(
                "embedding model '{}' has unsupported dimensions {}",
                config.model_id,
                config.dimensions
            );
        }

        info!(
            model_id = %config.model_id,
            model_name = %config.model_name,
            dimensions = config.dimensions,
            backend = %config.backend,
            "embedding model acquired"
        );

        Ok(Self {
            model: Arc::new(EmbeddingModel { config }),
            acquired_at: Instant::now(),
        })
    }

    pub fn model(&self) -> Arc<EmbeddingModel> {
        Arc::clone(&self.model)
    }
}

impl Drop for ModelScope {
    fn drop(&mut self) {
        info!(
            model_id = %self.model.config.model_id,
            held_ms = self.acquired_at.elapsed().as_secs_f64() * 1000.0,
            outstanding_handles = Arc::strong_count(&self.model) - 1,
            "embedding model released"
        );
    }
}

pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}

pub fn embedding_text_hash(payload: &str) -> String {
    sha256_hex(payload.as_bytes())
}

pub fn embed_text_local(payload: &str, dimensions: usize) -> Vec<f32> {
    let dims = dimensions.max(8);
    let mut vector = vec![0_f32; dims];
    let mut tokens = tokenize_payload(payload);

    if tokens.is_empty() {
        return vector;
    }

    for token in tokens.drain(..) {
        let hash = stable_hash(&token);
        let index = (hash as usize) % dims;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        let weight = 1.0 + (((hash >> 48) & 0xFF) as f32 / 255.0);
        vector[index] += sign * weight;
    }

    normalize_vector(&mut vector);
    vector
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    left.iter()
        .zip(right.iter())
        .map(|(left_value, right_value)| f64::from(*left_value) * f64::from(*right_value))
        .sum::<f64>()
}

fn stable_hash(value: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn tokenize_payload(payload: &str) -> Vec<String> {
    let normalized = normalize_whitespace(payload);
    if normalized.is_empty() {
        return Vec::new();
    }

    let words = normalized
        .split(' ')
        .map(|value| {
            value
                .chars()
                .filter(|character| character.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|value| !value.is_empty())
        .collect::<Vec<String>>();

    if words.is_empty() {
        return Vec::new();
    }

    let mut features = Vec::<String>::with_capacity(words.len() * 2);
    for (index, word) in words.iter().enumerate() {
        features.push(format!("w:{word}"));
        if let Some(next) = words.get(index + 1) {
            features.push(format!("b:{word}_{next}"));
        }
    }
    features
}

fn normalize_vector(values: &mut [f32]) {
    let squared_norm = values
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>();

    if squared_norm <= 0.0 {
        return;
    }

    let norm = squared_norm.sqrt() as f32;
    if norm == 0.0 {
        return;
    }

    for value in values {
        *value /= norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeddings_are_deterministic_and_normalized() {
        let first = embed_text_local("capital of China", DEFAULT_EMBEDDING_DIM);
        let second = embed_text_local("capital   of china?", DEFAULT_EMBEDDING_DIM);
        assert_eq!(first, second);

        let norm = cosine_similarity(&first, &first);
        assert!((norm - 1.0).abs() < 1e-6, "unexpected norm: {norm}");
    }

    #[test]
    fn empty_payload_embeds_to_zero_vector() {
        let vector = embed_text_local("  ?! ", 16);
        assert_eq!(vector.len(), 16);
        assert!(vector.iter().all(|value| *value == 0.0));
        assert_eq!(cosine_similarity(&vector, &vector), 0.0);
    }

    #[test]
    fn cosine_similarity_rejects_mismatched_dimensions() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn related_text_scores_higher_than_unrelated_text() {
        let query = embed_text_local("capital of China", DEFAULT_EMBEDDING_DIM);
        let related = embed_text_local("China capital Beijing", DEFAULT_EMBEDDING_DIM);
        let unrelated = embed_text_local("France population 67 million", DEFAULT_EMBEDDING_DIM);
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn model_scope_hands_out_shared_model() {
        let scope = ModelScope::acquire("  ").expect("default model should resolve");
        let model = scope.model();
        assert_eq!(model.config().model_id, DEFAULT_MODEL_ID);
        assert_eq!(model.config().model_name, DEFAULT_MODEL_NAME);
        assert_eq!(model.embed("Beijing").len(), DEFAULT_EMBEDDING_DIM);
        assert_eq!(Arc::strong_count(&model), 2);
        drop(scope);
        assert_eq!(Arc::strong_count(&model), 1);
    }
}
