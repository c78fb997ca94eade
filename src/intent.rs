//! Closed classification of natural-language questions into store lookups.

use serde::Serialize;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FactProperty {
    Capital,
    Population,
    OfficialLanguage,
    Country,
}

impl FactProperty {
    const ALL: [FactProperty; 4] = [
        FactProperty::Capital,
        FactProperty::Population,
        FactProperty::OfficialLanguage,
        FactProperty::Country,
    ];

    pub fn property_id(self) -> &'static str {
        match self {
            Self::Capital => "P36",
            Self::Population => "P1082",
            Self::OfficialLanguage => "P37",
            Self::Country => "P17",
        }
    }

    fn cues(self) -> &'static [&'static str] {
        match self {
            Self::Capital => &["capital of", "capital city of"],
            Self::Population => &["population of", "how many people live in"],
            Self::OfficialLanguage => &["official language of", "language of"],
            Self::Country => &["country of", "which country is"],
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryIntent {
    Fact {
        property: FactProperty,
        subject: String,
    },
    Lookup {
        keyword: String,
    },
}

/// Returns `None` when the text carries nothing a store could look up.
pub fn classify_query(query_text: &str) -> Option<QueryIntent> {
    let normalized = query_text.split_whitespace().collect::<Vec<&str>>().join(" ");
    let lowered = normalized.to_ascii_lowercase();

    for property in FactProperty::ALL {
        for cue in property.cues() {
            let Some(position) = find_cue(&lowered, cue) else {
                continue;
            };
            let subject = clean_subject(&normalized[position + cue.len()..]);
            if !subject.is_empty() {
                return Some(QueryIntent::Fact { property, subject });
            }
        }
    }

    let keyword = clean_subject(strip_question_prefix(&normalized));
    if keyword.is_empty() {
        return None;
    }
    Some(QueryIntent::Lookup { keyword })
}

fn find_cue(lowered: &str, cue: &str) -> Option<usize> {
    lowered.match_indices(cue).map(|(index, _)| index).find(|index| {
        *index == 0
            || lowered[..*index]
                .chars()
                .next_back()
                .is_some_and(|character| !character.is_ascii_alphanumeric())
    })
}

fn strip_question_prefix(text: &str) -> &str {
    const PREFIXES: &[&str] = &[
        "what is ",
        "what's ",
        "who is ",
        "where is ",
        "tell me about ",
        "show me ",
    ];

    let lowered = text.to_ascii_lowercase();
    for prefix in PREFIXES {
        if lowered.starts_with(prefix) {
            return &text[prefix.len()..];
        }
    }
    text
}

fn clean_subject(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_end_matches(|character: char| matches!(character, '?' | '.' | '!' | '？' | '。'))
        .trim();
    let without_article = match trimmed.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("the ") => &trimmed[4..],
        _ => trimmed,
    };
    without_article.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_capital_question_with_subject() {
        assert_eq!(
            classify_query("What is the capital of China?"),
            Some(QueryIntent::Fact {
                property: FactProperty::Capital,
                subject: "China".to_string(),
            })
        );
    }

    #[test]
    fn strips_leading_article_from_subject() {
        assert_eq!(
            classify_query("What is the capital of the United States?"),
            Some(QueryIntent::Fact {
                property: FactProperty::Capital,
                subject: "United States".to_string(),
            })
        );
    }

    #[test]
    fn classifies_population_question() {
        let intent = classify_query("what is the   population of India").expect("intent");
        assert_eq!(
            intent,
            QueryIntent::Fact {
                property: FactProperty::Population,
                subject: "India".to_string(),
            }
        );
    }

    #[test]
    fn cue_must_start_at_word_boundary() {
        let intent = classify_query("recapital of Mars").expect("intent");
        assert!(matches!(intent, QueryIntent::Lookup { .. }));
    }

    #[test]
    fn falls_back_to_keyword_lookup() {
        assert_eq!(
            classify_query("Tell me about Paris."),
            Some(QueryIntent::Lookup {
                keyword: "Paris".to_string(),
            })
        );
    }

    #[test]
    fn rejects_text_without_content() {
        assert_eq!(classify_query("   "), None);
        assert_eq!(classify_query("?"), None);
        assert_eq!(classify_query("what is ?"), None);
    }
}
