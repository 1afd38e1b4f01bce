//! Query predicates evaluated against stored records.

use serde::Deserialize;
use serde_json::Value;

use super::Record;

/// Filter applied by [`Storage::query`](super::Storage::query).
///
/// Field paths are JSON pointers; a leading `/` is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    /// Every record.
    #[default]
    All,
    /// Keys starting with `prefix`.
    KeyPrefix {
        /// Required key prefix.
        prefix: String,
    },
    /// Records whose field at `path` equals `value`.
    FieldEquals {
        /// JSON pointer into the stored value.
        path: String,
        /// Expected value.
        value: Value,
    },
    /// Records whose embedding at `field` has cosine similarity of at least
    /// `min_score` with `vector`.
    Similar {
        /// JSON pointer to an array of numbers.
        field: String,
        /// Query embedding.
        vector: Vec<f64>,
        /// Inclusive similarity threshold.
        #[serde(default)]
        min_score: f64,
    },
    /// Conjunction of the nested predicates.
    And {
        /// Predicates that must all match.
        predicates: Vec<Predicate>,
    },
}

impl Predicate {
    /// Key prefix the backend can push down into its scan, if any.
    #[must_use]
    pub fn key_prefix(&self) -> Option<&str> {
        match self {
            Self::KeyPrefix { prefix } => Some(prefix),
            Self::And { predicates } => predicates.iter().find_map(Self::key_prefix),
            _ => None,
        }
    }

    /// Return the record if it matches, annotated with its similarity score
    /// when one was computed.
    #[must_use]
    pub fn apply(&self, mut record: Record) -> Option<Record> {
        match self.evaluate(&record)? {
            Some(score) => {
                record.score = Some(score);
                Some(record)
            }
            None => Some(record),
        }
    }

    /// `None` when the record does not match; `Some(score)` otherwise.
    fn evaluate(&self, record: &Record) -> Option<Option<f64>> {
        match self {
            Self::All => Some(None),
            Self::KeyPrefix { prefix } => record.key.starts_with(prefix.as_str()).then_some(None),
            Self::FieldEquals { path, value } => {
                (lookup(&record.value, path)? == value).then_some(None)
            }
            Self::Similar {
                field,
                vector,
                min_score,
            } => {
                let embedding = as_vector(lookup(&record.value, field)?)?;
                let score = cosine_similarity(&embedding, vector)?;
                (score >= *min_score).then_some(Some(score))
            }
            Self::And { predicates } => {
                let mut score = None;
                for predicate in predicates {
                    if let Some(s) = predicate.evaluate(record)? {
                        score = Some(s);
                    }
                }
                Some(score)
            }
        }
    }
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() || path.starts_with('/') {
        value.pointer(path)
    } else {
        value.pointer(&format!("/{path}"))
    }
}

/// Interpret a JSON array of numbers as a vector.
#[must_use]
pub fn as_vector(value: &Value) -> Option<Vec<f64>> {
    value
        .as_array()?
        .iter()
        .map(Value::as_f64)
        .collect::<Option<Vec<f64>>>()
}

/// Cosine similarity; `None` for mismatched lengths or zero vectors.
#[must_use]
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a * norm_b))
}
