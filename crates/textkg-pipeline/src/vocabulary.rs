//! The fixed vocabulary type catalogue used for semantic schema mapping.

use std::path::Path;

use serde::{Deserialize, Serialize};

use textkg_types::{KgError, SchemaCandidate};

/// One vocabulary type: label, short comment, full definition text, and a
/// precomputed embedding of the label + comment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabularyEntry {
    pub label: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub definition: String,
    pub embedding: Vec<f32>,
}

/// In-memory catalogue of vocabulary types, loaded once at startup.
#[derive(Debug)]
pub struct VocabularyCatalog {
    entries: Vec<VocabularyEntry>,
}

impl VocabularyCatalog {
    pub fn from_entries(entries: Vec<VocabularyEntry>) -> Self {
        Self { entries }
    }

    /// Load the catalogue from a JSON file containing an array of entries.
    ///
    /// A missing or unreadable file is a configuration error: the pipeline
    /// fails fast before any stage executes.
    pub fn load(path: &Path) -> Result<Self, KgError> {
        if !path.exists() {
            return Err(KgError::ConfigError(format!(
                "vocabulary catalogue not found at {}",
                path.display()
            )));
        }
        let data = std::fs::read_to_string(path)?;
        let entries: Vec<VocabularyEntry> = serde_json::from_str(&data)
            .map_err(|e| KgError::ConfigError(format!("invalid vocabulary catalogue: {e}")))?;
        Ok(Self::from_entries(entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Full definition text for a vocabulary type, fed into the generation prompt.
    pub fn definition_for(&self, label: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.label == label)
            .map(|e| e.definition.as_str())
    }

    /// The `k` most similar vocabulary types for a query embedding, best first.
    ///
    /// Ties in similarity are broken by higher lexical specificity (longer
    /// label), then by stable catalogue order.
    pub fn top_k(&self, query: &[f32], k: usize) -> Vec<SchemaCandidate> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (idx, cosine_similarity(query, &entry.embedding)))
            .collect();

        scored.sort_by(|(a_idx, a_score), (b_idx, b_score)| {
            b_score
                .partial_cmp(a_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let a_len = self.entries[*a_idx].label.len();
                    let b_len = self.entries[*b_idx].label.len();
                    b_len.cmp(&a_len)
                })
                .then_with(|| a_idx.cmp(b_idx))
        });

        scored
            .into_iter()
            .take(k)
            .map(|(idx, score)| {
                let entry = &self.entries[idx];
                SchemaCandidate {
                    vocabulary_type: entry.label.clone(),
                    comment: entry.comment.clone(),
                    score,
                }
            })
            .collect()
    }
}

/// Cosine similarity of two vectors. Returns 0 for mismatched or zero-norm input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
