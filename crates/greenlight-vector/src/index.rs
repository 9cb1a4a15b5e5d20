//! In-memory policy index with brute-force cosine ranking.
//!
//! Insertion order is kept so that equal scores rank in the order policies
//! were indexed.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use greenlight_core::error::{GreenlightError, Result};

use crate::similarity::rank;

/// A policy chunk as supplied for indexing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub specialty: Option<String>,
}

/// A search hit against the policy index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyMatch {
    pub id: String,
    pub score: f32,
    pub specialty: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone)]
struct PolicyEntry {
    document: PolicyDocument,
    vector: Vec<f32>,
}

/// Thread-safe via interior RwLock; clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct PolicyIndex {
    entries: Arc<RwLock<Vec<PolicyEntry>>>,
}

fn poisoned<E: std::fmt::Display>(e: E) -> GreenlightError {
    GreenlightError::Search(format!("Lock poisoned: {}", e))
}

impl PolicyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a policy vector. An existing entry with the same ID is
    /// replaced in place.
    pub fn insert(&self, document: PolicyDocument, vector: Vec<f32>) -> Result<()> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let entry = PolicyEntry { document, vector };
        match entries
            .iter_mut()
            .find(|e| e.document.id == entry.document.id)
        {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        Ok(())
    }

    /// Top `k` policies by cosine similarity to `query`, optionally limited
    /// to one specialty (compared case-insensitively).
    pub fn search(&self, query: &[f32], k: usize, specialty: Option<&str>) -> Result<Vec<PolicyMatch>> {
        let entries = self.entries.read().map_err(poisoned)?;

        let candidates: Vec<&PolicyEntry> = entries
            .iter()
            .filter(|entry| match specialty {
                Some(wanted) => entry
                    .document
                    .specialty
                    .as_deref()
                    .is_some_and(|s| s.eq_ignore_ascii_case(wanted)),
                None => true,
            })
            .collect();
        let vectors: Vec<&[f32]> = candidates.iter().map(|e| e.vector.as_slice()).collect();

        Ok(rank(query, &vectors, k)
            .into_iter()
            .map(|hit| {
                let doc = &candidates[hit.index].document;
                PolicyMatch {
                    id: doc.id.clone(),
                    score: hit.score,
                    specialty: doc.specialty.clone(),
                    text: doc.text.clone(),
                }
            })
            .collect())
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let before = entries.len();
        entries.retain(|e| e.document.id != id);
        Ok(entries.len() != before)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
