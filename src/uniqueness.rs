//! Headword uniqueness tracking for bulk dictionary runs.
//!
//! A bulk run must never accept a Twi headword that already exists in the
//! store, nor accept the same headword twice within the run. The registry
//! loads the persisted key set once per run and accumulates accepted keys in
//! a session set; both are discarded when the run ends. A colliding
//! generation is simply discarded — the orchestrator asks for a fresh one.

use anyhow::Result;
use sqlx::SqlitePool;
use std::collections::HashSet;

use crate::store;

/// The natural key for a dictionary entry: the trimmed, lowercased headword.
pub fn natural_key(headword: &str) -> String {
    headword.trim().to_lowercase()
}

pub struct UniquenessRegistry {
    persisted: HashSet<String>,
    session: HashSet<String>,
}

impl UniquenessRegistry {
    /// Read every persisted headword key once.
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let keys = store::load_headword_keys(pool).await?;
        Ok(Self {
            persisted: keys.into_iter().collect(),
            session: HashSet::new(),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_persisted(keys: &[&str]) -> Self {
        Self {
            persisted: keys.iter().map(|k| natural_key(k)).collect(),
            session: HashSet::new(),
        }
    }

    /// True if `headword` collides with a stored entry or one already
    /// accepted in this run.
    pub fn is_duplicate(&self, headword: &str) -> bool {
        let key = natural_key(headword);
        self.persisted.contains(&key) || self.session.contains(&key)
    }

    /// Record an accepted headword for the remainder of the run.
    pub fn record(&mut self, headword: &str) {
        self.session.insert(natural_key(headword));
    }

    /// Keys accepted so far in this run, for prompt avoid-lists.
    pub fn session_keys(&self) -> impl Iterator<Item = &String> {
        self.session.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_trimmed_and_case_insensitive() {
        assert_eq!(natural_key("  Akwaaba "), "akwaaba");
        assert_eq!(natural_key("Ɛdan"), natural_key("ɛdan"));
    }

    #[test]
    fn persisted_and_session_keys_both_collide() {
        let mut registry = UniquenessRegistry::with_persisted(&["A", "B"]);

        // Stream A, C, C, D against persisted {A, B}: accept C then D once.
        let mut accepted = Vec::new();
        for word in ["A", "C", "C", "D"] {
            if registry.is_duplicate(word) {
                continue;
            }
            registry.record(word);
            accepted.push(word);
        }

        assert_eq!(accepted, vec!["C", "D"]);
    }

    #[test]
    fn record_only_affects_the_session_set() {
        let mut registry = UniquenessRegistry::with_persisted(&[]);
        assert!(!registry.is_duplicate("nsuo"));
        registry.record("nsuo");
        assert!(registry.is_duplicate("NSUO"));
        assert_eq!(registry.session_keys().count(), 1);
    }
}
