use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::model::question::Fingerprint;

/// Durable set of solved question fingerprints.
///
/// Entries are added when an answer lands and are never removed. The set only
/// demotes items to the back of the rendering order; it never excludes them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolvedSet(HashSet<Fingerprint>);

impl SolvedSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.0.contains(fingerprint)
    }

    /// Returns true when the fingerprint was not already present.
    pub fn insert(&mut self, fingerprint: Fingerprint) -> bool {
        self.0.insert(fingerprint)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fingerprint> {
        self.0.iter()
    }
}

impl FromIterator<Fingerprint> for SolvedSet {
    fn from_iter<I: IntoIterator<Item = Fingerprint>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_reports_novelty() {
        let mut solved = SolvedSet::new();
        assert!(solved.insert(Fingerprint::of("Q1")));
        assert!(!solved.insert(Fingerprint::of("Q1")));
        assert_eq!(solved.len(), 1);
    }

    #[test]
    fn contains_matches_trimmed_text() {
        let solved: SolvedSet = [Fingerprint::of("  Q1 ")].into_iter().collect();
        assert!(solved.contains(&Fingerprint::of("Q1")));
        assert!(!solved.contains(&Fingerprint::of("q1")));
    }
}
