use std::collections::HashSet;

use review_core::model::{Fingerprint, Question, SolvedSet};

/// Tracks fingerprints already placed and filters candidates against them.
///
/// Applied at buffer refill (exclude already-buffered texts) and at session
/// assembly (exclude texts already placed). The solved set is handled
/// separately: it demotes, it never excludes.
#[derive(Debug, Default, Clone)]
pub struct Deduplicator {
    seen: HashSet<Fingerprint>,
}

impl Deduplicator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_seen(seen: impl IntoIterator<Item = Fingerprint>) -> Self {
        Self {
            seen: seen.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.seen.contains(fingerprint)
    }

    /// Claim a fingerprint; returns true when it was fresh.
    pub fn admit(&mut self, fingerprint: Fingerprint) -> bool {
        self.seen.insert(fingerprint)
    }

    pub fn extend_seen(&mut self, fingerprints: impl IntoIterator<Item = Fingerprint>) {
        self.seen.extend(fingerprints);
    }

    /// Keep only questions whose fingerprint has not been seen, claiming each
    /// kept one. Later duplicates within `questions` are dropped too.
    #[must_use]
    pub fn filter_fresh(&mut self, questions: Vec<Question>) -> Vec<Question> {
        questions
            .into_iter()
            .filter(|question| self.admit(question.fingerprint()))
            .collect()
    }
}

/// Stable reorder placing solved questions after unsolved ones.
///
/// Never drops an item: the solved set only demotes.
#[must_use]
pub fn demote_solved(questions: Vec<Question>, solved: &SolvedSet) -> Vec<Question> {
    let (fresh, seen): (Vec<_>, Vec<_>) = questions
        .into_iter()
        .partition(|question| !solved.contains(&question.fingerprint()));
    fresh.into_iter().chain(seen).collect()
}
