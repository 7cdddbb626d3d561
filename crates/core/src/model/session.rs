use std::collections::HashSet;
use thiserror::Error;

use crate::model::question::{Fingerprint, Question};

//
// ─── PHASE MACHINE ─────────────────────────────────────────────────────────────
//

/// Lifecycle of one endless-scroll session. `Exiting` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Loading,
    Active,
    Exiting,
}

impl SessionPhase {
    /// Whether the phase machine permits moving to `next`.
    #[must_use]
    pub fn can_transition(self, next: SessionPhase) -> bool {
        matches!(
            (self, next),
            (SessionPhase::Idle, SessionPhase::Loading)
                | (SessionPhase::Loading, SessionPhase::Active)
                | (SessionPhase::Loading, SessionPhase::Exiting)
                | (SessionPhase::Active, SessionPhase::Exiting)
        )
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionStateError {
    #[error("invalid phase transition from {from:?} to {to:?}")]
    InvalidTransition { from: SessionPhase, to: SessionPhase },

    #[error("item index {0} is out of range")]
    IndexOutOfRange(usize),
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// One item in the live sequence, with its answered/solved markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionItem {
    pub question: Question,
    pub answered: bool,
    pub solved: bool,
}

/// Ordered, mutable sequence of questions for one live session.
///
/// Exists only for the session's lifetime; unanswered items are folded back
/// into the durable mirror on exit. No two items share a fingerprint.
#[derive(Debug, Clone)]
pub struct Session {
    items: Vec<SessionItem>,
    cursor: usize,
    phase: SessionPhase,
    seen: HashSet<Fingerprint>,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            cursor: 0,
            phase: SessionPhase::Idle,
            seen: HashSet::new(),
        }
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Move the phase machine forward.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::InvalidTransition` for any move the
    /// `Idle → Loading → Active → Exiting` machine does not permit.
    pub fn transition(&mut self, to: SessionPhase) -> Result<(), SessionStateError> {
        if !self.phase.can_transition(to) {
            return Err(SessionStateError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }

    #[must_use]
    pub fn items(&self) -> &[SessionItem] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Read cursor: index of the item currently in front of the user.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of items from the cursor to the tail, inclusive of the cursor.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.items.len().saturating_sub(self.cursor)
    }

    #[must_use]
    pub fn current(&self) -> Option<&SessionItem> {
        self.items.get(self.cursor)
    }

    /// Advance the read cursor; returns the item now in front, if any.
    pub fn advance(&mut self) -> Option<&SessionItem> {
        if self.cursor < self.items.len() {
            self.cursor += 1;
        }
        self.items.get(self.cursor)
    }

    /// Append to the tail unless the fingerprint is already present.
    ///
    /// Returns true when the item was placed.
    pub fn push_tail(&mut self, question: Question, solved: bool) -> bool {
        let fp = question.fingerprint();
        if !self.seen.insert(fp) {
            return false;
        }
        self.items.push(SessionItem {
            question,
            answered: false,
            solved,
        });
        true
    }

    /// Insert directly after the current item unless the fingerprint is
    /// already present. Returns true when the item was placed.
    pub fn splice_after_cursor(&mut self, question: Question) -> bool {
        let fp = question.fingerprint();
        if !self.seen.insert(fp) {
            return false;
        }
        let at = (self.cursor + 1).min(self.items.len());
        self.items.insert(
            at,
            SessionItem {
                question,
                answered: false,
                solved: false,
            },
        );
        true
    }

    /// Mark the item at `index` answered.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::IndexOutOfRange` when no such item exists.
    pub fn mark_answered(&mut self, index: usize) -> Result<&SessionItem, SessionStateError> {
        let item = self
            .items
            .get_mut(index)
            .ok_or(SessionStateError::IndexOutOfRange(index))?;
        item.answered = true;
        Ok(&self.items[index])
    }

    /// Questions not yet answered, in sequence order.
    #[must_use]
    pub fn unanswered(&self) -> Vec<Question> {
        self.items
            .iter()
            .filter(|item| !item.answered)
            .map(|item| item.question.clone())
            .collect()
    }

    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.items.iter().filter(|item| item.answered).count()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
