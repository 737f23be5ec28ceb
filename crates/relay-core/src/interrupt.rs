//! Interrupt/resume controller
//!
//! Tracks, per conversation, whether the agent is paused waiting for a
//! human answer, across otherwise independent turn invocations. One
//! controller is owned by one chat session and dropped (or cleared) with it.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::stream::Snapshot;

/// How the next turn invocation must proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnDecision {
    /// Send the answer to the resume endpoint.
    Resume { answer: String },
    /// A question is still unanswered; make no request.
    Blocked,
    /// Start a normal request.
    Fresh,
}

#[derive(Debug, Clone)]
struct InterruptEntry {
    pending: bool,
    last_snapshot: Snapshot,
}

#[derive(Debug, Default)]
pub struct InterruptController {
    entries: HashMap<String, InterruptEntry>,
}

impl InterruptController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide how to handle an invocation for `thread_id`.
    ///
    /// `current` is the in-progress assistant message, when the caller can
    /// provide it.
    pub fn decide(&mut self, thread_id: Option<&str>, current: Option<&Snapshot>) -> TurnDecision {
        if let Some(question) = current.and_then(Snapshot::human_question) {
            if let Some(answer) = question.human_answer() {
                if let Some(id) = thread_id {
                    self.entries.remove(id);
                }
                info!(thread_id = ?thread_id, "Resuming interrupted turn with supplied answer");
                return TurnDecision::Resume {
                    answer: answer.to_string(),
                };
            }
            // A blank answer leaves the question open.
            debug!(thread_id = ?thread_id, "Human question still unanswered, blocking turn");
            return TurnDecision::Blocked;
        }

        if let Some(id) = thread_id {
            if self.is_pending(id) {
                debug!(thread_id = %id, "Interrupt pending for conversation, blocking turn");
                return TurnDecision::Blocked;
            }
        }

        let before = self.entries.len();
        self.entries
            .retain(|id, _| thread_id.is_some_and(|current| current == id.as_str()));
        let cleared = before - self.entries.len();
        if cleared > 0 {
            debug!(cleared, "Cleared interrupt state of other conversations");
        }

        TurnDecision::Fresh
    }

    /// Record how a turn for `thread_id` ended.
    ///
    /// A snapshot that requires action marks the conversation pending; a
    /// normal completion supersedes any earlier marker.
    pub fn record_outcome(&mut self, thread_id: &str, snapshot: &Snapshot) {
        let pending = snapshot.requires_action;
        if pending {
            info!(thread_id = %thread_id, "Turn paused for human input");
        }
        self.entries.insert(
            thread_id.to_string(),
            InterruptEntry {
                pending,
                last_snapshot: snapshot.clone(),
            },
        );
    }

    pub fn is_pending(&self, thread_id: &str) -> bool {
        self.entries.get(thread_id).is_some_and(|e| e.pending)
    }

    /// Last snapshot recorded for `thread_id`, kept for diagnostics.
    pub fn last_snapshot(&self, thread_id: &str) -> Option<&Snapshot> {
        self.entries.get(thread_id).map(|e| &e.last_snapshot)
    }

    pub fn clear(&mut self, thread_id: &str) {
        self.entries.remove(thread_id);
    }

    /// Drop all state; called when the owning session ends.
    pub fn dispose(&mut self) {
        self.entries.clear();
    }
}
