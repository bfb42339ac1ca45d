//! Transcript sink and progress observer seams
//!
//! The controller is the only writer. Both seams take `&self` so a single
//! controller can serve overlapping actions; implementations use interior
//! mutability and never hold a lock across an await point.

use std::sync::{Mutex, MutexGuard};

use crate::types::{ConversationTurn, Progress};

/// Greeting shown at the top of a fresh conversation
pub const GREETING: &str = "I'm your Unlabel Co-pilot. Show me a label or ask about ingredients, and I'll help you understand the trade-offs.";

/// Ordered, append-only list of conversation turns
pub trait TranscriptSink: Send + Sync {
    /// Append one finished turn. Never fails from the controller's perspective.
    fn append(&self, turn: ConversationTurn);

    /// Snapshot of all turns in insertion order
    fn turns(&self) -> Vec<ConversationTurn>;
}

/// Observer for the "analysis in progress" indicators
pub trait ProgressObserver: Send + Sync {
    /// Toggle the busy indicator
    fn set_busy(&self, busy: bool);

    /// Show step progress, or clear it with `None`
    fn set_progress(&self, progress: Option<Progress>);
}

/// Observer that ignores every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn set_busy(&self, _busy: bool) {}

    fn set_progress(&self, _progress: Option<Progress>) {}
}

/// In-memory transcript, lost when the process exits
#[derive(Debug, Default)]
pub struct Transcript {
    turns: Mutex<Vec<ConversationTurn>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transcript seeded with the assistant greeting
    pub fn with_greeting() -> Self {
        let transcript = Self::new();
        transcript.append(ConversationTurn::assistant_text(GREETING));
        transcript
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Most recent turn, if any
    pub fn last(&self) -> Option<ConversationTurn> {
        self.lock().last().cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ConversationTurn>> {
        // A poisoned lock only means another thread panicked mid-append;
        // the vector itself is still consistent.
        self.turns.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TranscriptSink for Transcript {
    fn append(&self, turn: ConversationTurn) {
        tracing::debug!(turn_id = %turn.id, kind = turn.kind().as_str(), "Appending turn");
        self.lock().push(turn);
    }

    fn turns(&self) -> Vec<ConversationTurn> {
        self.lock().clone()
    }
}

impl<T: TranscriptSink + ?Sized> TranscriptSink for std::sync::Arc<T> {
    fn append(&self, turn: ConversationTurn) {
        (**self).append(turn)
    }

    fn turns(&self) -> Vec<ConversationTurn> {
        (**self).turns()
    }
}

impl<T: ProgressObserver + ?Sized> ProgressObserver for std::sync::Arc<T> {
    fn set_busy(&self, busy: bool) {
        (**self).set_busy(busy)
    }

    fn set_progress(&self, progress: Option<Progress>) {
        (**self).set_progress(progress)
    }
}
