//! Streaming session state machine
//!
//! ```text
//! Idle ──open──▶ Open ──first frame──▶ Receiving ──complete──▶ Finalized
//!   │              │                       │
//!   │              └───────────┬───────────┴──error / channel failure──▶ Failed
//!   └──────────────────────────┴──cancel──▶ Cancelled
//! ```
//!
//! The machine is synchronous and does no I/O: the controller feeds it frames
//! and applies the [`Step`] it returns. `Finalized`, `Failed` and `Cancelled`
//! absorb every further input, so a session yields at most one
//! [`Step::Finished`] over its lifetime.

mod partial;

pub use partial::{
    PartialResult, DECISION_ENGINE_DESCRIPTION, DECISION_ENGINE_REASONING, STEP_DECISION_ENGINE,
    STEP_INITIAL_ANALYSIS, STEP_SYNTHESIS,
};

use crate::client::StreamEvent;
use crate::error::Error;
use crate::normalize::normalize;
use crate::types::{
    CanonicalResult, ConversationTurn, FailureKind, Progress, ResultShape, SessionId,
};

/// Message shown when the push channel dies before a terminal event
pub const CONNECTION_LOST_MESSAGE: &str =
    "I lost the connection to my reasoning engine before the analysis finished. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Open,
    Receiving,
    Finalized,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Finalized | SessionState::Failed | SessionState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Open => "open",
            SessionState::Receiving => "receiving",
            SessionState::Finalized => "finalized",
            SessionState::Failed => "failed",
            SessionState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a request ended
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(CanonicalResult),
    Failed { kind: FailureKind, message: String },
}

impl Outcome {
    /// The one transcript turn that closes out the request
    pub fn into_turn(self) -> ConversationTurn {
        match self {
            Outcome::Completed(result) => ConversationTurn::assistant_result(result),
            Outcome::Failed { kind, message } => ConversationTurn::assistant_error(kind, message),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }
}

/// What the controller must do after feeding the machine one input
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Input arrived in a terminal state and was dropped
    Ignored,
    /// A frame could not be parsed; the session continues
    Skipped,
    /// A step output was merged into the partial result
    Merged,
    /// Show this progress
    Progress(Progress),
    /// The session reached a terminal state; append this outcome
    Finished(Outcome),
}

/// One streaming analysis, from channel open to terminal event
#[derive(Debug)]
pub struct StreamingSession {
    id: SessionId,
    state: SessionState,
    partial: PartialResult,
    progress: Option<Progress>,
}

impl StreamingSession {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            state: SessionState::Idle,
            partial: PartialResult::new(),
            progress: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn partial(&self) -> &PartialResult {
        &self.partial
    }

    /// Progress last announced by the server, cleared on termination
    pub fn progress(&self) -> Option<&Progress> {
        self.progress.as_ref()
    }

    /// Record that the push channel is open. Only valid from `Idle`.
    pub fn open(&mut self) -> bool {
        if self.state != SessionState::Idle {
            return false;
        }
        self.state = SessionState::Open;
        tracing::debug!(session = %self.id, "Stream session open");
        true
    }

    /// Feed one raw frame.
    ///
    /// A frame that fails to parse is logged and skipped without ending the
    /// session.
    pub fn handle_frame(&mut self, frame: &str) -> Step {
        if self.state.is_terminal() {
            return Step::Ignored;
        }
        self.mark_receiving();

        match StreamEvent::parse(frame) {
            Ok(event) => self.handle_event(event),
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, frame = %frame, "Skipping malformed stream frame");
                Step::Skipped
            }
        }
    }

    /// Feed one parsed event
    pub fn handle_event(&mut self, event: StreamEvent) -> Step {
        if self.state.is_terminal() {
            tracing::debug!(
                session = %self.id,
                event = event.name(),
                state = %self.state,
                "Ignoring event after terminal state"
            );
            return Step::Ignored;
        }
        self.mark_receiving();

        match event {
            StreamEvent::StepStart {
                step,
                total,
                message,
            } => {
                let progress = Progress::new(step, total, message);
                self.progress = Some(progress.clone());
                Step::Progress(progress)
            }
            StreamEvent::StepComplete { name, result } => {
                tracing::debug!(session = %self.id, step = %name, "Step complete");
                self.partial.merge(&name, result);
                Step::Merged
            }
            StreamEvent::Complete { result } => {
                let raw = match result {
                    Some(result) => result,
                    None => self.partial.to_raw(),
                };
                match normalize(ResultShape::Workflow, &raw) {
                    Ok(canonical) => self.finish(
                        SessionState::Finalized,
                        Outcome::Completed(canonical),
                    ),
                    Err(e) => {
                        tracing::warn!(session = %self.id, error = %e, "Final result rejected");
                        self.finish(
                            SessionState::Failed,
                            Outcome::Failed {
                                kind: e.failure_kind(),
                                message: format!(
                                    "I received an analysis I couldn't read. Error: {}",
                                    e
                                ),
                            },
                        )
                    }
                }
            }
            StreamEvent::Error { detail } => {
                let err = Error::ServerReported(detail);
                tracing::warn!(session = %self.id, error = %err, "Server reported stream error");
                self.finish(
                    SessionState::Failed,
                    Outcome::Failed {
                        kind: err.failure_kind(),
                        message: err.to_string(),
                    },
                )
            }
        }
    }

    /// The push channel failed (connection drop, timeout, unreadable stream)
    pub fn channel_failed(&mut self, reason: &str) -> Step {
        if self.state.is_terminal() {
            return Step::Ignored;
        }
        tracing::warn!(session = %self.id, state = %self.state, reason = %reason, "Stream channel failed");
        self.finish(
            SessionState::Failed,
            Outcome::Failed {
                kind: FailureKind::Transport,
                message: CONNECTION_LOST_MESSAGE.to_string(),
            },
        )
    }

    /// Abandon the session. Returns false if it had already terminated.
    pub fn cancel(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        tracing::info!(session = %self.id, state = %self.state, "Stream session cancelled");
        self.state = SessionState::Cancelled;
        self.progress = None;
        true
    }

    fn mark_receiving(&mut self) {
        if matches!(self.state, SessionState::Idle | SessionState::Open) {
            self.state = SessionState::Receiving;
        }
    }

    fn finish(&mut self, state: SessionState, outcome: Outcome) -> Step {
        self.state = state;
        self.progress = None;
        tracing::info!(
            session = %self.id,
            state = %state,
            steps = self.partial.steps_completed(),
            "Stream session finished"
        );
        Step::Finished(outcome)
    }
}
