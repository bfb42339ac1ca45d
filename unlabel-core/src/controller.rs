//! Progressive analysis session controller
//!
//! The controller owns the transcript sink and the progress observer and is
//! their only writer. Each user action gets a fresh [`SessionId`]; starting
//! an action supersedes any streaming session that is still open.
//!
//! ## Guarantees
//!
//! - Every request appends exactly one assistant turn (result or error),
//!   except a streaming session that was cancelled or superseded, which
//!   appends none.
//! - Only the live streaming session may finalize. The live check and the
//!   append happen under one lock, so a late terminal event from a
//!   superseded session can never reach the transcript.
//! - Indicators are cleared when an action ends, on every path, by a drop
//!   guard. Updates from an action that is no longer the latest are dropped.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::client::{AnalysisBackend, FrameStream};
use crate::context::build_context;
use crate::error::{Error, Result};
use crate::normalize::normalize;
use crate::session::{Outcome, SessionState, Step, StreamingSession};
use crate::transcript::{ProgressObserver, TranscriptSink};
use crate::types::{
    AnalysisInput, AnalysisRequest, ConversationTurn, ImageUpload, Progress, ResultShape,
    SessionId,
};

/// How a submitted action ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: SessionId,
    pub state: SessionState,
}

/// Bookkeeping of which action is current
#[derive(Debug, Default)]
struct Ledger {
    next_id: u64,
    /// Most recently started action
    live: Option<SessionId>,
    /// Streaming session still allowed to finalize
    stream: Option<(SessionId, CancellationToken)>,
}

impl Ledger {
    fn begin(&mut self) -> SessionId {
        self.next_id += 1;
        let id = SessionId(self.next_id);

        if let Some((previous, token)) = self.stream.take() {
            tracing::info!(session = %previous, superseded_by = %id, "Superseding open stream session");
            token.cancel();
        }

        self.live = Some(id);
        id
    }

    fn is_live(&self, id: SessionId) -> bool {
        self.live == Some(id)
    }
}

/// Drives requests from submission to exactly one transcript turn
pub struct Controller<B, T, P> {
    backend: B,
    transcript: T,
    progress: P,
    stream_idle_timeout: Option<Duration>,
    ledger: Mutex<Ledger>,
}

impl<B, T, P> Controller<B, T, P>
where
    B: AnalysisBackend,
    T: TranscriptSink,
    P: ProgressObserver,
{
    pub fn new(backend: B, transcript: T, progress: P) -> Self {
        Self {
            backend,
            transcript,
            progress,
            stream_idle_timeout: None,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Fail a stream that stays silent for longer than `timeout`
    pub fn with_stream_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }

    pub fn transcript(&self) -> &T {
        &self.transcript
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Id of the most recently started action
    pub fn live_session(&self) -> Option<SessionId> {
        self.ledger().live
    }

    /// Whether a streaming session is currently open
    pub fn is_streaming(&self) -> bool {
        self.ledger().stream.is_some()
    }

    /// Abandon the open streaming session, if any.
    ///
    /// The session closes its channel and appends nothing, even if its
    /// terminal event is already buffered.
    pub fn cancel_active(&self) -> bool {
        match self.ledger().stream.take() {
            Some((id, token)) => {
                tracing::info!(session = %id, "Cancelling stream session");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Submit a text question, streamed or as a single exchange
    pub async fn submit(&self, text: impl Into<String>, streaming: bool) -> SessionSummary {
        if streaming {
            self.stream_text(text).await
        } else {
            self.submit_text(text).await
        }
    }

    /// Ask a text question through the decision endpoint
    pub async fn submit_text(&self, text: impl Into<String>) -> SessionSummary {
        let text = text.into();
        let context = build_context(&self.transcript.turns());
        self.transcript.append(ConversationTurn::user_text(text.clone()));

        let request = AnalysisRequest::new(AnalysisInput::Text(text), context);
        self.run_exchange(request).await
    }

    /// Upload a label image to the autonomous agent
    pub async fn submit_image(&self, upload: ImageUpload) -> SessionSummary {
        let context = build_context(&self.transcript.turns());
        self.transcript.append(ConversationTurn::user_image(&upload));

        let request = AnalysisRequest::new(AnalysisInput::Image(upload), context);
        self.run_exchange(request).await
    }

    /// Ask a text question and follow the agent's progress as it streams
    pub async fn stream_text(&self, text: impl Into<String>) -> SessionSummary {
        let text = text.into();
        let context = build_context(&self.transcript.turns());
        self.transcript.append(ConversationTurn::user_text(text.clone()));

        let token = CancellationToken::new();
        let id = {
            let mut ledger = self.ledger();
            let id = ledger.begin();
            ledger.stream = Some((id, token.clone()));
            id
        };
        let _indicators = self.indicators(id);
        let mut session = StreamingSession::new(id);

        tracing::info!(session = %id, has_context = context.is_some(), "Opening stream session");

        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            opened = self.backend.open_stream(&text, context.as_deref()) => Some(opened),
        };

        let mut frames = match opened {
            None => {
                session.cancel();
                return SessionSummary { id, state: session.state() };
            }
            Some(Ok(frames)) => frames,
            Some(Err(e)) => {
                let step = session.channel_failed(&e.to_string());
                self.apply(id, step);
                return SessionSummary { id, state: session.state() };
            }
        };
        session.open();

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    session.cancel();
                    break;
                }
                next = next_frame(&mut frames, self.stream_idle_timeout) => next,
            };

            let step = match next {
                Ok(Some(frame)) => session.handle_frame(&frame),
                Ok(None) => session.channel_failed("stream ended before a terminal event"),
                Err(e) => session.channel_failed(&e.to_string()),
            };

            if self.apply(id, step) {
                break;
            }
        }

        // Closes the push channel.
        drop(frames);

        SessionSummary { id, state: session.state() }
    }

    /// Single request/response exchange shared by text and image input
    async fn run_exchange(&self, request: AnalysisRequest) -> SessionSummary {
        let id = self.ledger().begin();
        let _indicators = self.indicators(id);

        tracing::info!(
            session = %id,
            has_context = request.context().is_some(),
            "Submitting analysis request"
        );

        let (shape, response) = match request.input() {
            AnalysisInput::Text(text) => (
                ResultShape::Decision,
                self.backend.decide(text, request.context()).await,
            ),
            AnalysisInput::Image(upload) => {
                self.report(id, Some(Progress::new(1, 3, "Starting analysis...")));
                self.report(id, Some(Progress::new(2, 3, "Uploading image...")));
                let response = self.backend.analyze_image(upload, request.context()).await;
                self.report(id, Some(Progress::new(3, 3, "Processing results...")));
                (ResultShape::Workflow, response)
            }
        };

        let outcome = match response.and_then(|raw| normalize(shape, &raw)) {
            Ok(result) => Outcome::Completed(result),
            Err(e) => {
                tracing::warn!(session = %id, error = %e, "Analysis request failed");
                Outcome::Failed {
                    kind: e.failure_kind(),
                    message: failure_message(request.input(), &e),
                }
            }
        };

        let state = if outcome.is_success() {
            SessionState::Finalized
        } else {
            SessionState::Failed
        };
        self.transcript.append(outcome.into_turn());

        SessionSummary { id, state }
    }

    /// Apply one machine step. Returns true once the session is done.
    fn apply(&self, id: SessionId, step: Step) -> bool {
        match step {
            Step::Progress(progress) => {
                self.report(id, Some(progress));
                false
            }
            Step::Finished(outcome) => {
                self.finalize(id, outcome);
                true
            }
            Step::Ignored | Step::Skipped | Step::Merged => false,
        }
    }

    /// Append the outcome of a streaming session if it is still the live one
    fn finalize(&self, id: SessionId, outcome: Outcome) {
        let mut ledger = self.ledger();
        match &ledger.stream {
            Some((live, _)) if *live == id => {
                ledger.stream = None;
                self.transcript.append(outcome.into_turn());
            }
            _ => {
                tracing::info!(session = %id, "Discarding outcome of superseded stream session");
            }
        }
    }

    fn report(&self, id: SessionId, progress: Option<Progress>) {
        if self.ledger().is_live(id) {
            self.progress.set_progress(progress);
        }
    }

    fn indicators(&self, id: SessionId) -> IndicatorGuard<'_> {
        self.progress.set_busy(true);
        IndicatorGuard {
            progress: &self.progress,
            ledger: &self.ledger,
            id,
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        lock_ledger(&self.ledger)
    }
}

fn lock_ledger(ledger: &Mutex<Ledger>) -> MutexGuard<'_, Ledger> {
    // Ledger updates are single assignments; a poisoned lock still holds
    // consistent data.
    ledger.lock().unwrap_or_else(|e| e.into_inner())
}

/// Clears the busy and progress indicators when an action ends
struct IndicatorGuard<'a> {
    progress: &'a dyn ProgressObserver,
    ledger: &'a Mutex<Ledger>,
    id: SessionId,
}

impl Drop for IndicatorGuard<'_> {
    fn drop(&mut self) {
        if lock_ledger(self.ledger).is_live(self.id) {
            self.progress.set_progress(None);
            self.progress.set_busy(false);
        }
    }
}

/// Wait for the next frame, failing if the channel stays silent too long
async fn next_frame(frames: &mut FrameStream, idle: Option<Duration>) -> Result<Option<String>> {
    match idle {
        Some(limit) => tokio::time::timeout(limit, frames.next())
            .await
            .map_err(|_| {
                Error::Transport(format!("no stream event received for {:?}", limit))
            })?
            .transpose(),
        None => frames.next().await.transpose(),
    }
}

/// Human-readable error turn text for a failed exchange
fn failure_message(input: &AnalysisInput, error: &Error) -> String {
    match input {
        AnalysisInput::Text(_) => format!(
            "I'm having trouble connecting to my reasoning engine right now. Error: {}",
            error
        ),
        AnalysisInput::Image(_) => {
            format!("I'm having trouble analyzing that image. Error: {}", error)
        }
    }
}
