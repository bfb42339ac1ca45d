//! End-to-end tests for the session controller
//!
//! These tests drive the controller against a scripted in-memory backend and
//! check the transcript and indicator side effects of every path.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use serde_json::{json, Value};
use unlabel_core::client::{AnalysisBackend, FrameStream};
use unlabel_core::session::{SessionState, CONNECTION_LOST_MESSAGE};
use unlabel_core::transcript::{ProgressObserver, Transcript, TranscriptSink, GREETING};
use unlabel_core::{
    Author, CanonicalResult, Controller, ConversationTurn, Error, FailureKind, ImageUpload,
    Intent, Progress, Result, SessionId, TurnKind, TurnPayload,
};

// ============================================
// Test doubles
// ============================================

#[derive(Debug, Clone, PartialEq)]
struct Call {
    endpoint: &'static str,
    input: String,
    context: Option<String>,
}

#[derive(Default)]
struct ScriptedBackend {
    decisions: Mutex<VecDeque<Result<Value>>>,
    images: Mutex<VecDeque<Result<Value>>>,
    streams: Mutex<VecDeque<Result<FrameStream>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedBackend {
    fn with_decision(self, response: Result<Value>) -> Self {
        self.decisions.lock().unwrap().push_back(response);
        self
    }

    fn with_image(self, response: Result<Value>) -> Self {
        self.images.lock().unwrap().push_back(response);
        self
    }

    fn with_stream(self, stream: Result<FrameStream>) -> Self {
        self.streams.lock().unwrap().push_back(stream);
        self
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, endpoint: &'static str, input: &str, context: Option<&str>) {
        self.calls.lock().unwrap().push(Call {
            endpoint,
            input: input.to_string(),
            context: context.map(str::to_string),
        });
    }
}

#[async_trait]
impl AnalysisBackend for ScriptedBackend {
    async fn decide(&self, text: &str, context: Option<&str>) -> Result<Value> {
        self.record("decision", text, context);
        self.decisions
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected decision request")
    }

    async fn analyze_image(&self, image: &ImageUpload, context: Option<&str>) -> Result<Value> {
        self.record("image", &image.file_name, context);
        self.images
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected image request")
    }

    async fn open_stream(&self, text: &str, context: Option<&str>) -> Result<FrameStream> {
        self.record("stream", text, context);
        self.streams
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected stream request")
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Indicator {
    Busy(bool),
    Progress(Option<Progress>),
}

#[derive(Default)]
struct RecordingProgress {
    events: Mutex<Vec<Indicator>>,
}

impl RecordingProgress {
    fn events(&self) -> Vec<Indicator> {
        self.events.lock().unwrap().clone()
    }

    fn busy(&self) -> bool {
        self.events()
            .iter()
            .rev()
            .find_map(|e| match e {
                Indicator::Busy(busy) => Some(*busy),
                _ => None,
            })
            .unwrap_or(false)
    }

    fn progress(&self) -> Option<Progress> {
        self.events()
            .iter()
            .rev()
            .find_map(|e| match e {
                Indicator::Progress(progress) => Some(progress.clone()),
                _ => None,
            })
            .flatten()
    }
}

impl ProgressObserver for RecordingProgress {
    fn set_busy(&self, busy: bool) {
        self.events.lock().unwrap().push(Indicator::Busy(busy));
    }

    fn set_progress(&self, progress: Option<Progress>) {
        self.events.lock().unwrap().push(Indicator::Progress(progress));
    }
}

/// Sink whose storage fails whenever an answer is appended
#[derive(Default)]
struct FailingSink {
    turns: Mutex<Vec<ConversationTurn>>,
}

impl TranscriptSink for FailingSink {
    fn append(&self, turn: ConversationTurn) {
        if turn.is_final() {
            panic!("transcript storage unavailable");
        }
        self.turns.lock().unwrap().push(turn);
    }

    fn turns(&self) -> Vec<ConversationTurn> {
        self.turns.lock().unwrap().clone()
    }
}

fn failing_sink_controller(
    backend: ScriptedBackend,
) -> (
    Arc<Controller<ScriptedBackend, FailingSink, Arc<RecordingProgress>>>,
    Arc<RecordingProgress>,
) {
    unlabel_core::logging::init_test();
    let progress = Arc::new(RecordingProgress::default());
    let controller = Controller::new(backend, FailingSink::default(), progress.clone());
    (Arc::new(controller), progress)
}

type TestController = Controller<ScriptedBackend, Transcript, Arc<RecordingProgress>>;

fn controller(backend: ScriptedBackend) -> (TestController, Arc<RecordingProgress>) {
    unlabel_core::logging::init_test();
    let progress = Arc::new(RecordingProgress::default());
    let controller = Controller::new(backend, Transcript::new(), progress.clone());
    (controller, progress)
}

fn frames(events: Vec<Value>) -> Result<FrameStream> {
    Ok(futures::stream::iter(events.into_iter().map(|e| Ok(e.to_string()))).boxed())
}

fn final_turns(controller: &TestController) -> Vec<TurnPayload> {
    controller
        .transcript()
        .turns()
        .into_iter()
        .filter(|turn| turn.is_final())
        .map(|turn| turn.payload)
        .collect()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}

// ============================================
// Synchronous path
// ============================================

#[tokio::test]
async fn test_sync_decision_with_only_a_summary() {
    let backend =
        ScriptedBackend::default().with_decision(Ok(json!({"quick_insight": {"summary": "Low sugar"}})));
    let (controller, progress) = controller(backend);

    let summary = controller.submit_text("rolled oats, honey").await;
    assert_eq!(summary.state, SessionState::Finalized);

    let turns = controller.transcript().turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].author, Author::User);
    assert_eq!(turns[1].kind(), TurnKind::StructuredResult);

    let Some(CanonicalResult::Decision(decision)) = turns[1].result() else {
        panic!("expected a decision result");
    };
    assert_eq!(decision.quick_insight.summary, "Low sugar");
    assert!(decision.explanation.why_this_matters.is_empty());
    assert!(decision.key_signals.is_empty());
    assert!(decision.ingredient_translations.is_empty());
    assert!(decision.uncertainty_flags.is_empty());
    assert_eq!(decision.intent_classified, Intent::Curiosity);

    assert_eq!(progress.events().first(), Some(&Indicator::Busy(true)));
    assert!(!progress.busy());
    assert!(progress.progress().is_none());
}

#[tokio::test]
async fn test_context_is_built_before_the_new_turn() {
    let backend = ScriptedBackend::default()
        .with_decision(Ok(json!({"quick_insight": {"summary": "Low sugar"}})))
        .with_decision(Ok(json!({})));
    let progress = Arc::new(RecordingProgress::default());
    let controller = Controller::new(backend, Transcript::with_greeting(), progress);

    controller.submit_text("first").await;
    controller.submit_text("second").await;

    let calls = controller.backend().calls();
    assert_eq!(calls[0].context.as_deref(), Some(format!("AI: {}", GREETING).as_str()));
    assert_eq!(
        calls[1].context.as_deref(),
        Some(
            format!(
                "AI: {}\nUser: first\nAI: Analyzed product - Low sugar",
                GREETING
            )
            .as_str()
        )
    );
}

#[tokio::test]
async fn test_first_request_without_history_has_no_context() {
    let backend = ScriptedBackend::default().with_decision(Ok(json!({})));
    let (controller, _) = controller(backend);

    controller.submit_text("sugar, palm oil").await;
    assert_eq!(controller.backend().calls()[0].context, None);
}

#[tokio::test]
async fn test_sync_transport_failure_appends_one_error_without_retry() {
    let backend = ScriptedBackend::default()
        .with_decision(Err(Error::Transport("connection refused".to_string())));
    let (controller, progress) = controller(backend);

    let summary = controller.submit_text("oats").await;
    assert_eq!(summary.state, SessionState::Failed);

    let finals = final_turns(&controller);
    assert_eq!(finals.len(), 1);
    let TurnPayload::Error { failure, message } = &finals[0] else {
        panic!("expected an error turn");
    };
    assert_eq!(*failure, FailureKind::Transport);
    assert!(message.starts_with("I'm having trouble connecting to my reasoning engine"));
    assert!(message.contains("connection refused"));

    assert_eq!(controller.backend().calls().len(), 1);
    assert!(!progress.busy());
}

#[tokio::test]
async fn test_sync_shape_mismatch_is_reported_not_repaired() {
    let backend = ScriptedBackend::default()
        .with_decision(Ok(json!({"insight": "old format", "trade_offs": {"pros": []}})));
    let (controller, _) = controller(backend);

    controller.submit_text("oats").await;

    let finals = final_turns(&controller);
    assert_eq!(finals.len(), 1);
    assert!(matches!(
        finals[0],
        TurnPayload::Error {
            failure: FailureKind::ShapeMismatch,
            ..
        }
    ));
}

#[tokio::test]
async fn test_image_upload_reports_three_steps() {
    let backend = ScriptedBackend::default().with_image(Ok(json!({
        "initial_analysis": {"insight": "Mostly sugar", "extracted_text": "SUGAR, COCOA"},
        "synthesis": {"executive_summary": "Treat, not a staple", "confidence_level": "high"}
    })));
    let (controller, progress) = controller(backend);

    let upload = ImageUpload::from_named_bytes("label.jpg", vec![0xFF, 0xD8]).unwrap();
    let summary = controller.submit_image(upload).await;
    assert_eq!(summary.state, SessionState::Finalized);

    let steps: Vec<Progress> = progress
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Indicator::Progress(Some(p)) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(
        steps,
        vec![
            Progress::new(1, 3, "Starting analysis..."),
            Progress::new(2, 3, "Uploading image..."),
            Progress::new(3, 3, "Processing results..."),
        ]
    );
    assert!(progress.progress().is_none());
    assert!(!progress.busy());

    let turns = controller.transcript().turns();
    assert_eq!(turns[0].kind(), TurnKind::Image);
    let Some(CanonicalResult::Workflow(workflow)) = turns[1].result() else {
        panic!("expected a workflow result");
    };
    assert_eq!(
        workflow.initial_analysis.extracted_text.as_deref(),
        Some("SUGAR, COCOA")
    );
}

#[tokio::test]
async fn test_image_failure_uses_image_wording() {
    let backend = ScriptedBackend::default().with_image(Err(Error::Transport(
        "API error (400 Bad Request): File must be an image".to_string(),
    )));
    let (controller, _) = controller(backend);

    let upload = ImageUpload::from_named_bytes("label.png", vec![1]).unwrap();
    controller.submit_image(upload).await;

    let finals = final_turns(&controller);
    let TurnPayload::Error { message, .. } = &finals[0] else {
        panic!("expected an error turn");
    };
    assert!(message.starts_with("I'm having trouble analyzing that image."));
}

// ============================================
// Streaming path
// ============================================

#[tokio::test]
async fn test_stream_finalizes_from_accumulated_steps() {
    let backend = ScriptedBackend::default().with_stream(frames(vec![
        json!({"type": "step_start", "step": 1, "total": 3, "message": "Reading the label"}),
        json!({"type": "step_complete", "name": "initial_analysis", "result": {"insight": "X"}}),
        json!({"type": "step_complete", "name": "synthesis", "result": {"executive_summary": "Y"}}),
        json!({"type": "complete"}),
    ]));
    let (controller, progress) = controller(backend);

    let summary = controller.stream_text("cane sugar, oats").await;
    assert_eq!(summary.state, SessionState::Finalized);

    let turns = controller.transcript().turns();
    assert_eq!(turns.len(), 2);
    let Some(CanonicalResult::Workflow(workflow)) = turns[1].result() else {
        panic!("expected a workflow result");
    };
    assert_eq!(workflow.initial_analysis.insight, "X");
    assert_eq!(workflow.synthesis.executive_summary, "Y");
    assert!(workflow.workflow_steps.is_empty());

    assert!(progress
        .events()
        .contains(&Indicator::Progress(Some(Progress::new(1, 3, "Reading the label")))));
    assert!(progress.progress().is_none());
    assert!(!progress.busy());
}

#[tokio::test]
async fn test_stream_drop_before_terminal_event() {
    let backend = ScriptedBackend::default().with_stream(frames(vec![
        json!({"type": "step_start", "step": 1, "total": 3, "message": "Reading the label"}),
    ]));
    let (controller, progress) = controller(backend);

    let summary = controller.stream_text("oats").await;
    assert_eq!(summary.state, SessionState::Failed);

    let finals = final_turns(&controller);
    assert_eq!(
        finals,
        vec![TurnPayload::Error {
            failure: FailureKind::Transport,
            message: CONNECTION_LOST_MESSAGE.to_string(),
        }]
    );
    assert!(progress.progress().is_none());
    assert!(!progress.busy());
}

#[tokio::test]
async fn test_stream_channel_error_item() {
    let stream: FrameStream = futures::stream::iter(vec![
        Ok(json!({"type": "step_start", "step": 1, "total": 2}).to_string()),
        Err(Error::Transport("event stream failed: connection reset".to_string())),
    ])
    .boxed();
    let backend = ScriptedBackend::default().with_stream(Ok(stream));
    let (controller, _) = controller(backend);

    controller.stream_text("oats").await;

    let finals = final_turns(&controller);
    assert_eq!(finals.len(), 1);
    assert!(matches!(
        finals[0],
        TurnPayload::Error {
            failure: FailureKind::Transport,
            ..
        }
    ));
}

#[tokio::test]
async fn test_stream_open_failure() {
    let backend = ScriptedBackend::default()
        .with_stream(Err(Error::Transport("failed to open event stream".to_string())));
    let (controller, progress) = controller(backend);

    let summary = controller.stream_text("oats").await;
    assert_eq!(summary.state, SessionState::Failed);
    assert_eq!(final_turns(&controller).len(), 1);
    assert!(!progress.busy());
}

#[tokio::test]
async fn test_stream_server_error_event() {
    let backend = ScriptedBackend::default().with_stream(frames(vec![
        json!({"type": "step_start", "step": 1, "total": 3}),
        json!({"type": "error", "detail": "Decision engine error: quota exhausted"}),
    ]));
    let (controller, _) = controller(backend);

    controller.stream_text("oats").await;

    assert_eq!(
        final_turns(&controller),
        vec![TurnPayload::Error {
            failure: FailureKind::ServerReported,
            message: "Decision engine error: quota exhausted".to_string(),
        }]
    );
}

#[tokio::test]
async fn test_stream_skips_malformed_frames_and_ignores_events_after_terminal() {
    let stream: FrameStream = futures::stream::iter(vec![
        Ok("{\"type\": \"step_start\", \"step\": ".to_string()),
        Ok(json!({"type": "step_complete", "name": "decision_engine", "result": {"score": 1}})
            .to_string()),
        Ok(json!({"type": "complete"}).to_string()),
        Ok(json!({"type": "error", "detail": "late"}).to_string()),
    ])
    .boxed();
    let backend = ScriptedBackend::default().with_stream(Ok(stream));
    let (controller, _) = controller(backend);

    let summary = controller.stream_text("oats").await;
    assert_eq!(summary.state, SessionState::Finalized);

    let finals = final_turns(&controller);
    assert_eq!(finals.len(), 1);
    let TurnPayload::Result {
        result: CanonicalResult::Workflow(workflow),
    } = &finals[0]
    else {
        panic!("expected a workflow result");
    };
    assert_eq!(workflow.workflow_steps.len(), 1);
    assert_eq!(workflow.workflow_steps[0].action, "decision_engine");
    assert_eq!(workflow.workflow_steps[0].result, json!({"score": 1}));
}

#[tokio::test]
async fn test_stream_idle_timeout_fails_the_session() {
    let backend =
        ScriptedBackend::default().with_stream(Ok(futures::stream::pending::<Result<String>>().boxed()));
    let (controller, progress) = controller(backend);
    let controller = controller.with_stream_idle_timeout(Some(Duration::from_millis(20)));

    let summary = controller.stream_text("oats").await;
    assert_eq!(summary.state, SessionState::Failed);
    assert_eq!(final_turns(&controller).len(), 1);
    assert!(!progress.busy());
}

#[tokio::test]
async fn test_cancelled_stream_discards_buffered_terminal_event() {
    let (tx, rx) = mpsc::unbounded::<Result<String>>();
    let backend = ScriptedBackend::default().with_stream(Ok(rx.boxed()));
    let (controller, progress) = controller(backend);
    let controller = Arc::new(controller);

    let task = tokio::spawn({
        let controller = controller.clone();
        async move { controller.stream_text("oats").await }
    });
    wait_until(|| controller.is_streaming()).await;

    tx.unbounded_send(Ok(json!({"type": "complete"}).to_string()))
        .unwrap();
    assert!(controller.cancel_active());

    let summary = task.await.unwrap();
    assert_eq!(summary.state, SessionState::Cancelled);
    assert!(final_turns(&controller).is_empty());
    assert_eq!(controller.transcript().len(), 1);
    assert!(!progress.busy());
    assert!(!controller.cancel_active());
}

#[tokio::test]
async fn test_back_to_back_streams_only_second_finalizes() {
    let (tx_first, rx_first) = mpsc::unbounded::<Result<String>>();
    let (tx_second, rx_second) = mpsc::unbounded::<Result<String>>();
    let backend = ScriptedBackend::default()
        .with_stream(Ok(rx_first.boxed()))
        .with_stream(Ok(rx_second.boxed()));
    let (controller, progress) = controller(backend);
    let controller = Arc::new(controller);

    let first = tokio::spawn({
        let controller = controller.clone();
        async move { controller.stream_text("first question").await }
    });
    wait_until(|| controller.live_session() == Some(SessionId(1))).await;
    tx_first
        .unbounded_send(Ok(json!({"type": "step_start", "step": 1, "total": 3}).to_string()))
        .unwrap();

    let second = tokio::spawn({
        let controller = controller.clone();
        async move { controller.stream_text("second question").await }
    });
    wait_until(|| controller.live_session() == Some(SessionId(2))).await;

    // The first session's terminal event shows up after it was superseded.
    let _ = tx_first.unbounded_send(Ok(json!({
        "type": "complete",
        "result": {"synthesis": {"executive_summary": "from first"}}
    })
    .to_string()));

    let first = first.await.unwrap();
    assert_eq!(first.state, SessionState::Cancelled);

    tx_second
        .unbounded_send(Ok(json!({
            "type": "complete",
            "result": {"synthesis": {"executive_summary": "from second"}}
        })
        .to_string()))
        .unwrap();
    let second = second.await.unwrap();
    assert_eq!(second.state, SessionState::Finalized);

    let results: Vec<String> = controller
        .transcript()
        .turns()
        .iter()
        .filter_map(|turn| turn.result().map(|r| r.headline().to_string()))
        .collect();
    assert_eq!(results, vec!["from second".to_string()]);
    assert_eq!(final_turns(&controller).len(), 1);
    assert!(!progress.busy());

    let stream_calls: Vec<_> = controller
        .backend()
        .calls()
        .into_iter()
        .filter(|c| c.endpoint == "stream")
        .collect();
    assert_eq!(stream_calls.len(), 2);
    assert_eq!(
        stream_calls[1].context.as_deref(),
        Some("User: first question")
    );
}

#[tokio::test]
async fn test_new_sync_request_supersedes_open_stream() {
    let (_tx, rx) = mpsc::unbounded::<Result<String>>();
    let backend = ScriptedBackend::default()
        .with_stream(Ok(rx.boxed()))
        .with_decision(Ok(json!({"quick_insight": {"summary": "Plain oats"}})));
    let (controller, _) = controller(backend);
    let controller = Arc::new(controller);

    let streaming = tokio::spawn({
        let controller = controller.clone();
        async move { controller.stream_text("first").await }
    });
    wait_until(|| controller.is_streaming()).await;

    let summary = controller.submit_text("second").await;
    assert_eq!(summary.state, SessionState::Finalized);
    assert_eq!(streaming.await.unwrap().state, SessionState::Cancelled);

    let finals = final_turns(&controller);
    assert_eq!(finals.len(), 1);
    assert!(matches!(
        &finals[0],
        TurnPayload::Result {
            result: CanonicalResult::Decision(_)
        }
    ));
}

// ============================================
// Indicators survive a failing transcript
// ============================================

#[tokio::test]
async fn test_sync_indicators_cleared_when_append_panics() {
    let backend = ScriptedBackend::default()
        .with_decision(Ok(json!({"quick_insight": {"summary": "Low sugar"}})));
    let (controller, progress) = failing_sink_controller(backend);

    let task = tokio::spawn({
        let controller = controller.clone();
        async move { controller.submit_text("oats").await }
    });
    let joined = task.await;

    assert!(joined.unwrap_err().is_panic());
    assert_eq!(progress.events().first(), Some(&Indicator::Busy(true)));
    assert_eq!(progress.events().last(), Some(&Indicator::Busy(false)));
    assert!(progress.progress().is_none());
    assert_eq!(controller.transcript().turns().len(), 1);
}

#[tokio::test]
async fn test_stream_indicators_cleared_when_append_panics() {
    let backend = ScriptedBackend::default().with_stream(frames(vec![
        json!({"type": "step_start", "step": 1, "total": 2, "message": "Reading the label"}),
        json!({"type": "complete", "result": {"synthesis": {"executive_summary": "Y"}}}),
    ]));
    let (controller, progress) = failing_sink_controller(backend);

    let task = tokio::spawn({
        let controller = controller.clone();
        async move { controller.stream_text("oats").await }
    });
    let joined = task.await;

    assert!(joined.unwrap_err().is_panic());
    assert!(progress
        .events()
        .contains(&Indicator::Progress(Some(Progress::new(1, 2, "Reading the label")))));
    assert_eq!(progress.events().last(), Some(&Indicator::Busy(false)));
    assert!(progress.progress().is_none());
    assert!(!controller.is_streaming());
}

#[tokio::test]
async fn test_stream_step_start_without_total_shows_progress() {
    let backend = ScriptedBackend::default().with_stream(frames(vec![
        json!({"type": "step_start", "step": 1}),
        json!({"type": "complete"}),
    ]));
    let (controller, progress) = controller(backend);

    controller.stream_text("oats").await;

    assert!(progress
        .events()
        .contains(&Indicator::Progress(Some(Progress::new(1, 0, "")))));
    assert_eq!(final_turns(&controller).len(), 1);
}
