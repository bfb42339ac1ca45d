//! Core domain types for unlabel
//!
//! These types describe the conversation transcript, the requests the
//! controller issues, and the canonical result records every consumer reads.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Turn** | One immutable entry in the transcript |
//! | **Request** | One user-initiated analysis (text or image plus context) |
//! | **Decision result** | Result family returned for text questions |
//! | **Workflow result** | Result family returned by the multi-step agent (images, streams) |
//! | **Canonical result** | A result whose every field is populated after normalization |
//!
//! Canonical results are only ever built by [`crate::normalize`]; nothing else
//! in the crate fills in defaults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Sessions
// ============================================

/// Identifier of one user action (sync request or streaming session).
///
/// Ids are handed out by the controller in strictly increasing order, so the
/// most recent action always has the largest id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Progress snapshot shown while a request is in flight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// 1-based index of the current step
    pub step: u32,
    /// Total number of steps announced by the server
    pub total: u32,
    /// Human-readable status line
    pub message: String,
}

impl Progress {
    pub fn new(step: u32, total: u32, message: impl Into<String>) -> Self {
        Self {
            step,
            total,
            message: message.into(),
        }
    }
}

// ============================================
// Requests
// ============================================

/// Binary image payload selected by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    /// Raw file contents
    pub bytes: Vec<u8>,
    /// Original file name, sent with the multipart upload
    pub file_name: String,
    /// MIME type (e.g. `image/png`)
    pub media_type: String,
}

impl ImageUpload {
    /// Build an upload from a file name, detecting the media type from its extension.
    ///
    /// Returns `None` for extensions the service does not accept.
    pub fn from_named_bytes(file_name: impl Into<String>, bytes: Vec<u8>) -> Option<Self> {
        let file_name = file_name.into();
        let media_type = media_type_for(&file_name)?;
        Some(Self {
            bytes,
            file_name,
            media_type,
        })
    }
}

/// Image types the analysis service accepts
pub const ACCEPTED_IMAGE_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/webp",
    "image/gif",
    "image/heic",
];

/// Guess the media type of a file name, keeping only accepted image types
pub fn media_type_for(file_name: &str) -> Option<String> {
    mime_guess::from_path(file_name)
        .iter()
        .map(|mime| mime.essence_str().to_string())
        .find(|essence| ACCEPTED_IMAGE_TYPES.contains(&essence.as_str()))
}

/// What the user submitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisInput {
    Text(String),
    Image(ImageUpload),
}

/// One analysis request, fixed at construction time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    input: AnalysisInput,
    context: Option<String>,
}

impl AnalysisRequest {
    pub fn new(input: AnalysisInput, context: Option<String>) -> Self {
        Self { input, context }
    }

    pub fn input(&self) -> &AnalysisInput {
        &self.input
    }

    /// Conversation context sent alongside the input, if any
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }
}

// ============================================
// Canonical Results
// ============================================

/// The two result families the service returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultShape {
    /// Returned by the text decision endpoint
    Decision,
    /// Returned by the autonomous agent (image upload and streaming)
    Workflow,
}

impl ResultShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultShape::Decision => "decision",
            ResultShape::Workflow => "workflow",
        }
    }
}

impl std::fmt::Display for ResultShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A fully populated result, ready for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "result", rename_all = "snake_case")]
pub enum CanonicalResult {
    Decision(DecisionResult),
    Workflow(WorkflowResult),
}

impl CanonicalResult {
    /// One-line summary used for context windows and terminal output
    pub fn headline(&self) -> &str {
        match self {
            CanonicalResult::Decision(d) => &d.quick_insight.summary,
            CanonicalResult::Workflow(w) => &w.synthesis.executive_summary,
        }
    }
}

/// Classified intent of the user's question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    QuickYesNo,
    Comparison,
    RiskCheck,
    #[default]
    Curiosity,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::QuickYesNo => "quick_yes_no",
            Intent::Comparison => "comparison",
            Intent::RiskCheck => "risk_check",
            Intent::Curiosity => "curiosity",
        }
    }
}

impl std::str::FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quick_yes_no" => Ok(Intent::QuickYesNo),
            "comparison" => Ok(Intent::Comparison),
            "risk_check" => Ok(Intent::RiskCheck),
            "curiosity" => Ok(Intent::Curiosity),
            _ => Err(format!("unknown intent: {}", s)),
        }
    }
}

/// Headline insight shown first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickInsight {
    pub summary: String,
    pub uncertainty_reason: Option<String>,
}

/// Consumer-facing explanation body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerExplanation {
    /// At most a few bullet points
    pub why_this_matters: Vec<String>,
    pub when_it_makes_sense: String,
    pub what_to_know: String,
}

/// Plain-language explanation of one ingredient term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngredientTranslation {
    pub term: String,
    pub simple_explanation: String,
    pub category: String,
}

/// Result of the text decision engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResult {
    pub quick_insight: QuickInsight,
    pub explanation: ConsumerExplanation,
    pub intent_classified: Intent,
    /// Signals that influenced the decision
    pub key_signals: Vec<String>,
    pub ingredient_translations: Vec<IngredientTranslation>,
    pub uncertainty_flags: Vec<String>,
    /// Technical breakdown, passed through untouched when the server sends one
    pub structured_analysis: Option<serde_json::Value>,
}

/// Confidence attached to a workflow synthesis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    #[default]
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

impl std::str::FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Confidence::High),
            "medium" => Ok(Confidence::Medium),
            "low" => Ok(Confidence::Low),
            _ => Err(format!("unknown confidence level: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TradeOffs {
    pub pros: Vec<String>,
    pub cons: Vec<String>,
}

/// First-pass analysis produced by the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialAnalysis {
    pub insight: String,
    pub detailed_reasoning: String,
    pub trade_offs: TradeOffs,
    pub key_takeaways: Vec<String>,
    pub uncertainty_note: Option<String>,
    /// Label text recognized from an uploaded image
    pub extracted_text: Option<String>,
}

/// One step the agent executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step name (e.g. `decision_engine`)
    pub action: String,
    pub description: String,
    pub reasoning: String,
    /// Step output, kept opaque
    pub result: serde_json::Value,
}

/// Closing summary of a workflow run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Synthesis {
    pub executive_summary: String,
    pub key_takeaways: Vec<String>,
    pub confidence_level: Confidence,
    pub next_steps: Vec<String>,
}

/// Result of the multi-step agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub initial_analysis: InitialAnalysis,
    pub workflow_steps: Vec<WorkflowStep>,
    pub synthesis: Synthesis,
    pub total_steps: usize,
}

// ============================================
// Transcript
// ============================================

/// Who authored a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    User,
    Assistant,
}

/// Kind of content a turn carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    Text,
    Image,
    StructuredResult,
    Error,
}

impl TurnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnKind::Text => "text",
            TurnKind::Image => "image",
            TurnKind::StructuredResult => "structured-result",
            TurnKind::Error => "error",
        }
    }
}

/// Category of a failed request, as shown in the transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network error, non-success status, dropped channel
    Transport,
    /// Server answered with the wrong result family
    ShapeMismatch,
    /// Server explicitly reported an error
    ServerReported,
}

/// Payload of a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnPayload {
    Text {
        text: String,
    },
    Image {
        file_name: String,
        media_type: String,
        byte_len: usize,
    },
    Result {
        result: CanonicalResult,
    },
    Error {
        failure: FailureKind,
        message: String,
    },
}

/// One immutable transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: String,
    pub author: Author,
    pub payload: TurnPayload,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    fn new(author: Author, payload: TurnPayload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            author,
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Author::User, TurnPayload::Text { text: text.into() })
    }

    pub fn user_image(upload: &ImageUpload) -> Self {
        Self::new(
            Author::User,
            TurnPayload::Image {
                file_name: upload.file_name.clone(),
                media_type: upload.media_type.clone(),
                byte_len: upload.bytes.len(),
            },
        )
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::new(Author::Assistant, TurnPayload::Text { text: text.into() })
    }

    pub fn assistant_result(result: CanonicalResult) -> Self {
        Self::new(Author::Assistant, TurnPayload::Result { result })
    }

    pub fn assistant_error(failure: FailureKind, message: impl Into<String>) -> Self {
        Self::new(
            Author::Assistant,
            TurnPayload::Error {
                failure,
                message: message.into(),
            },
        )
    }

    /// Kind of this turn, derived from its payload
    pub fn kind(&self) -> TurnKind {
        match &self.payload {
            TurnPayload::Text { .. } => TurnKind::Text,
            TurnPayload::Image { .. } => TurnKind::Image,
            TurnPayload::Result { .. } => TurnKind::StructuredResult,
            TurnPayload::Error { .. } => TurnKind::Error,
        }
    }

    /// Whether this turn closes out a request (result or error)
    pub fn is_final(&self) -> bool {
        matches!(self.kind(), TurnKind::StructuredResult | TurnKind::Error)
    }

    pub fn result(&self) -> Option<&CanonicalResult> {
        match &self.payload {
            TurnPayload::Result { result } => Some(result),
            _ => None,
        }
    }
}
