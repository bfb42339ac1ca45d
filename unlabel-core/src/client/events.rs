//! Wire format of streamed analysis events
//!
//! Every frame is a JSON object with a `type` discriminator:
//!
//! ```text
//! {"type":"step_start","step":1,"total":4,"message":"Reading the label"}
//! {"type":"step_complete","name":"initial_analysis","result":{...}}
//! {"type":"complete","result":{...}}        // result may be omitted or null
//! {"type":"error","detail":"model quota exhausted"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// One event pushed by the streaming endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A workflow step began
    StepStart {
        step: u32,
        #[serde(default)]
        total: u32,
        #[serde(default)]
        message: String,
    },

    /// A workflow step finished with its output
    StepComplete {
        name: String,
        #[serde(default)]
        result: Value,
    },

    /// Terminal: the run finished. A present result supersedes anything accumulated.
    Complete {
        #[serde(default)]
        result: Option<Value>,
    },

    /// Terminal: the server gave up
    Error {
        #[serde(default = "default_error_detail", alias = "message")]
        detail: String,
    },
}

fn default_error_detail() -> String {
    "The analysis service reported an error.".to_string()
}

impl StreamEvent {
    /// Parse one frame payload
    pub fn parse(frame: &str) -> Result<Self> {
        serde_json::from_str(frame).map_err(|e| Error::MalformedEvent(e.to_string()))
    }

    /// Event name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::StepStart { .. } => "step_start",
            StreamEvent::StepComplete { .. } => "step_complete",
            StreamEvent::Complete { .. } => "complete",
            StreamEvent::Error { .. } => "error",
        }
    }
}
