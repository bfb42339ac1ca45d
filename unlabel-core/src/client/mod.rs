//! Analysis service client
//!
//! The controller talks to the service only through [`AnalysisBackend`], so
//! tests and alternative transports can stand in for the HTTP client.
//!
//! ## Endpoints
//!
//! | Method | Path | Returns |
//! |--------|------|---------|
//! | POST | `/analyze/decision` | decision-shaped JSON |
//! | POST | `/analyze/autonomous/image` | workflow-shaped JSON |
//! | GET  | `/analyze/autonomous/stream` | `text/event-stream` of [`StreamEvent`] frames |
//! | GET  | `/health` | service status |

mod events;
mod http;

pub use events::StreamEvent;
pub use http::{HealthStatus, ServiceClient};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::Result;
use crate::types::ImageUpload;

/// Raw text frames of a push channel.
///
/// Each item is one frame payload, parsed independently by the session. An
/// `Err` item means the channel itself failed; the stream ending without a
/// terminal event means the connection dropped. Dropping the stream closes
/// the channel.
pub type FrameStream = BoxStream<'static, Result<String>>;

/// Result source consumed by the controller
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Single request/response exchange for a text question
    async fn decide(&self, text: &str, context: Option<&str>) -> Result<Value>;

    /// Single request/response exchange for an uploaded label image
    async fn analyze_image(&self, image: &ImageUpload, context: Option<&str>) -> Result<Value>;

    /// Open a push channel for a text question
    async fn open_stream(&self, text: &str, context: Option<&str>) -> Result<FrameStream>;
}
