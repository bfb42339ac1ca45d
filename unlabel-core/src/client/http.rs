//! HTTP client for the analysis service
//!
//! Synchronous exchanges use plain reqwest requests with a per-request
//! timeout. The push channel is a server-sent event stream opened through
//! `reqwest-eventsource` with reconnection disabled: a dropped channel is
//! reported to the session, never silently retried.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest_eventsource::{retry, Event as SseEvent, EventSource};
use serde::Deserialize;
use serde_json::Value;

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::types::ImageUpload;

use super::{AnalysisBackend, FrameStream};

/// Response from GET /health
#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// HTTP client for the analysis service
pub struct ServiceClient {
    config: ServiceConfig,
    http_client: reqwest::Client,
    base_url: String,
}

impl ServiceClient {
    /// Create a new service client from configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: ServiceConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config.base_url.trim().trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &config.api_key {
            let auth_value = format!("Bearer {}", api_key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
            );
        }

        // No client-wide timeout: it would also cut off long-lived streams.
        let http_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check whether the service is reachable and healthy
    pub async fn health_check(&self) -> Result<HealthStatus> {
        let response = self
            .http_client
            .get(self.url("/health"))
            .timeout(self.config.request_timeout())
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

        let body = read_json(response).await?;
        serde_json::from_value(body)
            .map_err(|e| Error::Transport(format!("failed to parse health response: {}", e)))
    }
}

#[async_trait]
impl AnalysisBackend for ServiceClient {
    async fn decide(&self, text: &str, context: Option<&str>) -> Result<Value> {
        let body = DecisionRequest {
            text,
            conversation_context: context,
        };

        tracing::debug!(url = %self.url("/analyze/decision"), "Requesting decision");

        let response = self
            .http_client
            .post(self.url("/analyze/decision"))
            .timeout(self.config.request_timeout())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

        read_json(response).await
    }

    async fn analyze_image(&self, image: &ImageUpload, context: Option<&str>) -> Result<Value> {
        let mut url = self.url("/analyze/autonomous/image");
        if let Some(context) = context {
            url = format!("{}?user_query={}", url, urlencoding::encode(context));
        }

        let part = reqwest::multipart::Part::bytes(image.bytes.clone())
            .file_name(image.file_name.clone())
            .mime_str(&image.media_type)
            .map_err(|e| Error::Transport(format!("invalid media type: {}", e)))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        tracing::debug!(
            file_name = %image.file_name,
            bytes = image.bytes.len(),
            "Uploading image for analysis"
        );

        let response = self
            .http_client
            .post(&url)
            .timeout(self.config.request_timeout())
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

        read_json(response).await
    }

    async fn open_stream(&self, text: &str, context: Option<&str>) -> Result<FrameStream> {
        let mut params = vec![("text", text)];
        if let Some(context) = context {
            params.push(("conversation_context", context));
        }

        let request = self
            .http_client
            .get(self.url("/analyze/autonomous/stream"))
            .query(&params)
            .header(ACCEPT, "text/event-stream");

        let mut source = EventSource::new(request)
            .map_err(|e| Error::Transport(format!("failed to open event stream: {}", e)))?;
        source.set_retry_policy(Box::new(retry::Never));

        Ok(frames(source))
    }
}

/// Adapt an event source into raw frames.
///
/// The source is closed on the first error or when the server ends the
/// stream; nothing is yielded afterwards.
fn frames(source: EventSource) -> FrameStream {
    futures::stream::unfold(Some(source), |state| async move {
        let mut source = match state {
            Some(source) => source,
            None => return None,
        };
        loop {
            match source.next().await {
                Some(Ok(SseEvent::Open)) => {
                    tracing::debug!("Event stream opened");
                }
                Some(Ok(SseEvent::Message(message))) => {
                    return Some((Ok(message.data), Some(source)));
                }
                Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => {
                    source.close();
                    return None;
                }
                Some(Err(e)) => {
                    source.close();
                    let err = Error::Transport(format!("event stream failed: {}", e));
                    return Some((Err(err), None));
                }
            }
        }
    })
    .boxed()
}

/// Decode a JSON body, turning non-success statuses into transport errors
async fn read_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();

    if status.is_success() {
        response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("failed to parse response: {}", e)))
    } else {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        Err(Error::Transport(format!(
            "API error ({}): {}",
            status,
            error_detail(&error_text)
        )))
    }
}

/// Pull the `detail` field out of an error body when there is one
fn error_detail(body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("detail").cloned());

    match detail {
        Some(Value::String(detail)) => detail,
        Some(other) => other.to_string(),
        None => body.to_string(),
    }
}

/// Request body for POST /analyze/decision
#[derive(serde::Serialize)]
struct DecisionRequest<'a> {
    text: &'a str,
    conversation_context: Option<&'a str>,
}
