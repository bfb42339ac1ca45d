//! # unlabel-core
//!
//! Core library for unlabel - a conversational co-pilot for ingredient and
//! nutrition label analysis.
//!
//! This library provides:
//! - Domain types for transcript turns, requests, and canonical results
//! - The result normalizer that repairs incomplete service payloads
//! - The streaming session state machine and the controller driving it
//! - An HTTP/SSE client for the analysis service
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! A user action flows through three stages:
//! - **Context:** the last few turns are rendered into a context string
//! - **Exchange:** a single request/response, or a stream of progressive events
//! - **Finalization:** the payload is normalized and exactly one turn is appended
//!
//! ## Example
//!
//! ```rust,no_run
//! use unlabel_core::client::ServiceClient;
//! use unlabel_core::transcript::{NoProgress, Transcript};
//! use unlabel_core::{Config, Controller};
//!
//! # async fn run() -> unlabel_core::Result<()> {
//! let config = Config::load()?;
//! let client = ServiceClient::new(config.service.clone())?;
//! let controller = Controller::new(client, Transcript::with_greeting(), NoProgress);
//!
//! controller.submit_text("oats, honey, sunflower oil").await;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use controller::{Controller, SessionSummary};
pub use error::{Error, Result};
pub use types::*;

// Public modules
pub mod client;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod logging;
pub mod normalize;
pub mod session;
pub mod transcript;
pub mod types;
