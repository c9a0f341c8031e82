//! Weave Generation Gateway
//!
//! Boundary to the text-generation backend.
//!
//! - [`TextGenerator`]: one async call, `(instructions, content, images)` in,
//!   `(text, usage)` out
//! - [`RetryingGateway`]: per-call timeout plus exponential backoff with jitter
//! - [`AnthropicBackend`]: Messages API client over `reqwest`
//!
//! # Example
//!
//! ```rust,no_run
//! use weave_gateway::{AnthropicBackend, BackendConfig, RetryPolicy, RetryingGateway};
//!
//! # fn main() -> Result<(), weave_gateway::GatewayError> {
//! let backend = AnthropicBackend::from_env(BackendConfig::default())?;
//! let gateway = RetryingGateway::new(backend, RetryPolicy::default());
//! # let _ = gateway;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod anthropic;
mod error;
mod generator;
mod retry;
mod types;

pub use anthropic::{AnthropicBackend, BackendConfig, API_KEY_ENV};
pub use error::{FailureClass, GatewayError};
pub use generator::TextGenerator;
pub use retry::{RetryPolicy, RetryingGateway};
pub use types::{GenerationRequest, GenerationResponse, ImageAttachment, TokenUsage};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
