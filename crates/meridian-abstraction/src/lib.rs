//! Model execution abstraction for Meridian.
//!
//! The routing core never performs inference itself. It hands a model id to
//! the caller, and the caller invokes whatever backend sits behind a
//! [`ModelExecutor`]. This crate defines that seam and the provider error
//! taxonomy that flows back through it.

mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use mock::{MockBehavior, MockExecutor};

/// Represents an error raised by a model provider while executing a request.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderError {
    /// The request did not complete within the caller-supplied timeout.
    #[error("Model '{model_id}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The model that timed out.
        model_id: String,
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// Provider quota exceeded or rate limit hit.
    #[error("Provider '{provider}' rate limited{}", message.as_ref().map(|m| format!(": {}", m)).unwrap_or_default())]
    RateLimited {
        /// The provider name (e.g., "openai", "anthropic").
        provider: String,
        /// Optional error message from the provider.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// An error occurred while sending the request (network, auth, etc.).
    #[error("Request Error: {0}")]
    Request(String),

    /// The model answered with an error (invalid input, content filter, etc.).
    #[error("Model Response Error: {0}")]
    Response(String),

    /// The model is not served by any configured provider.
    #[error("Model unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Whether advancing to another candidate (or retrying later) can help.
    ///
    /// Malformed responses are deterministic for a given prompt, so only
    /// transport-level failures count as retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::RateLimited { .. } | Self::Request(_) | Self::Unavailable(_)
        )
    }
}

/// Parameters for controlling generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionParameters {
    /// Sampling temperature, between 0 and 2.
    pub temperature: Option<f32>,

    /// The maximum number of tokens to generate.
    pub max_tokens: Option<u32>,

    /// Timeout the executor must honor. `None` leaves it to the backend.
    pub timeout: Option<Duration>,
}

impl Default for ExecutionParameters {
    fn default() -> Self {
        Self { temperature: Some(0.7), max_tokens: Some(1024), timeout: Some(Duration::from_secs(30)) }
    }
}

/// The outcome of a successful model invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    /// The generated content.
    pub output: String,

    /// Number of tokens in the prompt.
    pub input_tokens: u32,

    /// Number of tokens in the completion.
    pub output_tokens: u32,

    /// Wall-clock latency observed for the call.
    pub latency: Duration,
}

impl ExecutionOutput {
    /// Latency in fractional milliseconds, the unit used for telemetry.
    #[must_use]
    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }
}

/// The "call a model" capability the routing core relies on.
///
/// Implementations must be `Send + Sync` so a single executor can serve many
/// request-handling workers concurrently.
#[async_trait]
pub trait ModelExecutor: Send + Sync {
    /// Executes `prompt` against `model_id`.
    ///
    /// # Errors
    /// Returns a `ProviderError` if the backend fails or times out.
    async fn execute(
        &self,
        model_id: &str,
        prompt: &str,
        parameters: &ExecutionParameters,
    ) -> Result<ExecutionOutput, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::Timeout { model_id: "m".to_string(), timeout_ms: 10 }.is_retryable());
        assert!(
            ProviderError::RateLimited { provider: "openai".to_string(), message: None }.is_retryable()
        );
        assert!(ProviderError::Request("connection reset".to_string()).is_retryable());
        assert!(!ProviderError::Response("bad output".to_string()).is_retryable());
    }

    #[test]
    fn test_rate_limited_display() {
        let err = ProviderError::RateLimited {
            provider: "openai".to_string(),
            message: Some("slow down".to_string()),
        };
        assert_eq!(err.to_string(), "Provider 'openai' rate limited: slow down");

        let bare = ProviderError::RateLimited { provider: "openai".to_string(), message: None };
        assert_eq!(bare.to_string(), "Provider 'openai' rate limited");
    }

    #[test]
    fn test_provider_error_serialization_skips_empty_message() {
        let err = ProviderError::RateLimited { provider: "google".to_string(), message: None };
        let json = serde_json::to_string(&err).unwrap();
        assert!(!json.contains("message"));
    }

    #[test]
    fn test_latency_ms() {
        let output = ExecutionOutput {
            output: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            latency: Duration::from_micros(1500),
        };
        assert!((output.latency_ms() - 1.5).abs() < 1e-9);
    }
}
