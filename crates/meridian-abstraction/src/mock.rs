//! Deterministic executor for tests, demos and simulations.

use crate::{ExecutionOutput, ExecutionParameters, ModelExecutor, ProviderError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Scripted behavior for one model id.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Fixed output; `None` echoes the prompt.
    pub output: Option<String>,
    /// Reported output token count; `None` derives it from the output length.
    pub output_tokens: Option<u32>,
    /// Reported latency.
    pub latency: Duration,
    /// When set, every call fails with this error.
    pub failure: Option<ProviderError>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self { output: None, output_tokens: None, latency: Duration::from_millis(250), failure: None }
    }
}

impl MockBehavior {
    /// A behavior that always answers with `output`.
    #[must_use]
    pub fn responding(output: impl Into<String>) -> Self {
        Self { output: Some(output.into()), ..Self::default() }
    }

    /// A behavior that always fails with `error`.
    #[must_use]
    pub fn failing(error: ProviderError) -> Self {
        Self { failure: Some(error), ..Self::default() }
    }

    /// Sets the reported latency.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

/// Executor that never leaves the process.
///
/// Token counts are approximated as one token per four bytes, which is close
/// enough for cost bookkeeping in tests.
#[derive(Debug, Default)]
pub struct MockExecutor {
    behaviors: RwLock<HashMap<String, MockBehavior>>,
    fallback: MockBehavior,
}

impl MockExecutor {
    /// Creates a mock that echoes every prompt.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the behavior for `model_id`, replacing any previous script.
    #[must_use]
    pub fn with_behavior(mut self, model_id: impl Into<String>, behavior: MockBehavior) -> Self {
        // Sole owner, so no other thread can observe a recovered map.
        self.behaviors.get_mut().unwrap_or_else(PoisonError::into_inner).insert(model_id.into(), behavior);
        self
    }

    /// Scripts the behavior for `model_id` on a shared executor.
    ///
    /// # Errors
    /// `Unavailable` if a thread panicked while holding the script table.
    pub fn set_behavior(&self, model_id: impl Into<String>, behavior: MockBehavior) -> Result<(), ProviderError> {
        self.behaviors.write().map_err(poisoned)?.insert(model_id.into(), behavior);
        Ok(())
    }

    fn behavior_for(&self, model_id: &str) -> Result<MockBehavior, ProviderError> {
        let behaviors = self.behaviors.read().map_err(poisoned)?;
        Ok(behaviors.get(model_id).cloned().unwrap_or_else(|| self.fallback.clone()))
    }
}

fn poisoned(e: impl std::fmt::Display) -> ProviderError {
    ProviderError::Unavailable(format!("mock executor lock poisoned: {e}"))
}

fn approx_tokens(text: &str) -> u32 {
    u32::try_from(text.len().div_ceil(4)).unwrap_or(u32::MAX)
}

#[async_trait]
impl ModelExecutor for MockExecutor {
    async fn execute(
        &self,
        model_id: &str,
        prompt: &str,
        parameters: &ExecutionParameters,
    ) -> Result<ExecutionOutput, ProviderError> {
        let behavior = self.behavior_for(model_id)?;

        if let Some(error) = behavior.failure {
            return Err(error);
        }

        if let Some(timeout) = parameters.timeout {
            if behavior.latency > timeout {
                return Err(ProviderError::Timeout {
                    model_id: model_id.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        }

        let output = behavior.output.unwrap_or_else(|| format!("[{model_id}] {prompt}"));
        let output_tokens = behavior.output_tokens.unwrap_or_else(|| approx_tokens(&output));

        Ok(ExecutionOutput {
            input_tokens: approx_tokens(prompt),
            output_tokens,
            output,
            latency: behavior.latency,
        })
    }
}
