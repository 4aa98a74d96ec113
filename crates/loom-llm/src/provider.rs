//! Adapter contract (spec §4.4): `complete` is a convenience built on
//! top of the mandatory `complete_stream`, accumulating deltas into a
//! single response the way a non-streaming caller expects.

use crate::types::{AccumulatedToolCall, LlmRequest, LlmResponse, StreamDelta};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("context overflow: {0}")]
    ContextOverflow(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("no profile configured for role '{0}'")]
    NoProfile(String),

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("escalation exhausted after {attempts} attempts")]
    EscalationExhausted { attempts: u32 },
}

impl LlmError {
    /// Whether the retry circuit should count this failure (spec §4.4).
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RequestFailed(_) | LlmError::RateLimited { .. } | LlmError::StreamError(_)
        )
    }
}

pub type LlmStream = Pin<Box<dyn Stream<Item = LlmResult<StreamDelta>> + Send>>;

#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn models(&self) -> &[&str];

    fn supports_model(&self, model: &str) -> bool {
        self.models()
            .iter()
            .any(|m| *m == model || model.starts_with(m))
    }

    /// Stream a completion response. If `cancel` fires, the underlying
    /// connection is dropped and the stream yields `LlmError::Cancelled`.
    async fn complete_stream(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream>;

    /// Accumulate a full stream into a single response.
    async fn complete(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmResponse> {
        let mut stream = self.complete_stream(request, cancel).await?;
        let mut text = String::new();
        let mut thinking = String::new();
        let mut tool_calls: HashMap<String, AccumulatedToolCall> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut stop_reason = None;
        let mut usage = None;

        while let Some(item) = stream.next().await {
            match item? {
                StreamDelta::Text(t) => text.push_str(&t),
                StreamDelta::Thinking(t) => thinking.push_str(&t),
                StreamDelta::ToolCallStart { id, name } => {
                    order.push(id.clone());
                    tool_calls.insert(id.clone(), AccumulatedToolCall { id, name, arguments: String::new() });
                }
                StreamDelta::ToolCallDelta { id, arguments } => {
                    if let Some(call) = tool_calls.get_mut(&id) {
                        call.arguments.push_str(&arguments);
                    }
                }
                StreamDelta::ToolCallEnd { .. } => {}
                StreamDelta::Done { stop_reason: sr, usage: u } => {
                    stop_reason = sr;
                    usage = u;
                }
                StreamDelta::Error(e) => return Err(LlmError::StreamError(e)),
            }
        }

        Ok(LlmResponse {
            text,
            thinking,
            tool_calls: order.into_iter().filter_map(|id| tool_calls.remove(&id)).collect(),
            stop_reason,
            usage,
        })
    }
}
