//! Retry + escalation orchestration (spec §4.4): exponential backoff
//! on retryable failures with a per-profile attempt cap and a maximum
//! delay cap; a `Retry-After` beyond the cap fails immediately rather
//! than waiting it out. On retry-budget exhaustion, escalate upgrade-
//! only to the next profile in the chain; if none remains, the caller
//! sees [`LlmError::EscalationExhausted`], which the runtime loop maps
//! to `llm.route.blocked` / `failed_execute`.
//!
//! Grounded structurally on the teacher's single-attempt call in
//! `agenticlaw-agent/src/runtime.rs` (`run_turn_cancellable`), which
//! this generalizes with the backoff/escalation policy the original
//! never implemented.

use crate::profile::ProfileResolver;
use crate::provider::{LlmError, LlmProvider, LlmResult};
use crate::registry::LlmProviderRegistry;
use crate::types::{LlmRequest, LlmResponse};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub async fn complete_with_profile(
    providers: &LlmProviderRegistry,
    resolver: &ProfileResolver,
    role: &str,
    request: LlmRequest,
    cancel: Option<CancellationToken>,
) -> LlmResult<LlmResponse> {
    let chain = resolver.escalation_chain(role);
    if chain.is_empty() {
        return Err(LlmError::NoProfile(role.to_string()));
    }

    let mut last_err = None;
    for (step, profile_role) in chain.iter().enumerate() {
        let profile = resolver
            .resolve(profile_role)
            .ok_or_else(|| LlmError::NoProfile(profile_role.clone()))?;
        let provider = providers
            .get(&profile.provider)
            .ok_or_else(|| LlmError::UnknownProvider(profile.provider.clone()))?;

        let mut req = request.clone();
        req.model = profile.model.clone();

        match attempt_with_backoff(provider.as_ref(), &req, profile.retry_cap, profile.max_backoff, cancel.clone()).await {
            Ok(response) => return Ok(response),
            Err(e) => {
                last_err = Some(e);
                if step + 1 < chain.len() {
                    continue;
                }
            }
        }
    }

    match last_err {
        Some(_) if chain.len() > 1 => Err(LlmError::EscalationExhausted { attempts: chain.len() as u32 }),
        Some(e) => Err(e),
        None => Err(LlmError::RequestFailed("no attempts made".into())),
    }
}

async fn attempt_with_backoff(
    provider: &dyn LlmProvider,
    request: &LlmRequest,
    retry_cap: u32,
    max_backoff: Duration,
    cancel: Option<CancellationToken>,
) -> LlmResult<LlmResponse> {
    let mut attempt = 0u32;
    loop {
        match provider.complete(request.clone(), cancel.clone()).await {
            Ok(response) => return Ok(response),
            Err(LlmError::RateLimited { retry_after_ms }) if Duration::from_millis(retry_after_ms) > max_backoff => {
                return Err(LlmError::RateLimited { retry_after_ms });
            }
            Err(e) if e.retryable() && attempt < retry_cap => {
                let backoff = exponential_backoff(attempt, max_backoff);
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn exponential_backoff(attempt: u32, cap: Duration) -> Duration {
    let base_ms = 200u64.saturating_mul(1u64 << attempt.min(16));
    Duration::from_millis(base_ms).min(cap)
}
