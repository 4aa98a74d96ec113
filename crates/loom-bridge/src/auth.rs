//! Shared-token auth and origin checking (spec §4.9).
//!
//! Grounded on the teacher's `auth.rs` (`constant_time_eq`,
//! `ResolvedAuth`), extended with an allowed-origin check — the
//! teacher's gateway accepted connections from any origin.

use loom_core::config::BridgeAuthConfig;
use loom_core::error::{ErrorCode, LoomError};

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[derive(Clone, Debug)]
pub struct ResolvedAuth {
    token: Option<String>,
    allowed_origins: Vec<String>,
}

impl ResolvedAuth {
    pub fn from_config(config: &BridgeAuthConfig) -> Self {
        Self {
            token: config.token.clone(),
            allowed_origins: config.allowed_origins.clone(),
        }
    }

    pub fn verify_token(&self, provided: Option<&str>) -> Result<(), LoomError> {
        match &self.token {
            None => Ok(()),
            Some(expected) => {
                let provided = provided.ok_or_else(|| LoomError::auth_failed("token required"))?;
                if constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
                    Ok(())
                } else {
                    Err(LoomError::auth_failed("invalid token"))
                }
            }
        }
    }

    pub fn verify_origin(&self, origin: Option<&str>) -> Result<(), LoomError> {
        if self.allowed_origins.is_empty() {
            return Ok(());
        }
        match origin {
            Some(o) if self.allowed_origins.iter().any(|a| a == o) => Ok(()),
            _ => Err(LoomError::coded(ErrorCode::EArgs, "origin not allowed")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token: Option<&str>, origins: &[&str]) -> BridgeAuthConfig {
        BridgeAuthConfig {
            token: token.map(|s| s.to_string()),
            allowed_origins: origins.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn no_token_configured_allows_any_request() {
        let auth = ResolvedAuth::from_config(&config(None, &[]));
        assert!(auth.verify_token(None).is_ok());
    }

    #[test]
    fn token_mismatch_is_rejected() {
        let auth = ResolvedAuth::from_config(&config(Some("secret"), &[]));
        assert!(auth.verify_token(Some("wrong")).is_err());
        assert!(auth.verify_token(Some("secret")).is_ok());
    }

    #[test]
    fn origin_allowlist_rejects_unknown_origins() {
        let auth = ResolvedAuth::from_config(&config(None, &["https://app.example.com"]));
        assert!(auth.verify_origin(Some("https://app.example.com")).is_ok());
        assert!(auth.verify_origin(Some("https://evil.example.com")).is_err());
        assert!(auth.verify_origin(None).is_err());
    }

    #[test]
    fn empty_allowlist_accepts_any_origin() {
        let auth = ResolvedAuth::from_config(&config(None, &[]));
        assert!(auth.verify_origin(Some("https://anything")).is_ok());
    }
}
