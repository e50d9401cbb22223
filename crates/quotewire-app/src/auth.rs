//! Authorization gate for opening the feed.
//!
//! The feed session never sees credentials. The application asks the gate
//! once before `connect()` and refuses to start when it says no.

use crate::config::AppConfig;
use tracing::debug;

#[cfg_attr(test, mockall::automock)]
pub trait SessionAuthorizer: Send + Sync {
    fn is_authorized(&self) -> bool;
}

/// No credentials required.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAccess;

impl SessionAuthorizer for OpenAccess {
    fn is_authorized(&self) -> bool {
        true
    }
}

/// Authorized when the named environment variable holds a non-empty token.
#[derive(Debug, Clone)]
pub struct EnvTokenAuthorizer {
    var: String,
}

impl EnvTokenAuthorizer {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    pub fn var(&self) -> &str {
        &self.var
    }
}

impl SessionAuthorizer for EnvTokenAuthorizer {
    fn is_authorized(&self) -> bool {
        let present = std::env::var(&self.var)
            .map(|token| !token.trim().is_empty())
            .unwrap_or(false);
        debug!(var = %self.var, present, "Checked session token");
        present
    }
}

/// Gate selected by `auth_token_env`.
pub fn authorizer_for(config: &AppConfig) -> Box<dyn SessionAuthorizer> {
    match &config.auth_token_env {
        Some(var) => Box::new(EnvTokenAuthorizer::new(var.clone())),
        None => Box::new(OpenAccess),
    }
}
