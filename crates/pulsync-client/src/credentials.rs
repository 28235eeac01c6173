//! Credential sources.
//!
//! Tokens are read on demand and never written anywhere by this crate.

use std::fmt;

/// Environment variable holding the access token.
pub const ACCESS_TOKEN_VAR: &str = "PULSYNC_ACCESS_TOKEN";
/// Environment variable holding the app-level token.
pub const APP_TOKEN_VAR: &str = "PULSYNC_APP_TOKEN";
/// Environment variable holding the user token.
pub const USER_TOKEN_VAR: &str = "PULSYNC_USER_TOKEN";

/// Supplies tokens to the clients.
pub trait CredentialSource: Send + Sync {
    /// Token for REST calls.
    fn access_token(&self) -> Option<String>;

    /// App-level token for the socket handshake.
    fn app_token(&self) -> Option<String>;

    /// User token, for calls that need to act as the user.
    fn user_token(&self) -> Option<String> {
        None
    }
}

/// Fixed tokens held in memory.
#[derive(Clone, Default)]
pub struct StaticCredentials {
    access_token: Option<String>,
    app_token: Option<String>,
    user_token: Option<String>,
}

impl StaticCredentials {
    /// Create an empty credential set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the access token.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Set the app-level token.
    #[must_use]
    pub fn with_app_token(mut self, token: impl Into<String>) -> Self {
        self.app_token = Some(token.into());
        self
    }

    /// Set the user token.
    #[must_use]
    pub fn with_user_token(mut self, token: impl Into<String>) -> Self {
        self.user_token = Some(token.into());
        self
    }
}

impl CredentialSource for StaticCredentials {
    fn access_token(&self) -> Option<String> {
        self.access_token.clone()
    }

    fn app_token(&self) -> Option<String> {
        self.app_token.clone()
    }

    fn user_token(&self) -> Option<String> {
        self.user_token.clone()
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_token", &redact(&self.access_token))
            .field("app_token", &redact(&self.app_token))
            .field("user_token", &redact(&self.user_token))
            .finish()
    }
}

/// Tokens read from `PULSYNC_*` environment variables on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn access_token(&self) -> Option<String> {
        env_token(ACCESS_TOKEN_VAR)
    }

    fn app_token(&self) -> Option<String> {
        env_token(APP_TOKEN_VAR)
    }

    fn user_token(&self) -> Option<String> {
        env_token(USER_TOKEN_VAR)
    }
}

fn env_token(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|t| !t.trim().is_empty())
}

fn redact(token: &Option<String>) -> &'static str {
    if token.is_some() {
        "<set>"
    } else {
        "<unset>"
    }
}
