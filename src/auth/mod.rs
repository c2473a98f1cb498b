//! Authentication for the Snyk API.

use crate::errors::{SnykError, SnykErrorKind, SnykResult};
use secrecy::{ExposeSecret, SecretString};

/// Environment variable holding the Snyk API token.
pub const TOKEN_ENV_VAR: &str = "SNYK_TOKEN";

/// Authentication method for the Snyk API.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// Personal or service-account API token, sent as `token <t>`.
    Token(SecretString),
    /// OAuth access token, sent as `Bearer <t>`.
    OAuth(SecretString),
}

impl AuthMethod {
    /// Creates an API token authentication method.
    pub fn token(token: impl Into<String>) -> Self {
        Self::Token(SecretString::new(token.into()))
    }

    /// Creates an OAuth authentication method.
    pub fn oauth(token: impl Into<String>) -> Self {
        Self::OAuth(SecretString::new(token.into()))
    }

    /// Reads an API token from `SNYK_TOKEN`.
    pub fn from_env() -> SnykResult<Self> {
        match std::env::var(TOKEN_ENV_VAR) {
            Ok(token) if !token.trim().is_empty() => Ok(Self::token(token.trim())),
            _ => Err(SnykError::new(
                SnykErrorKind::MissingAuth,
                format!("Environment variable {} not set", TOKEN_ENV_VAR),
            )),
        }
    }

    /// Short label safe to log.
    pub fn token_prefix(&self) -> &'static str {
        match self {
            Self::Token(_) => "token ***",
            Self::OAuth(_) => "Bearer ***",
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Token(t) | Self::OAuth(t) => t.expose_secret().trim().is_empty(),
        }
    }
}

/// Produces the `Authorization` header for every request.
#[derive(Debug, Clone)]
pub struct AuthManager {
    method: AuthMethod,
}

impl AuthManager {
    /// Creates a new authentication manager.
    pub fn new(method: AuthMethod) -> SnykResult<Self> {
        if method.is_empty() {
            return Err(SnykError::new(
                SnykErrorKind::MissingAuth,
                "Authentication token is empty",
            ));
        }
        Ok(Self { method })
    }

    /// Gets the authentication method.
    pub fn method(&self) -> &AuthMethod {
        &self.method
    }

    /// Generates the Authorization header value.
    pub fn get_auth_header(&self) -> String {
        match &self.method {
            AuthMethod::Token(token) => format!("token {}", token.expose_secret()),
            AuthMethod::OAuth(token) => format!("Bearer {}", token.expose_secret()),
        }
    }
}
