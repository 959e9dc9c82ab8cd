//! Authentication collaborator seam.
//!
//! Token validation is opaque to the distribution layer: any scheme can be
//! substituted behind [`Authenticator`]. The socket manager only cares
//! about the verdict and the granted role set.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

/// Verdict of a token validation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenValidation {
    /// Whether the token is valid.
    pub valid: bool,
    /// Roles granted by the token.
    pub roles: HashSet<String>,
}

impl TokenValidation {
    /// A rejected token.
    #[must_use]
    pub fn denied() -> Self {
        Self::default()
    }

    /// An accepted token with the given roles.
    #[must_use]
    pub fn allowed(roles: HashSet<String>) -> Self {
        Self { valid: true, roles }
    }
}

/// Validates client tokens.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Validate a token and return the verdict.
    async fn validate(&self, token: &str) -> TokenValidation;
}

/// Fixed token table, for tests and development deployments.
#[derive(Debug, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, HashSet<String>>,
}

impl StaticTokenAuthenticator {
    /// An authenticator that rejects everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` with the given roles.
    #[must_use]
    pub fn with_token(mut self, token: &str, roles: &[&str]) -> Self {
        let _ = self.tokens.insert(
            token.to_owned(),
            roles.iter().map(|r| (*r).to_owned()).collect(),
        );
        self
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn validate(&self, token: &str) -> TokenValidation {
        match self.tokens.get(token) {
            Some(roles) => TokenValidation::allowed(roles.clone()),
            None => TokenValidation::denied(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_token_is_denied() {
        let auth = StaticTokenAuthenticator::new();
        let verdict = auth.validate("anything").await;
        assert!(!verdict.valid);
        assert!(verdict.roles.is_empty());
    }

    #[tokio::test]
    async fn known_token_carries_roles() {
        let auth = StaticTokenAuthenticator::new().with_token("secret", &["admin", "operator"]);
        let verdict = auth.validate("secret").await;
        assert!(verdict.valid);
        assert!(verdict.roles.contains("admin"));
        assert!(verdict.roles.contains("operator"));
    }

    #[tokio::test]
    async fn tokens_are_exact_match() {
        let auth = StaticTokenAuthenticator::new().with_token("secret", &[]);
        assert!(!auth.validate("secret ").await.valid);
        assert!(!auth.validate("SECRET").await.valid);
        assert!(auth.validate("secret").await.valid);
    }
}
