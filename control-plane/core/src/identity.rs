//! The identity provider that vouches for bearer tokens.

use std::time::Duration;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The provider answered with a non-success status.
    #[error("identity provider rejected the token with status {0}")]
    Rejected(u16),

    #[error("failed to decode identity provider response: {0}")]
    Decode(#[source] BoxError),

    #[error("failed to reach identity provider: {0}")]
    Transport(#[source] BoxError),
}

/// A confirmed identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub username: String,

    /// How long the provider considers the token valid, if it says.
    pub expires_in: Option<Duration>,
}

#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Resolves the user that owns `token`.
    async fn identify(&self, token: &str) -> Result<Identity, IdentityError>;
}
