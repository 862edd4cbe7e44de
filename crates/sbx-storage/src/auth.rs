//! Bearer-token issuer interface (consumed, never implemented by a real
//! service here). The pipeline attaches the token to every backend call
//! and does not look inside it.

use async_trait::async_trait;

use sbx_core::{SbxError, SbxResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub username: String,
    pub email: Option<String>,
}

#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Exchange credentials for an opaque session token.
    async fn login(&self, user: &str, pass: &str) -> SbxResult<String>;

    /// Invalidate a token. Unknown tokens are not an error.
    async fn logout(&self, token: &str) -> SbxResult<()>;

    /// Resolve a token back to its user, or fail with `AuthFailure`.
    async fn authorise(&self, token: &str) -> SbxResult<UserInfo>;
}

/// Fixed-token issuer for local runs and tests: whatever credentials are
/// presented, the configured token comes back.
pub struct StaticTokenIssuer {
    token: String,
    username: String,
}

impl StaticTokenIssuer {
    pub fn new(token: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            username: username.into(),
        }
    }
}

#[async_trait]
impl TokenIssuer for StaticTokenIssuer {
    async fn login(&self, user: &str, pass: &str) -> SbxResult<String> {
        if user.is_empty() || pass.is_empty() {
            return Err(SbxError::AuthFailure(
                "username and password are required".into(),
            ));
        }
        Ok(self.token.clone())
    }

    async fn logout(&self, _token: &str) -> SbxResult<()> {
        Ok(())
    }

    async fn authorise(&self, token: &str) -> SbxResult<UserInfo> {
        if token != self.token {
            return Err(SbxError::AuthFailure("token rejected".into()));
        }
        Ok(UserInfo {
            username: self.username.clone(),
            email: None,
        })
    }
}
