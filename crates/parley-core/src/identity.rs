//! Identity verification seam.
//!
//! Both the request/response path and the channel handshake resolve a bearer
//! credential to a [`UserIdentity`] through [`IdentityVerifier`].

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::model::UserId;

/// An authenticated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: UserId,
    pub name: String,
    pub email: String,
}

/// Resolves credentials to identities.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify a bearer credential.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Unauthorized` for a missing, malformed, expired or
    /// unknown credential.
    async fn verify(&self, credential: &str) -> CoreResult<UserIdentity>;
}

/// Extract the token of an `Authorization: Bearer <token>` header value.
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("bearer  abc "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("abc"), None);
    }
}
