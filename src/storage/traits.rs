//! Abstract storage interfaces for pluggable backends
//!
//! Components receive these stores as injected `Arc<dyn ...>` handles and never
//! reach for a global connection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::user::{CredentialRecord, Email, NewCredential};
use crate::error::Result;

/// Credential persistence interface
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up a credential by its normalised e-mail address
    async fn find_by_email(&self, email: &Email) -> Result<Option<CredentialRecord>>;

    async fn find_by_id(&self, id: i64) -> Result<Option<CredentialRecord>>;

    /// Insert a credential and return its generated id.
    ///
    /// Fails with `UniqueConstraintViolation` when the e-mail is already taken.
    async fn insert(&self, credential: NewCredential) -> Result<i64>;

    async fn update_password_hash(&self, id: i64, password_hash: String) -> Result<()>;

    /// Record a successful login
    async fn record_login(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

    async fn mark_email_verified(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Remove a credential. Removing an unknown id is not an error.
    async fn delete(&self, id: i64) -> Result<()>;
}

/// Refresh token persistence interface.
///
/// Tokens are identified by a digest; the raw token never reaches the store.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Store a token for a user, dropping any token the user already had
    async fn replace_for_user(
        &self,
        user_id: i64,
        token_hash: String,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Consume a token, returning its user id if it was still valid at `now`
    async fn take_valid(&self, token_hash: &str, now: DateTime<Utc>) -> Result<Option<i64>>;

    /// Drop every token of a user, returning how many were removed
    async fn revoke_all(&self, user_id: i64) -> Result<usize>;

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// What a one-time token may be redeemed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OneTimeTokenPurpose {
    EmailVerification,
    PasswordReset,
}

/// Storage for e-mail verification and password reset tokens.
///
/// Like refresh tokens, only digests are stored and redeeming consumes the token.
#[async_trait]
pub trait OneTimeTokenStore: Send + Sync {
    /// Store a token, dropping any token the user already had for `purpose`
    async fn replace_for_user(
        &self,
        user_id: i64,
        purpose: OneTimeTokenPurpose,
        token_hash: String,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Consume a token issued for `purpose`, returning its user id if still valid at `now`
    async fn take_valid(
        &self,
        token_hash: &str,
        purpose: OneTimeTokenPurpose,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>>;

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Shared reference to a credential store
pub type SharedCredentialStore = Arc<dyn CredentialStore>;

/// Shared reference to a refresh token store
pub type SharedRefreshTokenStore = Arc<dyn RefreshTokenStore>;

/// Shared reference to a one-time token store
pub type SharedOneTimeTokenStore = Arc<dyn OneTimeTokenStore>;
