//! Token revocation storage and management
//!
//! Access tokens are stateless, so early invalidation (logout, credential
//! change) is handled by a denylist keyed by the token id (`jti`). Entries only
//! need to live until the revoked token would have expired anyway.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;

/// Information about a revoked token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokedToken {
    /// JWT ID (jti)
    pub token_id: String,
    /// User ID who owned the token
    pub user_id: String,
    /// When the token was revoked
    pub revoked_at: DateTime<Utc>,
    /// When the original token expires (for cleanup)
    pub expires_at: DateTime<Utc>,
    pub reason: RevocationReason,
    /// Optional additional context
    pub context: Option<String>,
}

/// Reason for token revocation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    /// User initiated logout
    UserLogout,
    /// User changed password/credentials
    CredentialChange,
    /// Administrative action
    AdminRevocation,
}

/// Token revocation storage trait
#[async_trait]
pub trait TokenRevocationStore: Send + Sync {
    /// Add a token to the revocation list
    async fn revoke_token(&self, revoked_token: RevokedToken) -> Result<()>;

    async fn is_token_revoked(&self, token_id: &str) -> Result<bool>;

    async fn get_revocation_info(&self, token_id: &str) -> Result<Option<RevokedToken>>;

    /// Drop entries whose token has expired by `now`
    async fn cleanup_expired_revocations(&self, now: DateTime<Utc>) -> Result<usize>;

    async fn get_revocation_stats(&self) -> Result<RevocationStats>;
}

/// Statistics about token revocations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationStats {
    /// Total number of revoked tokens
    pub total_revoked: usize,
    /// Number of revocations by reason
    pub by_reason: HashMap<RevocationReason, usize>,
    /// Number of revocations in the last 24 hours
    pub recent_revocations: usize,
    /// Number of active (non-expired) revocations
    pub active_revocations: usize,
}

/// In-memory implementation of token revocation store
pub struct MemoryTokenRevocationStore {
    revoked_tokens: Arc<RwLock<HashMap<String, RevokedToken>>>,
}

impl MemoryTokenRevocationStore {
    pub fn new() -> Self {
        Self {
            revoked_tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl TokenRevocationStore for MemoryTokenRevocationStore {
    async fn revoke_token(&self, revoked_token: RevokedToken) -> Result<()> {
        let token_id = revoked_token.token_id.clone();
        log::info!(
            "Token revoked: {} (user {}, reason {:?})",
            token_id,
            revoked_token.user_id,
            revoked_token.reason
        );
        self.revoked_tokens
            .write()
            .await
            .insert(token_id, revoked_token);
        Ok(())
    }

    async fn is_token_revoked(&self, token_id: &str) -> Result<bool> {
        let revoked_tokens = self.revoked_tokens.read().await;
        Ok(revoked_tokens.contains_key(token_id))
    }

    async fn get_revocation_info(&self, token_id: &str) -> Result<Option<RevokedToken>> {
        let revoked_tokens = self.revoked_tokens.read().await;
        Ok(revoked_tokens.get(token_id).cloned())
    }

    async fn cleanup_expired_revocations(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut revoked_tokens = self.revoked_tokens.write().await;
        let before = revoked_tokens.len();
        revoked_tokens.retain(|_, revoked| revoked.expires_at > now);
        let removed_count = before - revoked_tokens.len();

        if removed_count > 0 {
            log::info!("Cleaned up {} expired token revocations", removed_count);
        }

        Ok(removed_count)
    }

    async fn get_revocation_stats(&self) -> Result<RevocationStats> {
        let revoked_tokens = self.revoked_tokens.read().await;
        let now = Utc::now();
        let twenty_four_hours_ago = now - chrono::Duration::hours(24);

        let mut by_reason = HashMap::new();
        let mut recent_revocations = 0;
        let mut active_revocations = 0;

        for revoked_token in revoked_tokens.values() {
            *by_reason.entry(revoked_token.reason).or_insert(0) += 1;

            if revoked_token.revoked_at > twenty_four_hours_ago {
                recent_revocations += 1;
            }
            if revoked_token.expires_at > now {
                active_revocations += 1;
            }
        }

        Ok(RevocationStats {
            total_revoked: revoked_tokens.len(),
            by_reason,
            recent_revocations,
            active_revocations,
        })
    }
}

impl Default for MemoryTokenRevocationStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared reference to token revocation store
pub type SharedTokenRevocationStore = Arc<dyn TokenRevocationStore>;
