//! In-memory storage implementation for development and testing
//!
//! Keeps all data in memory. Suitable for development, testing, or
//! single-process deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::*;
use crate::auth::user::{CredentialRecord, Email, NewCredential};
use crate::error::{GatekeyError, Result};

#[derive(Default)]
struct CredentialTables {
    records: HashMap<i64, CredentialRecord>,
    by_email: HashMap<Email, i64>,
    next_id: i64,
}

/// In-memory credential storage
pub struct MemoryCredentialStore {
    tables: Arc<RwLock<CredentialTables>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(CredentialTables {
                next_id: 1,
                ..CredentialTables::default()
            })),
        }
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_email(&self, email: &Email) -> Result<Option<CredentialRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_email
            .get(email)
            .and_then(|id| tables.records.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<CredentialRecord>> {
        Ok(self.tables.read().await.records.get(&id).cloned())
    }

    async fn insert(&self, credential: NewCredential) -> Result<i64> {
        // Uniqueness check and insert happen under one write lock
        let mut tables = self.tables.write().await;
        if tables.by_email.contains_key(&credential.email) {
            return Err(GatekeyError::UniqueConstraintViolation(format!(
                "email {} already exists",
                credential.email
            )));
        }

        let id = tables.next_id;
        tables.next_id += 1;

        let record = CredentialRecord {
            id,
            email: credential.email.clone(),
            name: credential.name,
            password_hash: credential.password_hash,
            role: credential.role,
            created_at: Utc::now(),
            last_login_at: None,
            email_verified_at: None,
        };
        tables.by_email.insert(credential.email, id);
        tables.records.insert(id, record);

        Ok(id)
    }

    async fn update_password_hash(&self, id: i64, password_hash: String) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.records.get_mut(&id) {
            Some(record) => {
                record.password_hash = password_hash;
                Ok(())
            }
            None => Err(GatekeyError::UserNotFound),
        }
    }

    async fn record_login(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.records.get_mut(&id) {
            Some(record) => {
                record.last_login_at = Some(at);
                Ok(())
            }
            None => Err(GatekeyError::UserNotFound),
        }
    }

    async fn mark_email_verified(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.records.get_mut(&id) {
            Some(record) => {
                record.email_verified_at.get_or_insert(at);
                Ok(())
            }
            None => Err(GatekeyError::UserNotFound),
        }
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(record) = tables.records.remove(&id) {
            tables.by_email.remove(&record.email);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredRefreshToken {
    user_id: i64,
    expires_at: DateTime<Utc>,
}

/// In-memory refresh token storage
pub struct MemoryRefreshTokenStore {
    tokens: Arc<RwLock<HashMap<String, StoredRefreshToken>>>,
}

impl MemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self {
            tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryRefreshTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryRefreshTokenStore {
    async fn replace_for_user(
        &self,
        user_id: i64,
        token_hash: String,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        tokens.retain(|_, stored| stored.user_id != user_id);
        tokens.insert(
            token_hash,
            StoredRefreshToken {
                user_id,
                expires_at,
            },
        );
        Ok(())
    }

    async fn take_valid(&self, token_hash: &str, now: DateTime<Utc>) -> Result<Option<i64>> {
        let mut tokens = self.tokens.write().await;
        match tokens.remove(token_hash) {
            Some(stored) if stored.expires_at > now => Ok(Some(stored.user_id)),
            _ => Ok(None),
        }
    }

    async fn revoke_all(&self, user_id: i64) -> Result<usize> {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, stored| stored.user_id != user_id);
        Ok(before - tokens.len())
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, stored| stored.expires_at > now);
        let removed = before - tokens.len();
        if removed > 0 {
            log::info!("Cleaned up {} expired refresh tokens", removed);
        }
        Ok(removed)
    }
}

#[derive(Debug, Clone)]
struct StoredOneTimeToken {
    user_id: i64,
    purpose: OneTimeTokenPurpose,
    expires_at: DateTime<Utc>,
}

/// In-memory storage for verification and reset tokens
pub struct MemoryOneTimeTokenStore {
    tokens: Arc<RwLock<HashMap<String, StoredOneTimeToken>>>,
}

impl MemoryOneTimeTokenStore {
    pub fn new() -> Self {
        Self {
            tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryOneTimeTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OneTimeTokenStore for MemoryOneTimeTokenStore {
    async fn replace_for_user(
        &self,
        user_id: i64,
        purpose: OneTimeTokenPurpose,
        token_hash: String,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        tokens.retain(|_, stored| !(stored.user_id == user_id && stored.purpose == purpose));
        tokens.insert(
            token_hash,
            StoredOneTimeToken {
                user_id,
                purpose,
                expires_at,
            },
        );
        Ok(())
    }

    async fn take_valid(
        &self,
        token_hash: &str,
        purpose: OneTimeTokenPurpose,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let mut tokens = self.tokens.write().await;
        // A token presented for the wrong purpose is left untouched
        match tokens.get(token_hash) {
            Some(stored) if stored.purpose == purpose => {}
            _ => return Ok(None),
        }
        match tokens.remove(token_hash) {
            Some(stored) if stored.expires_at > now => Ok(Some(stored.user_id)),
            _ => Ok(None),
        }
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, stored| stored.expires_at > now);
        let removed = before - tokens.len();
        if removed > 0 {
            log::info!("Cleaned up {} expired one-time tokens", removed);
        }
        Ok(removed)
    }
}
