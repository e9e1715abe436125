//! Authentication flow: registration, login, token refresh and logout,
//! plus e-mail verification and password reset.
//!
//! The service composes the credential store, the token service and the
//! revocation list. Every collaborator is injected; nothing is reached through
//! global state.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::mailer::{AccountMail, MailKind, SharedAccountMailer};
use crate::auth::password::PasswordHasher;
use crate::auth::token::{Claims, TokenService, CLAIM_SUBJECT};
use crate::auth::user::{CredentialRecord, Email, NewCredential, UserProfile, UserRole};
use crate::config::AuthConfig;
use crate::constants::{
    DEFAULT_EMAIL_VERIFICATION_EXPIRY_SECS, DEFAULT_MIN_AUTH_DURATION_MS,
    DEFAULT_PASSWORD_RESET_EXPIRY_SECS, DEFAULT_REFRESH_TOKEN_EXPIRY_SECS, ONE_TIME_TOKEN_BYTES,
    REFRESH_TOKEN_BYTES,
};
use crate::error::{GatekeyError, Result};
use crate::security::AuthTimer;
use crate::security_logger::{SecurityEvent, SharedSecurityLogger};
use crate::storage::token_revocation::{
    RevocationReason, RevocationStats, RevokedToken, SharedTokenRevocationStore,
};
use crate::storage::traits::{
    OneTimeTokenPurpose, SharedCredentialStore, SharedOneTimeTokenStore, SharedRefreshTokenStore,
};

/// Numeric user id claim
pub const CLAIM_USER_ID: &str = "user_id";
pub const CLAIM_EMAIL: &str = "email";
pub const CLAIM_ROLE: &str = "role";

/// Tunables for the authentication flow
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub refresh_token_expiry_secs: u64,
    pub email_verification_expiry_secs: u64,
    pub password_reset_expiry_secs: u64,
    pub min_auth_duration: Duration,
    /// Accounts registered with these addresses get the admin role
    pub admin_emails: Vec<Email>,
}

impl AuthSettings {
    /// Every lifetime must be positive and within `MAX_TOKEN_EXPIRY_SECS`
    pub fn validate(&self) -> Result<()> {
        AuthConfig::validate_lifetime("refresh_token_expiry_secs", self.refresh_token_expiry_secs)?;
        AuthConfig::validate_lifetime(
            "email_verification_expiry_secs",
            self.email_verification_expiry_secs,
        )?;
        AuthConfig::validate_lifetime("password_reset_expiry_secs", self.password_reset_expiry_secs)
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            refresh_token_expiry_secs: DEFAULT_REFRESH_TOKEN_EXPIRY_SECS,
            email_verification_expiry_secs: DEFAULT_EMAIL_VERIFICATION_EXPIRY_SECS,
            password_reset_expiry_secs: DEFAULT_PASSWORD_RESET_EXPIRY_SECS,
            min_auth_duration: Duration::from_millis(DEFAULT_MIN_AUTH_DURATION_MS),
            admin_emails: Vec::new(),
        }
    }
}

impl From<&AuthConfig> for AuthSettings {
    fn from(config: &AuthConfig) -> Self {
        Self {
            refresh_token_expiry_secs: config.refresh_token_expiry_secs,
            email_verification_expiry_secs: config.email_verification_expiry_secs,
            password_reset_expiry_secs: config.password_reset_expiry_secs,
            min_auth_duration: config.min_auth_duration,
            admin_emails: config.admin_emails.clone(),
        }
    }
}

/// Storage backends used by the service
#[derive(Clone)]
pub struct AuthStores {
    pub credentials: SharedCredentialStore,
    pub refresh_tokens: SharedRefreshTokenStore,
    pub one_time_tokens: SharedOneTimeTokenStore,
    pub revocations: SharedTokenRevocationStore,
}

/// Registration input
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Tokens handed to a client after a successful login, registration or refresh
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub access_token: String,
    pub token_type: &'static str,
    /// Access token expiry (unix seconds)
    pub expires_at: i64,
    pub refresh_token: String,
    pub user: UserProfile,
}

/// Counters exposed to administrators
#[derive(Debug, Clone, Serialize)]
pub struct AuthStats {
    pub revocations: RevocationStats,
    pub security_events: HashMap<&'static str, usize>,
    pub security_events_last_hour: usize,
}

/// Orchestrates credential checks and token issuance
pub struct AuthService {
    credentials: SharedCredentialStore,
    refresh_tokens: SharedRefreshTokenStore,
    one_time_tokens: SharedOneTimeTokenStore,
    revocations: SharedTokenRevocationStore,
    tokens: Arc<TokenService>,
    hasher: PasswordHasher,
    mailer: SharedAccountMailer,
    security_log: SharedSecurityLogger,
    settings: AuthSettings,
}

impl AuthService {
    /// Fails with `ConfigError` when a lifetime in `settings` is out of range
    pub fn new(
        stores: AuthStores,
        tokens: Arc<TokenService>,
        hasher: PasswordHasher,
        mailer: SharedAccountMailer,
        security_log: SharedSecurityLogger,
        settings: AuthSettings,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            credentials: stores.credentials,
            refresh_tokens: stores.refresh_tokens,
            one_time_tokens: stores.one_time_tokens,
            revocations: stores.revocations,
            tokens,
            hasher,
            mailer,
            security_log,
            settings,
        })
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Create an account, log it in and send an e-mail verification token.
    ///
    /// If anything fails after the credential was stored, the credential is
    /// removed again so the e-mail address stays available.
    pub async fn register(&self, request: RegisterRequest) -> Result<AuthSession> {
        let email = Email::parse(&request.email)?;
        if !self.hasher.is_strong(&request.password) {
            return Err(GatekeyError::WeakPassword);
        }
        if self.credentials.find_by_email(&email).await?.is_some() {
            return Err(GatekeyError::UniqueConstraintViolation(format!(
                "email {} already exists",
                email
            )));
        }

        let name = request
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        let role = if self.settings.admin_emails.contains(&email) {
            UserRole::Admin
        } else {
            UserRole::Member
        };
        let password_hash = self.hash_password(request.password).await?;

        // The store re-checks uniqueness, which covers concurrent registrations
        let id = self
            .credentials
            .insert(NewCredential {
                email: email.clone(),
                name,
                password_hash,
                role,
            })
            .await?;

        let (session, verification_token) = match self.complete_registration(id).await {
            Ok(done) => done,
            Err(e) => {
                log::error!("Registration of user {} failed, rolling back: {}", id, e);
                self.discard_user(id).await;
                return Err(e);
            }
        };

        self.security_log
            .log_event(SecurityEvent::UserRegistered { user_id: id })
            .await;
        self.deliver(AccountMail {
            to: email,
            kind: MailKind::EmailVerification,
            token: verification_token,
        })
        .await;

        Ok(session)
    }

    async fn complete_registration(&self, id: i64) -> Result<(AuthSession, String)> {
        let record = self.credentials.find_by_id(id).await?.ok_or_else(|| {
            GatekeyError::StorageError(format!("Inserted credential {} not found", id))
        })?;
        let session = self.issue_session(&record).await?;
        let verification_token = self
            .issue_one_time_token(
                id,
                OneTimeTokenPurpose::EmailVerification,
                self.settings.email_verification_expiry_secs,
            )
            .await?;
        Ok((session, verification_token))
    }

    async fn discard_user(&self, id: i64) {
        if let Err(e) = self.refresh_tokens.revoke_all(id).await {
            log::warn!("Failed to drop refresh tokens of discarded user {}: {}", id, e);
        }
        if let Err(e) = self.credentials.delete(id).await {
            log::error!("Failed to remove discarded user {}: {}", id, e);
        }
    }

    /// Check e-mail and password and issue a session.
    ///
    /// Unknown e-mail and wrong password produce the same error and take at
    /// least `min_auth_duration`.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession> {
        let timer = AuthTimer::new(self.settings.min_auth_duration);
        let result = self.login_inner(email, password).await;
        timer.wait().await;

        match &result {
            Ok(session) => {
                self.security_log
                    .log_event(SecurityEvent::AuthenticationSuccess {
                        user_id: session.user.id,
                    })
                    .await;
            }
            Err(e) => {
                self.security_log
                    .log_event(SecurityEvent::AuthenticationFailed {
                        email: email.trim().to_lowercase(),
                        reason: e.to_string(),
                    })
                    .await;
            }
        }

        result
    }

    async fn login_inner(&self, email: &str, password: &str) -> Result<AuthSession> {
        let email = Email::parse(email).map_err(|_| GatekeyError::InvalidCredentials)?;
        let record = self
            .credentials
            .find_by_email(&email)
            .await?
            .ok_or(GatekeyError::InvalidCredentials)?;

        if !self
            .verify_password(password.to_string(), record.password_hash.clone())
            .await?
        {
            return Err(GatekeyError::InvalidCredentials);
        }

        if self.hasher.needs_rehash(&record.password_hash) {
            match self.hash_password(password.to_string()).await {
                Ok(hash) => {
                    if let Err(e) = self.credentials.update_password_hash(record.id, hash).await {
                        log::warn!("Failed to upgrade password hash for user {}: {}", record.id, e);
                    }
                }
                Err(e) => log::warn!("Failed to rehash password for user {}: {}", record.id, e),
            }
        }

        self.credentials
            .record_login(record.id, self.now_datetime()?)
            .await?;

        self.issue_session(&record).await
    }

    /// Verify an access token and check it against the revocation list
    pub async fn authenticate(&self, access_token: &str) -> Result<Claims> {
        let claims = match self.tokens.verify(access_token) {
            Ok(claims) => claims,
            Err(e) => {
                self.security_log
                    .log_event(SecurityEvent::TokenValidationFailed {
                        reason: e.to_string(),
                    })
                    .await;
                return Err(e);
            }
        };

        if let Some(token_id) = claims.token_id() {
            if self.revocations.is_token_revoked(token_id).await? {
                self.security_log
                    .log_event(SecurityEvent::TokenValidationFailed {
                        reason: format!("revoked token {}", token_id),
                    })
                    .await;
                return Err(GatekeyError::TokenRevoked);
            }
        }

        Ok(claims)
    }

    /// Exchange a refresh token for a new session. The refresh token is single-use.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthSession> {
        let token_hash = digest_token(refresh_token);
        let user_id = match self
            .refresh_tokens
            .take_valid(&token_hash, self.now_datetime()?)
            .await?
        {
            Some(user_id) => user_id,
            None => {
                self.security_log
                    .log_event(SecurityEvent::RefreshTokenRejected)
                    .await;
                return Err(GatekeyError::InvalidRefreshToken);
            }
        };

        let record = self
            .credentials
            .find_by_id(user_id)
            .await?
            .ok_or(GatekeyError::InvalidRefreshToken)?;

        self.issue_session(&record).await
    }

    /// Revoke the presented access token and every refresh token of its owner
    pub async fn logout(&self, access_token: &str) -> Result<()> {
        let claims = self.authenticate(access_token).await?;
        let user_id = user_id_from_claims(&claims)?;

        self.revoke_access_token(&claims, RevocationReason::UserLogout, None)
            .await?;
        let dropped = self.refresh_tokens.revoke_all(user_id).await?;
        log::debug!("Logout of user {} dropped {} refresh tokens", user_id, dropped);

        Ok(())
    }

    /// Replace the password of the authenticated user.
    ///
    /// The presented access token and all refresh tokens are revoked, so the
    /// client has to log in again.
    pub async fn change_password(
        &self,
        claims: &Claims,
        current_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let user_id = user_id_from_claims(claims)?;
        let record = self
            .credentials
            .find_by_id(user_id)
            .await?
            .ok_or(GatekeyError::UserNotFound)?;

        if !self
            .verify_password(current_password.to_string(), record.password_hash.clone())
            .await?
        {
            return Err(GatekeyError::InvalidCredentials);
        }
        if !self.hasher.is_strong(new_password) {
            return Err(GatekeyError::WeakPassword);
        }

        let hash = self.hash_password(new_password.to_string()).await?;
        self.credentials.update_password_hash(user_id, hash).await?;

        self.revoke_access_token(
            claims,
            RevocationReason::CredentialChange,
            Some("password changed".to_string()),
        )
        .await?;
        self.refresh_tokens.revoke_all(user_id).await?;

        Ok(())
    }

    /// Load the profile of the user a token was issued to
    pub async fn current_user(&self, claims: &Claims) -> Result<UserProfile> {
        let user_id = user_id_from_claims(claims)?;
        self.credentials
            .find_by_id(user_id)
            .await?
            .map(|record| record.profile())
            .ok_or(GatekeyError::UserNotFound)
    }

    /// Redeem an e-mail verification token
    pub async fn verify_email(&self, token: &str) -> Result<UserProfile> {
        let now = self.now_datetime()?;
        let user_id = self
            .one_time_tokens
            .take_valid(&digest_token(token), OneTimeTokenPurpose::EmailVerification, now)
            .await?
            .ok_or(GatekeyError::InvalidOneTimeToken)?;

        self.credentials
            .mark_email_verified(user_id, now)
            .await
            .map_err(|e| match e {
                GatekeyError::UserNotFound => GatekeyError::InvalidOneTimeToken,
                other => other,
            })?;
        let record = self
            .credentials
            .find_by_id(user_id)
            .await?
            .ok_or(GatekeyError::InvalidOneTimeToken)?;

        self.security_log
            .log_event(SecurityEvent::EmailVerified { user_id })
            .await;

        Ok(record.profile())
    }

    /// Send a password reset token if the address belongs to an account.
    ///
    /// Succeeds for unknown and malformed addresses too, and takes at least
    /// `min_auth_duration`, so the reply does not reveal which e-mails are registered.
    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        let timer = AuthTimer::new(self.settings.min_auth_duration);
        let result = self.request_password_reset_inner(email).await;
        timer.wait().await;
        result
    }

    async fn request_password_reset_inner(&self, email: &str) -> Result<()> {
        let email = match Email::parse(email) {
            Ok(email) => email,
            Err(e) => {
                log::debug!("Password reset requested for an invalid address: {}", e);
                return Ok(());
            }
        };
        let record = self.credentials.find_by_email(&email).await?;

        self.security_log
            .log_event(SecurityEvent::PasswordResetRequested {
                email: email.to_string(),
                known: record.is_some(),
            })
            .await;

        if let Some(record) = record {
            let token = self
                .issue_one_time_token(
                    record.id,
                    OneTimeTokenPurpose::PasswordReset,
                    self.settings.password_reset_expiry_secs,
                )
                .await?;
            self.deliver(AccountMail {
                to: record.email,
                kind: MailKind::PasswordReset,
                token,
            })
            .await;
        }

        Ok(())
    }

    /// Set a new password with a reset token. The token is single-use and every
    /// refresh token of the account is dropped.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<()> {
        // Checked first so a weak password does not burn the token
        if !self.hasher.is_strong(new_password) {
            return Err(GatekeyError::WeakPassword);
        }

        let user_id = self
            .one_time_tokens
            .take_valid(
                &digest_token(token),
                OneTimeTokenPurpose::PasswordReset,
                self.now_datetime()?,
            )
            .await?
            .ok_or(GatekeyError::InvalidOneTimeToken)?;

        let hash = self.hash_password(new_password.to_string()).await?;
        self.credentials
            .update_password_hash(user_id, hash)
            .await
            .map_err(|e| match e {
                GatekeyError::UserNotFound => GatekeyError::InvalidOneTimeToken,
                other => other,
            })?;
        self.refresh_tokens.revoke_all(user_id).await?;

        self.security_log
            .log_event(SecurityEvent::PasswordReset { user_id })
            .await;

        Ok(())
    }

    /// Revoke another session's access token and its owner's refresh tokens. Admin only.
    pub async fn revoke_token(&self, admin: &Claims, token: &str) -> Result<()> {
        self.require_admin(admin, "revoke_token").await?;

        let claims = self.tokens.verify(token)?;
        let user_id = user_id_from_claims(&claims)?;
        self.revoke_access_token(
            &claims,
            RevocationReason::AdminRevocation,
            Some(format!(
                "revoked by user {}",
                admin.subject().unwrap_or("unknown")
            )),
        )
        .await?;
        self.refresh_tokens.revoke_all(user_id).await?;

        Ok(())
    }

    /// Revocation and security event counters. Admin only.
    pub async fn stats(&self, admin: &Claims) -> Result<AuthStats> {
        self.require_admin(admin, "stats").await?;

        Ok(AuthStats {
            revocations: self.revocations.get_revocation_stats().await?,
            security_events: self.security_log.get_event_stats().await,
            security_events_last_hour: self
                .security_log
                .get_recent_events(Duration::from_secs(3600))
                .await
                .len(),
        })
    }

    /// Purge expired revocations, refresh tokens and one-time tokens
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let now = self.now_datetime()?;
        let revocations = self.revocations.cleanup_expired_revocations(now).await?;
        let refresh = self.refresh_tokens.cleanup_expired(now).await?;
        let one_time = self.one_time_tokens.cleanup_expired(now).await?;
        Ok(revocations + refresh + one_time)
    }

    /// Run `cleanup_expired` periodically
    pub fn start_cleanup_task(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                if let Err(e) = self.cleanup_expired().await {
                    log::error!("Failed to clean up expired tokens: {}", e);
                }
            }
        })
    }

    async fn require_admin(&self, claims: &Claims, action: &str) -> Result<()> {
        if claims.get_str(CLAIM_ROLE) == Some(UserRole::Admin.as_str()) {
            return Ok(());
        }
        self.security_log
            .log_event(SecurityEvent::PermissionDenied {
                user_id: claims.subject().unwrap_or_default().to_string(),
                action: action.to_string(),
            })
            .await;
        Err(GatekeyError::Forbidden)
    }

    async fn issue_session(&self, record: &CredentialRecord) -> Result<AuthSession> {
        let mut payload = Map::new();
        payload.insert(CLAIM_SUBJECT.to_string(), Value::from(record.id.to_string()));
        payload.insert(CLAIM_USER_ID.to_string(), Value::from(record.id));
        payload.insert(CLAIM_EMAIL.to_string(), Value::from(record.email.as_str()));
        payload.insert(CLAIM_ROLE.to_string(), Value::from(record.role.as_str()));

        let issued = self.tokens.issue(payload, None)?;

        let refresh_token = generate_opaque_token(REFRESH_TOKEN_BYTES);
        let refresh_expires_at = self.expiry_after(self.settings.refresh_token_expiry_secs)?;
        self.refresh_tokens
            .replace_for_user(record.id, digest_token(&refresh_token), refresh_expires_at)
            .await?;

        Ok(AuthSession {
            access_token: issued.token,
            token_type: "Bearer",
            expires_at: issued.expires_at,
            refresh_token,
            user: record.profile(),
        })
    }

    async fn issue_one_time_token(
        &self,
        user_id: i64,
        purpose: OneTimeTokenPurpose,
        lifetime_secs: u64,
    ) -> Result<String> {
        let token = generate_opaque_token(ONE_TIME_TOKEN_BYTES);
        let expires_at = self.expiry_after(lifetime_secs)?;
        self.one_time_tokens
            .replace_for_user(user_id, purpose, digest_token(&token), expires_at)
            .await?;
        Ok(token)
    }

    async fn deliver(&self, mail: AccountMail) {
        let (to, kind) = (mail.to.clone(), mail.kind);
        if let Err(e) = self.mailer.send(mail).await {
            log::error!("Failed to send {:?} mail to {}: {}", kind, to, e);
        }
    }

    async fn revoke_access_token(
        &self,
        claims: &Claims,
        reason: RevocationReason,
        context: Option<String>,
    ) -> Result<()> {
        let token_id = claims
            .token_id()
            .ok_or_else(|| GatekeyError::MalformedToken("Missing jti claim".to_string()))?;
        let expires_at = claims
            .expires_at()
            .ok_or_else(|| GatekeyError::MalformedToken("Missing exp claim".to_string()))?;
        let user_id = claims.subject().unwrap_or_default().to_string();

        self.revocations
            .revoke_token(RevokedToken {
                token_id: token_id.to_string(),
                user_id: user_id.clone(),
                revoked_at: self.now_datetime()?,
                expires_at: to_datetime(expires_at)?,
                reason,
                context,
            })
            .await?;

        self.security_log
            .log_event(SecurityEvent::TokenRevoked {
                user_id,
                token_id: token_id.to_string(),
            })
            .await;

        Ok(())
    }

    async fn hash_password(&self, password: String) -> Result<String> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| GatekeyError::SystemError(format!("Password hashing task failed: {}", e)))?
    }

    async fn verify_password(&self, password: String, hash: String) -> Result<bool> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| {
                GatekeyError::SystemError(format!("Password verification task failed: {}", e))
            })
    }

    fn now_datetime(&self) -> Result<DateTime<Utc>> {
        to_datetime(self.tokens.now())
    }

    fn expiry_after(&self, lifetime_secs: u64) -> Result<DateTime<Utc>> {
        let lifetime = i64::try_from(lifetime_secs).map_err(|_| {
            GatekeyError::ConfigError(format!("Lifetime {} is out of range", lifetime_secs))
        })?;
        to_datetime(self.tokens.now().saturating_add(lifetime))
    }
}

/// Reads the numeric user id from `user_id`, falling back to `sub`
pub fn user_id_from_claims(claims: &Claims) -> Result<i64> {
    claims
        .get(CLAIM_USER_ID)
        .and_then(Value::as_i64)
        .or_else(|| claims.subject().and_then(|sub| sub.parse().ok()))
        .ok_or_else(|| GatekeyError::MalformedToken("Missing user id claim".to_string()))
}

fn to_datetime(timestamp: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| GatekeyError::SystemError(format!("Timestamp out of range: {}", timestamp)))
}

/// Random base64url token for refresh, verification and reset links
fn generate_opaque_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Opaque tokens are stored as SHA-256 digests only
fn digest_token(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}
