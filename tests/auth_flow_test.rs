use std::sync::Arc;
use std::time::Duration;

use argon2::Params;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatekey::auth::{
    AuthService, AuthSettings, AuthStores, Clock, Email, MailKind, ManualClock, NewCredential,
    OutboxMailer, PasswordHasher, RegisterRequest, TokenService, UserRole,
};
use gatekey::security_logger::SecurityLogger;
use gatekey::storage::{
    CredentialStore, MemoryCredentialStore, MemoryOneTimeTokenStore, MemoryRefreshTokenStore,
    MemoryTokenRevocationStore, RefreshTokenStore, RevocationReason, SharedRefreshTokenStore,
    TokenRevocationStore,
};
use gatekey::{GatekeyError, Result};

const SECRET: &str = "flow-test-signing-key-91c3e7a2d05b4f68";
const ADMIN_EMAIL: &str = "root@example.com";

struct Harness {
    auth: AuthService,
    clock: Arc<ManualClock>,
    credentials: Arc<MemoryCredentialStore>,
    revocations: Arc<MemoryTokenRevocationStore>,
    outbox: Arc<OutboxMailer>,
    security_log: Arc<SecurityLogger>,
}

/// Refresh token store whose writes always fail
struct BrokenRefreshTokenStore;

#[async_trait]
impl RefreshTokenStore for BrokenRefreshTokenStore {
    async fn replace_for_user(
        &self,
        _user_id: i64,
        _token_hash: String,
        _expires_at: DateTime<Utc>,
    ) -> Result<()> {
        Err(GatekeyError::StorageError("disk full".to_string()))
    }

    async fn take_valid(&self, _token_hash: &str, _now: DateTime<Utc>) -> Result<Option<i64>> {
        Ok(None)
    }

    async fn revoke_all(&self, _user_id: i64) -> Result<usize> {
        Ok(0)
    }

    async fn cleanup_expired(&self, _now: DateTime<Utc>) -> Result<usize> {
        Ok(0)
    }
}

fn cheap_hasher() -> PasswordHasher {
    PasswordHasher::with_params(Params::new(8, 1, 1, None).unwrap())
}

fn test_settings() -> AuthSettings {
    AuthSettings {
        refresh_token_expiry_secs: 7200,
        min_auth_duration: Duration::ZERO,
        admin_emails: vec![Email::parse(ADMIN_EMAIL).unwrap()],
        ..AuthSettings::default()
    }
}

fn build_harness(hasher: PasswordHasher, refresh_tokens: SharedRefreshTokenStore) -> Harness {
    let clock = Arc::new(ManualClock::new(chrono::Utc::now().timestamp()));
    let credentials = Arc::new(MemoryCredentialStore::new());
    let revocations = Arc::new(MemoryTokenRevocationStore::new());
    let outbox = Arc::new(OutboxMailer::new());
    let security_log = Arc::new(SecurityLogger::new());
    let tokens = Arc::new(TokenService::new(SECRET, 900).unwrap().with_clock(clock.clone()));

    let auth = AuthService::new(
        AuthStores {
            credentials: credentials.clone(),
            refresh_tokens,
            one_time_tokens: Arc::new(MemoryOneTimeTokenStore::new()),
            revocations: revocations.clone(),
        },
        tokens,
        hasher,
        outbox.clone(),
        security_log.clone(),
        test_settings(),
    )
    .unwrap();

    Harness {
        auth,
        clock,
        credentials,
        revocations,
        outbox,
        security_log,
    }
}

fn harness_with_hasher(hasher: PasswordHasher) -> Harness {
    build_harness(hasher, Arc::new(MemoryRefreshTokenStore::new()))
}

fn harness() -> Harness {
    harness_with_hasher(cheap_hasher())
}

fn register_request(email: &str, password: &str) -> RegisterRequest {
    RegisterRequest {
        email: email.to_string(),
        password: password.to_string(),
        name: Some("  Jane Doe ".to_string()),
    }
}

#[tokio::test]
async fn test_register_issues_session() {
    let h = harness();
    let session = h
        .auth
        .register(register_request("Jane@Example.com", "Sup3rSecure"))
        .await
        .unwrap();

    assert_eq!(session.token_type, "Bearer");
    assert_eq!(session.user.email.as_str(), "jane@example.com");
    assert_eq!(session.user.name.as_deref(), Some("Jane Doe"));
    assert_eq!(session.user.role, UserRole::Member);
    assert_eq!(session.expires_at, h.clock.now() + 900);

    let claims = h.auth.authenticate(&session.access_token).await.unwrap();
    assert_eq!(claims.subject(), Some(session.user.id.to_string().as_str()));
    assert_eq!(claims.get_str("email"), Some("jane@example.com"));
    assert_eq!(claims.get_str("role"), Some("member"));

    let stored = h
        .credentials
        .find_by_email(&Email::parse("jane@example.com").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(stored.password_hash.starts_with("$argon2id$"));
    assert_ne!(stored.password_hash, "Sup3rSecure");
}

#[tokio::test]
async fn test_register_rejects_weak_password_and_duplicates() {
    let h = harness();
    assert!(matches!(
        h.auth.register(register_request("a@example.com", "weak")).await,
        Err(GatekeyError::WeakPassword)
    ));
    assert!(matches!(
        h.auth.register(register_request("not-an-email", "Sup3rSecure")).await,
        Err(GatekeyError::ValidationError(_))
    ));

    h.auth
        .register(register_request("a@example.com", "Sup3rSecure"))
        .await
        .unwrap();
    assert!(matches!(
        h.auth.register(register_request("A@EXAMPLE.COM", "Sup3rSecure")).await,
        Err(GatekeyError::UniqueConstraintViolation(_))
    ));
}

#[tokio::test]
async fn test_login_success_and_failures_look_alike() {
    let h = harness();
    h.auth
        .register(register_request("bob@example.com", "Corr3ctHorse"))
        .await
        .unwrap();

    let session = h.auth.login(" BOB@example.com ", "Corr3ctHorse").await.unwrap();
    assert_eq!(session.user.email.as_str(), "bob@example.com");

    let record = h.credentials.find_by_id(session.user.id).await.unwrap().unwrap();
    assert!(record.last_login_at.is_some());

    let wrong_password = h.auth.login("bob@example.com", "Wr0ngHorse").await.unwrap_err();
    let unknown_user = h.auth.login("eve@example.com", "Corr3ctHorse").await.unwrap_err();
    let invalid_email = h.auth.login("eve", "Corr3ctHorse").await.unwrap_err();
    for err in [&wrong_password, &unknown_user, &invalid_email] {
        assert!(matches!(err, GatekeyError::InvalidCredentials));
        assert_eq!(err.public_code(), "invalid_credentials");
    }

    let stats = h.security_log.get_event_stats().await;
    assert_eq!(stats.get("auth_failed"), Some(&3));
    assert_eq!(stats.get("auth_success"), Some(&1));
}

#[tokio::test]
async fn test_login_upgrades_outdated_hash() {
    let h = harness_with_hasher(PasswordHasher::with_params(
        Params::new(16, 2, 1, None).unwrap(),
    ));
    let old_hash = cheap_hasher().hash("Leg4cyPass").unwrap();
    h.credentials
        .insert(NewCredential {
            email: Email::parse("old@example.com").unwrap(),
            name: None,
            password_hash: old_hash.clone(),
            role: UserRole::Admin,
        })
        .await
        .unwrap();

    let session = h.auth.login("old@example.com", "Leg4cyPass").await.unwrap();
    assert_eq!(session.user.role, UserRole::Admin);

    let new_hash = h
        .credentials
        .find_by_id(session.user.id)
        .await
        .unwrap()
        .unwrap()
        .password_hash;
    assert_ne!(new_hash, old_hash);
    assert!(new_hash.contains("m=16,t=2,p=1"));

    let claims = h.auth.authenticate(&session.access_token).await.unwrap();
    assert_eq!(claims.get_str("role"), Some("admin"));
}

#[tokio::test]
async fn test_access_token_expires() {
    let h = harness();
    let session = h
        .auth
        .register(register_request("exp@example.com", "Sup3rSecure"))
        .await
        .unwrap();

    h.clock.advance(899);
    assert!(h.auth.authenticate(&session.access_token).await.is_ok());
    h.clock.advance(1);
    assert!(matches!(
        h.auth.authenticate(&session.access_token).await,
        Err(GatekeyError::ExpiredToken)
    ));
}

#[tokio::test]
async fn test_refresh_rotates_tokens() {
    let h = harness();
    let first = h
        .auth
        .register(register_request("rot@example.com", "Sup3rSecure"))
        .await
        .unwrap();

    h.clock.advance(60);
    let second = h.auth.refresh(&first.refresh_token).await.unwrap();
    assert_ne!(second.access_token, first.access_token);
    assert_ne!(second.refresh_token, first.refresh_token);
    assert_eq!(second.user.id, first.user.id);
    assert_eq!(second.expires_at, first.expires_at + 60);

    // Single use
    assert!(matches!(
        h.auth.refresh(&first.refresh_token).await,
        Err(GatekeyError::InvalidRefreshToken)
    ));
    assert!(matches!(
        h.auth.refresh("made-up-token").await,
        Err(GatekeyError::InvalidRefreshToken)
    ));
}

#[tokio::test]
async fn test_refresh_token_expires() {
    let h = harness();
    let session = h
        .auth
        .register(register_request("late@example.com", "Sup3rSecure"))
        .await
        .unwrap();

    h.clock.advance(7200);
    assert!(matches!(
        h.auth.refresh(&session.refresh_token).await,
        Err(GatekeyError::InvalidRefreshToken)
    ));
}

#[tokio::test]
async fn test_logout_revokes_access_and_refresh_tokens() {
    let h = harness();
    let session = h
        .auth
        .register(register_request("out@example.com", "Sup3rSecure"))
        .await
        .unwrap();

    h.auth.logout(&session.access_token).await.unwrap();

    assert!(matches!(
        h.auth.authenticate(&session.access_token).await,
        Err(GatekeyError::TokenRevoked)
    ));
    assert!(matches!(
        h.auth.refresh(&session.refresh_token).await,
        Err(GatekeyError::InvalidRefreshToken)
    ));

    // The token itself still carries a valid signature
    assert!(h.auth.tokens().verify(&session.access_token).is_ok());

    let claims = h.auth.tokens().verify(&session.access_token).unwrap();
    let info = h
        .revocations
        .get_revocation_info(claims.token_id().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.reason, RevocationReason::UserLogout);
    assert_eq!(info.expires_at.timestamp(), claims.expires_at().unwrap());

    // A fresh login still works
    let again = h.auth.login("out@example.com", "Sup3rSecure").await.unwrap();
    assert!(h.auth.authenticate(&again.access_token).await.is_ok());
}

#[tokio::test]
async fn test_change_password() {
    let h = harness();
    let session = h
        .auth
        .register(register_request("pw@example.com", "Sup3rSecure"))
        .await
        .unwrap();
    let claims = h.auth.authenticate(&session.access_token).await.unwrap();

    assert!(matches!(
        h.auth.change_password(&claims, "Wr0ngGuess", "N3wPassword").await,
        Err(GatekeyError::InvalidCredentials)
    ));
    assert!(matches!(
        h.auth.change_password(&claims, "Sup3rSecure", "short").await,
        Err(GatekeyError::WeakPassword)
    ));

    h.auth
        .change_password(&claims, "Sup3rSecure", "N3wPassword")
        .await
        .unwrap();

    assert!(matches!(
        h.auth.authenticate(&session.access_token).await,
        Err(GatekeyError::TokenRevoked)
    ));
    assert!(h.auth.login("pw@example.com", "Sup3rSecure").await.is_err());
    assert!(h.auth.login("pw@example.com", "N3wPassword").await.is_ok());
}

#[tokio::test]
async fn test_current_user() {
    let h = harness();
    let session = h
        .auth
        .register(register_request("me@example.com", "Sup3rSecure"))
        .await
        .unwrap();
    let claims = h.auth.authenticate(&session.access_token).await.unwrap();

    let profile = h.auth.current_user(&claims).await.unwrap();
    assert_eq!(profile, session.user);
}

#[tokio::test]
async fn test_cleanup_drops_expired_state() {
    let h = harness();
    let session = h
        .auth
        .register(register_request("gc@example.com", "Sup3rSecure"))
        .await
        .unwrap();
    h.auth.logout(&session.access_token).await.unwrap();

    let relogin = h.auth.login("gc@example.com", "Sup3rSecure").await.unwrap();
    assert!(!relogin.refresh_token.is_empty());

    // Nothing has expired yet
    assert_eq!(h.auth.cleanup_expired().await.unwrap(), 0);

    // Past both the access token and refresh token lifetimes
    h.clock.advance(7201);
    assert_eq!(h.auth.cleanup_expired().await.unwrap(), 2);
}

#[tokio::test]
async fn test_failed_registration_leaves_no_account() {
    let h = build_harness(cheap_hasher(), Arc::new(BrokenRefreshTokenStore));

    let err = h
        .auth
        .register(register_request("half@example.com", "Sup3rSecure"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatekeyError::StorageError(_)));

    assert!(h.credentials.is_empty().await);
    assert!(h
        .credentials
        .find_by_email(&Email::parse("half@example.com").unwrap())
        .await
        .unwrap()
        .is_none());
    assert!(h.outbox.sent().await.is_empty());
    assert!(h.security_log.get_event_stats().await.get("user_registered").is_none());

    // Login cannot reach a half-created account either
    assert!(matches!(
        h.auth.login("half@example.com", "Sup3rSecure").await,
        Err(GatekeyError::InvalidCredentials)
    ));
}

#[tokio::test]
async fn test_settings_out_of_range_are_rejected() {
    let build = |settings: AuthSettings| {
        AuthService::new(
            AuthStores {
                credentials: Arc::new(MemoryCredentialStore::new()),
                refresh_tokens: Arc::new(MemoryRefreshTokenStore::new()),
                one_time_tokens: Arc::new(MemoryOneTimeTokenStore::new()),
                revocations: Arc::new(MemoryTokenRevocationStore::new()),
            },
            Arc::new(TokenService::new(SECRET, 900).unwrap()),
            cheap_hasher(),
            Arc::new(OutboxMailer::new()),
            Arc::new(SecurityLogger::new()),
            settings,
        )
    };

    for settings in [
        AuthSettings {
            refresh_token_expiry_secs: 100_000_000_000_000,
            ..AuthSettings::default()
        },
        AuthSettings {
            refresh_token_expiry_secs: 0,
            ..AuthSettings::default()
        },
        AuthSettings {
            password_reset_expiry_secs: u64::MAX,
            ..AuthSettings::default()
        },
    ] {
        assert!(matches!(build(settings), Err(GatekeyError::ConfigError(_))));
    }
    assert!(build(AuthSettings::default()).is_ok());
}

#[tokio::test]
async fn test_verify_email() {
    let h = harness();
    let session = h
        .auth
        .register(register_request("ver@example.com", "Sup3rSecure"))
        .await
        .unwrap();
    assert!(!session.user.email_verified);

    let token = h
        .outbox
        .last_token("ver@example.com", MailKind::EmailVerification)
        .await
        .unwrap();
    let profile = h.auth.verify_email(&token).await.unwrap();
    assert!(profile.email_verified);
    assert_eq!(profile.id, session.user.id);

    // Single use
    assert!(matches!(
        h.auth.verify_email(&token).await,
        Err(GatekeyError::InvalidOneTimeToken)
    ));
    assert!(matches!(
        h.auth.verify_email("made-up-token").await,
        Err(GatekeyError::InvalidOneTimeToken)
    ));

    let claims = h.auth.authenticate(&session.access_token).await.unwrap();
    assert!(h.auth.current_user(&claims).await.unwrap().email_verified);
}

#[tokio::test]
async fn test_verification_token_expires() {
    let h = harness();
    h.auth
        .register(register_request("slow@example.com", "Sup3rSecure"))
        .await
        .unwrap();
    let token = h
        .outbox
        .last_token("slow@example.com", MailKind::EmailVerification)
        .await
        .unwrap();

    h.clock.advance(24 * 3600);
    assert!(matches!(
        h.auth.verify_email(&token).await,
        Err(GatekeyError::InvalidOneTimeToken)
    ));
}

#[tokio::test]
async fn test_password_reset_flow() {
    let h = harness();
    let session = h
        .auth
        .register(register_request("lost@example.com", "Sup3rSecure"))
        .await
        .unwrap();

    // Unknown and malformed addresses look like success but send nothing
    h.auth.request_password_reset("nobody@example.com").await.unwrap();
    h.auth.request_password_reset("not-an-email").await.unwrap();
    assert!(h.outbox.last_token("nobody@example.com", MailKind::PasswordReset).await.is_none());

    h.auth.request_password_reset(" LOST@example.com").await.unwrap();
    let token = h
        .outbox
        .last_token("lost@example.com", MailKind::PasswordReset)
        .await
        .unwrap();

    // A verification token cannot be used to reset
    let verification = h
        .outbox
        .last_token("lost@example.com", MailKind::EmailVerification)
        .await
        .unwrap();
    assert!(matches!(
        h.auth.reset_password(&verification, "N3wPassword").await,
        Err(GatekeyError::InvalidOneTimeToken)
    ));

    // A weak password does not consume the token
    assert!(matches!(
        h.auth.reset_password(&token, "weak").await,
        Err(GatekeyError::WeakPassword)
    ));
    h.auth.reset_password(&token, "N3wPassword").await.unwrap();

    assert!(matches!(
        h.auth.reset_password(&token, "An0therPass").await,
        Err(GatekeyError::InvalidOneTimeToken)
    ));
    assert!(matches!(
        h.auth.refresh(&session.refresh_token).await,
        Err(GatekeyError::InvalidRefreshToken)
    ));
    assert!(h.auth.login("lost@example.com", "Sup3rSecure").await.is_err());
    assert!(h.auth.login("lost@example.com", "N3wPassword").await.is_ok());

    // The verification token was not touched by the wrong-purpose attempt
    assert!(h.auth.verify_email(&verification).await.is_ok());

    let stats = h.security_log.get_event_stats().await;
    assert_eq!(stats.get("password_reset_requested"), Some(&2));
    assert_eq!(stats.get("password_reset"), Some(&1));
}

#[tokio::test]
async fn test_newer_reset_token_replaces_older() {
    let h = harness();
    h.auth
        .register(register_request("twice@example.com", "Sup3rSecure"))
        .await
        .unwrap();

    h.auth.request_password_reset("twice@example.com").await.unwrap();
    let first = h
        .outbox
        .last_token("twice@example.com", MailKind::PasswordReset)
        .await
        .unwrap();
    h.auth.request_password_reset("twice@example.com").await.unwrap();
    let second = h
        .outbox
        .last_token("twice@example.com", MailKind::PasswordReset)
        .await
        .unwrap();

    assert_ne!(first, second);
    assert!(matches!(
        h.auth.reset_password(&first, "N3wPassword").await,
        Err(GatekeyError::InvalidOneTimeToken)
    ));
    assert!(h.auth.reset_password(&second, "N3wPassword").await.is_ok());
}

#[tokio::test]
async fn test_admin_stats_and_revocation() {
    let h = harness();
    let admin = h
        .auth
        .register(register_request(ADMIN_EMAIL, "Sup3rSecure"))
        .await
        .unwrap();
    assert_eq!(admin.user.role, UserRole::Admin);
    let member = h
        .auth
        .register(register_request("member@example.com", "Sup3rSecure"))
        .await
        .unwrap();

    let admin_claims = h.auth.authenticate(&admin.access_token).await.unwrap();
    let member_claims = h.auth.authenticate(&member.access_token).await.unwrap();

    assert!(matches!(
        h.auth.stats(&member_claims).await,
        Err(GatekeyError::Forbidden)
    ));
    assert!(matches!(
        h.auth.revoke_token(&member_claims, &admin.access_token).await,
        Err(GatekeyError::Forbidden)
    ));

    h.auth
        .revoke_token(&admin_claims, &member.access_token)
        .await
        .unwrap();
    assert!(matches!(
        h.auth.authenticate(&member.access_token).await,
        Err(GatekeyError::TokenRevoked)
    ));
    assert!(matches!(
        h.auth.refresh(&member.refresh_token).await,
        Err(GatekeyError::InvalidRefreshToken)
    ));

    let member_token_id = member_claims.token_id().unwrap();
    let info = h
        .revocations
        .get_revocation_info(member_token_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.reason, RevocationReason::AdminRevocation);

    let stats = h.auth.stats(&admin_claims).await.unwrap();
    assert_eq!(stats.revocations.total_revoked, 1);
    assert_eq!(stats.security_events.get("user_registered"), Some(&2));
    assert_eq!(stats.security_events.get("permission_denied"), Some(&2));
    assert!(stats.security_events_last_hour >= 5);
}
