//! Service configuration module
//! Loads the signing secret, token lifetimes and listener settings from the environment

use crate::auth::user::Email;
use crate::constants::{
    DEFAULT_ACCESS_TOKEN_EXPIRY_SECS, DEFAULT_CLEANUP_INTERVAL_SECS,
    DEFAULT_EMAIL_VERIFICATION_EXPIRY_SECS, DEFAULT_HOST, DEFAULT_MIN_AUTH_DURATION_MS,
    DEFAULT_PASSWORD_RESET_EXPIRY_SECS, DEFAULT_PORT, DEFAULT_REFRESH_TOKEN_EXPIRY_SECS,
    MAX_TOKEN_EXPIRY_SECS, MIN_SECRET_LENGTH,
};
use crate::error::{GatekeyError, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Service configuration parameters.
///
/// Loaded once at startup and never mutated afterwards.
#[derive(Clone)]
pub struct AuthConfig {
    pub host: String,
    pub port: u16,
    /// JWT secret for token signing/validation
    pub jwt_secret: String,
    /// Default access token lifetime in seconds
    pub access_token_expiry_secs: u64,
    /// Refresh token lifetime in seconds
    pub refresh_token_expiry_secs: u64,
    /// E-mail verification token lifetime in seconds
    pub email_verification_expiry_secs: u64,
    /// Password reset token lifetime in seconds
    pub password_reset_expiry_secs: u64,
    /// Accounts registered with these addresses get the admin role
    pub admin_emails: Vec<Email>,
    /// Minimum duration of a login attempt, success or failure
    pub min_auth_duration: Duration,
    /// How often expired revocations and refresh tokens are purged
    pub cleanup_interval: Duration,
    /// Development mode (relaxes nothing security-related, only logging)
    pub development_mode: bool,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("jwt_secret", &"<redacted>")
            .field("access_token_expiry_secs", &self.access_token_expiry_secs)
            .field("refresh_token_expiry_secs", &self.refresh_token_expiry_secs)
            .field("email_verification_expiry_secs", &self.email_verification_expiry_secs)
            .field("password_reset_expiry_secs", &self.password_reset_expiry_secs)
            .field("admin_emails", &self.admin_emails)
            .field("min_auth_duration", &self.min_auth_duration)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("development_mode", &self.development_mode)
            .finish()
    }
}

impl AuthConfig {
    /// Create a test configuration - DANGEROUS: Only for testing!
    pub fn for_testing() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            jwt_secret: "test-jwt-signing-key-only-for-unit-tests-never-in-production-42"
                .to_string(),
            access_token_expiry_secs: DEFAULT_ACCESS_TOKEN_EXPIRY_SECS,
            refresh_token_expiry_secs: DEFAULT_REFRESH_TOKEN_EXPIRY_SECS,
            email_verification_expiry_secs: DEFAULT_EMAIL_VERIFICATION_EXPIRY_SECS,
            password_reset_expiry_secs: DEFAULT_PASSWORD_RESET_EXPIRY_SECS,
            admin_emails: Vec::new(),
            min_auth_duration: Duration::ZERO,
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            development_mode: true,
        }
    }

    /// Validate that a secret meets security requirements
    pub fn validate_secret(secret: &str) -> Result<()> {
        if secret.len() < MIN_SECRET_LENGTH {
            return Err(GatekeyError::ConfigError(format!(
                "JWT secret must be at least {} characters long",
                MIN_SECRET_LENGTH
            )));
        }

        // Check for insecure default or example values
        let insecure_patterns = [
            "your-secret-key",
            "change-this",
            "change_me",
            "changeme",
            "test-secret",
            "default",
            "secret",
            "password",
            "12345",
        ];

        let lowered = secret.to_lowercase();
        for pattern in &insecure_patterns {
            if lowered.contains(pattern) {
                return Err(GatekeyError::ConfigError(format!(
                    "JWT secret contains insecure pattern '{}'. Please use a secure random secret generated with: openssl rand -base64 32",
                    pattern
                )));
            }
        }

        // Ensure some complexity
        if secret.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(GatekeyError::ConfigError(
                "JWT secret should contain mixed characters (letters, numbers, symbols) for security"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Lifetimes must be positive and at most `MAX_TOKEN_EXPIRY_SECS`
    pub fn validate_lifetime(name: &str, secs: u64) -> Result<()> {
        if secs == 0 || secs > MAX_TOKEN_EXPIRY_SECS {
            return Err(GatekeyError::ConfigError(format!(
                "{} must be between 1 and {} seconds, got {}",
                name, MAX_TOKEN_EXPIRY_SECS, secs
            )));
        }
        Ok(())
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let host = env::var("GATEKEY_HOST").unwrap_or(DEFAULT_HOST.to_string());
        let port = parse_var("GATEKEY_PORT", DEFAULT_PORT)?;

        let jwt_secret = env::var("GATEKEY_JWT_SECRET")
            .or_else(|_| env::var("JWT_SECRET"))
            .map_err(|_| {
                GatekeyError::ConfigError(
                    "JWT_SECRET environment variable is required for security. \
                     Generate one with: openssl rand -base64 32"
                        .to_string(),
                )
            })?;
        Self::validate_secret(&jwt_secret)?;

        let access_token_expiry_secs = parse_var(
            "GATEKEY_ACCESS_TOKEN_EXPIRY_SECS",
            DEFAULT_ACCESS_TOKEN_EXPIRY_SECS,
        )?;
        let refresh_token_expiry_secs = parse_var(
            "GATEKEY_REFRESH_TOKEN_EXPIRY_SECS",
            DEFAULT_REFRESH_TOKEN_EXPIRY_SECS,
        )?;
        let email_verification_expiry_secs = parse_var(
            "GATEKEY_EMAIL_VERIFICATION_EXPIRY_SECS",
            DEFAULT_EMAIL_VERIFICATION_EXPIRY_SECS,
        )?;
        let password_reset_expiry_secs = parse_var(
            "GATEKEY_PASSWORD_RESET_EXPIRY_SECS",
            DEFAULT_PASSWORD_RESET_EXPIRY_SECS,
        )?;
        Self::validate_lifetime("GATEKEY_ACCESS_TOKEN_EXPIRY_SECS", access_token_expiry_secs)?;
        Self::validate_lifetime("GATEKEY_REFRESH_TOKEN_EXPIRY_SECS", refresh_token_expiry_secs)?;
        Self::validate_lifetime(
            "GATEKEY_EMAIL_VERIFICATION_EXPIRY_SECS",
            email_verification_expiry_secs,
        )?;
        Self::validate_lifetime("GATEKEY_PASSWORD_RESET_EXPIRY_SECS", password_reset_expiry_secs)?;

        let admin_emails = match env::var("GATEKEY_ADMIN_EMAILS") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(Email::parse)
                .collect::<Result<Vec<_>>>()
                .map_err(|e| {
                    GatekeyError::ConfigError(format!("GATEKEY_ADMIN_EMAILS is invalid: {}", e))
                })?,
            Err(_) => Vec::new(),
        };

        let min_auth_ms = parse_var("GATEKEY_MIN_AUTH_DURATION_MS", DEFAULT_MIN_AUTH_DURATION_MS)?;
        let cleanup_secs = parse_var("GATEKEY_CLEANUP_INTERVAL_SECS", DEFAULT_CLEANUP_INTERVAL_SECS)?;
        if cleanup_secs == 0 {
            return Err(GatekeyError::ConfigError(
                "GATEKEY_CLEANUP_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }

        let development_mode = env::var("GATEKEY_DEVELOPMENT_MODE")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false); // SECURITY: Default to false (production mode)

        Ok(Self {
            host,
            port,
            jwt_secret,
            access_token_expiry_secs,
            refresh_token_expiry_secs,
            email_verification_expiry_secs,
            password_reset_expiry_secs,
            admin_emails,
            min_auth_duration: Duration::from_millis(min_auth_ms),
            cleanup_interval: Duration::from_secs(cleanup_secs),
            development_mode,
        })
    }
}

/// Reads an optional variable, failing loudly on unparsable values
fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            GatekeyError::ConfigError(format!("{} has an invalid value: {}", name, raw))
        }),
        Err(_) => Ok(default),
    }
}
