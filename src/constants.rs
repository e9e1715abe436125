// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3030;

// Token lifetimes (seconds)
pub const DEFAULT_ACCESS_TOKEN_EXPIRY_SECS: u64 = 3600;
pub const DEFAULT_REFRESH_TOKEN_EXPIRY_SECS: u64 = 30 * 24 * 3600;
pub const DEFAULT_EMAIL_VERIFICATION_EXPIRY_SECS: u64 = 24 * 3600;
pub const DEFAULT_PASSWORD_RESET_EXPIRY_SECS: u64 = 3600;
/// Upper bound for every configurable lifetime (10 years)
pub const MAX_TOKEN_EXPIRY_SECS: u64 = 10 * 365 * 24 * 3600;

// Authentication hardening
pub const DEFAULT_MIN_AUTH_DURATION_MS: u64 = 100;
pub const MAX_TOKEN_LENGTH: usize = 4096;
pub const MIN_SECRET_LENGTH: usize = 32;
pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const REFRESH_TOKEN_BYTES: usize = 32;
pub const ONE_TIME_TOKEN_BYTES: usize = 32;

// Housekeeping
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 3600;
