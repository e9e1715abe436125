use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum GatekeyError {
    // Configuration errors
    ConfigError(String),

    // Token errors
    MalformedToken(String),
    InvalidSignature,
    ExpiredToken,
    TokenNotYetValid,
    TokenRevoked,
    InvalidRefreshToken,
    /// Unknown, expired or already used verification / reset token
    InvalidOneTimeToken,

    // Credential errors
    InvalidCredentials,
    WeakPassword,
    UniqueConstraintViolation(String),
    UserNotFound,
    PasswordHashError(String),

    // Request errors
    Unauthorized,
    Forbidden,
    ValidationError(String),

    // Storage errors
    StorageError(String),

    // System errors
    SystemError(String),
}

impl GatekeyError {
    /// True for every failure that means "the caller is not authenticated".
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::MalformedToken(_)
                | Self::InvalidSignature
                | Self::ExpiredToken
                | Self::TokenNotYetValid
                | Self::TokenRevoked
                | Self::InvalidRefreshToken
                | Self::InvalidCredentials
                | Self::Unauthorized
        )
    }

    /// Stable code exposed to clients. Verification failures collapse into
    /// `unauthenticated`, except expiry which lets clients re-authenticate.
    pub fn public_code(&self) -> &'static str {
        match self {
            Self::ExpiredToken => "token_expired",
            Self::InvalidCredentials => "invalid_credentials",
            e if e.is_authentication_failure() => "unauthenticated",
            Self::WeakPassword => "weak_password",
            Self::ValidationError(_) => "validation_error",
            Self::UniqueConstraintViolation(_) => "email_taken",
            Self::UserNotFound => "not_found",
            Self::InvalidOneTimeToken => "invalid_token",
            Self::Forbidden => "forbidden",
            _ => "internal_error",
        }
    }
}

impl fmt::Display for GatekeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Self::MalformedToken(msg) => write!(f, "Malformed token: {}", msg),
            Self::InvalidSignature => write!(f, "Invalid token signature"),
            Self::ExpiredToken => write!(f, "Token expired"),
            Self::TokenNotYetValid => write!(f, "Token not yet valid"),
            Self::TokenRevoked => write!(f, "Token has been revoked"),
            Self::InvalidRefreshToken => write!(f, "Invalid or expired refresh token"),
            Self::InvalidOneTimeToken => write!(f, "Invalid or expired token"),
            Self::InvalidCredentials => write!(f, "Invalid credentials"),
            Self::WeakPassword => write!(
                f,
                "Password must be at least 8 characters and contain upper-case, lower-case and digit characters"
            ),
            Self::UniqueConstraintViolation(what) => {
                write!(f, "Unique constraint violation: {}", what)
            }
            Self::UserNotFound => write!(f, "User not found"),
            Self::PasswordHashError(msg) => write!(f, "Password hashing error: {}", msg),
            Self::Unauthorized => write!(f, "Unauthorized access"),
            Self::Forbidden => write!(f, "Insufficient permissions"),
            Self::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Self::StorageError(msg) => write!(f, "Storage error: {}", msg),
            Self::SystemError(msg) => write!(f, "System error: {}", msg),
        }
    }
}

impl Error for GatekeyError {}

impl From<jsonwebtoken::errors::Error> for GatekeyError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            // A foreign algorithm is treated the same as a foreign key
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                GatekeyError::InvalidSignature
            }
            ErrorKind::ExpiredSignature => GatekeyError::ExpiredToken,
            ErrorKind::ImmatureSignature => GatekeyError::TokenNotYetValid,
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_)
            | ErrorKind::MissingRequiredClaim(_) => GatekeyError::MalformedToken(err.to_string()),
            _ => GatekeyError::SystemError(format!("JWT processing failed: {}", err)),
        }
    }
}

impl From<argon2::password_hash::Error> for GatekeyError {
    fn from(err: argon2::password_hash::Error) -> Self {
        GatekeyError::PasswordHashError(err.to_string())
    }
}

impl From<serde_json::Error> for GatekeyError {
    fn from(err: serde_json::Error) -> Self {
        GatekeyError::ValidationError(format!("Invalid JSON: {}", err))
    }
}

// Generic result type for Gatekey
pub type Result<T> = std::result::Result<T, GatekeyError>;
