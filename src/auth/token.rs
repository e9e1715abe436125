use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::auth::clock::{Clock, SystemClock};
use crate::constants::{MAX_TOKEN_EXPIRY_SECS, MAX_TOKEN_LENGTH};
use crate::error::{GatekeyError, Result};

/// Issued-at claim (unix seconds)
pub const CLAIM_ISSUED_AT: &str = "iat";
/// Expiration claim (unix seconds)
pub const CLAIM_EXPIRES_AT: &str = "exp";
/// Not-before claim (unix seconds)
pub const CLAIM_NOT_BEFORE: &str = "nbf";
/// Token identifier, used as the revocation key
pub const CLAIM_TOKEN_ID: &str = "jti";
/// Subject claim
pub const CLAIM_SUBJECT: &str = "sub";

/// Claims injected by the service. Caller values under these keys are overwritten.
pub const RESERVED_CLAIMS: [&str; 4] = [
    CLAIM_ISSUED_AT,
    CLAIM_EXPIRES_AT,
    CLAIM_NOT_BEFORE,
    CLAIM_TOKEN_ID,
];

/// Decoded, verified token payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);

impl Claims {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns a string claim
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn issued_at(&self) -> Option<i64> {
        self.0.get(CLAIM_ISSUED_AT).and_then(Value::as_i64)
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.0.get(CLAIM_EXPIRES_AT).and_then(Value::as_i64)
    }

    pub fn not_before(&self) -> Option<i64> {
        self.0.get(CLAIM_NOT_BEFORE).and_then(Value::as_i64)
    }

    pub fn token_id(&self) -> Option<&str> {
        self.get_str(CLAIM_TOKEN_ID)
    }

    pub fn subject(&self) -> Option<&str> {
        self.get_str(CLAIM_SUBJECT)
    }

    /// A token without an expiry is never considered live
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at().map_or(true, |exp| now >= exp)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Claims> for Map<String, Value> {
    fn from(claims: Claims) -> Self {
        claims.0
    }
}

/// A freshly signed token with its expiry and id
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: i64,
    pub token_id: String,
}

/// Issues and verifies HS256-signed, time-bounded tokens.
///
/// The service holds no mutable state: keys, validation rules and the clock
/// are fixed at construction, so one instance can be shared across tasks.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    header: Header,
    validation: Validation,
    default_expiry_secs: u64,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    /// Creates a token service signing with `secret`.
    ///
    /// Fails with a configuration error when the secret is empty or the
    /// default lifetime is zero or above `MAX_TOKEN_EXPIRY_SECS`.
    pub fn new(secret: &str, default_expiry_secs: u64) -> Result<Self> {
        if secret.is_empty() {
            return Err(GatekeyError::ConfigError(
                "A signing secret is required to create the token service".to_string(),
            ));
        }
        if default_expiry_secs == 0 || default_expiry_secs > MAX_TOKEN_EXPIRY_SECS {
            return Err(GatekeyError::ConfigError(format!(
                "Default token expiry must be between 1 and {} seconds",
                MAX_TOKEN_EXPIRY_SECS
            )));
        }

        // Expiry is checked against our own clock with an inclusive cutoff,
        // so the library only verifies structure, algorithm and signature.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::new();

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            header: Header::new(Algorithm::HS256),
            validation,
            default_expiry_secs,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn default_expiry_secs(&self) -> u64 {
        self.default_expiry_secs
    }

    /// Current time according to the service clock
    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    /// Signs `payload` into a token that expires `expiry_secs` seconds from now
    /// (or after the default lifetime).
    ///
    /// `iat`, `nbf`, `exp` and a random `jti` are merged into the payload.
    pub fn generate(&self, payload: Map<String, Value>, expiry_secs: Option<u64>) -> Result<String> {
        self.issue(payload, expiry_secs).map(|issued| issued.token)
    }

    /// Same as `generate`, also returning the injected `exp` and `jti`
    pub fn issue(&self, payload: Map<String, Value>, expiry_secs: Option<u64>) -> Result<IssuedToken> {
        let lifetime = expiry_secs.unwrap_or(self.default_expiry_secs);
        if lifetime == 0 || lifetime > MAX_TOKEN_EXPIRY_SECS {
            return Err(GatekeyError::ValidationError(format!(
                "Token lifetime must be between 1 and {} seconds",
                MAX_TOKEN_EXPIRY_SECS
            )));
        }
        let lifetime = i64::try_from(lifetime).map_err(|_| {
            GatekeyError::ValidationError("Token lifetime is out of range".to_string())
        })?;

        let issued_at = self.clock.now();
        let expires_at = issued_at.checked_add(lifetime).ok_or_else(|| {
            GatekeyError::ValidationError("Token lifetime is out of range".to_string())
        })?;
        let token_id = uuid::Uuid::new_v4().simple().to_string();

        let mut claims = payload;
        claims.insert(CLAIM_ISSUED_AT.to_string(), Value::from(issued_at));
        claims.insert(CLAIM_NOT_BEFORE.to_string(), Value::from(issued_at));
        claims.insert(CLAIM_EXPIRES_AT.to_string(), Value::from(expires_at));
        claims.insert(CLAIM_TOKEN_ID.to_string(), Value::from(token_id.clone()));

        let token = encode(&self.header, &claims, &self.encoding_key)
            .map_err(|e| GatekeyError::SystemError(format!("Failed to generate token: {}", e)))?;

        Ok(IssuedToken {
            token,
            expires_at,
            token_id,
        })
    }

    /// Verifies signature and validity window, returning the claims unchanged.
    ///
    /// The signature is checked before the payload is decoded. The token is
    /// rejected once the clock reaches `exp`.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        if token.len() > MAX_TOKEN_LENGTH {
            return Err(GatekeyError::MalformedToken("Token too long".to_string()));
        }

        let data = decode::<Map<String, Value>>(token, &self.decoding_key, &self.validation)?;
        let claims = Claims(data.claims);

        let expires_at = claims.expires_at().ok_or_else(|| {
            GatekeyError::MalformedToken("Missing or non-integer exp claim".to_string())
        })?;

        let now = self.clock.now();
        if now >= expires_at {
            return Err(GatekeyError::ExpiredToken);
        }
        if let Some(not_before) = claims.not_before() {
            if now < not_before {
                return Err(GatekeyError::TokenNotYetValid);
            }
        }

        Ok(claims)
    }
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("algorithm", &self.header.alg)
            .field("default_expiry_secs", &self.default_expiry_secs)
            .finish_non_exhaustive()
    }
}

/// Extracts bearer token from Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
