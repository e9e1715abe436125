//! Authentication: token issuance and verification, credentials and the login flow

pub mod clock;
pub mod mailer;
pub mod password;
pub mod service;
pub mod token;
pub mod user;

// Re-export main components
pub use clock::{Clock, ManualClock, SystemClock};
pub use mailer::{AccountMail, AccountMailer, LogMailer, MailKind, OutboxMailer};
pub use password::PasswordHasher;
pub use service::{AuthService, AuthSession, AuthSettings, AuthStats, AuthStores, RegisterRequest};
pub use token::{extract_bearer_token, Claims, IssuedToken, TokenService};
pub use user::{CredentialRecord, Email, NewCredential, UserProfile, UserRole};
