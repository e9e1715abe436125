//! Delivery of e-mail verification and password reset tokens

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::auth::user::Email;
use crate::error::Result;

/// Kind of account message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailKind {
    EmailVerification,
    PasswordReset,
}

/// A message handed to the mailer
#[derive(Debug, Clone, PartialEq)]
pub struct AccountMail {
    pub to: Email,
    pub kind: MailKind,
    pub token: String,
}

/// Outgoing mail transport
#[async_trait]
pub trait AccountMailer: Send + Sync {
    async fn send(&self, mail: AccountMail) -> Result<()>;
}

/// Shared reference to a mailer
pub type SharedAccountMailer = Arc<dyn AccountMailer>;

/// Writes messages to the log instead of sending them.
///
/// Tokens are only printed when `reveal_tokens` is set, which the server does in
/// development mode.
#[derive(Debug, Default)]
pub struct LogMailer {
    reveal_tokens: bool,
}

impl LogMailer {
    pub fn new(reveal_tokens: bool) -> Self {
        Self { reveal_tokens }
    }
}

#[async_trait]
impl AccountMailer for LogMailer {
    async fn send(&self, mail: AccountMail) -> Result<()> {
        if self.reveal_tokens {
            log::info!("Mail {:?} to {}: token {}", mail.kind, mail.to, mail.token);
        } else {
            log::warn!(
                "No mail transport configured, {:?} mail to {} was not delivered",
                mail.kind,
                mail.to
            );
        }
        Ok(())
    }
}

/// Keeps sent messages in memory
#[derive(Debug, Default)]
pub struct OutboxMailer {
    sent: RwLock<Vec<AccountMail>>,
}

impl OutboxMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<AccountMail> {
        self.sent.read().await.clone()
    }

    /// Token of the most recent message of `kind` sent to `to`
    pub async fn last_token(&self, to: &str, kind: MailKind) -> Option<String> {
        let to = Email::parse(to).ok()?;
        self.sent
            .read()
            .await
            .iter()
            .rev()
            .find(|mail| mail.to == to && mail.kind == kind)
            .map(|mail| mail.token.clone())
    }
}

#[async_trait]
impl AccountMailer for OutboxMailer {
    async fn send(&self, mail: AccountMail) -> Result<()> {
        self.sent.write().await.push(mail);
        Ok(())
    }
}
