//! Security-focused logging module to track authentication events

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Types of security events to track
#[derive(Debug, Clone, PartialEq)]
pub enum SecurityEvent {
    AuthenticationFailed { email: String, reason: String },
    AuthenticationSuccess { user_id: i64 },
    UserRegistered { user_id: i64 },
    TokenValidationFailed { reason: String },
    TokenRevoked { user_id: String, token_id: String },
    RefreshTokenRejected,
    EmailVerified { user_id: i64 },
    PasswordResetRequested { email: String, known: bool },
    PasswordReset { user_id: i64 },
    PermissionDenied { user_id: String, action: String },
    ConfigurationError { component: String, error: String },
}

impl SecurityEvent {
    /// Counter key for this kind of event
    pub fn key(&self) -> &'static str {
        match self {
            SecurityEvent::AuthenticationFailed { .. } => "auth_failed",
            SecurityEvent::AuthenticationSuccess { .. } => "auth_success",
            SecurityEvent::UserRegistered { .. } => "user_registered",
            SecurityEvent::TokenValidationFailed { .. } => "token_validation_failed",
            SecurityEvent::TokenRevoked { .. } => "token_revoked",
            SecurityEvent::RefreshTokenRejected => "refresh_rejected",
            SecurityEvent::EmailVerified { .. } => "email_verified",
            SecurityEvent::PasswordResetRequested { .. } => "password_reset_requested",
            SecurityEvent::PasswordReset { .. } => "password_reset",
            SecurityEvent::PermissionDenied { .. } => "permission_denied",
            SecurityEvent::ConfigurationError { .. } => "config_error",
        }
    }
}

#[derive(Debug, Clone)]
struct TimestampedEvent {
    event: SecurityEvent,
    timestamp: Instant,
}

/// Security logger for tracking and alerting on security events
#[derive(Debug)]
pub struct SecurityLogger {
    events: RwLock<Vec<TimestampedEvent>>,
    event_counts: RwLock<HashMap<&'static str, usize>>,
    max_events: usize,
    alert_thresholds: HashMap<&'static str, usize>,
}

impl SecurityLogger {
    pub fn new() -> Self {
        let mut alert_thresholds = HashMap::new();
        alert_thresholds.insert("auth_failed", 5);
        alert_thresholds.insert("token_validation_failed", 10);
        alert_thresholds.insert("refresh_rejected", 5);
        alert_thresholds.insert("password_reset_requested", 10);
        alert_thresholds.insert("permission_denied", 3);
        alert_thresholds.insert("config_error", 1);

        Self {
            events: RwLock::new(Vec::new()),
            event_counts: RwLock::new(HashMap::new()),
            max_events: 10000,
            alert_thresholds,
        }
    }

    /// Log a security event
    pub async fn log_event(&self, event: SecurityEvent) {
        let event_key = event.key();

        {
            let mut events = self.events.write().await;
            events.push(TimestampedEvent {
                event: event.clone(),
                timestamp: Instant::now(),
            });

            // Limit memory usage
            if events.len() > self.max_events {
                let events_to_remove = events.len() - self.max_events;
                events.drain(0..events_to_remove);
            }
        }

        {
            let mut counts = self.event_counts.write().await;
            let count = counts.entry(event_key).or_insert(0);
            *count += 1;

            if let Some(&threshold) = self.alert_thresholds.get(event_key) {
                if *count % threshold == 0 {
                    log::error!(
                        "SECURITY ALERT: {} events of type '{}' detected, latest: {:?}",
                        count,
                        event_key,
                        event
                    );
                }
            }
        }

        match event {
            SecurityEvent::AuthenticationFailed { email, reason } => {
                log::warn!("SECURITY: Authentication failed - Email: {}, Reason: {}", email, reason);
            }
            SecurityEvent::AuthenticationSuccess { user_id } => {
                log::info!("SECURITY: Authentication success - User: {}", user_id);
            }
            SecurityEvent::UserRegistered { user_id } => {
                log::info!("SECURITY: User registered - User: {}", user_id);
            }
            SecurityEvent::TokenValidationFailed { reason } => {
                log::warn!("SECURITY: Token validation failed - Reason: {}", reason);
            }
            SecurityEvent::TokenRevoked { user_id, token_id } => {
                log::info!("SECURITY: Token revoked - User: {}, Token: {}", user_id, token_id);
            }
            SecurityEvent::RefreshTokenRejected => {
                log::warn!("SECURITY: Refresh token rejected");
            }
            SecurityEvent::EmailVerified { user_id } => {
                log::info!("SECURITY: Email verified - User: {}", user_id);
            }
            SecurityEvent::PasswordResetRequested { email, known } => {
                log::info!(
                    "SECURITY: Password reset requested - Email: {}, Known: {}",
                    email,
                    known
                );
            }
            SecurityEvent::PasswordReset { user_id } => {
                log::warn!("SECURITY: Password reset completed - User: {}", user_id);
            }
            SecurityEvent::PermissionDenied { user_id, action } => {
                log::warn!("SECURITY: Permission denied - User: {}, Action: {}", user_id, action);
            }
            SecurityEvent::ConfigurationError { component, error } => {
                log::error!("SECURITY: Configuration error - Component: {}, Error: {}", component, error);
            }
        }
    }

    /// Get recent security events
    pub async fn get_recent_events(&self, duration: Duration) -> Vec<SecurityEvent> {
        let events = self.events.read().await;
        let now = Instant::now();

        events
            .iter()
            .filter(|event| now.duration_since(event.timestamp) <= duration)
            .map(|event| event.event.clone())
            .collect()
    }

    /// Get event statistics
    pub async fn get_event_stats(&self) -> HashMap<&'static str, usize> {
        self.event_counts.read().await.clone()
    }

    /// Clean up old events
    pub async fn cleanup_old_events(&self, max_age: Duration) {
        let mut events = self.events.write().await;
        let now = Instant::now();
        events.retain(|event| now.duration_since(event.timestamp) <= max_age);
    }

    /// Start periodic cleanup task
    pub fn start_cleanup_task(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300)); // Every 5 minutes
            loop {
                interval.tick().await;
                self.cleanup_old_events(Duration::from_secs(3600 * 24)).await; // Keep 24 hours
            }
        })
    }
}

impl Default for SecurityLogger {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared reference to the security logger
pub type SharedSecurityLogger = Arc<SecurityLogger>;
