//! Gatekey - JWT authentication service
//!
//! This library issues and verifies signed, time-bounded tokens and runs the
//! credential-backed login flow on top of them.

pub mod auth;
pub mod config;
pub mod constants;
pub mod error;
pub mod handlers;
pub mod security;
pub mod security_logger;
pub mod storage;

// Re-export main components
pub use config::AuthConfig;
pub use error::{GatekeyError, Result};
