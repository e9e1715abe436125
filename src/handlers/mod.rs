//! Request handlers for the HTTP API

pub mod auth;

pub use auth::{auth_routes, SharedAuthService};
