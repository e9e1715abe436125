//! Security utilities

pub mod timing;

pub use timing::AuthTimer;
