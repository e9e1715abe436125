//! Storage interfaces and in-memory backends

pub mod memory;
pub mod token_revocation;
pub mod traits;

pub use memory::{MemoryCredentialStore, MemoryOneTimeTokenStore, MemoryRefreshTokenStore};
pub use token_revocation::{
    MemoryTokenRevocationStore, RevocationReason, RevocationStats, RevokedToken,
    SharedTokenRevocationStore, TokenRevocationStore,
};
pub use traits::{
    CredentialStore, OneTimeTokenPurpose, OneTimeTokenStore, RefreshTokenStore,
    SharedCredentialStore, SharedOneTimeTokenStore, SharedRefreshTokenStore,
};
