//! Credential domain models: secrets, the access/refresh pair, and decoded token claims.

pub mod claims;
pub mod credential;
pub mod secret;

pub use claims::*;
pub use credential::*;
pub use secret::*;
