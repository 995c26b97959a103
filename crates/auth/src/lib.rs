//! `tradepost-auth` — the identity capability the pipeline consumes.
//!
//! This crate is intentionally decoupled from HTTP and storage: it verifies
//! credentials and validates claims, nothing more. Token issuance lives
//! elsewhere.

pub mod claims;
pub mod resolver;
pub mod roles;

pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use resolver::{AuthError, Hs256TokenResolver, TokenResolver};
pub use roles::Role;
