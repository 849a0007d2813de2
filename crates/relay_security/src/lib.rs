//! Relay orchestrator security module.
//!
//! Provides:
//! - **Signing**: unkeyed content-identity hashing (cache keys, checksums)
//! - **Tokens**: HMAC-based scoped bearer tokens for file-download authorization
//!
//! The two are deliberately kept apart: a content hash proves "same bytes",
//! never "authorized caller". Using one in place of the other is a bug, not
//! a simplification — see [`tokens`] for the access-control primitive and
//! [`signing`] for the identity primitive.

pub mod signing;
pub mod tokens;

pub use tokens::{DownloadToken, TokenError};
