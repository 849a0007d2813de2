//! Scoped bearer tokens for file-download authorization.
//!
//! A `file-downloads` instruction embedded in a job's submission payload
//! carries a token scoped to exactly one `(file-id, expiry)` pair, so a node
//! fetching the file cannot reuse the credential for anything else. This is
//! a keyed MAC, not the unkeyed content hash in [`crate::signing`]: the two
//! answer different questions and must not be interchanged.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Error verifying or minting a download token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    Expired,
    Malformed,
    Mismatch,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::Expired => write!(f, "download token expired"),
            TokenError::Malformed => write!(f, "download token malformed"),
            TokenError::Mismatch => write!(f, "download token does not match file"),
        }
    }
}

impl std::error::Error for TokenError {}

/// A verified or freshly-minted scoped download token.
///
/// Wire form is `<unix-expiry>.<hex-mac>`; the file-id is never embedded in
/// the token itself (the caller names the file-id it expects and the MAC
/// proves the server issued a token for that exact id+expiry pair).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadToken(String);

impl DownloadToken {
    /// Mint a token authorizing `file_id` for `ttl_secs` from now.
    pub fn mint(key: &[u8], file_id: &str, ttl_secs: u64) -> Self {
        let expiry = now_unix() + ttl_secs;
        let mac_hex = compute_mac(key, file_id, expiry);
        Self(format!("{expiry}.{mac_hex}"))
    }

    /// Verify that `self` authorizes `file_id` right now.
    pub fn verify(&self, key: &[u8], file_id: &str) -> Result<(), TokenError> {
        let (expiry_str, mac_hex) = self.0.split_once('.').ok_or(TokenError::Malformed)?;
        let expiry: u64 = expiry_str.parse().map_err(|_| TokenError::Malformed)?;
        if now_unix() > expiry {
            return Err(TokenError::Expired);
        }
        let expected = compute_mac(key, file_id, expiry);
        if constant_time_eq(&expected, mac_hex) {
            Ok(())
        } else {
            Err(TokenError::Mismatch)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DownloadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DownloadToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

fn compute_mac(key: &[u8], file_id: &str, expiry: u64) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(file_id.as_bytes());
    mac.update(&[0x1f]);
    mac.update(expiry.to_string().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"test-signing-key";

    #[test]
    fn mints_and_verifies_for_the_scoped_file() {
        let token = DownloadToken::mint(KEY, "file-123", 60);
        assert!(token.verify(KEY, "file-123").is_ok());
    }

    #[test]
    fn rejects_a_different_file_id() {
        let token = DownloadToken::mint(KEY, "file-123", 60);
        assert_eq!(token.verify(KEY, "file-456"), Err(TokenError::Mismatch));
    }

    #[test]
    fn rejects_wrong_key() {
        let token = DownloadToken::mint(KEY, "file-123", 60);
        assert_eq!(
            token.verify(b"some-other-key", "file-123"),
            Err(TokenError::Mismatch)
        );
    }

    #[test]
    fn rejects_expired_token() {
        let token = DownloadToken::mint(KEY, "file-123", 0);
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert_eq!(token.verify(KEY, "file-123"), Err(TokenError::Expired));
    }

    #[test]
    fn rejects_malformed_wire_form() {
        let token = DownloadToken::from("not-a-valid-token".to_string());
        assert_eq!(token.verify(KEY, "file-123"), Err(TokenError::Malformed));
    }
}
