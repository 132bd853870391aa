//! Random secrets handed to clients, and the digests we keep of them.

use anyhow::Context;
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, Rng, RngCore};
use sha2::{Digest, Sha256};

const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LEN: usize = 8;
const TOKEN_BYTES: usize = 32;

#[derive(Clone, Copy, Debug, Default)]
pub struct TokenIssuer;

impl TokenIssuer {
    /// 256-bit session token, URL-safe base64.
    pub fn session_token(&self) -> anyhow::Result<String> {
        random_token().context("failed to generate session token")
    }

    /// 256-bit password-reset capability, URL-safe base64.
    pub fn reset_token(&self) -> anyhow::Result<String> {
        random_token().context("failed to generate password reset token")
    }

    /// Short human-typed code. Compensated by expiry, single use and throttling.
    pub fn verification_code(&self) -> String {
        let mut rng = OsRng;
        (0..CODE_LEN)
            .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
            .collect()
    }
}

fn random_token() -> Result<String, rand::Error> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Digest stored in place of a raw secret.
pub fn digest(secret: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().to_vec()
}

/// Verification codes are typed by people; compare them case-insensitively.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}
