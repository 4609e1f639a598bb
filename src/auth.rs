//! Deterministic per-request auth token construction and verification.
//!
//! Only the signature construction itself is in scope here. Wiring a
//! token store, a discovery flow, or a credential manager around it is a
//! separate, heavier concern not reused here -- see DESIGN.md.
//!
//! A token signs `user NUL method NUL params NUL nonce` with HMAC-SHA256
//! under a shared secret, where `nonce = floor(unix_time / 15)`. A
//! verifier accepts the current nonce window and its immediate neighbors
//! (±1, i.e. a 45-second sliding window) to tolerate clock skew between
//! peers without widening the window enough to make replay practical.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{JrpcError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Width, in seconds, of one nonce window.
const NONCE_WINDOW_SECS: i64 = 15;

/// How many windows on either side of "now" a presented token may fall
/// into and still be accepted.
const NONCE_TOLERANCE: i64 = 1;

/// Computes the current nonce: the Unix timestamp divided (floor) by the
/// window width.
fn current_nonce() -> i64 {
    chrono::Utc::now().timestamp() / NONCE_WINDOW_SECS
}

fn sign(secret: &[u8], user: &str, method: &str, params: &str, nonce: i64) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| JrpcError::Auth(format!("invalid secret length: {e}")))?;
    mac.update(user.as_bytes());
    mac.update(&[0u8]);
    mac.update(method.as_bytes());
    mac.update(&[0u8]);
    mac.update(params.as_bytes());
    mac.update(&[0u8]);
    mac.update(nonce.to_string().as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Issues a token for `user` calling `method` with `params` (the
/// canonical JSON text of the request's params, exactly as it will be
/// sent), signed under `secret` for the current nonce window.
pub fn issue(secret: &[u8], user: &str, method: &str, params: &str) -> Result<String> {
    sign(secret, user, method, params, current_nonce())
}

/// Verifies `token` against `user`/`method`/`params` under `secret`,
/// accepting the current nonce window or either immediate neighbor.
///
/// Returns `Ok(())` on a valid token, `Err` otherwise. Errors do not
/// distinguish "wrong signature" from "stale nonce" to avoid giving an
/// attacker a timing oracle on which check failed first.
pub fn verify(secret: &[u8], user: &str, method: &str, params: &str, token: &str) -> Result<()> {
    let now = current_nonce();
    for offset in -NONCE_TOLERANCE..=NONCE_TOLERANCE {
        let candidate = sign(secret, user, method, params, now + offset)?;
        if constant_time_eq(candidate.as_bytes(), token.as_bytes()) {
            return Ok(());
        }
    }
    Err(JrpcError::Auth("token invalid or expired".to_string()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
