//! Webhook body signing.
//!
//! The signature header has the form `t=<unix>,v1=<hex-hmac-sha256>`
//! where the MAC is computed over `"{t}.{body}"` with the tenant
//! secret. Retries reuse the job's stored signature, so `t` stays
//! stable across attempts and receivers can verify any delivery.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Compute the `x-invorto-signature` header value.
pub fn sign(secret: &str, timestamp: i64, body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(format!("{timestamp}.{body}").as_bytes());
    let digest = hex::encode(mac.finalize().into_bytes());
    format!("t={timestamp},v1={digest}")
}

/// Verify a received signature header against a body.
///
/// Constant-time comparison on the digest to prevent timing attacks.
pub fn verify(secret: &str, header: &str, body: &str) -> bool {
    let mut timestamp: Option<i64> = None;
    let mut digest: Option<&str> = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse().ok(),
            Some(("v1", v)) => digest = Some(v),
            _ => {}
        }
    }
    let (Some(timestamp), Some(digest)) = (timestamp, digest) else {
        return false;
    };

    let expected = sign(secret, timestamp, body);
    let expected_digest = match expected.split_once(",v1=") {
        Some((_, d)) => d,
        None => return false,
    };
    expected_digest.as_bytes().ct_eq(digest.as_bytes()).into()
}
