//! Shared webhook signature primitives used by the adapters.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over `message`, hex-encoded.
pub fn hmac_sha256_hex(secret: &str, message: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time string comparison for signature checks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Whether a signed unix timestamp is within the accepted clock skew.
pub fn timestamp_within_tolerance(ts: i64, tolerance_secs: u64) -> bool {
    let now = chrono::Utc::now().timestamp();
    (now - ts).unsigned_abs() <= tolerance_secs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_is_deterministic_and_keyed() {
        let a = hmac_sha256_hex("secret", b"payload");
        let b = hmac_sha256_hex("secret", b"payload");
        let c = hmac_sha256_hex("other", b"payload");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn constant_time_eq_rejects_length_mismatch() {
        assert!(!constant_time_eq("abc", "abcd"));
        assert!(constant_time_eq("abcd", "abcd"));
        assert!(!constant_time_eq("abcd", "abce"));
    }

    #[test]
    fn stale_timestamps_are_rejected() {
        let now = chrono::Utc::now().timestamp();
        assert!(timestamp_within_tolerance(now, 300));
        assert!(!timestamp_within_tolerance(now - 301, 300));
        assert!(!timestamp_within_tolerance(now + 400, 300));
    }
}
