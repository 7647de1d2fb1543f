//! Keyed order-revealing tokens for Range-class fields.
//!
//! An in-domain ordinal is bucketed by the field's precision, then mapped to
//! `bucket * sparsity + (PRF(key, bucket) mod sparsity)`. The PRF offset is
//! strictly below the sparsity stride, so tokens are monotone across buckets
//! while the exact bucket boundaries are not recoverable without the key.
//! Values within the same bucket share a token: that is the declared
//! precision limit, not a defect.
//!
//! Tokens reveal relative order within the declared domain and nothing else;
//! the exact plaintext travels separately as sealed AEAD ciphertext.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tourmaline_policy::RangeDomain;

type HmacSha256 = Hmac<Sha256>;

/// Maps an in-domain ordinal to its order-revealing token.
///
/// Callers must have checked [`RangeDomain::contains`] first; this is
/// enforced in debug builds.
pub fn range_token(ore_key: &[u8; 32], domain: &RangeDomain, ordinal: i64) -> u64 {
    debug_assert!(domain.contains(ordinal), "ordinal outside declared domain");

    let bucket = domain.bucket(ordinal);
    let stride = u64::from(domain.sparsity);
    let offset = prf_u64(ore_key, bucket) % stride;

    // Domain validation bounded bucket_count * sparsity at registry build
    // time, so this cannot overflow.
    bucket * stride + offset
}

/// Keyed PRF over a bucket index.
fn prf_u64(key: &[u8; 32], bucket: u64) -> u64 {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(&bucket.to_be_bytes());
    let digest = mac.finalize().into_bytes();
    u64::from_be_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KEY: [u8; 32] = [0x5a; 32];

    fn domain() -> RangeDomain {
        RangeDomain::new(0, 10_000, 10, 4)
    }

    #[test]
    fn test_token_deterministic() {
        let d = domain();
        assert_eq!(range_token(&KEY, &d, 500), range_token(&KEY, &d, 500));
    }

    #[test]
    fn test_same_bucket_same_token() {
        let d = domain();
        // 500..509 all fall in bucket 50
        assert_eq!(range_token(&KEY, &d, 500), range_token(&KEY, &d, 509));
    }

    #[test]
    fn test_adjacent_buckets_ordered() {
        let d = domain();
        assert!(range_token(&KEY, &d, 509) < range_token(&KEY, &d, 510));
    }

    #[test]
    fn test_key_changes_offsets() {
        let d = domain();
        let other_key = [0xa5; 32];
        // Same ordering structure, but offsets differ for at least one of a
        // handful of buckets (overwhelmingly likely with sparsity 4).
        let differs = (0..16).any(|i| {
            let ordinal = i * 10;
            range_token(&KEY, &d, ordinal) != range_token(&other_key, &d, ordinal)
        });
        assert!(differs);
    }

    proptest! {
        #[test]
        fn prop_tokens_monotone(a in 0i64..=10_000, b in 0i64..=10_000) {
            let d = domain();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(range_token(&KEY, &d, lo) <= range_token(&KEY, &d, hi));
        }

        #[test]
        fn prop_bucket_apart_distinguishable(a in 0i64..=9_000) {
            // Values a full precision step apart always have distinct,
            // ordered tokens.
            let d = domain();
            let b = a + d.precision;
            prop_assert!(range_token(&KEY, &d, a) < range_token(&KEY, &d, b));
        }

        #[test]
        fn prop_token_in_bucket_stride(v in 0i64..=10_000) {
            let d = domain();
            let token = range_token(&KEY, &d, v);
            let stride = u64::from(d.sparsity);
            prop_assert_eq!(token / stride, d.bucket(v));
        }
    }
}
