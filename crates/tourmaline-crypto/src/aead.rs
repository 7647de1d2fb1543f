//! AES-256-GCM sealing with the nonce carried in the ciphertext.
//!
//! Wire layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`. The
//! associated data binds the `(entity, field)` pair so ciphertext cannot be
//! transplanted between fields without detection.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::{CryptoError, Result};

/// Nonce length for AES-GCM.
pub const NONCE_LEN: usize = 12;

/// Authentication tag length for AES-GCM.
pub const TAG_LEN: usize = 16;

/// Encrypts `plaintext` under `key` with the given nonce, prepending the
/// nonce to the output.
pub fn seal(key: &[u8; 32], nonce: &[u8; NONCE_LEN], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| CryptoError::Configuration("invalid AES-256 key length".to_string()))?;

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Configuration("AEAD encryption failed".to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts a `nonce || ciphertext || tag` blob produced by [`seal`].
///
/// Any tamper, truncation, wrong key, or wrong associated data yields
/// [`CryptoError::DecryptionFailed`]; partial plaintext is never returned.
pub fn open(key: &[u8; 32], blob: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::DecryptionFailed);
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| CryptoError::Configuration("invalid AES-256 key length".to_string()))?;

    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x42; 32];
    const NONCE: [u8; 12] = [0x01; 12];

    #[test]
    fn test_seal_open_roundtrip() {
        let blob = seal(&KEY, &NONCE, b"secret value", b"patient/ssn").unwrap();
        let plain = open(&KEY, &blob, b"patient/ssn").unwrap();
        assert_eq!(plain, b"secret value");
    }

    #[test]
    fn test_nonce_is_prepended() {
        let blob = seal(&KEY, &NONCE, b"x", b"").unwrap();
        assert_eq!(&blob[..NONCE_LEN], &NONCE);
        assert_eq!(blob.len(), NONCE_LEN + 1 + TAG_LEN);
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let mut blob = seal(&KEY, &NONCE, b"secret value", b"").unwrap();
        blob[NONCE_LEN] ^= 0xFF;
        assert!(matches!(
            open(&KEY, &blob, b""),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_tampered_tag_rejected() {
        let mut blob = seal(&KEY, &NONCE, b"secret value", b"").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        assert!(matches!(
            open(&KEY, &blob, b""),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let blob = seal(&KEY, &NONCE, b"secret value", b"").unwrap();
        let wrong = [0x43; 32];
        assert!(matches!(
            open(&wrong, &blob, b""),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_wrong_aad_rejected() {
        // Ciphertext bound to one field must not open under another
        let blob = seal(&KEY, &NONCE, b"secret value", b"patient/ssn").unwrap();
        assert!(matches!(
            open(&KEY, &blob, b"patient/notes"),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_truncated_blob_rejected() {
        assert!(matches!(
            open(&KEY, &[0u8; 10], b""),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_empty_plaintext() {
        let blob = seal(&KEY, &NONCE, b"", b"aad").unwrap();
        assert_eq!(blob.len(), NONCE_LEN + TAG_LEN);
        assert_eq!(open(&KEY, &blob, b"aad").unwrap(), b"");
    }
}
