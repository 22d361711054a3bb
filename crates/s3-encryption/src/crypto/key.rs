//! [`EnvelopeKey`]: the per-object content encryption key and IV.

use aes_gcm::aead::{rand_core::RngCore, OsRng};
use common::protocol::ENVELOPE_KEY_LEN;
use common::{ContentCipher, CryptoError};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Fresh key material for exactly one object.
///
/// The key bytes are overwritten with zeroes on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EnvelopeKey {
    #[zeroize(skip)]
    cipher: ContentCipher,
    key: [u8; ENVELOPE_KEY_LEN],
    iv: Vec<u8>,
}

impl EnvelopeKey {
    /// Generate a random key and IV for `cipher` from the OS CSPRNG.
    ///
    /// `OsRng` is stateless, so concurrent uploads draw independent values.
    pub fn generate(cipher: ContentCipher) -> Self {
        let mut key = [0u8; ENVELOPE_KEY_LEN];
        OsRng.fill_bytes(&mut key);
        let mut iv = vec![0u8; cipher.iv_len()];
        OsRng.fill_bytes(&mut iv);
        Self { cipher, key, iv }
    }

    /// Rebuild a key from unwrapped material and a stored IV.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidLength`] if either input has the wrong length.
    pub fn from_parts(
        cipher: ContentCipher,
        key: Zeroizing<Vec<u8>>,
        iv: &[u8],
    ) -> Result<Self, CryptoError> {
        if key.len() != ENVELOPE_KEY_LEN {
            return Err(CryptoError::InvalidLength {
                what: "envelope key",
                expected: ENVELOPE_KEY_LEN,
                actual: key.len(),
            });
        }
        if iv.len() != cipher.iv_len() {
            return Err(CryptoError::InvalidLength {
                what: "iv",
                expected: cipher.iv_len(),
                actual: iv.len(),
            });
        }
        let mut buf = [0u8; ENVELOPE_KEY_LEN];
        buf.copy_from_slice(&key);
        Ok(Self {
            cipher,
            key: buf,
            iv: iv.to_vec(),
        })
    }

    pub fn cipher(&self) -> ContentCipher {
        self.cipher
    }

    pub fn key_bytes(&self) -> &[u8] {
        &self.key
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }
}

impl std::fmt::Debug for EnvelopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeKey")
            .field("cipher", &self.cipher)
            .field("key", &"[REDACTED]")
            .finish()
    }
}
