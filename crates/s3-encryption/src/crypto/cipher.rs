//! Streaming content ciphers for object bodies.
//!
//! **AES-256-GCM (authenticated):** the body is cut into frames of
//! [`FRAME_LEN`] plaintext bytes. Each frame is sealed independently:
//!
//! ```text
//! nonce_i = iv XOR (0u32 || i as u64 BE)
//! aad_i   = "AES/GCM/NoPadding" || i as u64 BE || last flag
//! frame_i = AES-256-GCM(key, nonce_i, aad_i, plaintext_i) = ciphertext_i || tag_i
//! ```
//!
//! A frame's plaintext is written only after its tag verifies, and the final
//! frame carries the `last` flag so truncation at a frame boundary is detected.
//! Memory use is two frames regardless of object size.
//!
//! **AES-256-CTR (encryption only):** a plain keystream over the body. No
//! integrity protection.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use common::{ContentCipher, CryptoError, EncryptionError, TransportError};
use ctr::cipher::{KeyIvInit, StreamCipher};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zeroize::Zeroizing;

use super::key::EnvelopeKey;

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// Plaintext bytes per authenticated frame.
pub const FRAME_LEN: usize = 64 * 1024;

/// AES-GCM tag length in bytes.
pub const TAG_LEN: usize = 16;

const SEALED_FRAME_LEN: usize = FRAME_LEN + TAG_LEN;

/// Length of the ciphertext produced for `plaintext_len` bytes of input.
pub fn ciphertext_len(cipher: ContentCipher, plaintext_len: u64) -> u64 {
    match cipher {
        ContentCipher::AesGcm => {
            let frames = plaintext_len.div_ceil(FRAME_LEN as u64).max(1);
            plaintext_len + frames * TAG_LEN as u64
        }
        ContentCipher::AesCtr => plaintext_len,
    }
}

/// Encrypt everything `reader` yields into `writer` with AES-256-GCM frames.
///
/// Returns the number of plaintext bytes consumed.
///
/// # Errors
///
/// Returns [`EncryptionError::Crypto`] if `key` is not a GCM key, and
/// [`EncryptionError::Transport`] if either stream fails.
pub async fn seal_stream<R, W>(
    key: &EnvelopeKey,
    reader: &mut R,
    writer: &mut W,
) -> Result<u64, EncryptionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let aead = build_gcm(key)?;
    let mut current = Zeroizing::new(Vec::with_capacity(FRAME_LEN));
    let mut next = Zeroizing::new(Vec::with_capacity(FRAME_LEN));
    let mut index = 0u64;
    let mut total = 0u64;

    fill(reader, &mut current, FRAME_LEN).await?;
    loop {
        if current.len() == FRAME_LEN {
            fill(reader, &mut next, FRAME_LEN).await?;
        } else {
            next.clear();
        }
        let last = next.is_empty();

        let nonce = frame_nonce(key.iv(), index);
        let aad = frame_aad(index, last);
        let sealed = aead
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &current,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::Cipher("AES-GCM seal failed".into()))?;
        writer.write_all(&sealed).await.map_err(stream_error)?;
        total += current.len() as u64;

        if last {
            break;
        }
        std::mem::swap(&mut current, &mut next);
        index += 1;
    }
    writer.flush().await.map_err(stream_error)?;
    Ok(total)
}

/// Decrypt AES-256-GCM frames from `reader` into `writer`.
///
/// Each frame is verified before any of its plaintext is written. On error,
/// frames verified earlier may already be in `writer`; callers that must not
/// expose partial output stage it and discard on failure.
///
/// Returns the number of plaintext bytes written.
///
/// # Errors
///
/// Returns [`CryptoError::AuthenticationFailed`] on any tag mismatch,
/// reordering, or truncation.
pub async fn open_stream<R, W>(
    key: &EnvelopeKey,
    reader: &mut R,
    writer: &mut W,
) -> Result<u64, EncryptionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let aead = build_gcm(key)?;
    let mut current = Vec::with_capacity(SEALED_FRAME_LEN);
    let mut next = Vec::with_capacity(SEALED_FRAME_LEN);
    let mut index = 0u64;
    let mut total = 0u64;

    fill(reader, &mut current, SEALED_FRAME_LEN).await?;
    loop {
        if current.len() == SEALED_FRAME_LEN {
            fill(reader, &mut next, SEALED_FRAME_LEN).await?;
        } else {
            next.clear();
        }
        let last = next.is_empty();

        if current.len() < TAG_LEN {
            return Err(CryptoError::AuthenticationFailed.into());
        }
        let nonce = frame_nonce(key.iv(), index);
        let aad = frame_aad(index, last);
        let plaintext = Zeroizing::new(
            aead.decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &current,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::AuthenticationFailed)?,
        );
        writer.write_all(&plaintext).await.map_err(stream_error)?;
        total += plaintext.len() as u64;

        if last {
            break;
        }
        std::mem::swap(&mut current, &mut next);
        index += 1;
    }
    writer.flush().await.map_err(stream_error)?;
    Ok(total)
}

/// Apply the AES-256-CTR keystream to everything `reader` yields.
///
/// CTR is symmetric, so this both encrypts and decrypts. Returns the number
/// of bytes processed.
///
/// # Errors
///
/// Returns [`EncryptionError::Crypto`] if `key` is not a CTR key, and
/// [`EncryptionError::Transport`] if either stream fails.
pub async fn ctr_stream<R, W>(
    key: &EnvelopeKey,
    reader: &mut R,
    writer: &mut W,
) -> Result<u64, EncryptionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if key.cipher() != ContentCipher::AesCtr {
        return Err(CryptoError::Cipher(format!("{} key used for CTR stream", key.cipher())).into());
    }
    let mut keystream = Aes256Ctr::new_from_slices(key.key_bytes(), key.iv())
        .map_err(|_| CryptoError::Cipher("invalid CTR key or iv".into()))?;

    let mut buf = Zeroizing::new(vec![0u8; FRAME_LEN]);
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf[..]).await.map_err(stream_error)?;
        if n == 0 {
            break;
        }
        keystream.apply_keystream(&mut buf[..n]);
        writer.write_all(&buf[..n]).await.map_err(stream_error)?;
        total += n as u64;
    }
    writer.flush().await.map_err(stream_error)?;
    Ok(total)
}

fn build_gcm(key: &EnvelopeKey) -> Result<Aes256Gcm, CryptoError> {
    if key.cipher() != ContentCipher::AesGcm {
        return Err(CryptoError::Cipher(format!("{} key used for GCM stream", key.cipher())));
    }
    Aes256Gcm::new_from_slice(key.key_bytes()).map_err(|_| CryptoError::InvalidLength {
        what: "envelope key",
        expected: common::protocol::ENVELOPE_KEY_LEN,
        actual: key.key_bytes().len(),
    })
}

fn frame_nonce(iv: &[u8], index: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(iv);
    for (n, c) in nonce[4..].iter_mut().zip(index.to_be_bytes()) {
        *n ^= c;
    }
    nonce
}

fn frame_aad(index: u64, last: bool) -> Vec<u8> {
    let alg = ContentCipher::AesGcm.as_str().as_bytes();
    let mut aad = Vec::with_capacity(alg.len() + 9);
    aad.extend_from_slice(alg);
    aad.extend_from_slice(&index.to_be_bytes());
    aad.push(u8::from(last));
    aad
}

/// Read until `limit` bytes are buffered or the stream ends.
async fn fill<R>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> Result<(), EncryptionError>
where
    R: AsyncRead + Unpin,
{
    buf.clear();
    (&mut *reader)
        .take(limit as u64)
        .read_to_end(buf)
        .await
        .map_err(stream_error)?;
    Ok(())
}

fn stream_error(e: std::io::Error) -> EncryptionError {
    TransportError::network(format!("body stream failed: {e}")).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seal(key: &EnvelopeKey, plaintext: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        seal_stream(key, &mut &plaintext[..], &mut out).await.unwrap();
        out
    }

    async fn open(key: &EnvelopeKey, ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let mut out = Vec::new();
        open_stream(key, &mut &ciphertext[..], &mut out).await?;
        Ok(out)
    }

    fn body(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn gcm_round_trip_across_frame_boundaries() {
        let key = EnvelopeKey::generate(ContentCipher::AesGcm);
        for len in [0, 1, FRAME_LEN - 1, FRAME_LEN, 2 * FRAME_LEN, 2 * FRAME_LEN + 5] {
            let plaintext = body(len);
            let sealed = seal(&key, &plaintext).await;
            assert_eq!(
                sealed.len() as u64,
                ciphertext_len(ContentCipher::AesGcm, len as u64),
                "len {len}"
            );
            assert_eq!(open(&key, &sealed).await.unwrap(), plaintext, "len {len}");
        }
    }

    #[tokio::test]
    async fn gcm_detects_flipped_bits() {
        let key = EnvelopeKey::generate(ContentCipher::AesGcm);
        let sealed = seal(&key, b"hello world").await;
        // First ciphertext byte, and the last byte of the tag.
        for pos in [0, sealed.len() - 1] {
            let mut tampered = sealed.clone();
            tampered[pos] ^= 0x01;
            let mut out = Vec::new();
            let err = open_stream(&key, &mut &tampered[..], &mut out)
                .await
                .unwrap_err();
            assert!(matches!(err, EncryptionError::Crypto(CryptoError::AuthenticationFailed)));
            assert!(out.is_empty(), "no plaintext may be written");
        }
    }

    #[tokio::test]
    async fn gcm_detects_truncation_at_frame_boundary() {
        let key = EnvelopeKey::generate(ContentCipher::AesGcm);
        let sealed = seal(&key, &body(2 * FRAME_LEN)).await;
        let truncated = &sealed[..SEALED_FRAME_LEN];
        assert!(open(&key, truncated).await.is_err());
    }

    #[tokio::test]
    async fn gcm_detects_swapped_frames() {
        let key = EnvelopeKey::generate(ContentCipher::AesGcm);
        let sealed = seal(&key, &body(2 * FRAME_LEN)).await;
        let mut swapped = sealed[SEALED_FRAME_LEN..].to_vec();
        swapped.extend_from_slice(&sealed[..SEALED_FRAME_LEN]);
        assert!(open(&key, &swapped).await.is_err());
    }

    #[tokio::test]
    async fn gcm_rejects_empty_ciphertext() {
        let key = EnvelopeKey::generate(ContentCipher::AesGcm);
        assert!(open(&key, &[]).await.is_err());
    }

    #[tokio::test]
    async fn gcm_wrong_key_fails() {
        let key1 = EnvelopeKey::generate(ContentCipher::AesGcm);
        let key2 = EnvelopeKey::generate(ContentCipher::AesGcm);
        let sealed = seal(&key1, b"secret").await;
        assert!(open(&key2, &sealed).await.is_err());
    }

    #[tokio::test]
    async fn ctr_round_trip() {
        let key = EnvelopeKey::generate(ContentCipher::AesCtr);
        let plaintext = body(FRAME_LEN + 17);
        let mut sealed = Vec::new();
        ctr_stream(&key, &mut &plaintext[..], &mut sealed).await.unwrap();
        assert_eq!(sealed.len(), plaintext.len());
        assert_ne!(sealed, plaintext);

        let mut opened = Vec::new();
        ctr_stream(&key, &mut &sealed[..], &mut opened).await.unwrap();
        assert_eq!(opened, plaintext);
    }

    #[tokio::test]
    async fn ciphers_refuse_mismatched_keys() {
        let ctr_key = EnvelopeKey::generate(ContentCipher::AesCtr);
        let mut out = Vec::new();
        assert!(seal_stream(&ctr_key, &mut &b"x"[..], &mut out).await.is_err());

        let gcm_key = EnvelopeKey::generate(ContentCipher::AesGcm);
        assert!(ctr_stream(&gcm_key, &mut &b"x"[..], &mut out).await.is_err());
    }

    #[test]
    fn nonces_differ_per_frame() {
        let iv = [9u8; 12];
        assert_ne!(frame_nonce(&iv, 0), frame_nonce(&iv, 1));
        assert_eq!(frame_nonce(&iv, 0), iv);
    }
}
