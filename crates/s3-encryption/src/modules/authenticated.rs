//! [`AuthenticatedEncryptionModule`]: AES-256-GCM frames with per-frame tags.

use common::{ContentCipher, CryptoError, EncryptionError, EncryptionInstruction};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::warn;

use super::{build_instruction, open_envelope_key, seal_envelope_key, unauthenticated};
use crate::crypto::cipher;
use crate::materials::EncryptionMaterials;

/// Writes authenticated objects. In strict mode it reads only authenticated
/// objects; otherwise it also reads legacy encryption-only objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedEncryptionModule {
    strict: bool,
}

impl AuthenticatedEncryptionModule {
    pub const CONTENT_CIPHER: ContentCipher = ContentCipher::AesGcm;

    pub const fn new(strict: bool) -> Self {
        Self { strict }
    }

    pub const fn is_strict(&self) -> bool {
        self.strict
    }

    pub(crate) async fn encrypt<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        materials: &dyn EncryptionMaterials,
    ) -> Result<EncryptionInstruction, EncryptionError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (key, wrapped) = seal_envelope_key(materials, Self::CONTENT_CIPHER).await?;
        let plaintext_len = cipher::seal_stream(&key, reader, writer).await?;
        Ok(build_instruction(&key, wrapped, materials, plaintext_len))
    }

    pub(crate) async fn decrypt<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        instruction: &EncryptionInstruction,
        materials: &dyn EncryptionMaterials,
    ) -> Result<u64, EncryptionError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        match instruction.content_cipher {
            ContentCipher::AesGcm => open_authenticated(reader, writer, instruction, materials).await,
            other if self.strict => {
                Err(CryptoError::UnauthenticatedRejected(other.to_string()).into())
            }
            _ => {
                warn!(
                    cipher = %instruction.content_cipher,
                    "reading object without authentication tag"
                );
                unauthenticated::open_unauthenticated(reader, writer, instruction, materials).await
            }
        }
    }
}

/// Decrypt a GCM object. Shared by every module that can read GCM.
pub(crate) async fn open_authenticated<R, W>(
    reader: &mut R,
    writer: &mut W,
    instruction: &EncryptionInstruction,
    materials: &dyn EncryptionMaterials,
) -> Result<u64, EncryptionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let expected = ContentCipher::AesGcm.tag_len_bits();
    if instruction.tag_len != expected {
        return Err(CryptoError::MalformedInstruction(format!(
            "{} requires a {}-bit tag length, instruction has {:?}",
            ContentCipher::AesGcm,
            expected.unwrap_or_default(),
            instruction.tag_len
        ))
        .into());
    }
    let key = open_envelope_key(instruction, materials).await?;
    cipher::open_stream(&key, reader, writer).await
}

#[cfg(test)]
mod tests {
    use super::super::tests::{decrypt, encrypt, materials};
    use super::super::CryptoModule;
    use super::*;
    use crate::modules::UnauthenticatedEncryptionModule;

    const STRICT: CryptoModule = CryptoModule::Authenticated(AuthenticatedEncryptionModule::new(true));
    const LENIENT: CryptoModule =
        CryptoModule::Authenticated(AuthenticatedEncryptionModule::new(false));
    const ENCRYPTION_ONLY: CryptoModule =
        CryptoModule::EncryptionOnly(UnauthenticatedEncryptionModule::new());

    #[tokio::test]
    async fn instruction_records_tag() {
        let (ciphertext, instruction) = encrypt(&STRICT, &materials(), b"hello world").await;
        assert_eq!(instruction.content_cipher, ContentCipher::AesGcm);
        assert_eq!(instruction.tag_len, Some(128));
        assert_eq!(ciphertext.len(), b"hello world".len() + cipher::TAG_LEN);
    }

    #[tokio::test]
    async fn any_flipped_bit_fails_closed() {
        let materials = materials();
        let (ciphertext, instruction) = encrypt(&STRICT, &materials, b"hello world").await;
        for pos in 0..ciphertext.len() {
            let mut tampered = ciphertext.clone();
            tampered[pos] ^= 0x80;
            let mut out = Vec::new();
            let err = STRICT
                .decrypt(&mut &tampered[..], &mut out, &instruction, &materials)
                .await
                .unwrap_err();
            assert!(
                matches!(err, EncryptionError::Crypto(CryptoError::AuthenticationFailed)),
                "byte {pos}: {err}"
            );
            assert!(out.is_empty(), "byte {pos}: plaintext leaked");
        }
    }

    #[tokio::test]
    async fn strict_refuses_unauthenticated_objects() {
        let materials = materials();
        let (ciphertext, instruction) = encrypt(&ENCRYPTION_ONLY, &materials, b"legacy").await;
        let err = decrypt(&STRICT, &materials, &ciphertext, &instruction)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EncryptionError::Crypto(CryptoError::UnauthenticatedRejected(_))
        ));
    }

    #[tokio::test]
    async fn lenient_reads_unauthenticated_objects() {
        let materials = materials();
        let (ciphertext, instruction) = encrypt(&ENCRYPTION_ONLY, &materials, b"legacy").await;
        let opened = decrypt(&LENIENT, &materials, &ciphertext, &instruction)
            .await
            .unwrap();
        assert_eq!(opened, b"legacy");
    }

    #[tokio::test]
    async fn missing_tag_length_is_malformed() {
        let materials = materials();
        let (ciphertext, mut instruction) = encrypt(&STRICT, &materials, b"data").await;
        instruction.tag_len = None;
        let err = decrypt(&STRICT, &materials, &ciphertext, &instruction)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EncryptionError::Crypto(CryptoError::MalformedInstruction(_))
        ));
    }

    #[tokio::test]
    async fn successive_encryptions_use_fresh_keys() {
        let materials = materials();
        let (c1, i1) = encrypt(&STRICT, &materials, b"same plaintext").await;
        let (c2, i2) = encrypt(&STRICT, &materials, b"same plaintext").await;
        assert_ne!(i1.iv, i2.iv);
        assert_ne!(i1.wrapped_key, i2.wrapped_key);
        assert_ne!(c1, c2);
    }
}
