//! [`UnauthenticatedEncryptionModule`]: AES-256-CTR, confidentiality only.
//!
//! Objects written here carry no authentication tag, so tampering is not
//! detected. Strict authenticated clients refuse to read them.

use common::{ContentCipher, EncryptionError, EncryptionInstruction};
use tokio::io::{AsyncRead, AsyncWrite};

use super::{authenticated, build_instruction, open_envelope_key, seal_envelope_key};
use crate::crypto::cipher;
use crate::materials::EncryptionMaterials;

/// Writes encryption-only objects; reads both encryption-only and
/// authenticated objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnauthenticatedEncryptionModule;

impl UnauthenticatedEncryptionModule {
    pub const CONTENT_CIPHER: ContentCipher = ContentCipher::AesCtr;

    pub const fn new() -> Self {
        Self
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
        let plaintext_len = cipher::ctr_stream(&key, reader, writer).await?;
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
            ContentCipher::AesGcm => {
                authenticated::open_authenticated(reader, writer, instruction, materials).await
            }
            ContentCipher::AesCtr => open_unauthenticated(reader, writer, instruction, materials).await,
        }
    }
}

/// Decrypt a CTR object. Callers decide whether reading one is allowed.
pub(crate) async fn open_unauthenticated<R, W>(
    reader: &mut R,
    writer: &mut W,
    instruction: &EncryptionInstruction,
    materials: &dyn EncryptionMaterials,
) -> Result<u64, EncryptionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let key = open_envelope_key(instruction, materials).await?;
    cipher::ctr_stream(&key, reader, writer).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::tests::{decrypt, encrypt, materials};
    use crate::modules::{AuthenticatedEncryptionModule, CryptoModule};

    const ENCRYPTION_ONLY: CryptoModule =
        CryptoModule::EncryptionOnly(UnauthenticatedEncryptionModule::new());

    #[tokio::test]
    async fn instruction_has_no_tag() {
        let (ciphertext, instruction) = encrypt(&ENCRYPTION_ONLY, &materials(), b"hello").await;
        assert_eq!(instruction.content_cipher, ContentCipher::AesCtr);
        assert_eq!(instruction.tag_len, None);
        assert_eq!(instruction.iv.len(), 16);
        assert_eq!(ciphertext.len(), 5);
    }

    #[tokio::test]
    async fn reads_authenticated_objects() {
        let materials = materials();
        let strict = CryptoModule::Authenticated(AuthenticatedEncryptionModule::new(true));
        let (ciphertext, instruction) = encrypt(&strict, &materials, b"modern object").await;
        let opened = decrypt(&ENCRYPTION_ONLY, &materials, &ciphertext, &instruction)
            .await
            .unwrap();
        assert_eq!(opened, b"modern object");
    }

    #[tokio::test]
    async fn tampering_goes_undetected() {
        let materials = materials();
        let (mut ciphertext, instruction) = encrypt(&ENCRYPTION_ONLY, &materials, b"abc").await;
        ciphertext[0] ^= 0x01;
        let opened = decrypt(&ENCRYPTION_ONLY, &materials, &ciphertext, &instruction)
            .await
            .unwrap();
        assert_eq!(opened[0], b'a' ^ 0x01);
    }
}
