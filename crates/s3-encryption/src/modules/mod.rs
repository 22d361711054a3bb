//! Crypto modules: the encryption strategy selected by [`CryptoMode`].
//!
//! The set of modules is closed. [`CryptoModuleFactory::select`] maps the
//! mode to a variant and every operation dispatches over the enum:
//!
//! | Mode | Module | Writes | Reads |
//! |---|---|---|---|
//! | `StrictAuthenticatedEncryption` | `Authenticated { strict: true }` | GCM | GCM |
//! | `AuthenticatedEncryption` | `Authenticated { strict: false }` | GCM | GCM, CTR |
//! | `EncryptionOnly` | `EncryptionOnly` | CTR | GCM, CTR |
//!
//! Modules hold no state beyond the mode, so one can be selected per request.

pub mod authenticated;
pub mod unauthenticated;

pub use authenticated::AuthenticatedEncryptionModule;
pub use unauthenticated::UnauthenticatedEncryptionModule;

use common::{ContentCipher, CryptoError, EncryptionError, EncryptionInstruction};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::{CryptoConfiguration, CryptoMode};
use crate::crypto::EnvelopeKey;
use crate::materials::EncryptionMaterials;

/// One of the available encryption strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoModule {
    Authenticated(AuthenticatedEncryptionModule),
    EncryptionOnly(UnauthenticatedEncryptionModule),
}

impl CryptoModule {
    /// The cipher this module writes new objects with.
    pub fn content_cipher(&self) -> ContentCipher {
        match self {
            CryptoModule::Authenticated(_) => AuthenticatedEncryptionModule::CONTENT_CIPHER,
            CryptoModule::EncryptionOnly(_) => UnauthenticatedEncryptionModule::CONTENT_CIPHER,
        }
    }

    /// Encrypt `reader` into `writer` under a fresh envelope key.
    ///
    /// # Errors
    ///
    /// Returns [`EncryptionError::Crypto`] if the materials fail to provide or
    /// wrap the key, and [`EncryptionError::Transport`] if a stream fails.
    pub async fn encrypt<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        materials: &dyn EncryptionMaterials,
    ) -> Result<EncryptionInstruction, EncryptionError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        match self {
            CryptoModule::Authenticated(m) => m.encrypt(reader, writer, materials).await,
            CryptoModule::EncryptionOnly(m) => m.encrypt(reader, writer, materials).await,
        }
    }

    /// Decrypt `reader` into `writer` as described by `instruction`.
    ///
    /// Returns the number of plaintext bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`EncryptionError::Crypto`] if the instruction is refused, the
    /// key cannot be unwrapped, or authentication fails.
    pub async fn decrypt<R, W>(
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
        match self {
            CryptoModule::Authenticated(m) => m.decrypt(reader, writer, instruction, materials).await,
            CryptoModule::EncryptionOnly(m) => {
                m.decrypt(reader, writer, instruction, materials).await
            }
        }
    }
}

/// Maps a [`CryptoConfiguration`] to its [`CryptoModule`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CryptoModuleFactory;

impl CryptoModuleFactory {
    /// Select the module for `config`. Pure and infallible.
    pub fn select(config: &CryptoConfiguration) -> CryptoModule {
        match config.crypto_mode {
            CryptoMode::StrictAuthenticatedEncryption => {
                CryptoModule::Authenticated(AuthenticatedEncryptionModule::new(true))
            }
            CryptoMode::AuthenticatedEncryption => {
                CryptoModule::Authenticated(AuthenticatedEncryptionModule::new(false))
            }
            CryptoMode::EncryptionOnly => {
                CryptoModule::EncryptionOnly(UnauthenticatedEncryptionModule::new())
            }
        }
    }
}

/// Obtain a fresh envelope key for `cipher` and wrap it.
async fn seal_envelope_key(
    materials: &dyn EncryptionMaterials,
    cipher: ContentCipher,
) -> Result<(EnvelopeKey, Vec<u8>), CryptoError> {
    let key = materials
        .provide_envelope_key(cipher)
        .await
        .map_err(|e| CryptoError::KeyWrap(format!("envelope key unavailable: {e}")))?;
    if key.cipher() != cipher {
        return Err(CryptoError::KeyWrap(format!(
            "materials provided a {} key, {cipher} required",
            key.cipher()
        )));
    }
    let wrapped = materials
        .wrap_key(&key)
        .await
        .map_err(|e| CryptoError::KeyWrap(e.to_string()))?;
    Ok((key, wrapped))
}

/// Unwrap the envelope key named by `instruction`.
async fn open_envelope_key(
    instruction: &EncryptionInstruction,
    materials: &dyn EncryptionMaterials,
) -> Result<EnvelopeKey, CryptoError> {
    let expected = materials.wrap_algorithm();
    if instruction.wrap_algorithm != expected {
        return Err(CryptoError::WrapAlgorithmMismatch {
            expected: expected.to_string(),
            found: instruction.wrap_algorithm.to_string(),
        });
    }
    let raw = materials
        .unwrap_key(&instruction.wrapped_key, instruction.content_cipher)
        .await
        .map_err(|e| CryptoError::KeyUnwrap(e.to_string()))?;
    EnvelopeKey::from_parts(instruction.content_cipher, raw, &instruction.iv)
}

fn build_instruction(
    key: &EnvelopeKey,
    wrapped_key: Vec<u8>,
    materials: &dyn EncryptionMaterials,
    plaintext_len: u64,
) -> EncryptionInstruction {
    EncryptionInstruction {
        wrapped_key,
        iv: key.iv().to_vec(),
        content_cipher: key.cipher(),
        wrap_algorithm: materials.wrap_algorithm(),
        tag_len: key.cipher().tag_len_bits(),
        material_description: materials.description(),
        unencrypted_content_length: Some(plaintext_len),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::StorageMode;
    use crate::materials::{MockEncryptionMaterials, SymmetricMaterials};
    use common::WrapAlgorithm;

    pub(crate) fn materials() -> SymmetricMaterials {
        SymmetricMaterials::new(&[0x42u8; 32]).unwrap()
    }

    pub(crate) async fn encrypt(
        module: &CryptoModule,
        materials: &dyn EncryptionMaterials,
        plaintext: &[u8],
    ) -> (Vec<u8>, EncryptionInstruction) {
        let mut out = Vec::new();
        let instruction = module
            .encrypt(&mut &plaintext[..], &mut out, materials)
            .await
            .unwrap();
        (out, instruction)
    }

    pub(crate) async fn decrypt(
        module: &CryptoModule,
        materials: &dyn EncryptionMaterials,
        ciphertext: &[u8],
        instruction: &EncryptionInstruction,
    ) -> Result<Vec<u8>, EncryptionError> {
        let mut out = Vec::new();
        module
            .decrypt(&mut &ciphertext[..], &mut out, instruction, materials)
            .await?;
        Ok(out)
    }

    fn module(mode: CryptoMode) -> CryptoModule {
        CryptoModuleFactory::select(&CryptoConfiguration::new(mode, StorageMode::ObjectMetadata))
    }

    #[test]
    fn factory_maps_modes() {
        assert_eq!(
            module(CryptoMode::StrictAuthenticatedEncryption),
            CryptoModule::Authenticated(AuthenticatedEncryptionModule::new(true))
        );
        assert_eq!(
            module(CryptoMode::AuthenticatedEncryption),
            CryptoModule::Authenticated(AuthenticatedEncryptionModule::new(false))
        );
        assert_eq!(
            module(CryptoMode::EncryptionOnly),
            CryptoModule::EncryptionOnly(UnauthenticatedEncryptionModule::new())
        );
    }

    #[test]
    fn factory_ignores_storage_mode() {
        let a = CryptoConfiguration::new(CryptoMode::EncryptionOnly, StorageMode::ObjectMetadata);
        let b = CryptoConfiguration::new(CryptoMode::EncryptionOnly, StorageMode::InstructionFile);
        assert_eq!(CryptoModuleFactory::select(&a), CryptoModuleFactory::select(&b));
    }

    #[tokio::test]
    async fn every_mode_round_trips() {
        let materials = materials();
        let plaintext = b"the quick brown fox".repeat(5000);
        for mode in [
            CryptoMode::StrictAuthenticatedEncryption,
            CryptoMode::AuthenticatedEncryption,
            CryptoMode::EncryptionOnly,
        ] {
            let m = module(mode);
            let (ciphertext, instruction) = encrypt(&m, &materials, &plaintext).await;
            assert_eq!(instruction.content_cipher, m.content_cipher());
            assert_eq!(instruction.unencrypted_content_length, Some(plaintext.len() as u64));
            let opened = decrypt(&m, &materials, &ciphertext, &instruction).await.unwrap();
            assert_eq!(opened, plaintext, "{mode:?}");
        }
    }

    #[tokio::test]
    async fn wrap_algorithm_mismatch_is_refused() {
        let m = module(CryptoMode::StrictAuthenticatedEncryption);
        let (ciphertext, mut instruction) = encrypt(&m, &materials(), b"data").await;
        instruction.wrap_algorithm = WrapAlgorithm::KmsContext;
        let err = decrypt(&m, &materials(), &ciphertext, &instruction)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EncryptionError::Crypto(CryptoError::WrapAlgorithmMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn wrap_failure_aborts_before_writing() {
        let mut mock = MockEncryptionMaterials::new();
        mock.expect_provide_envelope_key()
            .returning(|cipher| Ok(EnvelopeKey::generate(cipher)));
        mock.expect_wrap_key()
            .times(1)
            .returning(|_| Err(crate::materials::MaterialsError::Kms("AccessDeniedException".into())));
        mock.expect_wrap_algorithm().never();

        let m = module(CryptoMode::StrictAuthenticatedEncryption);
        let mut out = Vec::new();
        let err = m
            .encrypt(&mut &b"payload"[..], &mut out, &mock)
            .await
            .unwrap_err();
        assert!(matches!(err, EncryptionError::Crypto(CryptoError::KeyWrap(ref msg)) if msg.contains("AccessDenied")));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn unwrap_failure_is_a_crypto_error() {
        let m = module(CryptoMode::AuthenticatedEncryption);
        let (ciphertext, instruction) = encrypt(&m, &materials(), b"data").await;

        let mut mock = MockEncryptionMaterials::new();
        mock.expect_wrap_algorithm()
            .return_const(WrapAlgorithm::AesGcmSiv);
        mock.expect_unwrap_key()
            .returning(|_, _| Err(crate::materials::MaterialsError::Unwrap("bad key".into())));

        let err = decrypt(&m, &mock, &ciphertext, &instruction)
            .await
            .unwrap_err();
        assert!(matches!(err, EncryptionError::Crypto(CryptoError::KeyUnwrap(_))));
    }
}
