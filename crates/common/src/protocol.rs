//! Persisted encryption instruction and the algorithm identifiers it carries.
//!
//! An instruction is stored either as user metadata on the data object or as
//! a JSON document in a companion object named `<key>.instruction`. Both
//! layouts use the same field names:
//!
//! ```text
//! x-amz-key-v2                      base64(wrapped envelope key)
//! x-amz-iv                          base64(iv)
//! x-amz-cek-alg                     AES/GCM/NoPadding | AES/CTR/NoPadding
//! x-amz-wrap-alg                    AES/GCM-SIV | kms+context
//! x-amz-tag-len                     128 (authenticated ciphers only)
//! x-amz-matdesc                     JSON object string
//! x-amz-unencrypted-content-length  decimal plaintext length
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::CryptoError;

pub const KEY_V2_HEADER: &str = "x-amz-key-v2";
pub const IV_HEADER: &str = "x-amz-iv";
pub const CONTENT_CIPHER_HEADER: &str = "x-amz-cek-alg";
pub const WRAP_ALGORITHM_HEADER: &str = "x-amz-wrap-alg";
pub const TAG_LEN_HEADER: &str = "x-amz-tag-len";
pub const MATERIAL_DESCRIPTION_HEADER: &str = "x-amz-matdesc";
pub const UNENCRYPTED_LENGTH_HEADER: &str = "x-amz-unencrypted-content-length";

/// Metadata key set on instruction objects so they are recognisable on listing.
pub const INSTRUCTION_FILE_HEADER: &str = "x-amz-crypto-instr-file";

/// Suffix appended to a data object's key to name its instruction object.
pub const INSTRUCTION_SUFFIX: &str = ".instruction";

/// Metadata keys owned by the encryption layer. Callers may not set them.
pub const RESERVED_HEADERS: [&str; 8] = [
    KEY_V2_HEADER,
    IV_HEADER,
    CONTENT_CIPHER_HEADER,
    WRAP_ALGORITHM_HEADER,
    TAG_LEN_HEADER,
    MATERIAL_DESCRIPTION_HEADER,
    UNENCRYPTED_LENGTH_HEADER,
    INSTRUCTION_FILE_HEADER,
];

/// Byte length of every envelope (content encryption) key: AES-256.
pub const ENVELOPE_KEY_LEN: usize = 32;

/// Free-form key/value description of the materials that wrapped a key.
pub type MaterialDescription = BTreeMap<String, String>;

/// Returns the key of the instruction object that belongs to `key`.
pub fn instruction_key(key: &str) -> String {
    format!("{key}{INSTRUCTION_SUFFIX}")
}

/// Cipher used for the object body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentCipher {
    /// AES-256-GCM over fixed-size frames, each with a 128-bit tag.
    AesGcm,
    /// AES-256-CTR with no authentication tag.
    AesCtr,
}

impl ContentCipher {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ContentCipher::AesGcm => "AES/GCM/NoPadding",
            ContentCipher::AesCtr => "AES/CTR/NoPadding",
        }
    }

    /// Parse a `x-amz-cek-alg` value.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::UnsupportedAlgorithm`] for any other identifier.
    pub fn parse(s: &str) -> Result<Self, CryptoError> {
        match s {
            "AES/GCM/NoPadding" => Ok(ContentCipher::AesGcm),
            "AES/CTR/NoPadding" => Ok(ContentCipher::AesCtr),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_owned())),
        }
    }

    /// IV length required by this cipher.
    pub const fn iv_len(&self) -> usize {
        match self {
            ContentCipher::AesGcm => 12,
            ContentCipher::AesCtr => 16,
        }
    }

    /// Tag length in bits, or `None` for unauthenticated ciphers.
    pub const fn tag_len_bits(&self) -> Option<u32> {
        match self {
            ContentCipher::AesGcm => Some(128),
            ContentCipher::AesCtr => None,
        }
    }

    pub const fn is_authenticated(&self) -> bool {
        self.tag_len_bits().is_some()
    }
}

impl fmt::Display for ContentCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Algorithm used to wrap the envelope key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrapAlgorithm {
    /// AES-256-GCM-SIV under a locally held master key.
    AesGcmSiv,
    /// AWS KMS Encrypt/Decrypt bound to an encryption context.
    KmsContext,
}

impl WrapAlgorithm {
    pub const fn as_str(&self) -> &'static str {
        match self {
            WrapAlgorithm::AesGcmSiv => "AES/GCM-SIV",
            WrapAlgorithm::KmsContext => "kms+context",
        }
    }

    /// Parse a `x-amz-wrap-alg` value.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::UnsupportedAlgorithm`] for any other identifier.
    pub fn parse(s: &str) -> Result<Self, CryptoError> {
        match s {
            "AES/GCM-SIV" => Ok(WrapAlgorithm::AesGcmSiv),
            "kms+context" => Ok(WrapAlgorithm::KmsContext),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_owned())),
        }
    }
}

impl fmt::Display for WrapAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to decrypt one object, given the right materials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionInstruction {
    pub wrapped_key: Vec<u8>,
    pub iv: Vec<u8>,
    pub content_cipher: ContentCipher,
    pub wrap_algorithm: WrapAlgorithm,
    /// Tag length in bits; `None` when the body carries no authentication tag.
    pub tag_len: Option<u32>,
    pub material_description: MaterialDescription,
    pub unencrypted_content_length: Option<u64>,
}

impl EncryptionInstruction {
    /// Encode the instruction as string fields, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::MalformedInstruction`] if the material
    /// description cannot be encoded as JSON.
    pub fn to_fields(&self) -> Result<BTreeMap<String, String>, CryptoError> {
        let mut fields = BTreeMap::new();
        fields.insert(KEY_V2_HEADER.into(), STANDARD.encode(&self.wrapped_key));
        fields.insert(IV_HEADER.into(), STANDARD.encode(&self.iv));
        fields.insert(
            CONTENT_CIPHER_HEADER.into(),
            self.content_cipher.as_str().into(),
        );
        fields.insert(
            WRAP_ALGORITHM_HEADER.into(),
            self.wrap_algorithm.as_str().into(),
        );
        if let Some(bits) = self.tag_len {
            fields.insert(TAG_LEN_HEADER.into(), bits.to_string());
        }
        fields.insert(
            MATERIAL_DESCRIPTION_HEADER.into(),
            serde_json::to_string(&self.material_description).map_err(encode_error)?,
        );
        if let Some(len) = self.unencrypted_content_length {
            fields.insert(UNENCRYPTED_LENGTH_HEADER.into(), len.to_string());
        }
        Ok(fields)
    }

    /// Serialise the instruction as the body of an instruction object.
    ///
    /// # Errors
    ///
    /// Same as [`EncryptionInstruction::to_fields`].
    pub fn to_json(&self) -> Result<Vec<u8>, CryptoError> {
        serde_json::to_vec(&self.to_fields()?).map_err(encode_error)
    }

    /// Decode an instruction embedded in object metadata.
    ///
    /// Returns `Ok(None)` when the metadata carries no wrapped key at all,
    /// i.e. the object was not written with metadata storage.
    ///
    /// # Errors
    ///
    /// Returns a [`CryptoError`] if the instruction is present but invalid.
    pub fn from_metadata(
        metadata: &HashMap<String, String>,
    ) -> Result<Option<Self>, CryptoError> {
        if !metadata.contains_key(KEY_V2_HEADER) {
            return Ok(None);
        }
        Self::decode(|name| metadata.get(name).map(String::as_str)).map(Some)
    }

    /// Decode an instruction from the fields of a parsed instruction document.
    ///
    /// # Errors
    ///
    /// Returns a [`CryptoError`] if a field is missing or invalid.
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self, CryptoError> {
        Self::decode(|name| fields.get(name).map(String::as_str))
    }

    fn decode<'a, F>(lookup: F) -> Result<Self, CryptoError>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let required = |name: &str| {
            lookup(name).ok_or_else(|| CryptoError::MalformedInstruction(format!("missing {name}")))
        };

        let wrapped_key = decode_b64(required(KEY_V2_HEADER)?, KEY_V2_HEADER)?;
        let iv = decode_b64(required(IV_HEADER)?, IV_HEADER)?;
        let content_cipher = ContentCipher::parse(required(CONTENT_CIPHER_HEADER)?)?;
        let wrap_algorithm = WrapAlgorithm::parse(required(WRAP_ALGORITHM_HEADER)?)?;

        let tag_len = lookup(TAG_LEN_HEADER)
            .map(|v| parse_number::<u32>(v, TAG_LEN_HEADER))
            .transpose()?;
        let unencrypted_content_length = lookup(UNENCRYPTED_LENGTH_HEADER)
            .map(|v| parse_number::<u64>(v, UNENCRYPTED_LENGTH_HEADER))
            .transpose()?;
        let material_description = match lookup(MATERIAL_DESCRIPTION_HEADER) {
            Some(raw) => serde_json::from_str(raw).map_err(|e| {
                CryptoError::MalformedInstruction(format!("{MATERIAL_DESCRIPTION_HEADER}: {e}"))
            })?,
            None => MaterialDescription::new(),
        };

        if iv.len() != content_cipher.iv_len() {
            return Err(CryptoError::InvalidLength {
                what: "iv",
                expected: content_cipher.iv_len(),
                actual: iv.len(),
            });
        }

        Ok(Self {
            wrapped_key,
            iv,
            content_cipher,
            wrap_algorithm,
            tag_len,
            material_description,
            unencrypted_content_length,
        })
    }
}

fn encode_error(e: serde_json::Error) -> CryptoError {
    CryptoError::MalformedInstruction(format!("instruction encoding failed: {e}"))
}

fn decode_b64(value: &str, name: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD
        .decode(value)
        .map_err(|e| CryptoError::MalformedInstruction(format!("{name}: {e}")))
}

fn parse_number<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, CryptoError> {
    value
        .trim()
        .parse()
        .map_err(|_| CryptoError::MalformedInstruction(format!("{name}: not a number: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EncryptionInstruction {
        let mut description = MaterialDescription::new();
        description.insert("kms_cmk_id".into(), "alias/photos".into());
        EncryptionInstruction {
            wrapped_key: vec![7u8; 40],
            iv: vec![1u8; 12],
            content_cipher: ContentCipher::AesGcm,
            wrap_algorithm: WrapAlgorithm::KmsContext,
            tag_len: Some(128),
            material_description: description,
            unencrypted_content_length: Some(11),
        }
    }

    #[test]
    fn metadata_round_trip() {
        let instruction = sample();
        let metadata: HashMap<String, String> = instruction.to_fields().unwrap().into_iter().collect();
        assert_eq!(metadata[CONTENT_CIPHER_HEADER], "AES/GCM/NoPadding");
        assert_eq!(metadata[TAG_LEN_HEADER], "128");
        let decoded = EncryptionInstruction::from_metadata(&metadata)
            .unwrap()
            .unwrap();
        assert_eq!(decoded, instruction);
    }

    #[test]
    fn json_document_round_trip() {
        let instruction = EncryptionInstruction {
            content_cipher: ContentCipher::AesCtr,
            iv: vec![2u8; 16],
            tag_len: None,
            ..sample()
        };
        let fields: BTreeMap<String, String> =
            serde_json::from_slice(&instruction.to_json().unwrap()).unwrap();
        assert!(!fields.contains_key(TAG_LEN_HEADER));
        assert_eq!(EncryptionInstruction::from_fields(&fields).unwrap(), instruction);
    }

    #[test]
    fn material_description_is_a_json_object_string() {
        let fields = sample().to_fields().unwrap();
        let description: MaterialDescription =
            serde_json::from_str(&fields[MATERIAL_DESCRIPTION_HEADER]).unwrap();
        assert_eq!(description["kms_cmk_id"], "alias/photos");

        let empty = EncryptionInstruction {
            material_description: MaterialDescription::new(),
            ..sample()
        };
        assert_eq!(empty.to_fields().unwrap()[MATERIAL_DESCRIPTION_HEADER], "{}");
    }

    #[test]
    fn metadata_without_wrapped_key_is_absent() {
        let mut metadata = HashMap::new();
        metadata.insert("content-owner".to_string(), "alice".to_string());
        assert!(EncryptionInstruction::from_metadata(&metadata)
            .unwrap()
            .is_none());
    }

    #[test]
    fn rejects_bad_base64() {
        let mut fields = sample().to_fields().unwrap();
        fields.insert(IV_HEADER.into(), "!!!".into());
        let err = EncryptionInstruction::from_fields(&fields).unwrap_err();
        assert!(matches!(err, CryptoError::MalformedInstruction(_)));
    }

    #[test]
    fn rejects_unknown_cipher() {
        let mut fields = sample().to_fields().unwrap();
        fields.insert(CONTENT_CIPHER_HEADER.into(), "AES/CBC/PKCS5Padding".into());
        let err = EncryptionInstruction::from_fields(&fields).unwrap_err();
        assert!(matches!(err, CryptoError::UnsupportedAlgorithm(ref a) if a == "AES/CBC/PKCS5Padding"));
    }

    #[test]
    fn rejects_iv_of_wrong_length() {
        let mut fields = sample().to_fields().unwrap();
        fields.insert(IV_HEADER.into(), STANDARD.encode([0u8; 16]));
        let err = EncryptionInstruction::from_fields(&fields).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidLength { what: "iv", .. }));
    }

    #[test]
    fn rejects_missing_wrap_algorithm() {
        let mut fields = sample().to_fields().unwrap();
        fields.remove(WRAP_ALGORITHM_HEADER);
        let err = EncryptionInstruction::from_fields(&fields).unwrap_err();
        assert!(err.to_string().contains(WRAP_ALGORITHM_HEADER));
    }

    #[test]
    fn instruction_key_appends_suffix() {
        assert_eq!(instruction_key("a/b.txt"), "a/b.txt.instruction");
    }
}
