//! Common types shared across `s3-encryption` crates: the persisted
//! encryption instruction and the unified error model.

pub mod error;
pub mod protocol;

pub use error::{
    ConsistencyError, CryptoError, EncryptionError, ErrorDomain, TransportError,
    TransportErrorKind,
};
pub use protocol::{ContentCipher, EncryptionInstruction, MaterialDescription, WrapAlgorithm};
