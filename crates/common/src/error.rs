//! Unified error model for the encryption client.
//!
//! Two unrelated failure domains meet in this layer: the storage transport
//! and the crypto layer. A third, [`ConsistencyError`], covers the gap between
//! them (a data object without its instruction, or the reverse).

use std::fmt;

use thiserror::Error;

/// Which failure domain produced an [`EncryptionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDomain {
    Transport,
    Crypto,
    Consistency,
    Request,
}

/// Coarse classification of a storage transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The object (or bucket) does not exist.
    NotFound,
    /// Connection, DNS, timeout, or an interrupted body stream.
    Network,
    /// Credentials were missing, invalid, or lacked permission.
    Auth,
    /// The service asked the caller to slow down.
    Throttling,
    /// Any other error reported by the service.
    Service,
}

impl TransportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::NotFound => "not_found",
            TransportErrorKind::Network => "network",
            TransportErrorKind::Auth => "auth",
            TransportErrorKind::Throttling => "throttling",
            TransportErrorKind::Service => "service",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error reported by the storage collaborator.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::NotFound, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Network, message)
    }

    /// Returns `true` if the storage service reported the object as absent.
    pub fn is_not_found(&self) -> bool {
        self.kind == TransportErrorKind::NotFound
    }
}

/// Errors produced by the crypto layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The key-management collaborator failed to wrap the envelope key.
    #[error("key wrap failed: {0}")]
    KeyWrap(String),

    /// The key-management collaborator failed to unwrap the envelope key.
    #[error("key unwrap failed: {0}")]
    KeyUnwrap(String),

    /// The instruction names a cipher or wrap algorithm this client cannot use.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The object was wrapped with a different algorithm than the configured materials use.
    #[error("wrap algorithm mismatch: materials use {expected}, object uses {found}")]
    WrapAlgorithmMismatch { expected: String, found: String },

    /// Tag verification failed: wrong key, tampered ciphertext, or truncation.
    #[error("authentication tag mismatch")]
    AuthenticationFailed,

    /// Instruction fields are present but cannot be decoded.
    #[error("malformed instruction: {0}")]
    MalformedInstruction(String),

    /// Strict mode refuses objects written without an authentication tag.
    #[error("refusing to decrypt {0}: strict authenticated mode requires a tagged cipher")]
    UnauthenticatedRejected(String),

    /// Key or IV material has the wrong length.
    #[error("invalid {what} length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Internal cipher failure on the encrypt path.
    #[error("cipher operation failed: {0}")]
    Cipher(String),
}

/// The data object and its encryption instruction disagree.
#[derive(Debug, Error)]
pub enum ConsistencyError {
    /// The data object was written but its instruction object was not.
    #[error("data object `{key}` was written but its instruction was not; object is undecryptable: {source}")]
    OrphanedObject {
        key: String,
        #[source]
        source: TransportError,
    },

    /// No instruction could be found under the active storage mode.
    #[error("no encryption instruction found for `{key}`")]
    InstructionMissing { key: String },

    /// The instruction object exists but is not a valid instruction document.
    #[error("instruction object for `{key}` is unreadable: {reason}")]
    InstructionUnreadable { key: String, reason: String },

    /// The instruction object exists but the data object does not.
    #[error("instruction exists for `{key}` but the data object is missing")]
    DataObjectMissing { key: String },
}

/// The single error value returned by every client operation.
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("storage transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("consistency error: {0}")]
    Consistency(#[from] ConsistencyError),

    /// The request was rejected before any I/O took place.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl EncryptionError {
    /// Returns the domain that produced this error.
    pub fn domain(&self) -> ErrorDomain {
        match self {
            EncryptionError::Transport(_) => ErrorDomain::Transport,
            EncryptionError::Crypto(_) => ErrorDomain::Crypto,
            EncryptionError::Consistency(_) => ErrorDomain::Consistency,
            EncryptionError::InvalidRequest(_) => ErrorDomain::Request,
        }
    }

    pub fn is_transport_error(&self) -> bool {
        self.domain() == ErrorDomain::Transport
    }

    pub fn is_crypto_error(&self) -> bool {
        self.domain() == ErrorDomain::Crypto
    }

    pub fn is_consistency_error(&self) -> bool {
        self.domain() == ErrorDomain::Consistency
    }
}
