//! Content encryption primitives: per-object keys and streaming ciphers.
//!
//! This module is free of AWS and storage dependencies. Policy (which cipher
//! to use, when to refuse a cipher) lives in [`crate::modules`].

pub mod cipher;
pub mod key;

pub use cipher::{ciphertext_len, FRAME_LEN, TAG_LEN};
pub use key::EnvelopeKey;
