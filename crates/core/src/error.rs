//! The flat error taxonomy every public operation in this crate reports
//! through. There is no partial success and no retry: a variant tells
//! the caller which rule was broken.

use emv_pki_crypto::CryptoError;
use thiserror::Error;

/// Everything that can make a codec, chain, or registry operation fail.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmvPkiError {
    /// No usable crypto backend was available for the requested operation.
    #[error("no crypto backend available")]
    BackendUnavailable,
    /// CA-registry text or a TLV value did not match the expected shape,
    /// length, or byte range.
    #[error("malformed input: {0}")]
    MalformedInput(&'static str),
    /// Recovered plaintext lacked the `0x6A`/`0xBC` envelope bytes, the
    /// message type did not match, or the embedded hash-algorithm byte
    /// named an algorithm this engine does not support.
    #[error("invalid signature envelope: {0}")]
    SignatureHeaderInvalid(&'static str),
    /// The recomputed digest did not match the one embedded in the
    /// plaintext.
    #[error("hash mismatch")]
    HashMismatch,
    /// A declared length, PAN prefix, or Cryptogram Information Data
    /// value did not satisfy the rule that binds it.
    #[error("field constraint violated: {0}")]
    FieldConstraintViolation(&'static str),
    /// An allocation was refused.
    #[error("resource exhausted")]
    ResourceExhaustion,
}

impl From<CryptoError> for EmvPkiError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::BackendUnavailable => Self::BackendUnavailable,
            CryptoError::UnsupportedHashAlgo(_) => {
                Self::SignatureHeaderInvalid("unsupported hash algorithm byte")
            }
            CryptoError::LengthMismatch { .. } => {
                Self::MalformedInput("rsa input length did not match modulus length")
            }
        }
    }
}
