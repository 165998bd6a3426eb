//! EMV chip-card PKI engine: recovers, verifies, and synthesizes the
//! chained RSA-signed certificates EMV terminals use to authenticate
//! payment cards offline (SDA, DDA, CDA).
//!
//! Three modules:
//! - [`pk`] — the EMV RSA public key record and its CA-registry text form.
//! - [`codec`] — the signed-message envelope: message recovery, hash
//!   binding, and the inverse sign path. This is the core of the crate.
//! - [`chain`] — the per-level certificate operations (issuer, ICC,
//!   ICC-PE, DAC, IDN, CDA) built on top of [`codec`].
//!
//! Every public operation here is synchronous, allocates an owned
//! result on success, and leaves no partial state on failure: a
//! rejected certificate returns an [`error::EmvPkiError`] and nothing
//! else.

pub mod chain;
pub mod codec;
pub mod error;
pub mod pk;

pub use chain::tags;
pub use codec::{decode_key, decode_message, sign_message, MessageType, SignedMessage};
pub use error::EmvPkiError;
pub use pk::{emit_registry_line, self_verify, parse_registry_line, EmvPk};

pub use emv_pki_crypto as crypto;
pub use emv_pki_tlv as tlv;
