//! Crypto backend facade.
//!
//! The codec in `emv-pki` never touches a hash or bignum library
//! directly; it goes through [`backend`], a single process-wide handle
//! selected once and reused by every call: one trait for the operations
//! a caller needs, one lazily-initialized static holding the chosen
//! implementation.

use std::fmt;
use std::sync::Arc;

use num_bigint_dig::BigUint;
use once_cell::sync::OnceCell;
use thiserror::Error;

/// Errors the crypto façade can report.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// No usable crypto backend could be initialized.
    #[error("no crypto backend available")]
    BackendUnavailable,
    /// An EMV hash-algorithm byte this backend does not recognize.
    #[error("unsupported hash algorithm byte 0x{0:02x}")]
    UnsupportedHashAlgo(u8),
    /// The RSA input length did not equal the modulus length.
    #[error("rsa input length {got} does not match modulus length {want}")]
    LengthMismatch { got: usize, want: usize },
}

/// EMV hash-algorithm identifiers (single byte per EMV Book 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgo {
    /// SHA-1, EMV byte value `0x01`. The only hash algorithm EMV
    /// certificates in the field actually use.
    Sha1,
}

impl HashAlgo {
    /// Parses an EMV hash-algorithm byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Sha1),
            _ => None,
        }
    }

    /// The EMV byte value for this algorithm.
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Sha1 => 0x01,
        }
    }

    /// Digest size in bytes.
    pub fn digest_size(self) -> usize {
        match self {
            Self::Sha1 => 20,
        }
    }
}

/// An in-flight hash computation.
///
/// Callers feed it buffers in order (the message body, a certificate
/// remainder, zero or more additional-data streams) and then finish it
/// to get the digest. There is no separate "close" step: dropping the
/// context without calling [`HashCtx::finish`] simply discards it.
pub trait HashCtx: Send {
    /// Feeds more bytes into the running hash.
    fn write(&mut self, data: &[u8]);

    /// Digest size this context will produce.
    fn size(&self) -> usize;

    /// Consumes the context and returns the digest.
    fn finish(self: Box<Self>) -> Vec<u8>;
}

struct Sha1Ctx(sha1::Sha1);

impl HashCtx for Sha1Ctx {
    fn write(&mut self, data: &[u8]) {
        use sha1::Digest;
        self.0.update(data);
    }

    fn size(&self) -> usize {
        20
    }

    fn finish(self: Box<Self>) -> Vec<u8> {
        use sha1::Digest;
        self.0.finalize().to_vec()
    }
}

/// A recovered or constructed RSA public key, ready for the raw (no
/// padding) "public-operation" EMV message recovery uses in place of
/// signature verification.
#[derive(Clone)]
pub struct RsaPublicCtx {
    modulus: BigUint,
    exponent: BigUint,
    modulus_len: usize,
}

impl fmt::Debug for RsaPublicCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaPublicCtx")
            .field("modulus_len", &self.modulus_len)
            .finish()
    }
}

/// An RSA private key, used only by the signing/test-bench side.
#[derive(Clone)]
pub struct RsaPrivateCtx {
    modulus: BigUint,
    exponent: BigUint,
    modulus_len: usize,
}

impl fmt::Debug for RsaPrivateCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaPrivateCtx")
            .field("modulus_len", &self.modulus_len)
            .finish()
    }
}

/// Trait implemented by a crypto backend. The facade functions at the
/// crate root dispatch to whatever backend [`init_backend`] selected (or
/// the default software backend if none was selected explicitly).
pub trait CryptoBackend: Send + Sync + fmt::Debug {
    /// Opens a hash context for the given algorithm, or `None` if this
    /// backend does not support it.
    fn hash_open(&self, algo: HashAlgo) -> Option<Box<dyn HashCtx>>;

    /// Raw modular exponentiation with the public exponent:
    /// `input ^ exponent mod modulus`, left-padded to the modulus
    /// length. `input.len()` must equal the modulus length.
    fn rsa_apply_public(&self, ctx: &RsaPublicCtx, input: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Raw modular exponentiation with the private exponent (sign side
    /// only).
    fn rsa_apply_private(&self, ctx: &RsaPrivateCtx, input: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Default, software-only backend: SHA-1 via the `sha1` crate, modular
/// exponentiation via `num-bigint-dig` (the bignum library the `rsa`
/// crate itself builds on).
#[derive(Debug, Default)]
pub struct SoftwareBackend;

impl CryptoBackend for SoftwareBackend {
    fn hash_open(&self, algo: HashAlgo) -> Option<Box<dyn HashCtx>> {
        match algo {
            HashAlgo::Sha1 => Some(Box::new(Sha1Ctx(<sha1::Sha1 as sha1::Digest>::new()))),
        }
    }

    fn rsa_apply_public(&self, ctx: &RsaPublicCtx, input: &[u8]) -> Result<Vec<u8>, CryptoError> {
        modpow_padded(input, &ctx.exponent, &ctx.modulus, ctx.modulus_len)
    }

    fn rsa_apply_private(
        &self,
        ctx: &RsaPrivateCtx,
        input: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        modpow_padded(input, &ctx.exponent, &ctx.modulus, ctx.modulus_len)
    }
}

fn modpow_padded(
    input: &[u8],
    exponent: &BigUint,
    modulus: &BigUint,
    modulus_len: usize,
) -> Result<Vec<u8>, CryptoError> {
    if input.len() != modulus_len {
        return Err(CryptoError::LengthMismatch {
            got: input.len(),
            want: modulus_len,
        });
    }
    let base = BigUint::from_bytes_be(input);
    let result = base.modpow(exponent, modulus);
    let mut out = result.to_bytes_be();
    if out.len() > modulus_len {
        // Can only happen for malformed (modulus, exponent) pairs.
        out.truncate(modulus_len);
    }
    let mut padded = vec![0u8; modulus_len];
    let start = modulus_len - out.len();
    padded[start..].copy_from_slice(&out);
    Ok(padded)
}

static BACKEND: OnceCell<Arc<dyn CryptoBackend>> = OnceCell::new();

/// Selects the process-wide crypto backend. Idempotent: only the first
/// call has any effect, matching the EMV engine's "first caller sets it,
/// subsequent callers observe it" rule. Safe to call concurrently from
/// multiple threads racing to be first.
pub fn init_backend(backend: Arc<dyn CryptoBackend>) {
    let _ = BACKEND.set(backend);
}

/// Returns the selected backend, defaulting to [`SoftwareBackend`] if
/// nothing was explicitly selected yet.
pub fn backend() -> &'static dyn CryptoBackend {
    BACKEND
        .get_or_init(|| Arc::new(SoftwareBackend))
        .as_ref()
}

/// Opens a hash context for `algo` against the selected backend.
pub fn hash_open(algo: HashAlgo) -> Result<Box<dyn HashCtx>, CryptoError> {
    backend()
        .hash_open(algo)
        .ok_or(CryptoError::BackendUnavailable)
}

/// Builds a public-key context from a modulus and exponent, both
/// big-endian byte strings.
pub fn rsa_public(modulus: &[u8], exponent: &[u8]) -> RsaPublicCtx {
    RsaPublicCtx {
        modulus: BigUint::from_bytes_be(modulus),
        exponent: BigUint::from_bytes_be(exponent),
        modulus_len: modulus.len(),
    }
}

/// Builds a private-key context from a modulus and private exponent.
pub fn rsa_private(modulus: &[u8], exponent: &[u8]) -> RsaPrivateCtx {
    RsaPrivateCtx {
        modulus: BigUint::from_bytes_be(modulus),
        exponent: BigUint::from_bytes_be(exponent),
        modulus_len: modulus.len(),
    }
}

/// Applies the public-key "encrypt" operation EMV uses for signature
/// recovery: `input ^ e mod n`. `input` must be exactly the modulus
/// length.
pub fn rsa_apply_public(ctx: &RsaPublicCtx, input: &[u8]) -> Result<Vec<u8>, CryptoError> {
    backend().rsa_apply_public(ctx, input)
}

/// Applies the private-key operation the sign side uses to produce a
/// signature: `input ^ d mod n`.
pub fn rsa_apply_private(ctx: &RsaPrivateCtx, input: &[u8]) -> Result<Vec<u8>, CryptoError> {
    backend().rsa_apply_private(ctx, input)
}

/// Modulus length in bytes for a public-key context.
pub fn modulus_len_public(ctx: &RsaPublicCtx) -> usize {
    ctx.modulus_len
}

/// Modulus length in bytes for a private-key context.
pub fn modulus_len_private(ctx: &RsaPrivateCtx) -> usize {
    ctx.modulus_len
}

/// A generated RSA keypair, used by the sign/test-bench side to build CA
/// keys and issuer/ICC certificates without depending on an external PEM
/// file. Key generation itself is delegated to the `rsa` crate (which
/// is built on the same `num-bigint-dig` backing as the raw modexp path
/// above); only the raw, unpadded apply operations above are used for
/// the actual EMV message-recovery math.
#[derive(Clone)]
pub struct RsaKeyPair {
    inner: rsa::RsaPrivateKey,
}

impl fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("bits", &(modulus_bytes_of(&self.inner).len() * 8))
            .finish()
    }
}

fn modulus_bytes_of(key: &rsa::RsaPrivateKey) -> Vec<u8> {
    use rsa::traits::PublicKeyParts;
    key.n().to_bytes_be()
}

impl RsaKeyPair {
    /// Generates a new keypair of the given modulus bit length using the
    /// given random source.
    pub fn generate<R: rand::RngCore + rand::CryptoRng>(rng: &mut R, bits: usize) -> Self {
        let inner = rsa::RsaPrivateKey::new(rng, bits).expect("rsa key generation");
        Self { inner }
    }

    /// Modulus, big-endian, no leading zero padding.
    pub fn modulus(&self) -> Vec<u8> {
        modulus_bytes_of(&self.inner)
    }

    /// Public exponent, big-endian, no leading zero padding.
    pub fn public_exponent(&self) -> Vec<u8> {
        use rsa::traits::PublicKeyParts;
        self.inner.e().to_bytes_be()
    }

    /// Private exponent, big-endian, no leading zero padding.
    pub fn private_exponent(&self) -> Vec<u8> {
        use rsa::traits::PrivateKeyParts;
        self.inner.d().to_bytes_be()
    }

    /// A public-key context for this keypair's modulus/public exponent.
    pub fn public_ctx(&self) -> RsaPublicCtx {
        rsa_public(&self.modulus(), &self.public_exponent())
    }

    /// A private-key context for this keypair's modulus/private
    /// exponent.
    pub fn private_ctx(&self) -> RsaPrivateCtx {
        rsa_private(&self.modulus(), &self.private_exponent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn test_rng() -> rand_chacha::ChaCha20Rng {
        rand_chacha::ChaCha20Rng::seed_from_u64(42)
    }

    #[test]
    fn public_then_private_is_identity() {
        let mut rng = test_rng();
        let key = RsaKeyPair::generate(&mut rng, 1024);
        let pub_ctx = key.public_ctx();
        let priv_ctx = key.private_ctx();

        let mut plain = vec![0u8; key.modulus().len()];
        plain[0] = 0x6A;
        *plain.last_mut().unwrap() = 0xBC;

        let sig = rsa_apply_private(&priv_ctx, &plain).unwrap();
        let recovered = rsa_apply_public(&pub_ctx, &sig).unwrap();
        assert_eq!(recovered, plain);
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut rng = test_rng();
        let key = RsaKeyPair::generate(&mut rng, 1024);
        let ctx = key.public_ctx();
        let err = rsa_apply_public(&ctx, &[0u8; 4]).unwrap_err();
        assert!(matches!(err, CryptoError::LengthMismatch { .. }));
    }

    #[test]
    fn sha1_matches_known_vector() {
        let mut ctx = hash_open(HashAlgo::Sha1).unwrap();
        ctx.write(b"abc");
        let digest = ctx.finish();
        assert_eq!(
            hex_encode(&digest),
            "a9993e364706816aba3e25717850c26c9cd0d89"
        );
    }

    fn hex_encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn unknown_algo_byte_has_no_mapping() {
        assert_eq!(HashAlgo::from_byte(0x02), None);
    }
}
