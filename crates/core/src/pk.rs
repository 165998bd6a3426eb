//! The EMV RSA public key record: CA-registry line grammar, its
//! self-hash integrity check, and the skeleton constructor the codec's
//! key-recovery path fills in.

use emv_pki_crypto::{hash_open, HashAlgo};

use crate::error::EmvPkiError;

/// EMV's single-byte public-key algorithm identifier for RSA (the only
/// `pk_algo` this engine implements.
pub const PK_ALGO_RSA: u8 = 0x01;

/// An EMV RSA public key, either a CA root loaded from the registry or a
/// child key recovered from a signed certificate.
///
/// `rid`/`index` identify the key family; `serial`/`pan` are populated
/// only for non-CA (recovered) keys; `hash` is the CA-registry integrity
/// tag and is meaningless (zero) for a recovered key, which is verified
/// by the codec's hash check instead of `self_verify`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmvPk {
    /// 5-byte Registered Application Provider Identifier.
    pub rid: [u8; 5],
    /// Key index under `rid`.
    pub index: u8,
    /// Card-assigned serial number (non-CA keys only).
    pub serial: [u8; 3],
    /// PAN, BCD, left-aligned and padded with `0xFF` (non-CA keys only).
    pub pan: [u8; 10],
    /// Packed decimal `(YY<<16)|(MM<<8)|DD`; CA entries force `DD=0x31`.
    pub expire: u32,
    /// EMV hash-algorithm identifier byte.
    pub hash_algo: u8,
    /// EMV public-key-algorithm identifier byte.
    pub pk_algo: u8,
    /// `H(rid ‖ index ‖ modulus ‖ exp)`, the CA-registry integrity tag.
    pub hash: [u8; 20],
    /// RSA public exponent, big-endian, 1 to 3 bytes.
    pub exp: Vec<u8>,
    /// RSA modulus, big-endian.
    pub modulus: Vec<u8>,
}

impl EmvPk {
    /// A zeroed skeleton of the given modulus/exponent byte lengths.
    /// Rejects `elen > 3`.
    pub fn new(mlen: usize, elen: usize) -> Result<Self, EmvPkiError> {
        if elen > 3 {
            return Err(EmvPkiError::FieldConstraintViolation(
                "exponent length must not exceed 3 bytes",
            ));
        }
        Ok(Self {
            rid: [0; 5],
            index: 0,
            serial: [0; 3],
            pan: [0; 10],
            expire: 0,
            hash_algo: 0,
            pk_algo: 0,
            hash: [0; 20],
            exp: vec![0; elen],
            modulus: vec![0; mlen],
        })
    }

    /// Builds and self-hashes a CA root key, mirroring `emv_pki_make_ca`:
    /// the caller supplies the generated modulus/exponent, `rid`,
    /// `index`, a packed `expire`, and the hash algorithm the CA entry
    /// will be distributed under; this computes and stores `hash`.
    pub fn make_ca(
        rid: [u8; 5],
        index: u8,
        expire: u32,
        hash_algo: HashAlgo,
        modulus: Vec<u8>,
        exp: Vec<u8>,
    ) -> Result<Self, EmvPkiError> {
        if exp.len() > 3 {
            return Err(EmvPkiError::FieldConstraintViolation(
                "exponent length must not exceed 3 bytes",
            ));
        }
        let mut pk = Self {
            rid,
            index,
            serial: [0; 3],
            pan: [0xFF; 10],
            expire,
            hash_algo: hash_algo.to_byte(),
            pk_algo: PK_ALGO_RSA,
            hash: [0; 20],
            exp,
            modulus,
        };
        pk.hash = compute_self_hash(&pk, hash_algo)?;
        Ok(pk)
    }

    /// Modulus length in bytes.
    pub fn modulus_len(&self) -> usize {
        self.modulus.len()
    }
}

fn compute_self_hash(pk: &EmvPk, algo: HashAlgo) -> Result<[u8; 20], EmvPkiError> {
    let mut ctx = hash_open(algo)?;
    ctx.write(&pk.rid);
    ctx.write(std::slice::from_ref(&pk.index));
    ctx.write(&pk.modulus);
    ctx.write(&pk.exp);
    let digest = ctx.finish();
    let mut out = [0u8; 20];
    if digest.len() != 20 {
        return Err(EmvPkiError::MalformedInput("digest is not 20 bytes"));
    }
    out.copy_from_slice(&digest);
    Ok(out)
}

/// Recomputes `H(rid ‖ index ‖ modulus ‖ exp)` with `pk.hash_algo` and
/// compares it to `pk.hash`. Returns `false` (rather than erroring) when
/// `hash_algo` names an algorithm this engine does not support, since
/// that is itself evidence the key does not verify.
pub fn self_verify(pk: &EmvPk) -> bool {
    let Some(algo) = HashAlgo::from_byte(pk.hash_algo) else {
        return false;
    };
    match compute_self_hash(pk, algo) {
        Ok(digest) => digest == pk.hash,
        Err(_) => false,
    }
}

fn split_colon_hex(token: &str, min_bytes: usize, max_bytes: usize) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    for part in token.split(':') {
        if part.len() != 2 {
            return None;
        }
        out.push(u8::from_str_radix(part, 16).ok()?);
    }
    if out.len() < min_bytes || out.len() > max_bytes {
        return None;
    }
    Some(out)
}

fn fixed_hex(token: &str, nbytes: usize) -> Option<Vec<u8>> {
    if token.len() != nbytes * 2 {
        return None;
    }
    let mut out = Vec::with_capacity(nbytes);
    for chunk in token.as_bytes().chunks(2) {
        let s = std::str::from_utf8(chunk).ok()?;
        out.push(u8::from_str_radix(s, 16).ok()?);
    }
    Some(out)
}

/// Decodes `nbytes` packed-BCD bytes, rejecting any non-decimal digit.
/// Unlike [`fixed_hex`], `'a'..='f'` are not accepted: `expire` is a BCD
/// field (spec.md §4.B), not a raw hex field like `rid`/`index`.
fn fixed_bcd(token: &str, nbytes: usize) -> Option<Vec<u8>> {
    if token.len() != nbytes * 2 {
        return None;
    }
    let mut out = Vec::with_capacity(nbytes);
    for chunk in token.as_bytes().chunks(2) {
        let hi = (chunk[0] as char).to_digit(10)?;
        let lo = (chunk[1] as char).to_digit(10)?;
        out.push((hi * 16 + lo) as u8);
    }
    Some(out)
}

/// Parses one CA-key line from the on-disk registry.
/// Fields are whitespace-separated; within a multi-byte field, bytes are
/// colon-separated except `index`, which is a bare hex byte, and
/// `expire`, which is 6 bare BCD (decimal-only) digits. Fails on any
/// shape deviation rather than returning a partial key.
pub fn parse_registry_line(text: &str) -> Result<EmvPk, EmvPkiError> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let err = || EmvPkiError::MalformedInput("registry line does not match the expected grammar");

    let [rid_tok, index_tok, expire_tok, algo_tok, exp_tok, modulus_tok, hash_algo_tok, hash_tok] =
        tokens.as_slice()
    else {
        return Err(err());
    };

    let rid_bytes = fixed_hex(rid_tok, 5).ok_or_else(err)?;
    let mut rid = [0u8; 5];
    rid.copy_from_slice(&rid_bytes);

    let index = *fixed_hex(index_tok, 1).ok_or_else(err)?.first().unwrap();

    let expire_bytes = fixed_bcd(expire_tok, 3).ok_or_else(err)?;
    if expire_bytes[1] > 0x12 || expire_bytes[2] > 0x31 {
        return Err(err());
    }
    let expire =
        ((expire_bytes[0] as u32) << 16) | ((expire_bytes[1] as u32) << 8) | expire_bytes[2] as u32;

    if *algo_tok != "rsa" {
        return Err(err());
    }

    let exp = split_colon_hex(exp_tok, 1, 3).ok_or_else(err)?;
    let modulus = split_colon_hex(modulus_tok, 1, 256).ok_or_else(err)?;

    if *hash_algo_tok != "sha1" {
        return Err(err());
    }

    let hash_bytes = split_colon_hex(hash_tok, 20, 20).ok_or_else(err)?;
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&hash_bytes);

    Ok(EmvPk {
        rid,
        index,
        serial: [0; 3],
        pan: [0; 10],
        expire,
        hash_algo: HashAlgo::Sha1.to_byte(),
        pk_algo: PK_ALGO_RSA,
        hash,
        exp,
        modulus,
    })
}

fn join_colon_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Emits the canonical registry-line form of `pk`. Round-trips through
/// [`parse_registry_line`] only when `pk.pk_algo` is RSA and
/// `pk.hash_algo` is SHA-1 (the only algorithms the grammar's literal
/// `rsa`/`sha1` keywords accept); other algorithm bytes are emitted as
/// `??XX`, two literal `?` characters followed by that field's own byte
/// in hex, so unsupported entries still produce a readable, if opaque,
/// line.
pub fn emit_registry_line(pk: &EmvPk) -> String {
    let mut fields = Vec::with_capacity(8);
    fields.push(join_colon_hex(&pk.rid));
    fields.push(format!("{:02x}", pk.index));
    fields.push(format!(
        "{:02x}{:02x}{:02x}",
        (pk.expire >> 16) & 0xff,
        (pk.expire >> 8) & 0xff,
        pk.expire & 0xff
    ));
    fields.push(if pk.pk_algo == PK_ALGO_RSA {
        "rsa".to_string()
    } else {
        format!("??{:02x}", pk.pk_algo)
    });
    fields.push(join_colon_hex(&pk.exp));
    fields.push(join_colon_hex(&pk.modulus));
    fields.push(if pk.hash_algo == HashAlgo::Sha1.to_byte() {
        "sha1".to_string()
    } else {
        format!("??{:02x}", pk.hash_algo)
    });
    fields.push(join_colon_hex(&pk.hash));
    fields.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pk() -> EmvPk {
        EmvPk {
            rid: [0xA0, 0x00, 0x00, 0x00, 0x03],
            index: 0x92,
            serial: [0; 3],
            pan: [0; 10],
            expire: 0x22_12_31,
            hash_algo: HashAlgo::Sha1.to_byte(),
            pk_algo: PK_ALGO_RSA,
            hash: [0xAB; 20],
            exp: vec![0x01, 0x00, 0x01],
            modulus: (0u8..128).collect(),
        }
    }

    #[test]
    fn new_rejects_long_exponent() {
        assert!(EmvPk::new(128, 4).is_err());
        assert!(EmvPk::new(128, 3).is_ok());
    }

    #[test]
    fn emit_then_parse_roundtrips() {
        let pk = sample_pk();
        let text = emit_registry_line(&pk);
        let parsed = parse_registry_line(&text).unwrap();
        assert_eq!(parsed, pk);
    }

    #[test]
    fn parse_rejects_wrong_token_count() {
        assert!(parse_registry_line("a0:00:00:00:03 92 221231 rsa 01:00:01 sha1").is_err());
    }

    #[test]
    fn parse_rejects_bad_month() {
        let line =
            "a0:00:00:00:03 92 221331 rsa 01:00:01 aa sha1 ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab";
        assert!(parse_registry_line(line).is_err());
    }

    #[test]
    fn parse_rejects_non_decimal_expire_digit() {
        let line = "a0:00:00:00:03 92 2a1231 rsa 01:00:01 aa sha1 ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab";
        assert!(parse_registry_line(line).is_err());
    }

    #[test]
    fn parse_rejects_non_rsa_literal() {
        let line = "a0:00:00:00:03 92 221231 dsa 01:00:01 aa sha1 ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab:ab";
        assert!(parse_registry_line(line).is_err());
    }

    #[test]
    fn unsupported_algo_bytes_emit_opaque_tag() {
        let mut pk = sample_pk();
        pk.pk_algo = 0x02;
        pk.hash_algo = 0x03;
        let text = emit_registry_line(&pk);
        assert!(text.contains("??02"));
        assert!(text.contains("??03"));
        // Unsupported algorithms do not round-trip.
        assert!(parse_registry_line(&text).is_err());
    }

    #[test]
    fn self_verify_detects_tampered_hash() {
        use emv_pki_crypto::hash_open;
        let mut pk = sample_pk();
        let mut ctx = hash_open(HashAlgo::Sha1).unwrap();
        ctx.write(&pk.rid);
        ctx.write(&[pk.index]);
        ctx.write(&pk.modulus);
        ctx.write(&pk.exp);
        let digest = ctx.finish();
        pk.hash.copy_from_slice(&digest);
        assert!(self_verify(&pk));

        pk.hash[0] ^= 0xFF;
        assert!(!self_verify(&pk));
    }

    #[test]
    fn self_verify_false_for_unknown_hash_algo() {
        let mut pk = sample_pk();
        pk.hash_algo = 0x99;
        assert!(!self_verify(&pk));
    }
}
