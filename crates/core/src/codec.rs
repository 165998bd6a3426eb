//! The signed-message codec — the core of this crate.
//!
//! EMV "message recovery" turns RSA signature verification inside out:
//! the plaintext is reconstructed by the *public* key operation over the
//! ciphertext, rather than transmitted alongside a conventional
//! signature. [`decode_message`] performs that recovery and the header,
//! layout, and hash checks every message type shares; [`decode_key`]
//! additionally parses the two message types that carry a child RSA
//! public key; [`sign_message`] is the exact inverse, used by the
//! sign/test-bench side.

use emv_pki_crypto::{hash_open, modulus_len_private, rsa_apply_public, rsa_public, HashAlgo, RsaPrivateCtx};

use crate::error::EmvPkiError;
use crate::pk::EmvPk;

/// The four EMV signed-data message types this codec understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    /// msgtype 2 — Issuer public-key certificate.
    IssuerCert,
    /// msgtype 3 — Static Data Authentication DAC block.
    Dac,
    /// msgtype 4 — ICC or ICC-PE public-key certificate.
    IccCert,
    /// msgtype 5 — Signed Dynamic Application Data.
    SignedDynamicData,
}

impl MessageType {
    /// Maps an EMV message-type byte to its variant. Any byte outside
    /// `{2,3,4,5}` is unsupported.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            2 => Some(Self::IssuerCert),
            3 => Some(Self::Dac),
            4 => Some(Self::IccCert),
            5 => Some(Self::SignedDynamicData),
            _ => None,
        }
    }

    /// The EMV message-type byte for this variant.
    pub fn to_byte(self) -> u8 {
        match self {
            Self::IssuerCert => 2,
            Self::Dac => 3,
            Self::IccCert => 4,
            Self::SignedDynamicData => 5,
        }
    }

    /// Offset inside the plaintext body of the hash-algorithm byte that
    /// names the hash used to protect this message. An offset of 0 would
    /// mean "unsupported"; every
    /// variant here has a real offset since `from_byte` already screens
    /// out msgtypes with no table entry.
    pub fn hash_algo_offset(self) -> usize {
        match self {
            Self::IssuerCert => 11,
            Self::Dac => 2,
            Self::IccCert => 17,
            Self::SignedDynamicData => 2,
        }
    }

    /// PAN-prefix length carried in key-bearing message bodies (msgtype
    /// 2 and 4 only); `None` for msgtypes that carry no key.
    fn pan_prefix_len(self) -> Option<usize> {
        match self {
            Self::IssuerCert => Some(4),
            Self::IccCert => Some(10),
            Self::Dac | Self::SignedDynamicData => None,
        }
    }
}

/// Recovers and validates the signed-data envelope in `cert` against
/// `signer_pk`, returning the plaintext body with the trailing hash and
/// `0xBC` trailer stripped (header byte kept at index 0).
///
/// `extras` are additional detached buffers fed into the hash after the
/// message body, in the exact order the sign side fed them — this order
/// is part of the wire contract.
pub fn decode_message(
    signer_pk: &EmvPk,
    msgtype: MessageType,
    cert: &[u8],
    extras: &[&[u8]],
) -> Result<Vec<u8>, EmvPkiError> {
    if cert.len() != signer_pk.modulus_len() {
        return Err(EmvPkiError::MalformedInput(
            "certificate length does not match the signer's modulus length",
        ));
    }

    let signer_ctx = rsa_public(&signer_pk.modulus, &signer_pk.exp);
    let plain = rsa_apply_public(&signer_ctx, cert)?;
    let n = plain.len();
    if n != signer_pk.modulus_len() {
        return Err(EmvPkiError::MalformedInput(
            "recovered plaintext length does not match the modulus length",
        ));
    }
    if n < 2 {
        return Err(EmvPkiError::SignatureHeaderInvalid(
            "plaintext too short to hold header and trailer",
        ));
    }

    if plain[0] != 0x6A || plain[n - 1] != 0xBC || plain[1] != msgtype.to_byte() {
        tracing::debug!(
            header = plain[0],
            trailer = plain[n - 1],
            got_msgtype = plain[1],
            want_msgtype = msgtype.to_byte(),
            "signed-data envelope header check failed"
        );
        return Err(EmvPkiError::SignatureHeaderInvalid(
            "missing 0x6A/0xBC envelope bytes or message-type mismatch",
        ));
    }

    let hash_pos = msgtype.hash_algo_offset();
    let hash_algo = HashAlgo::from_byte(
        *plain
            .get(hash_pos)
            .ok_or(EmvPkiError::SignatureHeaderInvalid(
                "hash-algorithm byte offset outside plaintext",
            ))?,
    )
    .ok_or(EmvPkiError::SignatureHeaderInvalid(
        "unsupported hash-algorithm byte",
    ))?;
    let hlen = hash_algo.digest_size();

    // The hash-algorithm byte must lie strictly inside the hashed
    // prefix, not merely inside the plaintext.
    if n < 1 + hlen || hash_pos + 1 > n - 1 - hlen {
        return Err(EmvPkiError::SignatureHeaderInvalid(
            "hash-algorithm byte offset falls outside the hashed body",
        ));
    }

    let mut ctx = hash_open(hash_algo)?;
    ctx.write(&plain[1..n - 1 - hlen]);
    for extra in extras {
        ctx.write(extra);
    }
    let digest = ctx.finish();

    if digest != plain[n - 1 - hlen..n - 1] {
        tracing::debug!(msgtype = ?msgtype, "recomputed digest does not match embedded hash");
        return Err(EmvPkiError::HashMismatch);
    }

    Ok(plain[..n - hlen - 1].to_vec())
}

fn cn_length(value: &[u8]) -> usize {
    for (i, &b) in value.iter().enumerate() {
        if b >> 4 == 0xF {
            return 2 * i;
        }
        if b & 0xF == 0xF {
            return 2 * i + 1;
        }
    }
    2 * value.len()
}

fn cn_nibble(value: &[u8], pos: usize) -> u8 {
    match value.get(pos / 2) {
        Some(&b) if pos % 2 == 0 => b >> 4,
        Some(&b) => b & 0xF,
        None => 0xF,
    }
}

/// Recovers a child EMV public key from a msgtype-2 (issuer) or msgtype-4
/// (ICC/ICC-PE) certificate. `pan` is the
/// full PAN TLV value (BCD, `0xF` end-of-number); `rem` is the
/// certificate remainder (empty if none); `extra` is the detached
/// additional-data stream the message type requires (SDA data for ICC
/// certs, empty for issuer and ICC-PE certs).
pub fn decode_key(
    signer_pk: &EmvPk,
    msgtype: MessageType,
    pan: &[u8],
    cert: &[u8],
    exp: &[u8],
    rem: &[u8],
    extra: &[u8],
) -> Result<EmvPk, EmvPkiError> {
    let pan_len = msgtype
        .pan_prefix_len()
        .ok_or(EmvPkiError::MalformedInput(
            "message type does not carry a public key",
        ))?;

    let extras: [&[u8]; 3] = [rem, exp, extra];
    let data = decode_message(signer_pk, msgtype, cert, &extras)?;
    if data.len() < 11 + pan_len {
        return Err(EmvPkiError::MalformedInput(
            "recovered key body shorter than the fixed key-record header",
        ));
    }

    let embedded_pan = &data[2..2 + pan_len];
    let full_len = cn_length(pan);
    let embedded_len = cn_length(embedded_pan);

    let prefix_ok = match msgtype {
        MessageType::IssuerCert => (4..=full_len).contains(&embedded_len),
        MessageType::IccCert => embedded_len == full_len,
        _ => unreachable!("pan_prefix_len already screened this msgtype"),
    };
    if !prefix_ok {
        tracing::debug!(
            msgtype = ?msgtype,
            embedded_len,
            full_len,
            "embedded PAN prefix length disagrees with the cardholder PAN"
        );
        return Err(EmvPkiError::FieldConstraintViolation(
            "embedded PAN prefix length disagrees with the cardholder PAN",
        ));
    }
    for i in 0..embedded_len {
        if cn_nibble(pan, i) != cn_nibble(embedded_pan, i) {
            tracing::debug!(msgtype = ?msgtype, nibble = i, "embedded PAN prefix nibble mismatch");
            return Err(EmvPkiError::FieldConstraintViolation(
                "embedded PAN prefix does not match the cardholder PAN",
            ));
        }
    }

    let mlen = data[9 + pan_len] as usize;
    let elen = data[10 + pan_len] as usize;
    if elen != exp.len() {
        return Err(EmvPkiError::FieldConstraintViolation(
            "declared exponent length does not match the exponent TLV",
        ));
    }
    let body_available = data.len() - (11 + pan_len);
    if mlen > body_available + rem.len() {
        return Err(EmvPkiError::FieldConstraintViolation(
            "declared modulus length exceeds the plaintext body plus remainder",
        ));
    }

    let from_body = mlen.min(body_available);
    let from_rem = mlen - from_body;
    let mut modulus = Vec::with_capacity(mlen);
    modulus.extend_from_slice(&data[11 + pan_len..11 + pan_len + from_body]);
    modulus.extend_from_slice(&rem[..from_rem]);

    let mut pan_out = [0xFFu8; 10];
    pan_out[..pan_len].copy_from_slice(embedded_pan);

    let mut serial = [0u8; 3];
    serial.copy_from_slice(&data[4 + pan_len..7 + pan_len]);

    Ok(EmvPk {
        rid: signer_pk.rid,
        index: signer_pk.index,
        serial,
        pan: pan_out,
        expire: ((data[3 + pan_len] as u32) << 16) | ((data[2 + pan_len] as u32) << 8) | 0x31,
        hash_algo: data[7 + pan_len],
        pk_algo: data[8 + pan_len],
        hash: [0; 20],
        exp: exp.to_vec(),
        modulus,
    })
}

/// A freshly produced signature, plus the remainder bytes that did not
/// fit in the envelope (if the message overflowed `part_len`).
pub struct SignedMessage {
    /// The raw RSA signature: apply `rsa_apply_public` with the matching
    /// public key to recover the envelope `sign_message` built.
    pub signature: Vec<u8>,
    /// Overflow bytes that must be carried alongside the signature as a
    /// separate "remainder" TLV.
    pub remainder: Option<Vec<u8>>,
}

/// Builds and signs the EMV envelope around `msg`, the exact inverse of
/// [`decode_message`]. `extras` are fed to the
/// hash after `msg`'s remainder in the same order the verify side
/// expects them.
///
/// Always hashes with SHA-1 regardless of any hash-algorithm byte
/// embedded in `msg` — this is the documented behavior of the
/// signing/test-bench side, not a verification-side contract, and must
/// not be "fixed" to honor an embedded algorithm byte.
pub fn sign_message(
    signer_priv: &RsaPrivateCtx,
    msg: &[u8],
    extras: &[&[u8]],
) -> Result<SignedMessage, EmvPkiError> {
    let tmp_len = modulus_len_private(signer_priv);
    const HLEN: usize = 20; // SHA-1, fixed regardless of message type.
    if tmp_len < 2 + HLEN {
        return Err(EmvPkiError::FieldConstraintViolation(
            "modulus too small to hold the signed-data envelope",
        ));
    }
    let part_len = tmp_len - 2 - HLEN;

    let mut tmp = vec![0u8; tmp_len];
    tmp[0] = 0x6A;
    tmp[tmp_len - 1] = 0xBC;

    let remainder = if msg.len() > part_len {
        tmp[1..1 + part_len].copy_from_slice(&msg[..part_len]);
        Some(msg[part_len..].to_vec())
    } else {
        tmp[1..1 + msg.len()].copy_from_slice(msg);
        tmp[1 + msg.len()..1 + part_len].fill(0xBB);
        None
    };

    let mut ctx = hash_open(HashAlgo::Sha1)?;
    ctx.write(&tmp[1..1 + part_len]);
    if let Some(rem) = &remainder {
        ctx.write(rem);
    }
    for extra in extras {
        ctx.write(extra);
    }
    let digest = ctx.finish();
    tmp[1 + part_len..1 + part_len + HLEN].copy_from_slice(&digest);

    let signature = emv_pki_crypto::rsa_apply_private(signer_priv, &tmp)?;
    Ok(SignedMessage {
        signature,
        remainder,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use emv_pki_crypto::RsaKeyPair;
    use rand::SeedableRng;

    fn rng() -> rand_chacha::ChaCha20Rng {
        rand_chacha::ChaCha20Rng::seed_from_u64(7)
    }

    fn signer_pk(modulus: Vec<u8>, exp: Vec<u8>) -> EmvPk {
        EmvPk {
            rid: [0xA0, 0, 0, 0, 3],
            index: 1,
            serial: [0; 3],
            pan: [0; 10],
            expire: 0,
            hash_algo: 0,
            pk_algo: crate::pk::PK_ALGO_RSA,
            hash: [0; 20],
            exp,
            modulus,
        }
    }

    #[test]
    fn sign_then_decode_with_matching_msgtype() {
        let mut r = rng();
        let key = RsaKeyPair::generate(&mut r, 1024);
        let signer = signer_pk(key.modulus(), key.public_exponent());
        let priv_ctx = key.private_ctx();

        // msgtype=3 (Dac), hash_algo byte at offset 2 = 0x01 (SHA-1).
        let mut msg = vec![0u8; 4];
        msg[0] = 3;
        msg[1] = HashAlgo::Sha1.to_byte();
        msg[2] = 0xAB;
        msg[3] = 0xCD;

        let signed = sign_message(&priv_ctx, &msg, &[b"sda-stream".as_slice()]).unwrap();
        let data = decode_message(
            &signer,
            MessageType::Dac,
            &signed.signature,
            &[b"sda-stream".as_slice()],
        )
        .unwrap();
        assert_eq!(&data[2..4], &[0xAB, 0xCD]);
    }

    #[test]
    fn bit_flip_in_ciphertext_fails_hash_or_header() {
        let mut r = rng();
        let key = RsaKeyPair::generate(&mut r, 1024);
        let signer = signer_pk(key.modulus(), key.public_exponent());
        let priv_ctx = key.private_ctx();

        let mut msg = vec![0u8; 4];
        msg[0] = 3;
        msg[1] = HashAlgo::Sha1.to_byte();
        msg[2] = 0xAB;
        msg[3] = 0xCD;
        let mut signed = sign_message(&priv_ctx, &msg, &[]).unwrap();
        signed.signature[10] ^= 0x01;

        let err = decode_message(&signer, MessageType::Dac, &signed.signature, &[]).unwrap_err();
        assert!(matches!(
            err,
            EmvPkiError::HashMismatch | EmvPkiError::SignatureHeaderInvalid(_)
        ));
    }

    #[test]
    fn wrong_length_cert_is_rejected_before_hashing() {
        let mut r = rng();
        let key = RsaKeyPair::generate(&mut r, 1024);
        let signer = signer_pk(key.modulus(), key.public_exponent());
        let short = vec![0u8; signer.modulus_len() - 1];
        let err = decode_message(&signer, MessageType::Dac, &short, &[]).unwrap_err();
        assert_eq!(
            err,
            EmvPkiError::MalformedInput(
                "certificate length does not match the signer's modulus length"
            )
        );
    }

    #[test]
    fn icc_cert_pan_mismatch_is_field_constraint_violation() {
        let mut r = rng();
        let ca_key = RsaKeyPair::generate(&mut r, 1024);
        let icc_key = RsaKeyPair::generate(&mut r, 1024);
        let signer = signer_pk(ca_key.modulus(), ca_key.public_exponent());
        let ca_priv = ca_key.private_ctx();

        let pan = [0x41, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0xFF, 0xFF];
        let mut msg = vec![0u8; 1 + 10 + 2 + 3 + 1 + 1 + 1 + 1 + icc_key.modulus().len()];
        let mut pos = 0;
        msg[pos] = 4;
        pos += 1;
        msg[pos..pos + 10].copy_from_slice(&pan);
        pos += 10;
        msg[pos] = 0x12; // MM
        pos += 1;
        msg[pos] = 0x25; // YY
        pos += 1;
        pos += 3; // serial, zero
        msg[pos] = HashAlgo::Sha1.to_byte();
        pos += 1;
        msg[pos] = crate::pk::PK_ALGO_RSA;
        pos += 1;
        msg[pos] = icc_key.modulus().len() as u8;
        pos += 1;
        msg[pos] = icc_key.public_exponent().len() as u8;
        pos += 1;
        msg[pos..].copy_from_slice(&icc_key.modulus());

        let signed = sign_message(
            &ca_priv,
            &msg,
            &[&icc_key.public_exponent(), b"sda".as_slice()],
        )
        .unwrap();
        let rem = signed.remainder.clone().unwrap_or_default();

        let wrong_pan = [0x41, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x12, 0xFF, 0xFF];
        let err = decode_key(
            &signer,
            MessageType::IccCert,
            &wrong_pan,
            &signed.signature,
            &icc_key.public_exponent(),
            &rem,
            b"sda",
        )
        .unwrap_err();
        assert!(matches!(err, EmvPkiError::FieldConstraintViolation(_)));

        let recovered = decode_key(
            &signer,
            MessageType::IccCert,
            &pan,
            &signed.signature,
            &icc_key.public_exponent(),
            &rem,
            b"sda",
        )
        .unwrap();
        assert_eq!(recovered.modulus, icc_key.modulus());
    }
}
