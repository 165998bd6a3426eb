//! Certificate-chain operations: thin wrappers giving the codec its
//! EMV tag conventions for each recovery/signing flow, plus the
//! Combined DDA (CDA) verification that layers a second,
//! transaction-bound hash on top of the codec's own envelope check.

use emv_pki_crypto::{hash_open, HashAlgo, RsaPrivateCtx};
use emv_pki_tlv::{Tlv, TlvDb};

use crate::codec::{decode_key, decode_message, sign_message, MessageType};
use crate::error::EmvPkiError;
use crate::pk::EmvPk;

/// EMV tags this module reads or writes.
pub mod tags {
    /// Cardholder PAN (BCD, `0xF` terminated).
    pub const PAN: u32 = 0x5A;
    /// Issuer public-key certificate.
    pub const ISSUER_CERT: u32 = 0x90;
    /// Issuer public-key exponent.
    pub const ISSUER_EXP: u32 = 0x9F32;
    /// Issuer public-key remainder.
    pub const ISSUER_REM: u32 = 0x92;
    /// ICC public-key certificate.
    pub const ICC_CERT: u32 = 0x9F46;
    /// ICC public-key exponent.
    pub const ICC_EXP: u32 = 0x9F47;
    /// ICC public-key remainder.
    pub const ICC_REM: u32 = 0x9F48;
    /// ICC PIN-encipherment public-key certificate.
    pub const ICC_PE_CERT: u32 = 0x9F2D;
    /// ICC PIN-encipherment public-key exponent.
    pub const ICC_PE_EXP: u32 = 0x9F2E;
    /// ICC PIN-encipherment public-key remainder.
    pub const ICC_PE_REM: u32 = 0x9F2F;
    /// Signed Static Application Data (the DAC block).
    pub const SDA_CERT: u32 = 0x93;
    /// Recovered Data Authentication Code.
    pub const DAC: u32 = 0x9F45;
    /// Signed Dynamic Application Data (IDN or CDA envelope).
    pub const SDAD_CERT: u32 = 0x9F4B;
    /// Recovered ICC Dynamic Number.
    pub const IDN: u32 = 0x9F4C;
    /// Unpredictable Number.
    pub const UN: u32 = 0x9F37;
    /// Cryptogram Information Data, cross-checked during CDA.
    pub const CID: u32 = 0x9F27;
}

fn require<'a>(db: &'a TlvDb, tag: u32) -> Result<&'a Tlv, EmvPkiError> {
    db.get(tag).ok_or(EmvPkiError::MalformedInput(
        "required TLV record is missing from the database",
    ))
}

fn optional_value<'a>(db: &'a TlvDb, tag: u32) -> &'a [u8] {
    db.get(tag).map(Tlv::value).unwrap_or(&[])
}

/// Recovers the issuer public key from `db`'s `0x90`/`0x9F32`/`0x92`/`0x5A`
/// records, verified against the CA key `signer`.
pub fn recover_issuer_cert(signer: &EmvPk, db: &TlvDb) -> Result<EmvPk, EmvPkiError> {
    let pan = require(db, tags::PAN)?;
    let cert = require(db, tags::ISSUER_CERT)?;
    let exp = require(db, tags::ISSUER_EXP)?;
    let rem = optional_value(db, tags::ISSUER_REM);
    decode_key(
        signer,
        MessageType::IssuerCert,
        pan.value(),
        cert.value(),
        exp.value(),
        rem,
        &[],
    )
}

/// Recovers the ICC (application) public key from `db`'s
/// `0x9F46`/`0x9F47`/`0x9F48`/`0x5A` records, verified against the issuer
/// key `signer`. `sda_data` is the detached static-data-to-authenticate
/// stream bound into the certificate's hash.
pub fn recover_icc_cert(signer: &EmvPk, db: &TlvDb, sda_data: &[u8]) -> Result<EmvPk, EmvPkiError> {
    let pan = require(db, tags::PAN)?;
    let cert = require(db, tags::ICC_CERT)?;
    let exp = require(db, tags::ICC_EXP)?;
    let rem = optional_value(db, tags::ICC_REM);
    decode_key(
        signer,
        MessageType::IccCert,
        pan.value(),
        cert.value(),
        exp.value(),
        rem,
        sda_data,
    )
}

/// Recovers the ICC PIN-encipherment public key from `db`'s
/// `0x9F2D`/`0x9F2E`/`0x9F2F`/`0x5A` records. Same message type as the
/// ICC application key but without a detached additional-data stream.
pub fn recover_icc_pe_cert(signer: &EmvPk, db: &TlvDb) -> Result<EmvPk, EmvPkiError> {
    let pan = require(db, tags::PAN)?;
    let cert = require(db, tags::ICC_PE_CERT)?;
    let exp = require(db, tags::ICC_PE_EXP)?;
    let rem = optional_value(db, tags::ICC_PE_REM);
    decode_key(
        signer,
        MessageType::IccCert,
        pan.value(),
        cert.value(),
        exp.value(),
        rem,
        &[],
    )
}

/// Recovers the 2-byte Data Authentication Code (SDA) from `db`'s
/// `0x93` record, returning it wrapped as TLV `0x9F45`.
pub fn recover_dac(signer: &EmvPk, db: &TlvDb, sda_data: &[u8]) -> Result<Tlv, EmvPkiError> {
    let cert = require(db, tags::SDA_CERT)?;
    let data = decode_message(signer, MessageType::Dac, cert.value(), &[sda_data])?;
    if data.len() < 5 {
        return Err(EmvPkiError::MalformedInput(
            "DAC block shorter than the fixed DAC record",
        ));
    }
    Ok(Tlv::new(tags::DAC, data[3..5].to_vec()))
}

/// Recovers the ICC Dynamic Number (DDA) from `db`'s `0x9F4B` record,
/// returning it wrapped as TLV `0x9F4C`.
pub fn recover_idn(signer: &EmvPk, db: &TlvDb, dyn_data: &[u8]) -> Result<Tlv, EmvPkiError> {
    let cert = require(db, tags::SDAD_CERT)?;
    let data = decode_message(signer, MessageType::SignedDynamicData, cert.value(), &[
        dyn_data,
    ])?;
    let idn = extract_idn(&data, 2)?;
    Ok(Tlv::new(tags::IDN, idn))
}

/// Shared IDN-body bounds check used by both plain DDA recovery and CDA
/// (`plain[4] <= plain[3] - 1`, `plain[3] >= min_inner`).
fn extract_idn(data: &[u8], min_inner: u8) -> Result<Vec<u8>, EmvPkiError> {
    if data.len() < 5 {
        return Err(EmvPkiError::MalformedInput(
            "signed dynamic data shorter than the fixed IDN header",
        ));
    }
    let inner_len = data[3];
    if inner_len < min_inner || (inner_len as usize) > data.len() - 3 {
        return Err(EmvPkiError::FieldConstraintViolation(
            "inner-length byte out of range",
        ));
    }
    let idn_len = data[4] as usize;
    if idn_len > inner_len as usize - 1 {
        return Err(EmvPkiError::FieldConstraintViolation(
            "IDN length exceeds the inner-length budget",
        ));
    }
    if data.len() < 5 + idn_len {
        return Err(EmvPkiError::MalformedInput(
            "signed dynamic data shorter than its declared IDN length",
        ));
    }
    Ok(data[5..5 + idn_len].to_vec())
}

/// Performs Combined DDA/Application-Cryptogram verification: recovers
/// the signed dynamic data in `this_db`'s
/// `0x9F4B` record against `signer` (hashed together with `db`'s `0x9F37`
/// Unpredictable Number), cross-checks the embedded Cryptogram
/// Information Data against `this_db`'s `0x9F27`, and independently
/// re-hashes the PDOL/CRM1/CRM2 transaction buffers together with every
/// non-constructed, non-`0x9F4B` record in `this_db` to validate the
/// cryptogram's own signature over the transaction. Returns the
/// recovered ICC Dynamic Number as TLV `0x9F4C`.
pub fn perform_cda(
    signer: &EmvPk,
    db: &TlvDb,
    this_db: &TlvDb,
    pdol_data: &[u8],
    crm1_data: &[u8],
    crm2_data: &[u8],
) -> Result<Tlv, EmvPkiError> {
    let un = require(db, tags::UN)?;
    let cid = require(this_db, tags::CID)?;
    let cert = require(this_db, tags::SDAD_CERT)?;

    let data = decode_message(signer, MessageType::SignedDynamicData, cert.value(), &[
        un.value(),
    ])?;
    if data.len() < 3 {
        return Err(EmvPkiError::MalformedInput(
            "signed dynamic data too short for a CDA envelope",
        ));
    }
    let inner_len = data[3] as usize;
    if !(30..=data.len().saturating_sub(4)).contains(&inner_len) {
        return Err(EmvPkiError::FieldConstraintViolation(
            "CDA inner-length byte out of range",
        ));
    }
    let idn_len = data[4] as usize;
    if idn_len > inner_len - 1 {
        return Err(EmvPkiError::FieldConstraintViolation(
            "IDN length exceeds the inner-length budget",
        ));
    }

    let cid_pos = 5 + data[4] as usize;
    if cid.value().len() != 1 || cid.value()[0] != *data.get(cid_pos).unwrap_or(&0xFF) {
        tracing::debug!("Cryptogram Information Data does not match the signed value");
        return Err(EmvPkiError::FieldConstraintViolation(
            "Cryptogram Information Data does not match the signed value",
        ));
    }

    let hash_algo = HashAlgo::from_byte(signer.hash_algo).ok_or(
        EmvPkiError::SignatureHeaderInvalid("signer key names an unsupported hash algorithm"),
    )?;
    let hlen = hash_algo.digest_size();
    let digest_pos = cid_pos + 1 + 8;
    if data.len() < digest_pos + hlen {
        return Err(EmvPkiError::MalformedInput(
            "signed dynamic data too short to hold the transaction-hash field",
        ));
    }

    let mut ctx = hash_open(hash_algo)?;
    ctx.write(pdol_data);
    ctx.write(crm1_data);
    ctx.write(crm2_data);
    this_db.visit(|tlv| {
        if emv_pki_tlv::is_constructed(tlv.tag()) || tlv.tag() == tags::SDAD_CERT {
            return;
        }
        ctx.write(&emv_pki_tlv::encode(tlv));
    });
    let digest = ctx.finish();
    if digest != data[digest_pos..digest_pos + hlen] {
        return Err(EmvPkiError::HashMismatch);
    }

    let idn = extract_idn(&data, 30)?;
    Ok(Tlv::new(tags::IDN, idn))
}

fn build_key_message(msgtype: MessageType, pan_prefix: &[u8], pk: &EmvPk) -> Vec<u8> {
    let mlen = pk.modulus.len();
    let mut msg = Vec::with_capacity(1 + pan_prefix.len() + 2 + 3 + 1 + 1 + 1 + 1 + mlen);
    msg.push(msgtype.to_byte());
    msg.extend_from_slice(pan_prefix);
    msg.push(((pk.expire >> 8) & 0xff) as u8); // MM
    msg.push(((pk.expire >> 16) & 0xff) as u8); // YY
    msg.extend_from_slice(&pk.serial);
    msg.push(pk.hash_algo);
    msg.push(pk.pk_algo);
    msg.push(mlen as u8);
    msg.push(pk.exp.len() as u8);
    msg.extend_from_slice(&pk.modulus);
    msg
}

fn sign_key(
    signer_priv: &RsaPrivateCtx,
    pk: &EmvPk,
    msgtype: MessageType,
    pan_len: usize,
    cert_tag: u32,
    exp_tag: u32,
    rem_tag: u32,
    add_data: &[u8],
) -> Result<TlvDb, EmvPkiError> {
    let msg = build_key_message(msgtype, &pk.pan[..pan_len], pk);
    let extras: [&[u8]; 2] = [&pk.exp, add_data];
    let signed = sign_message(signer_priv, &msg, &extras)?;

    let mut db = TlvDb::fixed(cert_tag, signed.signature);
    if let Some(rem) = signed.remainder {
        db.add(TlvDb::fixed(rem_tag, rem));
    }
    db.add(TlvDb::fixed(exp_tag, pk.exp.clone()));
    Ok(db)
}

/// Signs `issuer_pk` with the CA key `ca_priv`, producing a `0x90`
/// certificate (plus `0x92` remainder and `0x9F32` exponent records).
pub fn sign_issuer_cert(ca_priv: &RsaPrivateCtx, issuer_pk: &EmvPk) -> Result<TlvDb, EmvPkiError> {
    sign_key(
        ca_priv,
        issuer_pk,
        MessageType::IssuerCert,
        4,
        tags::ISSUER_CERT,
        tags::ISSUER_EXP,
        tags::ISSUER_REM,
        &[],
    )
}

/// Signs `icc_pk` with the issuer key `issuer_priv`, producing a
/// `0x9F46` certificate bound to `sda_data`.
pub fn sign_icc_cert(
    issuer_priv: &RsaPrivateCtx,
    icc_pk: &EmvPk,
    sda_data: &[u8],
) -> Result<TlvDb, EmvPkiError> {
    sign_key(
        issuer_priv,
        icc_pk,
        MessageType::IccCert,
        10,
        tags::ICC_CERT,
        tags::ICC_EXP,
        tags::ICC_REM,
        sda_data,
    )
}

/// Signs `icc_pe_pk` with the issuer key `issuer_priv`, producing a
/// `0x9F2D` PIN-encipherment certificate.
pub fn sign_icc_pe_cert(issuer_priv: &RsaPrivateCtx, icc_pe_pk: &EmvPk) -> Result<TlvDb, EmvPkiError> {
    sign_key(
        issuer_priv,
        icc_pe_pk,
        MessageType::IccCert,
        10,
        tags::ICC_PE_CERT,
        tags::ICC_PE_EXP,
        tags::ICC_PE_REM,
        &[],
    )
}

/// Signs a 2-byte DAC with the issuer key `issuer_priv`, producing a
/// `0x93` record bound to `sda_data`.
pub fn sign_dac(
    issuer_priv: &RsaPrivateCtx,
    dac: [u8; 2],
    sda_data: &[u8],
) -> Result<TlvDb, EmvPkiError> {
    let msg = vec![3, HashAlgo::Sha1.to_byte(), dac[0], dac[1]];
    let signed = sign_message(issuer_priv, &msg, &[sda_data])?;
    debug_assert!(
        signed.remainder.is_none(),
        "a 4-byte DAC message never overflows part_len for any EMV-sized modulus"
    );
    Ok(TlvDb::fixed(tags::SDA_CERT, signed.signature))
}

/// Signs an ICC Dynamic Number with the ICC key `icc_priv`, producing a
/// `0x9F4B` record bound to `dyn_data`.
pub fn sign_idn(
    icc_priv: &RsaPrivateCtx,
    idn: &[u8],
    dyn_data: &[u8],
) -> Result<TlvDb, EmvPkiError> {
    if idn.len() >= 0xFF {
        return Err(EmvPkiError::FieldConstraintViolation(
            "IDN longer than a single length byte can express",
        ));
    }
    let mut msg = vec![5, HashAlgo::Sha1.to_byte(), idn.len() as u8 + 1, idn.len() as u8];
    msg.extend_from_slice(idn);
    let signed = sign_message(icc_priv, &msg, &[dyn_data])?;
    Ok(TlvDb::fixed(tags::SDAD_CERT, signed.signature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use emv_pki_crypto::RsaKeyPair;
    use rand::SeedableRng;

    fn rng() -> rand_chacha::ChaCha20Rng {
        rand_chacha::ChaCha20Rng::seed_from_u64(99)
    }

    fn ca_key(modulus: Vec<u8>, exp: Vec<u8>, hash: [u8; 20]) -> EmvPk {
        EmvPk {
            rid: [0xA0, 0, 0, 0, 3],
            index: 0x92,
            serial: [0; 3],
            pan: [0xFF; 10],
            expire: 0x22_12_31,
            hash_algo: HashAlgo::Sha1.to_byte(),
            pk_algo: crate::pk::PK_ALGO_RSA,
            hash,
            exp,
            modulus,
        }
    }

    #[test]
    fn issuer_cert_round_trip() {
        let mut r = rng();
        let ca = RsaKeyPair::generate(&mut r, 1024);
        let issuer = RsaKeyPair::generate(&mut r, 1024);
        let ca_pk = ca_key(ca.modulus(), ca.public_exponent(), [0; 20]);

        let mut issuer_pk = EmvPk::new(issuer.modulus().len(), issuer.public_exponent().len())
            .unwrap();
        issuer_pk.rid = ca_pk.rid;
        issuer_pk.index = ca_pk.index;
        issuer_pk.pan[..4].copy_from_slice(&[0x41, 0x11, 0x11, 0x11]);
        issuer_pk.pan[4..].copy_from_slice(&[0xFF; 6]);
        issuer_pk.expire = 0x22_12_31;
        issuer_pk.hash_algo = HashAlgo::Sha1.to_byte();
        issuer_pk.pk_algo = crate::pk::PK_ALGO_RSA;
        issuer_pk.modulus = issuer.modulus();
        issuer_pk.exp = issuer.public_exponent();

        let db = sign_issuer_cert(&ca.private_ctx(), &issuer_pk).unwrap();

        let mut verify_db = TlvDb::new();
        verify_db.push(Tlv::new(
            tags::PAN,
            vec![0x41, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0xFF, 0xFF],
        ));
        verify_db.push(db.get(tags::ISSUER_CERT).unwrap().clone());
        verify_db.push(db.get(tags::ISSUER_EXP).unwrap().clone());
        if let Some(rem) = db.get(tags::ISSUER_REM) {
            verify_db.push(rem.clone());
        }

        let recovered = recover_issuer_cert(&ca_pk, &verify_db).unwrap();
        assert_eq!(recovered.modulus, issuer_pk.modulus);
        assert_eq!(recovered.exp, issuer_pk.exp);
        assert_eq!(recovered.expire, 0x22_12_31);
    }

    #[test]
    fn dac_round_trip() {
        let mut r = rng();
        let issuer = RsaKeyPair::generate(&mut r, 1024);
        let issuer_pk = ca_key(issuer.modulus(), issuer.public_exponent(), [0; 20]);

        let sda: Vec<u8> = (0u8..=0x3F).collect();
        let db = sign_dac(&issuer.private_ctx(), [0xAB, 0xCD], &sda).unwrap();

        let mut verify_db = TlvDb::new();
        verify_db.push(db.get(tags::SDA_CERT).unwrap().clone());

        let dac = recover_dac(&issuer_pk, &verify_db, &sda).unwrap();
        assert_eq!(dac.tag(), tags::DAC);
        assert_eq!(dac.value(), &[0xAB, 0xCD]);
    }

    #[test]
    fn idn_round_trip() {
        let mut r = rng();
        let icc = RsaKeyPair::generate(&mut r, 1024);
        let icc_pk = ca_key(icc.modulus(), icc.public_exponent(), [0; 20]);

        let dyn_data = b"transaction-bound-nonce";
        let idn = [0x11, 0x22, 0x33, 0x44];
        let db = sign_idn(&icc.private_ctx(), &idn, dyn_data).unwrap();

        let mut verify_db = TlvDb::new();
        verify_db.push(db.get(tags::SDAD_CERT).unwrap().clone());

        let recovered = recover_idn(&icc_pk, &verify_db, dyn_data).unwrap();
        assert_eq!(recovered.tag(), tags::IDN);
        assert_eq!(recovered.value(), idn);
    }

    #[test]
    fn sign_idn_rejects_idn_too_long_without_overflow() {
        let mut r = rng();
        let icc = RsaKeyPair::generate(&mut r, 1024);
        let idn = vec![0u8; 0xFF];
        let err = sign_idn(&icc.private_ctx(), &idn, b"dyn").unwrap_err();
        assert!(matches!(err, EmvPkiError::FieldConstraintViolation(_)));
    }
}
