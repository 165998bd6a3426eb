use anyhow::Context;
use clap::Parser;
use emv_pki::codec::MessageType;
use emv_pki::{decode_key, parse_registry_line};

/// `recover-issuer` subcommand: recovers the issuer public key embedded
/// in a msgtype-2 certificate, given the CA key that signed it.
#[derive(Parser, Debug)]
pub struct Cmd {
    /// The signing CA's registry line.
    #[arg(long)]
    ca: String,
    /// Cardholder PAN, hex BCD (as read from tag `5A`).
    #[arg(long)]
    pan: String,
    /// Issuer certificate, hex (tag `90`).
    #[arg(long)]
    cert: String,
    /// Issuer public exponent, hex (tag `9F32`).
    #[arg(long)]
    exp: String,
    /// Certificate remainder, hex (tag `92`); omit if absent.
    #[arg(long, default_value = "")]
    rem: String,
}

impl Cmd {
    pub fn run(&self) -> anyhow::Result<()> {
        let ca_pk = parse_registry_line(&self.ca).context("failed to parse CA registry line")?;
        let pan = hex::decode(&self.pan).context("pan must be hex")?;
        let cert = hex::decode(&self.cert).context("cert must be hex")?;
        let exp = hex::decode(&self.exp).context("exp must be hex")?;
        let rem = hex::decode(&self.rem).context("rem must be hex")?;

        let issuer_pk = decode_key(&ca_pk, MessageType::IssuerCert, &pan, &cert, &exp, &rem, &[])
            .context("issuer certificate did not recover")?;

        println!("rid={:02x?}", issuer_pk.rid);
        println!("index={:02x}", issuer_pk.index);
        println!("serial={:02x?}", issuer_pk.serial);
        println!("expire={:06x}", issuer_pk.expire);
        println!("modulus={}", hex::encode(&issuer_pk.modulus));
        println!("exp={}", hex::encode(&issuer_pk.exp));
        Ok(())
    }
}
