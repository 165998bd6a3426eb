use anyhow::Context;
use clap::Parser;
use emv_pki::codec::MessageType;
use emv_pki::{decode_message, parse_registry_line};

/// `decode` subcommand: recovers the plaintext body of an arbitrary
/// signed message without interpreting it further, for poking at
/// envelopes the higher-level chain operations reject.
#[derive(Parser, Debug)]
pub struct Cmd {
    /// The signing key's registry line.
    #[arg(long)]
    signer: String,
    /// EMV message type byte (2, 3, 4, or 5).
    #[arg(long)]
    msgtype: u8,
    /// Signed message, hex.
    #[arg(long)]
    message: String,
    /// Detached extra buffers fed into the hash after the message body,
    /// in sign-side order. Repeat for multiple buffers.
    #[arg(long = "extra", value_name = "HEX")]
    extras: Vec<String>,
}

impl Cmd {
    pub fn run(&self) -> anyhow::Result<()> {
        let signer = parse_registry_line(&self.signer).context("failed to parse signer registry line")?;
        let msgtype = MessageType::from_byte(self.msgtype)
            .ok_or_else(|| anyhow::anyhow!("unsupported message type byte {}", self.msgtype))?;
        let message = hex::decode(&self.message).context("message must be hex")?;
        let extras: Vec<Vec<u8>> = self
            .extras
            .iter()
            .map(|e| hex::decode(e).context("extra buffer must be hex"))
            .collect::<Result<_, _>>()?;
        let extra_slices: Vec<&[u8]> = extras.iter().map(Vec::as_slice).collect();

        let body = decode_message(&signer, msgtype, &message, &extra_slices)
            .context("message failed to recover")?;
        println!("{}", hex::encode(body));
        Ok(())
    }
}
