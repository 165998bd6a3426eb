pub mod decode;
pub mod gen_ca;
pub mod recover_issuer;
pub mod verify_ca;

use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse and self-verify a CA registry line.
    VerifyCa(verify_ca::Cmd),
    /// Generate a fresh CA root key and print its registry line.
    GenCa(gen_ca::Cmd),
    /// Recover an issuer public key from an issuer certificate.
    RecoverIssuer(recover_issuer::Cmd),
    /// Recover the plaintext body of an arbitrary signed message.
    Decode(decode::Cmd),
}

impl Command {
    pub fn run(&self) -> anyhow::Result<()> {
        match self {
            Self::VerifyCa(cmd) => cmd.run(),
            Self::GenCa(cmd) => cmd.run(),
            Self::RecoverIssuer(cmd) => cmd.run(),
            Self::Decode(cmd) => cmd.run(),
        }
    }
}
