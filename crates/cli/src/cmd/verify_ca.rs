use anyhow::Context;
use clap::Parser;
use emv_pki::{parse_registry_line, self_verify};

/// `verify-ca` subcommand.
#[derive(Parser, Debug)]
pub struct Cmd {
    /// One CA registry line, e.g. `a0:00:00:00:03 92 221231 rsa
    /// 01:00:01 <modulus> sha1 <hash>`.
    line: String,
}

impl Cmd {
    pub fn run(&self) -> anyhow::Result<()> {
        let pk = parse_registry_line(&self.line).context("failed to parse registry line")?;
        if self_verify(&pk) {
            println!("OK: rid={:02x?} index={:02x} self-hash verified", pk.rid, pk.index);
            Ok(())
        } else {
            anyhow::bail!("self-hash check failed for rid={:02x?} index={:02x}", pk.rid, pk.index)
        }
    }
}
