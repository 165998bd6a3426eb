//! Command-line demo/test bench for the EMV PKI engine. This binary
//! carries no business logic of its own; every subcommand is a thin
//! hex/text wrapper around `emv-pki`'s public API, wired up the way a
//! terminal integrator would exercise the library from a shell.

mod cmd;

use std::sync::Arc;

use clap::Parser;
use emv_pki_crypto::SoftwareBackend;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// `emv-pki` — recover, verify, and synthesize EMV certificate chains.
#[derive(Parser, Debug)]
#[command(name = "emv-pki", about = "EMV chip-card PKI engine test bench")]
struct Cli {
    /// Crypto backend to install before running the subcommand. Only
    /// `software` exists today; the flag exists so a hardware-backed
    /// backend can be added later without breaking the CLI surface.
    #[arg(long, default_value = "software", global = true)]
    backend: String,

    #[command(subcommand)]
    command: cmd::Command,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.backend.as_str() {
        "software" => emv_pki_crypto::init_backend(Arc::new(SoftwareBackend)),
        other => anyhow::bail!("unknown crypto backend '{other}' (only 'software' is available)"),
    }
    info!(backend = %cli.backend, command = ?cli.command, "emv-pki starting");

    cli.command.run()
}
