use anyhow::Context;
use clap::Parser;
use emv_pki::pk::PK_ALGO_RSA;
use emv_pki::{emit_registry_line, EmvPk};
use emv_pki_crypto::{HashAlgo, RsaKeyPair};
use rand::SeedableRng;

/// `gen-ca` subcommand.
#[derive(Parser, Debug)]
pub struct Cmd {
    /// 5-byte RID, hex, no separators (e.g. a0000000 03).
    #[arg(long)]
    rid: String,
    /// Key index under the RID, hex byte.
    #[arg(long)]
    index: String,
    /// Expiry year/month, packed as `YYMM` hex digits; the day is forced
    /// to `0x31` as CA entries have no real expiry day.
    #[arg(long, default_value = "3012")]
    yymm: String,
    /// Modulus bit length.
    #[arg(long, default_value_t = 1024)]
    bits: usize,
    /// Deterministic seed for the key-generation RNG. Real CA keys must
    /// never be generated this way; this exists for reproducible demos
    /// and tests only.
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Also print the private exponent, for chaining into other demo
    /// commands. Never do this with a real key.
    #[arg(long, default_value_t = false)]
    show_private: bool,
}

impl Cmd {
    pub fn run(&self) -> anyhow::Result<()> {
        let rid_bytes = hex::decode(self.rid.replace(' ', "")).context("rid must be hex")?;
        if rid_bytes.len() != 5 {
            anyhow::bail!("rid must be exactly 5 bytes");
        }
        let mut rid = [0u8; 5];
        rid.copy_from_slice(&rid_bytes);

        let index_bytes = hex::decode(&self.index).context("index must be hex")?;
        let [index] = index_bytes.as_slice() else {
            anyhow::bail!("index must be exactly 1 byte");
        };

        let yymm_bytes = hex::decode(&self.yymm).context("yymm must be hex")?;
        let [yy, mm] = yymm_bytes.as_slice() else {
            anyhow::bail!("yymm must be exactly 2 bytes");
        };
        let expire = ((*yy as u32) << 16) | ((*mm as u32) << 8) | 0x31;

        let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(self.seed);
        let key = RsaKeyPair::generate(&mut rng, self.bits);

        let pk = EmvPk::make_ca(
            rid,
            *index,
            expire,
            HashAlgo::Sha1,
            key.modulus(),
            key.public_exponent(),
        )?;
        debug_assert_eq!(pk.pk_algo, PK_ALGO_RSA);

        println!("{}", emit_registry_line(&pk));
        if self.show_private {
            println!("private_exponent={}", hex::encode(key.private_exponent()));
        }
        Ok(())
    }
}
