use std::ops::RangeInclusive;

use clap::Parser;
use url::Url;

use crate::{amount::Amount, prelude::*};

/// Every knob is an environment variable with a CLI override. The RPC
/// endpoint is the only required field.
#[derive(Debug, Parser)]
#[command(name = "eth-loadgen", about, long_about = None)]
pub struct Config {
    /// JSON-RPC endpoint of the target node
    #[arg(long, env = "LOADGEN_RPC_URL")]
    pub rpc_url: Url,

    /// BIP-39 mnemonic the account pool is derived from
    #[arg(
        long,
        env = "LOADGEN_MNEMONIC",
        default_value = "test test test test test test test test test test test junk"
    )]
    pub mnemonic: String,

    /// Number of transactions to submit before exiting
    #[arg(long, env = "LOADGEN_REQUESTS", default_value_t = 1000)]
    pub requests: u64,

    /// Number of accounts to derive from the mnemonic
    #[arg(long, env = "LOADGEN_ADDRESSES", default_value_t = 100)]
    pub addresses: u32,

    /// Per-transfer spending cap as a token-denominated decimal string
    #[arg(long, env = "LOADGEN_MAX_AMOUNT", default_value = "1")]
    pub max_amount: String,

    /// Lower bound of the randomized inter-transaction delay
    #[arg(long, env = "LOADGEN_MIN_DELAY_MS", default_value_t = 2000)]
    pub min_delay_ms: u64,

    /// Upper bound of the randomized inter-transaction delay
    #[arg(long, env = "LOADGEN_MAX_DELAY_MS", default_value_t = 9500)]
    pub max_delay_ms: u64,
}

impl Config {
    pub fn max_amount_wei(&self) -> Result<U256> {
        let amount = Amount::parse(&self.max_amount)
            .wrap_err_with(|| format!("invalid max amount {:?}", self.max_amount))?;
        amount
            .to_wei()
            .wrap_err_with(|| format!("invalid max amount {:?}", self.max_amount))
    }

    pub fn pace_ms(&self) -> Result<RangeInclusive<u64>> {
        eyre::ensure!(
            self.min_delay_ms <= self.max_delay_ms,
            "min delay {}ms exceeds max delay {}ms",
            self.min_delay_ms,
            self.max_delay_ms
        );
        Ok(self.min_delay_ms..=self.max_delay_ms)
    }
}
