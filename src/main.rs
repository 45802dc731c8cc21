#![allow(async_fn_in_trait)]

use alloy_rpc_client::ClientBuilder;
use clap::Parser;
use rand::{rngs::SmallRng, SeedableRng};
use tracing_subscriber::util::SubscriberInitExt;

use crate::{config::Config, engine::TransactionEngine, prelude::*, rpc::EthRpc};

pub mod accounts;
pub mod amount;
pub mod config;
pub mod engine;
pub mod gas;
pub mod prelude;
pub mod rpc;
pub mod selection;

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging()?;

    let config = Config::parse();
    let limit = config.max_amount_wei()?;
    let pace_ms = config.pace_ms()?;

    let client: ReqwestClient = ClientBuilder::default().http(config.rpc_url.clone());
    let chain_id = client
        .chain_id()
        .await
        .wrap_err_with(|| format!("failed to reach rpc endpoint {}", config.rpc_url))?;
    info!(chain_id, rpc = %config.rpc_url, "connected");

    let pool = accounts::populate(&client, &config.mnemonic, config.addresses).await?;

    let engine = TransactionEngine::new(
        client,
        pool,
        chain_id,
        config.requests,
        limit,
        pace_ms,
        SmallRng::from_entropy(),
    );
    engine.run().await?;

    Ok(())
}

fn setup_logging() -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

    let stdio_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    tracing_subscriber::registry()
        .with(stdio_layer)
        .try_init()
        .map_err(Into::into)
}
