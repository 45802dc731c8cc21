use std::future::Future;

use alloy_primitives::{U128, U64};
use alloy_rpc_types_eth::TransactionReceipt;

use crate::prelude::*;

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The remote node surface the generator depends on. Implemented for the
/// real JSON-RPC client below and for in-memory mocks in tests.
pub trait EthRpc: Clone + Send + Sync + 'static {
    async fn balance_at(&self, address: Address) -> Result<U256>;
    async fn suggest_gas_price(&self) -> Result<u128>;
    async fn chain_id(&self) -> Result<u64>;
    async fn pending_nonce_at(&self, address: Address) -> Result<u64>;
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<TxHash>;
    /// Resolves with the containing block number once the transaction is
    /// mined. Unbounded: a hanging wait only delays a log line. Spawned onto
    /// detached watcher tasks, hence the explicit `Send` future.
    fn wait_mined(&self, hash: TxHash) -> impl Future<Output = Result<u64>> + Send;
}

impl EthRpc for ReqwestClient {
    async fn balance_at(&self, address: Address) -> Result<U256> {
        self.request("eth_getBalance", (address, "latest"))
            .await
            .map_err(Into::into)
    }

    async fn suggest_gas_price(&self) -> Result<u128> {
        let price: U128 = self.request("eth_gasPrice", ()).await?;
        Ok(price.to())
    }

    async fn chain_id(&self) -> Result<u64> {
        let id: U64 = self.request("eth_chainId", ()).await?;
        Ok(id.to())
    }

    async fn pending_nonce_at(&self, address: Address) -> Result<u64> {
        let nonce: U64 = self
            .request("eth_getTransactionCount", (address, "pending"))
            .await?;
        Ok(nonce.to())
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<TxHash> {
        self.request("eth_sendRawTransaction", (raw,))
            .await
            .map_err(Into::into)
    }

    async fn wait_mined(&self, hash: TxHash) -> Result<u64> {
        loop {
            let receipt: Option<TransactionReceipt> = self
                .request("eth_getTransactionReceipt", (hash,))
                .await?;
            if let Some(receipt) = receipt {
                return receipt.block_number.context("receipt missing block number");
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}
