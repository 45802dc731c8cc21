use std::ops::RangeInclusive;

use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::TxKind;
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use futures::{stream::FuturesUnordered, StreamExt};
use rand::{rngs::SmallRng, Rng};
use tokio::task::JoinHandle;

use crate::{
    accounts::AccountPool,
    amount::Amount,
    gas::{GasPriceOracle, TRANSFER_GAS_LIMIT},
    prelude::*,
    rpc::EthRpc,
    selection::select_transfer,
};

/// Result of one loop pass. `Skipped` covers every recoverable condition
/// (no eligible transfer, remote error, signing error); the driver retries
/// immediately without counting it.
enum IterationOutcome {
    Submitted,
    Skipped,
}

/// The orchestration loop. Runs selection, signing, broadcast and
/// bookkeeping strictly sequentially on one task; only confirmation
/// watchers run concurrently, and they never touch account state, so the
/// pool has a single writer by construction.
pub struct TransactionEngine<C: EthRpc> {
    client: C,
    pool: AccountPool,
    oracle: GasPriceOracle,
    chain_id: u64,
    target: u64,
    limit: U256,
    pace_ms: RangeInclusive<u64>,
    rng: SmallRng,
    submitted: u64,
    watchers: FuturesUnordered<JoinHandle<()>>,
}

impl<C: EthRpc> TransactionEngine<C> {
    pub fn new(
        client: C,
        pool: AccountPool,
        chain_id: u64,
        target: u64,
        limit: U256,
        pace_ms: RangeInclusive<u64>,
        rng: SmallRng,
    ) -> Self {
        Self {
            client,
            pool,
            oracle: GasPriceOracle::new(),
            chain_id,
            target,
            limit,
            pace_ms,
            rng,
            submitted: 0,
            watchers: FuturesUnordered::new(),
        }
    }

    /// Submits transfers until the target count is reached, then joins every
    /// outstanding confirmation watcher. Returns the pool so callers can
    /// inspect the final local ledger.
    pub async fn run(mut self) -> Result<AccountPool> {
        info!(
            target = self.target,
            accounts = self.pool.len(),
            limit = %Amount::from_wei(self.limit),
            "starting transaction loop"
        );

        while self.submitted < self.target {
            match self.iteration().await {
                IterationOutcome::Submitted => {
                    let delay = self.rng.gen_range(self.pace_ms.clone());
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                IterationOutcome::Skipped => {}
            }
        }

        info!(
            pending = self.watchers.len(),
            "target reached, waiting for confirmation watchers"
        );
        while let Some(res) = self.watchers.next().await {
            if let Err(e) = res {
                warn!("confirmation watcher terminated abnormally: {e}");
            }
        }

        info!(
            submitted = self.submitted,
            pool_total = %Amount::from_wei(self.pool.total_balance()),
            "run complete"
        );
        Ok(self.pool)
    }

    async fn iteration(&mut self) -> IterationOutcome {
        if self.oracle.needs_refresh(self.submitted) {
            match self.client.suggest_gas_price().await {
                Ok(suggested) => self.oracle.update(suggested, self.submitted),
                Err(e) => warn!("gas price refresh failed: {e:#}"),
            }
        }
        let Some(gas_price) = self.oracle.effective_price(&mut self.rng) else {
            return IterationOutcome::Skipped;
        };
        let fee = GasPriceOracle::fee_estimate(gas_price);

        let selection = match select_transfer(&self.pool, self.limit, fee, &mut self.rng) {
            Ok(selection) => selection,
            Err(e) => {
                trace!("selection skipped: {e}");
                return IterationOutcome::Skipped;
            }
        };

        let sender_address = self.pool.get(selection.sender).address;
        let nonce = match self.pool.get(selection.sender).nonce {
            Some(nonce) => nonce,
            None => match self.client.pending_nonce_at(sender_address).await {
                Ok(nonce) => {
                    self.pool.get_mut(selection.sender).nonce = Some(nonce);
                    nonce
                }
                Err(e) => {
                    warn!(address = %sender_address, "nonce query failed: {e:#}");
                    return IterationOutcome::Skipped;
                }
            },
        };

        let receiver_address = self.pool.get(selection.receiver).address;
        let tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce,
            gas_price,
            gas_limit: TRANSFER_GAS_LIMIT,
            to: TxKind::Call(receiver_address),
            value: selection.amount,
            input: Bytes::new(),
        };

        // A failed sign or broadcast leaves the nonce unadvanced, so the next
        // eligible iteration naturally reuses it.
        let raw = match sign_transfer(&self.pool.get(selection.sender).signer, tx) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(address = %sender_address, "failed to sign tx: {e:#}");
                return IterationOutcome::Skipped;
            }
        };

        let hash = match self.client.send_raw_transaction(raw).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!(address = %sender_address, "failed to send tx: {e:#}");
                return IterationOutcome::Skipped;
            }
        };

        // Optimistic local ledger: debit/credit now, accept drift if the
        // transaction later fails on-chain.
        let receiver = self.pool.get_mut(selection.receiver);
        receiver.balance += selection.amount;
        let sender = self.pool.get_mut(selection.sender);
        sender.balance = sender.balance.saturating_sub(selection.amount + fee);
        sender.nonce = Some(nonce + 1);
        self.submitted += 1;

        info!(
            from = %sender_address,
            to = %receiver_address,
            amount = %Amount::from_wei(selection.amount),
            %hash,
            sent = self.submitted,
            "submitted transfer"
        );

        self.spawn_watcher(hash);
        IterationOutcome::Submitted
    }

    fn spawn_watcher(&mut self, hash: TxHash) {
        let client = self.client.clone();
        self.watchers.push(tokio::spawn(async move {
            match client.wait_mined(hash).await {
                Ok(block) => info!(%hash, block, "transaction mined"),
                Err(e) => warn!(%hash, "confirmation failed: {e:#}"),
            }
        }));
    }
}

fn sign_transfer(signer: &PrivateKeySigner, tx: TxLegacy) -> Result<Bytes> {
    let signature = signer.sign_hash_sync(&tx.signature_hash())?;
    let envelope: TxEnvelope = tx.into_signed(signature).into();
    Ok(Bytes::from(envelope.encoded_2718()))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use alloy_consensus::Transaction;
    use alloy_eips::eip2718::Decodable2718;
    use alloy_primitives::keccak256;
    use rand::SeedableRng;

    use super::*;
    use crate::accounts::Account;

    #[derive(Clone, Default)]
    struct MockChain {
        inner: Arc<Mutex<MockState>>,
    }

    #[derive(Default)]
    struct MockState {
        gas_price: u128,
        nonce_queries: usize,
        sent: Vec<Bytes>,
        mined: usize,
    }

    impl EthRpc for MockChain {
        async fn balance_at(&self, _address: Address) -> Result<U256> {
            Ok(U256::ZERO)
        }

        async fn suggest_gas_price(&self) -> Result<u128> {
            Ok(self.inner.lock().unwrap().gas_price)
        }

        async fn chain_id(&self) -> Result<u64> {
            Ok(1)
        }

        async fn pending_nonce_at(&self, _address: Address) -> Result<u64> {
            let mut state = self.inner.lock().unwrap();
            state.nonce_queries += 1;
            Ok(0)
        }

        async fn send_raw_transaction(&self, raw: Bytes) -> Result<TxHash> {
            let hash = keccak256(&raw);
            self.inner.lock().unwrap().sent.push(raw);
            Ok(hash)
        }

        async fn wait_mined(&self, _hash: TxHash) -> Result<u64> {
            self.inner.lock().unwrap().mined += 1;
            Ok(1)
        }
    }

    fn funded_pool(balances: &[u128]) -> AccountPool {
        AccountPool::from_accounts(
            balances
                .iter()
                .map(|b| {
                    let signer = PrivateKeySigner::random();
                    let address = signer.address();
                    Account {
                        signer,
                        address,
                        balance: U256::from(*b),
                        nonce: None,
                    }
                })
                .collect(),
        )
    }

    fn decode(raw: &Bytes) -> TxEnvelope {
        let mut slice: &[u8] = raw.as_ref();
        TxEnvelope::decode_2718(&mut slice).unwrap()
    }

    fn engine(client: MockChain, pool: AccountPool, target: u64) -> TransactionEngine<MockChain> {
        TransactionEngine::new(
            client,
            pool,
            1,
            target,
            U256::from(1_000_000u64),
            0..=0,
            SmallRng::seed_from_u64(7),
        )
    }

    #[tokio::test]
    async fn transfers_conserve_pool_balance_minus_fees() {
        let one_token = 10u128.pow(18);
        let client = MockChain::default();
        client.inner.lock().unwrap().gas_price = 1_000;

        let pool = funded_pool(&[one_token, one_token, one_token]);
        let before = pool.total_balance();

        let pool = engine(client.clone(), pool, 20).run().await.unwrap();
        let after = pool.total_balance();

        let state = client.inner.lock().unwrap();
        assert_eq!(state.sent.len(), 20);

        let fees: U256 = state
            .sent
            .iter()
            .map(|raw| {
                let envelope = decode(raw);
                U256::from(envelope.gas_price().unwrap()) * U256::from(TRANSFER_GAS_LIMIT)
            })
            .sum();
        assert_eq!(before - after, fees);
    }

    #[tokio::test]
    async fn nonce_advances_locally_after_single_query() {
        let client = MockChain::default();
        client.inner.lock().unwrap().gas_price = 1_000;

        // only the first account is funded, so it sends every transfer
        let pool = funded_pool(&[10u128.pow(18), 0]);
        engine(client.clone(), pool, 3).run().await.unwrap();

        let state = client.inner.lock().unwrap();
        assert_eq!(state.nonce_queries, 1);

        let nonces: Vec<u64> = state.sent.iter().map(|raw| decode(raw).nonce()).collect();
        assert_eq!(nonces, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn confirmation_watchers_are_joined_before_exit() {
        let client = MockChain::default();
        client.inner.lock().unwrap().gas_price = 1_000;

        let pool = funded_pool(&[10u128.pow(18), 10u128.pow(18)]);
        engine(client.clone(), pool, 5).run().await.unwrap();

        // every submitted transfer had its watcher spawned and run to
        // completion by the time run() returns
        let state = client.inner.lock().unwrap();
        assert_eq!(state.sent.len(), 5);
        assert_eq!(state.mined, 5);
    }

    #[tokio::test]
    async fn every_transfer_has_a_distinct_counterparty() {
        let one_token = 10u128.pow(18);
        let client = MockChain::default();
        client.inner.lock().unwrap().gas_price = 1_000;

        let pool = funded_pool(&[one_token, one_token, one_token, one_token]);
        let addresses: Vec<Address> = (0..4).map(|i| pool.get(i).address).collect();

        engine(client.clone(), pool, 10).run().await.unwrap();

        let state = client.inner.lock().unwrap();
        for raw in &state.sent {
            let envelope = decode(raw);
            let to = envelope.to().unwrap();
            assert!(addresses.contains(&to));
            let from = envelope.recover_signer().unwrap();
            assert_ne!(from, to);
        }
    }
}
