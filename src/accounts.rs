use alloy_signer_local::{coins_bip39::English, MnemonicBuilder, PrivateKeySigner};

use crate::{prelude::*, rpc::EthRpc};

const BALANCE_RETRIES: u32 = 5;
const BALANCE_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// One derived account. `nonce` stays `None` until first queried; after that
/// it is advanced locally, never re-fetched, so the local view cannot race
/// the node's.
pub struct Account {
    pub signer: PrivateKeySigner,
    pub address: Address,
    pub balance: U256,
    pub nonce: Option<u64>,
}

/// Dense registry of derived accounts, indexed by derivation path index.
/// Only the engine loop mutates it.
pub struct AccountPool {
    accounts: Vec<Account>,
}

impl AccountPool {
    pub fn from_accounts(accounts: Vec<Account>) -> Self {
        Self { accounts }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn get(&self, index: usize) -> &Account {
        &self.accounts[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Account {
        &mut self.accounts[index]
    }

    pub fn total_balance(&self) -> U256 {
        self.accounts.iter().map(|a| a.balance).sum()
    }
}

/// BIP-39/44 derivation at `m/44'/60'/0'/0/{index}`.
pub fn derive_key(mnemonic: &str, index: u32) -> Result<PrivateKeySigner> {
    MnemonicBuilder::<English>::default()
        .phrase(mnemonic)
        .derivation_path(format!("m/44'/60'/0'/0/{index}"))?
        .build()
        .wrap_err_with(|| format!("failed to derive key at index {index}"))
}

/// Derives `count` accounts and fetches their balances. Balance queries retry
/// a bounded number of times with fixed backoff; on exhaustion the account is
/// registered with a zero balance so a flaky node degrades the run instead of
/// aborting it.
pub async fn populate<C: EthRpc>(client: &C, mnemonic: &str, count: u32) -> Result<AccountPool> {
    let started = Instant::now();
    info!(count, "deriving accounts and fetching balances");

    let mut accounts = Vec::with_capacity(count as usize);
    for index in 0..count {
        let signer = derive_key(mnemonic, index)?;
        let address = signer.address();

        let mut balance = U256::ZERO;
        for attempt in 1..=BALANCE_RETRIES {
            match client.balance_at(address).await {
                Ok(b) => {
                    balance = b;
                    break;
                }
                Err(e) => {
                    warn!(%address, attempt, "balance query failed: {e:#}");
                    if attempt == BALANCE_RETRIES {
                        warn!(%address, "retries exhausted, registering account with zero balance");
                    } else {
                        tokio::time::sleep(BALANCE_RETRY_BACKOFF).await;
                    }
                }
            }
        }

        accounts.push(Account {
            signer,
            address,
            balance,
            nonce: None,
        });
    }

    info!(elapsed = ?started.elapsed(), "account pool ready");
    Ok(AccountPool::from_accounts(accounts))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    const TEST_MNEMONIC: &str = "test test test test test test test test test test test junk";

    #[test]
    fn derives_well_known_addresses() {
        let s0 = derive_key(TEST_MNEMONIC, 0).unwrap();
        assert_eq!(
            s0.address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
                .parse::<Address>()
                .unwrap()
        );
        let s1 = derive_key(TEST_MNEMONIC, 1).unwrap();
        assert_eq!(
            s1.address(),
            "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"
                .parse::<Address>()
                .unwrap()
        );
    }

    #[test]
    fn rejects_garbage_mnemonic() {
        assert!(derive_key("definitely not a mnemonic", 0).is_err());
    }

    #[derive(Clone)]
    struct FlakyChain {
        failures_left: Arc<Mutex<u32>>,
        balance: U256,
    }

    impl EthRpc for FlakyChain {
        async fn balance_at(&self, _address: Address) -> Result<U256> {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                eyre::bail!("node unavailable");
            }
            Ok(self.balance)
        }

        async fn suggest_gas_price(&self) -> Result<u128> {
            unimplemented!()
        }

        async fn chain_id(&self) -> Result<u64> {
            unimplemented!()
        }

        async fn pending_nonce_at(&self, _address: Address) -> Result<u64> {
            unimplemented!()
        }

        async fn send_raw_transaction(&self, _raw: Bytes) -> Result<TxHash> {
            unimplemented!()
        }

        async fn wait_mined(&self, _hash: TxHash) -> Result<u64> {
            unimplemented!()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn population_retries_then_succeeds() {
        let client = FlakyChain {
            failures_left: Arc::new(Mutex::new(2)),
            balance: U256::from(1000u64),
        };
        let pool = populate(&client, TEST_MNEMONIC, 1).await.unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(0).balance, U256::from(1000u64));
        assert_eq!(pool.get(0).nonce, None);
    }

    #[tokio::test(start_paused = true)]
    async fn population_degrades_to_zero_balance() {
        let client = FlakyChain {
            failures_left: Arc::new(Mutex::new(100)),
            balance: U256::from(1000u64),
        };
        let pool = populate(&client, TEST_MNEMONIC, 2).await.unwrap();
        assert_eq!(pool.len(), 2);
        assert!(pool.get(0).balance.is_zero());
        assert!(pool.get(1).balance.is_zero());
        assert!(pool.total_balance().is_zero());
    }
}
