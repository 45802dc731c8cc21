use rand::Rng;
use thiserror::Error;

use crate::{accounts::AccountPool, prelude::*};

/// How many random indices to probe for a funded sender before giving up and
/// falling back to index 0.
const SENDER_PROBES: usize = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("no transfer possible: insufficient balance")]
    InsufficientBalance,
    #[error("account pool has fewer than two accounts")]
    PoolTooSmall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub sender: usize,
    pub receiver: usize,
    pub amount: U256,
}

/// Picks a funded sender, a distinct receiver and a transfer amount that
/// leaves room for `fee`. Errors mean "skip this iteration", never fatal.
pub fn select_transfer(
    pool: &AccountPool,
    limit: U256,
    fee: U256,
    rng: &mut impl Rng,
) -> Result<Selection, SelectionError> {
    let count = pool.len();
    if count < 2 {
        return Err(SelectionError::PoolTooSmall);
    }

    // Unlucky probes fall back to index 0 even if unfunded; the balance
    // check below turns that into a benign retry.
    let mut sender = 0;
    for _ in 0..SENDER_PROBES {
        let probe = rng.gen_range(0..count);
        if !pool.get(probe).balance.is_zero() {
            sender = probe;
            break;
        }
    }

    // Shifting instead of resampling keeps the distribution unbiased.
    let mut receiver = rng.gen_range(0..count);
    if receiver == sender {
        receiver = (receiver + 1) % count;
    }

    let balance = pool.get(sender).balance;
    let mut candidate = balance.min(limit);
    if balance - candidate < fee {
        candidate = balance.saturating_sub(fee);
    }
    if candidate.is_zero() {
        return Err(SelectionError::InsufficientBalance);
    }

    let amount = rand_below(rng, candidate) + U256::from(1);

    Ok(Selection {
        sender,
        receiver,
        amount,
    })
}

// Uniform draw in [0, bound). The modulo bias is negligible for load-gen
// purposes.
fn rand_below(rng: &mut impl Rng, bound: U256) -> U256 {
    let mut bytes = [0u8; 32];
    rng.fill_bytes(&mut bytes);
    U256::from_be_bytes(bytes) % bound
}
