use rand::Rng;

use crate::prelude::*;

/// Gas cost of a plain value transfer.
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Refresh the suggested price every this many submitted transactions.
const REFRESH_CADENCE: u64 = 15;

/// Upper bound of the per-transaction price jitter, in wei.
const PRICE_JITTER_MAX: u128 = 2_000_000_000;

/// Cached suggested gas price. Transactions built from the same cached price
/// inside one block window collide in priority, so each transaction gets a
/// randomized jitter on top of the cache.
pub struct GasPriceOracle {
    cached: Option<u128>,
    last_refresh: Option<u64>,
    pub refresh_cadence: u64,
    pub jitter_max: u128,
}

impl GasPriceOracle {
    pub fn new() -> Self {
        Self {
            cached: None,
            last_refresh: None,
            refresh_cadence: REFRESH_CADENCE,
            jitter_max: PRICE_JITTER_MAX,
        }
    }

    pub fn needs_refresh(&self, submitted: u64) -> bool {
        match self.last_refresh {
            None => true,
            Some(mark) => submitted.saturating_sub(mark) >= self.refresh_cadence,
        }
    }

    pub fn update(&mut self, suggested: u128, submitted: u64) {
        // 20% headroom over the node's estimate
        self.cached = Some(suggested + suggested / 5);
        self.last_refresh = Some(submitted);
    }

    /// `None` until the first successful refresh.
    pub fn effective_price(&self, rng: &mut impl Rng) -> Option<u128> {
        let base = self.cached?;
        Some(base + rng.gen_range(0..=self.jitter_max))
    }

    pub fn fee_estimate(price: u128) -> U256 {
        U256::from(price) * U256::from(TRANSFER_GAS_LIMIT)
    }
}

impl Default for GasPriceOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::SmallRng, SeedableRng};

    use super::*;

    #[test]
    fn effective_price_stays_within_jitter_bounds() {
        let mut oracle = GasPriceOracle::new();
        let mut rng = SmallRng::seed_from_u64(1);
        assert_eq!(oracle.effective_price(&mut rng), None);

        oracle.update(1_000_000_000, 0);
        let base = 1_200_000_000; // suggested plus 20% headroom
        for _ in 0..1000 {
            let price = oracle.effective_price(&mut rng).unwrap();
            assert!(price >= base);
            assert!(price <= base + oracle.jitter_max);
        }
    }

    #[test]
    fn refresh_cadence_counts_submitted_transactions() {
        let mut oracle = GasPriceOracle::new();
        assert!(oracle.needs_refresh(0));

        oracle.update(100, 0);
        for submitted in 0..15 {
            assert!(!oracle.needs_refresh(submitted));
        }
        assert!(oracle.needs_refresh(15));

        oracle.update(100, 15);
        assert!(!oracle.needs_refresh(29));
        assert!(oracle.needs_refresh(30));
    }

    #[test]
    fn fee_estimate_scales_by_transfer_gas() {
        assert_eq!(
            GasPriceOracle::fee_estimate(1_000),
            U256::from(21_000_000u64)
        );
    }
}
