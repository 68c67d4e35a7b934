//! Gas estimation and pricing for local chain transactions

use crate::chain::{ChainProvider, GasPrice};
use crate::error::OrchestratorResult;

use ethers::types::U256;
use tracing::debug;

/// Applies safety buffers to node estimates
#[derive(Debug, Clone)]
pub struct GasEstimator {
    /// Buffer percentage for gas limit (e.g., 20 = 20% buffer)
    gas_limit_buffer_percent: u64,
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
}

impl GasEstimator {
    pub fn new() -> Self {
        Self {
            gas_limit_buffer_percent: 20,
            gas_price_buffer_percent: 10,
        }
    }

    /// Buffered gas limit, never above `cap`
    pub fn gas_limit(&self, estimate: U256, cap: u64) -> U256 {
        let buffered = estimate + estimate * self.gas_limit_buffer_percent / 100;
        std::cmp::min(buffered, U256::from(cap))
    }

    /// Node gas price plus buffer
    pub async fn get_gas_price(&self, provider: &ChainProvider) -> OrchestratorResult<GasPrice> {
        let gas_price = provider.get_gas_price().await?;
        let buffered = self.buffer_price(&gas_price, 100 + self.gas_price_buffer_percent);

        debug!("Gas price for chain {}: {:?}", provider.chain_id(), buffered);
        Ok(buffered)
    }

    /// Scale a gas price by `factor` percent
    pub fn buffer_price(&self, current: &GasPrice, factor: u64) -> GasPrice {
        match current {
            GasPrice::Legacy(price) => GasPrice::Legacy(*price * factor / 100),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => GasPrice::Eip1559 {
                max_fee_per_gas: *max_fee_per_gas * factor / 100,
                max_priority_fee_per_gas: *max_priority_fee_per_gas * factor / 100,
            },
        }
    }

    /// Upper bound of the cost in wei
    pub fn calculate_cost(gas_limit: U256, gas_price: &GasPrice) -> U256 {
        match gas_price {
            GasPrice::Legacy(price) => gas_limit * *price,
            GasPrice::Eip1559 { max_fee_per_gas, .. } => gas_limit * *max_fee_per_gas,
        }
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gas_limit_buffer_is_capped() {
        let estimator = GasEstimator::new();
        assert_eq!(estimator.gas_limit(U256::from(100_000), 3_000_000), U256::from(120_000));
        assert_eq!(estimator.gas_limit(U256::from(3_000_000), 3_000_000), U256::from(3_000_000));
    }

    #[test]
    fn test_speed_up_and_cost() {
        let estimator = GasEstimator::new();
        let bumped = estimator.buffer_price(&GasPrice::Legacy(U256::from(100)), 125);
        assert_eq!(bumped, GasPrice::Legacy(U256::from(125)));

        let price = GasPrice::Eip1559 {
            max_fee_per_gas: U256::from(10),
            max_priority_fee_per_gas: U256::from(2),
        };
        assert_eq!(GasEstimator::calculate_cost(U256::from(21_000), &price), U256::from(210_000));
    }
}
