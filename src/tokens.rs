//! Token list canonicalization
//!
//! Pools require their tokens in ascending address order. Every token list a
//! caller supplies is brought into that order before use.

use crate::error::{OrchestratorError, OrchestratorResult};

use ethers::types::{Address, Bytes, U256};

/// Sort tokens ascending, rejecting empty lists, zero addresses and duplicates
pub fn canonical_tokens(mut tokens: Vec<Address>) -> OrchestratorResult<Vec<Address>> {
    if tokens.is_empty() {
        return Err(OrchestratorError::InvalidTokens("empty token list".to_string()));
    }
    if tokens.iter().any(|t| t.is_zero()) {
        return Err(OrchestratorError::InvalidTokens("zero token address".to_string()));
    }

    tokens.sort();

    if let Some(pair) = tokens.windows(2).find(|w| w[0] == w[1]) {
        return Err(OrchestratorError::InvalidTokens(format!(
            "duplicate token {:?}",
            pair[0]
        )));
    }

    Ok(tokens)
}

/// Canonicalize assets keeping each asset's swap calldata attached to it
pub fn canonical_assets(
    assets: Vec<Address>,
    calldata: Vec<Bytes>,
) -> OrchestratorResult<(Vec<Address>, Vec<Bytes>)> {
    if assets.len() != calldata.len() {
        return Err(OrchestratorError::InvalidInput(format!(
            "{} assets but {} swap calldata entries",
            assets.len(),
            calldata.len()
        )));
    }

    let mut pairs: Vec<(Address, Bytes)> = assets.into_iter().zip(calldata).collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    let (assets, calldata): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
    let assets = canonical_tokens(assets)?;
    Ok((assets, calldata))
}

/// Split a quote amount evenly across `parts`, remainder to the first part
pub fn split_amount(total: U256, parts: usize) -> Vec<U256> {
    if parts == 0 {
        return Vec::new();
    }

    let n = U256::from(parts);
    let share = total / n;
    let mut amounts = vec![share; parts];
    amounts[0] = share + (total - share * n);
    amounts
}

/// Equal pool weights in 1e18 fixed point, remainder to the first token
pub fn equal_weights(parts: usize) -> Vec<U256> {
    split_amount(U256::exp10(18), parts)
}
