//! Transaction submission helpers: gas padding, submit, and the bounded
//! confirmation wait.
//!
//! A confirmation wait races the receipt against a fixed timeout. Losing the
//! race reports [`ClientError::Timeout`] carrying the transaction hash; the
//! transaction itself is left alone and may still land.

use crate::blockchain::ChainBackend;
use crate::errors::ClientError;
use crate::metrics::TRANSACTIONS;
use ethers::types::{TransactionReceipt, TransactionRequest, H256, U256};
use std::time::Duration;
use tracing::{debug, info, warn};

/// `estimate + estimate / divisor`: 5 pads by 20 %, 3 by ~33 %, 10 by 10 %.
pub fn pad_gas(estimate: U256, divisor: u64) -> U256 {
    estimate.saturating_add(estimate / U256::from(divisor.max(1)))
}

/// Estimates gas for `tx`, falling back to `fallback` when estimation fails.
pub async fn estimate_or(backend: &dyn ChainBackend, tx: &TransactionRequest, fallback: u64) -> U256 {
    match backend.estimate_gas(tx).await {
        Ok(gas) => gas,
        Err(e) => {
            warn!(error = %e, fallback, "Gas estimation failed, using fallback limit");
            U256::from(fallback)
        }
    }
}

/// Awaits one confirmation of `tx_hash`, bounded by `timeout`.
pub async fn await_confirmation(
    backend: &dyn ChainBackend,
    operation: &str,
    tx_hash: H256,
    timeout: Duration,
) -> Result<TransactionReceipt, ClientError> {
    let receipt = match tokio::time::timeout(timeout, backend.wait_for_receipt(tx_hash, 1)).await {
        Ok(result) => result?,
        Err(_) => {
            warn!(operation, tx_hash = ?tx_hash, timeout_secs = timeout.as_secs(), "Confirmation wait timed out");
            return Err(ClientError::Timeout {
                operation: operation.to_string(),
                after: timeout,
                tx_hash: Some(tx_hash),
            });
        }
    };

    match receipt {
        Some(receipt) if receipt.status.map(|s| s.as_u64()) == Some(0) => Err(ClientError::TransactionReverted(tx_hash)),
        Some(receipt) => {
            debug!(operation, tx_hash = ?tx_hash, block = ?receipt.block_number, "Transaction confirmed");
            Ok(receipt)
        }
        None => Err(ClientError::TransactionDropped(tx_hash)),
    }
}

/// Submits `tx` and waits for its confirmation, recording the outcome under
/// `kind` in the transaction counter.
pub async fn submit_and_confirm(
    backend: &dyn ChainBackend,
    kind: &str,
    operation: &str,
    tx: TransactionRequest,
    timeout: Duration,
) -> Result<TransactionReceipt, ClientError> {
    let tx_hash = match backend.send_transaction(tx).await {
        Ok(hash) => hash,
        Err(e) => {
            TRANSACTIONS.with_label_values(&[kind, outcome_label(&e)]).inc();
            return Err(e);
        }
    };
    info!(kind, tx_hash = ?tx_hash, "Transaction sent, awaiting confirmation");

    let result = await_confirmation(backend, operation, tx_hash, timeout).await;
    let outcome = match &result {
        Ok(_) => "confirmed",
        Err(e) => outcome_label(e),
    };
    TRANSACTIONS.with_label_values(&[kind, outcome]).inc();
    result
}

fn outcome_label(err: &ClientError) -> &'static str {
    match err {
        ClientError::UserRejected(_) => "rejected",
        ClientError::Timeout { .. } => "timeout",
        ClientError::TransactionReverted(_) | ClientError::Revert { .. } => "reverted",
        _ => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_gas() {
        assert_eq!(pad_gas(U256::from(100_000u64), 5), U256::from(120_000u64));
        assert_eq!(pad_gas(U256::from(90_000u64), 3), U256::from(120_000u64));
        assert_eq!(pad_gas(U256::from(50_000u64), 10), U256::from(55_000u64));
        assert_eq!(pad_gas(U256::MAX, 3), U256::MAX);
    }
}
