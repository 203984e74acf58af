//! Admin side of the escrow: the pending queue plus approve/reject.
//!
//! The contract enforces who may approve; the panel only gates its own
//! display on `admin()` matching the account.

use super::feed::{RequestFeed, RequestList, RequestSource};
use super::panel::verify_contract;
use crate::blockchain::ChainBackend;
use crate::config::{Config, TransactionSettings};
use crate::contracts::BuySellContract;
use crate::errors::ClientError;
use crate::poller::{PollHandle, PollSchedule};
use crate::tx;
use ethers::types::{Address, H256, U256};
use std::sync::Arc;
use tracing::{info, instrument};

const POLLER_NAME: &str = "admin_requests";
pub const DEFAULT_APPROVE_NOTES: &str = "Approved by admin";
pub const DEFAULT_REJECT_NOTES: &str = "Rejected by admin";

#[derive(Debug)]
pub struct AdminPanel {
    backend: Arc<dyn ChainBackend>,
    contract: BuySellContract,
    account: Address,
    admin: Address,
    settings: TransactionSettings,
    pending: Arc<RequestFeed>,
}

impl AdminPanel {
    pub async fn connect(
        backend: Arc<dyn ChainBackend>,
        config: &Config,
        account: Address,
    ) -> Result<Self, ClientError> {
        let contract = BuySellContract::new(config.contracts.buy_sell, backend.clone());
        let admin = verify_contract(&contract).await?;
        let pending = Arc::new(RequestFeed::new(POLLER_NAME, contract.clone(), RequestSource::Pending));
        Ok(Self {
            backend,
            contract,
            account,
            admin,
            settings: config.transactions.clone(),
            pending,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.admin == self.account
    }

    pub fn admin(&self) -> Address {
        self.admin
    }

    pub async fn refresh_pending(&self) -> bool {
        self.pending.refresh().await
    }

    pub async fn pending(&self) -> RequestList {
        self.pending.current().await
    }

    pub fn start_polling(&self, schedule: PollSchedule) -> PollHandle {
        self.pending.start_polling(schedule)
    }

    #[instrument(skip(self, notes))]
    pub async fn approve(&self, request_id: u64, notes: Option<&str>) -> Result<H256, ClientError> {
        let notes = notes_or(notes, DEFAULT_APPROVE_NOTES);
        let request = self
            .contract
            .approve_request_tx(self.account, U256::from(request_id), notes);
        self.settle("approve_request", "Request approval", request_id, request).await
    }

    #[instrument(skip(self, notes))]
    pub async fn reject(&self, request_id: u64, notes: Option<&str>) -> Result<H256, ClientError> {
        let notes = notes_or(notes, DEFAULT_REJECT_NOTES);
        let request = self
            .contract
            .reject_request_tx(self.account, U256::from(request_id), notes);
        self.settle("reject_request", "Request rejection", request_id, request).await
    }

    async fn settle(
        &self,
        kind: &str,
        operation: &str,
        request_id: u64,
        request: ethers::types::TransactionRequest,
    ) -> Result<H256, ClientError> {
        let receipt = tx::submit_and_confirm(
            self.backend.as_ref(),
            kind,
            operation,
            request,
            self.settings.confirmation_timeout(),
        )
        .await?;
        info!(kind, request_id, tx_hash = ?receipt.transaction_hash, "Request settled");
        self.pending.refresh().await;
        Ok(receipt.transaction_hash)
    }
}

fn notes_or<'a>(notes: Option<&'a str>, default: &'a str) -> &'a str {
    notes.map(str::trim).filter(|n| !n.is_empty()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_notes() {
        assert_eq!(notes_or(None, DEFAULT_APPROVE_NOTES), "Approved by admin");
        assert_eq!(notes_or(Some("  "), DEFAULT_REJECT_NOTES), "Rejected by admin");
        assert_eq!(notes_or(Some("paid via M-Pesa"), DEFAULT_APPROVE_NOTES), "paid via M-Pesa");
    }
}
