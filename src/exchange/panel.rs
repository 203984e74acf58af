// src/exchange/panel.rs

//! # Exchange Panel
//!
//! The user side of the fiat on/off-ramp: quotes, buy and sell request
//! submission, cancellation, and the polled list of the account's own
//! requests. Amounts sent to the escrow contract use 18 decimals for both
//! fiat and tokens.

use super::feed::{RequestFeed, RequestList, RequestSource};
use super::quote::{BuyQuote, Currency, QuoteEngine, SellQuote};
use crate::blockchain::ChainBackend;
use crate::config::{Config, TransactionSettings};
use crate::contracts::BuySellContract;
use crate::errors::ClientError;
use crate::poller::{PollHandle, PollSchedule};
use crate::token::parse_token_amount;
use crate::tx;
use ethers::types::{Address, TransactionRequest, H256, U256};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const ESCROW_DECIMALS: u8 = 18;
const POLLER_NAME: &str = "exchange_requests";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedRequest {
    pub tx_hash: H256,
    pub message: String,
}

/// Confirms `contract` has code and answers `admin()`. Returns the admin.
pub async fn verify_contract(contract: &BuySellContract) -> Result<Address, ClientError> {
    let address = contract.address();
    if !contract.handle().has_code().await? {
        return Err(ClientError::ContractNotFound(address));
    }
    contract.admin().await.map_err(|e| {
        warn!(contract = ?address, error = %e, "admin() call failed");
        ClientError::Validation(format!(
            "Contract at {:?} does not have the expected Buy/Sell contract interface. The 'admin()' function is missing. Please verify the contract address.",
            address
        ))
    })
}

/// Turns a failed pre-submission gas estimate into the message shown to
/// the user.
pub(crate) fn estimate_failure(contract: Address, function: &str, err: &ClientError) -> ClientError {
    if let Some(reason) = err.revert_reason() {
        return ClientError::Validation(format!("Transaction would fail: {}", reason));
    }
    if err.is_call_exception() {
        return ClientError::Validation(format!(
            "Contract call failed. The contract at {:?} may not have the '{}' function, or the function signature doesn't match. Please verify the contract address and ABI.",
            contract, function
        ));
    }
    if err.is_user_rejection() {
        return err.clone();
    }
    ClientError::Validation(format!("Transaction would fail: {}", err))
}

pub struct ExchangePanel {
    backend: Arc<dyn ChainBackend>,
    contract: BuySellContract,
    account: Address,
    admin: Address,
    quotes: QuoteEngine,
    settings: TransactionSettings,
    token_symbol: String,
    feed: Arc<RequestFeed>,
}

impl std::fmt::Debug for ExchangePanel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangePanel")
            .field("contract", &self.contract.address())
            .field("account", &self.account)
            .finish()
    }
}

impl ExchangePanel {
    /// Verifies the escrow contract and builds the panel for `account`.
    pub async fn connect(
        backend: Arc<dyn ChainBackend>,
        config: &Config,
        account: Address,
    ) -> Result<Self, ClientError> {
        let contract = BuySellContract::new(config.contracts.buy_sell, backend.clone());
        let admin = verify_contract(&contract).await?;
        info!(contract = ?contract.address(), admin = ?admin, "Buy/Sell contract verified");

        let feed = Arc::new(RequestFeed::new(
            POLLER_NAME,
            contract.clone(),
            RequestSource::User(account),
        ));
        Ok(Self {
            backend,
            contract,
            account,
            admin,
            quotes: QuoteEngine::new(config.exchange.clone()),
            settings: config.transactions.clone(),
            token_symbol: config.token.symbol.clone(),
            feed,
        })
    }

    pub fn contract(&self) -> &BuySellContract {
        &self.contract
    }

    pub fn is_admin(&self) -> bool {
        self.admin == self.account
    }

    pub fn quote_buy(&self, amount: &str, currency: Currency) -> Result<Option<BuyQuote>, ClientError> {
        self.quotes.buy(parse_decimal(amount)?, currency)
    }

    pub fn quote_sell(&self, amount: &str, currency: Currency) -> Result<Option<SellQuote>, ClientError> {
        self.quotes.sell(parse_decimal(amount)?, currency)
    }

    #[instrument(skip(self), fields(account = ?self.account))]
    pub async fn submit_buy(
        &self,
        fiat_amount: &str,
        currency: Currency,
        recipient: Option<&str>,
    ) -> Result<SubmittedRequest, ClientError> {
        let amount = parse_escrow_amount(fiat_amount)?;
        let recipient = match recipient.map(str::trim).filter(|r| !r.is_empty()) {
            Some(raw) => Address::from_str(raw)
                .map_err(|_| ClientError::Validation("Invalid recipient wallet address".to_string()))?,
            None => self.account,
        };

        let request = self
            .contract
            .create_buy_request_tx(self.account, amount, currency.code(), recipient);
        let tx_hash = self.send_checked("create_buy_request", "createBuyRequest", request).await?;

        self.feed.refresh().await;
        Ok(SubmittedRequest {
            tx_hash,
            message: format!("Buy request created! Transaction: {:?}", tx_hash),
        })
    }

    #[instrument(skip(self, mobile_number), fields(account = ?self.account))]
    pub async fn submit_sell(
        &self,
        token_amount: &str,
        currency: Currency,
        mobile_number: &str,
    ) -> Result<SubmittedRequest, ClientError> {
        let amount = parse_escrow_amount(token_amount)?;
        let mobile_number = mobile_number.trim();
        if mobile_number.is_empty() {
            return Err(ClientError::Validation("Please enter your mobile number".to_string()));
        }

        let request = self
            .contract
            .create_sell_request_tx(self.account, amount, currency.code(), mobile_number);
        let tx_hash = self.send_checked("create_sell_request", "createSellRequest", request).await?;

        let treasury = match self.contract.treasury_wallet().await {
            Ok(treasury) => format!("{:?}", treasury),
            Err(e) => {
                warn!(error = %e, "Could not read treasury wallet");
                "the treasury wallet".to_string()
            }
        };

        self.feed.refresh().await;
        Ok(SubmittedRequest {
            tx_hash,
            message: format!(
                "Sell request created! Transaction: {:?}. Please send {} {} tokens to {} to complete your order.",
                tx_hash,
                token_amount.trim(),
                self.token_symbol,
                treasury
            ),
        })
    }

    #[instrument(skip(self))]
    pub async fn cancel(&self, request_id: u64) -> Result<SubmittedRequest, ClientError> {
        let request = self.contract.cancel_request_tx(self.account, U256::from(request_id));
        let receipt = tx::submit_and_confirm(
            self.backend.as_ref(),
            "cancel_request",
            "Request cancellation",
            request,
            self.settings.confirmation_timeout(),
        )
        .await?;

        self.feed.refresh().await;
        Ok(SubmittedRequest {
            tx_hash: receipt.transaction_hash,
            message: "Request cancelled successfully".to_string(),
        })
    }

    /// Estimates gas to surface revert reasons early, then submits and waits.
    async fn send_checked(
        &self,
        kind: &str,
        function: &str,
        request: TransactionRequest,
    ) -> Result<H256, ClientError> {
        if let Err(e) = self.backend.estimate_gas(&request).await {
            warn!(kind, error = %e, "Gas estimation failed");
            return Err(estimate_failure(self.contract.address(), function, &e));
        }
        let receipt = tx::submit_and_confirm(
            self.backend.as_ref(),
            kind,
            function,
            request,
            self.settings.confirmation_timeout(),
        )
        .await?;
        info!(kind, tx_hash = ?receipt.transaction_hash, "Request submitted");
        Ok(receipt.transaction_hash)
    }

    pub async fn refresh_requests(&self) -> bool {
        self.feed.refresh().await
    }

    pub async fn requests(&self) -> RequestList {
        self.feed.current().await
    }

    pub fn start_polling(&self, schedule: PollSchedule) -> PollHandle {
        self.feed.start_polling(schedule)
    }
}

fn parse_decimal(amount: &str) -> Result<Decimal, ClientError> {
    Decimal::from_str(amount.trim()).map_err(|_| ClientError::Validation("Please enter a valid amount".to_string()))
}

fn parse_escrow_amount(amount: &str) -> Result<U256, ClientError> {
    parse_token_amount(amount, ESCROW_DECIMALS)
        .map_err(|_| ClientError::Validation("Please enter a valid amount".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Bytes;

    #[test]
    fn test_estimate_failure_prefers_revert_reason() {
        let contract = Address::repeat_byte(7);
        let err = ClientError::Revert {
            reason: Some("Amount too small".into()),
            data: None,
        };
        assert_eq!(
            estimate_failure(contract, "createBuyRequest", &err).to_string(),
            "Transaction would fail: Amount too small"
        );

        let err = ClientError::Revert {
            reason: None,
            data: Some(Bytes::new()),
        };
        assert!(estimate_failure(contract, "createBuyRequest", &err)
            .to_string()
            .contains("may not have the 'createBuyRequest' function"));

        let err = ClientError::UserRejected("denied".into());
        assert!(estimate_failure(contract, "createBuyRequest", &err).is_user_rejection());
    }

    #[test]
    fn test_escrow_amount_parsing() {
        assert_eq!(parse_escrow_amount("1.5").unwrap(), U256::from(15u64) * U256::exp10(17));
        assert!(parse_escrow_amount("0").is_err());
        assert!(parse_escrow_amount("abc").is_err());
        assert!(parse_decimal("12.5").is_ok());
    }
}
