// src/token.rs

//! # Token Client
//!
//! Owns the wallet session: which account is connected, on which chain, and
//! what the configured ERC-20 token looks like from that account's point of
//! view. Every mutation of [`TokenSession`] happens here, through
//! `connect`, `disconnect`, `load_token_info`, `load_balance` and `transfer`.
//!
//! Read failures while loading token data are classified and parked in the
//! session's error slot instead of being propagated; transfer failures are
//! propagated to the caller.

use crate::blockchain::{AddChainParams, ChainBackend};
use crate::config::{Config, TokenConfig};
use crate::contracts::Erc20Contract;
use crate::errors::{ClientError, UNRECOGNIZED_CHAIN_CODE};
use crate::tx;
use ethers::types::{Address, H256, U256};
use ethers::utils::{format_units, parse_units};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, Default)]
pub struct TokenSession {
    pub account: Option<Address>,
    pub chain_id: Option<u64>,
    pub balance: Option<U256>,
    /// Balance formatted with the token's decimals.
    pub balance_display: Option<String>,
    pub token_info: Option<TokenInfo>,
    pub error: Option<String>,
}

impl TokenSession {
    pub fn is_connected(&self) -> bool {
        self.account.is_some()
    }
}

/// Why a token read failed, as far as the client can tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadFailure {
    RateLimited,
    ContractMissing(Address),
    /// Contract code is present but the call still failed.
    RpcUnavailable,
    /// The code probe itself failed.
    Network,
    Other(String),
}

impl LoadFailure {
    pub fn message(&self, network_name: &str) -> String {
        match self {
            LoadFailure::RateLimited => "RPC endpoint rate limited. Please wait a moment and refresh, or try switching to a different RPC endpoint.".to_string(),
            LoadFailure::ContractMissing(address) => {
                format!("Token contract not found at {:?}. Please verify deployment.", address)
            }
            LoadFailure::RpcUnavailable => "Failed to load balance. The RPC endpoint may be experiencing issues. Please try again in a moment.".to_string(),
            LoadFailure::Network => format!(
                "Failed to load balance. Please check your network connection and ensure you're on {}.",
                network_name
            ),
            LoadFailure::Other(_) => "Failed to load balance. Make sure you're on the correct network.".to_string(),
        }
    }
}

pub struct TokenClient {
    backend: Option<Arc<dyn ChainBackend>>,
    token: TokenConfig,
    confirmation_timeout: Duration,
    session: RwLock<TokenSession>,
}

impl TokenClient {
    pub fn new(backend: Option<Arc<dyn ChainBackend>>, config: &Config) -> Self {
        Self {
            backend,
            token: config.token.clone(),
            confirmation_timeout: config.transactions.confirmation_timeout(),
            session: RwLock::new(TokenSession::default()),
        }
    }

    pub async fn session(&self) -> TokenSession {
        self.session.read().await.clone()
    }

    pub async fn account(&self) -> Option<Address> {
        self.session.read().await.account
    }

    pub fn token_config(&self) -> &TokenConfig {
        &self.token
    }

    fn backend(&self) -> Result<&Arc<dyn ChainBackend>, ClientError> {
        self.backend.as_ref().ok_or(ClientError::NoWalletProvider)
    }

    fn erc20(&self) -> Result<Erc20Contract, ClientError> {
        Ok(Erc20Contract::new(self.token.contract_address, self.backend()?.clone()))
    }

    /// Decimals reported by the contract, or the configured ones until loaded.
    pub async fn decimals(&self) -> u8 {
        self.session
            .read()
            .await
            .token_info
            .as_ref()
            .map(|info| info.decimals)
            .unwrap_or(self.token.decimals)
    }

    #[instrument(skip(self), fields(chain_id = self.token.chain_id))]
    pub async fn connect(&self) -> Result<Address, ClientError> {
        let result = self.try_connect().await;
        if let Err(e) = &result {
            error!(error = %e, "Wallet connection failed");
            self.session.write().await.error = Some(e.user_message());
        }
        result
    }

    async fn try_connect(&self) -> Result<Address, ClientError> {
        let backend = self.backend()?.clone();
        self.session.write().await.error = None;

        self.ensure_chain(backend.as_ref()).await?;

        let accounts = backend.request_accounts().await?;
        let account = *accounts.first().ok_or(ClientError::NoAccounts)?;
        let chain_id = backend.chain_id().await?;

        {
            let mut session = self.session.write().await;
            session.account = Some(account);
            session.chain_id = Some(chain_id);
        }
        info!(account = ?account, chain_id, "Wallet connected");

        self.load_token_info().await;
        self.load_balance().await;
        Ok(account)
    }

    /// Makes sure the wallet is on the configured chain, asking it to switch
    /// (and to add the chain if it does not know it).
    async fn ensure_chain(&self, backend: &dyn ChainBackend) -> Result<(), ClientError> {
        let switch_failed = || ClientError::ChainSwitchRejected {
            network: self.token.network_name.clone(),
        };

        let current = backend.chain_id().await.map_err(|e| {
            warn!(error = %e, "Could not read wallet chain id");
            switch_failed()
        })?;
        if current == self.token.chain_id {
            return Ok(());
        }

        debug!(current, target = self.token.chain_id, "Requesting network switch");
        match backend.switch_chain(self.token.chain_id).await {
            Ok(()) => Ok(()),
            Err(e) if e.rpc_code() == Some(UNRECOGNIZED_CHAIN_CODE) => {
                info!(chain_id = self.token.chain_id, "Chain unknown to wallet, adding it");
                let params = AddChainParams::new(
                    self.token.chain_id,
                    &self.token.network_name,
                    &self.token.public_rpc_url,
                    &self.token.explorer_url,
                );
                backend.add_chain(&params).await.map_err(|e| {
                    warn!(error = %e, "Wallet refused to add chain");
                    switch_failed()
                })?;
                let after = backend.chain_id().await.map_err(|_| switch_failed())?;
                if after != self.token.chain_id {
                    return Err(switch_failed());
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Network switch failed");
                Err(switch_failed())
            }
        }
    }

    pub async fn disconnect(&self) {
        *self.session.write().await = TokenSession::default();
        info!("Wallet disconnected");
    }

    /// Loads name, symbol and decimals. Failures are logged only.
    pub async fn load_token_info(&self) -> Option<TokenInfo> {
        let erc20 = self.erc20().ok()?;
        let (name, symbol, decimals) =
            match futures::try_join!(erc20.name(), erc20.symbol(), erc20.decimals()) {
                Ok(values) => values,
                Err(e) => {
                    warn!(error = %e, "Failed to load token info");
                    return None;
                }
            };
        let info = TokenInfo { name, symbol, decimals };
        self.session.write().await.token_info = Some(info.clone());
        Some(info)
    }

    /// Refreshes the balance of the connected account. On failure the
    /// classified message is stored in the session and returned.
    pub async fn load_balance(&self) -> Result<U256, LoadFailure> {
        let Some(account) = self.account().await else {
            return Err(LoadFailure::Other("wallet not connected".to_string()));
        };
        let erc20 = self.erc20().map_err(|e| LoadFailure::Other(e.to_string()))?;
        let decimals = self.decimals().await;

        match erc20.balance_of(account).await {
            Ok(balance) => {
                let display = format_units(balance, u32::from(decimals)).unwrap_or_else(|_| balance.to_string());
                let mut session = self.session.write().await;
                session.balance = Some(balance);
                session.balance_display = Some(display);
                session.error = None;
                Ok(balance)
            }
            Err(e) => {
                let failure = self.classify_failure(&erc20, &e).await;
                warn!(error = %e, failure = ?failure, "Failed to load balance");
                self.session.write().await.error = Some(failure.message(&self.token.network_name));
                Err(failure)
            }
        }
    }

    async fn classify_failure(&self, erc20: &Erc20Contract, err: &ClientError) -> LoadFailure {
        if err.is_rate_limited() {
            return LoadFailure::RateLimited;
        }
        if err.is_call_exception() {
            return match erc20.handle().has_code().await {
                Ok(false) => LoadFailure::ContractMissing(erc20.address()),
                Ok(true) => LoadFailure::RpcUnavailable,
                Err(_) => LoadFailure::Network,
            };
        }
        LoadFailure::Other(err.to_string())
    }

    /// Sends `amount` (a decimal string in token units) to `to` and waits for
    /// one confirmation.
    #[instrument(skip(self), fields(to = ?to))]
    pub async fn transfer(&self, to: Address, amount: &str) -> Result<H256, ClientError> {
        let result = self.try_transfer(to, amount).await;
        if let Err(e) = &result {
            self.session.write().await.error = Some(e.user_message());
        }
        result
    }

    async fn try_transfer(&self, to: Address, amount: &str) -> Result<H256, ClientError> {
        let from = self.account().await.ok_or(ClientError::NotConnected)?;
        let backend = self.backend()?.clone();
        let decimals = self.decimals().await;
        let value = parse_token_amount(amount, decimals)?;

        self.session.write().await.error = None;
        let tx = self.erc20()?.transfer_tx(from, to, value);
        let receipt = tx::submit_and_confirm(backend.as_ref(), "transfer", "Transfer", tx, self.confirmation_timeout).await?;
        info!(tx_hash = ?receipt.transaction_hash, "Transfer confirmed");

        let _ = self.load_balance().await;
        Ok(receipt.transaction_hash)
    }
}

/// Parses a human decimal amount into base units. Zero and negative amounts
/// are rejected.
pub fn parse_token_amount(amount: &str, decimals: u8) -> Result<U256, ClientError> {
    let trimmed = amount.trim();
    if trimmed.is_empty() {
        return Err(ClientError::Validation("Please enter an amount".to_string()));
    }
    if trimmed.starts_with('-') {
        return Err(ClientError::Validation("Amount must be greater than zero".to_string()));
    }
    let value: U256 = parse_units(trimmed, u32::from(decimals))?.into();
    if value.is_zero() {
        return Err(ClientError::Validation("Amount must be greater than zero".to_string()));
    }
    Ok(value)
}

/// Formats base units with `decimals`, falling back to the raw integer.
pub fn format_token_amount(value: U256, decimals: u8) -> String {
    format_units(value, u32::from(decimals)).unwrap_or_else(|_| value.to_string())
}
