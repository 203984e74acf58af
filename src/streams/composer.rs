// src/streams/composer.rs

//! # Stream Composer
//!
//! Validates stream drafts and drives the three stream transactions:
//! `createStream`, `fundStream` (with the token approval it may need) and
//! `claimReward`. Every confirmation wait is bounded; a timeout surfaces as
//! [`ClientError::Timeout`] and leaves the transaction to land on its own.

use super::sync::StreamSynchronizer;
use crate::annotations::{address_key, AnnotationStore};
use crate::blockchain::ChainBackend;
use crate::config::{Config, TransactionSettings};
use crate::contracts::{Erc20Contract, RawStream, StreamFiContract};
use crate::errors::ClientError;
use crate::tx;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ethers::types::{Address, H256, U256};
use ethers::utils::parse_units;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{info, instrument, warn};

const CLAIM_FALLBACK_MESSAGE: &str = "No rewards to claim or transaction would fail.";

#[derive(Debug, Clone, Default)]
pub struct RecipientInput {
    pub address: String,
    /// Hourly rate in token units; falls back to the draft's default rate.
    pub hourly_rate: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StreamDraft {
    pub default_rate: Option<String>,
    pub duration_hours: u64,
    pub recipients: Vec<RecipientInput>,
}

/// A validated draft, ready to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPlan {
    pub recipients: Vec<Address>,
    pub hourly_rates: Vec<U256>,
    pub duration_hours: u64,
    pub recipient_totals: Vec<U256>,
    pub total: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPreview {
    pub recipients: usize,
    pub recipient_totals: Vec<U256>,
    pub total_amount: U256,
    pub duration_hours: u64,
    pub ends_at: DateTime<Utc>,
    pub is_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedStream {
    pub stream_id: u64,
    pub tx_hash: H256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingReceipt {
    pub stream_id: u64,
    pub tx_hash: H256,
    pub block_number: Option<u64>,
    pub amount: U256,
    pub stream: RawStream,
    pub recipient_rates: Vec<(Address, U256)>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_rate(raw: &str, decimals: u8, recipient: &str) -> Result<U256, ClientError> {
    let rate: U256 = parse_units(raw, u32::from(decimals))
        .map_err(|_| ClientError::Validation(format!("Invalid hourly rate for recipient: {}", recipient)))?
        .into();
    if raw.starts_with('-') || rate.is_zero() {
        return Err(ClientError::Validation(format!(
            "Hourly rate must be greater than 0 for recipient: {}",
            recipient
        )));
    }
    Ok(rate)
}

fn parse_default_rate(raw: &str, decimals: u8) -> Result<U256, ClientError> {
    let rate: U256 = parse_units(raw, u32::from(decimals))
        .map_err(|_| ClientError::Validation("Invalid hourly rate".to_string()))?
        .into();
    if raw.starts_with('-') || rate.is_zero() {
        return Err(ClientError::Validation("Hourly rate must be greater than 0".to_string()));
    }
    Ok(rate)
}

impl StreamDraft {
    /// Validates the draft. Recipients with an empty address are ignored.
    pub fn plan(&self, decimals: u8) -> Result<StreamPlan, ClientError> {
        let filled: Vec<&RecipientInput> = self
            .recipients
            .iter()
            .filter(|r| !r.address.trim().is_empty())
            .collect();
        if filled.is_empty() {
            return Err(ClientError::Validation("Please add at least one recipient".to_string()));
        }
        if self.duration_hours == 0 {
            return Err(ClientError::Validation("Duration must be greater than 0".to_string()));
        }
        // Any individual rate switches the draft to per-recipient rates and
        // the default rate is ignored.
        let individual = filled.iter().any(|r| non_empty(&r.hourly_rate).is_some());
        let default_rate = match (individual, non_empty(&self.default_rate)) {
            (true, _) => None,
            (false, Some(raw)) => Some(parse_default_rate(raw, decimals)?),
            (false, None) => {
                return Err(ClientError::Validation(
                    "Please provide either hourly rate or individual amounts for recipients".to_string(),
                ))
            }
        };

        let duration = U256::from(self.duration_hours);
        let mut plan = StreamPlan {
            recipients: Vec::with_capacity(filled.len()),
            hourly_rates: Vec::with_capacity(filled.len()),
            duration_hours: self.duration_hours,
            recipient_totals: Vec::with_capacity(filled.len()),
            total: U256::zero(),
        };

        for input in filled {
            let raw_address = input.address.trim();
            let address: Address = raw_address
                .parse()
                .map_err(|_| ClientError::Validation(format!("Invalid recipient address: {}", raw_address)))?;
            let rate = match default_rate {
                Some(rate) => rate,
                None => {
                    let raw_rate = non_empty(&input.hourly_rate).ok_or_else(|| {
                        ClientError::Validation(format!("Please provide hourly rate for recipient: {}", raw_address))
                    })?;
                    parse_rate(raw_rate, decimals, raw_address)?
                }
            };
            let recipient_total = rate.saturating_mul(duration);

            plan.recipients.push(address);
            plan.hourly_rates.push(rate);
            plan.recipient_totals.push(recipient_total);
            plan.total = plan.total.saturating_add(recipient_total);
        }
        Ok(plan)
    }

    /// What the stream would cost, before submitting. `None` when there is
    /// nothing to preview yet.
    pub fn preview(&self, decimals: u8, now: DateTime<Utc>) -> Option<StreamPreview> {
        let plan = self.plan(decimals).ok()?;
        let hours = i64::try_from(plan.duration_hours).ok()?;
        Some(StreamPreview {
            recipients: plan.recipients.len(),
            is_valid: !plan.total.is_zero() && plan.duration_hours > 0 && !plan.recipients.is_empty(),
            recipient_totals: plan.recipient_totals,
            total_amount: plan.total,
            duration_hours: plan.duration_hours,
            ends_at: now + ChronoDuration::hours(hours),
        })
    }
}

/// Maps simulation failures to the messages shown to the user.
pub fn normalize_simulation_reason(reason: &str) -> String {
    if reason.contains("insufficient allowance") {
        "Insufficient token allowance".to_string()
    } else if reason.contains("insufficient balance") {
        "Insufficient token balance".to_string()
    } else {
        reason.to_string()
    }
}

pub struct StreamComposer {
    backend: Arc<dyn ChainBackend>,
    stream_fi: StreamFiContract,
    token: Erc20Contract,
    annotations: Arc<AnnotationStore>,
    settings: TransactionSettings,
    account: Address,
    decimals: u8,
    synchronizer: Option<Arc<StreamSynchronizer>>,
}

impl StreamComposer {
    pub fn new(
        backend: Arc<dyn ChainBackend>,
        config: &Config,
        account: Address,
        decimals: u8,
        annotations: Arc<AnnotationStore>,
    ) -> Self {
        Self {
            stream_fi: StreamFiContract::new(config.contracts.stream_fi, backend.clone()),
            token: Erc20Contract::new(config.token.contract_address, backend.clone()),
            backend,
            annotations,
            settings: config.transactions.clone(),
            account,
            decimals,
            synchronizer: None,
        }
    }

    /// Refresh this synchronizer after every confirmed transaction.
    pub fn with_synchronizer(mut self, synchronizer: Arc<StreamSynchronizer>) -> Self {
        self.synchronizer = Some(synchronizer);
        self
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    async fn refresh(&self) {
        if let Some(sync) = &self.synchronizer {
            sync.sync_once().await;
        }
    }

    #[instrument(skip(self, plan), fields(recipients = plan.recipients.len(), duration = plan.duration_hours))]
    pub async fn create_stream(&self, plan: &StreamPlan) -> Result<CreatedStream, ClientError> {
        let tx = self.stream_fi.create_stream_tx(
            self.account,
            &plan.hourly_rates,
            U256::from(plan.duration_hours),
            &plan.recipients,
        );
        let receipt = tx::submit_and_confirm(
            self.backend.as_ref(),
            "create_stream",
            "Stream creation",
            tx,
            self.settings.confirmation_timeout(),
        )
        .await?;

        let stream_id = self.stream_fi.stream_count().await?.low_u64();
        info!(stream_id, tx_hash = ?receipt.transaction_hash, "Stream created");

        let rates: BTreeMap<String, U256> = plan
            .recipients
            .iter()
            .zip(&plan.hourly_rates)
            .map(|(address, rate)| (address_key(*address), *rate))
            .collect();
        if let Err(e) = self.annotations.set_recipient_rates(stream_id, rates).await {
            warn!(stream_id, error = %e, "Failed to cache recipient rates");
        }

        self.refresh().await;
        Ok(CreatedStream {
            stream_id,
            tx_hash: receipt.transaction_hash,
        })
    }

    #[instrument(skip(self))]
    pub async fn fund_stream(&self, stream_id: u64) -> Result<FundingReceipt, ClientError> {
        let id = U256::from(stream_id);
        let stream = self.stream_fi.get_stream(id).await?;
        let required = stream
            .hourly_rate
            .saturating_mul(stream.duration)
            .saturating_mul(U256::from(stream.recipients.len()));

        let allowance = self.token.allowance(self.account, self.stream_fi.address()).await?;
        if allowance < required {
            self.approve_spending(required).await?;
        } else {
            info!(stream_id, "Sufficient allowance already exists");
        }

        let fund_tx = self.stream_fi.fund_stream_tx(self.account, id);
        if let Err(e) = self.backend.call(&fund_tx).await {
            let reason = e.revert_reason().map(str::to_string).unwrap_or_else(|| e.to_string());
            warn!(stream_id, error = %e, "fundStream simulation failed");
            return Err(ClientError::SimulationFailed(normalize_simulation_reason(&reason)));
        }

        let gas = tx::estimate_or(self.backend.as_ref(), &fund_tx, self.settings.fallback_fund_gas).await;
        let fund_tx = fund_tx.gas(tx::pad_gas(gas, 3));
        let receipt = tx::submit_and_confirm(
            self.backend.as_ref(),
            "fund_stream",
            "Stream funding",
            fund_tx,
            self.settings.confirmation_timeout(),
        )
        .await?;
        info!(stream_id, tx_hash = ?receipt.transaction_hash, "Stream funded");

        self.refresh().await;

        let updated = self.stream_fi.get_stream(id).await?;
        let mut recipient_rates = Vec::with_capacity(updated.recipients.len());
        for recipient in &updated.recipients {
            let rate = self
                .stream_fi
                .recipient_hourly_rate(id, *recipient)
                .await
                .unwrap_or(updated.hourly_rate);
            recipient_rates.push((*recipient, rate));
        }

        Ok(FundingReceipt {
            stream_id,
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|b| b.as_u64()),
            amount: required,
            stream: updated,
            recipient_rates,
        })
    }

    /// Grants the StreamFi contract an unlimited allowance and waits until
    /// the allowance covers `required`.
    async fn approve_spending(&self, required: U256) -> Result<(), ClientError> {
        let spender = self.stream_fi.address();
        let approve_tx = self.token.approve_tx(self.account, spender, U256::MAX);
        let gas = match self.backend.estimate_gas(&approve_tx).await {
            Ok(estimate) => tx::pad_gas(estimate, 5),
            Err(e) => {
                warn!(error = %e, "Approval gas estimation failed, using default");
                U256::from(self.settings.fallback_approve_gas)
            }
        };

        let tx_hash = self.backend.send_transaction(approve_tx.gas(gas)).await?;
        info!(tx_hash = ?tx_hash, "Approval transaction sent");

        let wait = tx::await_confirmation(
            self.backend.as_ref(),
            "Token approval",
            tx_hash,
            self.settings.approval_timeout(),
        )
        .await;
        let wait_error = match wait {
            Ok(_) => {
                info!("Approval confirmed");
                return Ok(());
            }
            Err(e) => e,
        };

        warn!(error = %wait_error, "Approval wait failed, re-checking allowance");
        for delay in self.settings.approval_recheck_delays() {
            sleep(delay).await;
            match self.token.allowance(self.account, spender).await {
                Ok(allowance) if allowance >= required => {
                    info!("Approval succeeded despite wait error");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Error checking allowance"),
            }
        }

        Err(ClientError::Validation(
            "Token approval failed. The transaction may have succeeded on-chain - please check your wallet transaction history."
                .to_string(),
        ))
    }

    #[instrument(skip(self))]
    pub async fn claim_reward(&self, stream_id: u64) -> Result<H256, ClientError> {
        let claim_tx = self.stream_fi.claim_reward_tx(self.account, U256::from(stream_id));
        let gas = match self.backend.estimate_gas(&claim_tx).await {
            Ok(gas) => gas,
            Err(e) => {
                warn!(stream_id, error = %e, "Claim gas estimation failed");
                let reason = e.revert_reason().unwrap_or(CLAIM_FALLBACK_MESSAGE).to_string();
                return Err(ClientError::Revert {
                    reason: Some(reason),
                    data: None,
                });
            }
        };

        let receipt = tx::submit_and_confirm(
            self.backend.as_ref(),
            "claim_reward",
            "Reward claim",
            claim_tx.gas(tx::pad_gas(gas, 10)),
            self.settings.confirmation_timeout(),
        )
        .await?;
        info!(stream_id, tx_hash = ?receipt.transaction_hash, "Reward claimed");

        self.refresh().await;
        Ok(receipt.transaction_hash)
    }
}
