// src/streams/sync.rs

//! # Stream Synchronizer
//!
//! Rebuilds the list of streams visible to the connected account from the
//! StreamFi contract on every poll cycle and publishes it as a
//! [`StreamSnapshot`].
//!
//! A cycle reads `streamCount`, fetches every stream concurrently, derives
//! activity, computes the connected account's accrued reward (minus any
//! locally annotated pause time) and refreshes the per-recipient rate cache.
//! Individual stream reads that fail are dropped from the cycle; a failing
//! `streamCount` leaves the previous list in place and records a message.
//!
//! Every cycle takes a sequence number when it starts. A cycle that finishes
//! after a newer one has already published is discarded.

use super::types::{distribution_epsilon, pause_adjusted_reward, StreamView};
use crate::annotations::{address_key, AnnotationDocument, AnnotationStore};
use crate::blockchain::ChainBackend;
use crate::config::Config;
use crate::contracts::{RawStream, StreamFiContract};
use crate::errors::ClientError;
use crate::metrics::{ITEMS_DROPPED, POLL_CYCLES};
use crate::poller::{spawn_poller, PollHandle, PollSchedule, SequencedCell};
use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument, warn};

const POLLER_NAME: &str = "streams";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSnapshot {
    pub streams: Vec<StreamView>,
    /// Set when the latest cycle failed; `streams` then holds the previous list.
    pub error: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl StreamSnapshot {
    pub fn get(&self, stream_id: u64) -> Option<&StreamView> {
        self.streams.iter().find(|s| s.id == stream_id)
    }

    pub fn created_by_me(&self) -> impl Iterator<Item = &StreamView> {
        self.streams.iter().filter(|s| s.is_creator)
    }

    pub fn receiving(&self) -> impl Iterator<Item = &StreamView> {
        self.streams.iter().filter(|s| s.is_recipient)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Published { streams: usize, dropped: usize },
    /// `streamCount` failed; the message was recorded and the list kept.
    Failed(String),
    /// A newer cycle published first.
    Stale,
}

enum CycleResult {
    Streams { streams: Vec<StreamView>, dropped: usize },
    Failed(String),
}

/// Everything a cycle needs, detached from the synchronizer so an in-flight
/// cycle does not keep it alive.
#[derive(Clone)]
struct CycleInputs {
    contract: StreamFiContract,
    annotations: Arc<AnnotationStore>,
    account: Address,
    epsilon: U256,
    network_name: String,
}

pub struct StreamSynchronizer {
    inputs: CycleInputs,
    snapshot: SequencedCell<StreamSnapshot>,
}

impl std::fmt::Debug for StreamSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSynchronizer")
            .field("contract", &self.inputs.contract.address())
            .field("account", &self.inputs.account)
            .finish()
    }
}

impl StreamSynchronizer {
    pub fn new(
        backend: Arc<dyn ChainBackend>,
        config: &Config,
        account: Address,
        annotations: Arc<AnnotationStore>,
    ) -> Self {
        Self {
            inputs: CycleInputs {
                contract: StreamFiContract::new(config.contracts.stream_fi, backend),
                annotations,
                account,
                epsilon: distribution_epsilon(config.token.decimals),
                network_name: config.token.network_name.clone(),
            },
            snapshot: SequencedCell::new(),
        }
    }

    /// Checks that the wallet is on the configured chain and that the
    /// StreamFi address holds code before handing out a synchronizer.
    pub async fn initialize(
        backend: Arc<dyn ChainBackend>,
        config: &Config,
        account: Address,
        annotations: Arc<AnnotationStore>,
    ) -> Result<Arc<Self>, ClientError> {
        let actual = backend.chain_id().await?;
        if actual != config.token.chain_id {
            return Err(ClientError::WrongChain {
                expected: config.token.chain_id,
                actual,
            });
        }
        if !backend.has_code(config.contracts.stream_fi).await? {
            return Err(ClientError::ContractNotFound(config.contracts.stream_fi));
        }
        info!(contract = ?config.contracts.stream_fi, "StreamFi contract initialized");
        Ok(Arc::new(Self::new(backend, config, account, annotations)))
    }

    pub fn contract(&self) -> &StreamFiContract {
        &self.inputs.contract
    }

    pub fn account(&self) -> Address {
        self.inputs.account
    }

    pub async fn snapshot(&self) -> Option<StreamSnapshot> {
        self.snapshot.get().await
    }

    /// Runs one cycle against the current wall clock.
    pub async fn sync_once(&self) -> CycleOutcome {
        self.sync_once_at(Utc::now()).await
    }

    #[instrument(skip(self), fields(account = ?self.inputs.account))]
    pub async fn sync_once_at(&self, now: DateTime<Utc>) -> CycleOutcome {
        let seq = self.snapshot.next_sequence();
        let result = self.inputs.collect(now).await;
        Self::apply(&self.snapshot, seq, result, now).await
    }

    /// Starts the stream poller. The returned handle stops the timer when
    /// dropped.
    pub fn start_polling(self: &Arc<Self>, schedule: PollSchedule) -> PollHandle {
        spawn_poller(POLLER_NAME, Arc::downgrade(self), schedule, Self::poll_tick)
    }

    async fn poll_tick(this: Weak<Self>) {
        let Some(strong) = this.upgrade() else {
            return;
        };
        let seq = strong.snapshot.next_sequence();
        let inputs = strong.inputs.clone();
        drop(strong);

        let now = Utc::now();
        let result = inputs.collect(now).await;

        match this.upgrade() {
            Some(strong) => {
                Self::apply(&strong.snapshot, seq, result, now).await;
            }
            None => debug!(seq, "Synchronizer gone, discarding cycle result"),
        }
    }

    async fn apply(
        cell: &SequencedCell<StreamSnapshot>,
        seq: u64,
        result: CycleResult,
        now: DateTime<Utc>,
    ) -> CycleOutcome {
        match result {
            CycleResult::Streams { streams, dropped } => {
                let count = streams.len();
                let snapshot = StreamSnapshot {
                    streams,
                    error: None,
                    synced_at: Some(now),
                };
                if cell.publish(seq, snapshot).await {
                    POLL_CYCLES.with_label_values(&[POLLER_NAME, "published"]).inc();
                    debug!(seq, streams = count, dropped, "Stream snapshot published");
                    CycleOutcome::Published { streams: count, dropped }
                } else {
                    POLL_CYCLES.with_label_values(&[POLLER_NAME, "stale"]).inc();
                    CycleOutcome::Stale
                }
            }
            CycleResult::Failed(message) => {
                let recorded = message.clone();
                let accepted = cell
                    .update(seq, move |slot| {
                        let snapshot = slot.get_or_insert_with(|| StreamSnapshot {
                            streams: Vec::new(),
                            error: None,
                            synced_at: None,
                        });
                        snapshot.error = Some(recorded);
                    })
                    .await;
                if accepted {
                    POLL_CYCLES.with_label_values(&[POLLER_NAME, "failed"]).inc();
                    CycleOutcome::Failed(message)
                } else {
                    POLL_CYCLES.with_label_values(&[POLLER_NAME, "stale"]).inc();
                    CycleOutcome::Stale
                }
            }
        }
    }
}

impl CycleInputs {
    async fn collect(&self, now: DateTime<Utc>) -> CycleResult {
        let count = match self.contract.stream_count().await {
            Ok(count) => count,
            Err(e) => return CycleResult::Failed(self.describe_count_failure(&e).await),
        };
        if count > U256::from(u32::MAX) {
            return CycleResult::Failed(format!("Failed to load streams: implausible stream count {}", count));
        }
        let count = count.as_u64();
        let now_secs = now.timestamp().max(0) as u64;
        let annotations = self.annotations.snapshot().await;

        let reads = (1..=count).map(|id| self.load_stream(id, now_secs, now.timestamp(), &annotations));
        let loaded = join_all(reads).await;

        let streams: Vec<(StreamView, RawStream)> = loaded.into_iter().flatten().collect();
        let dropped = count as usize - streams.len();
        if dropped > 0 {
            ITEMS_DROPPED.with_label_values(&[POLLER_NAME]).inc_by(dropped as u64);
        }

        self.refresh_rate_cache(&streams).await;

        CycleResult::Streams {
            streams: streams.into_iter().map(|(view, _)| view).collect(),
            dropped,
        }
    }

    async fn describe_count_failure(&self, err: &ClientError) -> String {
        if err.is_transient() {
            warn!(error = %err, "streamCount rate limited, skipping cycle");
            return "RPC endpoint rate limited. Please wait a moment and the streams will load automatically."
                .to_string();
        }
        if err.is_call_exception() {
            let address = self.contract.address();
            return match self.contract.handle().has_code().await {
                Ok(false) => format!(
                    "Contract not found at {:?}. Please verify deployment on {}.",
                    address, self.network_name
                ),
                Ok(true) => format!(
                    "Failed to connect to contract. Please check your network connection and ensure you are on {}.",
                    self.network_name
                ),
                Err(probe) => {
                    warn!(error = %probe, "Code probe failed");
                    "RPC endpoint is experiencing issues. Please wait a moment and try again.".to_string()
                }
            };
        }
        warn!(error = %err, "Failed to load stream count");
        format!("Failed to load streams: {}", err)
    }

    /// Reads and derives one stream. `None` drops it from this cycle.
    async fn load_stream(
        &self,
        id: u64,
        now_secs: u64,
        now_ts: i64,
        annotations: &AnnotationDocument,
    ) -> Option<(StreamView, RawStream)> {
        let stream_id = U256::from(id);
        let raw = match self.contract.get_stream(stream_id).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(stream_id = id, error = %e, "Error loading stream, skipping");
                return None;
            }
        };
        if raw.total_distributed > raw.total_funded {
            warn!(
                stream_id = id,
                funded = %raw.total_funded,
                distributed = %raw.total_distributed,
                "Stream reports more distributed than funded, skipping"
            );
            return None;
        }

        let mut view = StreamView::from_raw(id, raw.clone(), self.account, now_secs, self.epsilon);
        if view.is_recipient && view.is_active() {
            view.accrued = Some(self.accrued_reward(&view, now_ts, annotations).await);
        }
        Some((view, raw))
    }

    async fn accrued_reward(
        &self,
        view: &StreamView,
        now_ts: i64,
        annotations: &AnnotationDocument,
    ) -> U256 {
        let stream_id = U256::from(view.id);
        let reward = match self.contract.calculate_reward(stream_id, self.account).await {
            Ok(reward) => reward,
            Err(e) => {
                warn!(stream_id = view.id, error = %e, "Error calculating reward");
                return U256::zero();
            }
        };
        if !annotations.has_pause_annotation(view.id) {
            return reward;
        }

        let paused_seconds = annotations.paused_seconds(view.id, now_ts);
        let rate = match self.contract.recipient_hourly_rate(stream_id, self.account).await {
            Ok(rate) => rate,
            Err(e) => {
                debug!(stream_id = view.id, error = %e, "Recipient rate unavailable, using stream average");
                view.hourly_rate
            }
        };
        pause_adjusted_reward(reward, paused_seconds, rate)
    }

    /// Reads every recipient's individual rate and merges it into the
    /// persisted rate cache.
    async fn refresh_rate_cache(&self, streams: &[(StreamView, RawStream)]) {
        let mut cache = self.annotations.snapshot().await.recipient_rates;

        for (view, _) in streams {
            let stream_id = U256::from(view.id);
            let rates = join_all(
                view.recipients
                    .iter()
                    .map(|recipient| self.contract.recipient_hourly_rate(stream_id, *recipient)),
            )
            .await;

            let entry: &mut BTreeMap<String, U256> = cache.entry(view.id).or_default();
            for (recipient, rate) in view.recipients.iter().zip(rates) {
                let key = address_key(*recipient);
                match rate {
                    Ok(rate) => {
                        entry.insert(key, rate);
                    }
                    Err(_) => {
                        entry.entry(key).or_insert(view.hourly_rate);
                    }
                }
            }
        }

        if let Err(e) = self.annotations.replace_rate_cache(cache).await {
            warn!(error = %e, "Failed to persist recipient rate cache");
        }
    }
}
