// src/exchange/feed.rs

//! # Request Feed
//!
//! A polled, sequence-guarded list of escrow requests. The user panel follows
//! the connected account's requests; the admin panel follows the pending
//! queue. Either way a cycle reads the id list, fetches every request
//! concurrently and publishes the survivors newest-first. A request whose
//! read fails is dropped from that cycle only.

use super::requests::{sort_newest_first, ExchangeRequest};
use crate::contracts::BuySellContract;
use crate::errors::ClientError;
use crate::metrics::{ITEMS_DROPPED, POLL_CYCLES};
use crate::poller::{spawn_poller, PollHandle, PollSchedule, SequencedCell};
use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use futures::future::join_all;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestSource {
    /// `getUserRequests(account)`
    User(Address),
    /// `getPendingRequests()`
    Pending,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestList {
    pub requests: Vec<ExchangeRequest>,
    /// Set when the latest id-list read failed; `requests` is then the
    /// previous list.
    pub error: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct FeedInputs {
    contract: BuySellContract,
    source: RequestSource,
}

impl FeedInputs {
    async fn collect(&self, poller: &'static str) -> Result<Vec<ExchangeRequest>, ClientError> {
        let ids = match self.source {
            RequestSource::User(account) => self.contract.user_requests(account).await?,
            RequestSource::Pending => self.contract.pending_requests().await?,
        };

        let reads = ids.iter().map(|id| async move {
            match self.contract.get_request(*id).await {
                Ok(raw) => Some(ExchangeRequest::from_raw(*id, raw)),
                Err(e) => {
                    warn!(poller, request_id = %id, error = %e, "Error loading request, skipping");
                    None
                }
            }
        });
        let mut requests: Vec<ExchangeRequest> = join_all(reads).await.into_iter().flatten().collect();

        let dropped = ids.len() - requests.len();
        if dropped > 0 {
            ITEMS_DROPPED.with_label_values(&[poller]).inc_by(dropped as u64);
        }
        sort_newest_first(&mut requests);
        Ok(requests)
    }
}

#[derive(Debug)]
pub struct RequestFeed {
    name: &'static str,
    inputs: FeedInputs,
    list: SequencedCell<RequestList>,
}

impl RequestFeed {
    pub fn new(name: &'static str, contract: BuySellContract, source: RequestSource) -> Self {
        Self {
            name,
            inputs: FeedInputs { contract, source },
            list: SequencedCell::new(),
        }
    }

    pub fn source(&self) -> RequestSource {
        self.inputs.source
    }

    pub async fn current(&self) -> RequestList {
        self.list.get().await.unwrap_or_default()
    }

    /// Runs one cycle now. Returns whether its result was published.
    pub async fn refresh(&self) -> bool {
        let seq = self.list.next_sequence();
        let result = self.inputs.collect(self.name).await;
        Self::apply(self.name, &self.list, seq, result).await
    }

    pub fn start_polling(self: &Arc<Self>, schedule: PollSchedule) -> PollHandle {
        spawn_poller(self.name, Arc::downgrade(self), schedule, Self::poll_tick)
    }

    async fn poll_tick(this: Weak<Self>) {
        let Some(strong) = this.upgrade() else {
            return;
        };
        let name = strong.name;
        let seq = strong.list.next_sequence();
        let inputs = strong.inputs.clone();
        drop(strong);

        let result = inputs.collect(name).await;

        match this.upgrade() {
            Some(strong) => {
                Self::apply(name, &strong.list, seq, result).await;
            }
            None => debug!(poller = name, seq, "Request feed gone, discarding cycle result"),
        }
    }

    async fn apply(
        name: &'static str,
        cell: &SequencedCell<RequestList>,
        seq: u64,
        result: Result<Vec<ExchangeRequest>, ClientError>,
    ) -> bool {
        let now = Utc::now();
        let (accepted, outcome) = match result {
            Ok(requests) => {
                let count = requests.len();
                let list = RequestList {
                    requests,
                    error: None,
                    synced_at: Some(now),
                };
                let accepted = cell.publish(seq, list).await;
                if accepted {
                    debug!(poller = name, seq, requests = count, "Request list published");
                }
                (accepted, "published")
            }
            Err(e) => {
                warn!(poller = name, error = %e, "Error loading request ids");
                let message = e.user_message();
                let accepted = cell
                    .update(seq, move |slot| {
                        slot.get_or_insert_with(RequestList::default).error = Some(message);
                    })
                    .await;
                (accepted, "failed")
            }
        };
        let label = if accepted { outcome } else { "stale" };
        POLL_CYCLES.with_label_values(&[name, label]).inc();
        accepted
    }
}
