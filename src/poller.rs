// src/poller.rs

//! # Polling Loops
//!
//! A poller fires on a fixed schedule and spawns every tick as its own task.
//! Ticks are never de-duplicated: if a previous tick is still waiting on the
//! node when the timer fires again, both run. Ordering between overlapping
//! ticks is restored at publication time by [`SequencedCell`], which keeps
//! only the result of the newest tick to finish.
//!
//! Stopping a poller (or dropping its [`PollHandle`]) stops the timer only.
//! Ticks already in flight run to completion; they reach their target through
//! a `Weak` reference, so a tick that finishes after the target is gone
//! quietly does nothing.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

//================================================================================================//
//                                       SEQUENCED CELL                                           //
//================================================================================================//

/// A value slot that accepts a write only if it carries a newer sequence
/// number than the value it currently holds.
#[derive(Debug)]
pub struct SequencedCell<T> {
    issued: AtomicU64,
    slot: RwLock<(u64, Option<T>)>,
}

impl<T> Default for SequencedCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SequencedCell<T> {
    pub fn new() -> Self {
        Self {
            issued: AtomicU64::new(0),
            slot: RwLock::new((0, None)),
        }
    }

    /// Hands out the next sequence number. Call at the start of a cycle.
    pub fn next_sequence(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Stores `value` if `seq` is newer than the stored sequence. Returns
    /// whether the write was accepted.
    pub async fn publish(&self, seq: u64, value: T) -> bool {
        let mut slot = self.slot.write().await;
        if seq <= slot.0 {
            trace!(seq, current = slot.0, "Discarding stale publication");
            return false;
        }
        *slot = (seq, Some(value));
        true
    }

    /// Applies `f` to the stored value if `seq` is newer, bumping the stored
    /// sequence. Used for partial updates that keep the previous value.
    pub async fn update(&self, seq: u64, f: impl FnOnce(&mut Option<T>)) -> bool {
        let mut slot = self.slot.write().await;
        if seq <= slot.0 {
            return false;
        }
        slot.0 = seq;
        f(&mut slot.1);
        true
    }

    pub async fn published_sequence(&self) -> u64 {
        self.slot.read().await.0
    }
}

impl<T: Clone> SequencedCell<T> {
    pub async fn get(&self) -> Option<T> {
        self.slot.read().await.1.clone()
    }
}

//================================================================================================//
//                                           POLLER                                               //
//================================================================================================//

/// When a poller fires: once after `initial_delay`, then at every multiple
/// of `interval` from the start.
#[derive(Debug, Clone, Copy)]
pub struct PollSchedule {
    pub initial_delay: Duration,
    pub interval: Duration,
}

impl PollSchedule {
    pub fn new(initial_delay: Duration, interval: Duration) -> Self {
        Self { initial_delay, interval }
    }
}

#[derive(Debug)]
pub struct PollHandle {
    name: &'static str,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Stops the timer. In-flight ticks are left to finish.
    pub fn stop(&self) {
        debug!(poller = self.name, "Stopping poller");
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stops the timer and waits for the timer task (not the ticks) to exit.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        let _ = (&mut self.task).await;
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

pub fn spawn_poller<T, F, Fut>(name: &'static str, target: Weak<T>, schedule: PollSchedule, tick: F) -> PollHandle
where
    T: Send + Sync + 'static,
    F: Fn(Weak<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let token = CancellationToken::new();
    let loop_token = token.clone();

    let task = tokio::spawn(async move {
        let start = Instant::now();
        let mut ticker = interval_at(start + schedule.interval, schedule.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let initial = sleep(schedule.initial_delay);
        tokio::pin!(initial);
        let mut initial_fired = false;

        debug!(poller = name, ?schedule, "Poller started");
        loop {
            tokio::select! {
                biased;
                _ = loop_token.cancelled() => break,
                _ = &mut initial, if !initial_fired => initial_fired = true,
                _ = ticker.tick() => {}
            }

            if target.strong_count() == 0 {
                debug!(poller = name, "Poll target dropped, stopping");
                break;
            }
            trace!(poller = name, "Spawning poll tick");
            tokio::spawn(tick(target.clone()));
        }
        debug!(poller = name, "Poller stopped");
    });

    PollHandle { name, token, task }
}
