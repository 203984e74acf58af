//! Aggregate statistics over a stream snapshot.

use super::types::StreamView;
use crate::annotations::address_key;
use ethers::types::U256;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashSet};

const DAY: u64 = 24 * 3600;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecentActivity {
    pub last_24h: usize,
    pub last_7d: usize,
    pub last_30d: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub total: usize,
    pub active: usize,
    pub paused: usize,
    pub inactive: usize,
    pub total_funded: U256,
    pub total_distributed: U256,
    pub total_remaining: U256,
    pub total_recipients: usize,
    /// Only populated by [`StreamStats::overall`].
    pub unique_creators: usize,
    /// Only populated by [`StreamStats::overall`].
    pub unique_recipients: usize,
    pub average_value: U256,
    pub average_recipients: Decimal,
    /// Distributed over funded, in percent.
    pub distribution_rate: Decimal,
    pub recent: RecentActivity,
}

impl StreamStats {
    /// Streams the connected account created, excluding hidden ones.
    pub fn for_creator<'a>(
        streams: impl IntoIterator<Item = &'a StreamView>,
        hidden: &BTreeSet<u64>,
        paused: &BTreeSet<u64>,
        now: u64,
    ) -> Self {
        let mine: Vec<&StreamView> = streams
            .into_iter()
            .filter(|s| s.is_creator && !hidden.contains(&s.id))
            .collect();
        Self::aggregate(&mine, paused, now)
    }

    /// Every stream in the snapshot, with unique creator and recipient counts.
    pub fn overall<'a>(streams: impl IntoIterator<Item = &'a StreamView>, paused: &BTreeSet<u64>, now: u64) -> Self {
        let all: Vec<&StreamView> = streams.into_iter().collect();
        let mut stats = Self::aggregate(&all, paused, now);

        stats.unique_creators = all.iter().map(|s| s.creator).collect::<HashSet<_>>().len();
        stats.unique_recipients = all
            .iter()
            .flat_map(|s| s.recipients.iter())
            .map(|r| address_key(*r))
            .collect::<HashSet<_>>()
            .len();
        stats
    }

    fn aggregate(streams: &[&StreamView], paused: &BTreeSet<u64>, now: u64) -> Self {
        let mut stats = StreamStats {
            total: streams.len(),
            ..Default::default()
        };

        for s in streams {
            if s.is_active() {
                stats.active += 1;
                if paused.contains(&s.id) {
                    stats.paused += 1;
                }
            } else {
                stats.inactive += 1;
            }
            stats.total_funded = stats.total_funded.saturating_add(s.total_funded);
            stats.total_distributed = stats.total_distributed.saturating_add(s.total_distributed);
            stats.total_remaining = stats.total_remaining.saturating_add(s.remaining());
            stats.total_recipients += s.recipients.len();

            if s.is_active() && s.start_time > 0 {
                // A start ahead of the local clock counts as brand new.
                let age = now.saturating_sub(s.start_time);
                if age < DAY {
                    stats.recent.last_24h += 1;
                }
                if age < 7 * DAY {
                    stats.recent.last_7d += 1;
                }
                if age < 30 * DAY {
                    stats.recent.last_30d += 1;
                }
            }
        }

        if stats.total > 0 {
            stats.average_value = stats.total_funded / U256::from(stats.total);
            stats.average_recipients = Decimal::from(stats.total_recipients) / Decimal::from(stats.total);
        }
        stats.distribution_rate = percentage(stats.total_distributed, stats.total_funded);
        stats
    }
}

/// `part / whole * 100`, computed on base units scaled down far enough to
/// fit a `Decimal`.
fn percentage(part: U256, whole: U256) -> Decimal {
    if whole.is_zero() {
        return Decimal::ZERO;
    }
    // Keep both operands under 2^64 without losing the ratio's precision.
    let shift = whole.bits().saturating_sub(63);
    let part = Decimal::from((part >> shift).low_u64());
    let whole = Decimal::from((whole >> shift).low_u64());
    if whole.is_zero() {
        return Decimal::ZERO;
    }
    part / whole * Decimal::ONE_HUNDRED
}
