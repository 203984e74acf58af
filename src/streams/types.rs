//! Derived stream state: what the client shows for a stream, computed from
//! the raw contract record, the connected account and the wall clock.

use crate::contracts::RawStream;
use crate::token::format_token_amount;
use ethers::types::{Address, U256};

const SECONDS_PER_HOUR: u64 = 3600;

/// Distribution tolerance: 0.0001 tokens in base units.
pub fn distribution_epsilon(decimals: u8) -> U256 {
    if decimals >= 4 {
        U256::exp10(usize::from(decimals - 4))
    } else {
        U256::zero()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activity {
    pub has_ended: bool,
    pub all_distributed: bool,
    pub actually_active: bool,
}

/// A stream is actually active only if the contract says so, its end time
/// has not passed, and funds remain to be distributed.
pub fn derive_activity(raw: &RawStream, now: u64, epsilon: U256) -> Activity {
    let end_time = raw.end_time.low_u64();
    let has_ended = !raw.end_time.is_zero() && now >= end_time;
    let all_distributed =
        !raw.total_funded.is_zero() && raw.total_distributed.saturating_add(epsilon) >= raw.total_funded;
    Activity {
        has_ended,
        all_distributed,
        actually_active: raw.is_active && !has_ended && !all_distributed,
    }
}

/// Amount that would have accrued at `hourly_rate` over `paused_seconds`.
pub fn paused_amount(paused_seconds: u64, hourly_rate: U256) -> U256 {
    U256::from(paused_seconds).saturating_mul(hourly_rate) / U256::from(SECONDS_PER_HOUR)
}

/// `max(0, reward - paused_amount)`. Display only; the contract knows
/// nothing about pauses.
pub fn pause_adjusted_reward(reward: U256, paused_seconds: u64, hourly_rate: U256) -> U256 {
    reward.saturating_sub(paused_amount(paused_seconds, hourly_rate))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamView {
    pub id: u64,
    pub creator: Address,
    pub hourly_rate: U256,
    pub duration_hours: u64,
    pub start_time: u64,
    pub end_time: u64,
    pub recipients: Vec<Address>,
    pub total_funded: U256,
    pub total_distributed: U256,
    pub contract_active: bool,
    pub activity: Activity,
    pub is_creator: bool,
    pub is_recipient: bool,
    /// Claimable reward for the connected account, pause-adjusted. `None`
    /// unless the account is a recipient of an active stream.
    pub accrued: Option<U256>,
}

impl StreamView {
    pub fn from_raw(id: u64, raw: RawStream, account: Address, now: u64, epsilon: U256) -> Self {
        let activity = derive_activity(&raw, now, epsilon);
        let is_creator = raw.creator == account;
        let is_recipient = raw.recipients.contains(&account);
        Self {
            id,
            creator: raw.creator,
            hourly_rate: raw.hourly_rate,
            duration_hours: raw.duration.low_u64(),
            start_time: raw.start_time.low_u64(),
            end_time: raw.end_time.low_u64(),
            recipients: raw.recipients,
            total_funded: raw.total_funded,
            total_distributed: raw.total_distributed,
            contract_active: raw.is_active,
            activity,
            is_creator,
            is_recipient,
            accrued: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.activity.actually_active
    }

    pub fn remaining(&self) -> U256 {
        self.total_funded.saturating_sub(self.total_distributed)
    }

    pub fn time_remaining(&self, now: u64) -> u64 {
        self.end_time.saturating_sub(now)
    }

    /// Funds required to cover every recipient for the full duration at the
    /// average rate.
    pub fn required_funding(&self) -> U256 {
        self.hourly_rate
            .saturating_mul(U256::from(self.duration_hours))
            .saturating_mul(U256::from(self.recipients.len()))
    }

    pub fn summary(&self, decimals: u8, symbol: &str) -> String {
        let state = if self.is_active() { "active" } else { "inactive" };
        format!(
            "#{} [{}] rate {} {}/h, {} h, {} recipients, funded {} / distributed {}",
            self.id,
            state,
            format_token_amount(self.hourly_rate, decimals),
            symbol,
            self.duration_hours,
            self.recipients.len(),
            format_token_amount(self.total_funded, decimals),
            format_token_amount(self.total_distributed, decimals),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(s: &str) -> U256 {
        ethers::utils::parse_units(s, 18u32).unwrap().into()
    }

    fn raw(end_time: u64, funded: &str, distributed: &str, active: bool) -> RawStream {
        RawStream {
            creator: Address::repeat_byte(1),
            hourly_rate: tokens("1"),
            duration: U256::from(100u64),
            start_time: U256::from(1_000u64),
            end_time: U256::from(end_time),
            recipients: vec![Address::repeat_byte(2)],
            total_funded: tokens(funded),
            total_distributed: tokens(distributed),
            is_active: active,
        }
    }

    #[test]
    fn test_epsilon_for_18_decimals() {
        assert_eq!(distribution_epsilon(18), U256::exp10(14));
        assert_eq!(distribution_epsilon(6), U256::from(100u64));
        assert_eq!(distribution_epsilon(2), U256::zero());
    }

    #[test]
    fn test_ended_stream_is_inactive_despite_contract_flag() {
        let now = 10_000;
        let a = derive_activity(&raw(now - 1, "100", "0", true), now, distribution_epsilon(18));
        assert!(a.has_ended);
        assert!(!a.actually_active);

        let a = derive_activity(&raw(now, "100", "0", true), now, distribution_epsilon(18));
        assert!(a.has_ended);
    }

    #[test]
    fn test_zero_end_time_never_ends() {
        let a = derive_activity(&raw(0, "100", "0", true), u64::MAX, distribution_epsilon(18));
        assert!(!a.has_ended);
        assert!(a.actually_active);
    }

    #[test]
    fn test_distribution_tolerance() {
        let eps = distribution_epsilon(18);
        let a = derive_activity(&raw(0, "100.00000", "99.99995", true), 0, eps);
        assert!(a.all_distributed);
        assert!(!a.actually_active);

        let a = derive_activity(&raw(0, "100.00000", "99.998", true), 0, eps);
        assert!(!a.all_distributed);
        assert!(a.actually_active);
    }

    #[test]
    fn test_unfunded_stream_is_not_all_distributed() {
        let a = derive_activity(&raw(0, "0", "0", true), 0, distribution_epsilon(18));
        assert!(!a.all_distributed);
        assert!(a.actually_active);
    }

    #[test]
    fn test_pause_adjustment_one_hour() {
        let rate = tokens("2");
        assert_eq!(pause_adjusted_reward(tokens("5"), 3600, rate), tokens("3"));
        assert_eq!(pause_adjusted_reward(tokens("1"), 3600, rate), U256::zero());
        assert_eq!(pause_adjusted_reward(tokens("5"), 0, rate), tokens("5"));
    }

    #[test]
    fn test_required_funding() {
        let mut view = StreamView::from_raw(1, raw(0, "0", "0", true), Address::zero(), 0, U256::zero());
        view.recipients.push(Address::repeat_byte(3));
        assert_eq!(view.required_funding(), tokens("200"));
    }
}
