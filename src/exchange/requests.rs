use super::quote::Currency;
use crate::contracts::RawRequest;
use crate::token::format_token_amount;
use ethers::types::{Address, U256};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Unknown(u64),
}

impl RequestStatus {
    pub fn from_code(code: U256) -> Self {
        match code.low_u64() {
            _ if code > U256::from(u64::MAX) => RequestStatus::Unknown(u64::MAX),
            0 => RequestStatus::Pending,
            1 => RequestStatus::Approved,
            2 => RequestStatus::Rejected,
            3 => RequestStatus::Cancelled,
            other => RequestStatus::Unknown(other),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Approved | RequestStatus::Rejected | RequestStatus::Cancelled
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStatus::Pending => f.write_str("Pending"),
            RequestStatus::Approved => f.write_str("Approved"),
            RequestStatus::Rejected => f.write_str("Rejected"),
            RequestStatus::Cancelled => f.write_str("Cancelled"),
            RequestStatus::Unknown(code) => write!(f, "Unknown({})", code),
        }
    }
}

/// Whether a request trades fiat for tokens or the reverse. The contract does
/// not store the side; a sell request carries a mobile number, a buy request
/// a recipient wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRequest {
    pub id: U256,
    pub user: Address,
    /// Amount in 18-decimal base units (fiat for buys, tokens for sells).
    pub amount: U256,
    pub currency: Currency,
    pub status: RequestStatus,
    pub mobile_number: String,
    pub recipient_wallet: Address,
    pub timestamp: u64,
    pub admin_notes: String,
}

impl ExchangeRequest {
    pub fn from_raw(id: U256, raw: RawRequest) -> Self {
        Self {
            id,
            user: raw.user,
            amount: raw.amount,
            currency: Currency::from_code(raw.currency_type.low_u64()),
            status: RequestStatus::from_code(raw.status),
            mobile_number: raw.mobile_number,
            recipient_wallet: raw.recipient_wallet,
            timestamp: raw.timestamp.low_u64(),
            admin_notes: raw.admin_notes,
        }
    }

    pub fn kind(&self) -> RequestKind {
        if self.mobile_number.is_empty() {
            RequestKind::Buy
        } else {
            RequestKind::Sell
        }
    }

    pub fn amount_display(&self) -> String {
        format_token_amount(self.amount, 18)
    }

    pub fn is_cancellable(&self) -> bool {
        self.status == RequestStatus::Pending
    }
}

/// Newest first, by descending request id.
pub fn sort_newest_first(requests: &mut [ExchangeRequest]) {
    requests.sort_by(|a, b| b.id.cmp(&a.id));
}
