//! # Centralized Error Handling
//!
//! A single typed error for everything that crosses the wallet/contract
//! boundary. Raw provider failures are classified once, on conversion, into
//! the categories the rest of the client reasons about: transient node
//! failures, user rejections, contract reverts, deployment problems and
//! confirmation timeouts.

use ethers::abi::ParamType;
use ethers::providers::{ProviderError, RpcError};
use ethers::types::{Address, Bytes, H256};
use std::time::Duration;
use thiserror::Error;

/// `Error(string)` selector.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
/// `Panic(uint256)` selector.
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// JSON-RPC / HTTP codes emitted by overloaded or rate-limiting nodes.
const TRANSIENT_CODES: &[i64] = &[-32002, -32005, 429];

const TRANSIENT_MESSAGES: &[&str] = &[
    "too many errors",
    "retrying",
    "could not coalesce",
    "rate limit",
    "too many requests",
    "429",
    "exceeded the rps",
];

const RATE_LIMIT_MESSAGES: &[&str] = &["too many errors", "rate limit", "too many requests", "429"];

const USER_REJECTION_MESSAGES: &[&str] = &["user rejected", "user denied", "action_rejected"];

/// Wallet error code for a chain the wallet does not know yet.
pub const UNRECOGNIZED_CHAIN_CODE: i64 = 4902;
/// EIP-1193 user rejection code.
pub const USER_REJECTED_CODE: i64 = 4001;

#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("No wallet provider is available. Configure an RPC wallet endpoint to continue.")]
    NoWalletProvider,
    #[error("Wallet not connected")]
    NotConnected,
    #[error("No accounts found")]
    NoAccounts,
    #[error("Failed to switch to {network}. Please switch manually in your wallet.")]
    ChainSwitchRejected { network: String },
    #[error("Wrong network! Please switch to chain {expected}. Current: {actual}")]
    WrongChain { expected: u64, actual: u64 },
    #[error("No contract found at address {0:?}. Please verify the deployment.")]
    ContractNotFound(Address),
    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Bytes>,
    },
    #[error("execution reverted: {}", .reason.as_deref().unwrap_or("no reason given"))]
    Revert {
        reason: Option<String>,
        data: Option<Bytes>,
    },
    #[error("Transaction will fail: {0}")]
    SimulationFailed(String),
    #[error("Transaction rejected by user: {0}")]
    UserRejected(String),
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        operation: String,
        after: Duration,
        tx_hash: Option<H256>,
    },
    #[error("Transaction {0:?} reverted on-chain")]
    TransactionReverted(H256),
    #[error("Transaction {0:?} was dropped before confirmation")]
    TransactionDropped(H256),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Failed to decode contract response: {0}")]
    Decode(String),
    #[error("{0}")]
    Validation(String),
    #[error("Annotation store error: {0}")]
    Storage(String),
}

impl ClientError {
    /// Classifies a JSON-RPC error object.
    pub fn from_rpc(code: i64, message: &str, data: Option<Bytes>) -> Self {
        let lowered = message.to_lowercase();

        if code == USER_REJECTED_CODE || USER_REJECTION_MESSAGES.iter().any(|m| lowered.contains(m)) {
            return ClientError::UserRejected(message.to_string());
        }

        if code == 3 || lowered.contains("execution reverted") {
            let reason = data
                .as_ref()
                .and_then(|d| decode_revert_reason(d))
                .or_else(|| reason_from_message(message));
            return ClientError::Revert { reason, data };
        }

        ClientError::Rpc {
            code,
            message: message.to_string(),
            data,
        }
    }

    /// Failures a node is expected to recover from on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Rpc { code, message, .. } => {
                TRANSIENT_CODES.contains(code) || contains_any(message, TRANSIENT_MESSAGES)
            }
            // Unclassified node/transport failures are treated as transient.
            ClientError::Transport(_) => true,
            ClientError::Revert { reason: Some(reason), .. } => reason.contains("could not coalesce"),
            _ => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        match self {
            ClientError::Rpc { code, message, .. } => {
                *code == -32002 || *code == -32005 || *code == 429 || contains_any(message, RATE_LIMIT_MESSAGES)
            }
            ClientError::Transport(message) => contains_any(message, RATE_LIMIT_MESSAGES),
            _ => false,
        }
    }

    /// A contract call that returned nothing usable: a revert, or empty data
    /// that could not be decoded (typical for an address without code).
    pub fn is_call_exception(&self) -> bool {
        match self {
            ClientError::Revert { .. } | ClientError::Decode(_) => true,
            ClientError::Rpc { message, .. } => message.to_lowercase().contains("missing revert data"),
            _ => false,
        }
    }

    pub fn is_user_rejection(&self) -> bool {
        matches!(self, ClientError::UserRejected(_))
    }

    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            ClientError::Rpc { code, .. } => Some(*code),
            ClientError::UserRejected(_) => Some(USER_REJECTED_CODE),
            _ => None,
        }
    }

    pub fn revert_reason(&self) -> Option<&str> {
        match self {
            ClientError::Revert { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }

    /// Text shown to the user for this failure.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::UserRejected(_) => "Transaction cancelled by user".to_string(),
            ClientError::Revert { reason: Some(reason), .. } => reason.clone(),
            ClientError::Revert { reason: None, .. } => "Transaction would fail".to_string(),
            ClientError::Timeout { operation, after, tx_hash } => {
                let hash = tx_hash.map(|h| format!(" (tx {:?})", h)).unwrap_or_default();
                format!(
                    "{} timed out after {}s{}. The transaction may still be confirmed on-chain; check your wallet history.",
                    operation,
                    after.as_secs(),
                    hash
                )
            }
            e if e.is_rate_limited() => {
                "RPC endpoint rate limited. Please wait a moment and try again, or switch to a different RPC endpoint."
                    .to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<ProviderError> for ClientError {
    fn from(err: ProviderError) -> Self {
        if let Some(resp) = err.as_error_response() {
            let data = resp.data.as_ref().and_then(bytes_from_json);
            return ClientError::from_rpc(resp.code, &resp.message, data);
        }
        ClientError::Transport(err.to_string())
    }
}

impl From<ethers::abi::Error> for ClientError {
    fn from(err: ethers::abi::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}

impl From<ethers::utils::ConversionError> for ClientError {
    fn from(err: ethers::utils::ConversionError) -> Self {
        ClientError::Validation(format!("invalid amount: {}", err))
    }
}

/// Decodes `Error(string)` and `Panic(uint256)` revert payloads.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() < 4 {
        return None;
    }
    let (selector, payload) = data.split_at(4);
    if selector == ERROR_STRING_SELECTOR {
        return ethers::abi::decode(&[ParamType::String], payload)
            .ok()
            .and_then(|mut tokens| tokens.pop())
            .and_then(|token| token.into_string());
    }
    if selector == PANIC_SELECTOR {
        return ethers::abi::decode(&[ParamType::Uint(256)], payload)
            .ok()
            .and_then(|mut tokens| tokens.pop())
            .and_then(|token| token.into_uint())
            .map(|code| format!("panic code 0x{:x}", code));
    }
    None
}

fn reason_from_message(message: &str) -> Option<String> {
    message
        .split_once("execution reverted:")
        .map(|(_, reason)| reason.trim().to_string())
        .filter(|reason| !reason.is_empty())
}

fn bytes_from_json(value: &serde_json::Value) -> Option<Bytes> {
    let raw = match value {
        serde_json::Value::String(s) => s.as_str(),
        serde_json::Value::Object(map) => map.get("data").and_then(|v| v.as_str())?,
        _ => return None,
    };
    hex::decode(raw.trim_start_matches("0x")).ok().map(Bytes::from)
}

fn contains_any(message: &str, patterns: &[&str]) -> bool {
    let lowered = message.to_lowercase();
    patterns.iter().any(|p| lowered.contains(p))
}
