//! Typed call surfaces for the three contracts the client talks to.
//!
//! Each binding is a thin wrapper over [`ContractHandle`]: reads go through
//! `eth_call` on the shared backend, writes are returned as unsigned
//! [`TransactionRequest`]s so the caller decides how to estimate, pad and
//! submit them.

pub mod buy_sell;
pub mod erc20;
pub mod stream_fi;

pub use buy_sell::{BuySellContract, RawRequest};
pub use erc20::Erc20Contract;
pub use stream_fi::{RawStream, StreamFiContract};

use crate::abi;
use crate::blockchain::ChainBackend;
use crate::errors::ClientError;
use ethers::abi::Token;
use ethers::types::{Address, Bytes, TransactionRequest};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct ContractHandle {
    address: Address,
    backend: Arc<dyn ChainBackend>,
}

impl ContractHandle {
    pub fn new(address: Address, backend: Arc<dyn ChainBackend>) -> Self {
        Self { address, backend }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn backend(&self) -> &Arc<dyn ChainBackend> {
        &self.backend
    }

    /// Read-only call returning the raw ABI-encoded result.
    pub async fn call(&self, signature: &str, args: &[Token]) -> Result<Bytes, ClientError> {
        trace!(contract = ?self.address, method = signature, "eth_call");
        let tx = TransactionRequest::new()
            .to(self.address)
            .data(abi::encode_call(signature, args));
        self.backend.call(&tx).await
    }

    /// Same as [`call`](Self::call) but with `from` set, for views that
    /// depend on `msg.sender` and for dry runs.
    pub async fn call_from(&self, from: Address, signature: &str, args: &[Token]) -> Result<Bytes, ClientError> {
        let tx = self.transaction(from, signature, args);
        self.backend.call(&tx).await
    }

    /// Unsigned transaction for a state-changing method.
    pub fn transaction(&self, from: Address, signature: &str, args: &[Token]) -> TransactionRequest {
        TransactionRequest::new()
            .from(from)
            .to(self.address)
            .data(abi::encode_call(signature, args))
    }

    pub async fn has_code(&self) -> Result<bool, ClientError> {
        self.backend.has_code(self.address).await
    }
}
