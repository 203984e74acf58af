//! Headless client for StreamFi payment streams and the Buy/Sell fiat
//! exchange, speaking to an EIP-1193 wallet endpoint.

pub mod abi;
pub mod annotations;
pub mod blockchain;
pub mod config;
pub mod contracts;
pub mod errors;
pub mod exchange;
pub mod metrics;
pub mod poller;
pub mod retry;
pub mod streams;
pub mod token;
pub mod tx;

pub use blockchain::{ChainBackend, ResilientBackend, RpcBackend};
pub use config::Config;
pub use errors::ClientError;
