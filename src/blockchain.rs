//! # Chain Backend
//!
//! The boundary between the client and the outside world. Everything the
//! client needs from a wallet or node goes through [`ChainBackend`]:
//! account access, network switching, code probes, read-only calls, gas
//! estimation, transaction submission and receipt waits.
//!
//! [`RpcBackend`] speaks EIP-1193 style JSON-RPC over HTTP: transactions are
//! submitted with `eth_sendTransaction` and signed by the wallet behind the
//! endpoint. [`ResilientBackend`] decorates any backend with a
//! [`RetryPolicy`] on the read side; wallet prompts and transaction
//! submission are never retried.

use crate::errors::ClientError;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use ethers::{
    providers::{Http, Middleware, PendingTransaction, Provider},
    types::{Address, Bytes, TransactionReceipt, TransactionRequest, H256, U256},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Parameters for `wallet_addEthereumChain`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddChainParams {
    pub chain_id: String,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl AddChainParams {
    pub fn new(chain_id: u64, chain_name: &str, rpc_url: &str, explorer_url: &str) -> Self {
        Self {
            chain_id: hex_chain_id(chain_id),
            chain_name: chain_name.to_string(),
            native_currency: NativeCurrency {
                name: "ETH".to_string(),
                symbol: "ETH".to_string(),
                decimals: 18,
            },
            rpc_urls: vec![rpc_url.to_string()].into_iter().filter(|u| !u.is_empty()).collect(),
            block_explorer_urls: vec![explorer_url.to_string()],
        }
    }
}

pub fn hex_chain_id(chain_id: u64) -> String {
    format!("0x{:x}", chain_id)
}

#[async_trait]
pub trait ChainBackend: std::fmt::Debug + Send + Sync {
    async fn chain_id(&self) -> Result<u64, ClientError>;
    async fn switch_chain(&self, chain_id: u64) -> Result<(), ClientError>;
    async fn add_chain(&self, params: &AddChainParams) -> Result<(), ClientError>;
    async fn request_accounts(&self) -> Result<Vec<Address>, ClientError>;
    async fn get_code(&self, address: Address) -> Result<Bytes, ClientError>;
    async fn call(&self, tx: &TransactionRequest) -> Result<Bytes, ClientError>;
    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<U256, ClientError>;
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<H256, ClientError>;
    /// Resolves once the transaction has `confirmations` confirmations, or
    /// `None` if the node dropped it.
    async fn wait_for_receipt(&self, tx_hash: H256, confirmations: usize)
        -> Result<Option<TransactionReceipt>, ClientError>;

    /// True when `address` holds contract code.
    async fn has_code(&self, address: Address) -> Result<bool, ClientError> {
        let code = self.get_code(address).await?;
        Ok(!code.as_ref().is_empty())
    }
}

//================================================================================================//
//                                         RPC BACKEND                                           //
//================================================================================================//

pub struct RpcBackend {
    provider: Arc<Provider<Http>>,
    url: String,
}

impl RpcBackend {
    pub fn new(rpc_url: &str) -> Result<Self, ClientError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ClientError::Transport(format!("invalid RPC url {}: {}", rpc_url, e)))?;
        info!(url = %rpc_url, "Created RPC wallet backend");
        Ok(Self {
            provider: Arc::new(provider),
            url: rpc_url.to_string(),
        })
    }

    pub fn provider(&self) -> Arc<Provider<Http>> {
        self.provider.clone()
    }
}

impl std::fmt::Debug for RpcBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcBackend").field("url", &self.url).finish()
    }
}

#[async_trait]
impl ChainBackend for RpcBackend {
    async fn chain_id(&self) -> Result<u64, ClientError> {
        let id = self.provider.get_chainid().await?;
        Ok(id.as_u64())
    }

    #[instrument(skip(self), level = "debug")]
    async fn switch_chain(&self, chain_id: u64) -> Result<(), ClientError> {
        let params = [serde_json::json!({ "chainId": hex_chain_id(chain_id) })];
        self.provider
            .request::<_, serde_json::Value>("wallet_switchEthereumChain", params)
            .await?;
        Ok(())
    }

    async fn add_chain(&self, params: &AddChainParams) -> Result<(), ClientError> {
        debug!(chain_id = %params.chain_id, "Requesting wallet to add chain");
        self.provider
            .request::<_, serde_json::Value>("wallet_addEthereumChain", [params])
            .await?;
        Ok(())
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, ClientError> {
        let accounts: Vec<Address> = self.provider.request("eth_requestAccounts", ()).await?;
        Ok(accounts)
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, ClientError> {
        Ok(self.provider.get_code(address, None).await?)
    }

    async fn call(&self, tx: &TransactionRequest) -> Result<Bytes, ClientError> {
        Ok(self.provider.call(&tx.clone().into(), None).await?)
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<U256, ClientError> {
        Ok(self.provider.estimate_gas(&tx.clone().into(), None).await?)
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<H256, ClientError> {
        let pending = self.provider.send_transaction(tx, None).await?;
        let tx_hash = pending.tx_hash();
        debug!(tx_hash = ?tx_hash, "Transaction submitted");
        Ok(tx_hash)
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        confirmations: usize,
    ) -> Result<Option<TransactionReceipt>, ClientError> {
        let receipt = PendingTransaction::new(tx_hash, self.provider.as_ref())
            .confirmations(confirmations)
            .await?;
        Ok(receipt)
    }
}

//================================================================================================//
//                                      RESILIENT BACKEND                                        //
//================================================================================================//

/// Applies a [`RetryPolicy`] to every read-side call of the inner backend.
#[derive(Debug)]
pub struct ResilientBackend {
    inner: Arc<dyn ChainBackend>,
    policy: RetryPolicy,
}

impl ResilientBackend {
    pub fn new(inner: Arc<dyn ChainBackend>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl ChainBackend for ResilientBackend {
    async fn chain_id(&self) -> Result<u64, ClientError> {
        self.policy.run("eth_chainId", || self.inner.chain_id()).await
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), ClientError> {
        self.inner.switch_chain(chain_id).await
    }

    async fn add_chain(&self, params: &AddChainParams) -> Result<(), ClientError> {
        self.inner.add_chain(params).await
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, ClientError> {
        self.inner.request_accounts().await
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, ClientError> {
        self.policy.run("eth_getCode", || self.inner.get_code(address)).await
    }

    async fn call(&self, tx: &TransactionRequest) -> Result<Bytes, ClientError> {
        self.policy.run("eth_call", || self.inner.call(tx)).await
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<U256, ClientError> {
        self.policy.run("eth_estimateGas", || self.inner.estimate_gas(tx)).await
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<H256, ClientError> {
        self.inner.send_transaction(tx).await
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        confirmations: usize,
    ) -> Result<Option<TransactionReceipt>, ClientError> {
        self.inner.wait_for_receipt(tx_hash, confirmations).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_chain_id() {
        assert_eq!(hex_chain_id(1), "0x1");
        assert_eq!(hex_chain_id(11155111), "0xaa36a7");
    }

    #[test]
    fn test_add_chain_params_shape() {
        let params = AddChainParams::new(1, "Ethereum Mainnet", "https://eth.llamarpc.com", "https://etherscan.io");
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["chainId"], "0x1");
        assert_eq!(json["chainName"], "Ethereum Mainnet");
        assert_eq!(json["nativeCurrency"]["decimals"], 18);
        assert_eq!(json["rpcUrls"][0], "https://eth.llamarpc.com");
        assert_eq!(json["blockExplorerUrls"][0], "https://etherscan.io");
    }
}
