//! Programmable in-process wallet backend.
//!
//! `MockChain` answers `eth_call` by dispatching on (contract, selector) to
//! handlers registered by the test, records every submitted transaction and
//! hands out receipts. Failures are injected per selector.

use async_trait::async_trait;
use ethers::abi::{ParamType, Token};
use ethers::types::{
    Address, Bytes, NameOrAddress, TransactionReceipt, TransactionRequest, H256, U256, U64,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use streamfi_client::abi::selector;
use streamfi_client::blockchain::{AddChainParams, ChainBackend};
use streamfi_client::errors::{ClientError, UNRECOGNIZED_CHAIN_CODE};

pub type CallHandler = Arc<dyn Fn(&[u8]) -> Result<Bytes, ClientError> + Send + Sync>;
pub type SendHook = Arc<dyn Fn(&TransactionRequest) + Send + Sync>;

#[derive(Default)]
struct MockState {
    chain_id: u64,
    known_chains: HashSet<u64>,
    switch_error: Option<ClientError>,
    add_chain_error: Option<ClientError>,
    accounts: Vec<Address>,
    code: HashSet<Address>,
    calls: HashMap<(Address, [u8; 4]), CallHandler>,
    estimates: HashMap<[u8; 4], Result<U256, ClientError>>,
    send_errors: HashMap<[u8; 4], ClientError>,
    send_hooks: HashMap<[u8; 4], SendHook>,
    reverted: HashSet<[u8; 4]>,
    hanging: HashSet<[u8; 4]>,
    sent: Vec<TransactionRequest>,
    by_hash: HashMap<H256, [u8; 4]>,
    call_counts: HashMap<[u8; 4], usize>,
    call_delays: HashMap<[u8; 4], VecDeque<Duration>>,
    switch_requests: Vec<u64>,
}

pub struct MockChain {
    state: Mutex<MockState>,
}

impl std::fmt::Debug for MockChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockChain").finish_non_exhaustive()
    }
}

fn selector_of(data: Option<&Bytes>) -> [u8; 4] {
    let mut out = [0u8; 4];
    if let Some(data) = data {
        if data.len() >= 4 {
            out.copy_from_slice(&data[..4]);
        }
    }
    out
}

fn target_of(tx: &TransactionRequest) -> Address {
    match &tx.to {
        Some(NameOrAddress::Address(address)) => *address,
        _ => Address::zero(),
    }
}

/// ABI-encodes a return value.
pub fn ret(tokens: &[Token]) -> Result<Bytes, ClientError> {
    Ok(Bytes::from(ethers::abi::encode(tokens)))
}

pub fn revert(reason: &str) -> ClientError {
    ClientError::Revert {
        reason: Some(reason.to_string()),
        data: None,
    }
}

pub fn rate_limited() -> ClientError {
    ClientError::Rpc {
        code: -32005,
        message: "rate limit exceeded".to_string(),
        data: None,
    }
}

/// Decodes the arguments of a calldata payload (selector included).
pub fn decode_args(types: &[ParamType], data: &[u8]) -> Vec<Token> {
    ethers::abi::decode(types, &data[4..]).expect("calldata should decode")
}

impl MockChain {
    pub fn new(chain_id: u64, account: Address) -> Self {
        let state = MockState {
            chain_id,
            known_chains: HashSet::from([chain_id]),
            accounts: vec![account],
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.state.lock().unwrap().chain_id = chain_id;
    }

    pub fn add_known_chain(&self, chain_id: u64) {
        self.state.lock().unwrap().known_chains.insert(chain_id);
    }

    pub fn fail_switch(&self, err: ClientError) {
        self.state.lock().unwrap().switch_error = Some(err);
    }

    pub fn fail_add_chain(&self, err: ClientError) {
        self.state.lock().unwrap().add_chain_error = Some(err);
    }

    pub fn set_accounts(&self, accounts: Vec<Address>) {
        self.state.lock().unwrap().accounts = accounts;
    }

    pub fn deploy(&self, address: Address) {
        self.state.lock().unwrap().code.insert(address);
    }

    pub fn undeploy(&self, address: Address) {
        self.state.lock().unwrap().code.remove(&address);
    }

    /// Answers `signature` on `contract` with `handler(calldata)`.
    pub fn on_call<F>(&self, contract: Address, signature: &str, handler: F)
    where
        F: Fn(&[u8]) -> Result<Bytes, ClientError> + Send + Sync + 'static,
    {
        self.state
            .lock()
            .unwrap()
            .calls
            .insert((contract, selector(signature)), Arc::new(handler));
    }

    /// The next `eth_call` of `signature` answers only after `delay`. The
    /// answer itself is computed when the call arrives.
    pub fn delay_next_call(&self, signature: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .call_delays
            .entry(selector(signature))
            .or_default()
            .push_back(delay);
    }

    pub fn set_estimate(&self, signature: &str, result: Result<U256, ClientError>) {
        self.state.lock().unwrap().estimates.insert(selector(signature), result);
    }

    pub fn fail_send(&self, signature: &str, err: ClientError) {
        self.state.lock().unwrap().send_errors.insert(selector(signature), err);
    }

    /// Runs `hook` when a transaction calling `signature` is submitted.
    pub fn on_send<F>(&self, signature: &str, hook: F)
    where
        F: Fn(&TransactionRequest) + Send + Sync + 'static,
    {
        self.state.lock().unwrap().send_hooks.insert(selector(signature), Arc::new(hook));
    }

    /// Receipts for `signature` report status 0.
    pub fn revert_on_chain(&self, signature: &str) {
        self.state.lock().unwrap().reverted.insert(selector(signature));
    }

    /// Receipts for `signature` never arrive.
    pub fn hang_receipts(&self, signature: &str) {
        self.state.lock().unwrap().hanging.insert(selector(signature));
    }

    pub fn sent(&self) -> Vec<TransactionRequest> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent_to(&self, signature: &str) -> Vec<TransactionRequest> {
        let wanted = selector(signature);
        self.sent()
            .into_iter()
            .filter(|tx| selector_of(tx.data.as_ref()) == wanted)
            .collect()
    }

    pub fn call_count(&self, signature: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .call_counts
            .get(&selector(signature))
            .copied()
            .unwrap_or(0)
    }

    pub fn switch_requests(&self) -> Vec<u64> {
        self.state.lock().unwrap().switch_requests.clone()
    }
}

#[async_trait]
impl ChainBackend for MockChain {
    async fn chain_id(&self) -> Result<u64, ClientError> {
        Ok(self.state.lock().unwrap().chain_id)
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state.switch_requests.push(chain_id);
        if let Some(err) = &state.switch_error {
            return Err(err.clone());
        }
        if !state.known_chains.contains(&chain_id) {
            return Err(ClientError::Rpc {
                code: UNRECOGNIZED_CHAIN_CODE,
                message: "Unrecognized chain ID".to_string(),
                data: None,
            });
        }
        state.chain_id = chain_id;
        Ok(())
    }

    async fn add_chain(&self, params: &AddChainParams) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = &state.add_chain_error {
            return Err(err.clone());
        }
        let chain_id = u64::from_str_radix(params.chain_id.trim_start_matches("0x"), 16)
            .map_err(|e| ClientError::Validation(e.to_string()))?;
        state.known_chains.insert(chain_id);
        state.chain_id = chain_id;
        Ok(())
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, ClientError> {
        Ok(self.state.lock().unwrap().accounts.clone())
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, ClientError> {
        let deployed = self.state.lock().unwrap().code.contains(&address);
        Ok(if deployed {
            Bytes::from(vec![0x60, 0x80, 0x60, 0x40])
        } else {
            Bytes::new()
        })
    }

    async fn call(&self, tx: &TransactionRequest) -> Result<Bytes, ClientError> {
        let sel = selector_of(tx.data.as_ref());
        let (handler, delay) = {
            let mut state = self.state.lock().unwrap();
            *state.call_counts.entry(sel).or_default() += 1;
            let delay = state.call_delays.get_mut(&sel).and_then(VecDeque::pop_front);
            (state.calls.get(&(target_of(tx), sel)).cloned(), delay)
        };
        let data = tx.data.clone().unwrap_or_default();
        let answer = match handler {
            Some(handler) => handler(&data),
            // What a node returns for a call to an address without the function.
            None => Ok(Bytes::new()),
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        answer
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<U256, ClientError> {
        let sel = selector_of(tx.data.as_ref());
        let state = self.state.lock().unwrap();
        state.estimates.get(&sel).cloned().unwrap_or(Ok(U256::from(90_000u64)))
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<H256, ClientError> {
        let sel = selector_of(tx.data.as_ref());
        let hook = {
            let mut state = self.state.lock().unwrap();
            if let Some(err) = state.send_errors.get(&sel) {
                return Err(err.clone());
            }
            state.sent.push(tx.clone());
            state.send_hooks.get(&sel).cloned()
        };
        if let Some(hook) = hook {
            hook(&tx);
        }
        let mut state = self.state.lock().unwrap();
        let hash = H256::from_low_u64_be(state.sent.len() as u64);
        state.by_hash.insert(hash, sel);
        Ok(hash)
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        _confirmations: usize,
    ) -> Result<Option<TransactionReceipt>, ClientError> {
        let (known, hanging, reverted) = {
            let state = self.state.lock().unwrap();
            match state.by_hash.get(&tx_hash) {
                Some(sel) => (true, state.hanging.contains(sel), state.reverted.contains(sel)),
                None => (false, false, false),
            }
        };
        if !known {
            return Ok(None);
        }
        if hanging {
            std::future::pending::<()>().await;
        }
        Ok(Some(TransactionReceipt {
            transaction_hash: tx_hash,
            block_number: Some(U64::from(1_000u64)),
            status: Some(U64::from(if reverted { 0u64 } else { 1u64 })),
            ..Default::default()
        }))
    }
}
