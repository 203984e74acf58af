#![allow(dead_code)]

pub mod mocks;

use ethers::abi::{ParamType, Token};
use ethers::types::{Address, U256};
use mocks::{decode_args, ret, MockChain};
use std::sync::{Arc, Mutex};
use streamfi_client::config::Config;
use streamfi_client::contracts::{buy_sell, erc20, stream_fi, RawRequest, RawStream};

pub const CHAIN_ID: u64 = 1;

pub fn account() -> Address {
    Address::repeat_byte(0xA1)
}

pub fn other_account() -> Address {
    Address::repeat_byte(0xB2)
}

pub fn treasury() -> Address {
    Address::repeat_byte(0x7E)
}

pub fn tokens(n: u64) -> U256 {
    U256::from(n) * U256::exp10(18)
}

/// Defaults with the annotation store kept in memory.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.annotations_path = None;
    config
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn raw_stream(creator: Address, recipients: Vec<Address>, funded: u64, distributed: u64) -> RawStream {
    RawStream {
        creator,
        hourly_rate: tokens(1),
        duration: U256::from(720u64),
        start_time: U256::from(1_700_000_000u64),
        end_time: U256::zero(),
        recipients,
        total_funded: tokens(funded),
        total_distributed: tokens(distributed),
        is_active: true,
    }
}

/// StreamFi contract state shared between the mock's handlers and the test.
#[derive(Clone, Default)]
pub struct StreamFiState {
    pub streams: Arc<Mutex<Vec<RawStream>>>,
    pub rewards: Arc<Mutex<Vec<U256>>>,
    pub recipient_rates: Arc<Mutex<std::collections::HashMap<(u64, Address), U256>>>,
    pub failing_streams: Arc<Mutex<Vec<u64>>>,
}

impl StreamFiState {
    pub fn push(&self, stream: RawStream, reward: U256) {
        self.streams.lock().unwrap().push(stream);
        self.rewards.lock().unwrap().push(reward);
    }
}

/// Deploys a StreamFi contract backed by `state`.
pub fn install_stream_fi(chain: &MockChain, config: &Config, state: &StreamFiState) {
    let address = config.contracts.stream_fi;
    chain.deploy(address);

    let streams = state.streams.clone();
    chain.on_call(address, stream_fi::STREAM_COUNT, move |_| {
        ret(&[Token::Uint(U256::from(streams.lock().unwrap().len()))])
    });

    let streams = state.streams.clone();
    let failing = state.failing_streams.clone();
    chain.on_call(address, stream_fi::GET_STREAM, move |data| {
        let id = decode_args(&[ParamType::Uint(256)], data)[0].clone().into_uint().unwrap().as_u64();
        if failing.lock().unwrap().contains(&id) {
            return Err(mocks::rate_limited());
        }
        let stream = streams.lock().unwrap().get(id as usize - 1).cloned();
        match stream {
            Some(stream) => ret(&stream.into_tokens()),
            None => Err(mocks::revert("Stream does not exist")),
        }
    });

    let rewards = state.rewards.clone();
    chain.on_call(address, stream_fi::CALCULATE_REWARD, move |data| {
        let args = decode_args(&[ParamType::Uint(256), ParamType::Address], data);
        let id = args[0].clone().into_uint().unwrap().as_usize();
        let reward = rewards.lock().unwrap().get(id - 1).copied().unwrap_or_default();
        ret(&[Token::Uint(reward)])
    });

    let rates = state.recipient_rates.clone();
    chain.on_call(address, stream_fi::GET_RECIPIENT_HOURLY_RATE, move |data| {
        let args = decode_args(&[ParamType::Uint(256), ParamType::Address], data);
        let id = args[0].clone().into_uint().unwrap().as_u64();
        let recipient = args[1].clone().into_address().unwrap();
        match rates.lock().unwrap().get(&(id, recipient)) {
            Some(rate) => ret(&[Token::Uint(*rate)]),
            None => Err(mocks::revert("no individual rate")),
        }
    });
}

/// Deploys the configured ERC-20 with a mutable allowance towards StreamFi.
pub fn install_token(chain: &MockChain, config: &Config, balance: U256) -> Arc<Mutex<U256>> {
    let address = config.token.contract_address;
    chain.deploy(address);
    chain.on_call(address, erc20::NAME, |_| ret(&[Token::String("MNEE USD Stablecoin".into())]));
    chain.on_call(address, erc20::SYMBOL, |_| ret(&[Token::String("MNEE".into())]));
    chain.on_call(address, erc20::DECIMALS, |_| ret(&[Token::Uint(U256::from(18u8))]));
    chain.on_call(address, erc20::BALANCE_OF, move |_| ret(&[Token::Uint(balance)]));

    let allowance = Arc::new(Mutex::new(U256::zero()));
    let current = allowance.clone();
    chain.on_call(address, erc20::ALLOWANCE, move |_| ret(&[Token::Uint(*current.lock().unwrap())]));
    allowance
}

pub fn raw_request(user: Address, amount: u64, currency: u64, mobile: &str) -> RawRequest {
    RawRequest {
        user,
        amount: tokens(amount),
        currency_type: U256::from(currency),
        status: U256::zero(),
        mobile_number: mobile.to_string(),
        recipient_wallet: if mobile.is_empty() { user } else { Address::zero() },
        timestamp: U256::from(1_700_000_000u64),
        admin_notes: String::new(),
    }
}

/// Deploys a Buy/Sell escrow whose admin is `admin`, holding `requests`
/// (id = index + 1). Every request belongs to the connected account and is
/// pending.
pub fn install_buy_sell(chain: &MockChain, config: &Config, admin: Address, requests: Vec<RawRequest>) {
    let address = config.contracts.buy_sell;
    chain.deploy(address);
    chain.on_call(address, buy_sell::ADMIN, move |_| ret(&[Token::Address(admin)]));
    chain.on_call(address, buy_sell::TREASURY_WALLET, |_| ret(&[Token::Address(treasury())]));

    let ids: Vec<Token> = (1..=requests.len()).map(|i| Token::Uint(U256::from(i))).collect();
    let user_ids = ids.clone();
    chain.on_call(address, buy_sell::GET_USER_REQUESTS, move |_| ret(&[Token::Array(user_ids.clone())]));
    chain.on_call(address, buy_sell::GET_PENDING_REQUESTS, move |_| ret(&[Token::Array(ids.clone())]));

    chain.on_call(address, buy_sell::GET_REQUEST, move |data| {
        let id = decode_args(&[ParamType::Uint(256)], data)[0].clone().into_uint().unwrap().as_usize();
        match requests.get(id - 1) {
            Some(request) => ret(&request.clone().into_tokens()),
            None => Err(mocks::revert("Request does not exist")),
        }
    });
}
