//! BuySell escrow contract for manual fiat exchange requests.

use super::ContractHandle;
use crate::abi;
use crate::blockchain::ChainBackend;
use crate::errors::ClientError;
use ethers::abi::{ParamType, Token};
use ethers::types::{Address, TransactionRequest, U256};
use std::sync::Arc;

pub const CREATE_BUY_REQUEST: &str = "createBuyRequest(uint256,uint256,address)";
pub const CREATE_SELL_REQUEST: &str = "createSellRequest(uint256,uint256,string)";
pub const GET_REQUEST: &str = "getRequest(uint256)";
pub const CANCEL_REQUEST: &str = "cancelRequest(uint256)";
pub const GET_USER_REQUESTS: &str = "getUserRequests(address)";
pub const APPROVE_REQUEST: &str = "approveRequest(uint256,string)";
pub const REJECT_REQUEST: &str = "rejectRequest(uint256,string)";
pub const GET_PENDING_REQUESTS: &str = "getPendingRequests()";
pub const ADMIN: &str = "admin()";
pub const TREASURY_WALLET: &str = "treasuryWallet()";
pub const TOKEN: &str = "token()";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRequest {
    pub user: Address,
    pub amount: U256,
    pub currency_type: U256,
    pub status: U256,
    pub mobile_number: String,
    pub recipient_wallet: Address,
    pub timestamp: U256,
    pub admin_notes: String,
}

impl RawRequest {
    pub fn param_types() -> Vec<ParamType> {
        vec![
            ParamType::Address,
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::String,
            ParamType::Address,
            ParamType::Uint(256),
            ParamType::String,
        ]
    }

    pub fn from_tokens(tokens: Vec<Token>) -> Result<Self, ClientError> {
        let mut it = tokens.into_iter();
        let mut next = || {
            it.next()
                .ok_or_else(|| ClientError::Decode("getRequest returned too few values".to_string()))
        };
        Ok(Self {
            user: abi::token_address(next()?)?,
            amount: abi::token_uint(next()?)?,
            currency_type: abi::token_uint(next()?)?,
            status: abi::token_uint(next()?)?,
            mobile_number: abi::token_string(next()?)?,
            recipient_wallet: abi::token_address(next()?)?,
            timestamp: abi::token_uint(next()?)?,
            admin_notes: abi::token_string(next()?)?,
        })
    }

    pub fn into_tokens(self) -> Vec<Token> {
        vec![
            Token::Address(self.user),
            Token::Uint(self.amount),
            Token::Uint(self.currency_type),
            Token::Uint(self.status),
            Token::String(self.mobile_number),
            Token::Address(self.recipient_wallet),
            Token::Uint(self.timestamp),
            Token::String(self.admin_notes),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct BuySellContract {
    handle: ContractHandle,
}

impl BuySellContract {
    pub fn new(address: Address, backend: Arc<dyn ChainBackend>) -> Self {
        Self {
            handle: ContractHandle::new(address, backend),
        }
    }

    pub fn address(&self) -> Address {
        self.handle.address()
    }

    pub fn handle(&self) -> &ContractHandle {
        &self.handle
    }

    pub async fn admin(&self) -> Result<Address, ClientError> {
        abi::decode_address(&self.handle.call(ADMIN, &[]).await?)
    }

    pub async fn treasury_wallet(&self) -> Result<Address, ClientError> {
        abi::decode_address(&self.handle.call(TREASURY_WALLET, &[]).await?)
    }

    pub async fn token(&self) -> Result<Address, ClientError> {
        abi::decode_address(&self.handle.call(TOKEN, &[]).await?)
    }

    pub async fn get_request(&self, request_id: U256) -> Result<RawRequest, ClientError> {
        let data = self.handle.call(GET_REQUEST, &[Token::Uint(request_id)]).await?;
        RawRequest::from_tokens(abi::decode_return(&RawRequest::param_types(), &data)?)
    }

    pub async fn user_requests(&self, user: Address) -> Result<Vec<U256>, ClientError> {
        abi::decode_uint_array(&self.handle.call(GET_USER_REQUESTS, &[Token::Address(user)]).await?)
    }

    pub async fn pending_requests(&self) -> Result<Vec<U256>, ClientError> {
        abi::decode_uint_array(&self.handle.call(GET_PENDING_REQUESTS, &[]).await?)
    }

    pub fn create_buy_request_tx(
        &self,
        from: Address,
        fiat_amount: U256,
        currency_type: u8,
        recipient_wallet: Address,
    ) -> TransactionRequest {
        let args = [
            Token::Uint(fiat_amount),
            Token::Uint(U256::from(currency_type)),
            Token::Address(recipient_wallet),
        ];
        self.handle.transaction(from, CREATE_BUY_REQUEST, &args)
    }

    pub fn create_sell_request_tx(
        &self,
        from: Address,
        token_amount: U256,
        currency_type: u8,
        mobile_number: &str,
    ) -> TransactionRequest {
        let args = [
            Token::Uint(token_amount),
            Token::Uint(U256::from(currency_type)),
            Token::String(mobile_number.to_string()),
        ];
        self.handle.transaction(from, CREATE_SELL_REQUEST, &args)
    }

    pub fn cancel_request_tx(&self, from: Address, request_id: U256) -> TransactionRequest {
        self.handle.transaction(from, CANCEL_REQUEST, &[Token::Uint(request_id)])
    }

    pub fn approve_request_tx(&self, from: Address, request_id: U256, notes: &str) -> TransactionRequest {
        self.handle.transaction(
            from,
            APPROVE_REQUEST,
            &[Token::Uint(request_id), Token::String(notes.to_string())],
        )
    }

    pub fn reject_request_tx(&self, from: Address, request_id: U256, notes: &str) -> TransactionRequest {
        self.handle.transaction(
            from,
            REJECT_REQUEST,
            &[Token::Uint(request_id), Token::String(notes.to_string())],
        )
    }
}
