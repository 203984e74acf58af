//! StreamFi payment-stream contract.

use super::ContractHandle;
use crate::abi;
use crate::blockchain::ChainBackend;
use crate::errors::ClientError;
use ethers::abi::{ParamType, Token};
use ethers::types::{Address, TransactionRequest, U256};
use std::sync::Arc;

pub const CREATE_STREAM: &str = "createStream(uint256[],uint256,address[])";
pub const FUND_STREAM: &str = "fundStream(uint256)";
pub const CLAIM_REWARD: &str = "claimReward(uint256)";
pub const CALCULATE_REWARD: &str = "calculateReward(uint256,address)";
pub const GET_STREAM: &str = "getStream(uint256)";
pub const GET_RECIPIENT_HOURLY_RATE: &str = "getRecipientHourlyRate(uint256,address)";
pub const STREAM_COUNT: &str = "streamCount()";
pub const TOKEN: &str = "token()";

/// `getStream` exactly as the contract reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStream {
    pub creator: Address,
    /// Average hourly rate across recipients, in token base units.
    pub hourly_rate: U256,
    /// Duration in hours.
    pub duration: U256,
    pub start_time: U256,
    pub end_time: U256,
    pub recipients: Vec<Address>,
    pub total_funded: U256,
    pub total_distributed: U256,
    pub is_active: bool,
}

impl RawStream {
    pub fn param_types() -> Vec<ParamType> {
        vec![
            ParamType::Address,
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Array(Box::new(ParamType::Address)),
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Bool,
        ]
    }

    pub fn from_tokens(tokens: Vec<Token>) -> Result<Self, ClientError> {
        let mut it = tokens.into_iter();
        let mut next = || {
            it.next()
                .ok_or_else(|| ClientError::Decode("getStream returned too few values".to_string()))
        };
        Ok(Self {
            creator: abi::token_address(next()?)?,
            hourly_rate: abi::token_uint(next()?)?,
            duration: abi::token_uint(next()?)?,
            start_time: abi::token_uint(next()?)?,
            end_time: abi::token_uint(next()?)?,
            recipients: abi::token_address_array(next()?)?,
            total_funded: abi::token_uint(next()?)?,
            total_distributed: abi::token_uint(next()?)?,
            is_active: abi::token_bool(next()?)?,
        })
    }

    pub fn into_tokens(self) -> Vec<Token> {
        vec![
            Token::Address(self.creator),
            Token::Uint(self.hourly_rate),
            Token::Uint(self.duration),
            Token::Uint(self.start_time),
            Token::Uint(self.end_time),
            Token::Array(self.recipients.into_iter().map(Token::Address).collect()),
            Token::Uint(self.total_funded),
            Token::Uint(self.total_distributed),
            Token::Bool(self.is_active),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct StreamFiContract {
    handle: ContractHandle,
}

impl StreamFiContract {
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

    pub async fn stream_count(&self) -> Result<U256, ClientError> {
        abi::decode_uint(&self.handle.call(STREAM_COUNT, &[]).await?)
    }

    pub async fn get_stream(&self, stream_id: U256) -> Result<RawStream, ClientError> {
        let data = self.handle.call(GET_STREAM, &[Token::Uint(stream_id)]).await?;
        RawStream::from_tokens(abi::decode_return(&RawStream::param_types(), &data)?)
    }

    pub async fn calculate_reward(&self, stream_id: U256, recipient: Address) -> Result<U256, ClientError> {
        let data = self
            .handle
            .call(CALCULATE_REWARD, &[Token::Uint(stream_id), Token::Address(recipient)])
            .await?;
        abi::decode_uint(&data)
    }

    pub async fn recipient_hourly_rate(&self, stream_id: U256, recipient: Address) -> Result<U256, ClientError> {
        let data = self
            .handle
            .call(GET_RECIPIENT_HOURLY_RATE, &[Token::Uint(stream_id), Token::Address(recipient)])
            .await?;
        abi::decode_uint(&data)
    }

    pub async fn token(&self) -> Result<Address, ClientError> {
        abi::decode_address(&self.handle.call(TOKEN, &[]).await?)
    }

    pub fn create_stream_tx(
        &self,
        from: Address,
        hourly_rates: &[U256],
        duration_hours: U256,
        recipients: &[Address],
    ) -> TransactionRequest {
        let args = [
            Token::Array(hourly_rates.iter().copied().map(Token::Uint).collect()),
            Token::Uint(duration_hours),
            Token::Array(recipients.iter().copied().map(Token::Address).collect()),
        ];
        self.handle.transaction(from, CREATE_STREAM, &args)
    }

    pub fn fund_stream_tx(&self, from: Address, stream_id: U256) -> TransactionRequest {
        self.handle.transaction(from, FUND_STREAM, &[Token::Uint(stream_id)])
    }

    pub fn claim_reward_tx(&self, from: Address, stream_id: U256) -> TransactionRequest {
        self.handle.transaction(from, CLAIM_REWARD, &[Token::Uint(stream_id)])
    }
}
