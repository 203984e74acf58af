use super::ContractHandle;
use crate::abi;
use crate::blockchain::ChainBackend;
use crate::errors::ClientError;
use ethers::abi::Token;
use ethers::types::{Address, TransactionRequest, U256};
use std::sync::Arc;

pub const NAME: &str = "name()";
pub const SYMBOL: &str = "symbol()";
pub const DECIMALS: &str = "decimals()";
pub const BALANCE_OF: &str = "balanceOf(address)";
pub const ALLOWANCE: &str = "allowance(address,address)";
pub const APPROVE: &str = "approve(address,uint256)";
pub const TRANSFER: &str = "transfer(address,uint256)";

#[derive(Debug, Clone)]
pub struct Erc20Contract {
    handle: ContractHandle,
}

impl Erc20Contract {
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

    pub async fn name(&self) -> Result<String, ClientError> {
        abi::decode_string(&self.handle.call(NAME, &[]).await?)
    }

    pub async fn symbol(&self) -> Result<String, ClientError> {
        abi::decode_string(&self.handle.call(SYMBOL, &[]).await?)
    }

    pub async fn decimals(&self) -> Result<u8, ClientError> {
        abi::decode_u8(&self.handle.call(DECIMALS, &[]).await?)
    }

    pub async fn balance_of(&self, owner: Address) -> Result<U256, ClientError> {
        abi::decode_uint(&self.handle.call(BALANCE_OF, &[Token::Address(owner)]).await?)
    }

    pub async fn allowance(&self, owner: Address, spender: Address) -> Result<U256, ClientError> {
        let data = self
            .handle
            .call(ALLOWANCE, &[Token::Address(owner), Token::Address(spender)])
            .await?;
        abi::decode_uint(&data)
    }

    pub fn approve_tx(&self, from: Address, spender: Address, amount: U256) -> TransactionRequest {
        self.handle
            .transaction(from, APPROVE, &[Token::Address(spender), Token::Uint(amount)])
    }

    pub fn transfer_tx(&self, from: Address, to: Address, amount: U256) -> TransactionRequest {
        self.handle
            .transaction(from, TRANSFER, &[Token::Address(to), Token::Uint(amount)])
    }
}
