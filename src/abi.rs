//! Calldata assembly and return-data decoding for the handful of contract
//! methods the client touches. Selectors are derived from the canonical
//! signature with `keccak256(sig)[0..4]`.

use crate::errors::ClientError;
use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, U256};

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = ethers::utils::id(signature);
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn encode_call(signature: &str, args: &[Token]) -> Bytes {
    let mut data = selector(signature).to_vec();
    data.extend_from_slice(&abi::encode(args));
    Bytes::from(data)
}

/// Decodes `data` against `types`, rejecting empty return data up front so
/// calls to addresses without code surface as decode failures.
pub fn decode_return(types: &[ParamType], data: &[u8]) -> Result<Vec<Token>, ClientError> {
    if data.is_empty() && !types.is_empty() {
        return Err(ClientError::Decode("empty return data".to_string()));
    }
    Ok(abi::decode(types, data)?)
}

pub fn decode_uint(data: &[u8]) -> Result<U256, ClientError> {
    single(decode_return(&[ParamType::Uint(256)], data)?)?
        .into_uint()
        .ok_or_else(|| ClientError::Decode("expected uint256".to_string()))
}

pub fn decode_address(data: &[u8]) -> Result<Address, ClientError> {
    single(decode_return(&[ParamType::Address], data)?)?
        .into_address()
        .ok_or_else(|| ClientError::Decode("expected address".to_string()))
}

pub fn decode_string(data: &[u8]) -> Result<String, ClientError> {
    single(decode_return(&[ParamType::String], data)?)?
        .into_string()
        .ok_or_else(|| ClientError::Decode("expected string".to_string()))
}

pub fn decode_u8(data: &[u8]) -> Result<u8, ClientError> {
    let value = single(decode_return(&[ParamType::Uint(8)], data)?)?
        .into_uint()
        .ok_or_else(|| ClientError::Decode("expected uint8".to_string()))?;
    if value > U256::from(u8::MAX) {
        return Err(ClientError::Decode(format!("uint8 out of range: {}", value)));
    }
    Ok(value.low_u32() as u8)
}

pub fn decode_uint_array(data: &[u8]) -> Result<Vec<U256>, ClientError> {
    let token = single(decode_return(&[ParamType::Array(Box::new(ParamType::Uint(256)))], data)?)?;
    let items = token
        .into_array()
        .ok_or_else(|| ClientError::Decode("expected uint256[]".to_string()))?;
    items.into_iter().map(token_uint).collect()
}

pub fn token_uint(token: Token) -> Result<U256, ClientError> {
    token
        .into_uint()
        .ok_or_else(|| ClientError::Decode("expected uint256".to_string()))
}

pub fn token_address(token: Token) -> Result<Address, ClientError> {
    token
        .into_address()
        .ok_or_else(|| ClientError::Decode("expected address".to_string()))
}

pub fn token_bool(token: Token) -> Result<bool, ClientError> {
    token
        .into_bool()
        .ok_or_else(|| ClientError::Decode("expected bool".to_string()))
}

pub fn token_string(token: Token) -> Result<String, ClientError> {
    token
        .into_string()
        .ok_or_else(|| ClientError::Decode("expected string".to_string()))
}

pub fn token_address_array(token: Token) -> Result<Vec<Address>, ClientError> {
    token
        .into_array()
        .ok_or_else(|| ClientError::Decode("expected address[]".to_string()))?
        .into_iter()
        .map(token_address)
        .collect()
}

pub fn token_uint_array(token: Token) -> Result<Vec<U256>, ClientError> {
    token
        .into_array()
        .ok_or_else(|| ClientError::Decode("expected uint256[]".to_string()))?
        .into_iter()
        .map(token_uint)
        .collect()
}

fn single(mut tokens: Vec<Token>) -> Result<Token, ClientError> {
    if tokens.len() != 1 {
        return Err(ClientError::Decode(format!("expected 1 value, got {}", tokens.len())));
    }
    tokens
        .pop()
        .ok_or_else(|| ClientError::Decode("missing return value".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_selectors() {
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(selector("balanceOf(address)"), [0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(selector("approve(address,uint256)"), [0x09, 0x5e, 0xa7, 0xb3]);
    }

    #[test]
    fn test_empty_return_is_decode_error() {
        let err = decode_uint(&[]).unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
        assert!(err.is_call_exception());
    }

    #[test]
    fn test_decode_u8_rejects_overflow() {
        let data = abi::encode(&[Token::Uint(U256::from(300))]);
        assert!(decode_u8(&data).is_err());
        let data = abi::encode(&[Token::Uint(U256::from(18))]);
        assert_eq!(decode_u8(&data).unwrap(), 18);
    }
}
