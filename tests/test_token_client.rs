mod common;

use common::mocks::{decode_args, rate_limited, ret, revert, MockChain};
use common::{account, init_tracing, install_token, other_account, test_config, tokens};
use eyre::Result;
use ethers::abi::{ParamType, Token};
use ethers::types::{TransactionRequest, U256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamfi_client::blockchain::{ChainBackend, ResilientBackend};
use streamfi_client::contracts::erc20;
use streamfi_client::errors::ClientError;
use streamfi_client::retry::RetryPolicy;
use streamfi_client::token::{LoadFailure, TokenClient};

#[tokio::test]
async fn test_connect_on_configured_chain_loads_token_data() -> Result<()> {
    init_tracing();
    let config = test_config();
    let chain = Arc::new(MockChain::new(1, account()));
    install_token(&chain, &config, tokens(42));

    let client = TokenClient::new(Some(chain.clone()), &config);
    assert_eq!(client.connect().await?, account());
    assert!(chain.switch_requests().is_empty());

    let session = client.session().await;
    assert!(session.is_connected());
    assert_eq!(session.chain_id, Some(1));
    assert_eq!(session.balance, Some(tokens(42)));
    assert_eq!(session.balance_display.as_deref(), Some("42.000000000000000000"));
    assert_eq!(session.token_info.unwrap().symbol, "MNEE");
    assert!(session.error.is_none());

    client.disconnect().await;
    assert!(!client.session().await.is_connected());
    Ok(())
}

#[tokio::test]
async fn test_connect_switches_then_adds_unknown_chain() -> Result<()> {
    let config = test_config();

    // Known to the wallet: a plain switch.
    let chain = Arc::new(MockChain::new(5, account()));
    chain.add_known_chain(1);
    TokenClient::new(Some(chain.clone()), &config).connect().await?;
    assert_eq!(chain.switch_requests(), vec![1]);

    // Unknown: 4902 on switch, then wallet_addEthereumChain.
    let chain = Arc::new(MockChain::new(5, account()));
    let client = TokenClient::new(Some(chain.clone()), &config);
    client.connect().await?;
    assert_eq!(client.session().await.chain_id, Some(1));
    Ok(())
}

#[tokio::test]
async fn test_rejected_switch_leaves_session_disconnected() -> Result<()> {
    let config = test_config();
    let chain = Arc::new(MockChain::new(5, account()));
    chain.fail_switch(ClientError::UserRejected("User rejected the request.".into()));

    let client = TokenClient::new(Some(chain.clone()), &config);
    let err = client.connect().await.unwrap_err();
    assert!(matches!(&err, ClientError::ChainSwitchRejected { network } if network == "Ethereum Mainnet"));

    let session = client.session().await;
    assert!(!session.is_connected());
    assert_eq!(session.error, Some(err.user_message()));

    let chain = Arc::new(MockChain::new(5, account()));
    chain.fail_add_chain(ClientError::UserRejected("User rejected the request.".into()));
    let err = TokenClient::new(Some(chain), &config).connect().await.unwrap_err();
    assert!(matches!(err, ClientError::ChainSwitchRejected { .. }));
    Ok(())
}

#[tokio::test]
async fn test_connect_without_wallet_or_accounts() -> Result<()> {
    let config = test_config();
    let err = TokenClient::new(None, &config).connect().await.unwrap_err();
    assert!(matches!(err, ClientError::NoWalletProvider));

    let chain = Arc::new(MockChain::new(1, account()));
    chain.set_accounts(Vec::new());
    let err = TokenClient::new(Some(chain), &config).connect().await.unwrap_err();
    assert!(matches!(err, ClientError::NoAccounts));
    Ok(())
}

#[tokio::test]
async fn test_balance_failures_are_classified() -> Result<()> {
    let config = test_config();
    let address = config.token.contract_address;
    let chain = Arc::new(MockChain::new(1, account()));
    let client = TokenClient::new(Some(chain.clone()), &config);
    client.connect().await?;

    // Nothing deployed at the token address.
    assert_eq!(client.load_balance().await, Err(LoadFailure::ContractMissing(address)));
    let error = client.session().await.error.unwrap();
    assert!(error.starts_with("Token contract not found at"));

    chain.deploy(address);
    assert_eq!(client.load_balance().await, Err(LoadFailure::RpcUnavailable));

    chain.on_call(address, erc20::BALANCE_OF, |_| Err(rate_limited()));
    assert_eq!(client.load_balance().await, Err(LoadFailure::RateLimited));

    chain.on_call(address, erc20::BALANCE_OF, |_| ret(&[Token::Uint(U256::from(7u8))]));
    assert_eq!(client.load_balance().await, Ok(U256::from(7u8)));
    assert!(client.session().await.error.is_none());
    Ok(())
}

#[tokio::test]
async fn test_transfer_sends_base_units() -> Result<()> {
    let config = test_config();
    let chain = Arc::new(MockChain::new(1, account()));
    install_token(&chain, &config, tokens(100));
    let client = TokenClient::new(Some(chain.clone()), &config);

    let err = client.transfer(other_account(), "1").await.unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));

    client.connect().await?;
    let err = client.transfer(other_account(), "0").await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));

    client.transfer(other_account(), "12.5").await?;
    let sent = chain.sent_to(erc20::TRANSFER);
    assert_eq!(sent.len(), 1);
    let args = decode_args(&[ParamType::Address, ParamType::Uint(256)], sent[0].data.as_ref().unwrap());
    assert_eq!(args[0].clone().into_address(), Some(other_account()));
    assert_eq!(args[1].clone().into_uint(), Some(U256::from(125u64) * U256::exp10(17)));
    assert!(client.session().await.error.is_none());
    Ok(())
}

#[tokio::test]
async fn test_transfer_failure_is_recorded_in_session() -> Result<()> {
    let config = test_config();
    let chain = Arc::new(MockChain::new(1, account()));
    install_token(&chain, &config, tokens(100));
    let client = TokenClient::new(Some(chain.clone()), &config);
    client.connect().await?;

    chain.fail_send(erc20::TRANSFER, ClientError::UserRejected("denied".into()));
    let err = client.transfer(other_account(), "1").await.unwrap_err();
    assert!(err.is_user_rejection());
    assert_eq!(client.session().await.error.as_deref(), Some("Transaction cancelled by user"));
    Ok(())
}

fn balance_query(config: &streamfi_client::config::Config) -> TransactionRequest {
    let data = streamfi_client::abi::encode_call(erc20::BALANCE_OF, &[Token::Address(account())]);
    TransactionRequest::new().to(config.token.contract_address).data(data)
}

#[tokio::test(start_paused = true)]
async fn test_resilient_backend_retries_rate_limited_reads() -> Result<()> {
    let config = test_config();
    let chain = Arc::new(MockChain::new(1, account()));
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    chain.on_call(config.token.contract_address, erc20::BALANCE_OF, move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(rate_limited())
        } else {
            ret(&[Token::Uint(U256::from(9u8))])
        }
    });

    let backend = ResilientBackend::new(chain.clone(), RetryPolicy::default());
    let start = tokio::time::Instant::now();
    let bytes = backend.call(&balance_query(&config)).await?;
    assert_eq!(U256::from_big_endian(&bytes), U256::from(9u8));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    // 2 s then 4 s of backoff.
    assert_eq!(start.elapsed(), Duration::from_secs(6));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_resilient_backend_passes_reverts_through() -> Result<()> {
    let config = test_config();
    let chain = Arc::new(MockChain::new(1, account()));
    chain.on_call(config.token.contract_address, erc20::BALANCE_OF, |_| Err(revert("nope")));

    let backend = ResilientBackend::new(chain.clone(), RetryPolicy::new(5, Duration::from_secs(1)));
    let err = backend.call(&balance_query(&config)).await.unwrap_err();
    assert_eq!(err.revert_reason(), Some("nope"));
    assert_eq!(chain.call_count(erc20::BALANCE_OF), 1);

    // Writes are never retried.
    chain.fail_send(erc20::TRANSFER, rate_limited());
    let transfer = TransactionRequest::new()
        .to(config.token.contract_address)
        .data(streamfi_client::abi::encode_call(erc20::TRANSFER, &[
            Token::Address(other_account()),
            Token::Uint(U256::one()),
        ]));
    let start = tokio::time::Instant::now();
    assert!(backend.send_transaction(transfer).await.is_err());
    assert_eq!(start.elapsed(), Duration::ZERO);
    Ok(())
}
