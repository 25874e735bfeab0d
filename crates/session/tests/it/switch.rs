use crate::utils::setup;
use serde_json::{Value, json};
use wallet_session::{ProviderError, fmt::SupportedChain, provider::methods};

#[tokio::test(flavor = "multi_thread")]
async fn switch_to_known_chain() {
    let (controller, provider) = setup(&["0xA1"], "0x1");
    provider.respond(methods::SWITCH_CHAIN, Value::Null);

    assert!(controller.switch_chain(SupportedChain::Sepolia).await);
    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, json!([{ "chainId": "0xaa36a7" }]));
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_chain_is_added() {
    let (controller, provider) = setup(&["0xA1"], "0x1");
    provider.respond_once(methods::SWITCH_CHAIN, Err(ProviderError::unrecognized_chain()));
    provider.respond(methods::ADD_CHAIN, Value::Null);

    assert!(controller.switch_chain(SupportedChain::Mainnet).await);
    let (method, params) = provider.calls().pop().unwrap();
    assert_eq!(method, methods::ADD_CHAIN);
    assert_eq!(params[0]["chainId"], "0x1");
    assert_eq!(params[0]["nativeCurrency"]["symbol"], "ETH");
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_switch_is_not_retried() {
    let (controller, provider) = setup(&["0xA1"], "0x1");
    provider.fail(methods::SWITCH_CHAIN, ProviderError::user_rejected());

    assert!(!controller.switch_chain(SupportedChain::Sepolia).await);
    assert_eq!(provider.call_count(methods::ADD_CHAIN), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_add_reports_failure() {
    let (controller, provider) = setup(&["0xA1"], "0x1");
    provider.fail(methods::SWITCH_CHAIN, ProviderError::unrecognized_chain());
    provider.fail(methods::ADD_CHAIN, ProviderError::user_rejected());

    assert!(!controller.switch_chain(SupportedChain::Sepolia).await);
    assert_eq!(provider.call_count(methods::ADD_CHAIN), 1);
}
