use crate::utils::{assert_cleared, setup};
use serde_json::json;
use wallet_session::{
    ChainSwitch, ConnectionStatus, ProviderEvent, ProviderMessage, SubscriptionId,
    provider::methods,
};
use wallet_session_test_utils::block;

fn head(subscription: SubscriptionId, number: u64) -> ProviderEvent {
    ProviderEvent::Message(ProviderMessage::subscription(subscription, block(number)))
}

#[tokio::test(flavor = "multi_thread")]
async fn new_head_updates_latest_block() {
    let (controller, _provider) = setup(&["0xA1"], "0x1");
    let session = controller.connect().await.unwrap();
    let id = session.subscription_id.unwrap();

    controller.handle_event(head(id.clone(), 5)).await;
    let block = controller.current_state().latest_block.unwrap();
    assert_eq!(block.number, 5);
    assert!(block.hash.is_some());

    controller.handle_event(head(id, 6)).await;
    assert_eq!(controller.current_state().latest_block.unwrap().number, 6);
}

#[tokio::test(flavor = "multi_thread")]
async fn foreign_subscription_is_ignored() {
    let (controller, _provider) = setup(&["0xA1"], "0x1");
    let before = controller.connect().await.unwrap();

    controller.handle_event(head(SubscriptionId::from("0xdead"), 9)).await;
    assert_eq!(controller.current_state(), before);
}

#[tokio::test(flavor = "multi_thread")]
async fn released_subscription_is_ignored_after_reconnect() {
    let (controller, provider) = setup(&["0xA1"], "0x1");
    controller.connect().await.unwrap();
    controller.disconnect().await;
    let session = controller.connect().await.unwrap();

    let issued = provider.issued_subscriptions();
    assert_eq!(issued.len(), 2);
    assert_eq!(session.subscription_id.as_ref(), Some(&issued[1]));

    controller.handle_event(head(issued[0].clone(), 9)).await;
    assert_eq!(controller.current_state().latest_block.unwrap().number, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_messages_are_ignored() {
    let (controller, _provider) = setup(&["0xA1"], "0x1");
    let before = controller.connect().await.unwrap();
    let id = before.subscription_id.clone().unwrap();

    let not_an_object = ProviderMessage::subscription(id.clone(), json!("0x5"));
    controller.handle_event(ProviderEvent::Message(not_an_object)).await;

    let mut other_type = ProviderMessage::subscription(id.clone(), block(5));
    other_type.kind = "eth_other".to_string();
    controller.handle_event(ProviderEvent::Message(other_type)).await;

    let missing_number = ProviderMessage::subscription(id, json!({ "timestamp": "0x1" }));
    controller.handle_event(ProviderEvent::Message(missing_number)).await;

    assert_eq!(controller.current_state(), before);
}

#[tokio::test(flavor = "multi_thread")]
async fn chain_change_records_switch_and_refetches_block() {
    let (controller, provider) = setup(&["0xA1"], "0x1");
    let before = controller.connect().await.unwrap();
    provider.respond(methods::GET_BLOCK_BY_NUMBER, block(100));

    controller.handle_event(ProviderEvent::ChainChanged("0xaa36a7".to_string())).await;

    let session = controller.current_state();
    assert_eq!(session.chain_id.as_deref(), Some("0xaa36a7"));
    assert_eq!(
        session.chain_switch,
        Some(ChainSwitch { from: "0x1".to_string(), to: "0xaa36a7".to_string() })
    );
    assert_eq!(session.latest_block.unwrap().number, 100);
    assert_eq!(session.subscription_id, before.subscription_id);
    assert_eq!(provider.call_count(methods::SUBSCRIBE), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn same_chain_is_not_a_switch() {
    let (controller, provider) = setup(&["0xA1"], "0x1");
    let before = controller.connect().await.unwrap();

    controller.handle_event(ProviderEvent::ChainChanged("0x1".to_string())).await;
    assert_eq!(controller.current_state(), before);
    assert_eq!(provider.call_count(methods::GET_BLOCK_BY_NUMBER), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn account_change_refreshes_balance() {
    let (controller, provider) = setup(&["0xA1"], "0x1");
    provider.respond(methods::GET_BALANCE, json!("0xde0b6b3a7640000"));
    controller.connect().await.unwrap();

    let accounts = vec!["0xB2".to_string(), "0xA1".to_string()];
    controller.handle_event(ProviderEvent::AccountsChanged(accounts.clone())).await;

    let session = controller.current_state();
    assert_eq!(session.status, ConnectionStatus::Connected);
    assert_eq!(session.accounts, accounts);

    let lookup = controller.last_lookup().unwrap();
    assert_eq!(lookup.address, "0xB2");
    assert_eq!(lookup.formatted_balance(4).as_deref(), Some("1.0000"));
    let balance_call = provider
        .calls()
        .into_iter()
        .find(|(method, _)| method == methods::GET_BALANCE)
        .unwrap();
    assert_eq!(balance_call.1, json!(["0xB2", "latest"]));
}

#[tokio::test(flavor = "multi_thread")]
async fn provider_disconnect_tears_down() {
    let (controller, provider) = setup(&["0xA1"], "0x1");
    controller.connect().await.unwrap();

    controller
        .handle_event(ProviderEvent::Disconnect { code: 4900, reason: "offline".to_string() })
        .await;
    assert_cleared(&controller.current_state());
    assert_eq!(provider.call_count(methods::UNSUBSCRIBE), 1);
    assert!(provider.live_subscriptions().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn events_while_disconnected_change_nothing() {
    let (controller, provider) = setup(&["0xA1"], "0x1");

    controller.handle_event(ProviderEvent::ChainChanged("0x5".to_string())).await;
    controller.handle_event(ProviderEvent::AccountsChanged(vec!["0xA1".to_string()])).await;
    controller.handle_event(ProviderEvent::AccountsChanged(vec![])).await;
    controller.handle_event(head(SubscriptionId::from(1), 3)).await;

    assert_cleared(&controller.current_state());
    assert!(provider.calls().is_empty());
}
