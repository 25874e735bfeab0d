use crate::utils::{assert_cleared, setup};
use std::{sync::Arc, time::Duration};
use wallet_session::{
    ConnectionController, ConnectionStatus, ProviderEvent, Session, SessionConfig,
    provider::methods,
};
use wallet_session_test_utils::{FakeProvider, block};

async fn wait_until(
    rx: &mut tokio::sync::watch::Receiver<Session>,
    f: impl FnMut(&Session) -> bool,
) -> Session {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(f))
        .await
        .expect("timed out waiting for session")
        .unwrap()
        .clone()
}

#[tokio::test(flavor = "multi_thread")]
async fn listeners_forward_provider_events() {
    let (controller, provider) = setup(&["0xA1"], "0x1");
    let listeners = controller.listen();
    assert!(listeners.is_active());
    assert_eq!(provider.handler_count(), 4);

    controller.connect().await.unwrap();
    let mut rx = controller.watch();

    provider.emit(ProviderEvent::ChainChanged("0xaa36a7".to_string()));
    let session = wait_until(&mut rx, |s| s.chain_id.as_deref() == Some("0xaa36a7")).await;
    assert!(session.chain_switch.is_some());

    provider.emit(ProviderEvent::AccountsChanged(vec![]));
    wait_until(&mut rx, |s| s.status == ConnectionStatus::Disconnected).await;

    drop(listeners);
}

#[tokio::test(flavor = "multi_thread")]
async fn dropping_listeners_unregisters_handlers() {
    let (controller, provider) = setup(&["0xA1"], "0x1");
    let listeners = controller.listen();
    assert_eq!(provider.handler_count(), 4);

    drop(listeners);
    assert_eq!(provider.handler_count(), 0);

    controller.connect().await.unwrap();
    provider.emit(ProviderEvent::AccountsChanged(vec![]));
    assert_eq!(controller.current_state().status, ConnectionStatus::Connected);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_processes_received_events() {
    let (controller, provider) = setup(&["0xA1"], "0x1");
    let listeners = controller.listen();
    let id = controller.connect().await.unwrap().subscription_id.unwrap();

    provider.emit_head(id.clone(), block(7));
    provider.emit_head(id, block(8));
    listeners.shutdown().await;

    assert_eq!(provider.handler_count(), 0);
    assert_eq!(controller.current_state().latest_block.unwrap().number, 8);
}

#[tokio::test(flavor = "multi_thread")]
async fn disconnect_is_not_blocked_by_held_block_fetch() {
    let (controller, provider) = setup(&["0xA1"], "0x1");
    let listeners = controller.listen();
    let id = controller.connect().await.unwrap().subscription_id.unwrap();
    let mut rx = controller.watch();

    let gate = provider.hold(methods::GET_BLOCK_BY_NUMBER);
    provider.emit(ProviderEvent::ChainChanged("0xaa36a7".to_string()));
    provider.wait_for_calls(methods::GET_BLOCK_BY_NUMBER, 2).await;
    assert_eq!(controller.current_state().latest_block, None);

    provider.emit(ProviderEvent::Disconnect { code: 4900, reason: "offline".to_string() });
    let session = wait_until(&mut rx, |s| s.status == ConnectionStatus::Disconnected).await;
    assert_cleared(&session);
    assert_eq!(controller.subscriptions().current(), None);

    gate.open();
    listeners.shutdown().await;

    assert_cleared(&controller.current_state());
    assert!(provider.live_subscriptions().is_empty());
    assert_eq!(provider.issued_subscriptions(), vec![id]);
    assert_eq!(provider.call_count(methods::UNSUBSCRIBE), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn accounts_cleared_while_balance_refresh_is_held() {
    let (controller, provider) = setup(&["0xA1"], "0x1");
    let listeners = controller.listen();
    controller.connect().await.unwrap();
    let mut rx = controller.watch();

    let gate = provider.hold(methods::GET_BALANCE);
    provider.emit(ProviderEvent::AccountsChanged(vec!["0xB2".to_string(), "0xA1".to_string()]));
    provider.wait_for_calls(methods::GET_BALANCE, 1).await;
    let session = wait_until(&mut rx, |s| s.active_account() == Some("0xB2")).await;
    assert_eq!(session.status, ConnectionStatus::Connected);

    provider.emit(ProviderEvent::AccountsChanged(vec![]));
    let session = wait_until(&mut rx, |s| s.status == ConnectionStatus::Disconnected).await;
    assert_cleared(&session);
    assert_eq!(controller.last_lookup(), None);

    gate.open();
    listeners.shutdown().await;

    assert_cleared(&controller.current_state());
    assert!(provider.live_subscriptions().is_empty());
    assert_eq!(controller.last_lookup().unwrap().address, "0xB2");
}

#[tokio::test(flavor = "multi_thread")]
async fn listen_without_provider_registers_nothing() {
    let provider = FakeProvider::unavailable();
    let controller =
        ConnectionController::with_shared(Arc::new(provider.clone()), SessionConfig::default());

    let listeners = controller.listen();
    assert!(!listeners.is_active());
    assert_eq!(provider.handler_count(), 0);
}
