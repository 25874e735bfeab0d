//! Scriptable in-memory EIP-1193 provider.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::sync::watch;
use wallet_session::{
    EventHandler, EventKind, ProviderError, ProviderErrorCode, ProviderEvent, ProviderGateway,
    ProviderMessage, SubscriptionId, Unregister, provider::methods,
};

type Response = Result<Value, ProviderError>;

/// A provider that answers from scripted responses and records everything it is asked.
///
/// Cloning shares the state, so a test can keep a clone while the controller owns another.
/// `eth_subscribe` and `eth_unsubscribe` are served natively: every subscribe opens a new live
/// subscription with a fresh id, every unsubscribe closes one.
#[derive(Clone, Debug, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    unavailable: bool,
    once: HashMap<String, VecDeque<Response>>,
    responses: HashMap<String, Response>,
    calls: Vec<(String, Value)>,
    gates: HashMap<String, Arc<watch::Sender<bool>>>,
    handlers: Vec<Registration>,
    next_handler: u64,
    next_subscription: u64,
    issued: Vec<SubscriptionId>,
    live: HashSet<SubscriptionId>,
    max_live: usize,
}

struct Registration {
    id: u64,
    kind: EventKind,
    handler: EventHandler,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).field("kind", &self.kind).finish()
    }
}

/// Holds calls of one method in flight until opened.
#[derive(Clone, Debug)]
pub struct Gate(Arc<watch::Sender<bool>>);

impl Gate {
    /// Lets all held and future calls through.
    pub fn open(&self) {
        self.0.send_replace(true);
    }
}

/// A `newHeads` style header for block `number`.
pub fn block(number: u64) -> Value {
    json!({
        "number": format!("0x{number:x}"),
        "hash": format!("0x{number:064x}"),
        "parentHash": format!("0x{:064x}", number.saturating_sub(1)),
        "timestamp": format!("0x{:x}", 1_700_000_000 + number * 12),
    })
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A wallet that grants `accounts` on `chain_id`, at block 1, with a zero balance.
    pub fn with_wallet(accounts: &[&str], chain_id: &str) -> Self {
        let provider = Self::new();
        provider.respond(methods::REQUEST_ACCOUNTS, json!(accounts));
        provider.respond(methods::CHAIN_ID, json!(chain_id));
        provider.respond(methods::GET_BLOCK_BY_NUMBER, block(1));
        provider.respond(methods::GET_BALANCE, json!("0x0"));
        provider.respond(methods::NET_VERSION, json!("1"));
        provider
    }

    /// A provider that reports no injected wallet.
    pub fn unavailable() -> Self {
        let provider = Self::new();
        provider.state.lock().unavailable = true;
        provider
    }

    /// Answers every `method` call with `result`.
    pub fn respond(&self, method: &str, result: Value) {
        self.state.lock().responses.insert(method.to_string(), Ok(result));
    }

    /// Fails every `method` call with `err`.
    pub fn fail(&self, method: &str, err: ProviderError) {
        self.state.lock().responses.insert(method.to_string(), Err(err));
    }

    /// Answers the next `method` call with `response`, before falling back to [`respond`].
    ///
    /// [`respond`]: Self::respond
    pub fn respond_once(&self, method: &str, response: Result<Value, ProviderError>) {
        self.state.lock().once.entry(method.to_string()).or_default().push_back(response);
    }

    /// Holds `method` calls until the returned gate is opened.
    pub fn hold(&self, method: &str) -> Gate {
        let (tx, _) = watch::channel(false);
        let tx = Arc::new(tx);
        self.state.lock().gates.insert(method.to_string(), tx.clone());
        Gate(tx)
    }

    /// Delivers `event` to every handler registered for its kind.
    pub fn emit(&self, event: ProviderEvent) {
        let kind = event.kind();
        let handlers = self
            .state
            .lock()
            .handlers
            .iter()
            .filter(|registration| registration.kind == kind)
            .map(|registration| registration.handler.clone())
            .collect::<Vec<_>>();
        for handler in handlers {
            handler(event.clone());
        }
    }

    /// Emits an `eth_subscription` message for `subscription`.
    pub fn emit_head(&self, subscription: SubscriptionId, header: Value) {
        self.emit(ProviderEvent::Message(ProviderMessage::subscription(subscription, header)));
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state.lock().calls.iter().filter(|(m, _)| m == method).count()
    }

    /// Waits until `method` was called at least `count` times.
    ///
    /// # Panics
    ///
    /// If that does not happen within five seconds.
    pub async fn wait_for_calls(&self, method: &str, count: usize) {
        let wait = async {
            while self.call_count(method) < count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };
        if tokio::time::timeout(Duration::from_secs(5), wait).await.is_err() {
            let calls = self.call_count(method);
            panic!("timed out waiting for {count} `{method}` calls, got {calls}");
        }
    }

    /// Subscriptions opened and not yet closed.
    pub fn live_subscriptions(&self) -> Vec<SubscriptionId> {
        let state = self.state.lock();
        state.issued.iter().filter(|id| state.live.contains(*id)).cloned().collect()
    }

    /// Highest number of simultaneously live subscriptions seen.
    pub fn max_live_subscriptions(&self) -> usize {
        self.state.lock().max_live
    }

    /// Every subscription id handed out, in order.
    pub fn issued_subscriptions(&self) -> Vec<SubscriptionId> {
        self.state.lock().issued.clone()
    }

    /// Number of registered event handlers.
    pub fn handler_count(&self) -> usize {
        self.state.lock().handlers.len()
    }

    fn gate(&self, method: &str) -> Option<watch::Receiver<bool>> {
        self.state.lock().gates.get(method).map(|gate| gate.subscribe())
    }

    fn scripted(&self, method: &str) -> Option<Response> {
        let mut state = self.state.lock();
        if let Some(response) = state.once.get_mut(method).and_then(VecDeque::pop_front) {
            return Some(response);
        }
        state.responses.get(method).cloned()
    }

    fn open_subscription(&self) -> Response {
        let mut state = self.state.lock();
        state.next_subscription += 1;
        let id = SubscriptionId::String(format!("0x{:032x}", state.next_subscription));
        state.issued.push(id.clone());
        state.live.insert(id.clone());
        state.max_live = state.max_live.max(state.live.len());
        Ok(json!(id))
    }

    fn close_subscription(&self, params: &Value) -> Response {
        let id = serde_json::from_value::<SubscriptionId>(params[0].clone())
            .map_err(ProviderError::invalid_response)?;
        Ok(json!(self.state.lock().live.remove(&id)))
    }
}

#[async_trait]
impl ProviderGateway for FakeProvider {
    fn is_available(&self) -> bool {
        !self.state.lock().unavailable
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        trace!(method, %params, "fake provider call");
        self.state.lock().calls.push((method.to_string(), params.clone()));

        if let Some(mut gate) = self.gate(method) {
            while !*gate.borrow_and_update() {
                if gate.changed().await.is_err() {
                    break;
                }
            }
        }

        if let Some(response) = self.scripted(method) {
            return response;
        }
        match method {
            methods::SUBSCRIBE => self.open_subscription(),
            methods::UNSUBSCRIBE => self.close_subscription(&params),
            _ => Err(ProviderError::with_message(
                ProviderErrorCode::UnsupportedMethod,
                format!("unsupported method: {method}"),
            )),
        }
    }

    fn on_event(&self, kind: EventKind, handler: EventHandler) -> Unregister {
        let id = {
            let mut state = self.state.lock();
            state.next_handler += 1;
            let id = state.next_handler;
            state.handlers.push(Registration { id, kind, handler });
            id
        };
        let state = self.state.clone();
        Unregister::new(move || state.lock().handlers.retain(|registration| registration.id != id))
    }
}
