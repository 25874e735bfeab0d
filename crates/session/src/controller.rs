//! Public entry point of the engine.

use crate::{
    config::SessionConfig,
    error::{ProviderErrorCode, SessionError},
    fmt::{SupportedChain, chain_id_to_u64},
    provider::{
        self, EventHandler, EventKind, ProviderEvent, ProviderGateway, ProviderMessage,
        SubscriptionMessage, Unregister, methods,
    },
    reconciler::{Effect, SessionInput, SessionReconciler},
    session::{AttemptId, BlockSummary, LookupResult, Session, SubscriptionId},
    subscription::SubscriptionManager,
};
use alloy_primitives::U256;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::{
    fmt,
    sync::{Arc, Weak},
};
use tokio::{
    sync::{mpsc, watch},
    task::{JoinHandle, JoinSet},
};

/// Callback invoked with the new session after every state change.
pub type Observer = Arc<dyn Fn(&Session) + Send + Sync>;

/// Connects to, disconnects from and observes an injected provider.
///
/// All session changes go through a single [`SessionReconciler`] guarded by a lock that is never
/// held across a provider call, so transitions are applied one at a time while provider requests
/// run concurrently. Provider failures are logged and turn into absent data; only
/// [`connect`](Self::connect) reports an error, when there is no provider at all.
pub struct ConnectionController<P> {
    inner: Arc<Inner<P>>,
}

struct Inner<P> {
    provider: Arc<P>,
    config: SessionConfig,
    reconciler: Mutex<SessionReconciler>,
    subscriptions: SubscriptionManager<P>,
    state: watch::Sender<Session>,
    observers: Arc<Mutex<Observers>>,
    lookups: Mutex<Lookups>,
}

/// Provider work planned by a transition.
enum Work {
    RequestAccounts { attempt: AttemptId },
    FetchChainId { attempt: AttemptId, epoch: u64 },
    FetchLatestBlock { attempt: AttemptId, epoch: u64 },
    Subscribe { attempt: AttemptId },
    /// Close a subscription that was already detached inside the transition.
    Unsubscribe(SubscriptionId),
    RefreshBalance { account: String },
}

#[derive(Default)]
struct Observers {
    next_id: u64,
    callbacks: Vec<(u64, Observer)>,
}

#[derive(Default)]
struct Lookups {
    /// Id of the most recently issued lookup.
    latest: u64,
    last: Option<LookupResult>,
}

// === impl ConnectionController ===

impl<P: ProviderGateway> ConnectionController<P> {
    pub fn new(provider: P, config: SessionConfig) -> Self {
        Self::with_shared(Arc::new(provider), config)
    }

    /// Creates a controller for a provider that is shared with other owners.
    pub fn with_shared(provider: Arc<P>, config: SessionConfig) -> Self {
        let subscriptions =
            SubscriptionManager::new(provider.clone(), config.new_heads_topic.clone());
        let reconciler =
            SessionReconciler::new().with_balance_refresh(config.refresh_balance_on_account_change);
        let (state, _) = watch::channel(Session::default());
        Self {
            inner: Arc::new(Inner {
                provider,
                config,
                reconciler: Mutex::new(reconciler),
                subscriptions,
                state,
                observers: Default::default(),
                lookups: Default::default(),
            }),
        }
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.inner.provider
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn subscriptions(&self) -> &SubscriptionManager<P> {
        &self.inner.subscriptions
    }

    /// Snapshot of the current session.
    pub fn current_state(&self) -> Session {
        self.inner.reconciler.lock().session().clone()
    }

    /// Receiver that always holds the latest session.
    pub fn watch(&self) -> watch::Receiver<Session> {
        self.inner.state.subscribe()
    }

    /// Result of the most recently issued lookup, once it finished.
    pub fn last_lookup(&self) -> Option<LookupResult> {
        self.inner.lookups.lock().last.clone()
    }

    /// Registers `callback` to run once per session change, until the handle is dropped.
    ///
    /// Callbacks of transitions applied concurrently may run in any order; [`watch`](Self::watch)
    /// always holds the latest session.
    pub fn on_change(
        &self,
        callback: impl Fn(&Session) + Send + Sync + 'static,
    ) -> ObserverHandle {
        let mut observers = self.inner.observers.lock();
        observers.next_id += 1;
        let id = observers.next_id;
        observers.callbacks.push((id, Arc::new(callback)));
        ObserverHandle { id, observers: Arc::downgrade(&self.inner.observers) }
    }

    /// Asks the provider for accounts and, if granted, sets up the session.
    ///
    /// Resolves once the session is connected and populated, or back to disconnected. Connecting
    /// while not disconnected does nothing.
    pub async fn connect(&self) -> Result<Session, SessionError> {
        if !self.inner.provider.is_available() {
            error!(target: "session::controller", "Ethereum provider not found");
            return Err(SessionError::ProviderUnavailable);
        }
        self.dispatch(SessionInput::Connect).await;
        Ok(self.current_state())
    }

    /// Tears the session down and releases the subscription.
    pub async fn disconnect(&self) -> Session {
        self.dispatch(SessionInput::Disconnect).await;
        info!(target: "session::controller", "wallet disconnected");
        self.current_state()
    }

    /// Applies a provider push event and waits for the work it starts.
    pub async fn handle_event(&self, event: ProviderEvent) {
        if let Some(input) = self.event_input(event) {
            self.dispatch(input).await
        }
    }

    fn event_input(&self, event: ProviderEvent) -> Option<SessionInput> {
        let input = match event {
            ProviderEvent::AccountsChanged(accounts) => {
                debug!(target: "session::controller", ?accounts, "accounts changed");
                SessionInput::AccountsChanged(accounts)
            }
            ProviderEvent::ChainChanged(chain_id) => {
                debug!(target: "session::controller", %chain_id, "chain changed");
                SessionInput::ChainChanged(chain_id)
            }
            ProviderEvent::Disconnect { code, reason } => {
                info!(target: "session::controller", code, %reason, "provider connection closed");
                SessionInput::ProviderDisconnected { code, reason }
            }
            ProviderEvent::Message(message) => return self.new_head(message),
        };
        Some(input)
    }

    /// Looks up the balance and network of `address`.
    ///
    /// Read-only: the session is untouched. Failed queries are `None` in the result.
    pub async fn lookup(&self, address: &str) -> LookupResult {
        let id = {
            let mut lookups = self.inner.lookups.lock();
            lookups.latest += 1;
            lookups.latest
        };

        let (balance, network) = if self.inner.provider.is_available() {
            futures::join!(
                self.request::<U256>(
                    methods::GET_BALANCE,
                    json!([address, "latest"]),
                    "error fetching balance"
                ),
                self.request::<Value>(methods::NET_VERSION, json!([]), "error fetching network"),
            )
        } else {
            warn!(target: "session::controller", address, "lookup without provider");
            (None, None)
        };
        let network = network.map(|network| match network {
            Value::String(network) => network,
            other => other.to_string(),
        });

        let result = LookupResult { address: address.to_string(), balance, network };
        debug!(
            target: "session::controller",
            address,
            balance = ?result.formatted_balance(self.inner.config.balance_precision),
            network = ?result.network,
            "lookup"
        );
        let mut lookups = self.inner.lookups.lock();
        if lookups.latest == id {
            lookups.last = Some(result.clone());
        }
        result
    }

    /// Asks the wallet to switch to `chain`, adding the chain first if the wallet does not know
    /// it. Returns whether the wallet accepted.
    ///
    /// The session follows through the `chainChanged` event the wallet emits.
    pub async fn switch_chain(&self, chain: SupportedChain) -> bool {
        if !self.inner.provider.is_available() {
            return false;
        }
        let provider = &self.inner.provider;
        let params = json!([{ "chainId": chain.hex_id() }]);
        let err = match provider.call(methods::SWITCH_CHAIN, params).await {
            Ok(_) => return true,
            Err(err) => err,
        };
        if err.code != ProviderErrorCode::UnrecognizedChain {
            error!(target: "session::controller", ?chain, %err, "error switching chain");
            return false;
        }

        debug!(target: "session::controller", ?chain, "chain unknown to wallet, adding it");
        match provider.call(methods::ADD_CHAIN, json!([chain.network_info()])).await {
            Ok(_) => true,
            Err(err) => {
                error!(target: "session::controller", ?chain, %err, "error adding chain");
                false
            }
        }
    }

    /// Registers the four provider event handlers and starts processing their events.
    ///
    /// Events are applied to the session in the order they arrive. The provider calls they
    /// start run in the background, so a held call never delays the events behind it. Dropping
    /// the returned [`EventListeners`] unregisters the handlers.
    pub fn listen(&self) -> EventListeners {
        if !self.inner.provider.is_available() {
            error!(target: "session::controller", "Ethereum provider not found");
            return EventListeners { registrations: Vec::new(), task: None };
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<ProviderEvent>();
        let registrations = EventKind::ALL
            .into_iter()
            .map(|kind| {
                let tx = tx.clone();
                let handler: EventHandler = Arc::new(move |event| {
                    let _ = tx.send(event);
                });
                self.inner.provider.on_event(kind, handler)
            })
            .collect();

        let this = self.clone();
        let task = tokio::spawn(async move {
            let mut running = JoinSet::new();
            while let Some(event) = rx.recv().await {
                while running.try_join_next().is_some() {}

                let Some(input) = this.event_input(event) else {
                    continue;
                };
                let work = this.apply(input);
                if work.is_empty() {
                    continue;
                }
                let this = this.clone();
                running.spawn(async move { this.run(work).await });
            }
            while running.join_next().await.is_some() {}
            trace!(target: "session::controller", "event listeners closed");
        });
        EventListeners { registrations, task: Some(task) }
    }

    /// Filters a `message` event down to a header for the live subscription.
    fn new_head(&self, message: ProviderMessage) -> Option<SessionInput> {
        if !self.inner.subscriptions.accepts(&message) {
            trace!(
                target: "session::controller",
                subscription = %message.data.subscription,
                "dropped message of foreign subscription"
            );
            return None;
        }

        let SubscriptionMessage { subscription, result } = message.data;
        if !result.is_object() {
            error!(target: "session::controller", %result, "error receiving block");
            return None;
        }
        match serde_json::from_value::<BlockSummary>(result) {
            Ok(block) => {
                debug!(target: "session::controller", number = block.number, "new block");
                Some(SessionInput::NewHead { subscription, block })
            }
            Err(err) => {
                error!(target: "session::controller", %err, "invalid block header");
                None
            }
        }
    }

    /// Applies `input` and everything that follows from it.
    async fn dispatch(&self, input: SessionInput) {
        self.run(self.apply(input)).await
    }

    /// Carries out `work` concurrently and applies the inputs it feeds back, until nothing is
    /// left to do.
    async fn run(&self, mut work: Vec<Work>) {
        while !work.is_empty() {
            let inputs = join_all(work.into_iter().map(|work| self.execute(work))).await;
            work = inputs.into_iter().flatten().flat_map(|input| self.apply(input)).collect();
        }
    }

    /// Runs one transition. Subscription bookkeeping of a teardown happens under the same lock,
    /// so no other transition can observe a released session with a tracked subscription.
    fn apply(&self, input: SessionInput) -> Vec<Work> {
        let name = input.name();
        let (work, changed) = {
            let mut reconciler = self.inner.reconciler.lock();
            let transition = match reconciler.apply(input) {
                Ok(transition) => transition,
                Err(stale) => {
                    trace!(target: "session::controller", input = name, %stale);
                    return Vec::new();
                }
            };

            let work = transition
                .effects
                .into_iter()
                .filter_map(|effect| self.plan(effect))
                .collect::<Vec<_>>();

            let changed = transition.changed.then(|| {
                let session = reconciler.session().clone();
                self.inner.state.send_replace(session.clone());
                session
            });
            (work, changed)
        };

        if let Some(session) = changed {
            debug!(
                target: "session::controller",
                input = name,
                status = %session.status,
                "session updated"
            );
            self.notify(&session);
        }
        work
    }

    /// Turns an effect into work. A release detaches the subscription right away and leaves
    /// only the unsubscribe call to run.
    fn plan(&self, effect: Effect) -> Option<Work> {
        let work = match effect {
            Effect::RequestAccounts { attempt } => Work::RequestAccounts { attempt },
            Effect::FetchChainId { attempt, epoch } => Work::FetchChainId { attempt, epoch },
            Effect::FetchLatestBlock { attempt, epoch } => {
                Work::FetchLatestBlock { attempt, epoch }
            }
            Effect::Subscribe { attempt } => Work::Subscribe { attempt },
            Effect::Release => return self.inner.subscriptions.detach().map(Work::Unsubscribe),
            Effect::RefreshBalance { account } => Work::RefreshBalance { account },
        };
        Some(work)
    }

    fn notify(&self, session: &Session) {
        let callbacks = self
            .inner
            .observers
            .lock()
            .callbacks
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect::<Vec<_>>();
        for callback in callbacks {
            callback(session);
        }
    }

    /// Carries out a piece of work, returning the input its result feeds back.
    async fn execute(&self, work: Work) -> Option<SessionInput> {
        match work {
            Work::RequestAccounts { attempt } => {
                let accounts = self
                    .request::<Vec<String>>(
                        methods::REQUEST_ACCOUNTS,
                        json!([]),
                        "error connecting wallet",
                    )
                    .await;
                if let Some(accounts) = &accounts {
                    info!(target: "session::controller", ?accounts, %attempt, "connected accounts");
                }
                Some(SessionInput::AccountsResolved { attempt, accounts })
            }
            Work::FetchChainId { attempt, epoch } => {
                let chain_id = self
                    .request::<String>(methods::CHAIN_ID, json!([]), "error fetching chain id")
                    .await;
                if let Some(chain_id) = &chain_id {
                    debug!(
                        target: "session::controller",
                        %chain_id,
                        decimal = ?chain_id_to_u64(chain_id),
                        "chain id"
                    );
                }
                Some(SessionInput::ChainIdResolved { attempt, epoch, chain_id })
            }
            Work::FetchLatestBlock { attempt, epoch } => {
                let block = self
                    .request::<Option<BlockSummary>>(
                        methods::GET_BLOCK_BY_NUMBER,
                        json!(["latest", self.inner.config.full_transactions]),
                        "error fetching latest block",
                    )
                    .await
                    .flatten();
                Some(SessionInput::BlockResolved { attempt, epoch, block })
            }
            Work::Subscribe { attempt } => {
                let subscription = self.inner.subscriptions.ensure_subscribed().await;
                Some(SessionInput::Subscribed { attempt, subscription })
            }
            Work::Unsubscribe(id) => {
                self.inner.subscriptions.close(&id).await;
                None
            }
            Work::RefreshBalance { account } => {
                self.lookup(&account).await;
                None
            }
        }
    }

    /// Issues a call; failures are logged with `context` and become `None`.
    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        context: &str,
    ) -> Option<T> {
        match provider::request(&*self.inner.provider, method, params).await {
            Ok(value) => Some(value),
            Err(err) => {
                error!(target: "session::controller", method, %err, "{context}");
                None
            }
        }
    }
}

impl<P> Clone for ConnectionController<P> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<P> fmt::Debug for ConnectionController<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionController")
            .field("config", &self.inner.config)
            .field("session", self.inner.reconciler.lock().session())
            .finish_non_exhaustive()
    }
}

/// Keeps an [`on_change`](ConnectionController::on_change) callback registered.
#[must_use = "dropping the handle unregisters the observer"]
#[derive(Debug)]
pub struct ObserverHandle {
    id: u64,
    observers: Weak<Mutex<Observers>>,
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        if let Some(observers) = self.observers.upgrade() {
            observers.lock().callbacks.retain(|(id, _)| *id != self.id);
        }
    }
}

/// The provider event handlers registered by [`ConnectionController::listen`].
///
/// Dropping it unregisters the handlers; events already received are still processed, along
/// with the provider calls they started.
#[must_use = "dropping the listeners unregisters them"]
pub struct EventListeners {
    registrations: Vec<Unregister>,
    task: Option<JoinHandle<()>>,
}

impl EventListeners {
    /// Whether the handlers are registered.
    pub fn is_active(&self) -> bool {
        !self.registrations.is_empty()
    }

    /// Unregisters the handlers and waits until all received events are processed and the provider
    /// calls they started have finished.
    pub async fn shutdown(mut self) {
        self.unregister();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn unregister(&mut self) {
        for registration in self.registrations.drain(..) {
            registration.unregister();
        }
    }
}

impl Drop for EventListeners {
    fn drop(&mut self) {
        self.unregister();
    }
}

impl fmt::Debug for EventListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListeners")
            .field("registrations", &self.registrations.len())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers").field("callbacks", &self.callbacks.len()).finish()
    }
}
