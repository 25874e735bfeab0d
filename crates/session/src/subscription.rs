//! Lifecycle of the single `newHeads` push subscription.

use crate::{
    provider::{ProviderGateway, ProviderMessage},
    session::SubscriptionId,
};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::{fmt, future::Future, sync::Arc};

type PendingSubscribe = Shared<BoxFuture<'static, Option<SubscriptionId>>>;

/// Guarantees at most one live block header subscription.
///
/// Every [`detach`](Self::detach) starts a new generation. A subscribe request that resolves
/// under an older generation belongs to a session that is gone, so the manager closes it again
/// instead of tracking it. At most one subscribe request is in flight at a time.
pub struct SubscriptionManager<P> {
    provider: Arc<P>,
    topic: String,
    state: Arc<Mutex<SubscriptionState>>,
}

#[derive(Default)]
struct SubscriptionState {
    current: Option<SubscriptionId>,
    pending: Option<PendingSubscribe>,
    /// A request detached while in flight, with the generation it was issued under. It closes
    /// whatever it opens, and no new request is issued before it finished.
    orphan: Option<(u64, PendingSubscribe)>,
    generation: u64,
}

// === impl SubscriptionManager ===

impl<P: ProviderGateway> SubscriptionManager<P> {
    pub fn new(provider: Arc<P>, topic: impl Into<String>) -> Self {
        Self { provider, topic: topic.into(), state: Default::default() }
    }

    /// The tracked subscription, if any.
    pub fn current(&self) -> Option<SubscriptionId> {
        self.state.lock().current.clone()
    }

    /// Returns the live subscription, subscribing first if there is none.
    ///
    /// Concurrent callers share one in-flight request, and a request superseded by
    /// [`detach`](Self::detach) is waited out before a new one is issued. Resolves to `None` if
    /// the request failed or the subscription was released before it resolved.
    pub async fn ensure_subscribed(&self) -> Option<SubscriptionId> {
        loop {
            let next = {
                let mut state = self.state.lock();
                if let Some(id) = &state.current {
                    return Some(id.clone());
                }
                if let Some((_, orphan)) = &state.orphan {
                    Err(orphan.clone())
                } else {
                    let pending = match &state.pending {
                        Some(pending) => pending.clone(),
                        None => {
                            let pending = self.subscribe_request(state.generation).boxed().shared();
                            state.pending = Some(pending.clone());
                            pending
                        }
                    };
                    Ok(pending)
                }
            };

            match next {
                Ok(pending) => return pending.await,
                Err(orphan) => {
                    trace!(target: "session::subscription", "waiting for superseded request");
                    orphan.await;
                }
            }
        }
    }

    fn subscribe_request(
        &self,
        generation: u64,
    ) -> impl Future<Output = Option<SubscriptionId>> + Send + use<P> {
        let provider = self.provider.clone();
        let state = self.state.clone();
        let topic = self.topic.clone();
        async move {
            let result = provider.subscribe(&topic).await;

            let is_current = {
                let mut state = state.lock();
                let is_current = state.generation == generation;
                if is_current {
                    state.pending = None;
                    if let Ok(id) = &result {
                        state.current = Some(id.clone());
                    }
                }
                is_current
            };

            let id = match result {
                Ok(id) => id,
                Err(err) => {
                    error!(
                        target: "session::subscription",
                        %err,
                        %topic,
                        "error subscribing to new blocks"
                    );
                    if !is_current {
                        clear_orphan(&state, generation);
                    }
                    return None;
                }
            };
            if is_current {
                debug!(target: "session::subscription", %id, "subscribed");
                return Some(id);
            }

            debug!(target: "session::subscription", %id, "closing orphaned subscription");
            provider.unsubscribe(&id).await;
            clear_orphan(&state, generation);
            None
        }
    }

    /// Stops tracking the live subscription and any in-flight request, returning the id that
    /// still needs to be closed.
    pub fn detach(&self) -> Option<SubscriptionId> {
        let mut state = self.state.lock();
        let superseded = state.generation;
        state.generation += 1;
        if let Some(pending) = state.pending.take() {
            state.orphan = Some((superseded, pending));
        }
        state.current.take()
    }

    /// Closes `id` on the provider. Never fails.
    pub async fn close(&self, id: &SubscriptionId) {
        debug!(target: "session::subscription", %id, "unsubscribing");
        self.provider.unsubscribe(id).await;
    }

    /// Detaches and closes the live subscription, if there is one.
    ///
    /// Tracking is cleared before the unsubscribe call is issued, whatever its outcome.
    pub async fn release(&self) -> Option<SubscriptionId> {
        let id = self.detach()?;
        self.close(&id).await;
        Some(id)
    }

    /// Whether `message` is a push for the live subscription.
    pub fn accepts(&self, message: &ProviderMessage) -> bool {
        message.is_subscription() &&
            self.state.lock().current.as_ref() == Some(&message.data.subscription)
    }
}

/// Forgets the orphaned request of `generation` once it has finished.
fn clear_orphan(state: &Mutex<SubscriptionState>, generation: u64) {
    let mut state = state.lock();
    if state.orphan.as_ref().is_some_and(|(orphan, _)| *orphan == generation) {
        state.orphan = None;
    }
}

impl<P> fmt::Debug for SubscriptionManager<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SubscriptionManager")
            .field("topic", &self.topic)
            .field("current", &state.current)
            .field("pending", &state.pending.is_some())
            .field("orphan", &state.orphan.is_some())
            .field("generation", &state.generation)
            .finish()
    }
}
