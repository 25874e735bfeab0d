//! The session state machine.
//!
//! [`SessionReconciler`] is synchronous and performs no I/O. Every user action, provider push
//! and provider response is fed in as a [`SessionInput`]; the reconciler applies it to the
//! canonical [`Session`] and answers with the [`Effect`]s the caller has to carry out. Results
//! of those effects come back as further inputs tagged with the [`AttemptId`] (and chain epoch)
//! they were issued under, which is how late responses are recognized as stale.

use crate::{
    error::{StaleEvent, StaleReason},
    session::{
        AttemptId, BlockSummary, ChainSwitch, ConnectionStatus, Session, SubscriptionId,
    },
};

/// Everything that can move the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionInput {
    /// The user asked to connect.
    Connect,
    /// `eth_requestAccounts` finished; `None` if it failed.
    AccountsResolved { attempt: AttemptId, accounts: Option<Vec<String>> },
    /// `eth_chainId` finished.
    ChainIdResolved { attempt: AttemptId, epoch: u64, chain_id: Option<String> },
    /// `eth_getBlockByNumber("latest")` finished.
    BlockResolved { attempt: AttemptId, epoch: u64, block: Option<BlockSummary> },
    /// The `newHeads` subscribe request finished.
    Subscribed { attempt: AttemptId, subscription: Option<SubscriptionId> },
    /// `accountsChanged` push.
    AccountsChanged(Vec<String>),
    /// `chainChanged` push.
    ChainChanged(String),
    /// `disconnect` push.
    ProviderDisconnected { code: i64, reason: String },
    /// A new header pushed for `subscription`.
    NewHead { subscription: SubscriptionId, block: BlockSummary },
    /// The user asked to disconnect.
    Disconnect,
}

impl SessionInput {
    /// Short name for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::AccountsResolved { .. } => "accounts_resolved",
            Self::ChainIdResolved { .. } => "chain_id_resolved",
            Self::BlockResolved { .. } => "block_resolved",
            Self::Subscribed { .. } => "subscribed",
            Self::AccountsChanged(_) => "accounts_changed",
            Self::ChainChanged(_) => "chain_changed",
            Self::ProviderDisconnected { .. } => "provider_disconnected",
            Self::NewHead { .. } => "new_head",
            Self::Disconnect => "disconnect",
        }
    }
}

/// Work the caller must do after a transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Issue `eth_requestAccounts`.
    RequestAccounts { attempt: AttemptId },
    /// Issue `eth_chainId`.
    FetchChainId { attempt: AttemptId, epoch: u64 },
    /// Issue `eth_getBlockByNumber("latest", ..)`.
    FetchLatestBlock { attempt: AttemptId, epoch: u64 },
    /// Make sure the `newHeads` subscription exists.
    Subscribe { attempt: AttemptId },
    /// Drop the subscription and any in-flight subscribe request.
    Release,
    /// Re-query the balance of the new active account.
    RefreshBalance { account: String },
}

/// Outcome of an applied input.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transition {
    pub effects: Vec<Effect>,
    /// Whether the session changed.
    pub changed: bool,
}

impl Transition {
    /// Nothing changed, nothing to do.
    pub const fn none() -> Self {
        Self { effects: Vec::new(), changed: false }
    }

    fn changed(effects: Vec<Effect>) -> Self {
        Self { effects, changed: true }
    }
}

/// Owns the canonical [`Session`].
#[derive(Clone, Debug)]
pub struct SessionReconciler {
    session: Session,
    /// The most recent connection attempt.
    attempt: AttemptId,
    /// Bumped on every accepted `chainChanged`.
    chain_epoch: u64,
    refresh_balance: bool,
}

// === impl SessionReconciler ===

impl Default for SessionReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionReconciler {
    /// A reconciler holding a disconnected session.
    pub fn new() -> Self {
        Self {
            session: Session::default(),
            attempt: AttemptId::default(),
            chain_epoch: 0,
            refresh_balance: true,
        }
    }

    /// Whether a non-empty `accountsChanged` should re-query the active account's balance.
    pub fn with_balance_refresh(mut self, refresh: bool) -> Self {
        self.refresh_balance = refresh;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn status(&self) -> ConnectionStatus {
        self.session.status
    }

    /// The current connection attempt.
    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    pub fn chain_epoch(&self) -> u64 {
        self.chain_epoch
    }

    /// Applies `input` to the session.
    pub fn apply(&mut self, input: SessionInput) -> Result<Transition, StaleEvent> {
        match input {
            SessionInput::Connect => Ok(self.on_connect()),
            SessionInput::AccountsResolved { attempt, accounts } => {
                self.on_accounts_resolved(attempt, accounts)
            }
            SessionInput::ChainIdResolved { attempt, epoch, chain_id } => {
                self.ensure_live(attempt, epoch)?;
                let Some(chain_id) = chain_id else { return Ok(Transition::none()) };
                Ok(self.set_chain_id(chain_id))
            }
            SessionInput::BlockResolved { attempt, epoch, block } => {
                self.ensure_live(attempt, epoch)?;
                let Some(block) = block else { return Ok(Transition::none()) };
                Ok(self.set_latest_block(block))
            }
            SessionInput::Subscribed { attempt, subscription } => {
                self.ensure_current(attempt)?;
                self.ensure_connected()?;
                let Some(id) = subscription else { return Ok(Transition::none()) };
                if self.session.subscription_id.as_ref() == Some(&id) {
                    return Ok(Transition::none());
                }
                self.session.subscription_id = Some(id);
                Ok(Transition::changed(vec![]))
            }
            SessionInput::AccountsChanged(accounts) => self.on_accounts_changed(accounts),
            SessionInput::ChainChanged(chain_id) => self.on_chain_changed(chain_id),
            SessionInput::ProviderDisconnected { .. } | SessionInput::Disconnect => {
                Ok(self.teardown())
            }
            SessionInput::NewHead { subscription, block } => {
                self.ensure_connected()?;
                if self.session.subscription_id.as_ref() != Some(&subscription) {
                    return Err(StaleReason::ForeignSubscription.into());
                }
                Ok(self.set_latest_block(block))
            }
        }
    }

    fn on_connect(&mut self) -> Transition {
        if !self.session.is_disconnected() {
            return Transition::none();
        }
        self.attempt = self.attempt.next();
        self.session.status = ConnectionStatus::Connecting;
        Transition::changed(vec![Effect::RequestAccounts { attempt: self.attempt }])
    }

    fn on_accounts_resolved(
        &mut self,
        attempt: AttemptId,
        accounts: Option<Vec<String>>,
    ) -> Result<Transition, StaleEvent> {
        self.ensure_current(attempt)?;
        if self.session.status != ConnectionStatus::Connecting {
            return Err(StaleReason::StaleAttempt.into());
        }

        match accounts {
            Some(accounts) if !accounts.is_empty() => {
                self.session.status = ConnectionStatus::Connected;
                self.session.accounts = accounts;
                let epoch = self.chain_epoch;
                Ok(Transition::changed(vec![
                    Effect::FetchChainId { attempt, epoch },
                    Effect::FetchLatestBlock { attempt, epoch },
                    Effect::Subscribe { attempt },
                ]))
            }
            _ => {
                self.session = Session::default();
                Ok(Transition::changed(vec![]))
            }
        }
    }

    fn on_accounts_changed(&mut self, accounts: Vec<String>) -> Result<Transition, StaleEvent> {
        if accounts.is_empty() {
            return Ok(self.teardown());
        }
        self.ensure_connected()?;
        if self.session.accounts == accounts {
            return Ok(Transition::none());
        }

        let mut effects = Vec::new();
        if self.refresh_balance && self.session.active_account() != Some(accounts[0].as_str()) {
            effects.push(Effect::RefreshBalance { account: accounts[0].clone() });
        }
        self.session.accounts = accounts;
        Ok(Transition::changed(effects))
    }

    fn on_chain_changed(&mut self, chain_id: String) -> Result<Transition, StaleEvent> {
        match self.session.status {
            ConnectionStatus::Disconnected => Err(StaleReason::NotConnected.into()),
            _ if self.session.chain_id.as_ref() == Some(&chain_id) => Ok(Transition::none()),
            ConnectionStatus::Connecting => {
                self.chain_epoch += 1;
                self.session.chain_id = Some(chain_id);
                Ok(Transition::changed(vec![]))
            }
            ConnectionStatus::Connected => {
                self.chain_epoch += 1;
                if let Some(from) = self.session.chain_id.take() {
                    debug!(target: "session::reconciler", %from, to = %chain_id, "chain switched");
                    self.session.chain_switch = Some(ChainSwitch { from, to: chain_id.clone() });
                    self.session.latest_block = None;
                }
                self.session.chain_id = Some(chain_id);
                Ok(Transition::changed(vec![Effect::FetchLatestBlock {
                    attempt: self.attempt,
                    epoch: self.chain_epoch,
                }]))
            }
        }
    }

    /// Resets to a disconnected session. Every path out of a live session ends here.
    fn teardown(&mut self) -> Transition {
        if self.session.is_disconnected() {
            return Transition { effects: vec![Effect::Release], changed: false };
        }
        self.session = Session::default();
        Transition::changed(vec![Effect::Release])
    }

    fn set_chain_id(&mut self, chain_id: String) -> Transition {
        if self.session.chain_id.as_ref() == Some(&chain_id) {
            return Transition::none();
        }
        self.session.chain_id = Some(chain_id);
        Transition::changed(vec![])
    }

    fn set_latest_block(&mut self, block: BlockSummary) -> Transition {
        if self.session.latest_block.as_ref() == Some(&block) {
            return Transition::none();
        }
        self.session.latest_block = Some(block);
        Transition::changed(vec![])
    }

    fn ensure_current(&self, attempt: AttemptId) -> Result<(), StaleEvent> {
        if attempt != self.attempt {
            return Err(StaleReason::StaleAttempt.into());
        }
        Ok(())
    }

    fn ensure_connected(&self) -> Result<(), StaleEvent> {
        if !self.session.is_connected() {
            return Err(StaleReason::NotConnected.into());
        }
        Ok(())
    }

    /// The response belongs to the live session and no chain switch happened since it was
    /// requested.
    fn ensure_live(&self, attempt: AttemptId, epoch: u64) -> Result<(), StaleEvent> {
        self.ensure_current(attempt)?;
        self.ensure_connected()?;
        if epoch != self.chain_epoch {
            return Err(StaleReason::SupersededChain.into());
        }
        Ok(())
    }
}
