use wallet_session::{ConnectionController, Session, SessionConfig};
use wallet_session_test_utils::{FakeProvider, init_tracing};

pub type Controller = ConnectionController<FakeProvider>;

/// A controller for a wallet granting `accounts` on `chain_id`.
pub fn setup(accounts: &[&str], chain_id: &str) -> (Controller, FakeProvider) {
    init_tracing();
    let provider = FakeProvider::with_wallet(accounts, chain_id);
    (ConnectionController::new(provider.clone(), SessionConfig::default()), provider)
}

/// Asserts the fields of a disconnected session are all cleared.
#[track_caller]
pub fn assert_cleared(session: &Session) {
    similar_asserts::assert_eq!(session, &Session::default());
}
