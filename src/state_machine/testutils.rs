use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{
    crypto::{encrypt, EcdhKeyPair, SecretEcdhKey, SessionKey, SharedSecret},
    ledger::{Address, LedgerEvent, Receipt, TxHash},
    settings::{ClientSettings, TransactionSettings},
    state_machine::SharedState,
    watcher::EventWatcher,
};

#[macro_export]
macro_rules! unwrap_as {
    ($e:expr, $p:path) => {
        match $e {
            $p(s) => s,
            x => panic!("Not a {}: {:?}", stringify!($p), x),
        }
    };
}

#[macro_export]
macro_rules! unwrap_step {
    ($phase:expr, complete, $state_machine:tt) => {
        unwrap_step!(
            $phase,
            $crate::state_machine::TransitionOutcome::Complete,
            $state_machine
        )
    };
    ($phase:expr, pending, $state_machine:tt) => {
        unwrap_step!(
            $phase,
            $crate::state_machine::TransitionOutcome::Pending,
            $state_machine
        )
    };
    ($phase:expr, $transition_outcome:path, init) => {
        unwrap_step!(
            $phase,
            $transition_outcome,
            $crate::state_machine::StateMachine::Init
        )
    };
    ($phase:expr, $transition_outcome:path, awaiting) => {
        unwrap_step!(
            $phase,
            $transition_outcome,
            $crate::state_machine::StateMachine::Awaiting
        )
    };
    ($phase:expr, $transition_outcome:path, join) => {
        unwrap_step!(
            $phase,
            $transition_outcome,
            $crate::state_machine::StateMachine::Join
        )
    };
    ($phase:expr, $transition_outcome:path, fetch_architecture) => {
        unwrap_step!(
            $phase,
            $transition_outcome,
            $crate::state_machine::StateMachine::FetchArchitecture
        )
    };
    ($phase:expr, $transition_outcome:path, fetch_weights) => {
        unwrap_step!(
            $phase,
            $transition_outcome,
            $crate::state_machine::StateMachine::FetchWeights
        )
    };
    ($phase:expr, $transition_outcome:path, train) => {
        unwrap_step!(
            $phase,
            $transition_outcome,
            $crate::state_machine::StateMachine::Train
        )
    };
    ($phase:expr, $transition_outcome:path, upload) => {
        unwrap_step!(
            $phase,
            $transition_outcome,
            $crate::state_machine::StateMachine::Upload
        )
    };
    ($phase:expr, $transition_outcome:path, publish) => {
        unwrap_step!(
            $phase,
            $transition_outcome,
            $crate::state_machine::StateMachine::Publish
        )
    };
    ($phase:expr, $transition_outcome:path, completed) => {
        unwrap_step!(
            $phase,
            $transition_outcome,
            $crate::state_machine::StateMachine::Completed
        )
    };
    ($phase:expr, $transition_outcome:path, $state_machine:path) => {{
        let x = $crate::unwrap_as!(
            $crate::state_machine::Step::step($phase).await,
            $transition_outcome
        );
        $crate::unwrap_as!(x, $state_machine)
    }};
}

/// Run a step that must abort the cycle, and return the reset state
/// machine together with the error.
#[macro_export]
macro_rules! unwrap_step_failed {
    ($phase:expr) => {
        match $crate::state_machine::Step::step($phase).await {
            $crate::state_machine::TransitionOutcome::Failed(state_machine, error) => {
                (state_machine, error)
            }
            x => panic!("Not a failure: {:?}", x),
        }
    };
}

#[macro_export]
macro_rules! unwrap_progress_continue {
    ($expr:expr) => {
        $crate::unwrap_as!($expr, $crate::state_machine::Progress::Continue)
    };
    ($phase:expr, $method:tt) => {
        unwrap_progress_continue!($phase.$method())
    };
    ($phase:expr, $method:tt, async) => {
        unwrap_progress_continue!($phase.$method().await)
    };
}

pub const PROJECT_ID: u64 = 3;

pub fn address() -> Address {
    "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".parse().unwrap()
}

pub fn other_address() -> Address {
    "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC".parse().unwrap()
}

pub fn client_settings(max_rounds: Option<u64>) -> ClientSettings {
    ClientSettings {
        address: address(),
        project_id: PROJECT_ID,
        poll_interval: Duration::from_millis(10),
        max_rounds,
        transaction: TransactionSettings {
            chain_id: 1337,
            gas: 2_000_000,
            gas_price: 2_000_000_000,
        },
    }
}

pub fn participant_keys() -> EcdhKeyPair {
    SecretEcdhKey::from_hex("02").unwrap().into()
}

pub fn aggregator_keys() -> EcdhKeyPair {
    SecretEcdhKey::from_hex("0a").unwrap().into()
}

/// The secret the participant shares with the aggregator.
pub fn shared_secret() -> SharedSecret {
    participant_keys()
        .secret
        .shared_secret(&aggregator_keys().public)
}

pub fn session_key() -> SessionKey {
    SessionKey::from(vec![0x42; 32])
}

/// The `encryptedKey` field of a key delivery for [`session_key`].
pub fn encrypted_session_key() -> String {
    encrypt(
        hex::encode(session_key().as_slice()).as_bytes(),
        shared_secret().as_slice(),
    )
    .unwrap()
}

pub fn key_delivery(client_address: Address, encrypted_key: String) -> LedgerEvent {
    LedgerEvent::EncryptedKey {
        client_address,
        project_id: PROJECT_ID,
        iteration: 0,
        encrypted_key,
    }
}

pub fn global_update(project_id: u64) -> LedgerEvent {
    LedgerEvent::GlobalModelUpdated {
        manager_address: other_address(),
        project_id,
        iteration: 1,
    }
}

pub fn receipt(tx_hash: &TxHash, status: bool) -> Receipt {
    Receipt {
        tx_hash: tx_hash.clone(),
        status,
        block_number: Some(7),
    }
}

/// A shared state before the key agreement.
pub fn shared_state(max_rounds: Option<u64>) -> SharedState {
    let settings = client_settings(max_rounds);
    let watcher = EventWatcher::new(settings.poll_interval, CancellationToken::new());
    SharedState::new(settings, participant_keys(), watcher)
}

/// A shared state after the key agreement.
pub fn agreed_shared_state(max_rounds: Option<u64>) -> SharedState {
    let mut shared = shared_state(max_rounds);
    shared.shared_secret = Some(shared_secret());
    shared
}

/// A shared state within a round, after the join transaction was mined.
pub fn joined_shared_state(max_rounds: Option<u64>) -> SharedState {
    let mut shared = agreed_shared_state(max_rounds);
    shared.session_key = Some(session_key());
    shared.has_model = true;
    shared
}
