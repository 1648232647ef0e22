#![cfg_attr(docsrs, feature(doc_cfg))]
//! This crate provides building blocks for implementing participants of a
//! federated learning project anchored on a smart contract.
//!
//! A project is run by an aggregator. Participants train the model of the
//! project locally, and exchange it with the aggregator through a
//! content-addressed store, round after round:
//!
//! - a participant agrees on a secret with the aggregator once, using an
//!   elliptic curve Diffie-Hellman exchange ([`crypto`])
//! - every round, it joins the project on the contract, and receives a
//!   session key encrypted under that secret
//! - it fetches the architecture (on the first round only) and the global
//!   weights of the model, which the aggregator stored encrypted under the
//!   session key ([`artifact`])
//! - it trains the model locally, stores the trained weights encrypted
//!   under the shared secret, and references them on the contract
//!
//! The participant learns about the progress of the round by watching the
//! events of the contract ([`watcher`]).
//!
//! # Running a participant
//!
//! A participant is a [`RoundController`]. It embeds a [`StateMachine`]
//! that runs the protocol and requires five components:
//!
//! - a client for the contract, which signs the transactions of the
//!   participant: any type that implements [`LedgerClient`]
//! - a subscription to the events of the contract: any type that
//!   implements [`EventLog`]
//! - a store for the encrypted artifacts: any type that implements
//!   [`ContentStore`]. An IPFS client is available when compiling with
//!   `--features reqwest-client`
//! - the machine learning engine that trains the model: any type that
//!   implements [`MlEngine`]
//! - a notifier that the state machine can use to send notifications: any
//!   type that implements [`Notify`]
//!
//! In-memory implementations of the first four are available when
//! compiling with `--features testutils`. They are used by the
//! `fedledger-sim` binary.
//!
//! ```rust
//! use fedledger_client::{store::ContentHash, Notify};
//!
//! // A notifier that prints the progress of the participant.
//! struct Printer;
//!
//! impl Notify for Printer {
//!     fn notify_new_round(&mut self, iteration: u64) {
//!         println!("joining round {}", iteration);
//!     }
//!     fn notify_published(&mut self, content_hash: &ContentHash) {
//!         println!("published the local model {}", content_hash);
//!     }
//! }
//! ```
//!
//! The controller is then driven with [`RoundController::run`]:
//!
//! ```rust,ignore
//! let mut controller = RoundController::new(
//!     settings.client_settings(),
//!     EcdhKeyPair::generate(),
//!     ledger,
//!     event_log,
//!     store,
//!     engine,
//!     Printer,
//! );
//! loop {
//!     match controller.run().await {
//!         Ok(RunOutcome::Completed { iterations }) => break,
//!         Ok(RunOutcome::Cancelled(round)) => break,
//!         // the cycle was aborted, and the participant waits for the next round
//!         Err(error) => eprintln!("{}", error),
//!     }
//! }
//! ```

pub mod artifact;
pub mod controller;
pub mod crypto;
pub mod ledger;
pub mod settings;
pub mod store;
pub mod watcher;

mod state_machine;
pub use state_machine::{
    EngineError,
    PassiveNotifier,
    ProtocolError,
    Round,
    RoundError,
    RoundState,
    StateMachine,
    TransitionOutcome,
};

#[cfg(any(test, feature = "testutils"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testutils")))]
pub mod testutils;

mod traits;
pub use self::traits::{ContentStore, Evaluation, EventLog, LedgerClient, MlEngine, Notify};

pub use controller::{RoundController, RunOutcome};
