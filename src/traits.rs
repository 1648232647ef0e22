use async_trait::async_trait;

use crate::{
    artifact::{Architecture, Shape, Tensor},
    ledger::{ContractCall, LedgerError, LedgerEvent, ProjectId, Receipt, TransactionParams, TxHash},
    state_machine::RoundError,
    store::{ContentHash, StoreError},
};

/// A trait used by the [`StateMachine`] to emit notifications upon
/// certain events.
///
/// [`StateMachine`]: crate::StateMachine
pub trait Notify {
    /// Emit a notification when the participant starts joining the
    /// given iteration of the project
    fn notify_new_round(&mut self, _iteration: u64) {}
    /// Emit a notification when the join transaction has been mined
    /// and the session key of the round is known
    fn notify_joined(&mut self) {}
    /// Emit a notification when the local model has been trained
    fn notify_trained(&mut self) {}
    /// Emit a notification when the locally trained model has been
    /// referenced on the ledger
    fn notify_published(&mut self, _content_hash: &ContentHash) {}
    /// Emit a notification when a cycle has been aborted
    fn notify_failed(&mut self, _error: &RoundError) {}
    /// Emit a notification when the configured number of rounds has
    /// been reached
    fn notify_completed(&mut self) {}
}

/// A trait used by the [`StateMachine`] to talk to the federated
/// learning contract.
///
/// Implementations own the signing key of the participant: they
/// sign, nonce and broadcast the transactions built from a
/// [`ContractCall`].
///
/// [`StateMachine`]: crate::StateMachine
#[async_trait]
pub trait LedgerClient {
    /// Retrieve the hex encoded public key of the aggregator of the
    /// project (`getMainPK`)
    async fn get_main_pk(&mut self, project: ProjectId) -> Result<String, LedgerError>;

    /// Check whether the project accepts participants right now
    /// (`isTrainable`)
    async fn is_trainable(&mut self, project: ProjectId) -> Result<bool, LedgerError>;

    /// Retrieve the participation amount of the project, in ether
    /// (`beforeJoin`)
    async fn before_join(&mut self, project: ProjectId) -> Result<u128, LedgerError>;

    /// Retrieve the content hash of the model architecture
    /// (`participateReturn`)
    async fn participate_return(&mut self, project: ProjectId)
        -> Result<ContentHash, LedgerError>;

    /// Retrieve the content hash of the current global weights
    /// (`joinReturn`)
    async fn join_return(&mut self, project: ProjectId) -> Result<ContentHash, LedgerError>;

    /// Sign and broadcast a state changing call.
    async fn submit(
        &mut self,
        call: ContractCall,
        params: TransactionParams,
    ) -> Result<TxHash, LedgerError>;

    /// Wait until the given transaction is mined.
    async fn wait_for_receipt(&mut self, tx_hash: &TxHash) -> Result<Receipt, LedgerError>;
}

/// A subscription to the events of the federated learning contract.
#[async_trait]
pub trait EventLog {
    /// Return the events emitted since the previous call, in the
    /// order in which they were emitted.
    async fn new_entries(&mut self) -> Result<Vec<LedgerEvent>, LedgerError>;
}

/// A trait used by the [`StateMachine`] to read and write
/// encrypted artifacts.
///
/// [`StateMachine`]: crate::StateMachine
#[async_trait]
pub trait ContentStore {
    /// Store a blob and return its address.
    async fn put(&mut self, blob: Vec<u8>) -> Result<ContentHash, StoreError>;

    /// Retrieve the blob stored under the given address.
    async fn get(&mut self, hash: &ContentHash) -> Result<Vec<u8>, StoreError>;
}

/// The metrics of an evaluation of the local model.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub loss: f32,
    pub accuracy: f32,
}

/// A trait used by the [`StateMachine`] to drive the machine
/// learning engine of the participant.
///
/// [`StateMachine`]: crate::StateMachine
#[async_trait]
pub trait MlEngine {
    type Error: ::std::error::Error + Send + Sync + 'static;

    /// Build the local model from the architecture published by the
    /// aggregator.
    async fn load_architecture(&mut self, architecture: Architecture) -> Result<(), Self::Error>;

    /// Return the shapes of the weight tensors of the local model, in
    /// the order in which weights are exchanged.
    async fn weight_shapes(&mut self) -> Result<Vec<Shape>, Self::Error>;

    /// Replace the weights of the local model.
    async fn set_weights(&mut self, weights: Vec<Tensor>) -> Result<(), Self::Error>;

    /// Train the local model on the local data.
    async fn train(&mut self) -> Result<(), Self::Error>;

    /// Evaluate the local model on the local test data.
    async fn evaluate(&mut self) -> Result<Evaluation, Self::Error>;

    /// Return the weights of the local model.
    async fn weights(&mut self) -> Result<Vec<Tensor>, Self::Error>;
}
