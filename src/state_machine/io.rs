use async_trait::async_trait;

use crate::{
    artifact::{Architecture, Shape, Tensor},
    ledger::{ContractCall, LedgerError, LedgerEvent, ProjectId, Receipt, TransactionParams, TxHash},
    state_machine::{EngineError, RoundError},
    store::{ContentHash, StoreError},
    traits::Evaluation,
    ContentStore,
    EventLog,
    LedgerClient,
    MlEngine,
    Notify,
};

/// Returned a dynamically dispatched [`IO`] object
pub(crate) fn boxed_io<L, G, S, M, N>(
    ledger: L,
    event_log: G,
    store: S,
    engine: M,
    notifier: N,
) -> Box<dyn IO>
where
    L: LedgerClient + Send + 'static,
    G: EventLog + Send + 'static,
    S: ContentStore + Send + 'static,
    M: MlEngine + Send + 'static,
    N: Notify + Send + 'static,
{
    Box::new(StateMachineIO {
        ledger,
        event_log,
        store,
        engine,
        notifier,
    })
}

/// A trait that gathers all the [`LedgerClient`], [`EventLog`], [`ContentStore`], [`MlEngine`]
/// and [`Notify`] methods.
///
/// This trait is intended not to be exposed. It is a convenience for avoiding the
/// proliferation of generic parameters in the state machine: instead of five traits,
/// we now have only one, that we can use as a trait object.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait IO: Send + 'static {
    /// Fetch the public key of the aggregator
    async fn get_main_pk(&mut self, project: ProjectId) -> Result<String, LedgerError>;
    /// Check whether the project accepts participants
    async fn is_trainable(&mut self, project: ProjectId) -> Result<bool, LedgerError>;
    /// Fetch the participation amount of the project, in ether
    async fn before_join(&mut self, project: ProjectId) -> Result<u128, LedgerError>;
    /// Fetch the content hash of the model architecture
    async fn participate_return(&mut self, project: ProjectId)
        -> Result<ContentHash, LedgerError>;
    /// Fetch the content hash of the global weights
    async fn join_return(&mut self, project: ProjectId) -> Result<ContentHash, LedgerError>;
    /// Sign and broadcast a contract call
    async fn submit(
        &mut self,
        call: ContractCall,
        params: TransactionParams,
    ) -> Result<TxHash, LedgerError>;
    /// Wait for a transaction to be mined
    async fn wait_for_receipt(&mut self, tx_hash: &TxHash) -> Result<Receipt, LedgerError>;

    /// Fetch the events emitted since the last call
    async fn new_entries(&mut self) -> Result<Vec<LedgerEvent>, LedgerError>;

    /// Store an encrypted artifact
    async fn put(&mut self, blob: Vec<u8>) -> Result<ContentHash, StoreError>;
    /// Load an encrypted artifact
    async fn get(&mut self, hash: &ContentHash) -> Result<Vec<u8>, StoreError>;

    /// Build the local model
    async fn load_architecture(&mut self, architecture: Architecture) -> Result<(), EngineError>;
    /// Get the shapes of the weights of the local model
    async fn weight_shapes(&mut self) -> Result<Vec<Shape>, EngineError>;
    /// Replace the weights of the local model
    async fn set_weights(&mut self, weights: Vec<Tensor>) -> Result<(), EngineError>;
    /// Train the local model
    async fn train(&mut self) -> Result<(), EngineError>;
    /// Evaluate the local model
    async fn evaluate(&mut self) -> Result<Evaluation, EngineError>;
    /// Get the weights of the local model
    async fn weights(&mut self) -> Result<Vec<Tensor>, EngineError>;

    /// Notify the participant that it starts joining a round
    fn notify_new_round(&mut self, iteration: u64);
    /// Notify the participant that it joined the round
    fn notify_joined(&mut self);
    /// Notify the participant that the local model is trained
    fn notify_trained(&mut self);
    /// Notify the participant that its local model is referenced on the ledger
    fn notify_published(&mut self, content_hash: &ContentHash);
    /// Notify the participant that the cycle was aborted
    fn notify_failed(&mut self, error: &RoundError);
    /// Notify the participant that it reached the configured number of rounds
    fn notify_completed(&mut self);
}

/// Internal struct that implements the [`IO`] trait. It is not used as is in the state
/// machine. Instead, we box it and use it as a `dyn IO` object.
struct StateMachineIO<L, G, S, M, N> {
    ledger: L,
    event_log: G,
    store: S,
    engine: M,
    notifier: N,
}

fn engine_error<E>(e: E) -> EngineError
where
    E: std::error::Error + Send + Sync + 'static,
{
    EngineError(Box::new(e))
}

#[async_trait]
impl<L, G, S, M, N> IO for StateMachineIO<L, G, S, M, N>
where
    L: LedgerClient + Send + 'static,
    G: EventLog + Send + 'static,
    S: ContentStore + Send + 'static,
    M: MlEngine + Send + 'static,
    N: Notify + Send + 'static,
{
    async fn get_main_pk(&mut self, project: ProjectId) -> Result<String, LedgerError> {
        self.ledger.get_main_pk(project).await
    }

    async fn is_trainable(&mut self, project: ProjectId) -> Result<bool, LedgerError> {
        self.ledger.is_trainable(project).await
    }

    async fn before_join(&mut self, project: ProjectId) -> Result<u128, LedgerError> {
        self.ledger.before_join(project).await
    }

    async fn participate_return(
        &mut self,
        project: ProjectId,
    ) -> Result<ContentHash, LedgerError> {
        self.ledger.participate_return(project).await
    }

    async fn join_return(&mut self, project: ProjectId) -> Result<ContentHash, LedgerError> {
        self.ledger.join_return(project).await
    }

    async fn submit(
        &mut self,
        call: ContractCall,
        params: TransactionParams,
    ) -> Result<TxHash, LedgerError> {
        self.ledger.submit(call, params).await
    }

    async fn wait_for_receipt(&mut self, tx_hash: &TxHash) -> Result<Receipt, LedgerError> {
        self.ledger.wait_for_receipt(tx_hash).await
    }

    async fn new_entries(&mut self) -> Result<Vec<LedgerEvent>, LedgerError> {
        self.event_log.new_entries().await
    }

    async fn put(&mut self, blob: Vec<u8>) -> Result<ContentHash, StoreError> {
        self.store.put(blob).await
    }

    async fn get(&mut self, hash: &ContentHash) -> Result<Vec<u8>, StoreError> {
        self.store.get(hash).await
    }

    async fn load_architecture(&mut self, architecture: Architecture) -> Result<(), EngineError> {
        self.engine
            .load_architecture(architecture)
            .await
            .map_err(engine_error)
    }

    async fn weight_shapes(&mut self) -> Result<Vec<Shape>, EngineError> {
        self.engine.weight_shapes().await.map_err(engine_error)
    }

    async fn set_weights(&mut self, weights: Vec<Tensor>) -> Result<(), EngineError> {
        self.engine.set_weights(weights).await.map_err(engine_error)
    }

    async fn train(&mut self) -> Result<(), EngineError> {
        self.engine.train().await.map_err(engine_error)
    }

    async fn evaluate(&mut self) -> Result<Evaluation, EngineError> {
        self.engine.evaluate().await.map_err(engine_error)
    }

    async fn weights(&mut self) -> Result<Vec<Tensor>, EngineError> {
        self.engine.weights().await.map_err(engine_error)
    }

    fn notify_new_round(&mut self, iteration: u64) {
        self.notifier.notify_new_round(iteration)
    }

    fn notify_joined(&mut self) {
        self.notifier.notify_joined()
    }

    fn notify_trained(&mut self) {
        self.notifier.notify_trained()
    }

    fn notify_published(&mut self, content_hash: &ContentHash) {
        self.notifier.notify_published(content_hash)
    }

    fn notify_failed(&mut self, error: &RoundError) {
        self.notifier.notify_failed(error)
    }

    fn notify_completed(&mut self) {
        self.notifier.notify_completed()
    }
}

/// The state machine waits for events directly on its [`IO`] object.
#[async_trait]
impl EventLog for Box<dyn IO> {
    async fn new_entries(&mut self) -> Result<Vec<LedgerEvent>, LedgerError> {
        IO::new_entries(self.as_mut()).await
    }
}

/// A [`Notify`] implementation that drops every notification.
pub struct PassiveNotifier;

impl Notify for PassiveNotifier {}
