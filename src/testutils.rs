//! In-memory collaborators for running a participant without a ledger, a store or an ML
//! framework.
//!
//! A [`Simulation`] plays the contract, the content-addressed store and the aggregator of a
//! single project. The handles it hands out ([`SimulatedLedger`], [`SimulatedEventLog`] and
//! [`MemoryStore`]) share its state, so that the aggregator reacts to the transactions of the
//! participant:
//!
//! - on `join`, it derives the secret it shares with the participant, encrypts a fresh session
//!   key under it, and serves the architecture and the global weights encrypted under the
//!   session key;
//! - on `local_upload`, it decrypts the local weights, averages them into the global weights and
//!   announces the new global model.

use std::{
    collections::{hash_map::DefaultHasher, HashMap, HashSet},
    hash::{Hash, Hasher},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    artifact::{
        decode_weights,
        encode_architecture,
        encode_weights,
        Architecture,
        Artifact,
        ArtifactKind,
        CodecError,
        Shape,
        Tensor,
    },
    crypto::{encrypt, CipherError, EcdhKeyPair, SharedSecret},
    ledger::{
        Address,
        ContractCall,
        Iteration,
        LedgerError,
        LedgerEvent,
        ProjectId,
        Receipt,
        TransactionParams,
        TxHash,
        WEI_PER_ETHER,
    },
    state_machine::{RoundError, RoundState},
    store::{ContentHash, StoreError},
    traits::Evaluation,
    ContentStore,
    EventLog,
    LedgerClient,
    MlEngine,
    Notify,
};

/// The participation amount of a simulated project, in ether.
pub const PARTICIPATION_AMOUNT: u128 = 1;

#[derive(Serialize, Deserialize)]
/// The architecture understood by the [`ToyEngine`]: the shapes of its weight tensors.
struct ToyArchitecture {
    layers: Vec<Vec<usize>>,
}

/// Builds an architecture for the [`ToyEngine`].
pub fn toy_architecture(shapes: &[Shape]) -> Architecture {
    let layers = shapes.iter().map(|shape| shape.dims().to_vec()).collect();
    // serializing a list of lists of integers cannot fail
    let json = serde_json::to_string(&ToyArchitecture { layers }).unwrap_or_default();
    Architecture::from(json)
}

#[derive(Error, Debug)]
enum AggregatorError {
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0} never joined")]
    UnknownParticipant(Address),
    #[error("not the simulated project")]
    UnknownProject,
}

struct Network {
    project_id: ProjectId,
    aggregator: EcdhKeyPair,
    manager_address: Address,
    trainable: bool,
    iteration: Iteration,
    architecture: Architecture,
    global_weights: Vec<Tensor>,
    architecture_hash: Option<ContentHash>,
    weights_hash: Option<ContentHash>,
    blobs: HashMap<ContentHash, Vec<u8>>,
    events: Vec<LedgerEvent>,
    receipts: HashMap<TxHash, Receipt>,
    secrets: HashMap<Address, SharedSecret>,
    members: HashSet<Address>,
    transactions: u64,
    revert_next_upload: bool,
    uploads: Vec<ContentHash>,
}

impl Network {
    fn store(&mut self, blob: Vec<u8>) -> ContentHash {
        let mut hasher = DefaultHasher::new();
        blob.hash(&mut hasher);
        let hash = ContentHash::from(format!("Qm{:016x}", hasher.finish()));
        self.blobs.insert(hash.clone(), blob);
        hash
    }

    fn load(&self, hash: &ContentHash) -> Result<Vec<u8>, StoreError> {
        self.blobs
            .get(hash)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(hash.clone()))
    }

    fn check_project(&self, project: ProjectId) -> Result<(), LedgerError> {
        if project == self.project_id {
            Ok(())
        } else {
            Err(LedgerError::InvalidResponse(format!(
                "project {} does not exist",
                project
            )))
        }
    }

    fn next_tx_hash(&mut self) -> TxHash {
        self.transactions += 1;
        TxHash::from(format!("0x{:064x}", self.transactions))
    }

    /// Executes a call and returns whether it succeeded.
    fn execute(&mut self, sender: Address, call: ContractCall, params: TransactionParams) -> bool {
        let outcome = match call {
            ContractCall::Join {
                project_id,
                public_key,
            } => self.join(sender, project_id, &public_key, params),
            ContractCall::LocalUpload { .. } if self.revert_next_upload => {
                self.revert_next_upload = false;
                return false;
            }
            ContractCall::LocalUpload {
                project_id,
                content_hash,
            } => self.aggregate(sender, project_id, &content_hash),
        };
        match outcome {
            Ok(succeeded) => succeeded,
            Err(e) => {
                tracing::warn!("simulated aggregator rejected a call: {}", e);
                false
            }
        }
    }

    fn join(
        &mut self,
        sender: Address,
        project: ProjectId,
        public_key: &str,
        params: TransactionParams,
    ) -> Result<bool, AggregatorError> {
        if project != self.project_id {
            return Err(AggregatorError::UnknownProject);
        }
        // the first join of an account pays a tenth of the participation amount
        let fee = PARTICIPATION_AMOUNT * WEI_PER_ETHER / 10;
        let expected = if self.members.contains(&sender) {
            None
        } else {
            Some(fee)
        };
        if params.value != expected {
            return Ok(false);
        }
        let secret = match self.aggregator.secret.shared_secret_with_hex(public_key) {
            Ok(secret) => secret,
            Err(_) => return Ok(false),
        };

        let session_key: [u8; 32] = rand::thread_rng().gen();
        let architecture = Artifact::seal(
            ArtifactKind::Architecture,
            &encode_architecture(&self.architecture),
            &session_key,
        )?;
        let weights = Artifact::seal(
            ArtifactKind::Weights,
            &encode_weights(&self.global_weights)?,
            &session_key,
        )?;
        self.architecture_hash = Some(self.store(architecture.payload));
        self.weights_hash = Some(self.store(weights.payload));

        let encrypted_key = encrypt(hex::encode(session_key).as_bytes(), secret.as_slice())?;
        self.events.push(LedgerEvent::EncryptedKey {
            client_address: sender,
            project_id: project,
            iteration: self.iteration,
            encrypted_key,
        });
        self.secrets.insert(sender, secret);
        self.members.insert(sender);
        Ok(true)
    }

    fn aggregate(
        &mut self,
        sender: Address,
        project: ProjectId,
        content_hash: &ContentHash,
    ) -> Result<bool, AggregatorError> {
        if project != self.project_id {
            return Err(AggregatorError::UnknownProject);
        }
        let secret = self
            .secrets
            .get(&sender)
            .ok_or(AggregatorError::UnknownParticipant(sender))?;
        let stored = self.load(content_hash)?;
        let payload = Artifact::fetched(ArtifactKind::Weights, content_hash.clone(), stored)
            .open(secret.as_slice())?;
        let shapes: Vec<Shape> = self
            .global_weights
            .iter()
            .map(|tensor| tensor.shape().clone())
            .collect();
        let local = decode_weights(&payload, &shapes)?;

        for (global, local) in self.global_weights.iter_mut().zip(local.iter()) {
            for (g, l) in global.values_mut().iter_mut().zip(local.values()) {
                *g = (*g + *l) / 2.0;
            }
        }
        self.uploads.push(content_hash.clone());
        self.iteration += 1;
        self.events.push(LedgerEvent::GlobalModelUpdated {
            manager_address: self.manager_address,
            project_id: self.project_id,
            iteration: self.iteration,
        });
        Ok(true)
    }
}

/// A simulated project: the contract, the store and the aggregator.
#[derive(Clone)]
pub struct Simulation(Arc<Mutex<Network>>);

impl Simulation {
    /// Creates a trainable project serving the given model.
    pub fn new(
        project_id: ProjectId,
        architecture: Architecture,
        global_weights: Vec<Tensor>,
    ) -> Self {
        let network = Network {
            project_id,
            aggregator: EcdhKeyPair::generate(),
            manager_address: Address::from([0x11; 20]),
            trainable: true,
            iteration: 0,
            architecture,
            global_weights,
            architecture_hash: None,
            weights_hash: None,
            blobs: HashMap::new(),
            events: Vec::new(),
            receipts: HashMap::new(),
            secrets: HashMap::new(),
            members: HashSet::new(),
            transactions: 0,
            revert_next_upload: false,
            uploads: Vec::new(),
        };
        Self(Arc::new(Mutex::new(network)))
    }

    /// Creates a trainable project serving a small [`ToyEngine`] model, initialized with zeros.
    pub fn toy(project_id: ProjectId) -> Self {
        let shapes = vec![Shape::from(vec![2, 2]), Shape::from(vec![2])];
        let weights = shapes.iter().cloned().map(Tensor::zeros).collect();
        Self::new(project_id, toy_architecture(&shapes), weights)
    }

    fn network(&self) -> MutexGuard<'_, Network> {
        // a panicking test thread must not hide the state from the others
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A ledger client signing as `address`.
    pub fn ledger(&self, address: Address) -> SimulatedLedger {
        SimulatedLedger {
            simulation: self.clone(),
            address,
        }
    }

    /// A subscription to the events of the contract, starting at the current end of the log.
    pub fn event_log(&self) -> SimulatedEventLog {
        let cursor = self.network().events.len();
        SimulatedEventLog {
            simulation: self.clone(),
            cursor,
        }
    }

    pub fn store(&self) -> MemoryStore {
        MemoryStore(self.clone())
    }

    /// The number of global models published so far.
    pub fn iteration(&self) -> Iteration {
        self.network().iteration
    }

    pub fn global_weights(&self) -> Vec<Tensor> {
        self.network().global_weights.clone()
    }

    /// The content hashes referenced by `local_upload` calls, in order.
    pub fn uploads(&self) -> Vec<ContentHash> {
        self.network().uploads.clone()
    }

    pub fn set_trainable(&self, trainable: bool) {
        self.network().trainable = trainable;
    }

    /// Makes the next `local_upload` transaction revert.
    pub fn revert_next_upload(&self) {
        self.network().revert_next_upload = true;
    }

    /// Announces a global model without any upload, as the aggregator does when a round ends
    /// without the participant.
    pub fn publish_global_update(&self) {
        let mut network = self.network();
        network.iteration += 1;
        let event = LedgerEvent::GlobalModelUpdated {
            manager_address: network.manager_address,
            project_id: network.project_id,
            iteration: network.iteration,
        };
        network.events.push(event);
    }
}

/// A [`LedgerClient`] for a [`Simulation`]. Transactions are mined as soon as they are
/// submitted.
pub struct SimulatedLedger {
    simulation: Simulation,
    address: Address,
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn get_main_pk(&mut self, project: ProjectId) -> Result<String, LedgerError> {
        let network = self.simulation.network();
        network.check_project(project)?;
        Ok(network.aggregator.public.to_hex())
    }

    async fn is_trainable(&mut self, project: ProjectId) -> Result<bool, LedgerError> {
        let network = self.simulation.network();
        network.check_project(project)?;
        Ok(network.trainable)
    }

    async fn before_join(&mut self, project: ProjectId) -> Result<u128, LedgerError> {
        self.simulation.network().check_project(project)?;
        Ok(PARTICIPATION_AMOUNT)
    }

    async fn participate_return(
        &mut self,
        project: ProjectId,
    ) -> Result<ContentHash, LedgerError> {
        let network = self.simulation.network();
        network.check_project(project)?;
        network
            .architecture_hash
            .clone()
            .ok_or_else(|| LedgerError::InvalidResponse("no architecture published".into()))
    }

    async fn join_return(&mut self, project: ProjectId) -> Result<ContentHash, LedgerError> {
        let network = self.simulation.network();
        network.check_project(project)?;
        network
            .weights_hash
            .clone()
            .ok_or_else(|| LedgerError::InvalidResponse("no global weights published".into()))
    }

    async fn submit(
        &mut self,
        call: ContractCall,
        params: TransactionParams,
    ) -> Result<TxHash, LedgerError> {
        let mut network = self.simulation.network();
        let tx_hash = network.next_tx_hash();
        let status = network.execute(self.address, call, params);
        let block_number = Some(network.transactions);
        network.receipts.insert(
            tx_hash.clone(),
            Receipt {
                tx_hash: tx_hash.clone(),
                status,
                block_number,
            },
        );
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&mut self, tx_hash: &TxHash) -> Result<Receipt, LedgerError> {
        self.simulation
            .network()
            .receipts
            .get(tx_hash)
            .cloned()
            .ok_or_else(|| LedgerError::InvalidResponse(format!("unknown transaction {}", tx_hash)))
    }
}

/// An [`EventLog`] for a [`Simulation`].
pub struct SimulatedEventLog {
    simulation: Simulation,
    cursor: usize,
}

#[async_trait]
impl EventLog for SimulatedEventLog {
    async fn new_entries(&mut self) -> Result<Vec<LedgerEvent>, LedgerError> {
        let network = self.simulation.network();
        let entries = network.events[self.cursor..].to_vec();
        self.cursor = network.events.len();
        Ok(entries)
    }
}

/// A [`ContentStore`] for a [`Simulation`]. Blobs are addressed by a hash of their content.
pub struct MemoryStore(Simulation);

#[async_trait]
impl ContentStore for MemoryStore {
    async fn put(&mut self, blob: Vec<u8>) -> Result<ContentHash, StoreError> {
        Ok(self.0.network().store(blob))
    }

    async fn get(&mut self, hash: &ContentHash) -> Result<Vec<u8>, StoreError> {
        self.0.network().load(hash)
    }
}

#[derive(Error, Debug)]
pub enum ToyEngineError {
    #[error("no model loaded")]
    NoModel,
    #[error("invalid architecture: {0}")]
    Architecture(#[from] serde_json::Error),
    #[error("expected {expected} weight tensors, got {actual}")]
    Weights { expected: usize, actual: usize },
    #[error("training diverged")]
    Training,
}

/// An [`MlEngine`] whose training step adds a constant to every weight.
#[derive(Debug)]
pub struct ToyEngine {
    weights: Option<Vec<Tensor>>,
    step: f32,
    failing_trainings: usize,
}

impl ToyEngine {
    pub fn new(step: f32) -> Self {
        Self {
            weights: None,
            step,
            failing_trainings: 0,
        }
    }

    /// Makes the next `count` trainings fail.
    pub fn failing(mut self, count: usize) -> Self {
        self.failing_trainings = count;
        self
    }

    fn model(&mut self) -> Result<&mut Vec<Tensor>, ToyEngineError> {
        self.weights.as_mut().ok_or(ToyEngineError::NoModel)
    }
}

impl Default for ToyEngine {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[async_trait]
impl MlEngine for ToyEngine {
    type Error = ToyEngineError;

    async fn load_architecture(&mut self, architecture: Architecture) -> Result<(), Self::Error> {
        let ToyArchitecture { layers } = serde_json::from_str(architecture.as_str())?;
        self.weights = Some(layers.into_iter().map(|dims| Tensor::zeros(dims.into())).collect());
        Ok(())
    }

    async fn weight_shapes(&mut self) -> Result<Vec<Shape>, Self::Error> {
        Ok(self
            .model()?
            .iter()
            .map(|tensor| tensor.shape().clone())
            .collect())
    }

    async fn set_weights(&mut self, weights: Vec<Tensor>) -> Result<(), Self::Error> {
        let model = self.model()?;
        if model.len() != weights.len() {
            return Err(ToyEngineError::Weights {
                expected: model.len(),
                actual: weights.len(),
            });
        }
        *model = weights;
        Ok(())
    }

    async fn train(&mut self) -> Result<(), Self::Error> {
        if self.failing_trainings > 0 {
            self.failing_trainings -= 1;
            return Err(ToyEngineError::Training);
        }
        let step = self.step;
        for tensor in self.model()?.iter_mut() {
            for value in tensor.values_mut() {
                *value += step;
            }
        }
        Ok(())
    }

    async fn evaluate(&mut self) -> Result<Evaluation, Self::Error> {
        let model = self.model()?;
        let (sum, count) = model
            .iter()
            .flat_map(|tensor| tensor.values())
            .fold((0.0_f32, 0_usize), |(sum, count), value| (sum + value * value, count + 1));
        let loss = if count == 0 { 0.0 } else { sum / count as f32 };
        Ok(Evaluation {
            loss,
            accuracy: 1.0 / (1.0 + loss),
        })
    }

    async fn weights(&mut self) -> Result<Vec<Tensor>, Self::Error> {
        Ok(self.model()?.clone())
    }
}

/// A notification received by a [`Recorder`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    NewRound(Iteration),
    Joined,
    Trained,
    Published(ContentHash),
    Failed(RoundState),
    Completed,
}

/// A [`Notify`] implementation that records every notification.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<Notification>>>);

impl Recorder {
    fn record(&self, notification: Notification) {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notification);
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Notify for Recorder {
    fn notify_new_round(&mut self, iteration: u64) {
        self.record(Notification::NewRound(iteration))
    }

    fn notify_joined(&mut self) {
        self.record(Notification::Joined)
    }

    fn notify_trained(&mut self) {
        self.record(Notification::Trained)
    }

    fn notify_published(&mut self, content_hash: &ContentHash) {
        self.record(Notification::Published(content_hash.clone()))
    }

    fn notify_failed(&mut self, error: &RoundError) {
        self.record(Notification::Failed(error.state))
    }

    fn notify_completed(&mut self) {
        self.record(Notification::Completed)
    }
}
