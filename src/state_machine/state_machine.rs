use derive_more::From;
use tokio_util::sync::CancellationToken;

use super::{
    boxed_io,
    Awaiting,
    Completed,
    FetchArchitecture,
    FetchWeights,
    Init,
    IntoPhase,
    Join,
    Phase,
    Publish,
    Round,
    RoundError,
    SharedState,
    State,
    Step,
    Train,
    Upload,
};
use crate::{
    crypto::EcdhKeyPair,
    settings::ClientSettings,
    watcher::EventWatcher,
    ContentStore,
    EventLog,
    LedgerClient,
    MlEngine,
    Notify,
};

/// Outcome of a state machine transition attempt.
#[derive(Debug)]
pub enum TransitionOutcome {
    /// Outcome when the state machine cannot make immediate progress. The state machine
    /// is returned unchanged.
    Pending(StateMachine),
    /// Outcome when a transition occured and the state machine was updated.
    Complete(StateMachine),
    /// Outcome when the cycle was aborted. The state machine is returned in the phase it
    /// was reset to.
    Failed(StateMachine, RoundError),
}

/// Training cycle state machine.
#[derive(From, Debug)]
pub enum StateMachine {
    /// State machine in the "init" phase
    Init(Phase<Init>),
    /// State machine in the "wait for trainable" phase
    Awaiting(Phase<Awaiting>),
    /// State machine in the "join" phase
    Join(Phase<Join>),
    /// State machine in the "fetch architecture" phase
    FetchArchitecture(Phase<FetchArchitecture>),
    /// State machine in the "fetch weights" phase
    FetchWeights(Phase<FetchWeights>),
    /// State machine in the "train" phase
    Train(Phase<Train>),
    /// State machine in the "upload" phase
    Upload(Phase<Upload>),
    /// State machine in the "publish reference" phase
    Publish(Phase<Publish>),
    /// State machine in the terminal "completed" phase
    Completed(Phase<Completed>),
}

impl StateMachine {
    /// Try to make progress in the training cycle
    pub async fn transition(self) -> TransitionOutcome {
        match self {
            StateMachine::Init(phase) => phase.step().await,
            StateMachine::Awaiting(phase) => phase.step().await,
            StateMachine::Join(phase) => phase.step().await,
            StateMachine::FetchArchitecture(phase) => phase.step().await,
            StateMachine::FetchWeights(phase) => phase.step().await,
            StateMachine::Train(phase) => phase.step().await,
            StateMachine::Upload(phase) => phase.step().await,
            StateMachine::Publish(phase) => phase.step().await,
            StateMachine::Completed(phase) => phase.step().await,
        }
    }

    /// Where the participant currently stands.
    pub fn round(&self) -> Round {
        match self {
            StateMachine::Init(phase) => phase.round(),
            StateMachine::Awaiting(phase) => phase.round(),
            StateMachine::Join(phase) => phase.round(),
            StateMachine::FetchArchitecture(phase) => phase.round(),
            StateMachine::FetchWeights(phase) => phase.round(),
            StateMachine::Train(phase) => phase.round(),
            StateMachine::Upload(phase) => phase.round(),
            StateMachine::Publish(phase) => phase.round(),
            StateMachine::Completed(phase) => phase.round(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StateMachine::Completed(_))
    }

    /// Install a new cancellation token for the event waits.
    pub fn rearm(&mut self, cancel: CancellationToken) {
        self.shared_mut().watcher.rearm(cancel)
    }

    fn shared_mut(&mut self) -> &mut SharedState {
        match self {
            StateMachine::Init(phase) => phase.state.shared.as_mut(),
            StateMachine::Awaiting(phase) => phase.state.shared.as_mut(),
            StateMachine::Join(phase) => phase.state.shared.as_mut(),
            StateMachine::FetchArchitecture(phase) => phase.state.shared.as_mut(),
            StateMachine::FetchWeights(phase) => phase.state.shared.as_mut(),
            StateMachine::Train(phase) => phase.state.shared.as_mut(),
            StateMachine::Upload(phase) => phase.state.shared.as_mut(),
            StateMachine::Publish(phase) => phase.state.shared.as_mut(),
            StateMachine::Completed(phase) => phase.state.shared.as_mut(),
        }
    }
}

impl StateMachine {
    /// Instantiate a new state machine, in the init phase.
    ///
    /// # Args
    ///
    /// - `settings`: the participant's settings
    /// - `keys`: the key pair for the key agreement with the aggregator
    /// - `cancel`: a token that interrupts the waits for ledger events
    /// - `ledger`: a client for the federated learning contract
    /// - `event_log`: a subscription to the events of the contract
    /// - `store`: the content-addressed store that carries artifacts
    /// - `engine`: the ML engine that trains the local model
    /// - `notifier`: a type that the state machine can use to emit notifications
    #[allow(clippy::too_many_arguments)]
    pub fn new<L, G, S, M, N>(
        settings: ClientSettings,
        keys: EcdhKeyPair,
        cancel: CancellationToken,
        ledger: L,
        event_log: G,
        store: S,
        engine: M,
        notifier: N,
    ) -> Self
    where
        L: LedgerClient + Send + 'static,
        G: EventLog + Send + 'static,
        S: ContentStore + Send + 'static,
        M: MlEngine + Send + 'static,
        N: Notify + Send + 'static,
    {
        let io = boxed_io(ledger, event_log, store, engine, notifier);
        let watcher = EventWatcher::new(settings.poll_interval, cancel);
        let shared = SharedState::new(settings, keys, watcher);
        State::new(Box::new(shared), Box::new(Init)).into_phase(io).into()
    }
}
