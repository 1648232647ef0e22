use async_trait::async_trait;
use tracing::error;

use super::{Awaiting, Init, RoundError, IO};
use crate::{
    crypto::{EcdhKeyPair, SessionKey, SharedSecret},
    ledger::Iteration,
    settings::ClientSettings,
    state_machine::{ProtocolError, Round, RoundState, StateMachine, TransitionOutcome},
    watcher::EventWatcher,
};

/// State of the state machine
#[derive(Debug)]
pub struct State<P> {
    /// data specific to the current phase
    pub private: Box<P>,
    /// data common to most of the phases
    pub shared: Box<SharedState>,
}

impl<P> State<P> {
    /// Create a new state
    pub fn new(shared: Box<SharedState>, private: Box<P>) -> Self {
        Self { shared, private }
    }
}

/// A dynamically dispatched [`IO`] object.
pub(crate) type PhaseIo = Box<dyn IO>;

/// Represent the state machine in a specific phase
pub struct Phase<P> {
    /// State of the phase.
    pub(super) state: State<P>,
    /// Opaque client for performing IO tasks: talking with the
    /// ledger, the store and the ML engine.
    pub(super) io: PhaseIo,
}

impl<P> std::fmt::Debug for Phase<P>
where
    P: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phase")
            .field("state", &self.state)
            .field("io", &"PhaseIo")
            .finish()
    }
}

/// Store for all the data that are common to all the phases.
///
/// It is not serializable: it holds key material, which is never persisted.
#[derive(Debug)]
pub struct SharedState {
    pub settings: ClientSettings,
    /// Key pair for the key agreement with the aggregator. Only the
    /// public key is ever sent out.
    pub keys: EcdhKeyPair,
    /// Secret shared with the aggregator of the project. It is set by
    /// the init phase.
    pub shared_secret: Option<SharedSecret>,
    /// Key of the artifacts of the current round. It is set when the
    /// join transaction is mined and cleared when a cycle is aborted.
    pub session_key: Option<SessionKey>,
    /// Whether the project was trainable when it was last checked.
    /// The flag is consumed by the next wait for a trainable project.
    pub trainable: bool,
    /// Whether the architecture of the model is loaded in the engine.
    pub has_model: bool,
    /// Number of completed cycles.
    pub iteration: Iteration,
    pub watcher: EventWatcher,
}

impl SharedState {
    pub fn new(settings: ClientSettings, keys: EcdhKeyPair, watcher: EventWatcher) -> Self {
        Self {
            settings,
            keys,
            shared_secret: None,
            session_key: None,
            trainable: false,
            has_model: false,
            iteration: 0,
            watcher,
        }
    }

    /// The secret shared with the aggregator.
    pub(crate) fn shared_secret(&self) -> &SharedSecret {
        // UNWRAP_SAFE: the init phase sets the secret before any other
        // phase runs, and an aborted cycle only skips the init phase
        // if the secret is set.
        self.shared_secret.as_ref().unwrap()
    }

    /// The session key of the current round.
    pub(crate) fn session_key(&self) -> &SessionKey {
        // UNWRAP_SAFE: the join phase installs the key before moving
        // to the phases that use it, and an aborted cycle always goes
        // back through the join phase.
        self.session_key.as_ref().unwrap()
    }
}

/// A trait that each `Phase<P>` implements. When `Step::step` is called, the phase
/// tries to do a small piece of work.
#[async_trait]
pub trait Step {
    /// Represent an attempt to make progress within a phase. If the step results in a
    /// change in the phase state, the updated state machine is returned as
    /// `TransitionOutcome::Complete`. If no progress can be made, the state machine is
    /// returned unchanged as `TransitionOutcome::Pending`. If the cycle has to be aborted,
    /// the reset state machine is returned as `TransitionOutcome::Failed` along with the error.
    async fn step(mut self) -> TransitionOutcome;
}

/// The [`RoundState`] a phase stands for.
pub trait RoundPhase {
    const STATE: RoundState;
}

#[macro_export]
macro_rules! try_progress {
    ($progress:expr) => {{
        use $crate::state_machine::{Progress, TransitionOutcome};
        match $progress {
            // No progress can be made. Return the state machine as is
            Progress::Stuck(phase) => return TransitionOutcome::Pending(phase.into()),
            // Further progress can be made but require more work, so don't return
            Progress::Continue(phase) => phase,
            // Progress has been made, return the updated state machine
            Progress::Updated(state_machine) => return TransitionOutcome::Complete(state_machine),
            // The cycle has been aborted, return the reset state machine
            Progress::Failed(state_machine, error) => {
                return TransitionOutcome::Failed(state_machine, error)
            }
        }
    }};
}

/// Represent the presence or absence of progress being made during a phase.
#[derive(Debug)]
pub enum Progress<P> {
    /// No progress can be made currently.
    Stuck(Phase<P>),
    /// More work needs to be done for progress to be made.
    Continue(Phase<P>),
    /// Progress has been made and resulted in this new state machine.
    Updated(StateMachine),
    /// The cycle has been aborted and the state machine has been reset.
    Failed(StateMachine, RoundError),
}

impl<P> From<(StateMachine, RoundError)> for Progress<P> {
    fn from((state_machine, error): (StateMachine, RoundError)) -> Self {
        Progress::Failed(state_machine, error)
    }
}

impl From<(StateMachine, RoundError)> for TransitionOutcome {
    fn from((state_machine, error): (StateMachine, RoundError)) -> Self {
        TransitionOutcome::Failed(state_machine, error)
    }
}

/// Trait for building [`Phase<P>`] from a [`State<P>`].
///
/// Note that we could just use [`Phase::new`] for this. However we want to be able to
/// customize the conversion for each phase. For instance, when building a
/// `Phase<Join>`, we want to emit a notification with the `io` object. It is cleaner
/// to wrap this custom logic in a trait impl.
pub(crate) trait IntoPhase<P> {
    /// Build the phase with the given `io` object
    fn into_phase(self, io: PhaseIo) -> Phase<P>;
}

impl<P> Phase<P> {
    /// Build a new phase with the given state and io object. This should not be called
    /// directly. Instead, use the [`IntoPhase`] trait to construct a phase.
    pub(crate) fn new(state: State<P>, io: PhaseIo) -> Self {
        Phase { state, io }
    }

    /// Transition to the awaiting phase
    pub fn into_awaiting(self) -> Phase<Awaiting> {
        State::new(self.state.shared, Box::new(Awaiting)).into_phase(self.io)
    }

    #[cfg(test)]
    pub(crate) fn with_io_mock<F>(&mut self, f: F)
    where
        F: FnOnce(&mut super::MockIO),
    {
        let mut mock = super::MockIO::new();
        f(&mut mock);
        self.io = Box::new(mock);
    }

    #[cfg(test)]
    pub(crate) fn check_io_mock(&mut self) {
        // dropping the mock forces the checks to run. We replace it
        // by an empty one, so that we detect if a method is called
        // un-expectedly afterwards
        let _ = std::mem::replace(&mut self.io, Box::new(super::MockIO::new()));
    }
}

impl<P> Phase<P>
where
    P: RoundPhase,
{
    pub fn round(&self) -> Round {
        Round {
            project_id: self.state.shared.settings.project_id,
            iteration: self.state.shared.iteration,
            state: P::STATE,
        }
    }

    /// Abort the current cycle.
    ///
    /// The session key and the trainable flag are dropped. The state
    /// machine goes back to the init phase if no secret is shared
    /// with the aggregator yet, and to the awaiting phase otherwise.
    /// Everything else (the held model and the iteration) is kept.
    pub(crate) fn abort<E>(self, source: E) -> (StateMachine, RoundError)
    where
        E: Into<ProtocolError>,
    {
        let round = self.round();
        let error = RoundError {
            project_id: round.project_id,
            iteration: round.iteration,
            state: round.state,
            source: source.into(),
        };
        error!("{}", error);

        let Phase {
            state: State { mut shared, .. },
            mut io,
        } = self;
        io.notify_failed(&error);
        shared.session_key = None;
        shared.trainable = false;

        let state_machine = if shared.shared_secret.is_none() {
            State::new(shared, Box::new(Init)).into_phase(io).into()
        } else {
            State::new(shared, Box::new(Awaiting)).into_phase(io).into()
        };
        (state_machine, error)
    }
}
