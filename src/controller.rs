//! Driving the training cycles of a participant.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::{
    crypto::EcdhKeyPair,
    ledger::Iteration,
    settings::ClientSettings,
    state_machine::{Round, RoundError, StateMachine, TransitionOutcome},
    ContentStore,
    EventLog,
    LedgerClient,
    MlEngine,
    Notify,
};

/// How a call to [`RoundController::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The configured number of rounds was reached.
    Completed { iterations: Iteration },
    /// A wait for a ledger event was cancelled. The controller stopped in the given round, and
    /// resumes from it once re-armed.
    Cancelled(Round),
}

/// A participant. It embeds the state machine that runs the training cycles, and drives it
/// until the cycles are completed, cancelled or aborted.
pub struct RoundController {
    /// Internal state machine
    state_machine: Option<StateMachine>,
    /// Token interrupting the waits for ledger events
    cancel: CancellationToken,
}

impl RoundController {
    /// Create a new participant, in the init phase.
    pub fn new<L, G, S, M, N>(
        settings: ClientSettings,
        keys: EcdhKeyPair,
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
        let cancel = CancellationToken::new();
        let state_machine = StateMachine::new(
            settings,
            keys,
            cancel.clone(),
            ledger,
            event_log,
            store,
            engine,
            notifier,
        );
        Self {
            state_machine: Some(state_machine),
            cancel,
        }
    }

    /// The token that cancels the current run. Cancelling it makes [`RoundController::run`]
    /// return at the next wait for a ledger event.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Install a fresh cancellation token, so that a cancelled controller can run again.
    pub fn rearm(&mut self) -> CancellationToken {
        self.cancel = CancellationToken::new();
        if let Some(state_machine) = self.state_machine.as_mut() {
            state_machine.rearm(self.cancel.clone());
        }
        self.cancel.clone()
    }

    /// Where the participant currently stands.
    pub fn round(&self) -> Option<Round> {
        self.state_machine.as_ref().map(StateMachine::round)
    }

    /// Drive the state machine until the configured number of rounds is reached, the
    /// cancellation token is cancelled, or a cycle is aborted.
    ///
    /// An aborted cycle is returned as an error. The state machine is then reset, and calling
    /// this method again resumes from the reset state.
    ///
    /// The run must be stopped through the cancellation token: if the returned future is
    /// dropped while a transition is in progress, the state machine is lost.
    pub async fn run(&mut self) -> Result<RunOutcome, RoundError> {
        loop {
            // UNWRAP_SAFE: the state machine is always set between two transitions.
            let state_machine = self.state_machine.take().unwrap();
            if state_machine.is_completed() {
                let iterations = state_machine.round().iteration;
                self.state_machine = Some(state_machine);
                info!("all {} rounds completed", iterations);
                return Ok(RunOutcome::Completed { iterations });
            }

            let round = state_machine.round();
            let span = info_span!(
                "round",
                project_id = round.project_id,
                iteration = round.iteration,
                state = %round.state,
            );
            match state_machine.transition().instrument(span).await {
                TransitionOutcome::Pending(new_state_machine) => {
                    let round = new_state_machine.round();
                    self.state_machine = Some(new_state_machine);
                    if self.cancel.is_cancelled() {
                        info!("run cancelled in {}", round);
                        return Ok(RunOutcome::Cancelled(round));
                    }
                    debug!("no progress in {}, trying again", round);
                }
                TransitionOutcome::Complete(new_state_machine) => {
                    self.state_machine = Some(new_state_machine);
                }
                TransitionOutcome::Failed(new_state_machine, error) => {
                    self.state_machine = Some(new_state_machine);
                    return Err(error);
                }
            }
        }
    }
}
