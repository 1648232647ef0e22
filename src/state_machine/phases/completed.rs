use async_trait::async_trait;
use tracing::debug;

use crate::state_machine::{
    IntoPhase,
    Phase,
    PhaseIo,
    RoundPhase,
    RoundState,
    State,
    Step,
    TransitionOutcome,
};

/// The terminal phase, reached once the configured number of rounds
/// has been completed.
#[derive(Debug)]
pub struct Completed;

impl RoundPhase for Completed {
    const STATE: RoundState = RoundState::Completed;
}

impl IntoPhase<Completed> for State<Completed> {
    fn into_phase(self, mut io: PhaseIo) -> Phase<Completed> {
        io.notify_completed();
        Phase::<_>::new(self, io)
    }
}

#[async_trait]
impl Step for Phase<Completed> {
    async fn step(self) -> TransitionOutcome {
        debug!("completed, nothing to do");
        TransitionOutcome::Pending(self.into())
    }
}
