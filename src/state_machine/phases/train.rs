use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::{
    state_machine::{
        IntoPhase,
        Phase,
        PhaseIo,
        RoundPhase,
        RoundState,
        State,
        Step,
        TransitionOutcome,
        Upload,
    },
    traits::Evaluation,
};

/// Training and evaluating the local model.
#[derive(Debug)]
pub struct Train;

impl RoundPhase for Train {
    const STATE: RoundState = RoundState::Train;
}

impl IntoPhase<Train> for State<Train> {
    fn into_phase(self, io: PhaseIo) -> Phase<Train> {
        Phase::<_>::new(self, io)
    }
}

#[async_trait]
impl Step for Phase<Train> {
    async fn step(mut self) -> TransitionOutcome {
        info!("train task");
        let started = Instant::now();
        if let Err(e) = self.io.train().await {
            return self.abort(e).into();
        }
        info!("trained the local model in {:?}", started.elapsed());

        match self.io.evaluate().await {
            Ok(Evaluation { loss, accuracy }) => {
                info!("evaluated the local model: loss {}, accuracy {}", loss, accuracy)
            }
            Err(e) => warn!("failed to evaluate the local model, continuing: {}", e),
        }

        self.io.notify_trained();
        TransitionOutcome::Complete(self.into_upload().into())
    }
}

impl Phase<Train> {
    fn into_upload(self) -> Phase<Upload> {
        State::new(self.state.shared, Box::new(Upload::new())).into_phase(self.io)
    }
}
