use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{
    artifact::{decode_weights, Artifact, ArtifactKind},
    state_machine::{
        IntoPhase,
        Phase,
        PhaseIo,
        ProtocolError,
        RoundPhase,
        RoundState,
        State,
        Step,
        Train,
        TransitionOutcome,
    },
};

/// Loading the global weights of the round into the local model.
#[derive(Debug)]
pub struct FetchWeights;

impl RoundPhase for FetchWeights {
    const STATE: RoundState = RoundState::FetchWeights;
}

impl IntoPhase<FetchWeights> for State<FetchWeights> {
    fn into_phase(self, io: PhaseIo) -> Phase<FetchWeights> {
        Phase::<_>::new(self, io)
    }
}

#[async_trait]
impl Step for Phase<FetchWeights> {
    async fn step(mut self) -> TransitionOutcome {
        info!("fetch weights task");
        let started = Instant::now();
        match self.load_weights().await {
            Ok(()) => {
                info!("loaded the global weights in {:?}", started.elapsed());
                TransitionOutcome::Complete(self.into_train().into())
            }
            Err(e) => self.abort(e).into(),
        }
    }
}

impl Phase<FetchWeights> {
    async fn load_weights(&mut self) -> Result<(), ProtocolError> {
        let project = self.state.shared.settings.project_id;
        let content_hash = self.io.join_return(project).await?;
        debug!("fetching the global weights {}", content_hash);
        let stored = self.io.get(&content_hash).await?;
        let artifact = Artifact::fetched(ArtifactKind::Weights, content_hash, stored);
        let payload = artifact.open(self.state.shared.session_key().as_slice())?;
        let shapes = self.io.weight_shapes().await?;
        let weights = decode_weights(&payload, &shapes)?;
        self.io.set_weights(weights).await?;
        Ok(())
    }

    fn into_train(self) -> Phase<Train> {
        State::new(self.state.shared, Box::new(Train)).into_phase(self.io)
    }
}
