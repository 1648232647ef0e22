use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{
    artifact::{decode_architecture, Artifact, ArtifactKind},
    state_machine::{
        FetchWeights,
        IntoPhase,
        Phase,
        PhaseIo,
        ProtocolError,
        RoundPhase,
        RoundState,
        State,
        Step,
        TransitionOutcome,
    },
};

/// Loading the model architecture, on the first round only.
#[derive(Debug)]
pub struct FetchArchitecture;

impl RoundPhase for FetchArchitecture {
    const STATE: RoundState = RoundState::FetchArchitecture;
}

impl IntoPhase<FetchArchitecture> for State<FetchArchitecture> {
    fn into_phase(self, io: PhaseIo) -> Phase<FetchArchitecture> {
        Phase::<_>::new(self, io)
    }
}

#[async_trait]
impl Step for Phase<FetchArchitecture> {
    async fn step(mut self) -> TransitionOutcome {
        info!("fetch architecture task");
        let started = Instant::now();
        match self.load_architecture().await {
            Ok(()) => {
                info!("loaded the model architecture in {:?}", started.elapsed());
                self.state.shared.has_model = true;
                TransitionOutcome::Complete(self.into_fetch_weights().into())
            }
            Err(e) => self.abort(e).into(),
        }
    }
}

impl Phase<FetchArchitecture> {
    async fn load_architecture(&mut self) -> Result<(), ProtocolError> {
        let project = self.state.shared.settings.project_id;
        let content_hash = self.io.participate_return(project).await?;
        debug!("fetching the model architecture {}", content_hash);
        let stored = self.io.get(&content_hash).await?;
        let artifact = Artifact::fetched(ArtifactKind::Architecture, content_hash, stored);
        let payload = artifact.open(self.state.shared.session_key().as_slice())?;
        let architecture = decode_architecture(payload)?;
        self.io.load_architecture(architecture).await?;
        Ok(())
    }

    fn into_fetch_weights(self) -> Phase<FetchWeights> {
        State::new(self.state.shared, Box::new(FetchWeights)).into_phase(self.io)
    }
}
