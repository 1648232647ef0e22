use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{
    artifact::{encode_weights, Artifact, ArtifactKind},
    state_machine::{
        IntoPhase,
        Phase,
        PhaseIo,
        ProtocolError,
        Progress,
        Publish,
        RoundPhase,
        RoundState,
        State,
        Step,
        TransitionOutcome,
    },
    store::ContentHash,
};

/// Writing the locally trained weights to the store.
///
/// Unlike the artifacts of the aggregator, the local weights are
/// encrypted under the secret shared with the aggregator, so that
/// only the aggregator can read them.
#[derive(Debug)]
pub struct Upload {
    pub artifact: Option<Artifact>,
    pub started: Instant,
}

impl Upload {
    pub fn new() -> Self {
        Self {
            artifact: None,
            started: Instant::now(),
        }
    }

    fn has_sealed_weights(&self) -> bool {
        self.artifact.is_some()
    }
}

impl Default for Upload {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundPhase for Upload {
    const STATE: RoundState = RoundState::Upload;
}

impl IntoPhase<Upload> for State<Upload> {
    fn into_phase(self, io: PhaseIo) -> Phase<Upload> {
        Phase::<_>::new(self, io)
    }
}

#[async_trait]
impl Step for Phase<Upload> {
    async fn step(mut self) -> TransitionOutcome {
        info!("upload task");
        self = try_progress!(self.seal_weights().await);

        // UNWRAP_SAFE: the artifact is set in `self.seal_weights()`
        let artifact = self.state.private.artifact.take().unwrap();
        match self.io.put(artifact.payload).await {
            Ok(content_hash) => {
                info!(
                    "uploaded the local weights to {} in {:?}",
                    content_hash,
                    self.state.private.started.elapsed()
                );
                TransitionOutcome::Complete(self.into_publish(content_hash).into())
            }
            Err(e) => self.abort(e).into(),
        }
    }
}

impl Phase<Upload> {
    async fn seal_weights(mut self) -> Progress<Upload> {
        if self.state.private.has_sealed_weights() {
            debug!("already sealed the local weights, continuing");
            return Progress::Continue(self);
        }

        debug!("sealing the local weights");
        match self.sealed_weights().await {
            Ok(artifact) => {
                self.state.private.artifact = Some(artifact);
                Progress::Updated(self.into())
            }
            Err(e) => self.abort(e).into(),
        }
    }

    async fn sealed_weights(&mut self) -> Result<Artifact, ProtocolError> {
        let weights = self.io.weights().await?;
        let payload = encode_weights(&weights)?;
        let key = self.state.shared.shared_secret().as_slice();
        Ok(Artifact::seal(ArtifactKind::Weights, &payload, key)?)
    }

    fn into_publish(self, content_hash: ContentHash) -> Phase<Publish> {
        State::new(self.state.shared, Box::new(Publish::new(content_hash))).into_phase(self.io)
    }
}
