use derive_more::Display;
use thiserror::Error;

use crate::{
    artifact::CodecError,
    crypto::{CipherError, KeyError, SessionKeyError},
    ledger::{Iteration, LedgerError, ProjectId},
    store::StoreError,
};

/// The phases of a training cycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display)]
pub enum RoundState {
    #[display(fmt = "INIT")]
    Init,
    #[display(fmt = "WAIT_FOR_TRAINABLE")]
    WaitForTrainable,
    #[display(fmt = "JOIN")]
    Join,
    #[display(fmt = "FETCH_ARCHITECTURE")]
    FetchArchitecture,
    #[display(fmt = "FETCH_WEIGHTS")]
    FetchWeights,
    #[display(fmt = "TRAIN")]
    Train,
    #[display(fmt = "UPLOAD")]
    Upload,
    #[display(fmt = "PUBLISH_REFERENCE")]
    PublishReference,
    #[display(fmt = "COMPLETED")]
    Completed,
}

/// Where a participant stands in a project.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
#[display(fmt = "project {} iteration {} ({})", project_id, iteration, state)]
pub struct Round {
    pub project_id: ProjectId,
    /// The number of cycles completed so far.
    pub iteration: Iteration,
    pub state: RoundState,
}

#[derive(Error, Debug)]
#[error("ML engine failed: {0}")]
/// An error returned by the [`MlEngine`](crate::MlEngine) of the participant.
pub struct EngineError(#[from] pub Box<dyn std::error::Error + Send + Sync>);

#[derive(Error, Debug)]
/// An error that aborts a training cycle.
pub enum ProtocolError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    SessionKey(#[from] SessionKeyError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Error, Debug)]
#[error("{state} failed for project {project_id} at iteration {iteration}: {source}")]
/// A [`ProtocolError`] together with the round it occurred in.
pub struct RoundError {
    pub project_id: ProjectId,
    pub iteration: Iteration,
    pub state: RoundState,
    pub source: ProtocolError,
}

impl RoundError {
    pub fn round(&self) -> Round {
        Round {
            project_id: self.project_id,
            iteration: self.iteration,
            state: self.state,
        }
    }
}
