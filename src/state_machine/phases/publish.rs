use async_trait::async_trait;
use tracing::{debug, info};

use crate::{
    ledger::{ContractCall, LedgerError, TxHash},
    state_machine::{
        Completed,
        IntoPhase,
        Phase,
        PhaseIo,
        Progress,
        RoundPhase,
        RoundState,
        State,
        Step,
        TransitionOutcome,
    },
    store::ContentHash,
};

/// Referencing the uploaded weights on the ledger.
///
/// This phase can only be built from the content hash returned by
/// the store, so the reference is never published before the
/// weights are stored.
#[derive(Debug)]
pub struct Publish {
    pub content_hash: ContentHash,
    pub tx_hash: Option<TxHash>,
}

impl Publish {
    pub fn new(content_hash: ContentHash) -> Self {
        Self {
            content_hash,
            tx_hash: None,
        }
    }

    fn has_submitted(&self) -> bool {
        self.tx_hash.is_some()
    }
}

impl RoundPhase for Publish {
    const STATE: RoundState = RoundState::PublishReference;
}

impl IntoPhase<Publish> for State<Publish> {
    fn into_phase(self, io: PhaseIo) -> Phase<Publish> {
        Phase::<_>::new(self, io)
    }
}

#[async_trait]
impl Step for Phase<Publish> {
    async fn step(mut self) -> TransitionOutcome {
        info!("publish task");
        self = try_progress!(self.submit_local_upload().await);

        // UNWRAP_SAFE: the hash is set in `self.submit_local_upload()`
        let tx_hash = self.state.private.tx_hash.clone().unwrap();
        match self.io.wait_for_receipt(&tx_hash).await {
            Ok(receipt) if receipt.status => {
                info!("published the local weights {}", self.state.private.content_hash);
                self.io.notify_published(&self.state.private.content_hash);
                self.complete_cycle()
            }
            Ok(_) => self
                .abort(LedgerError::TransactionRejected(format!(
                    "local upload transaction {} reverted",
                    tx_hash
                )))
                .into(),
            Err(e) => self.abort(e).into(),
        }
    }
}

impl Phase<Publish> {
    async fn submit_local_upload(mut self) -> Progress<Publish> {
        if self.state.private.has_submitted() {
            debug!("already submitted the local upload transaction, continuing");
            return Progress::Continue(self);
        }

        let call = ContractCall::LocalUpload {
            project_id: self.state.shared.settings.project_id,
            content_hash: self.state.private.content_hash.clone(),
        };
        let params = self.state.shared.settings.transaction.params(None);
        match self.io.submit(call, params).await {
            Ok(tx_hash) => {
                info!("submitted the local upload transaction {}", tx_hash);
                self.state.private.tx_hash = Some(tx_hash);
                Progress::Updated(self.into())
            }
            Err(e) => self.abort(e).into(),
        }
    }

    fn complete_cycle(mut self) -> TransitionOutcome {
        self.state.shared.iteration += 1;
        let iteration = self.state.shared.iteration;
        match self.state.shared.settings.max_rounds {
            Some(max_rounds) if iteration >= max_rounds => {
                info!("completed {} rounds, going to completed phase", iteration);
                TransitionOutcome::Complete(self.into_completed().into())
            }
            _ => {
                info!("completed round {}, going back to awaiting phase", iteration);
                TransitionOutcome::Complete(self.into_awaiting().into())
            }
        }
    }

    fn into_completed(self) -> Phase<Completed> {
        State::new(self.state.shared, Box::new(Completed)).into_phase(self.io)
    }
}
