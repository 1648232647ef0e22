use async_trait::async_trait;
use tracing::info;

use crate::state_machine::{
    IntoPhase,
    Join,
    Phase,
    PhaseIo,
    RoundPhase,
    RoundState,
    State,
    Step,
    TransitionOutcome,
};

/// Waiting for the project to accept participants.
#[derive(Debug)]
pub struct Awaiting;

impl RoundPhase for Awaiting {
    const STATE: RoundState = RoundState::WaitForTrainable;
}

impl IntoPhase<Awaiting> for State<Awaiting> {
    fn into_phase(self, io: PhaseIo) -> Phase<Awaiting> {
        Phase::<_>::new(self, io)
    }
}

#[async_trait]
impl Step for Phase<Awaiting> {
    async fn step(mut self) -> TransitionOutcome {
        if self.state.shared.trainable {
            info!("project is trainable, going to join phase");
            self.state.shared.trainable = false;
            return TransitionOutcome::Complete(self.into_join().into());
        }

        info!("project is not trainable, waiting for a global model update");
        let project = self.state.shared.settings.project_id;
        match self
            .state
            .shared
            .watcher
            .watch(&mut self.io, |event| event.is_global_update_for(project))
            .await
        {
            Ok(event) => {
                info!(
                    "global model of iteration {} published, going to join phase",
                    event.iteration()
                );
                TransitionOutcome::Complete(self.into_join().into())
            }
            Err(e) => {
                info!("{}", e);
                TransitionOutcome::Pending(self.into())
            }
        }
    }
}

impl Phase<Awaiting> {
    fn into_join(self) -> Phase<Join> {
        State::new(self.state.shared, Box::new(Join::new())).into_phase(self.io)
    }
}

#[cfg(test)]
mod tests {
    use mockall::Sequence;

    use super::*;
    use crate::{
        state_machine::{
            testutils::{agreed_shared_state, global_update, PROJECT_ID},
            MockIO,
            SharedState,
        },
        unwrap_step,
    };

    fn make_phase(shared: SharedState) -> Phase<Awaiting> {
        State::new(Box::new(shared), Box::new(Awaiting)).into_phase(Box::new(MockIO::new()))
    }

    #[tokio::test]
    async fn test_trainable_flag_is_consumed_once() {
        let mut shared = agreed_shared_state(None);
        shared.trainable = true;
        let mut phase = make_phase(shared);
        phase.with_io_mock(|mock| {
            // no poll of the event log, only the notification of the join phase
            mock.expect_notify_new_round().times(1).return_const(());
        });

        let mut phase = unwrap_step!(phase, complete, join);
        assert!(!phase.state.shared.trainable);
        phase.check_io_mock();

        // Going back to the awaiting phase now waits for an update
        let mut phase = phase.into_awaiting();
        phase.with_io_mock(|mock| {
            mock.expect_new_entries()
                .times(1)
                .returning(|| Ok(vec![global_update(PROJECT_ID)]));
            mock.expect_notify_new_round().times(1).return_const(());
        });
        unwrap_step!(phase, complete, join);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_global_update() {
        let mut phase = make_phase(agreed_shared_state(None));
        phase.with_io_mock(|mock| {
            let mut seq = Sequence::new();
            mock.expect_new_entries()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|| Ok(vec![]));
            // an update of another project does not end the wait
            mock.expect_new_entries()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|| Ok(vec![global_update(PROJECT_ID + 1)]));
            mock.expect_new_entries()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|| Ok(vec![global_update(PROJECT_ID)]));
            mock.expect_notify_new_round().times(1).return_const(());
        });

        let phase = unwrap_step!(phase, complete, join);
        assert!(phase.state.private.tx_hash.is_none());
    }

    #[tokio::test]
    async fn test_wait_cancelled() {
        let mut phase = make_phase(agreed_shared_state(None));
        let cancel = tokio_util::sync::CancellationToken::new();
        cancel.cancel();
        phase.state.shared.watcher.rearm(cancel);
        phase.check_io_mock();

        // A cancelled wait leaves the phase unchanged
        unwrap_step!(phase, pending, awaiting);
    }
}
