use async_trait::async_trait;
use tracing::{debug, info};

use crate::state_machine::{
    IntoPhase,
    Phase,
    PhaseIo,
    Progress,
    RoundPhase,
    RoundState,
    State,
    Step,
    TransitionOutcome,
};

/// The first phase of the participant: the key agreement with the
/// aggregator of the project.
#[derive(Debug)]
pub struct Init;

impl RoundPhase for Init {
    const STATE: RoundState = RoundState::Init;
}

impl IntoPhase<Init> for State<Init> {
    fn into_phase(self, io: PhaseIo) -> Phase<Init> {
        Phase::<_>::new(self, io)
    }
}

#[async_trait]
impl Step for Phase<Init> {
    async fn step(mut self) -> TransitionOutcome {
        info!("init task");
        self = try_progress!(self.agree_on_secret().await);

        let project = self.state.shared.settings.project_id;
        match self.io.is_trainable(project).await {
            Ok(trainable) => {
                info!("project trainable: {}, going to awaiting phase", trainable);
                self.state.shared.trainable = trainable;
                TransitionOutcome::Complete(self.into_awaiting().into())
            }
            Err(e) => self.abort(e).into(),
        }
    }
}

impl Phase<Init> {
    async fn agree_on_secret(mut self) -> Progress<Init> {
        if self.state.shared.shared_secret.is_some() {
            debug!("already share a secret with the aggregator, continuing");
            return Progress::Continue(self);
        }

        debug!("fetching the public key of the aggregator");
        let project = self.state.shared.settings.project_id;
        let main_pk = match self.io.get_main_pk(project).await {
            Ok(main_pk) => main_pk,
            Err(e) => return self.abort(e).into(),
        };
        match self.state.shared.keys.secret.shared_secret_with_hex(&main_pk) {
            Ok(secret) => {
                info!("established the shared secret with the aggregator");
                self.state.shared.shared_secret = Some(secret);
                Progress::Updated(self.into())
            }
            Err(e) => self.abort(e).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use super::*;
    use crate::{
        ledger::LedgerError,
        state_machine::{
            testutils::{
                aggregator_keys,
                agreed_shared_state,
                shared_secret,
                shared_state,
                PROJECT_ID,
            },
            MockIO,
            ProtocolError,
            SharedState,
            StateMachine,
        },
        unwrap_as,
        unwrap_progress_continue,
        unwrap_step,
        unwrap_step_failed,
    };

    fn make_phase(shared: SharedState) -> Phase<Init> {
        State::new(Box::new(shared), Box::new(Init)).into_phase(Box::new(MockIO::new()))
    }

    #[tokio::test]
    async fn test_agree_then_check_trainable() {
        let mut phase = make_phase(shared_state(None));
        phase.with_io_mock(|mock| {
            mock.expect_get_main_pk()
                .with(eq(PROJECT_ID))
                .times(1)
                .returning(|_| Ok(aggregator_keys().public.to_hex()));
        });

        // First step: the key agreement
        let mut phase = unwrap_step!(phase, complete, init);
        assert_eq!(phase.state.shared.shared_secret, Some(shared_secret()));
        phase.check_io_mock();

        // Calling `agree_on_secret` again should return Progress::Continue
        let mut phase = unwrap_progress_continue!(phase, agree_on_secret, async);

        // Second step: the trainable check
        phase.with_io_mock(|mock| {
            mock.expect_is_trainable()
                .with(eq(PROJECT_ID))
                .times(1)
                .returning(|_| Ok(true));
        });
        let phase = unwrap_step!(phase, complete, awaiting);
        assert!(phase.state.shared.trainable);
    }

    #[tokio::test]
    async fn test_not_trainable() {
        let mut phase = make_phase(agreed_shared_state(None));
        phase.with_io_mock(|mock| {
            mock.expect_is_trainable().times(1).returning(|_| Ok(false));
        });
        let phase = unwrap_step!(phase, complete, awaiting);
        assert!(!phase.state.shared.trainable);
    }

    #[tokio::test]
    async fn test_invalid_aggregator_key() {
        let mut phase = make_phase(shared_state(None));
        phase.with_io_mock(|mock| {
            mock.expect_get_main_pk()
                .times(1)
                .returning(|_| Ok("04deadbeef".to_string()));
            mock.expect_notify_failed().times(1).return_const(());
        });

        let (state_machine, error) = unwrap_step_failed!(phase);
        assert_eq!(error.state, RoundState::Init);
        assert!(matches!(error.source, ProtocolError::Key(_)));
        // Without a shared secret, the cycle restarts from the key agreement
        let phase = unwrap_as!(state_machine, StateMachine::Init);
        assert!(phase.state.shared.shared_secret.is_none());
    }

    #[tokio::test]
    async fn test_trainable_check_fails_after_agreement() {
        let mut phase = make_phase(agreed_shared_state(None));
        phase.with_io_mock(|mock| {
            mock.expect_is_trainable()
                .times(1)
                .returning(|_| Err(LedgerError::Connection("connection refused".into())));
            mock.expect_notify_failed().times(1).return_const(());
        });

        let (state_machine, error) = unwrap_step_failed!(phase);
        assert!(matches!(
            error.source,
            ProtocolError::Ledger(LedgerError::Connection(_))
        ));
        // The secret survives the abort, so the key agreement is not repeated
        let phase = unwrap_as!(state_machine, StateMachine::Awaiting);
        assert_eq!(phase.state.shared.shared_secret, Some(shared_secret()));
    }
}
