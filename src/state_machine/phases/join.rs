use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{
    crypto::SessionKey,
    ledger::{ContractCall, LedgerError, TxHash, Wei, WEI_PER_ETHER},
    state_machine::{
        FetchArchitecture,
        FetchWeights,
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
};

/// Joining a round: the join transaction is submitted, then the
/// session key of the round is received, then the transaction is
/// confirmed.
#[derive(Debug)]
pub struct Join {
    pub tx_hash: Option<TxHash>,
    /// Held here until the join transaction is confirmed.
    pub session_key: Option<SessionKey>,
    pub started: Instant,
}

impl Join {
    pub fn new() -> Self {
        Self {
            tx_hash: None,
            session_key: None,
            started: Instant::now(),
        }
    }

    fn has_submitted(&self) -> bool {
        self.tx_hash.is_some()
    }

    fn has_session_key(&self) -> bool {
        self.session_key.is_some()
    }
}

impl Default for Join {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundPhase for Join {
    const STATE: RoundState = RoundState::Join;
}

impl IntoPhase<Join> for State<Join> {
    fn into_phase(self, mut io: PhaseIo) -> Phase<Join> {
        if !self.private.has_submitted() {
            io.notify_new_round(self.shared.iteration);
        }
        Phase::<_>::new(self, io)
    }
}

#[async_trait]
impl Step for Phase<Join> {
    async fn step(mut self) -> TransitionOutcome {
        info!("join task");
        self = try_progress!(self.submit_join().await);
        self = try_progress!(self.receive_session_key().await);

        // UNWRAP_SAFE: the hash is set in `self.submit_join()`
        let tx_hash = self.state.private.tx_hash.clone().unwrap();
        match self.io.wait_for_receipt(&tx_hash).await {
            Ok(receipt) if receipt.status => {
                info!(
                    "joined in {:?} (block {:?})",
                    self.state.private.started.elapsed(),
                    receipt.block_number
                );
                self.state.shared.session_key = self.state.private.session_key.take();
                self.io.notify_joined();
                if self.state.shared.has_model {
                    debug!("model architecture already loaded, going to fetch weights phase");
                    TransitionOutcome::Complete(self.into_fetch_weights().into())
                } else {
                    TransitionOutcome::Complete(self.into_fetch_architecture().into())
                }
            }
            Ok(_) => self
                .abort(LedgerError::TransactionRejected(format!(
                    "join transaction {} reverted",
                    tx_hash
                )))
                .into(),
            Err(e) => self.abort(e).into(),
        }
    }
}

impl Phase<Join> {
    async fn submit_join(mut self) -> Progress<Join> {
        if self.state.private.has_submitted() {
            debug!("already submitted the join transaction, continuing");
            return Progress::Continue(self);
        }

        let value = if self.state.shared.has_model {
            None
        } else {
            match self.join_fee().await {
                Ok(fee) => Some(fee),
                Err(e) => return self.abort(e).into(),
            }
        };
        let call = ContractCall::Join {
            project_id: self.state.shared.settings.project_id,
            public_key: self.state.shared.keys.public.to_hex(),
        };
        let params = self.state.shared.settings.transaction.params(value);

        debug!("submitting the join transaction (value: {:?} wei)", value);
        match self.io.submit(call, params).await {
            Ok(tx_hash) => {
                info!("submitted the join transaction {}", tx_hash);
                self.state.private.tx_hash = Some(tx_hash);
                Progress::Updated(self.into())
            }
            Err(e) => self.abort(e).into(),
        }
    }

    /// The one time fee, paid on the first join: a tenth of the
    /// participation amount, which the contract returns in ether.
    async fn join_fee(&mut self) -> Result<Wei, LedgerError> {
        let amount = self
            .io
            .before_join(self.state.shared.settings.project_id)
            .await?;
        amount
            .checked_mul(WEI_PER_ETHER)
            .map(|wei| wei / 10)
            .ok_or_else(|| {
                LedgerError::InvalidResponse(format!("participation amount {} overflows", amount))
            })
    }

    async fn receive_session_key(mut self) -> Progress<Join> {
        if self.state.private.has_session_key() {
            debug!("already received the session key, continuing");
            return Progress::Continue(self);
        }

        debug!("waiting for the session key");
        let project = self.state.shared.settings.project_id;
        let address = self.state.shared.settings.address;
        let encrypted_key = match self
            .state
            .shared
            .watcher
            .watch_map(&mut self.io, |event| {
                event
                    .encrypted_key_for(project, &address)
                    .map(str::to_string)
            })
            .await
        {
            Ok(encrypted_key) => encrypted_key,
            Err(e) => {
                info!("{}", e);
                return Progress::Stuck(self);
            }
        };

        match SessionKey::recover(&encrypted_key, self.state.shared.shared_secret()) {
            Ok(session_key) => {
                info!("received the session key");
                self.state.private.session_key = Some(session_key);
                Progress::Updated(self.into())
            }
            Err(e) => self.abort(e).into(),
        }
    }

    fn into_fetch_architecture(self) -> Phase<FetchArchitecture> {
        State::new(self.state.shared, Box::new(FetchArchitecture)).into_phase(self.io)
    }

    fn into_fetch_weights(self) -> Phase<FetchWeights> {
        State::new(self.state.shared, Box::new(FetchWeights)).into_phase(self.io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::{encrypt, SessionKeyError},
        state_machine::{
            testutils::{
                address,
                agreed_shared_state,
                encrypted_session_key,
                global_update,
                joined_shared_state,
                key_delivery,
                other_address,
                participant_keys,
                receipt,
                session_key,
                shared_secret,
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

    /// Instantiate a join phase.
    fn make_phase(shared: SharedState, join: Join) -> Phase<Join> {
        // Check IntoPhase<Join> implementation
        let mut mock = MockIO::new();
        if !join.has_submitted() {
            mock.expect_notify_new_round().times(1).return_const(());
        }
        let mut phase = State::new(Box::new(shared), Box::new(join)).into_phase(Box::new(mock));
        phase.check_io_mock();
        phase
    }

    fn tx_hash() -> TxHash {
        TxHash::from("0x5e1f".to_string())
    }

    fn submitted() -> Join {
        Join {
            tx_hash: Some(tx_hash()),
            session_key: Some(session_key()),
            started: Instant::now(),
        }
    }

    #[tokio::test]
    async fn test_first_join() {
        let mut phase = make_phase(agreed_shared_state(None), Join::new());

        // Step 1: the join transaction, carrying the fee
        phase.with_io_mock(|mock| {
            mock.expect_before_join().times(1).returning(|_| Ok(5));
            mock.expect_submit()
                .withf(|call, params| {
                    *call
                        == ContractCall::Join {
                            project_id: PROJECT_ID,
                            public_key: participant_keys().public.to_hex(),
                        }
                        && params.value == Some(500_000_000_000_000_000)
                })
                .times(1)
                .returning(|_, _| Ok(tx_hash()));
        });
        let mut phase = unwrap_step!(phase, complete, join);
        assert_eq!(phase.state.private.tx_hash, Some(tx_hash()));
        phase.check_io_mock();
        let mut phase = unwrap_progress_continue!(phase, submit_join, async);

        // Step 2: the session key. Deliveries to other participants are skipped
        phase.with_io_mock(|mock| {
            mock.expect_new_entries().times(1).returning(|| {
                Ok(vec![
                    key_delivery(other_address(), "bm90IGZvciB1cw==".into()),
                    key_delivery(address(), encrypted_session_key()),
                ])
            });
        });
        let mut phase = unwrap_step!(phase, complete, join);
        assert_eq!(phase.state.private.session_key, Some(session_key()));
        // the key is only installed once the transaction is confirmed
        assert!(phase.state.shared.session_key.is_none());
        phase.check_io_mock();
        let mut phase = unwrap_progress_continue!(phase, receive_session_key, async);

        // Step 3: the receipt
        phase.with_io_mock(|mock| {
            mock.expect_wait_for_receipt()
                .times(1)
                .returning(|tx_hash| Ok(receipt(tx_hash, true)));
            mock.expect_notify_joined().times(1).return_const(());
        });
        let phase = unwrap_step!(phase, complete, fetch_architecture);
        assert_eq!(phase.state.shared.session_key, Some(session_key()));
    }

    #[tokio::test]
    async fn test_rejoin_without_fee() {
        let mut shared = joined_shared_state(None);
        shared.session_key = None;
        let mut phase = make_phase(shared, Join::new());
        phase.with_io_mock(|mock| {
            mock.expect_submit()
                .withf(|_, params| params.value.is_none())
                .times(1)
                .returning(|_, _| Ok(tx_hash()));
        });
        let mut phase = unwrap_step!(phase, complete, join);
        assert!(phase.state.private.has_submitted());

        phase.state.private.session_key = Some(session_key());
        phase.with_io_mock(|mock| {
            mock.expect_wait_for_receipt()
                .times(1)
                .returning(|tx_hash| Ok(receipt(tx_hash, true)));
            mock.expect_notify_joined().times(1).return_const(());
        });
        unwrap_step!(phase, complete, fetch_weights);
    }

    #[tokio::test]
    async fn test_reverted_join() {
        let mut phase = make_phase(agreed_shared_state(None), submitted());
        phase.with_io_mock(|mock| {
            mock.expect_wait_for_receipt()
                .times(1)
                .returning(|tx_hash| Ok(receipt(tx_hash, false)));
            mock.expect_notify_failed().times(1).return_const(());
        });

        let (state_machine, error) = unwrap_step_failed!(phase);
        assert_eq!(error.state, RoundState::Join);
        assert!(matches!(
            error.source,
            ProtocolError::Ledger(LedgerError::TransactionRejected(_))
        ));
        let phase = unwrap_as!(state_machine, StateMachine::Awaiting);
        assert!(phase.state.shared.session_key.is_none());
    }

    #[tokio::test]
    async fn test_participation_amount_overflow() {
        let mut phase = make_phase(agreed_shared_state(None), Join::new());
        phase.with_io_mock(|mock| {
            mock.expect_before_join()
                .times(1)
                .returning(|_| Ok(u128::MAX));
            mock.expect_notify_failed().times(1).return_const(());
        });

        let (_, error) = unwrap_step_failed!(phase);
        assert!(matches!(
            error.source,
            ProtocolError::Ledger(LedgerError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_session_key_of_invalid_length() {
        let mut join = submitted();
        join.session_key = None;
        let mut phase = make_phase(agreed_shared_state(None), join);
        phase.with_io_mock(|mock| {
            mock.expect_new_entries().times(1).returning(|| {
                let short_key = encrypt(
                    hex::encode([0x42_u8; 8]).as_bytes(),
                    shared_secret().as_slice(),
                )
                .unwrap();
                // other events never end the wait for the key
                Ok(vec![
                    global_update(PROJECT_ID),
                    key_delivery(address(), short_key),
                ])
            });
            // the join is not confirmed with an unusable key
            mock.expect_wait_for_receipt().never();
            mock.expect_notify_joined().never();
            mock.expect_notify_failed().times(1).return_const(());
        });

        let (state_machine, error) = unwrap_step_failed!(phase);
        assert_eq!(error.state, RoundState::Join);
        assert!(matches!(
            error.source,
            ProtocolError::SessionKey(SessionKeyError::InvalidLength(8))
        ));
        let phase = unwrap_as!(state_machine, StateMachine::Awaiting);
        assert!(phase.state.shared.session_key.is_none());
    }

    #[tokio::test]
    async fn test_undecryptable_session_key() {
        let mut join = submitted();
        join.session_key = None;
        let mut phase = make_phase(agreed_shared_state(None), join);
        phase.with_io_mock(|mock| {
            mock.expect_new_entries()
                .times(1)
                .returning(|| Ok(vec![key_delivery(address(), "not base64!".into())]));
            mock.expect_notify_failed().times(1).return_const(());
        });

        let (state_machine, error) = unwrap_step_failed!(phase);
        assert!(matches!(error.source, ProtocolError::SessionKey(_)));
        unwrap_as!(state_machine, StateMachine::Awaiting);
    }
}
