//! Waiting for ledger events.
//!
//! The ledger is only observed by polling: an [`EventWatcher`] repeatedly asks an [`EventLog`]
//! for the events emitted since the previous poll, until one of them satisfies a predicate.

use std::{collections::VecDeque, time::Duration};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{ledger::LedgerEvent, EventLog};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("the wait for a ledger event was cancelled")]
pub struct Cancelled;

/// Polls an [`EventLog`] until an event matches.
///
/// There is no timeout: a wait only ends when an event matches or when the cancellation token
/// is cancelled. Failures to poll the log are logged and retried on the next tick.
#[derive(Debug)]
pub struct EventWatcher {
    poll_interval: Duration,
    cancel: CancellationToken,
    /// Events that were received after a match and not examined yet.
    backlog: VecDeque<LedgerEvent>,
}

impl EventWatcher {
    pub fn new(poll_interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            poll_interval,
            cancel,
            backlog: VecDeque::new(),
        }
    }

    /// Replaces the cancellation token, so that a cancelled watcher can be used again.
    pub fn rearm(&mut self, cancel: CancellationToken) {
        self.cancel = cancel;
    }

    /// Waits for the first event that satisfies `predicate`.
    ///
    /// Events are examined in the order in which the log returns them. Events that precede the
    /// match are discarded. Events that follow it in the same batch are kept, and examined
    /// first by the next call.
    ///
    /// The wait does not start from the current head of the ledger: it examines everything the
    /// log has not returned yet, together with the leftovers of earlier waits. Events emitted
    /// while the participant was busy in another phase are therefore replayed, so that an
    /// update published during training still ends the next wait for a global model.
    ///
    /// # Errors
    /// Fails with [`Cancelled`] if the token was cancelled before a match was found.
    pub async fn watch<L, F>(
        &mut self,
        log: &mut L,
        mut predicate: F,
    ) -> Result<LedgerEvent, Cancelled>
    where
        L: EventLog + Send + ?Sized,
        F: FnMut(&LedgerEvent) -> bool + Send,
    {
        self.watch_map(log, |event| if predicate(&event) { Some(event) } else { None })
            .await
    }

    /// Waits for the first event that `extract` maps to a value, and returns that value.
    ///
    /// This is [`EventWatcher::watch`] for callers that need a field of a specific event kind.
    ///
    /// # Errors
    /// Fails with [`Cancelled`] if the token was cancelled before a match was found.
    pub async fn watch_map<L, F, T>(&mut self, log: &mut L, mut extract: F) -> Result<T, Cancelled>
    where
        L: EventLog + Send + ?Sized,
        F: FnMut(LedgerEvent) -> Option<T> + Send,
        T: Send,
    {
        while let Some(event) = self.backlog.pop_front() {
            if let Some(value) = extract(event) {
                return Ok(value);
            }
        }

        loop {
            if self.cancel.is_cancelled() {
                return Err(Cancelled);
            }

            match log.new_entries().await {
                Ok(events) => {
                    let mut events = events.into_iter();
                    if let Some(value) = events.by_ref().find_map(&mut extract) {
                        self.backlog.extend(events);
                        return Ok(value);
                    }
                    debug!("no matching event, polling again in {:?}", self.poll_interval);
                }
                Err(e) => warn!("failed to poll the event log: {}", e),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio_test::assert_pending;

    use super::*;
    use crate::ledger::{Address, LedgerError};

    /// An event log that returns a scripted sequence of poll results.
    struct ScriptedLog {
        polls: VecDeque<Result<Vec<LedgerEvent>, LedgerError>>,
        calls: usize,
    }

    impl ScriptedLog {
        fn new(polls: Vec<Result<Vec<LedgerEvent>, LedgerError>>) -> Self {
            Self {
                polls: polls.into(),
                calls: 0,
            }
        }
    }

    #[async_trait]
    impl EventLog for ScriptedLog {
        async fn new_entries(&mut self) -> Result<Vec<LedgerEvent>, LedgerError> {
            self.calls += 1;
            self.polls.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn manager() -> Address {
        "0x269b67838C6c63bE752c4Aa71682D481817Bec45".parse().unwrap()
    }

    fn update(project_id: u64, iteration: u64) -> LedgerEvent {
        LedgerEvent::GlobalModelUpdated {
            manager_address: manager(),
            project_id,
            iteration,
        }
    }

    fn watcher() -> EventWatcher {
        EventWatcher::new(Duration::from_secs(2), CancellationToken::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_match_wins() {
        let mut log = ScriptedLog::new(vec![Ok(vec![update(6, 0), update(5, 1), update(5, 2)])]);
        let mut watcher = watcher();

        let event = watcher.watch(&mut log, |e| e.is_global_update_for(5)).await.unwrap();
        assert_eq!(event, update(5, 1));
        assert_eq!(log.calls, 1);

        // the remaining event of the batch is not lost
        let event = watcher.watch(&mut log, |e| e.is_global_update_for(5)).await.unwrap();
        assert_eq!(event, update(5, 2));
        assert_eq!(log.calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_map_extracts_the_first_match() {
        let client: Address = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".parse().unwrap();
        let key_delivery = |project_id, encrypted_key: &str| LedgerEvent::EncryptedKey {
            client_address: client,
            project_id,
            iteration: 0,
            encrypted_key: encrypted_key.to_string(),
        };
        let mut log = ScriptedLog::new(vec![
            Ok(vec![update(5, 0), key_delivery(6, "other project")]),
            Ok(vec![key_delivery(5, "first"), key_delivery(5, "second")]),
        ]);
        let mut watcher = watcher();

        let extract = |event: LedgerEvent| event.encrypted_key_for(5, &client).map(String::from);
        assert_eq!(watcher.watch_map(&mut log, extract).await.unwrap(), "first");
        assert_eq!(watcher.watch_map(&mut log, extract).await.unwrap(), "second");
        assert_eq!(log.calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_match() {
        let mut log = ScriptedLog::new(vec![
            Ok(vec![]),
            Ok(vec![update(6, 0)]),
            Ok(vec![update(5, 3)]),
        ]);
        let mut watcher = watcher();

        let start = tokio::time::Instant::now();
        let event = watcher.watch(&mut log, |e| e.is_global_update_for(5)).await.unwrap();
        assert_eq!(event, update(5, 3));
        assert_eq!(log.calls, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_matching_predicate_keeps_waiting() {
        let mut log = ScriptedLog::new(vec![Ok(vec![update(5, 0), update(6, 0)])]);
        let mut watcher = watcher();

        let mut wait = tokio_test::task::spawn(watcher.watch(&mut log, |_| false));
        for _ in 0..10 {
            assert_pending!(wait.poll());
            tokio::time::advance(Duration::from_millis(2001)).await;
        }
        assert_pending!(wait.poll());
        drop(wait);
        assert_eq!(log.calls, 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_errors_are_retried() {
        let mut log = ScriptedLog::new(vec![
            Err(LedgerError::Connection("connection refused".into())),
            Ok(vec![update(5, 0)]),
        ]);
        let mut watcher = watcher();

        let event = watcher.watch(&mut log, |e| e.is_global_update_for(5)).await.unwrap();
        assert_eq!(event, update(5, 0));
        assert_eq!(log.calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_poll() {
        let token = CancellationToken::new();
        let mut watcher = EventWatcher::new(Duration::from_secs(2), token.clone());
        let mut log = ScriptedLog::new(vec![Ok(vec![update(5, 0)])]);

        token.cancel();
        assert_eq!(
            watcher.watch(&mut log, |e| e.is_global_update_for(5)).await,
            Err(Cancelled)
        );
        assert_eq!(log.calls, 0);

        // a rearmed watcher polls again
        watcher.rearm(CancellationToken::new());
        assert!(watcher.watch(&mut log, |e| e.is_global_update_for(5)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let token = CancellationToken::new();
        let mut watcher = EventWatcher::new(Duration::from_secs(3600), token.clone());
        let mut log = ScriptedLog::new(vec![]);

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });
        let start = tokio::time::Instant::now();
        assert_eq!(
            watcher.watch(&mut log, |e| e.is_global_update_for(5)).await,
            Err(Cancelled)
        );
        assert!(start.elapsed() < Duration::from_secs(3600));
        assert_eq!(log.calls, 1);
        canceller.await.unwrap();
    }
}
