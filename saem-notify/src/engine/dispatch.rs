//! Single-message dispatch
//!
//! Wraps [`MessagingClient::deliver`] with a deadline and a bounded retry:
//! - transient failures (not connected, request never reached the bridge) are
//!   retried with exponential backoff
//! - a timeout is final; the bridge may already have accepted the message
//! - every dispatch is appended to the attempt log, whatever the outcome

use saem_common::config::MessagingConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::messaging::{MessagingClient, MessagingError};
use crate::outbox::{AttemptOutcome, DispatchTarget};
use crate::repository::AttemptLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    pub send_timeout: Duration,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from_config(&MessagingConfig::default())
    }
}

impl DispatchPolicy {
    pub fn from_config(config: &MessagingConfig) -> Self {
        Self {
            send_timeout: config.send_timeout(),
            max_attempts: config.max_send_attempts.max(1),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
        }
    }

    /// One try, no waiting
    pub fn single_attempt(send_timeout: Duration) -> Self {
        Self {
            send_timeout,
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    client: Arc<dyn MessagingClient>,
    attempts: Arc<dyn AttemptLog>,
    policy: DispatchPolicy,
}

impl Dispatcher {
    pub fn new(
        client: Arc<dyn MessagingClient>,
        attempts: Arc<dyn AttemptLog>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            client,
            attempts,
            policy,
        }
    }

    /// Send `message` to an already normalized `phone`. True only when the
    /// transport accepted the message.
    pub async fn dispatch(&self, phone: &str, message: &str, target: DispatchTarget<'_>) -> bool {
        let (result, tries) = self.deliver_with_retry(phone, message, &target).await;

        let attempt = match &result {
            Ok(()) => target.record(phone, AttemptOutcome::Sent, None, tries),
            Err(e) => target.record(phone, AttemptOutcome::Failed, Some(e.to_string()), tries),
        };
        if let Err(e) = self.attempts.record(&attempt).await {
            warn!(phone, error = %e, "Failed to record notification attempt");
        }

        match result {
            Ok(()) => {
                debug!(
                    phone,
                    template = %target.template,
                    item_id = target.item_id,
                    musician_id = target.musician_id,
                    tries,
                    "Message delivered"
                );
                true
            }
            Err(e) => {
                warn!(
                    phone,
                    template = %target.template,
                    item_id = target.item_id,
                    musician_id = target.musician_id,
                    tries,
                    error = %e,
                    "Message not delivered"
                );
                false
            }
        }
    }

    async fn deliver_with_retry(
        &self,
        phone: &str,
        message: &str,
        target: &DispatchTarget<'_>,
    ) -> (Result<(), MessagingError>, u32) {
        let mut attempt = 0;
        let mut backoff = self.policy.initial_backoff;

        loop {
            attempt += 1;

            if attempt > 1 {
                debug!(phone, attempt, template = %target.template, "Retrying send");
            }

            let delivery = self.client.deliver(phone, message);
            let result = match tokio::time::timeout(self.policy.send_timeout, delivery).await {
                Ok(result) => result,
                Err(_) => Err(MessagingError::Timeout(self.policy.send_timeout)),
            };

            match result {
                Ok(()) => return (Ok(()), attempt),
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    warn!(
                        phone,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Send failed, will retry after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.policy.max_backoff);
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::ConnectionStatus;
    use crate::outbox::TemplateKind;
    use crate::repository::DocumentStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted results, one per deliver call
    struct Scripted {
        results: Mutex<VecDeque<Result<(), MessagingError>>>,
        calls: Mutex<u32>,
        delay: Duration,
    }

    impl Scripted {
        fn new(results: Vec<Result<(), MessagingError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                calls: Mutex::new(0),
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl MessagingClient for Scripted {
        async fn initialize(&self) -> bool {
            true
        }

        fn status(&self) -> ConnectionStatus {
            ConnectionStatus {
                connected: true,
                state: "connected".to_string(),
                pairing_code: None,
                detail: None,
            }
        }

        async fn deliver(&self, _phone: &str, _message: &str) -> Result<(), MessagingError> {
            *self.calls.lock().unwrap() += 1;
            tokio::time::sleep(self.delay).await;
            self.results.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }

        async fn disconnect(&self) {}
    }

    fn policy(max_attempts: u32) -> DispatchPolicy {
        DispatchPolicy {
            send_timeout: Duration::from_millis(200),
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    fn dispatcher(client: Arc<Scripted>, log: Arc<DocumentStore>, max_attempts: u32) -> Dispatcher {
        Dispatcher::new(client, log, policy(max_attempts))
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let client = Arc::new(Scripted::new(vec![
            Err(MessagingError::Transport("connection refused".to_string())),
            Ok(()),
        ]));
        let log = Arc::new(DocumentStore::in_memory());

        let sent = dispatcher(client.clone(), log.clone(), 3)
            .dispatch("5511999998888", "oi", DispatchTarget::bare(TemplateKind::Test))
            .await;

        assert!(sent);
        assert_eq!(client.calls(), 2);
        let recent = log.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].outcome, AttemptOutcome::Sent);
        assert_eq!(recent[0].tries, 2);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let client = Arc::new(Scripted::new(vec![Err(MessagingError::Rejected {
            status: 500,
            message: "boom".to_string(),
        })]));
        let log = Arc::new(DocumentStore::in_memory());

        let sent = dispatcher(client.clone(), log.clone(), 3)
            .dispatch("5511999998888", "oi", DispatchTarget::bare(TemplateKind::Test))
            .await;

        assert!(!sent);
        assert_eq!(client.calls(), 1);
        let recent = log.recent(10).await.unwrap();
        assert_eq!(recent[0].outcome, AttemptOutcome::Failed);
        assert!(recent[0].error.as_deref().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_timeout_is_final() {
        let mut scripted = Scripted::new(vec![]);
        scripted.delay = Duration::from_secs(5);
        let client = Arc::new(scripted);
        let log = Arc::new(DocumentStore::in_memory());

        let sent = dispatcher(client.clone(), log.clone(), 3)
            .dispatch("5511999998888", "oi", DispatchTarget::bare(TemplateKind::Test))
            .await;

        assert!(!sent);
        assert_eq!(client.calls(), 1);
        assert_eq!(log.recent(1).await.unwrap()[0].tries, 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let client = Arc::new(Scripted::new(vec![
            Err(MessagingError::NotConnected("logged out".to_string())),
            Err(MessagingError::NotConnected("logged out".to_string())),
            Err(MessagingError::NotConnected("logged out".to_string())),
        ]));
        let log = Arc::new(DocumentStore::in_memory());

        let sent = dispatcher(client.clone(), log.clone(), 2)
            .dispatch("5511999998888", "oi", DispatchTarget::bare(TemplateKind::Test))
            .await;

        assert!(!sent);
        assert_eq!(client.calls(), 2);
    }
}
