//! Notification engine
//!
//! Reads rehearsals, events and musicians through the repositories, renders
//! messages, sends them through the messaging client and flips the per-assignment
//! `notified` flag on success.
//!
//! [`NotificationEngine`] is the boundary the scheduler, the CLI and the health
//! endpoint talk to.

pub mod digest;
pub mod dispatch;
pub mod on_demand;
pub mod phone;
pub mod templates;

use chrono::NaiveDate;
use saem_common::time::{Clock, SystemClock};
use saem_common::{ItemKind, Musician};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::messaging::{ConnectionStatus, MessagingClient};
use crate::outbox::{DispatchTarget, NotificationAttempt, TemplateKind};
use crate::repository::Repositories;

pub use digest::{DailyDigestJob, DigestReport};
pub use dispatch::{DispatchPolicy, Dispatcher};
pub use on_demand::{NotifyOutcome, OnDemandNotifier};
pub use phone::PhoneNormalizer;
pub use templates::MessageTemplater;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: ItemKind, id: String },

    #[error("Messaging transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] saem_common::Error),
}

impl EngineError {
    pub fn not_found(kind: ItemKind, id: &str) -> Self {
        EngineError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Collaborators shared by the digest job and the on-demand notifier
#[derive(Clone)]
pub struct EngineContext {
    pub repos: Repositories,
    pub client: Arc<dyn MessagingClient>,
    pub dispatcher: Dispatcher,
    pub phones: PhoneNormalizer,
    pub templater: MessageTemplater,
    pub clock: Arc<dyn Clock>,
}

impl EngineContext {
    pub fn new(
        repos: Repositories,
        client: Arc<dyn MessagingClient>,
        policy: DispatchPolicy,
    ) -> Self {
        let dispatcher = Dispatcher::new(client.clone(), repos.attempts.clone(), policy);
        Self {
            repos,
            client,
            dispatcher,
            phones: PhoneNormalizer::default(),
            templater: MessageTemplater,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_phones(mut self, phones: PhoneNormalizer) -> Self {
        self.phones = phones;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub(crate) fn has_usable_phone(&self, musician: &Musician) -> bool {
        PhoneNormalizer::is_usable(&musician.phone)
    }
}

pub struct NotificationEngine {
    ctx: EngineContext,
    digest: DailyDigestJob,
    on_demand: OnDemandNotifier,
}

impl NotificationEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            digest: DailyDigestJob::new(ctx.clone()),
            on_demand: OnDemandNotifier::new(ctx.clone()),
            ctx,
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Digest for the current local day
    pub async fn run_daily_digest(&self) -> Result<DigestReport, EngineError> {
        self.digest.run().await
    }

    /// Digest for an explicit day (manual catch-up runs)
    pub async fn run_daily_digest_on(&self, day: NaiveDate) -> Result<DigestReport, EngineError> {
        self.digest.run_on(day).await
    }

    pub async fn notify_rehearsal(&self, id: &str) -> Result<NotifyOutcome, EngineError> {
        self.on_demand.notify_rehearsal(id).await
    }

    pub async fn notify_event(&self, id: &str) -> Result<NotifyOutcome, EngineError> {
        self.on_demand.notify_event(id).await
    }

    /// Send the fixed test message. Fails fast when the session is not connected.
    pub async fn send_test(&self, phone: &str) -> Result<bool, EngineError> {
        if !PhoneNormalizer::is_usable(phone) {
            return Err(EngineError::InvalidInput(format!("Not a phone number: {:?}", phone)));
        }

        let status = self.ctx.client.status();
        if !status.connected {
            return Err(EngineError::TransportUnavailable(status.state));
        }

        let phone = self.ctx.phones.normalize(phone);
        let message = self.ctx.templater.test_message();
        Ok(self
            .ctx
            .dispatcher
            .dispatch(&phone, &message, DispatchTarget::bare(TemplateKind::Test))
            .await)
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.ctx.client.status()
    }

    /// Tear down the messaging session and initialize it again
    pub async fn reconnect_transport(&self) -> bool {
        info!("Reconnecting messaging transport");
        self.ctx.client.reconnect().await
    }

    pub async fn recent_attempts(
        &self,
        limit: usize,
    ) -> Result<Vec<NotificationAttempt>, EngineError> {
        Ok(self.ctx.repos.attempts.recent(limit).await?)
    }
}
