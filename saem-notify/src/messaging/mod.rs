//! Outbound messaging
//!
//! The [`MessagingClient`] trait is the seam between the notification engine and
//! the chat transport. The production implementation is [`BridgeClient`], which
//! drives a WhatsApp Web bridge over HTTP. There is exactly one client per
//! process; it is created in `main` and injected wherever it is needed.

pub mod bridge;
pub mod session;

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub use bridge::BridgeClient;
pub use session::{SessionDescriptor, SessionMachine, SessionState, SessionStore};

/// Why a message was not delivered
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MessagingError {
    /// Session is not connected (never paired, logged out, or dropped)
    #[error("Messaging session not connected: {0}")]
    NotConnected(String),

    /// Request never reached the bridge
    #[error("Transport error: {0}")]
    Transport(String),

    /// No answer within the deadline; the message may or may not have gone out
    #[error("Send timed out after {0:?}")]
    Timeout(Duration),

    /// Bridge reachable but refused the message
    #[error("Message rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Recipient is not a valid chat address
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    /// Unexpected response from the bridge
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl MessagingError {
    /// Failures where the message certainly was not accepted and a later retry
    /// cannot produce a duplicate
    pub fn is_transient(&self) -> bool {
        matches!(self, MessagingError::NotConnected(_) | MessagingError::Transport(_))
    }
}

/// Snapshot of the session for callers and the health endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub state: String,
    /// Present while waiting for the QR code to be scanned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Stateful, session-based chat transport
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Restore the persisted session or start pairing.
    ///
    /// Idempotent: returns immediately when a session is already connected or
    /// awaiting pairing. Returns false when the transport is unreachable.
    async fn initialize(&self) -> bool;

    /// Current state. Never blocks and never fails.
    fn status(&self) -> ConnectionStatus;

    /// Ask the transport for its current state and update ours
    async fn refresh(&self) -> ConnectionStatus {
        self.status()
    }

    /// Deliver one message, reporting why it failed
    async fn deliver(&self, phone: &str, message: &str) -> Result<(), MessagingError>;

    /// Deliver one message; false means "not delivered, do not mark notified"
    async fn send(&self, phone: &str, message: &str) -> bool {
        match self.deliver(phone, message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(phone, error = %e, "Message not delivered");
                false
            }
        }
    }

    /// End the session on the transport
    async fn disconnect(&self);

    /// Tear down any session and initialize again
    async fn reconnect(&self) -> bool {
        self.disconnect().await;
        self.initialize().await
    }
}
