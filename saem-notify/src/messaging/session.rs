//! Messaging session state
//!
//! ```text
//! Uninitialized -> Initializing -> AwaitingPairing -> Connected
//!                        \________________________/
//!                  (restored session goes straight to Connected)
//!
//! any state -> Disconnected -> Initializing | Uninitialized
//! ```
//!
//! `Connected` is only reachable from `Initializing` or `AwaitingPairing`.

use chrono::{DateTime, Utc};
use saem_common::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::ConnectionStatus;

const DESCRIPTOR_FILE: &str = "session.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    /// Waiting for the QR code to be scanned on the phone
    AwaitingPairing { code: String },
    Connected { account: Option<String> },
    Disconnected { reason: String },
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initializing => "initializing",
            SessionState::AwaitingPairing { .. } => "awaiting_pairing",
            SessionState::Connected { .. } => "connected",
            SessionState::Disconnected { .. } => "disconnected",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected { .. })
    }

    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (_, Disconnected { .. }) => true,
            (Uninitialized | Disconnected { .. }, Initializing) => true,
            (Disconnected { .. }, Uninitialized) => true,
            (Initializing | AwaitingPairing { .. }, AwaitingPairing { .. }) => true,
            (Initializing | AwaitingPairing { .. } | Connected { .. }, Connected { .. }) => true,
            _ => false,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        let (pairing_code, detail) = match self {
            SessionState::AwaitingPairing { code } => (Some(code.clone()), None),
            SessionState::Connected { account } => (None, account.clone()),
            SessionState::Disconnected { reason } => (None, Some(reason.clone())),
            SessionState::Uninitialized | SessionState::Initializing => (None, None),
        };

        ConnectionStatus {
            connected: self.is_connected(),
            state: self.label().to_string(),
            pairing_code,
            detail,
        }
    }
}

/// Owns the current [`SessionState`] and enforces legal transitions
#[derive(Debug)]
pub struct SessionMachine {
    tx: watch::Sender<SessionState>,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Uninitialized);
        Self { tx }
    }

    pub fn current(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    /// Move to `next` if the transition is legal. Returns whether it happened.
    pub fn transition(&self, next: SessionState) -> bool {
        let mut applied = false;
        self.tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            if !state.can_transition_to(&next) {
                warn!(
                    from = state.label(),
                    to = next.label(),
                    "Ignoring invalid messaging session transition"
                );
                return false;
            }
            debug!(from = state.label(), to = next.label(), "Messaging session transition");
            *state = next.clone();
            applied = true;
            true
        });
        applied
    }
}

/// Persisted record of a paired session, used to resume without re-pairing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub session_name: String,
    pub account: Option<String>,
    pub paired_at: DateTime<Utc>,
}

/// Reads and writes the session descriptor under the session directory
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(DESCRIPTOR_FILE)
    }

    pub async fn load(&self) -> Result<Option<SessionDescriptor>> {
        let path = self.path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, descriptor: &SessionDescriptor) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = self.dir.join(format!("{}.tmp", DESCRIPTOR_FILE));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(descriptor)?).await?;
        tokio::fs::rename(&tmp, self.path()).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(self.path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> SessionState {
        SessionState::Connected { account: Some("5511999998888".to_string()) }
    }

    fn disconnected() -> SessionState {
        SessionState::Disconnected { reason: "bridge down".to_string() }
    }

    #[test]
    fn test_connected_requires_initialization_or_pairing() {
        assert!(!SessionState::Uninitialized.can_transition_to(&connected()));
        assert!(!disconnected().can_transition_to(&connected()));
        assert!(SessionState::Initializing.can_transition_to(&connected()));
        let pairing = SessionState::AwaitingPairing { code: "qr".to_string() };
        assert!(pairing.can_transition_to(&connected()));
    }

    #[test]
    fn test_disconnected_reachable_from_anywhere() {
        for state in [
            SessionState::Uninitialized,
            SessionState::Initializing,
            SessionState::AwaitingPairing { code: "qr".to_string() },
            connected(),
        ] {
            assert!(state.can_transition_to(&disconnected()), "{}", state.label());
        }
    }

    #[test]
    fn test_machine_rejects_illegal_transition() {
        let machine = SessionMachine::new();
        assert!(!machine.transition(connected()));
        assert_eq!(machine.current(), SessionState::Uninitialized);

        assert!(machine.transition(SessionState::Initializing));
        assert!(machine.transition(SessionState::AwaitingPairing { code: "qr-1".to_string() }));
        assert!(machine.transition(SessionState::AwaitingPairing { code: "qr-2".to_string() }));
        assert!(machine.transition(connected()));
        assert!(machine.current().is_connected());
    }

    #[test]
    fn test_status_exposes_pairing_code() {
        let status = SessionState::AwaitingPairing { code: "2@abc".to_string() }.status();
        assert!(!status.connected);
        assert_eq!(status.state, "awaiting_pairing");
        assert_eq!(status.pairing_code.as_deref(), Some("2@abc"));

        let status = connected().status();
        assert!(status.connected);
        assert!(status.pairing_code.is_none());
    }

    #[tokio::test]
    async fn test_store_roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session"));

        assert!(store.load().await.unwrap().is_none());

        let descriptor = SessionDescriptor {
            session_name: "saem".to_string(),
            account: Some("5511999998888@c.us".to_string()),
            paired_at: Utc::now(),
        };
        store.save(&descriptor).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(descriptor));

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        store.clear().await.unwrap();
    }
}
