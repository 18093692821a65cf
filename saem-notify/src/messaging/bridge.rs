//! WhatsApp Web bridge client
//!
//! Talks to a WhatsApp Web bridge over HTTP. The bridge owns the browser
//! session and its credentials; this client owns the session lifecycle as seen
//! by SAEM and persists a descriptor so a restart asks the bridge to restore the
//! existing session instead of pairing again.
//!
//! Bridge endpoints used:
//! - `POST /api/sessions/{name}/start`    body `{"restore": bool}`
//! - `GET  /api/sessions/{name}`          -> `{"status", "qr"?, "me"?}`
//! - `POST /api/sessions/{name}/messages` body `{"chatId", "text"}`
//! - `POST /api/sessions/{name}/stop`

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, RequestBuilder, StatusCode};
use saem_common::config::MessagingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::session::{SessionDescriptor, SessionMachine, SessionState, SessionStore};
use super::{ConnectionStatus, MessagingClient, MessagingError};

const USER_AGENT: &str = concat!("saem-notify/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
struct StartRequest {
    restore: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    chat_id: String,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct RemoteAccount {
    id: String,
}

/// Session as reported by the bridge
#[derive(Debug, Deserialize)]
struct RemoteSession {
    status: String,
    #[serde(default)]
    qr: Option<String>,
    #[serde(default)]
    me: Option<RemoteAccount>,
}

impl RemoteSession {
    /// `None` while the bridge is still starting the session
    fn into_state(self) -> Result<Option<SessionState>, MessagingError> {
        match self.status.as_str() {
            "WORKING" => Ok(Some(SessionState::Connected {
                account: self.me.map(|me| me.id),
            })),
            "SCAN_QR_CODE" => {
                let code = self.qr.ok_or_else(|| {
                    MessagingError::Protocol(
                        "bridge requested pairing without a QR code".to_string(),
                    )
                })?;
                Ok(Some(SessionState::AwaitingPairing { code }))
            }
            "STARTING" => Ok(None),
            other => Ok(Some(SessionState::Disconnected {
                reason: format!("bridge reports session {}", other),
            })),
        }
    }
}

/// [`MessagingClient`] backed by a WhatsApp Web bridge
pub struct BridgeClient {
    http: reqwest::Client,
    base_url: String,
    session_name: String,
    api_token: Option<String>,
    request_timeout: Duration,
    machine: SessionMachine,
    store: SessionStore,
    /// Serializes initialize/disconnect so they never interleave
    lifecycle: Mutex<()>,
}

impl BridgeClient {
    pub fn new(config: &MessagingConfig, session_dir: PathBuf) -> Result<Self, MessagingError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| MessagingError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.bridge_url.trim_end_matches('/').to_string(),
            session_name: config.session_name.clone(),
            api_token: config.api_token.clone(),
            request_timeout: config.request_timeout(),
            machine: SessionMachine::new(),
            store: SessionStore::new(session_dir),
            lifecycle: Mutex::new(()),
        })
    }

    pub fn session_store(&self) -> &SessionStore {
        &self.store
    }

    fn request(&self, method: Method, suffix: &str) -> RequestBuilder {
        let url = format!("{}/api/sessions/{}{}", self.base_url, self.session_name, suffix);
        let builder = self.http.request(method, url);
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn start_session(&self, restore: bool) -> Result<(), MessagingError> {
        let response = self
            .request(Method::POST, "/start")
            .json(&StartRequest { restore })
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let status = response.status();
        // 409: already started, which is fine for an idempotent start
        if status.is_success() || status == StatusCode::CONFLICT {
            Ok(())
        } else {
            Err(rejected(status, response).await)
        }
    }

    async fn fetch_remote_state(&self) -> Result<Option<SessionState>, MessagingError> {
        let response = self
            .request(Method::GET, "")
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Some(SessionState::Disconnected {
                reason: "bridge has no such session".to_string(),
            }));
        }
        if !status.is_success() {
            return Err(rejected(status, response).await);
        }

        let remote: RemoteSession = response
            .json()
            .await
            .map_err(|e| MessagingError::Protocol(e.to_string()))?;
        remote.into_state()
    }

    /// Apply a state reported by the bridge, persisting newly connected sessions
    async fn apply_remote_state(&self, next: SessionState) {
        let previous = self.machine.current();

        let next = match (&previous, next) {
            // A logged-out session must go through reconnect to pair again
            (SessionState::Connected { .. }, SessionState::AwaitingPairing { .. }) => {
                SessionState::Disconnected {
                    reason: "session logged out on the phone".to_string(),
                }
            }
            (_, next) => next,
        };

        if !self.machine.transition(next.clone()) {
            return;
        }

        match &next {
            SessionState::Connected { account } => {
                info!(
                    account = account.as_deref().unwrap_or("unknown"),
                    "WhatsApp session connected"
                );
                let descriptor = SessionDescriptor {
                    session_name: self.session_name.clone(),
                    account: account.clone(),
                    paired_at: Utc::now(),
                };
                if let Err(e) = self.store.save(&descriptor).await {
                    warn!(error = %e, "Failed to persist messaging session descriptor");
                }
            }
            SessionState::AwaitingPairing { code } => {
                info!("WhatsApp pairing required, scan this QR code with the phone: {}", code);
            }
            SessionState::Disconnected { reason } => {
                warn!(reason = %reason, "WhatsApp session disconnected");
            }
            SessionState::Uninitialized | SessionState::Initializing => {}
        }
    }

    fn map_request_error(&self, error: reqwest::Error) -> MessagingError {
        if error.is_timeout() {
            MessagingError::Timeout(self.request_timeout)
        } else if error.is_connect() {
            MessagingError::Transport(error.to_string())
        } else {
            MessagingError::Protocol(error.to_string())
        }
    }

    fn mark_unreachable(&self, error: &MessagingError) {
        self.machine.transition(SessionState::Disconnected {
            reason: error.to_string(),
        });
    }
}

#[async_trait]
impl MessagingClient for BridgeClient {
    async fn initialize(&self) -> bool {
        let _guard = self.lifecycle.lock().await;

        match self.machine.current() {
            SessionState::Connected { .. } | SessionState::AwaitingPairing { .. } => return true,
            SessionState::Initializing
            | SessionState::Uninitialized
            | SessionState::Disconnected { .. } => {}
        }
        self.machine.transition(SessionState::Initializing);

        let restore = match self.store.load().await {
            Ok(Some(descriptor)) => descriptor.session_name == self.session_name,
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable messaging session descriptor");
                false
            }
        };
        info!(session = %self.session_name, restore, "Initializing WhatsApp session");

        if let Err(e) = self.start_session(restore).await {
            warn!(error = %e, "Failed to start WhatsApp session");
            self.mark_unreachable(&e);
            return false;
        }

        match self.fetch_remote_state().await {
            Ok(Some(state)) => self.apply_remote_state(state).await,
            Ok(None) => debug!("WhatsApp session still starting"),
            Err(e) => {
                warn!(error = %e, "Failed to read WhatsApp session state");
                self.mark_unreachable(&e);
                return false;
            }
        }

        !matches!(self.machine.current(), SessionState::Disconnected { .. })
    }

    fn status(&self) -> ConnectionStatus {
        self.machine.current().status()
    }

    async fn refresh(&self) -> ConnectionStatus {
        // A dropped session comes back through initialize, never through a poll
        if matches!(
            self.machine.current(),
            SessionState::Uninitialized | SessionState::Disconnected { .. }
        ) {
            return self.status();
        }

        match self.fetch_remote_state().await {
            Ok(Some(state)) => self.apply_remote_state(state).await,
            Ok(None) => {}
            Err(e) => {
                debug!(error = %e, "WhatsApp session refresh failed");
                if e.is_transient() {
                    self.mark_unreachable(&e);
                }
            }
        }
        self.status()
    }

    async fn deliver(&self, phone: &str, message: &str) -> Result<(), MessagingError> {
        if phone.is_empty() || !phone.chars().all(|c| c.is_ascii_digit()) {
            return Err(MessagingError::InvalidRecipient(phone.to_string()));
        }

        match self.machine.current() {
            SessionState::Connected { .. } => {}
            // Pairing may have completed since the last look
            SessionState::Initializing | SessionState::AwaitingPairing { .. } => {
                let status = self.refresh().await;
                if !status.connected {
                    return Err(MessagingError::NotConnected(status.state));
                }
            }
            state @ (SessionState::Uninitialized | SessionState::Disconnected { .. }) => {
                return Err(MessagingError::NotConnected(state.label().to_string()));
            }
        }

        let body = SendRequest {
            chat_id: format!("{}@c.us", phone),
            text: message,
        };
        let response = match self.request(Method::POST, "/messages").json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                let error = self.map_request_error(e);
                if error.is_transient() {
                    self.mark_unreachable(&error);
                }
                return Err(error);
            }
        };

        let status = response.status();
        if status.is_success() {
            debug!(phone, "Message accepted by bridge");
            return Ok(());
        }

        match status {
            StatusCode::CONFLICT => {
                let error = MessagingError::NotConnected("bridge session not working".to_string());
                self.mark_unreachable(&error);
                Err(error)
            }
            StatusCode::UNPROCESSABLE_ENTITY => {
                Err(MessagingError::InvalidRecipient(phone.to_string()))
            }
            _ => Err(rejected(status, response).await),
        }
    }

    async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;

        if matches!(self.machine.current(), SessionState::Uninitialized) {
            return;
        }

        match self.request(Method::POST, "/stop").send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(status = %response.status(), "Bridge refused to stop WhatsApp session");
            }
            Ok(_) => info!("WhatsApp session stopped"),
            Err(e) => warn!(error = %e, "Failed to stop WhatsApp session"),
        }

        self.machine.transition(SessionState::Disconnected {
            reason: "disconnected on request".to_string(),
        });
    }
}

async fn rejected(status: StatusCode, response: reqwest::Response) -> MessagingError {
    let message = response.text().await.unwrap_or_default();
    MessagingError::Rejected {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_session_mapping() {
        let working = RemoteSession {
            status: "WORKING".to_string(),
            qr: None,
            me: Some(RemoteAccount { id: "5511999998888@c.us".to_string() }),
        };
        assert_eq!(
            working.into_state().unwrap(),
            Some(SessionState::Connected { account: Some("5511999998888@c.us".to_string()) })
        );

        let pairing = RemoteSession {
            status: "SCAN_QR_CODE".to_string(),
            qr: Some("2@xyz".to_string()),
            me: None,
        };
        assert_eq!(
            pairing.into_state().unwrap(),
            Some(SessionState::AwaitingPairing { code: "2@xyz".to_string() })
        );

        let starting = RemoteSession { status: "STARTING".to_string(), qr: None, me: None };
        assert_eq!(starting.into_state().unwrap(), None);

        let failed = RemoteSession { status: "FAILED".to_string(), qr: None, me: None };
        assert!(matches!(failed.into_state().unwrap(), Some(SessionState::Disconnected { .. })));
    }

    #[test]
    fn test_pairing_without_code_is_protocol_error() {
        let broken = RemoteSession { status: "SCAN_QR_CODE".to_string(), qr: None, me: None };
        assert!(matches!(broken.into_state(), Err(MessagingError::Protocol(_))));
    }
}
