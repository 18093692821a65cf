//! Recording messaging stub
//!
//! Records every delivered message and answers from a script: a default
//! outcome plus per-phone overrides.

use async_trait::async_trait;
use saem_notify::messaging::{ConnectionStatus, MessagingClient, MessagingError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub phone: String,
    pub message: String,
}

pub struct StubClient {
    connected: AtomicBool,
    accept_by_default: AtomicBool,
    overrides: Mutex<HashMap<String, bool>>,
    calls: Mutex<Vec<SentMessage>>,
    initialize_calls: AtomicUsize,
}

impl StubClient {
    /// Connected stub that accepts every message
    pub fn accepting() -> Self {
        Self {
            connected: AtomicBool::new(true),
            accept_by_default: AtomicBool::new(true),
            overrides: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            initialize_calls: AtomicUsize::new(0),
        }
    }

    /// Connected stub that rejects every message
    pub fn rejecting() -> Self {
        let stub = Self::accepting();
        stub.accept_by_default.store(false, Ordering::SeqCst);
        stub
    }

    pub fn disconnected() -> Self {
        let stub = Self::accepting();
        stub.connected.store(false, Ordering::SeqCst);
        stub
    }

    /// Answer `accept` for this normalized phone regardless of the default
    pub fn set_outcome(&self, phone: &str, accept: bool) {
        self.overrides.lock().unwrap().insert(phone.to_string(), accept);
    }

    pub fn set_accepting(&self, accept: bool) {
        self.accept_by_default.store(accept, Ordering::SeqCst);
    }

    /// Every deliver call, accepted or not
    pub fn calls(&self) -> Vec<SentMessage> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, phone: &str) -> Vec<SentMessage> {
        self.calls().into_iter().filter(|m| m.phone == phone).collect()
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl MessagingClient for StubClient {
    async fn initialize(&self) -> bool {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.load(Ordering::SeqCst)
    }

    fn status(&self) -> ConnectionStatus {
        let connected = self.connected.load(Ordering::SeqCst);
        ConnectionStatus {
            connected,
            state: if connected { "connected" } else { "disconnected" }.to_string(),
            pairing_code: None,
            detail: None,
        }
    }

    async fn deliver(&self, phone: &str, message: &str) -> Result<(), MessagingError> {
        self.calls.lock().unwrap().push(SentMessage {
            phone: phone.to_string(),
            message: message.to_string(),
        });

        if !self.connected.load(Ordering::SeqCst) {
            // Not transient for the stub's purposes: keeps call counts exact
            return Err(MessagingError::Rejected {
                status: 409,
                message: "stub disconnected".to_string(),
            });
        }

        let accept = self
            .overrides
            .lock()
            .unwrap()
            .get(phone)
            .copied()
            .unwrap_or_else(|| self.accept_by_default.load(Ordering::SeqCst));
        if accept {
            Ok(())
        } else {
            Err(MessagingError::Rejected {
                status: 500,
                message: "stub rejected".to_string(),
            })
        }
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn reconnect(&self) -> bool {
        self.connected.store(true, Ordering::SeqCst);
        self.initialize().await
    }
}
