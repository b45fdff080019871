//! Event channel between the supervisor and the UI
//!
//! Outbound events are boot-gated: anything raised before the UI sends
//! `booted` is held back and delivered, in order, once it does.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Event sent to the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum UiEvent {
    Connected {
        #[serde(rename = "lcdURL")]
        lcd_url: String,
        #[serde(rename = "rpcURL")]
        rpc_url: String,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        code: Option<String>,
        message: String,
    },
    ConnectionStatus(String),
}

impl UiEvent {
    pub fn error(message: impl Into<String>) -> Self {
        UiEvent::Error {
            code: None,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, UiEvent::Error { .. })
    }
}

/// Command received from the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "value", rename_all = "kebab-case")]
pub enum UiCommand {
    Booted,
    Reconnect,
    StopLcd,
    Mocked(bool),
    ErrorCollection(bool),
    SuccessfulLaunch,
}

struct BridgeState {
    booted: bool,
    pending: Vec<UiEvent>,
    /// `None` once the UI is gone
    tx: Option<mpsc::UnboundedSender<UiEvent>>,
}

impl BridgeState {
    fn deliver(&mut self, event: UiEvent) {
        match &self.tx {
            Some(tx) => {
                if tx.send(event).is_err() {
                    debug!("UI receiver dropped, detaching");
                    self.tx = None;
                }
            }
            None => debug!(?event, "No UI attached, dropping event"),
        }
    }
}

#[derive(Clone)]
pub struct EventBridge {
    state: Arc<Mutex<BridgeState>>,
}

impl EventBridge {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bridge = Self {
            state: Arc::new(Mutex::new(BridgeState {
                booted: false,
                pending: Vec::new(),
                tx: Some(tx),
            })),
        };
        (bridge, rx)
    }

    /// Deliver now if the UI has booted, otherwise hold until it does
    pub fn emit(&self, event: UiEvent) {
        let mut state = self.lock();
        if state.booted {
            state.deliver(event);
        } else {
            state.pending.push(event);
        }
    }

    /// Record the UI's readiness and flush held events
    ///
    /// Only the first call has an effect; returns whether this was it.
    pub fn mark_booted(&self) -> bool {
        let mut state = self.lock();
        if state.booted {
            debug!("Ignoring repeated booted signal");
            return false;
        }
        info!("View has booted");
        state.booted = true;
        let pending = std::mem::take(&mut state.pending);
        for event in pending {
            state.deliver(event);
        }
        true
    }

    pub fn is_booted(&self) -> bool {
        self.lock().booted
    }

    /// Drop the UI reference; later events are discarded
    pub fn detach(&self) {
        let mut state = self.lock();
        state.tx = None;
        state.pending.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BridgeState> {
        // A panic while holding the lock leaves plain data behind; keep using it
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
