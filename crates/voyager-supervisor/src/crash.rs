//! Single path for every failure the UI should hear about

use crate::error::SupervisorError;
use crate::events::{EventBridge, UiEvent};
use crate::telemetry::Telemetry;
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct CrashHandler {
    bridge: EventBridge,
    telemetry: Arc<Telemetry>,
}

impl CrashHandler {
    pub fn new(bridge: EventBridge, telemetry: Arc<Telemetry>) -> Self {
        Self { bridge, telemetry }
    }

    /// Log, hand to telemetry, and surface to the UI once it has booted
    pub fn report(&self, err: &SupervisorError) {
        error!(fatal = err.is_fatal(), "{}", err);
        self.telemetry.capture(&err.to_string());
        self.bridge.emit(UiEvent::Error {
            code: err.code().map(str::to_string),
            message: err.to_string(),
        });
    }

    /// Same path for failures that never became a [`SupervisorError`]
    pub fn report_message(&self, message: &str) {
        let message = if message.is_empty() {
            "An unspecified error occurred"
        } else {
            message
        };
        error!("{}", message);
        self.telemetry.capture(message);
        self.bridge.emit(UiEvent::error(message));
    }

    /// Route panics into the crash path, keeping the previous hook's output
    ///
    /// Relies on unwinding: a panicking task dies, the runtime does not.
    pub fn install_panic_hook(&self) {
        let handler = self.clone();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let payload = info
                .payload()
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| info.payload().downcast_ref::<String>().cloned())
                .unwrap_or_default();
            let location = info
                .location()
                .map(|l| format!(" at {}:{}", l.file(), l.line()))
                .unwrap_or_default();
            handler.report_message(&format!("[Uncaught Exception] {}{}", payload, location));
            previous(info);
        }));
    }
}
