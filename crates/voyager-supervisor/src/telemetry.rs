//! Crash telemetry with explicit opt-in
//!
//! Nothing reaches the reporter until the user opts in through the
//! `error-collection` command, and only while a DSN is configured.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// External crash-reporting collaborator
pub trait CrashReporter: Send + Sync {
    fn capture(&self, dsn: &str, message: &str);
}

/// Records captured errors under the `voyager::telemetry` target
pub struct TracingCrashReporter;

impl CrashReporter for TracingCrashReporter {
    fn capture(&self, dsn: &str, message: &str) {
        error!(target: "voyager::telemetry", dsn, "{}", message);
    }
}

pub struct Telemetry {
    opted_in: AtomicBool,
    dsn: String,
    reporter: Arc<dyn CrashReporter>,
}

impl Telemetry {
    pub fn new(dsn: impl Into<String>, reporter: Arc<dyn CrashReporter>) -> Self {
        Self {
            opted_in: AtomicBool::new(false),
            dsn: dsn.into(),
            reporter,
        }
    }

    pub fn set_opt_in(&self, opt_in: bool) {
        debug!(opt_in, "Error collection preference changed");
        self.opted_in.store(opt_in, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.opted_in.load(Ordering::SeqCst) && !self.dsn.is_empty()
    }

    pub fn capture(&self, message: &str) {
        if self.is_enabled() {
            self.reporter.capture(&self.dsn, message);
        }
    }
}
