//! Voyager lite-client supervisor
//!
//! Owns the local Cosmos lite-client daemon (`gaiacli rest-server`) on behalf
//! of the wallet UI: prepares the data directory, checks daemon and node
//! versions, keeps a single daemon alive, and reports connection state to the
//! UI as JSON events.

pub mod controller;
pub mod crash;
pub mod data_dir;
pub mod error;
pub mod events;
pub mod health;
pub mod logging;
pub mod process;
pub mod runtime;
pub mod telemetry;
pub mod version;

pub use controller::{ConnectionController, ConnectionPhase};
pub use crash::CrashHandler;
pub use data_dir::{DataDirOutcome, DataDirectory};
pub use error::{SupervisorError, SupervisorResult, NO_NODES_AVAILABLE};
pub use events::{EventBridge, UiCommand, UiEvent};
pub use health::{HealthProbe, LcdKeysProbe};
pub use logging::{init_logging, LogSink};
pub use process::{DaemonProcess, ProcessSupervisor};
pub use runtime::Supervisor;
pub use telemetry::{CrashReporter, Telemetry, TracingCrashReporter};
pub use version::{NodeCompatibility, VersionDiff, VersionNegotiator};
