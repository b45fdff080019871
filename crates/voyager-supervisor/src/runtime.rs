//! Top-level run loop: startup, UI commands, termination

use crate::controller::ConnectionController;
use crate::crash::CrashHandler;
use crate::data_dir::DataDirectory;
use crate::error::SupervisorResult;
use crate::events::{EventBridge, UiCommand, UiEvent};
use crate::health::HealthProbe;
use crate::telemetry::{CrashReporter, Telemetry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use voyager_config::Config;

/// Upper bound on waiting for an in-flight startup after shutdown began
const STARTUP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Supervisor {
    controller: Arc<ConnectionController>,
    bridge: EventBridge,
    telemetry: Arc<Telemetry>,
    crash: CrashHandler,
}

impl Supervisor {
    /// Wire the bridge, telemetry and crash path around a new controller
    ///
    /// The returned receiver yields UI events once the UI has booted.
    pub fn new(
        config: Config,
        data_dir: DataDirectory,
        reporter: Arc<dyn CrashReporter>,
    ) -> SupervisorResult<(Self, mpsc::UnboundedReceiver<UiEvent>)> {
        let (bridge, events) = EventBridge::new();
        let telemetry = Arc::new(Telemetry::new(config.sentry_dsn.clone(), reporter));
        let crash = CrashHandler::new(bridge.clone(), telemetry.clone());
        let controller = ConnectionController::new(config, data_dir, bridge.clone(), crash.clone())?;
        Ok((
            Self {
                controller: Arc::new(controller),
                bridge,
                telemetry,
                crash,
            },
            events,
        ))
    }

    /// Replace the daemon readiness probe; only possible before [`Supervisor::run`]
    pub fn with_health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.controller = match Arc::try_unwrap(self.controller) {
            Ok(controller) => Arc::new(controller.with_health_probe(probe)),
            Err(shared) => {
                warn!("controller already shared, keeping its health probe");
                shared
            }
        };
        self
    }

    pub fn controller(&self) -> &Arc<ConnectionController> {
        &self.controller
    }

    pub fn crash_handler(&self) -> &CrashHandler {
        &self.crash
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    pub fn handle_command(&self, command: UiCommand) {
        debug!(?command, "UI command");
        match command {
            UiCommand::Booted => {
                self.bridge.mark_booted();
            }
            UiCommand::Reconnect => {
                let controller = self.controller.clone();
                tokio::spawn(async move {
                    controller.reconnect().await;
                });
            }
            UiCommand::StopLcd => {
                let controller = self.controller.clone();
                tokio::spawn(async move {
                    controller.stop_daemon().await;
                });
            }
            UiCommand::Mocked(value) => self.controller.set_mocked(value),
            UiCommand::ErrorCollection(opt_in) => self.telemetry.set_opt_in(opt_in),
            UiCommand::SuccessfulLaunch => info!("[START SUCCESS] Vue app successfuly started"),
        }
    }

    /// Run startup in the background and serve commands until the UI goes
    /// away or the process is interrupted, then shut down
    pub async fn run(self, mut commands: mpsc::UnboundedReceiver<UiCommand>) {
        let controller = self.controller.clone();
        let crash = self.crash.clone();
        let startup = tokio::spawn(async move {
            if let Err(e) = controller.startup().await {
                crash.report(&e);
            }
        });

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        info!("UI command stream closed");
                        break;
                    }
                },
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!("Failed to listen for interrupt: {}", e);
                    }
                    info!("Interrupt received");
                    break;
                }
            }
        }

        self.controller.shutdown().await;
        if tokio::time::timeout(STARTUP_DRAIN_TIMEOUT, startup)
            .await
            .is_err()
        {
            warn!("startup did not finish after shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::TracingCrashReporter;
    use tempfile::TempDir;

    fn supervisor(tmp: &TempDir) -> (Supervisor, mpsc::UnboundedReceiver<UiEvent>) {
        let config = Config {
            root: tmp.path().join("root"),
            network_path: tmp.path().join("missing-template"),
            sentry_dsn: "https://key@sentry.example/1".to_string(),
            logging: false,
            ..Config::default()
        };
        let data_dir = DataDirectory::open(&config.root, &config.network_path);
        Supervisor::new(config, data_dir, Arc::new(TracingCrashReporter)).unwrap()
    }

    #[tokio::test]
    async fn test_commands_toggle_state() {
        let tmp = TempDir::new().unwrap();
        let (supervisor, _events) = supervisor(&tmp);

        supervisor.handle_command(UiCommand::Mocked(true));
        assert!(supervisor.controller().is_mocked());

        assert!(!supervisor.telemetry().is_enabled());
        supervisor.handle_command(UiCommand::ErrorCollection(true));
        assert!(supervisor.telemetry().is_enabled());
        supervisor.handle_command(UiCommand::ErrorCollection(false));
        assert!(!supervisor.telemetry().is_enabled());

        supervisor.handle_command(UiCommand::SuccessfulLaunch);
        supervisor.handle_command(UiCommand::StopLcd);
    }

    #[tokio::test]
    async fn test_startup_failure_reaches_ui_after_boot() {
        let tmp = TempDir::new().unwrap();
        let (supervisor, mut events) = supervisor(&tmp);
        let controller = supervisor.controller().clone();
        let (tx, rx) = mpsc::unbounded_channel();

        let run = tokio::spawn(supervisor.run(rx));
        tx.send(UiCommand::Booted).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(event.is_error());

        drop(tx);
        run.await.unwrap();
        assert!(controller.is_shutting_down());
        assert!(!tmp.path().join("root").exists());
    }
}
