//! Node connection lifecycle
//!
//! ```text
//! Idle → Initializing → DirectoryChecked → DaemonStarting → DaemonHealthy
//!      → NodeVersionChecking → Connected
//!                 ↑                              │
//!            Reconnecting ←──── reconnect ───────┘      (Error from any step)
//! ```
//!
//! Concurrent triggers (UI reconnect, daemon crash, startup) are serialized by
//! the `connecting` flag and the single-daemon slot. `connecting` is raised
//! from construction until the first connect attempt settles, so nothing can
//! reconnect before startup has validated the data directory, and a failed
//! startup keeps it raised. The slot is reserved before the daemon is spawned
//! and holds it until it is stopped.
//!
//! No attempt is retried automatically except the health poll, which runs
//! until the daemon answers, fails, or is stopped.

use crate::crash::CrashHandler;
use crate::data_dir::DataDirectory;
use crate::error::{SupervisorError, SupervisorResult, NO_NODES_AVAILABLE};
use crate::events::{EventBridge, UiEvent};
use crate::health::{HealthProbe, LcdKeysProbe};
use crate::process::{daemon_error_message, DaemonProcess, ProcessSupervisor};
use crate::version::{NodeCompatibility, VersionNegotiator};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use voyager_config::Config;

/// Delay between daemon health probes
pub const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    Initializing,
    DirectoryChecked,
    DaemonStarting,
    DaemonHealthy,
    NodeVersionChecking,
    Connected,
    Reconnecting,
    Error,
}

/// Single-daemon slot
enum DaemonSlot {
    Empty,
    /// Spawned (or about to be) and waiting for readiness; cancelling the
    /// token makes the attempt stop its process
    Starting { attempt: u64, cancel: CancellationToken },
    Running(DaemonProcess),
}

#[derive(Debug)]
struct Session {
    phase: ConnectionPhase,
    chain_id: Option<String>,
    expected_daemon_version: Option<String>,
    selected_node: Option<String>,
}

pub struct ConnectionController {
    config: Config,
    data_dir: DataDirectory,
    supervisor: ProcessSupervisor,
    negotiator: VersionNegotiator,
    health: Arc<dyn HealthProbe>,
    bridge: EventBridge,
    crash: CrashHandler,
    daemon: Mutex<DaemonSlot>,
    attempts: AtomicU64,
    connecting: AtomicBool,
    startup_failed: AtomicBool,
    mocked: AtomicBool,
    shutting_down: AtomicBool,
    shutdown: CancellationToken,
    session: std::sync::Mutex<Session>,
}

impl ConnectionController {
    pub fn new(
        config: Config,
        data_dir: DataDirectory,
        bridge: EventBridge,
        crash: CrashHandler,
    ) -> SupervisorResult<Self> {
        let health = Arc::new(LcdKeysProbe::new(&config.lcd_url())?);
        let negotiator = VersionNegotiator::new(config.development)?;
        let supervisor = ProcessSupervisor::new(&config, crash.clone());
        Ok(Self {
            mocked: AtomicBool::new(config.mocked),
            config,
            data_dir,
            supervisor,
            negotiator,
            health,
            bridge,
            crash,
            daemon: Mutex::new(DaemonSlot::Empty),
            attempts: AtomicU64::new(0),
            connecting: AtomicBool::new(true),
            startup_failed: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            session: std::sync::Mutex::new(Session {
                phase: ConnectionPhase::Idle,
                chain_id: None,
                expected_daemon_version: None,
                selected_node: None,
            }),
        })
    }

    /// Replace the readiness probe used while the daemon starts
    pub fn with_health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.health = probe;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validate local state and the bundled daemon, then connect
    ///
    /// Fatal problems are returned; connection failures are reported through
    /// the crash path and yield `Ok(None)`. After a failed startup `connecting`
    /// stays raised and [`reconnect`](Self::reconnect) is refused.
    pub async fn startup(&self) -> SupervisorResult<Option<String>> {
        self.set_phase(ConnectionPhase::Initializing);
        if let Err(e) = self.prepare().await {
            self.startup_failed.store(true, Ordering::SeqCst);
            self.set_phase(ConnectionPhase::Error);
            if e.is_fatal() {
                error!("Startup aborted, local state is unusable: {}", e);
            } else {
                error!("Startup aborted: {}", e);
            }
            return Err(e);
        }
        Ok(self.pick_and_connect().await)
    }

    async fn prepare(&self) -> SupervisorResult<()> {
        let outcome = self.data_dir.ensure_initialized(&self.config.app_version)?;
        debug!(?outcome, "data directory ready");
        self.set_phase(ConnectionPhase::DirectoryChecked);

        let expected = self.data_dir.expected_daemon_version()?;
        let local = self.daemon_version().await?;
        self.negotiator
            .check_daemon_compatibility(&local, &expected)?;

        let chain_id = self.data_dir.chain_id()?;
        info!(%chain_id, "read chain id from genesis");

        let mut session = self.session();
        session.expected_daemon_version = Some(expected);
        session.chain_id = Some(chain_id);
        Ok(())
    }

    /// Output of `<daemon> version`
    pub async fn daemon_version(&self) -> SupervisorResult<String> {
        self.supervisor
            .run_to_completion(&self.config.daemon_binary_name(), &["version".to_string()])
            .await
    }

    /// Bring the daemon up against the configured node and check the node's version
    ///
    /// Returns the selected node on success. Single endpoint: an unusable node
    /// is reported as `NO_NODES_AVAILABLE` and nothing else is tried.
    pub async fn pick_and_connect(&self) -> Option<String> {
        let node_url = self.config.node_lcd.clone();
        self.connecting.store(true, Ordering::SeqCst);

        if let Err(e) = self.connect().await {
            if matches!(e, SupervisorError::DaemonAlreadyRunning) {
                // The attempt holding the slot owns `connecting`
                warn!("{}", e);
                return None;
            }
            self.connecting.store(false, Ordering::SeqCst);
            self.set_phase(ConnectionPhase::Error);
            match e {
                SupervisorError::ShuttingDown | SupervisorError::StartAborted => {
                    debug!("connect aborted: {}", e)
                }
                e => self.crash.report(&e),
            }
            return None;
        }

        self.set_phase(ConnectionPhase::NodeVersionChecking);
        let expected = match self.expected_daemon_version() {
            Ok(v) => v,
            Err(e) => {
                warn!("Could not read expected gaia version: {}", e);
                self.reject_node().await;
                return None;
            }
        };

        match self
            .negotiator
            .check_node_compatibility(&node_url, &expected)
            .await
        {
            Err(e) => {
                warn!(
                    "Error in getting node SDK version, assuming node is incompatible. Error: {}",
                    e
                );
                self.reject_node().await;
                None
            }
            Ok(NodeCompatibility {
                compatible: false,
                node_version,
            }) => {
                let message = format!(
                    "Node {} uses SDK version {} which is incompatible to the version used in Voyager {}",
                    node_url, node_version, expected
                );
                info!("{}", message);
                self.bridge.emit(UiEvent::ConnectionStatus(message));
                self.reject_node().await;
                None
            }
            Ok(_) => {
                let mut session = self.session();
                session.phase = ConnectionPhase::Connected;
                session.selected_node = Some(node_url.clone());
                Some(node_url)
            }
        }
    }

    async fn reject_node(&self) {
        let err = SupervisorError::NoNodesAvailable;
        warn!("{}", err);
        self.bridge.emit(UiEvent::Error {
            code: Some(NO_NODES_AVAILABLE.to_string()),
            message: err.to_string(),
        });
        self.stop_daemon().await;
        let mut session = self.session();
        session.phase = ConnectionPhase::Error;
        session.selected_node = None;
    }

    /// Start the daemon and wait until its REST server answers
    ///
    /// Fails with `DaemonAlreadyRunning` while another daemon is starting or
    /// running.
    pub async fn connect(&self) -> SupervisorResult<()> {
        info!(
            "starting gaia rest server with nodeURL {}",
            self.config.node_lcd
        );
        self.set_phase(ConnectionPhase::DaemonStarting);

        let chain_id = self.chain_id()?;
        let home = self.config.lcd_home();
        let args = vec![
            "rest-server".to_string(),
            "--insecure".to_string(),
            "--laddr".to_string(),
            format!("tcp://localhost:{}", self.config.active_lcd_port()),
            "--home".to_string(),
            home.display().to_string(),
            "--node".to_string(),
            self.config.node_rpc.clone(),
            "--chain-id".to_string(),
            chain_id,
            "--trust-node".to_string(),
            "true".to_string(),
        ];

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        let cancel = self.shutdown.child_token();
        {
            let mut slot = self.daemon.lock().await;
            if !matches!(*slot, DaemonSlot::Empty) {
                return Err(SupervisorError::DaemonAlreadyRunning);
            }
            *slot = DaemonSlot::Starting {
                attempt,
                cancel: cancel.clone(),
            };
        }

        let started = self.start_daemon(&args, &home, &cancel).await;

        let mut slot = self.daemon.lock().await;
        let owns_slot = matches!(
            *slot,
            DaemonSlot::Starting { attempt: current, ref cancel } if current == attempt && !cancel.is_cancelled()
        );
        let ours = matches!(*slot, DaemonSlot::Starting { attempt: current, .. } if current == attempt);
        if ours && (!owns_slot || started.is_err()) {
            *slot = DaemonSlot::Empty;
        }
        let (process, startup) = match started {
            Ok(started) if owns_slot => started,
            Ok((mut process, _)) => {
                drop(slot);
                process.stop().await;
                return Err(self.cancelled_error());
            }
            Err(e) => return Err(e),
        };
        process.mark_healthy(startup);
        *slot = DaemonSlot::Running(process);
        drop(slot);
        info!("gaia rest server ready");
        self.set_phase(ConnectionPhase::DaemonHealthy);

        info!("Signaling connected node");
        self.bridge.emit(UiEvent::Connected {
            lcd_url: self.config.node_lcd.clone(),
            rpc_url: self.config.node_rpc.clone(),
        });
        self.connecting.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Spawn the daemon and wait for readiness; the process is stopped on any failure
    ///
    /// On success the startup channel is returned still open for
    /// [`DaemonProcess::mark_healthy`].
    async fn start_daemon(
        &self,
        args: &[String],
        home: &std::path::Path,
        cancel: &CancellationToken,
    ) -> SupervisorResult<(DaemonProcess, mpsc::UnboundedReceiver<String>)> {
        let name = self.config.daemon_binary_name();
        let (mut process, mut startup) =
            self.supervisor
                .start(&name, args, &home.join("lcd.log"))?;

        let ready = match self.wait_until_healthy(&name, &mut startup, cancel).await {
            // Output that raced the passing health check still predates readiness
            Ok(()) => match pending_startup_failure(&name, &mut startup) {
                Some(e) => Err(e),
                None => Ok(()),
            },
            Err(e) => Err(e),
        };
        if let Err(e) = ready {
            process.stop().await;
            return Err(e);
        }
        Ok((process, startup))
    }

    fn cancelled_error(&self) -> SupervisorError {
        if self.shutdown.is_cancelled() {
            SupervisorError::ShuttingDown
        } else {
            SupervisorError::StartAborted
        }
    }

    async fn wait_until_healthy(
        &self,
        name: &str,
        startup: &mut mpsc::UnboundedReceiver<String>,
        cancel: &CancellationToken,
    ) -> SupervisorResult<()> {
        let mut attempts = 0u64;
        loop {
            attempts += 1;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled_error()),
                Some(output) = startup.recv() => {
                    return Err(SupervisorError::DaemonStart(daemon_error_message(name, &output)));
                }
                healthy = self.health.is_healthy() => {
                    if healthy {
                        debug!(attempts, "daemon answered health probe");
                        return Ok(());
                    }
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled_error()),
                Some(output) = startup.recv() => {
                    return Err(SupervisorError::DaemonStart(daemon_error_message(name, &output)));
                }
                _ = tokio::time::sleep(HEALTH_POLL_INTERVAL) => {}
            }
        }
    }

    /// Tear down the current daemon and connect again
    ///
    /// Does nothing while a connection attempt is already running, and after
    /// startup failed.
    pub async fn reconnect(&self) -> Option<String> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return None;
        }
        if self.startup_failed.load(Ordering::SeqCst) {
            warn!("Reconnect refused, startup did not complete");
            return None;
        }
        if self.connecting.swap(true, Ordering::SeqCst) {
            debug!("Reconnect requested while connecting, ignoring");
            return None;
        }
        info!("Starting reconnect");
        self.set_phase(ConnectionPhase::Reconnecting);
        self.stop_daemon().await;
        self.pick_and_connect().await
    }

    /// Stop the daemon if one is running
    ///
    /// A daemon that is still starting is told to stop; its connect attempt
    /// kills it and fails with `StartAborted`.
    pub async fn stop_daemon(&self) {
        let slot = std::mem::replace(&mut *self.daemon.lock().await, DaemonSlot::Empty);
        match slot {
            DaemonSlot::Empty => {}
            DaemonSlot::Starting { cancel, .. } => cancel.cancel(),
            DaemonSlot::Running(mut process) => {
                if !process.is_running() {
                    debug!("daemon already exited");
                }
                process.stop().await;
            }
        }
    }

    /// Detach the UI, cancel any health poll and stop the daemon
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.bridge.detach();
        self.shutdown.cancel();
        self.stop_daemon().await;
        info!("[SHUTDOWN] Voyager has shutdown");
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn set_mocked(&self, mocked: bool) {
        info!(mocked, "mock mode changed");
        self.mocked.store(mocked, Ordering::SeqCst);
    }

    pub fn is_mocked(&self) -> bool {
        self.mocked.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.session().phase
    }

    pub fn selected_node(&self) -> Option<String> {
        self.session().selected_node.clone()
    }

    /// Pid of the running daemon, `None` while starting or after it exited
    pub async fn daemon_pid(&self) -> Option<u32> {
        match &*self.daemon.lock().await {
            DaemonSlot::Running(process) if process.is_running() => process.pid(),
            _ => None,
        }
    }

    /// Whether the single-daemon slot is taken, by a starting or running daemon
    pub async fn has_daemon(&self) -> bool {
        !matches!(*self.daemon.lock().await, DaemonSlot::Empty)
    }

    pub fn startup_failed(&self) -> bool {
        self.startup_failed.load(Ordering::SeqCst)
    }

    /// Chain id from the persisted genesis, read once
    pub fn chain_id(&self) -> SupervisorResult<String> {
        if let Some(id) = self.session().chain_id.clone() {
            return Ok(id);
        }
        let id = self.data_dir.chain_id()?;
        self.session().chain_id = Some(id.clone());
        Ok(id)
    }

    pub fn expected_daemon_version(&self) -> SupervisorResult<String> {
        if let Some(v) = self.session().expected_daemon_version.clone() {
            return Ok(v);
        }
        let v = self.data_dir.expected_daemon_version()?;
        self.session().expected_daemon_version = Some(v.clone());
        Ok(v)
    }

    fn set_phase(&self, phase: ConnectionPhase) {
        let mut session = self.session();
        if session.phase != phase {
            debug!(from = ?session.phase, to = ?phase, "connection phase");
            session.phase = phase;
        }
    }

    fn session(&self) -> std::sync::MutexGuard<'_, Session> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// First startup failure already queued by the daemon's output watchers
fn pending_startup_failure(
    name: &str,
    startup: &mut mpsc::UnboundedReceiver<String>,
) -> Option<SupervisorError> {
    startup
        .try_recv()
        .ok()
        .map(|output| SupervisorError::DaemonStart(daemon_error_message(name, &output)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{Telemetry, TracingCrashReporter};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct NeverHealthy;

    #[async_trait]
    impl HealthProbe for NeverHealthy {
        async fn is_healthy(&self) -> bool {
            false
        }
    }

    fn controller(tmp: &TempDir, binary: Option<PathBuf>) -> (ConnectionController, mpsc::UnboundedReceiver<UiEvent>) {
        let config = Config {
            root: tmp.path().join("root"),
            network_path: tmp.path().join("network"),
            binary_path: binary,
            logging: false,
            ..Config::default()
        };
        let (bridge, rx) = EventBridge::new();
        bridge.mark_booted();
        let telemetry = Arc::new(Telemetry::new("", Arc::new(TracingCrashReporter)));
        let crash = CrashHandler::new(bridge.clone(), telemetry);
        let data_dir = DataDirectory::open(&config.root, &config.network_path);
        let controller = ConnectionController::new(config, data_dir, bridge, crash).unwrap();
        (controller, rx)
    }

    #[tokio::test]
    async fn test_initial_state() {
        let tmp = TempDir::new().unwrap();
        let (controller, _rx) = controller(&tmp, None);
        assert_eq!(controller.phase(), ConnectionPhase::Idle);
        // Raised until the first connect attempt settles
        assert!(controller.is_connecting());
        assert!(!controller.has_daemon().await);
        assert!(controller.selected_node().is_none());
    }

    #[tokio::test]
    async fn test_stop_without_daemon_is_noop() {
        let tmp = TempDir::new().unwrap();
        let (controller, _rx) = controller(&tmp, None);
        controller.stop_daemon().await;
        controller.stop_daemon().await;
        assert!(!controller.has_daemon().await);
    }

    #[tokio::test]
    async fn test_startup_without_template_fails() {
        let tmp = TempDir::new().unwrap();
        let (controller, _rx) = controller(&tmp, None);
        let result = controller.startup().await;
        assert!(matches!(result, Err(SupervisorError::Io(_))));
        assert_eq!(controller.phase(), ConnectionPhase::Error);
    }

    #[tokio::test]
    async fn test_reconnect_refused_before_and_after_failed_startup() {
        let tmp = TempDir::new().unwrap();
        let (controller, mut rx) = controller(&tmp, Some(tmp.path().join("missing-gaiacli")));

        assert_eq!(controller.reconnect().await, None);

        assert!(controller.startup().await.is_err());
        assert!(controller.startup_failed());
        assert_eq!(controller.reconnect().await, None);
        assert!(controller.is_connecting());
        assert!(!controller.has_daemon().await);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_queued_startup_output_rejects_start() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(pending_startup_failure("gaiacli", &mut rx).is_none());

        tx.send("panic: listener closed".to_string()).unwrap();
        match pending_startup_failure("gaiacli", &mut rx) {
            Some(SupervisorError::DaemonStart(message)) => {
                assert!(message.starts_with("The gaiacli rest-server (LCD) experienced an error:"));
                assert!(message.ends_with("panic: listener closed"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported_not_thrown() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("genesis.json"), r#"{"chain_id":"gaia-6002"}"#).unwrap();
        let (controller, mut rx) =
            controller(&tmp, Some(tmp.path().join("missing-gaiacli")));

        assert_eq!(controller.pick_and_connect().await, None);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, UiEvent::Error { code: None, ref message } if message.contains("Failed to spawn")));
        assert!(!controller.is_connecting());
        assert_eq!(controller.phase(), ConnectionPhase::Error);
    }

    #[tokio::test]
    async fn test_mock_toggle() {
        let tmp = TempDir::new().unwrap();
        let (controller, _rx) = controller(&tmp, None);
        assert!(!controller.is_mocked());
        controller.set_mocked(true);
        assert!(controller.is_mocked());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_blocks_reconnect() {
        let tmp = TempDir::new().unwrap();
        let (controller, _rx) = controller(&tmp, None);
        let controller = controller.with_health_probe(Arc::new(NeverHealthy));
        controller.shutdown().await;
        controller.shutdown().await;
        assert!(controller.is_shutting_down());
        assert_eq!(controller.reconnect().await, None);
        assert!(!controller.has_daemon().await);
    }
}
