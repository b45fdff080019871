//! External program supervision
//!
//! Spawns the lite-client daemon (and one-shot helper invocations of the same
//! binary), line-logs its output, and watches it for unexpected exits.
//!
//! A started daemon reports through two paths:
//! - before it is marked healthy, stderr output or an exit is pushed to the
//!   startup channel returned by [`ProcessSupervisor::start`] so the caller can
//!   reject the start
//! - afterwards, the same events go to the [`CrashHandler`], at most once per
//!   daemon lifetime
//!
//! [`DaemonProcess::mark_healthy`] consumes the startup channel, so output
//! that races the handover is reported as a crash instead of being dropped.
//!
//! An intentional [`DaemonProcess::stop`] silences both paths before the kill
//! signal is sent.

use crate::crash::CrashHandler;
use crate::error::{SupervisorError, SupervisorResult};
use crate::logging::open_append;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use voyager_config::Config;

/// Longest daemon error text forwarded to the UI
const MAX_ERROR_LEN: usize = 1000;

/// How long to wait for output readers to drain after the process is gone
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Dev-build folder for the current platform, e.g. `linux_amd64`
pub fn platform_folder() -> String {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    };
    format!("{}_{}", os, arch)
}

/// UI-facing text for daemon error output
pub fn daemon_error_message(name: &str, output: &str) -> String {
    let base = name.trim_end_matches(".exe");
    let message = format!(
        "The {} rest-server (LCD) experienced an error:\n{}",
        base, output
    );
    message.chars().take(MAX_ERROR_LEN).collect()
}

pub struct ProcessSupervisor {
    resources_dir: PathBuf,
    binary_override: Option<PathBuf>,
    development: bool,
    logging: bool,
    crash: CrashHandler,
}

impl ProcessSupervisor {
    pub fn new(config: &Config, crash: CrashHandler) -> Self {
        Self {
            resources_dir: config.resources_dir.clone(),
            binary_override: config.binary_path.clone(),
            development: config.development,
            logging: config.logging,
            crash,
        }
    }

    /// Override path, then the dev build for this platform, then the packaged binary
    pub fn resolve_binary(&self, name: &str) -> PathBuf {
        if let Some(path) = &self.binary_override {
            path.clone()
        } else if self.development {
            self.resources_dir
                .join("builds")
                .join("Gaia")
                .join(platform_folder())
                .join(name)
        } else {
            self.resources_dir.join("bin").join(name)
        }
    }

    fn command(&self, name: &str, args: &[String]) -> (PathBuf, Command) {
        let binary = self.resolve_binary(name);
        let arg_string = args
            .iter()
            .map(|a| format!("{:?}", a))
            .collect::<Vec<_>>()
            .join(" ");
        info!("spawning {} with args \"{}\"", binary.display(), arg_string);

        let mut command = Command::new(&binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // SAFETY: prctl is async-signal-safe and touches no memory of the parent
        #[cfg(target_os = "linux")]
        unsafe {
            command.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        (binary, command)
    }

    /// Run the binary to completion and return its trimmed stdout
    pub async fn run_to_completion(&self, name: &str, args: &[String]) -> SupervisorResult<String> {
        let (binary, mut command) = self.command(name, args);
        let output = command.output().await.map_err(|source| {
            warn!("Err: Spawning {} failed: {}", name, source);
            SupervisorError::Spawn {
                binary: binary.clone(),
                source,
            }
        })?;
        if !output.status.success() {
            debug!(
                "{} exited with {}: {}",
                name,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Launch a long-running daemon
    ///
    /// Output is appended to `log_path` when logging is enabled. The returned
    /// receiver yields startup failures until the daemon is marked healthy.
    pub fn start(
        &self,
        name: &str,
        args: &[String],
        log_path: &Path,
    ) -> SupervisorResult<(DaemonProcess, mpsc::UnboundedReceiver<String>)> {
        let (binary, mut command) = self.command(name, args);
        let mut child = command.spawn().map_err(|source| {
            warn!("Err: Spawning {} failed: {}", name, source);
            SupervisorError::Spawn { binary, source }
        })?;

        let pid = child.id();
        let stop = CancellationToken::new();
        let healthy = Arc::new(AtomicBool::new(false));
        let exited = Arc::new(AtomicBool::new(false));
        let latch = CrashLatch::new(self.crash.clone());
        let (startup_tx, startup_rx) = mpsc::unbounded_channel();

        let log_tx = if self.logging {
            match open_append(log_path) {
                Ok(file) => Some(spawn_log_writer(tokio::fs::File::from_std(file))),
                Err(e) => {
                    warn!("Could not open daemon log {}: {}", log_path.display(), e);
                    None
                }
            }
        } else {
            None
        };

        let watch = StreamWatch {
            name: name.to_string(),
            stop: stop.clone(),
            healthy: healthy.clone(),
            latch: latch.clone(),
            startup_tx: startup_tx.clone(),
            log_tx: log_tx.as_ref().map(|(tx, _)| tx.clone()),
        };

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(watch.clone().read(stdout, false)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(watch.clone().read(stderr, true)));
        }
        let log_writer = log_tx.map(|(tx, handle)| {
            drop(tx);
            handle
        });

        let monitor = {
            let latch = latch.clone();
            let name = name.to_string();
            let stop = stop.clone();
            let healthy = healthy.clone();
            let exited = exited.clone();
            tokio::spawn(async move {
                let status = tokio::select! {
                    status = child.wait() => Some(status),
                    _ = stop.cancelled() => None,
                };
                let status = match status {
                    Some(status) => status.ok(),
                    None => {
                        let _ = child.kill().await;
                        None
                    }
                };
                exited.store(true, Ordering::SeqCst);

                if !stop.is_cancelled() {
                    let code = status
                        .and_then(|s| s.code())
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "signal".to_string());
                    let message = format!("{} exited with code {}", name, code);
                    info!("{}", message);
                    let unclaimed = if healthy.load(Ordering::SeqCst) {
                        Some(message)
                    } else {
                        startup_tx.send(message).err().map(|e| e.0)
                    };
                    if let Some(message) = unclaimed {
                        latch.fire(SupervisorError::DaemonCrash(message));
                    }
                }

                for reader in readers {
                    if tokio::time::timeout(DRAIN_TIMEOUT, reader).await.is_err() {
                        debug!("{} output reader did not finish", name);
                    }
                }
                if let Some(writer) = log_writer {
                    let _ = tokio::time::timeout(DRAIN_TIMEOUT, writer).await;
                }
            })
        };

        Ok((
            DaemonProcess {
                name: name.to_string(),
                pid,
                stop,
                healthy,
                exited,
                latch,
                monitor: Some(monitor),
            },
            startup_rx,
        ))
    }
}

/// Lines queued for the daemon log file; the file closes once all senders are gone
fn spawn_log_writer(
    mut file: tokio::fs::File,
) -> (mpsc::UnboundedSender<String>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let handle = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if file.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
        let _ = file.flush().await;
    });
    (tx, handle)
}

/// Ensures a daemon produces at most one crash report
#[derive(Clone)]
struct CrashLatch {
    fired: Arc<AtomicBool>,
    crash: CrashHandler,
}

impl CrashLatch {
    fn new(crash: CrashHandler) -> Self {
        Self {
            fired: Arc::new(AtomicBool::new(false)),
            crash,
        }
    }

    fn fire(&self, err: SupervisorError) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.crash.report(&err);
        } else {
            debug!("Suppressing repeated crash report: {}", err);
        }
    }
}

#[derive(Clone)]
struct StreamWatch {
    name: String,
    stop: CancellationToken,
    healthy: Arc<AtomicBool>,
    latch: CrashLatch,
    startup_tx: mpsc::UnboundedSender<String>,
    log_tx: Option<mpsc::UnboundedSender<String>>,
}

impl StreamWatch {
    async fn read<R: AsyncRead + Unpin>(self, stream: R, is_stderr: bool) {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(tx) = &self.log_tx {
                        let _ = tx.send(format!("{}\n", line));
                    }
                    if self.stop.is_cancelled() {
                        continue;
                    }
                    debug!("{}: {}", self.name, line);
                    if is_stderr {
                        self.on_error_output(line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    if !self.stop.is_cancelled() {
                        warn!(
                            "[Uncaught Exception] Child {} produced an unhandled exception: {}",
                            self.name, e
                        );
                        self.on_error_output(e.to_string());
                    }
                    break;
                }
            }
        }
    }

    fn on_error_output(&self, output: String) {
        let output = if self.healthy.load(Ordering::SeqCst) {
            output
        } else {
            match self.startup_tx.send(output) {
                Ok(()) => return,
                // Startup channel already handed over
                Err(mpsc::error::SendError(output)) => output,
            }
        };
        self.latch.fire(SupervisorError::DaemonCrash(daemon_error_message(
            &self.name, &output,
        )));
    }
}

/// Live handle to a spawned daemon
///
/// Dropping the handle kills the process.
pub struct DaemonProcess {
    name: String,
    pid: Option<u32>,
    stop: CancellationToken,
    healthy: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
    latch: CrashLatch,
    monitor: Option<JoinHandle<()>>,
}

impl DaemonProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// From here on, error output and exits are crashes rather than startup failures
    ///
    /// Takes the startup channel from [`ProcessSupervisor::start`]; anything
    /// still queued in it goes to the crash path.
    pub fn mark_healthy(&self, mut startup: mpsc::UnboundedReceiver<String>) {
        self.healthy.store(true, Ordering::SeqCst);
        startup.close();
        while let Ok(output) = startup.try_recv() {
            self.latch.fire(SupervisorError::DaemonCrash(daemon_error_message(
                &self.name, &output,
            )));
        }
    }

    pub fn is_running(&self) -> bool {
        !self.exited.load(Ordering::SeqCst)
    }

    /// Kill the daemon and wait until it has exited and its log is closed
    ///
    /// Calling this again, or on a daemon that already died, returns immediately.
    pub async fn stop(&mut self) {
        let Some(monitor) = self.monitor.take() else {
            return;
        };
        info!("Stopping the {} server", self.name);
        // Cancel first so the exit is not reported as a crash
        self.stop.cancel();
        if let Err(e) = monitor.await {
            warn!("{} monitor task failed: {}", self.name, e);
        }
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
