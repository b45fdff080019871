//! Shared fixtures: a scripted stand-in for gaiacli, a network template and a
//! mock node serving both the daemon's `/keys` and the node's `/node_version`

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use voyager_config::Config;
use voyager_supervisor::{
    ConnectionController, CrashHandler, DataDirectory, EventBridge, HealthProbe, LcdKeysProbe,
    Telemetry, TracingCrashReporter, UiEvent,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CHAIN_ID: &str = "gaia-6002";
pub const APP_VERSION: &str = "0.1.0";

/// Behaviour of the `rest-server` subcommand of the fake daemon
pub enum RestServer {
    /// Stay up until killed
    Serve,
    /// Complain on stderr, then stay up
    FailOnStderr(&'static str),
}

pub struct FakeDaemon {
    pub version: &'static str,
    pub rest_server: RestServer,
}

impl Default for FakeDaemon {
    fn default() -> Self {
        Self {
            version: "0.13.1-4-gdeadbee",
            rest_server: RestServer::Serve,
        }
    }
}

/// Write an executable script that records each `rest-server` launch in `starts`
pub fn write_fake_daemon(dir: &Path, daemon: &FakeDaemon) -> PathBuf {
    let rest_server = match daemon.rest_server {
        RestServer::Serve => "exec sleep 60".to_string(),
        RestServer::FailOnStderr(msg) => format!("echo '{}' >&2\n    exec sleep 60", msg),
    };
    let script = format!(
        r#"#!/bin/sh
case "$1" in
  version)
    echo "{version}"
    ;;
  rest-server)
    echo started >> "$(dirname "$0")/starts"
    {rest_server}
    ;;
esac
"#,
        version = daemon.version,
        rest_server = rest_server,
    );
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join("gaiacli");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Network template as shipped with the app
pub fn write_network_template(dir: &Path, chain_id: &str, daemon_version: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join("genesis.json"),
        format!(r#"{{"chain_id":"{}","app_state":{{}}}}"#, chain_id),
    )
    .unwrap();
    std::fs::write(dir.join("config.toml"), "trust_node = true\n").unwrap();
    std::fs::write(dir.join("gaiaversion.txt"), daemon_version).unwrap();
}

/// Mock node; `/keys` is the daemon's readiness endpoint
pub async fn mock_node(node_version: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/node_version"))
        .respond_with(ResponseTemplate::new(200).set_body_string(node_version))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;
    server
}

pub struct Harness {
    pub tmp: TempDir,
    pub server: MockServer,
    pub controller: Arc<ConnectionController>,
    pub events: mpsc::UnboundedReceiver<UiEvent>,
}

impl Harness {
    pub async fn new(daemon: FakeDaemon, node_version: &str) -> Self {
        Self::build(daemon, node_version, None).await
    }

    pub async fn with_probe(daemon: FakeDaemon, node_version: &str, probe: Arc<dyn HealthProbe>) -> Self {
        Self::build(daemon, node_version, Some(probe)).await
    }

    async fn build(daemon: FakeDaemon, node_version: &str, probe: Option<Arc<dyn HealthProbe>>) -> Self {
        let tmp = TempDir::new().unwrap();
        let server = mock_node(node_version).await;
        let binary = write_fake_daemon(&tmp.path().join("bin"), &daemon);
        let template = tmp.path().join("networks").join(CHAIN_ID);
        write_network_template(&template, CHAIN_ID, "0.13.0-12-gabcdef0");

        let config = Config {
            node_lcd: server.uri(),
            node_rpc: "http://localhost:26657".to_string(),
            binary_path: Some(binary),
            network_path: template,
            root: tmp.path().join("root"),
            resources_dir: tmp.path().to_path_buf(),
            logging: true,
            app_version: APP_VERSION.to_string(),
            ..Config::default()
        };
        Self::from_config(tmp, server, config, probe)
    }

    pub fn from_config(
        tmp: TempDir,
        server: MockServer,
        config: Config,
        probe: Option<Arc<dyn HealthProbe>>,
    ) -> Self {
        let (bridge, events) = EventBridge::new();
        bridge.mark_booted();
        let telemetry = Arc::new(Telemetry::new("", Arc::new(TracingCrashReporter)));
        let crash = CrashHandler::new(bridge.clone(), telemetry);
        let data_dir = DataDirectory::open(&config.root, &config.network_path);
        let probe = probe
            .unwrap_or_else(|| Arc::new(LcdKeysProbe::new(&server.uri()).unwrap()));
        let controller = ConnectionController::new(config, data_dir, bridge, crash)
            .unwrap()
            .with_health_probe(probe);
        Self {
            tmp,
            server,
            controller: Arc::new(controller),
            events,
        }
    }

    pub fn root(&self) -> PathBuf {
        self.tmp.path().join("root")
    }

    /// Number of `rest-server` launches so far
    pub fn starts(&self) -> usize {
        std::fs::read_to_string(self.tmp.path().join("bin").join("starts"))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    pub fn drain(&mut self) -> Vec<UiEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub async fn next_event(&mut self, timeout: Duration) -> Option<UiEvent> {
        tokio::time::timeout(timeout, self.events.recv())
            .await
            .ok()
            .flatten()
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_for<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
