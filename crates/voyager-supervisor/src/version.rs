//! Version negotiation between the bundled daemon, the network and the live node
//!
//! Versions arrive in several shapes (`0.13.0`, `0.13.0-12-gabcdef`, `"v0.13.1"`).
//! Everything after the first dash is a commit suffix and is ignored, as is
//! build metadata.

use crate::error::{SupervisorError, SupervisorResult};
use semver::Version;
use std::time::Duration;
use tracing::{debug, info};

/// Upper bound for the `/node_version` request
pub const NODE_VERSION_TIMEOUT: Duration = Duration::from_secs(3);

/// Level at which two versions first differ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionDiff {
    Major,
    Minor,
    Patch,
    None,
}

/// Outcome of probing a live node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeCompatibility {
    pub compatible: bool,
    pub node_version: String,
}

/// Strip quotes, a leading `v`, the dash-delimited commit suffix and build metadata
pub fn normalize_version(raw: &str) -> &str {
    let trimmed = raw.trim().trim_matches('"').trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    let without_commit = trimmed.split('-').next().unwrap_or(trimmed);
    without_commit.split('+').next().unwrap_or(without_commit)
}

pub fn parse_version(raw: &str) -> SupervisorResult<Version> {
    let normalized = normalize_version(raw);
    Version::parse(normalized).map_err(|e| SupervisorError::InvalidVersion {
        version: raw.trim().to_string(),
        reason: e.to_string(),
    })
}

pub fn diff(a: &str, b: &str) -> SupervisorResult<VersionDiff> {
    let a = parse_version(a)?;
    let b = parse_version(b)?;
    Ok(if a.major != b.major {
        VersionDiff::Major
    } else if a.minor != b.minor {
        VersionDiff::Minor
    } else if a.patch != b.patch {
        VersionDiff::Patch
    } else {
        VersionDiff::None
    })
}

/// Compatible when only the patch level (or nothing) differs
pub fn same_minor_line(a: &str, b: &str) -> SupervisorResult<bool> {
    Ok(matches!(diff(a, b)?, VersionDiff::Patch | VersionDiff::None))
}

/// Decides whether the bundled daemon and the live node fit the network
pub struct VersionNegotiator {
    client: reqwest::Client,
    development: bool,
}

impl VersionNegotiator {
    pub fn new(development: bool) -> SupervisorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(NODE_VERSION_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            development,
        })
    }

    /// Major and minor of the local daemon must match the network's expectation
    pub fn check_daemon_compatibility(
        &self,
        local_daemon_version: &str,
        expected_network_version: &str,
    ) -> SupervisorResult<()> {
        let local = normalize_version(local_daemon_version);
        let expected = normalize_version(expected_network_version);
        info!(local, expected, "Checking gaiacli version");

        if same_minor_line(local, expected)? {
            return Ok(());
        }

        let hint = if self.development {
            " Please update \"tasks/build/Gaia/COMMIT.sh\" with the required version and run \"yarn build:gaia\"."
                .to_string()
        } else {
            String::new()
        };
        Err(SupervisorError::IncompatibleDaemonVersion {
            expected: expected.to_string(),
            local: local.to_string(),
            hint,
        })
    }

    /// Query `<node_url>/node_version`, returning the version without its commit suffix
    pub async fn fetch_node_version(&self, node_url: &str) -> SupervisorResult<String> {
        let url = format!("{}/node_version", node_url.trim_end_matches('/'));
        debug!(%url, "Querying node version");
        let body = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(normalize_version(&body).to_string())
    }

    /// Never fails on a version mismatch, only when the version can't be retrieved
    pub async fn check_node_compatibility(
        &self,
        node_url: &str,
        expected_daemon_version: &str,
    ) -> SupervisorResult<NodeCompatibility> {
        let node_version = self.fetch_node_version(node_url).await?;
        node_compatibility(&node_version, expected_daemon_version)
    }
}

pub fn node_compatibility(
    node_version: &str,
    expected_daemon_version: &str,
) -> SupervisorResult<NodeCompatibility> {
    let compatible = same_minor_line(node_version, expected_daemon_version)?;
    Ok(NodeCompatibility {
        compatible,
        node_version: normalize_version(node_version).to_string(),
    })
}
