//! Persisted data directory: initialization, validation and genesis upgrades
//!
//! The directory may hold the user's private keys. Nothing in here removes
//! data; the only destructive operation is copying the network template over
//! the root, and the previous genesis is backed up first.

use crate::error::{SupervisorError, SupervisorResult};
use crate::version;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

pub const APP_VERSION_FILE: &str = "app_version";
pub const GENESIS_FILE: &str = "genesis.json";
pub const DAEMON_CONFIG_FILE: &str = "config.toml";
pub const DAEMON_VERSION_FILE: &str = "gaiaversion.txt";

/// Chain id of a local testnet; its genesis is never replaced
pub const LOCAL_CHAIN_ID: &str = "local";

/// Files that must all be present, in the order they are checked
const REQUIRED_FILES: [&str; 4] = [
    GENESIS_FILE,
    APP_VERSION_FILE,
    DAEMON_CONFIG_FILE,
    DAEMON_VERSION_FILE,
];

#[derive(Debug, Deserialize)]
struct Genesis {
    chain_id: String,
}

/// What `ensure_initialized` ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataDirOutcome {
    /// Root did not exist and was created from the template
    Initialized,
    /// Existing root validated, nothing changed
    Validated,
    /// Genesis differed from the template; root was overwritten
    GenesisReplaced { backup: PathBuf },
}

pub struct DataDirectory {
    root: PathBuf,
    template: PathBuf,
    existed: bool,
}

impl DataDirectory {
    /// Open the manager, recording whether the root exists right now
    ///
    /// Call before anything (such as the main log) creates files under the root.
    pub fn open(root: impl Into<PathBuf>, template: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let existed = root.exists();
        Self {
            root,
            template: template.into(),
            existed,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn genesis_path(&self) -> PathBuf {
        self.root.join(GENESIS_FILE)
    }

    pub fn ensure_initialized(&self, app_version: &str) -> SupervisorResult<DataDirOutcome> {
        if !self.existed {
            info!("initializing data directory ({})", self.root.display());
            self.initialize(app_version)?;
            return Ok(DataDirOutcome::Initialized);
        }

        info!("root exists ({})", self.root.display());
        self.check_consistent(app_version)?;
        self.reconcile_genesis()
    }

    fn initialize(&self, app_version: &str) -> SupervisorResult<()> {
        // Fail on an invalid template before touching the root
        fs::metadata(&self.template)?;
        fs::create_dir_all(&self.root)?;
        copy_tree(&self.template, &self.root)?;
        fs::write(self.root.join(APP_VERSION_FILE), app_version)?;
        Ok(())
    }

    fn check_consistent(&self, app_version: &str) -> SupervisorResult<()> {
        if let Some(missing) = REQUIRED_FILES
            .iter()
            .find(|f| !self.root.join(f).exists())
        {
            return Err(SupervisorError::CorruptDataDirectory {
                root: self.root.clone(),
                missing: missing.to_string(),
            });
        }

        let existing = fs::read_to_string(self.root.join(APP_VERSION_FILE))?;
        let existing = existing.trim();
        match version::diff(existing, app_version)? {
            version::VersionDiff::Major | version::VersionDiff::Minor => {
                Err(SupervisorError::IncompatibleAppVersion {
                    data: existing.to_string(),
                    app: app_version.to_string(),
                })
            }
            _ => {
                info!("configs are compatible with current app version");
                Ok(())
            }
        }
    }

    fn reconcile_genesis(&self) -> SupervisorResult<DataDirOutcome> {
        let genesis_path = self.genesis_path();
        let existing = fs::read_to_string(&genesis_path)?;
        let chain_id = parse_chain_id(&genesis_path, &existing)?;
        if chain_id == LOCAL_CHAIN_ID {
            debug!("local testnet, skipping genesis comparison");
            return Ok(DataDirOutcome::Validated);
        }

        let template_genesis = self.template.join(GENESIS_FILE);
        let specified = fs::read_to_string(&template_genesis)?;
        if existing.trim() == specified.trim() {
            return Ok(DataDirOutcome::Validated);
        }

        let backup = self.root.join(format!(
            "{}.{}.bak",
            GENESIS_FILE,
            chrono::Utc::now().format("%Y%m%dT%H%M%SZ")
        ));
        fs::copy(&genesis_path, &backup)?;
        copy_tree(&self.template, &self.root)?;
        info!(
            "genesis.json at \"{}\" was overridden by genesis.json from \"{}\"",
            genesis_path.display(),
            self.template.display()
        );
        Ok(DataDirOutcome::GenesisReplaced { backup })
    }

    pub fn chain_id(&self) -> SupervisorResult<String> {
        let path = self.genesis_path();
        let text = fs::read_to_string(&path)?;
        parse_chain_id(&path, &text)
    }

    /// Daemon version the network expects, without its commit suffix
    pub fn expected_daemon_version(&self) -> SupervisorResult<String> {
        let text = fs::read_to_string(self.root.join(DAEMON_VERSION_FILE))?;
        Ok(version::normalize_version(&text).to_string())
    }
}

fn parse_chain_id(path: &Path, text: &str) -> SupervisorResult<String> {
    let genesis: Genesis =
        serde_json::from_str(text).map_err(|e| SupervisorError::InvalidGenesis {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    Ok(genesis.chain_id)
}

/// Copy every file under `from` into `to`, replacing files that already exist
///
/// Symlinks are followed, so linked files and directories land as copies.
fn copy_tree(from: &Path, to: &Path) -> SupervisorResult<()> {
    for entry in WalkDir::new(from).follow_links(true) {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
