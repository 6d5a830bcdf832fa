//! Policy Store
//!
//! Owns the active `SecurityPolicy` and the file it came from.
//!
//! - On startup a missing document is materialized with the defaults
//! - A malformed document never aborts startup: a warning is logged and the
//!   built-in defaults are used for this run, leaving the file untouched
//! - Reloads swap the whole policy at once; a failed reload keeps the
//!   current policy
//!
//! Readers take a snapshot (`Arc<SecurityPolicy>`) and keep it for the
//! duration of one request.

use super::{PolicyDocument, PolicyError, SecurityPolicy};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Read and parse a policy document from disk
pub fn load_document(path: &Path) -> Result<PolicyDocument, PolicyError> {
    let content = fs::read_to_string(path).map_err(|source| PolicyError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    PolicyDocument::from_json(&content).map_err(|source| PolicyError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Write a policy document as pretty-printed JSON, creating parent directories
pub fn save_document(path: &Path, document: &PolicyDocument) -> Result<(), PolicyError> {
    let json = document.to_json_pretty()?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| PolicyError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }

    fs::write(path, json + "\n").map_err(|source| PolicyError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Shared holder of the active policy
#[derive(Debug)]
pub struct PolicyStore {
    path: Option<PathBuf>,
    current: RwLock<Arc<SecurityPolicy>>,
    modified: Mutex<Option<SystemTime>>,
}

impl PolicyStore {
    /// Open the store backed by a policy document
    ///
    /// Never fails on a bad document; only the built-in defaults failing to
    /// compile is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PolicyError> {
        let path = path.into();

        let policy = if path.exists() {
            match load_document(&path).and_then(SecurityPolicy::compile) {
                Ok(policy) => {
                    info!(
                        path = %path.display(),
                        commands = policy.allowed_commands().len(),
                        patterns = policy.blocked_patterns().len(),
                        "Loaded security policy"
                    );
                    policy
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        "Failed to load security policy, using defaults: {}",
                        e
                    );
                    SecurityPolicy::builtin()?
                }
            }
        } else {
            let policy = SecurityPolicy::builtin()?;
            match save_document(&path, policy.document()) {
                Ok(()) => info!(path = %path.display(), "Created default security policy"),
                Err(e) => warn!("Could not write default security policy: {}", e),
            }
            policy
        };

        Ok(Self {
            modified: Mutex::new(modified_time(&path)),
            current: RwLock::new(Arc::new(policy)),
            path: Some(path),
        })
    }

    /// Store holding a fixed policy with no backing file
    pub fn from_policy(policy: SecurityPolicy) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(policy)),
            modified: Mutex::new(None),
        }
    }

    /// Backing document path, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current policy
    pub fn snapshot(&self) -> Arc<SecurityPolicy> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap in a new policy
    pub fn replace(&self, policy: SecurityPolicy) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(policy);
    }

    /// Re-read the backing document
    ///
    /// On error the current policy stays active. A store without a backing
    /// file has nothing to reload and returns the current policy.
    pub fn reload(&self) -> Result<Arc<SecurityPolicy>, PolicyError> {
        let Some(path) = &self.path else {
            return Ok(self.snapshot());
        };

        let modified = modified_time(path);
        let policy = load_document(path).and_then(SecurityPolicy::compile)?;
        let policy = Arc::new(policy);

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = policy.clone();
        *self.modified.lock().unwrap_or_else(PoisonError::into_inner) = modified;

        info!(path = %path.display(), "Reloaded security policy");
        Ok(policy)
    }

    /// Reload if the backing document's modification time changed
    ///
    /// Returns `Ok(true)` if a new policy was installed.
    pub fn reload_if_changed(&self) -> Result<bool, PolicyError> {
        let Some(path) = &self.path else {
            return Ok(false);
        };

        let current = modified_time(path);
        {
            let mut seen = self.modified.lock().unwrap_or_else(PoisonError::into_inner);
            if current.is_none() || current == *seen {
                return Ok(false);
            }
            // Record the attempt so a broken file is not re-parsed every tick
            *seen = current;
        }

        self.reload()?;
        Ok(true)
    }
}

/// Poll the backing document and reload it when it changes
pub fn spawn_reload_watcher(store: Arc<PolicyStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match store.reload_if_changed() {
                Ok(true) => debug!("Security policy changed on disk"),
                Ok(false) => {}
                Err(e) => warn!("Security policy reload failed, keeping current policy: {}", e),
            }
        }
    })
}
