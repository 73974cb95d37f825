//! Live-reloading credential store backed by an htpasswd file.
//!
//! Every lookup stats the file first.  The file is reparsed only when its
//! modification time differs from the one recorded at the last successful
//! load.  Each load builds a fresh immutable [`Snapshot`] which is swapped in
//! with `ArcSwap`, so concurrent readers always see one complete record set.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use prometheus_client::metrics::counter::Counter;
use tracing::{debug, error, info, warn};

use super::htpasswd::{parse_htpasswd, PasswordHash};

/// Lifecycle of the in-memory record set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// Nothing has been read yet.
    Uninitialized,
    /// The backing file does not exist; the store is empty.
    Missing,
    /// Records were parsed from the backing file.
    Loaded,
}

/// One immutable generation of the credential records.
#[derive(Debug)]
pub struct Snapshot {
    pub state: StoreState,
    /// Modification time of the file this snapshot was parsed from.  `None`
    /// forces the next lookup to reparse.
    pub modified: Option<SystemTime>,
    entries: Arc<HashMap<String, PasswordHash>>,
}

impl Snapshot {
    fn uninitialized() -> Self {
        Self {
            state: StoreState::Uninitialized,
            modified: None,
            entries: Arc::default(),
        }
    }

    fn missing() -> Self {
        Self {
            state: StoreState::Missing,
            modified: None,
            entries: Arc::default(),
        }
    }

    /// Same records, but forget the timestamp so the next lookup retries.
    fn stale(&self) -> Self {
        Self {
            state: self.state,
            modified: None,
            entries: Arc::clone(&self.entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Summary used by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStatus {
    pub state: StoreState,
    pub principals: usize,
}

pub struct CredentialStore {
    path: PathBuf,
    snapshot: ArcSwap<Snapshot>,
    reloads: Counter,
}

impl CredentialStore {
    /// Create a store for `path`.  Nothing is read until the first lookup.
    pub fn new(path: impl Into<PathBuf>, reloads: Counter) -> Self {
        Self {
            path: path.into(),
            snapshot: ArcSwap::from_pointee(Snapshot::uninitialized()),
            reloads,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of times the file has been parsed successfully.
    pub fn reload_count(&self) -> u64 {
        self.reloads.get()
    }

    /// Check `secret` for `principal`.  Never fails: any problem with the
    /// backing file results in `false` for principals it cannot vouch for.
    ///
    /// Performs blocking file I/O and hashing; call from a blocking context.
    pub fn verify(&self, principal: &str, secret: &str) -> bool {
        let snapshot = self.refresh();
        match snapshot.entries.get(principal) {
            Some(hash) => {
                let ok = hash.verify(secret);
                debug!(principal, ok, "credential checked");
                ok
            }
            None => {
                debug!(principal, state = ?snapshot.state, "unknown principal");
                false
            }
        }
    }

    pub fn status(&self) -> StoreStatus {
        let snapshot = self.refresh();
        StoreStatus {
            state: snapshot.state,
            principals: snapshot.len(),
        }
    }

    /// Bring the snapshot in line with the file on disk and return it.
    pub fn refresh(&self) -> Arc<Snapshot> {
        let current = self.snapshot.load_full();

        let metadata = match std::fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if current.state == StoreState::Missing {
                    return current;
                }
                info!(
                    path = %self.path.display(),
                    "credential file not found, refusing all logins until it exists"
                );
                return self.swap(Snapshot::missing());
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to stat credential file");
                return self.swap(current.stale());
            }
        };

        let modified = metadata.modified().ok();
        if modified.is_some() && modified == current.modified {
            return current;
        }

        match load_entries(&self.path) {
            Ok(entries) => {
                self.reloads.inc();
                info!(
                    path = %self.path.display(),
                    principals = entries.len(),
                    "credential file loaded"
                );
                self.swap(Snapshot {
                    state: StoreState::Loaded,
                    modified,
                    entries: Arc::new(entries),
                })
            }
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    error = %format!("{e:#}"),
                    "failed to load credential file, keeping previous records"
                );
                self.swap(current.stale())
            }
        }
    }

    fn swap(&self, next: Snapshot) -> Arc<Snapshot> {
        let next = Arc::new(next);
        self.snapshot.store(Arc::clone(&next));
        next
    }
}

fn load_entries(path: &Path) -> Result<HashMap<String, PasswordHash>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_htpasswd(&contents).with_context(|| format!("failed to parse {}", path.display()))
}
