//! Gateway configuration passed explicitly through constructors.
//!
//! # Invariants
//! - Nothing here is read from globals; callers build the structs and hand
//!   them to `PersistentStore::open` / `Gateway::open`.

use crate::db::DEFAULT_BUSY_TIMEOUT;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_PRESENTATION_THREAD: &str = "goodforme-presentation";

/// Where the backing SQLite database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    /// Private in-memory database; contents vanish on reopen.
    Memory,
}

/// Backing store settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub location: StoreLocation,
    pub busy_timeout: Duration,
}

impl StoreConfig {
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            location: StoreLocation::File(path.as_ref().to_path_buf()),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// Database file `<dir>/<name>.sqlite3`.
    pub fn named(dir: impl AsRef<Path>, name: &str) -> Self {
        Self::file(dir.as_ref().join(format!("{name}.sqlite3")))
    }

    pub fn in_memory() -> Self {
        Self {
            location: StoreLocation::Memory,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn mode(&self) -> &'static str {
        match self.location {
            StoreLocation::File(_) => "file",
            StoreLocation::Memory => "memory",
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Settings for one gateway session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub store: StoreConfig,
    /// Name of the thread that runs subscriber callbacks.
    pub presentation_thread: String,
}

impl GatewayConfig {
    pub fn new(store: StoreConfig) -> Self {
        Self {
            store,
            presentation_thread: DEFAULT_PRESENTATION_THREAD.to_string(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
