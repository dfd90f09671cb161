//! Storage backends for novelgraph
//!
//! Two backends implement the `NarrativeBackend` trait: `SqliteBackend` for
//! persistent storage and `MemoryBackend` as a fallback. `connect_backend`
//! picks one explicitly at startup.

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use traits::{
    BackendKind, BackendStats, EntityFilter, NarrativeBackend, OpenBackend, StorageError,
    StorageResult,
};

use crate::config::StorageConfig;
use std::sync::Arc;
use tracing::{info, warn};

/// Probe the configured backend once and return the implementation to inject.
///
/// A configured SQLite backend that cannot be opened or pinged degrades to
/// the in-memory backend; the returned kind tells the caller which one it got.
pub fn connect_backend(config: &StorageConfig) -> (Arc<dyn NarrativeBackend>, BackendKind) {
    match config.backend {
        BackendKind::Memory => {
            info!("using in-memory narrative backend");
            (Arc::new(MemoryBackend::new()), BackendKind::Memory)
        }
        BackendKind::Sqlite => {
            let path = config.resolved_path();
            match SqliteBackend::open(&path).and_then(|store| store.ping().map(|_| store)) {
                Ok(store) => {
                    info!(path = %path.display(), "using sqlite narrative backend");
                    (Arc::new(store), BackendKind::Sqlite)
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "sqlite backend unavailable, falling back to in-memory backend"
                    );
                    (Arc::new(MemoryBackend::new()), BackendKind::Memory)
                }
            }
        }
    }
}
