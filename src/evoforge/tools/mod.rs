//! Gated tool servers shipped with the engine.
//!
//! Each server enforces its own whitelist before doing any work:
//! directories for the filesystem server, hosts for the web server, tables
//! for the store-query server. Registration goes through the
//! [`ToolRegistry`](crate::registry::ToolRegistry) so every call is audit
//! logged.
//!
//! [`bootstrap_registry`] consumes the declarative server list named by
//! `TOOL_REGISTRY_BOOTSTRAP_PATH`:
//!
//! ```json
//! [
//!   {"server": "filesystem", "root": "/var/data/corpus"},
//!   {"server": "web", "allowed_hosts": ["api.example.com"]},
//!   {"server": "store-query", "allowed_tables": ["campaigns", "rounds", "variants"]}
//! ]
//! ```

pub mod filesystem;
pub mod query;
pub mod web;

pub use filesystem::FilesystemToolServer;
pub use query::StoreQueryToolServer;
pub use web::WebToolServer;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{EvoError, EvoResult};
use crate::registry::ToolRegistry;
use crate::store::Store;

/// One entry of the bootstrap file.
#[derive(Debug, Deserialize)]
#[serde(tag = "server", rename_all = "kebab-case")]
enum BootstrapEntry {
    Filesystem {
        root: PathBuf,
    },
    Web {
        allowed_hosts: Vec<String>,
    },
    StoreQuery {
        allowed_tables: Vec<String>,
    },
}

/// Construct and register tool servers from a declarative JSON list.
///
/// Unknown server names are a configuration error; an empty list is valid
/// (a registry with no servers refuses every call with
/// `ToolServerNotFound`).
pub fn bootstrap_registry(
    registry: &mut ToolRegistry,
    store: Arc<Store>,
    path: &Path,
) -> EvoResult<usize> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        EvoError::Config(format!(
            "cannot read tool bootstrap file {}: {}",
            path.display(),
            e
        ))
    })?;
    let entries: Vec<BootstrapEntry> = serde_json::from_str(&raw).map_err(|e| {
        EvoError::Config(format!(
            "malformed tool bootstrap file {}: {}",
            path.display(),
            e
        ))
    })?;

    let count = entries.len();
    for entry in entries {
        match entry {
            BootstrapEntry::Filesystem { root } => {
                registry.register(Arc::new(FilesystemToolServer::new(root)));
            }
            BootstrapEntry::Web { allowed_hosts } => {
                registry.register(Arc::new(WebToolServer::new(allowed_hosts)));
            }
            BootstrapEntry::StoreQuery { allowed_tables } => {
                registry.register(Arc::new(StoreQueryToolServer::new(
                    store.clone(),
                    allowed_tables,
                )));
            }
        }
    }
    Ok(count)
}
