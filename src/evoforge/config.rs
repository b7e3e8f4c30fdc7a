//! Environment-driven settings.
//!
//! [`Settings::from_env`] reads the process environment once at boot and
//! hands the embedding binary a typed view. The crate itself never reads the
//! environment elsewhere; every component takes explicit handles, so tests
//! construct [`Settings`] directly.
//!
//! Recognized keys:
//!
//! | Key | Meaning | Default |
//! |-----|---------|---------|
//! | `STORE_URL` | relational store connection string | in-memory |
//! | `CACHE_URL` | cache connection string | none |
//! | `OBJECT_STORE_ENDPOINT` / `_KEY` / `_SECRET` / `_BUCKET` | object store for spilled reports | none |
//! | `SECRET_KEY` | API signing secret (HTTP surface) | none |
//! | `CORS_ORIGINS` | comma-separated origin list | `http://localhost:3000` |
//! | `TOOL_REGISTRY_BOOTSTRAP_PATH` | declarative tool server list (JSON) | none |
//! | `EVAL_CONCURRENCY` | evaluator fan-out cap | CPU count |
//!
//! Exit-code convention for embedding binaries: 0 normal, 1 unrecoverable
//! startup failure, 2 bad configuration (`EvoError::Config`).

use std::env;

use crate::error::{EvoError, EvoResult};

/// Credentials and location of the external object store used for spilled
/// report payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStoreSettings {
    pub endpoint: String,
    pub key: String,
    pub secret: String,
    pub bucket: String,
}

/// Typed process configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Connection string of the relational store; `None` selects the
    /// in-memory store.
    pub store_url: Option<String>,
    /// Connection string of the cache layer, when one is deployed.
    pub cache_url: Option<String>,
    /// Object store credentials; present only when all four keys are set.
    pub object_store: Option<ObjectStoreSettings>,
    /// Signing secret for the HTTP surface.
    pub secret_key: Option<String>,
    /// Allowed CORS origins for the HTTP surface.
    pub cors_origins: Vec<String>,
    /// Path to the declarative tool registry bootstrap file.
    pub tool_registry_bootstrap_path: Option<String>,
    /// Concurrency cap for evaluator fan-out.
    pub eval_concurrency: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_url: None,
            cache_url: None,
            object_store: None,
            secret_key: None,
            cors_origins: vec!["http://localhost:3000".to_string()],
            tool_registry_bootstrap_path: None,
            eval_concurrency: num_cpus(),
        }
    }
}

impl Settings {
    /// Load settings from the process environment.
    ///
    /// Malformed numeric values are a configuration error; missing keys fall
    /// back to the defaults above.
    pub fn from_env() -> EvoResult<Self> {
        let mut settings = Settings::default();

        settings.store_url = non_empty(env::var("STORE_URL").ok());
        settings.cache_url = non_empty(env::var("CACHE_URL").ok());
        settings.secret_key = non_empty(env::var("SECRET_KEY").ok());
        settings.tool_registry_bootstrap_path =
            non_empty(env::var("TOOL_REGISTRY_BOOTSTRAP_PATH").ok());

        if let Some(origins) = non_empty(env::var("CORS_ORIGINS").ok()) {
            settings.cors_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
            if settings.cors_origins.is_empty() {
                settings.cors_origins = vec!["http://localhost:3000".to_string()];
            }
        }

        let endpoint = non_empty(env::var("OBJECT_STORE_ENDPOINT").ok());
        let key = non_empty(env::var("OBJECT_STORE_KEY").ok());
        let secret = non_empty(env::var("OBJECT_STORE_SECRET").ok());
        let bucket = non_empty(env::var("OBJECT_STORE_BUCKET").ok());
        match (endpoint, key, secret, bucket) {
            (Some(endpoint), Some(key), Some(secret), Some(bucket)) => {
                settings.object_store = Some(ObjectStoreSettings {
                    endpoint,
                    key,
                    secret,
                    bucket,
                });
            }
            (None, None, None, None) => {}
            _ => {
                return Err(EvoError::Config(
                    "OBJECT_STORE_{ENDPOINT,KEY,SECRET,BUCKET} must be set together".into(),
                ));
            }
        }

        if let Some(raw) = non_empty(env::var("EVAL_CONCURRENCY").ok()) {
            settings.eval_concurrency = raw.parse::<usize>().map_err(|_| {
                EvoError::Config(format!("EVAL_CONCURRENCY must be an integer, got '{}'", raw))
            })?;
            if settings.eval_concurrency == 0 {
                return Err(EvoError::Config("EVAL_CONCURRENCY must be >= 1".into()));
            }
        }

        Ok(settings)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
