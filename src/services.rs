//! Process context: backend, index, schema, access policy and configuration.
//!
//! Constructed once per process and shared by `Arc` with every facade. It
//! owns the lifecycle of the collaborators it holds: `shutdown()` closes the
//! index and the backend exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::index::{IndexBackend, MemoryIndex};
use crate::schema::SchemaRegistry;
use crate::security::{AccessPolicy, PermitAll};
use crate::storage::{BackendConfig, MemoryBackend, StorageBackend};
use crate::{Error, Result};

/// Default number of entities per bulk transaction.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// Service configuration.
///
/// ```json
/// { "backend": { "kind": "memory" }, "bulk_batch_size": 500 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    /// Entities per transaction for bulk jobs that don't pick their own size.
    #[serde(default = "default_batch_size")]
    pub bulk_batch_size: usize,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            bulk_batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl ServicesConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bulk_batch_size == 0 {
            return Err(Error::Config("bulk_batch_size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Shared process context.
pub struct Services<B: StorageBackend, I: IndexBackend> {
    backend: B,
    index: I,
    schema: SchemaRegistry,
    policy: Box<dyn AccessPolicy>,
    config: ServicesConfig,
    running: AtomicBool,
}

impl<B: StorageBackend, I: IndexBackend> Services<B, I> {
    /// Initialize services over the given collaborators, allowing everything.
    pub fn init(config: ServicesConfig, backend: B, index: I, schema: SchemaRegistry) -> Result<Arc<Self>> {
        Self::init_with_policy(config, backend, index, schema, PermitAll)
    }

    pub fn init_with_policy(
        config: ServicesConfig,
        backend: B,
        index: I,
        schema: SchemaRegistry,
        policy: impl AccessPolicy + 'static,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        info!(
            target: "trellis::services",
            backend = ?config.backend,
            types = schema.type_names().count(),
            batch_size = config.bulk_batch_size,
            "Initializing services"
        );
        Ok(Arc::new(Self {
            backend,
            index,
            schema,
            policy: Box::new(policy),
            config,
            running: AtomicBool::new(true),
        }))
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn policy(&self) -> &dyn AccessPolicy {
        self.policy.as_ref()
    }

    pub fn config(&self) -> &ServicesConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Shut down index and backend. Later calls are no-ops.
    pub fn shutdown(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        info!(target: "trellis::services", "Shutting down services");
        self.index.shutdown()?;
        self.backend.shutdown()
    }
}

impl Services<MemoryBackend, MemoryIndex> {
    /// In-memory backend and index sharing one graph.
    pub fn open_memory(config: ServicesConfig, schema: SchemaRegistry) -> Result<Arc<Self>> {
        match config.backend {
            BackendConfig::Memory => {
                let backend = MemoryBackend::new();
                let index = MemoryIndex::new(backend.clone());
                Self::init(config, backend, index, schema)
            }
        }
    }
}
