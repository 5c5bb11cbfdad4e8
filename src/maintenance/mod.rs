//! # Maintenance Commands
//!
//! Named, JSON-configured jobs run through the facade. Each command builds
//! its population and drives it through the bulk mutation engine.
//!
//! | Name | Command |
//! |------|---------|
//! | `changePropertyKey` | [`BulkChangePropertyKey`] |

pub mod rekey;

use std::sync::Arc;

use serde::Serialize;

use crate::index::IndexBackend;
use crate::security::SecurityContext;
use crate::services::Services;
use crate::storage::StorageBackend;
use crate::Result;

pub use rekey::{BulkChangePropertyKey, ChangePropertyKeyConfig};

/// Outcome of a maintenance run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Entities whose step succeeded in committed batches.
    pub succeeded: u64,
    /// Entities actually modified in committed batches.
    pub changed: u64,
}

/// A named maintenance job.
pub trait MaintenanceCommand<B: StorageBackend, I: IndexBackend> {
    /// Name the command is registered under.
    fn name(&self) -> &'static str;

    fn execute(
        &self,
        services: &Arc<Services<B, I>>,
        ctx: &SecurityContext,
        config: &serde_json::Value,
    ) -> Result<MaintenanceReport>;
}

/// Look up a built-in command by its registered name.
pub fn command_by_name<B: StorageBackend, I: IndexBackend>(name: &str) -> Option<Box<dyn MaintenanceCommand<B, I>>> {
    match name {
        rekey::NAME => Some(Box::new(BulkChangePropertyKey)),
        _ => None,
    }
}
