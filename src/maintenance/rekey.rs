//! Bulk rename of a property key.
//!
//! Moves the value of `oldKey` to `newKey` on every node of a type, or on
//! every node when no type is given, optionally relabelling the node to
//! `newType`. A node that already carries `newKey` poisons its batch.
//!
//! ```json
//! { "oldKey": "email", "newKey": "eMail", "type": "User", "newType": "Account" }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::bulk::{BulkMutation, BulkStep, StepFailure, StepResult};
use crate::index::IndexBackend;
use crate::model::{Entity, EntityId, EntityKind, Value, TYPE_KEY};
use crate::schema::SchemaRegistry;
use crate::search::{Occur, Predicate, PredicateGroup, QueryExecutor};
use crate::security::SecurityContext;
use crate::services::Services;
use crate::storage::StorageBackend;
use crate::tx::TxMode;
use crate::{Error, Result};
use super::{MaintenanceCommand, MaintenanceReport};

pub(crate) const NAME: &str = "changePropertyKey";

/// Parsed job configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePropertyKeyConfig {
    #[serde(default)]
    pub old_key: Option<String>,
    #[serde(default)]
    pub new_key: Option<String>,
    /// Restrict the job to one type.
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub new_type: Option<String>,
    /// Overrides the configured bulk batch size.
    #[serde(default)]
    pub batch_size: Option<usize>,
}

fn non_blank(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// The `changePropertyKey` maintenance command.
#[derive(Debug, Clone, Copy, Default)]
pub struct BulkChangePropertyKey;

impl BulkChangePropertyKey {
    pub fn run<B: StorageBackend, I: IndexBackend>(
        &self,
        services: &Arc<Services<B, I>>,
        ctx: &SecurityContext,
        config: &ChangePropertyKeyConfig,
    ) -> Result<MaintenanceReport> {
        let (Some(old_key), Some(new_key)) = (non_blank(&config.old_key), non_blank(&config.new_key)) else {
            info!(target: "trellis::maintenance", "No values for oldKey and/or newKey found, nothing to do");
            return Ok(MaintenanceReport::default());
        };

        let population = match non_blank(&config.type_name) {
            Some(type_name) => {
                let tree = PredicateGroup::default().with(Predicate::of_type(Occur::Must, type_name));
                QueryExecutor::new(Arc::clone(services)).execute(&tree, EntityKind::Node, ctx)?
            }
            None => {
                let backend = services.backend();
                let tx = backend.begin_tx(TxMode::ReadOnly)?;
                let all = backend.scan_all_entities(&tx, EntityKind::Node)?;
                backend.commit_tx(tx)?;
                all
            }
        };

        info!(
            target: "trellis::maintenance",
            old_key, new_key,
            type_name = ?config.type_name,
            new_type = ?config.new_type,
            population = population.len(),
            "Changing property key"
        );

        let mut step = RekeyStep {
            schema: services.schema(),
            old_key,
            new_key,
            new_type: non_blank(&config.new_type),
            pending: 0,
            changed: 0,
        };
        let succeeded = BulkMutation::new(NAME)
            .batch_size(config.batch_size.unwrap_or(services.config().bulk_batch_size))
            .run(services.backend(), ctx, population, &mut step)?;

        info!(target: "trellis::maintenance", succeeded, changed = step.changed, "Property key change done");
        Ok(MaintenanceReport { succeeded, changed: step.changed })
    }
}

impl<B: StorageBackend, I: IndexBackend> MaintenanceCommand<B, I> for BulkChangePropertyKey {
    fn name(&self) -> &'static str {
        NAME
    }

    fn execute(
        &self,
        services: &Arc<Services<B, I>>,
        ctx: &SecurityContext,
        config: &serde_json::Value,
    ) -> Result<MaintenanceReport> {
        let config = ChangePropertyKeyConfig::deserialize(config)?;
        self.run(services, ctx, &config)
    }
}

struct RekeyStep<'a> {
    schema: &'a SchemaRegistry,
    old_key: &'a str,
    new_key: &'a str,
    new_type: Option<&'a str>,
    /// Changes in the current, uncommitted batch.
    pending: u64,
    changed: u64,
}

impl<B: StorageBackend> BulkStep<B> for RekeyStep<'_> {
    fn handle(&mut self, backend: &B, tx: &mut B::Tx, _ctx: &SecurityContext, entity: &Entity) -> StepResult {
        let id = entity.id();
        let mut modified = false;
        if let Some(value) = backend.get_property(tx, id, self.old_key).map_err(StepFailure::Entity)? {
            if backend.has_property(tx, id, self.new_key).map_err(StepFailure::Entity)? {
                return Err(StepFailure::Batch(Error::InvariantViolation(format!(
                    "{id} already has a property '{}'", self.new_key
                ))));
            }
            let value = match entity.type_name().and_then(|t| self.schema.key(t, self.new_key)) {
                Some(key) => key.convert(value).map_err(StepFailure::Entity)?,
                None => value,
            };
            backend.set_property(tx, id, self.new_key, value).map_err(StepFailure::Entity)?;
            backend.remove_property(tx, id, self.old_key).map_err(StepFailure::Entity)?;
            modified = true;
        }

        if let Some(new_type) = self.new_type {
            backend
                .set_property(tx, id, TYPE_KEY, Value::from(new_type))
                .map_err(StepFailure::Entity)?;
            if let EntityId::Node(node) = id {
                if let Some(old_type) = entity.type_name().filter(|t| *t != new_type) {
                    backend.remove_label(tx, node, old_type).map_err(StepFailure::Entity)?;
                }
                backend.add_label(tx, node, new_type).map_err(StepFailure::Entity)?;
            }
            modified = true;
        }

        if modified {
            self.pending += 1;
        }
        Ok(())
    }

    fn on_entity_failure(&mut self, _ctx: &SecurityContext, entity: &Entity, error: &Error) {
        warn!(target: "trellis::maintenance", entity = %entity.id(), %error, "Unable to change property key");
    }

    fn on_transaction_failure(&mut self, _ctx: &SecurityContext, error: &Error) {
        warn!(target: "trellis::maintenance", discarded = self.pending, %error, "Unable to change property keys in batch");
        self.pending = 0;
    }

    fn on_batch_committed(&mut self) {
        self.changed += std::mem::take(&mut self.pending);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;
    use crate::model::props;
    use crate::schema::{IntConverter, PropertyKey, ValueType};
    use crate::services::ServicesConfig;
    use crate::storage::MemoryBackend;

    fn services() -> Arc<Services<MemoryBackend, MemoryIndex>> {
        let schema = SchemaRegistry::builder()
            .register("Item", [
                PropertyKey::new("old", ValueType::Any),
                PropertyKey::new("count", ValueType::Int).with_converter(IntConverter),
            ])
            .register("Thing", Vec::<PropertyKey>::new())
            .build();
        Services::open_memory(ServicesConfig::default(), schema).unwrap()
    }

    fn create(services: &Services<MemoryBackend, MemoryIndex>, pairs: &[(&str, Value)]) -> EntityId {
        let backend = services.backend();
        let mut tx = backend.begin_tx(TxMode::ReadWrite).unwrap();
        let mut p = props([(TYPE_KEY, "Item")]);
        p.extend(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())));
        let id = backend.create_node(&mut tx, &["Item"], p).unwrap();
        backend.commit_tx(tx).unwrap();
        id.into()
    }

    fn get(services: &Services<MemoryBackend, MemoryIndex>, id: EntityId) -> Entity {
        let backend = services.backend();
        let tx = backend.begin_tx(TxMode::ReadOnly).unwrap();
        backend.get_entity(&tx, id).unwrap().unwrap()
    }

    fn config(json: serde_json::Value) -> ChangePropertyKeyConfig {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_config_parsing() {
        let parsed = config(serde_json::json!({"oldKey": "a", "newKey": "b", "type": "Item", "newType": "Thing"}));
        assert_eq!(parsed.type_name.as_deref(), Some("Item"));
        assert_eq!(parsed.new_type.as_deref(), Some("Thing"));
        assert_eq!(parsed.batch_size, None);
    }

    #[test]
    fn test_blank_keys_are_a_no_op() {
        let services = services();
        let a = create(&services, &[("old", Value::Int(1))]);
        let before = services.backend().tx_stats();
        let report = BulkChangePropertyKey
            .run(&services, &SecurityContext::super_user(), &config(serde_json::json!({"oldKey": " ", "newKey": "new"})))
            .unwrap();
        assert_eq!(report, MaintenanceReport::default());
        assert_eq!(services.backend().tx_stats(), before);
        assert_eq!(get(&services, a).get("old"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_collision_poisons_only_its_batch() {
        let services = services();
        let a = create(&services, &[("old", Value::Int(1))]);
        let b = create(&services, &[]);
        let c = create(&services, &[("old", Value::Int(2)), ("new", Value::Int(5))]);

        let report = BulkChangePropertyKey
            .run(
                &services,
                &SecurityContext::super_user(),
                &config(serde_json::json!({"oldKey": "old", "newKey": "new", "batchSize": 2})),
            )
            .unwrap();
        assert_eq!(report, MaintenanceReport { succeeded: 2, changed: 1 });

        let a = get(&services, a);
        assert_eq!(a.get("new"), Some(&Value::Int(1)));
        assert!(!a.has("old"));
        assert!(!get(&services, b).has("new"));
        let c = get(&services, c);
        assert_eq!((c.get("old"), c.get("new")), (Some(&Value::Int(2)), Some(&Value::Int(5))));
    }

    #[test]
    fn test_second_run_over_moved_keys_succeeds_without_changes() {
        let services = services();
        let ids: Vec<EntityId> = (1..=3).map(|i| create(&services, &[("old", Value::Int(i))])).collect();
        let rekey = config(serde_json::json!({"oldKey": "old", "newKey": "new", "batchSize": 2}));

        let first = BulkChangePropertyKey.run(&services, &SecurityContext::super_user(), &rekey).unwrap();
        assert_eq!(first, MaintenanceReport { succeeded: 3, changed: 3 });
        let before = services.backend().tx_stats();

        let second = BulkChangePropertyKey.run(&services, &SecurityContext::super_user(), &rekey).unwrap();
        assert_eq!(second, MaintenanceReport { succeeded: 3, changed: 0 });
        assert_eq!(services.backend().tx_stats().rolled_back, before.rolled_back);
        for (i, id) in ids.into_iter().enumerate() {
            let e = get(&services, id);
            assert_eq!((e.get("old"), e.get("new")), (None, Some(&Value::Int(i as i64 + 1))));
        }
    }

    #[test]
    fn test_destination_converter_and_entity_failure() {
        let services = services();
        let ok = create(&services, &[("raw", Value::from("12"))]);
        let bad = create(&services, &[("raw", Value::from("twelve"))]);

        let report = BulkChangePropertyKey
            .run(
                &services,
                &SecurityContext::super_user(),
                &config(serde_json::json!({"oldKey": "raw", "newKey": "count", "type": "Item"})),
            )
            .unwrap();
        assert_eq!(report, MaintenanceReport { succeeded: 1, changed: 1 });
        assert_eq!(get(&services, ok).get("count"), Some(&Value::Int(12)));
        assert_eq!(get(&services, bad).get("raw"), Some(&Value::from("twelve")));
    }

    #[test]
    fn test_new_type_relabels() {
        let services = services();
        let a = create(&services, &[("old", Value::Int(1))]);
        BulkChangePropertyKey
            .run(
                &services,
                &SecurityContext::super_user(),
                &config(serde_json::json!({"oldKey": "old", "newKey": "new", "type": "Item", "newType": "Thing"})),
            )
            .unwrap();

        let entity = get(&services, a);
        assert_eq!(entity.type_name(), Some("Thing"));
        let node = entity.as_node().unwrap();
        assert!(node.has_label("Thing"));
        assert!(!node.has_label("Item"));
    }
}
