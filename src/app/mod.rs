//! # Command Facade
//!
//! [`App`] is the single entry point for callers: entity creation and
//! deletion, identity lookup, queries, explicit transactions and
//! maintenance, all scoped to one [`SecurityContext`].
//!
//! Writes join the facade's open transaction when there is one. Otherwise
//! each write runs in its own implicit transaction that commits on success
//! and rolls back on error.
//!
//! The facade is single-threaded; create one per caller over shared
//! [`Services`].

pub mod commands;

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::index::IndexBackend;
use crate::maintenance::{command_by_name, MaintenanceCommand, MaintenanceReport};
use crate::model::{Entity, EntityKind, Node, NodeId, PropertyMap, RelId, Relationship};
use crate::search::Query;
use crate::security::SecurityContext;
use crate::services::Services;
use crate::storage::StorageBackend;
use crate::tx::{Transaction, TxMode};
use crate::{Error, Result};

pub use commands::{
    Command, CreateNodeCommand, CreateRelationshipCommand, DeleteNodeCommand,
    DeleteRelationshipCommand, SearchCommand,
};

pub struct App<B: StorageBackend, I: IndexBackend> {
    services: Arc<Services<B, I>>,
    ctx: Arc<SecurityContext>,
    commands: RefCell<HashMap<TypeId, Rc<dyn Any>>>,
    tx: RefCell<Option<B::Tx>>,
}

impl<B: StorageBackend, I: IndexBackend> App<B, I> {
    pub fn new(services: Arc<Services<B, I>>, ctx: impl Into<Arc<SecurityContext>>) -> Self {
        Self {
            services,
            ctx: ctx.into(),
            commands: RefCell::new(HashMap::new()),
            tx: RefCell::new(None),
        }
    }

    pub fn services(&self) -> &Arc<Services<B, I>> {
        &self.services
    }

    pub fn security_context(&self) -> &SecurityContext {
        &self.ctx
    }

    /// The command of type `C`, built on first use and cached for the
    /// lifetime of the facade.
    pub fn command<C: Command<B, I>>(&self) -> Rc<C> {
        let key = TypeId::of::<C>();
        if let Some(cached) = self.commands.borrow().get(&key) {
            if let Ok(command) = Rc::clone(cached).downcast::<C>() {
                return command;
            }
        }
        let command = Rc::new(C::build(&self.services, &self.ctx));
        self.commands.borrow_mut().insert(key, Rc::clone(&command) as Rc<dyn Any>);
        command
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    pub fn begin_tx(&self) -> Result<()> {
        let mut open = self.tx.borrow_mut();
        if let Some(tx) = open.as_ref() {
            return Err(Error::TransactionState(format!("{} is already open", tx.id())));
        }
        let tx = self.services.backend().begin_tx(TxMode::ReadWrite)?;
        debug!(target: "trellis::app", tx = %tx.id(), "transaction opened");
        *open = Some(tx);
        Ok(())
    }

    pub fn commit_tx(&self) -> Result<()> {
        let tx = self.take_tx("commit")?;
        debug!(target: "trellis::app", tx = %tx.id(), "committing");
        self.services.backend().commit_tx(tx)
    }

    pub fn rollback_tx(&self) -> Result<()> {
        let tx = self.take_tx("roll back")?;
        debug!(target: "trellis::app", tx = %tx.id(), "rolling back");
        self.services.backend().rollback_tx(tx)
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.borrow().is_some()
    }

    fn take_tx(&self, action: &str) -> Result<B::Tx> {
        self.tx
            .borrow_mut()
            .take()
            .ok_or_else(|| Error::TransactionState(format!("cannot {action}: no transaction is open")))
    }

    /// Run a write in the open transaction, or in an implicit one.
    fn write<T>(&self, f: impl FnOnce(&mut B::Tx) -> Result<T>) -> Result<T> {
        if let Some(tx) = self.tx.borrow_mut().as_mut() {
            return f(tx);
        }

        let backend = self.services.backend();
        let mut tx = backend.begin_tx(TxMode::ReadWrite)?;
        match f(&mut tx) {
            Ok(value) => {
                backend.commit_tx(tx)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = backend.rollback_tx(tx) {
                    warn!(target: "trellis::app", error = %rollback_err, "implicit rollback failed");
                }
                Err(err)
            }
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Create a node of a registered type. Declared attributes are converted
    /// and validated; `type` and `uuid` are set by the facade.
    pub fn create_node(&self, type_name: &str, attributes: PropertyMap) -> Result<Node> {
        let command = self.command::<CreateNodeCommand<B, I>>();
        self.write(|tx| command.execute(tx, type_name, attributes))
    }

    pub fn create_relationship(
        &self,
        from: NodeId,
        to: NodeId,
        rel_type: &str,
        attributes: PropertyMap,
    ) -> Result<Relationship> {
        let command = self.command::<CreateRelationshipCommand<B, I>>();
        self.write(|tx| command.execute(tx, from, to, rel_type, attributes))
    }

    /// Delete a node and every relationship attached to it.
    pub fn delete_node(&self, id: NodeId) -> Result<()> {
        let command = self.command::<DeleteNodeCommand<B, I>>();
        self.write(|tx| command.execute(tx, id))
    }

    pub fn delete_relationship(&self, id: RelId) -> Result<()> {
        let command = self.command::<DeleteRelationshipCommand<B, I>>();
        self.write(|tx| command.execute(tx, id))
    }

    pub fn delete(&self, entity: &Entity) -> Result<()> {
        match entity {
            Entity::Node(node) => self.delete_node(node.id),
            Entity::Relationship(rel) => self.delete_relationship(rel.id),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn node_query(&self) -> Query<B, I> {
        self.command::<SearchCommand<B, I>>().query(EntityKind::Node)
    }

    pub fn relationship_query(&self) -> Query<B, I> {
        self.command::<SearchCommand<B, I>>().query(EntityKind::Relationship)
    }

    /// Identity lookup across nodes and relationships.
    pub fn get(&self, uuid: &str) -> Result<Entity> {
        if let Some(node) = self.node_query().uuid(uuid).get_first()? {
            return Ok(node);
        }
        self.relationship_query()
            .uuid(uuid)
            .get_first()?
            .ok_or_else(|| Error::NotFound(format!("entity with uuid {uuid}")))
    }

    /// Every entity of a type, nodes first.
    pub fn get_by_type(&self, type_name: &str) -> Result<Vec<Entity>> {
        let mut entities = self.node_query().and_type(type_name).get_as_list()?;
        entities.extend(self.relationship_query().and_type(type_name).get_as_list()?);
        Ok(entities)
    }

    /// Identity lookup restricted to one type.
    pub fn get_typed(&self, type_name: &str, uuid: &str) -> Result<Entity> {
        if let Some(node) = self.node_query().and_type(type_name).uuid(uuid).get_first()? {
            return Ok(node);
        }
        self.relationship_query()
            .and_type(type_name)
            .uuid(uuid)
            .get_first()?
            .ok_or_else(|| Error::NotFound(format!("{type_name} with uuid {uuid}")))
    }

    // ========================================================================
    // Maintenance and lifecycle
    // ========================================================================

    /// Run a maintenance command. Bulk jobs manage their own transactions,
    /// so none may be open on the facade.
    pub fn maintenance(
        &self,
        command: &dyn MaintenanceCommand<B, I>,
        config: &serde_json::Value,
    ) -> Result<MaintenanceReport> {
        if self.in_transaction() {
            return Err(Error::TransactionState(format!(
                "cannot run maintenance command '{}' inside an open transaction", command.name()
            )));
        }
        command.execute(&self.services, &self.ctx, config)
    }

    /// Run a built-in maintenance command by its registered name.
    pub fn maintenance_by_name(&self, name: &str, config: &serde_json::Value) -> Result<MaintenanceReport> {
        let command = command_by_name::<B, I>(name)
            .ok_or_else(|| Error::NotFound(format!("maintenance command '{name}'")))?;
        self.maintenance(command.as_ref(), config)
    }

    /// Roll back any open transaction, then shut down the shared services.
    pub fn shutdown(&self) -> Result<()> {
        if self.in_transaction() {
            self.rollback_tx()?;
        }
        self.services.shutdown()
    }
}

impl<B: StorageBackend, I: IndexBackend> Drop for App<B, I> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.get_mut().take() {
            warn!(target: "trellis::app", tx = %tx.id(), "facade dropped with an open transaction, rolling back");
            if let Err(err) = self.services.backend().rollback_tx(tx) {
                warn!(target: "trellis::app", error = %err, "rollback on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;
    use crate::model::{props, EntityId, Value, TYPE_KEY, UUID_KEY};
    use crate::schema::{EnumValidator, IntConverter, PropertyKey, SchemaRegistry, ValueType};
    use crate::services::ServicesConfig;
    use crate::storage::MemoryBackend;

    fn app() -> App<MemoryBackend, MemoryIndex> {
        let schema = SchemaRegistry::builder()
            .register("Person", [
                PropertyKey::new("name", ValueType::String),
                PropertyKey::new("age", ValueType::Int).with_converter(IntConverter),
                PropertyKey::new("status", ValueType::String)
                    .with_validator(EnumValidator::new(["active", "retired"])),
            ])
            .register("KNOWS", [PropertyKey::new("since", ValueType::Int)])
            .build();
        let services = Services::open_memory(ServicesConfig::default(), schema).unwrap();
        App::new(services, SecurityContext::super_user())
    }

    #[test]
    fn test_create_node_stamps_type_and_uuid() {
        let app = app();
        let node = app.create_node("Person", props([("name", Value::from("Ada")), ("age", Value::from("36"))])).unwrap();
        assert!(node.has_label("Person"));
        assert_eq!(node.get(TYPE_KEY), Some(&Value::from("Person")));
        assert_eq!(node.get("age"), Some(&Value::Int(36)));
        let uuid = node.get(UUID_KEY).and_then(Value::as_str).unwrap();
        assert_eq!(uuid.len(), 32);
        assert!(uuid.chars().all(|c| c.is_ascii_hexdigit()));

        assert_eq!(app.get(uuid).unwrap().id(), EntityId::Node(node.id));
        assert_eq!(app.get_typed("Person", uuid).unwrap().id(), EntityId::Node(node.id));
        assert!(matches!(app.get("missing"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_enum_validation_lists_allowed_values() {
        let app = app();
        let err = app.create_node("Person", props([("status", "dormant")])).unwrap_err();
        match err {
            Error::Validation { key, allowed, .. } => {
                assert_eq!(key, "status");
                assert_eq!(allowed, vec![Value::from("active"), Value::from("retired")]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(app.get_by_type("Person").unwrap().is_empty());
        assert!(matches!(app.create_node("Robot", PropertyMap::new()), Err(Error::UnknownType(_))));
    }

    #[test]
    fn test_unbalanced_transactions() {
        let app = app();
        assert!(matches!(app.commit_tx(), Err(Error::TransactionState(_))));
        assert!(matches!(app.rollback_tx(), Err(Error::TransactionState(_))));
        app.begin_tx().unwrap();
        assert!(matches!(app.begin_tx(), Err(Error::TransactionState(_))));
        app.commit_tx().unwrap();
    }

    #[test]
    fn test_explicit_transaction_rollback() {
        let app = app();
        app.begin_tx().unwrap();
        let ada = app.create_node("Person", props([("name", "Ada")])).unwrap();
        let bob = app.create_node("Person", props([("name", "Bob")])).unwrap();
        app.create_relationship(ada.id, bob.id, "KNOWS", props([("since", 2020)])).unwrap();
        app.rollback_tx().unwrap();

        assert!(app.get_by_type("Person").unwrap().is_empty());
        assert!(app.get_by_type("KNOWS").unwrap().is_empty());
    }

    #[test]
    fn test_drop_rolls_back_open_transaction() {
        let app = app();
        let services = Arc::clone(app.services());
        app.begin_tx().unwrap();
        app.create_node("Person", props([("name", "Ada")])).unwrap();
        drop(app);

        let app = App::new(services, SecurityContext::super_user());
        assert!(app.get_by_type("Person").unwrap().is_empty());
    }

    #[test]
    fn test_delete_cascades_relationships() {
        let app = app();
        let ada = app.create_node("Person", props([("name", "Ada")])).unwrap();
        let bob = app.create_node("Person", props([("name", "Bob")])).unwrap();
        let knows = app.create_relationship(ada.id, bob.id, "KNOWS", PropertyMap::new()).unwrap();
        assert_eq!(app.get_by_type("KNOWS").unwrap().len(), 1);

        app.delete(&Entity::Node(ada)).unwrap();
        assert!(app.get_by_type("KNOWS").unwrap().is_empty());
        assert!(matches!(app.delete_relationship(knows.id), Err(Error::NotFound(_))));
        assert_eq!(app.get_by_type("Person").unwrap().len(), 1);
    }

    #[test]
    fn test_commands_are_memoized() {
        let app = app();
        let first = app.command::<SearchCommand<MemoryBackend, MemoryIndex>>();
        let second = app.command::<SearchCommand<MemoryBackend, MemoryIndex>>();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_maintenance_requires_no_open_transaction() {
        let app = app();
        let config = serde_json::json!({"oldKey": "name", "newKey": "fullName"});
        app.begin_tx().unwrap();
        assert!(matches!(
            app.maintenance_by_name("changePropertyKey", &config),
            Err(Error::TransactionState(_))
        ));
        app.rollback_tx().unwrap();
        assert!(matches!(app.maintenance_by_name("vacuum", &config), Err(Error::NotFound(_))));
    }
}
