//! End-to-end tests for the command facade: typed creation, identity
//! lookup, transactions, visibility and lifecycle.

use pretty_assertions::assert_eq;

use trellis::model::{props, UUID_KEY};
use trellis::schema::{
    DateTimeConverter, EnumValidator, IntConverter, NotBlankValidator, PropertyKey, SchemaRegistry, ValueType,
};
use trellis::{
    App, Entity, Error, MemoryBackend, MemoryIndex, NodeId, PropertyMap, SecurityContext, Services,
    ServicesConfig, Value,
};

fn schema() -> SchemaRegistry {
    SchemaRegistry::builder()
        .register("Project", [
            PropertyKey::new("name", ValueType::String).with_validator(NotBlankValidator),
            PropertyKey::new("stage", ValueType::String)
                .with_validator(EnumValidator::new(["draft", "live", "archived"])),
            PropertyKey::new("budget", ValueType::Int).with_converter(IntConverter),
            PropertyKey::new("due", ValueType::DateTime).with_converter(DateTimeConverter),
            PropertyKey::new("owner", ValueType::String),
        ])
        .register("DEPENDS_ON", [PropertyKey::new("weight", ValueType::Int).with_converter(IntConverter)])
        .build()
}

fn app() -> App<MemoryBackend, MemoryIndex> {
    let config = ServicesConfig::from_json(r#"{"backend": {"kind": "memory"}, "bulk_batch_size": 50}"#).unwrap();
    App::new(Services::open_memory(config, schema()).unwrap(), SecurityContext::super_user())
}

fn uuid(entity: &Entity) -> String {
    entity.uuid().unwrap().to_string()
}

#[test]
fn test_create_converts_and_looks_up() {
    let app = app();
    let project = app
        .create_node(
            "Project",
            props([
                ("name", Value::from("trellis")),
                ("stage", Value::from("draft")),
                ("budget", Value::from("1200")),
                ("due", Value::from("2026-12-01")),
            ]),
        )
        .unwrap();

    let found = app.get(project.get(UUID_KEY).and_then(Value::as_str).unwrap()).unwrap();
    assert_eq!(found.get("budget"), Some(&Value::Int(1200)));
    assert!(matches!(found.get("due"), Some(Value::DateTime(_))));
    assert_eq!(found.type_name(), Some("Project"));

    let typed = app.get_typed("Project", &uuid(&found)).unwrap();
    assert_eq!(typed, found);
    assert!(matches!(app.get_typed("DEPENDS_ON", &uuid(&found)), Err(Error::NotFound(_))));
}

#[test]
fn test_conversion_and_validation_errors() {
    let app = app();
    let err = app.create_node("Project", props([("budget", "lots")])).unwrap_err();
    assert!(matches!(err, Error::Conversion { ref key, .. } if key == "budget"));

    let err = app.create_node("Project", props([("stage", "beta")])).unwrap_err();
    match err {
        Error::Validation { type_name, key, allowed, .. } => {
            assert_eq!((type_name.as_str(), key.as_str()), ("Project", "stage"));
            assert_eq!(allowed, vec![Value::from("draft"), Value::from("live"), Value::from("archived")]);
        }
        other => panic!("expected validation error, got {other}"),
    }

    assert!(matches!(app.create_node("Project", props([("name", "")])), Err(Error::Validation { .. })));
    assert!(app.get_by_type("Project").unwrap().is_empty());
}

#[test]
fn test_relationships_and_cascading_delete() {
    let app = app();
    let core = app.create_node("Project", props([("name", "core")])).unwrap();
    let ui = app.create_node("Project", props([("name", "ui")])).unwrap();
    let dep = app
        .create_relationship(ui.id, core.id, "DEPENDS_ON", props([("weight", "3")]))
        .unwrap();
    assert_eq!(dep.get("weight"), Some(&Value::Int(3)));

    let by_uuid = app.get(dep.get(UUID_KEY).and_then(Value::as_str).unwrap()).unwrap();
    assert_eq!(by_uuid.as_relationship().map(|r| r.src), Some(ui.id));

    let heavy = app.relationship_query().and_type("DEPENDS_ON").and("weight", 3).get_as_list().unwrap();
    assert_eq!(heavy.len(), 1);

    app.delete_node(core.id).unwrap();
    assert!(app.get_by_type("DEPENDS_ON").unwrap().is_empty());
    assert_eq!(app.get_by_type("Project").unwrap().len(), 1);
    assert!(matches!(app.delete_node(core.id), Err(Error::NotFound(_))));
}

#[test]
fn test_implicit_transaction_rolls_back_on_error() {
    let app = app();
    let core = app.create_node("Project", props([("name", "core")])).unwrap();
    let err = app.create_relationship(core.id, NodeId(999), "DEPENDS_ON", PropertyMap::new());
    assert!(matches!(err, Err(Error::NotFound(_))));
    assert!(app.get_by_type("DEPENDS_ON").unwrap().is_empty());
    assert!(!app.in_transaction());
}

#[test]
fn test_explicit_transaction_groups_writes() {
    let app = app();
    app.begin_tx().unwrap();
    app.create_node("Project", props([("name", "a")])).unwrap();
    app.create_node("Project", props([("name", "b")])).unwrap();
    app.commit_tx().unwrap();
    assert_eq!(app.get_by_type("Project").unwrap().len(), 2);

    app.begin_tx().unwrap();
    let c = app.create_node("Project", props([("name", "c")])).unwrap();
    assert_eq!(app.get_by_type("Project").unwrap().len(), 3);
    app.rollback_tx().unwrap();
    assert!(matches!(app.delete_node(c.id), Err(Error::NotFound(_))));
    assert!(matches!(app.commit_tx(), Err(Error::TransactionState(_))));
}

#[test]
fn test_visibility_follows_access_policy() {
    let backend = MemoryBackend::new();
    let index = MemoryIndex::new(backend.clone());
    let services = Services::init_with_policy(
        ServicesConfig::default(),
        backend,
        index,
        schema(),
        |ctx: &SecurityContext, e: &Entity| {
            ctx.is_super_user() || e.get("owner").and_then(Value::as_str) == ctx.user_name()
        },
    )
    .unwrap();

    let admin = App::new(services.clone(), SecurityContext::super_user());
    let mine = admin.create_node("Project", props([("name", "mine"), ("owner", "ada")])).unwrap();
    admin.create_node("Project", props([("name", "theirs"), ("owner", "grace")])).unwrap();

    let ada = App::new(services.clone(), SecurityContext::user("ada"));
    let visible = ada.get_by_type("Project").unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].get("name"), Some(&Value::from("mine")));

    let stranger = App::new(services, SecurityContext::anonymous());
    let hidden = mine.get(UUID_KEY).and_then(Value::as_str).unwrap();
    assert!(matches!(stranger.get(hidden), Err(Error::NotFound(_))));
}

#[test]
fn test_shutdown_is_shared_and_idempotent() {
    let app = app();
    let other = App::new(app.services().clone(), SecurityContext::super_user());
    app.begin_tx().unwrap();
    app.create_node("Project", props([("name", "pending")])).unwrap();
    app.shutdown().unwrap();
    app.shutdown().unwrap();

    assert!(!other.services().is_running());
    assert!(matches!(other.create_node("Project", props([("name", "late")])), Err(Error::StorageError(_))));
}
