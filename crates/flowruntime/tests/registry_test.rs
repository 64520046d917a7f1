mod common;

use common::{test_registry, LegacyEchoFactory};
use flowcore::{GraphError, MigrationError, NodeError, NodeSpec, WorkflowDefinition};
use flowruntime::{
    validate_definition, validate_type_keys, ConfigIssue, ExecutorKind, FieldOp, Migration,
    MigrationChain, NodeFactory, NodeRegistry,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;

fn config(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("config must be an object"),
    }
}

#[test]
fn test_resolve_prefers_declarative_catalog() {
    struct Shadow;
    impl NodeFactory for Shadow {
        fn create(&self, config: &Map<String, Value>) -> Result<Box<dyn flowcore::Node>, NodeError> {
            LegacyEchoFactory.create(config)
        }
        fn node_type(&self) -> &str {
            "test.const"
        }
    }

    let (mut registry, _) = test_registry();
    registry.register(Arc::new(Shadow));

    let entry = registry.resolve("test.const").unwrap();
    assert_eq!(entry.kind(), ExecutorKind::Declarative);
    assert_eq!(registry.resolve("legacy.echo").unwrap().kind(), ExecutorKind::Legacy);
    // Shadowed legacy keys are listed once
    assert_eq!(
        registry.list_node_types().iter().filter(|t| *t == "test.const").count(),
        1
    );
}

#[test]
fn test_unknown_type_reports_candidate() {
    let registry = NodeRegistry::new();
    match registry.resolve("nope") {
        Err(NodeError::TypeNotFound { candidates }) => assert_eq!(candidates, vec!["nope"]),
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("empty registry resolved a type"),
    }
}

#[test]
fn test_descriptors_and_categories() {
    let (registry, _) = test_registry();

    let legacy = registry.get("legacy.echo").unwrap();
    assert_eq!(legacy.kind, ExecutorKind::Legacy);
    assert_eq!(legacy.category, "legacy");
    assert_eq!(legacy.version, None);

    let versioned = registry.get("test.versioned").unwrap();
    assert_eq!(versioned.version, Some(3));
    assert_eq!(versioned.fields.len(), 3);

    let categories = registry.categories();
    assert_eq!(categories.keys().collect::<Vec<_>>(), vec!["legacy", "test"]);
}

#[test]
fn test_migration_chain_preserves_recognized_fields() {
    let (registry, _) = test_registry();
    let entry = registry.resolve("test.versioned").unwrap();

    let v1 = config(json!({"name": "report", "count": 7, "mode": "slow", "legacyFlag": true}));
    let migrated = entry.migrate_config("n1", v1, Some(1));

    assert_eq!(migrated.get("display"), Some(&json!({"label": "report"})));
    assert_eq!(migrated.get("count"), Some(&json!(7)));
    assert_eq!(migrated.get("mode"), Some(&json!("slow")));
    assert!(!migrated.contains_key("legacyFlag"));
    assert!(!migrated.contains_key("name"));
}

#[test]
fn test_current_or_unversioned_config_untouched() {
    let (registry, _) = test_registry();
    let entry = registry.resolve("test.versioned").unwrap();
    let original = config(json!({"name": "kept"}));

    assert_eq!(entry.migrate_config("n", original.clone(), None), original);
    assert_eq!(entry.migrate_config("n", original.clone(), Some(3)), original);
}

#[test]
fn test_failed_migration_falls_back_to_original() {
    let (registry, _) = test_registry();
    let entry = registry.resolve("test.versioned").unwrap();

    // A downgrade has no path; the original config is used as is.
    let future = config(json!({"display": {"label": "x"}, "extra": 1}));
    assert_eq!(entry.migrate_config("n", future.clone(), Some(9)), future);
}

#[test]
fn test_chain_errors() {
    let chain = MigrationChain::new(vec![
        Migration::new(2, 3).with(FieldOp::set_default("b", json!(true))),
        Migration::new(1, 2).with(FieldOp::rename("a", "b")),
    ]);
    let cfg = config(json!({"a": 1}));

    assert_eq!(chain.migrate(&cfg, 1, 3).unwrap(), config(json!({"b": 1})));
    assert_eq!(
        chain.migrate(&cfg, 3, 1).unwrap_err(),
        MigrationError::Downgrade { from: 3, to: 1 }
    );
    assert_eq!(
        chain.migrate(&cfg, 1, 4).unwrap_err(),
        MigrationError::MissingStep { from: 3, to: 4 }
    );

    let clash = MigrationChain::new(vec![Migration::new(1, 2).with(FieldOp::rename("a", "b"))]);
    let err = clash.migrate(&config(json!({"a": 1, "b": 2})), 1, 2).unwrap_err();
    assert!(matches!(err, MigrationError::Field { ref field, .. } if field == "b"));
}

#[test]
fn test_validate_config_against_schema() {
    let (registry, _) = test_registry();

    assert!(registry
        .validate_config("test.versioned", &config(json!({"display": {}})))
        .is_ok());

    let issues = registry
        .validate_config("test.versioned", &config(json!({"count": "many"})))
        .unwrap_err();
    assert!(issues.contains(&ConfigIssue::Missing {
        field: "display".to_string()
    }));
    assert!(issues
        .iter()
        .any(|i| matches!(i, ConfigIssue::WrongType { field, .. } if field == "count")));

    assert!(registry.validate_config("missing.type", &Map::new()).is_err());
}

#[test]
fn test_type_key_validation() {
    let (registry, _) = test_registry();

    let clean = WorkflowDefinition::new("clean")
        .with_node(NodeSpec::new("a", "test.const"))
        .with_node(NodeSpec::new("b", "legacy.echo").with_subtype("legacy.echo"))
        .with_edge("a", "b");
    assert!(validate_definition(&clean, &registry).is_ok());

    let sloppy = WorkflowDefinition::new("sloppy")
        .with_node(NodeSpec::new("fallback", "test.constNode"))
        .with_node(NodeSpec::new("ambiguous", "test.fail").with_subtype("test.const"))
        .with_node(NodeSpec::new("unknown", "does.not.exist"))
        .with_node(NodeSpec::new("blank", ""));

    match validate_type_keys(&sloppy, &registry) {
        Err(GraphError::InvalidTypeKeys { issues }) => {
            assert_eq!(issues.len(), 4, "{:?}", issues);
            assert!(issues[0].contains("fallback 'test.const'"));
            assert!(issues[1].contains("different executors"));
            assert!(issues[2].contains("unknown type 'does.not.exist'"));
            assert!(issues[3].contains("has no type"));
        }
        other => panic!("expected type key issues, got {:?}", other),
    }
}

#[test]
fn test_validate_definition_rejects_cycles_first() {
    let (registry, _) = test_registry();
    let cyclic = WorkflowDefinition::new("cyclic")
        .with_node(NodeSpec::new("a", "test.const"))
        .with_node(NodeSpec::new("b", "test.const"))
        .with_edge("a", "b")
        .with_edge("b", "a");

    assert!(matches!(
        validate_definition(&cyclic, &registry),
        Err(GraphError::Cycle { .. })
    ));
}
