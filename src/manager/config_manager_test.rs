use std::sync::Arc;

use crate::factory::{BindingFactory, CatalogHandler, FactoryRegistry};
use crate::ident;
use crate::labels::LabelRegistry;
use crate::model::{BindingConfig, BindingDoc, BindingKind, NamespaceDoc};
use crate::{Error, SchemaError};

use super::ConfigManager;

fn manager() -> ConfigManager {
    manager_with(Arc::new(FactoryRegistry::with_defaults()))
}

fn manager_with(registry: Arc<FactoryRegistry>) -> ConfigManager {
    let labels = Arc::new(LabelRegistry::temporary().expect("labels"));
    ConfigManager::new(Vec::new(), registry, labels, true)
}

const DOC: &str = r#"{
    "namespaces": [
        {
            "name": "edge",
            "bindings": [
                {
                    "name": "south",
                    "type": "tcp",
                    "kind": "server",
                    "options": { "port": 7000 },
                    "routes": [ { "exit": "mirror" } ]
                },
                { "name": "mirror", "type": "echo", "kind": "duplex" }
            ]
        }
    ]
}"#;

#[test]
fn test_parse_resolves_exits() {
    let manager = manager();
    let namespaces = manager.parse("gateway.json", DOC).expect("parse");
    assert_eq!(namespaces.len(), 1);

    let ns = &namespaces[0];
    assert!(ns.label > 0);
    assert!(!ns.is_composite());

    let south = ns.binding("south").expect("south");
    let mirror = ns.binding("mirror").expect("mirror");
    assert_eq!(ident::namespace_id(south.id), ns.label as u32);
    assert_ne!(south.id, mirror.id);

    let exit = south.routes[0].exit.as_ref().expect("route exit");
    assert_eq!(exit.id, mirror.id);
}

#[test]
fn test_parse_is_stable_across_repeats() {
    let manager = manager();
    let first = manager.parse("gateway.json", DOC).expect("parse");
    let second = manager.parse("gateway.json", DOC).expect("parse");
    assert_eq!(first[0].label, second[0].label);
    assert_eq!(
        first[0].binding("south").unwrap().id,
        second[0].binding("south").unwrap().id
    );
}

#[test]
fn test_parse_rejects_unknown_binding_type() {
    let text = r#"{ "namespaces": [ { "name": "edge", "bindings": [
        { "name": "x", "type": "warp-drive", "kind": "server" } ] } ] }"#;
    let err = manager().parse("gateway.json", text).expect_err("unknown type");
    assert!(matches!(
        err,
        Error::Schema(SchemaError::UnknownType { kind: "binding", .. })
    ));
}

#[test]
fn test_parse_rejects_duplicate_namespace() {
    let text = r#"{ "namespaces": [ { "name": "edge" }, { "name": "edge" } ] }"#;
    let err = manager().parse("gateway.json", text).expect_err("duplicate");
    assert!(matches!(err, Error::Schema(SchemaError::DuplicateName(_))));
}

#[test]
fn test_parse_rejects_unresolved_exit() {
    let text = r#"{ "namespaces": [ { "name": "edge", "bindings": [
        { "name": "south", "type": "tcp", "kind": "server",
          "options": { "port": 7000 }, "exit": "nowhere" } ] } ] }"#;
    let err = manager().parse("gateway.json", text).expect_err("unresolved");
    assert!(matches!(
        err,
        Error::Schema(SchemaError::UnresolvedReference { .. })
    ));
}

#[test]
fn test_parse_rejects_unknown_guard_reference() {
    let text = r#"{ "namespaces": [ { "name": "edge", "bindings": [
        { "name": "south", "type": "tcp", "kind": "server",
          "options": { "port": 7000 },
          "routes": [ { "guarded": [ { "name": "absent" } ], "exit": "mirror" } ] },
        { "name": "mirror", "type": "echo", "kind": "duplex" } ] } ] }"#;
    let err = manager().parse("gateway.json", text).expect_err("unresolved guard");
    assert!(matches!(
        err,
        Error::Schema(SchemaError::UnresolvedReference { .. })
    ));
}

#[test]
fn test_parse_rejects_malformed_options() {
    let text = r#"{ "namespaces": [ { "name": "edge", "bindings": [
        { "name": "south", "type": "tcp", "kind": "server" } ] } ] }"#;
    let err = manager().parse("gateway.json", text).expect_err("missing port");
    assert!(matches!(
        err,
        Error::Schema(SchemaError::MalformedOptions { .. })
    ));
}

/// A binding type that expands into a child namespace containing an echo.
struct FanoutFactory;

impl crate::factory::BindingFactory for FanoutFactory {
    fn type_name(&self) -> &'static str {
        "fanout"
    }

    fn validate(&self, _binding: &BindingConfig) -> Result<(), SchemaError> {
        Ok(())
    }

    fn composite(
        &self,
        binding: &BindingConfig,
        _catalogs: &dyn CatalogHandler,
    ) -> Result<Option<NamespaceDoc>, SchemaError> {
        Ok(Some(NamespaceDoc {
            name: format!("{}.expanded", binding.name),
            bindings: vec![BindingDoc {
                name: "mirror".into(),
                type_name: "echo".into(),
                kind: BindingKind::Duplex,
                options: serde_json::Value::Null,
                routes: Vec::new(),
                exit: None,
            }],
            guards: Vec::new(),
            vaults: Vec::new(),
            catalogs: Vec::new(),
            telemetry: Default::default(),
        }))
    }

    fn stream_factory(
        &self,
        _worker: usize,
        binding: &Arc<BindingConfig>,
    ) -> Arc<dyn crate::factory::StreamFactory> {
        crate::bindings::EchoBindingFactory.stream_factory(0, binding)
    }
}

#[test]
fn test_parse_expands_composites() {
    let mut registry = FactoryRegistry::with_defaults();
    registry.register_binding(Arc::new(FanoutFactory));
    let manager = manager_with(Arc::new(registry));

    let text = r#"{ "namespaces": [ { "name": "edge", "bindings": [
        { "name": "fan", "type": "fanout", "kind": "proxy" } ] } ] }"#;
    let namespaces = manager.parse("gateway.json", text).expect("parse");
    assert_eq!(namespaces.len(), 2);

    let parent = &namespaces[0];
    let child = &namespaces[1];
    assert_eq!(child.name, "fan.expanded");
    assert!(child.is_composite());
    assert_eq!(child.composite_of, Some(parent.binding("fan").unwrap().id));
    assert!(child.binding("mirror").is_some());
}
