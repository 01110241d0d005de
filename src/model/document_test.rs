use super::*;

const DOC_JSON: &str = r#"{
    "namespaces": [
        {
            "name": "edge",
            "bindings": [
                {
                    "name": "south",
                    "type": "tcp",
                    "kind": "server",
                    "options": { "port": 7000, "window": 4096 },
                    "routes": [
                        {
                            "when": [ { "port": 7000 } ],
                            "guarded": [ { "name": "tenants", "roles": ["write"] } ],
                            "exit": "mirror"
                        },
                        { "exit": "edge:mirror" }
                    ]
                },
                {
                    "name": "mirror",
                    "type": "echo",
                    "kind": "duplex"
                }
            ],
            "guards": [
                { "name": "tenants", "type": "static", "options": { "tokens": {} } }
            ]
        }
    ]
}"#;

#[test]
fn test_decode_json_document() {
    let doc = decode_document("config/gateway.json", DOC_JSON).expect("decode");
    assert_eq!(doc.namespaces.len(), 1);

    let ns = &doc.namespaces[0];
    assert_eq!(ns.name, "edge");
    assert_eq!(ns.bindings.len(), 2);
    assert_eq!(ns.guards.len(), 1);
    assert_eq!(ns.guards[0].type_name, "static");

    let south = &ns.bindings[0];
    assert_eq!(south.type_name, "tcp");
    assert_eq!(south.kind, BindingKind::Server);
    assert_eq!(south.options["port"], 7000);
    assert_eq!(south.routes.len(), 2);
    assert_eq!(south.routes[0].guarded[0].roles, vec!["write".to_string()]);
    assert_eq!(south.routes[1].exit.as_deref(), Some("edge:mirror"));

    let mirror = &ns.bindings[1];
    assert_eq!(mirror.kind, BindingKind::Duplex);
    // Unspecified blocks default to empty.
    assert!(mirror.routes.is_empty());
    assert!(mirror.options.is_null());
}

#[test]
fn test_decode_yaml_by_extension() {
    let text = r#"
namespaces:
  - name: edge
    bindings:
      - name: south
        type: tcp
        kind: server
        options:
          port: 7000
"#;
    let doc = decode_document("config/gateway.yaml", text).expect("decode");
    assert_eq!(doc.namespaces[0].bindings[0].name, "south");

    // The same text is not valid JSON, so a .json source rejects it.
    assert!(decode_document("config/gateway.json", text).is_err());
}

#[test]
fn test_decode_rejects_unknown_kind() {
    let text = r#"{
        "namespaces": [
            { "name": "edge", "bindings": [ { "name": "x", "type": "tcp", "kind": "listener" } ] }
        ]
    }"#;
    let err = decode_document("gateway.json", text).expect_err("unknown kind");
    assert!(matches!(err, crate::SchemaError::Decode(_)));
}

#[test]
fn test_empty_document_decodes() {
    let doc = decode_document("gateway.json", "{}").expect("decode");
    assert!(doc.namespaces.is_empty());
}
