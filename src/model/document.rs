//! Serde shape of the routing document (JSON primary, YAML by extension).

use serde::Deserialize;
use serde_json::Value;

use crate::SchemaError;

#[derive(Debug, Deserialize, Default)]
pub struct GatewayDocument {
    #[serde(default)]
    pub namespaces: Vec<NamespaceDoc>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NamespaceDoc {
    pub name: String,

    #[serde(default)]
    pub bindings: Vec<BindingDoc>,

    #[serde(default)]
    pub guards: Vec<HandlerDoc>,

    #[serde(default)]
    pub vaults: Vec<HandlerDoc>,

    #[serde(default)]
    pub catalogs: Vec<HandlerDoc>,

    #[serde(default)]
    pub telemetry: TelemetryDoc,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BindingDoc {
    pub name: String,

    #[serde(rename = "type")]
    pub type_name: String,

    pub kind: BindingKind,

    #[serde(default)]
    pub options: Value,

    #[serde(default)]
    pub routes: Vec<RouteDoc>,

    /// Default exit: `"namespace:binding"` or bare `"binding"` meaning
    /// the same namespace.
    #[serde(default)]
    pub exit: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BindingKind {
    Server,
    Client,
    Proxy,
    Duplex,
    Cache,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RouteDoc {
    /// Protocol-specific matchers; empty means unconditional.
    #[serde(default)]
    pub when: Vec<Value>,

    /// Protocol-specific override applied on match.
    #[serde(default)]
    pub with: Option<Value>,

    #[serde(default)]
    pub guarded: Vec<GuardedDoc>,

    #[serde(default)]
    pub exit: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GuardedDoc {
    pub name: String,

    #[serde(default)]
    pub roles: Vec<String>,
}

/// Shared shape for guards, vaults and catalogs: a named, typed options
/// block.
#[derive(Debug, Deserialize, Clone)]
pub struct HandlerDoc {
    pub name: String,

    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub options: Value,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelemetryDoc {
    #[serde(default)]
    pub attributes: serde_json::Map<String, Value>,

    #[serde(default)]
    pub metrics: Vec<String>,
}

/// Decodes the document text. YAML is accepted when the source URL ends in
/// `.yaml`/`.yml`; everything else decodes as JSON.
pub fn decode_document(source: &str, text: &str) -> Result<GatewayDocument, SchemaError> {
    let trimmed = source.trim_end_matches('/');
    if trimmed.ends_with(".yaml") || trimmed.ends_with(".yml") {
        Ok(serde_yaml::from_str(text)?)
    } else {
        Ok(serde_json::from_str(text)?)
    }
}
