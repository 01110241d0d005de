//! Immutable configuration value objects.
//!
//! Built from the routing document by the configuration manager. Exit
//! references carry their symbolic name from parse time and receive their
//! identifier during registration; namespaces live in a flat list owned by
//! the manager (composites are additional entries with a back-reference to
//! their generating binding, not parent pointers).

use serde_json::Value;
use std::sync::Arc;

use super::{BindingKind, GuardedDoc, TelemetryDoc};

/// A symbolic `"namespace:binding"` (or bare `"binding"`) reference plus
/// the identifier it resolves to at registration time.
#[derive(Debug, Clone)]
pub struct ExitRef {
    pub name: String,
    /// `ident::UNSET` until the manager resolves references.
    pub id: u64,
}

impl ExitRef {
    pub fn unresolved(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: crate::ident::UNSET,
        }
    }

    /// Splits into (namespace, binding); a bare name inherits `own_ns`.
    pub fn split<'a>(&'a self, own_ns: &'a str) -> (&'a str, &'a str) {
        match self.name.split_once(':') {
            Some((ns, binding)) => (ns, binding),
            None => (own_ns, self.name.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuardedConfig {
    pub name: String,
    pub roles: Vec<String>,
}

impl From<GuardedDoc> for GuardedConfig {
    fn from(doc: GuardedDoc) -> Self {
        Self {
            name: doc.name,
            roles: doc.roles,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteConfig {
    pub when: Vec<Value>,
    pub with: Option<Value>,
    pub guarded: Vec<GuardedConfig>,
    pub exit: Option<ExitRef>,
}

impl RouteConfig {
    /// Unconditional and unguarded: acts as the binding's exit fallback
    /// when declared last.
    pub fn is_fallback(&self) -> bool {
        self.when.is_empty() && self.guarded.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct BindingConfig {
    /// combine(namespace label, qualified-name label)
    pub id: u64,
    pub name: String,
    /// `"namespace:binding"`, the label-interned stable name.
    pub qualified_name: String,
    pub type_name: String,
    pub kind: BindingKind,
    pub options: Value,
    /// Declaration order preserved exactly; first match wins.
    pub routes: Vec<RouteConfig>,
    pub exit: Option<ExitRef>,
    /// Worker eligibility bitmask; `None` means all workers.
    pub affinity: Option<u64>,
}

impl BindingConfig {
    /// Receive window advertised for inbound data, from the shared
    /// `window` option.
    pub fn window(&self) -> u64 {
        self.options
            .get("window")
            .and_then(Value::as_u64)
            .unwrap_or(64 * 1024)
    }
}

#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub id: u64,
    pub name: String,
    pub type_name: String,
    pub options: Value,
}

#[derive(Debug, Clone)]
pub struct NamespaceConfig {
    /// combine(namespace label, 0)
    pub id: u64,
    /// Interned label of `name`; stable across hot-reload.
    pub label: i32,
    pub name: String,
    pub bindings: Vec<Arc<BindingConfig>>,
    pub guards: Vec<HandlerConfig>,
    pub vaults: Vec<HandlerConfig>,
    pub catalogs: Vec<HandlerConfig>,
    pub telemetry: TelemetryDoc,
    /// Identifier of the generating binding for composites; `None` for
    /// top-level namespaces declared by configuration text.
    pub composite_of: Option<u64>,
}

impl NamespaceConfig {
    pub fn binding(&self, name: &str) -> Option<&Arc<BindingConfig>> {
        self.bindings.iter().find(|b| b.name == name)
    }

    pub fn is_composite(&self) -> bool {
        self.composite_of.is_some()
    }
}
