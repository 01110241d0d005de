//! Capability interfaces at the core/binding boundary, and the static kind
//! registries that resolve type-name strings once at parse time.
//!
//! Concrete protocol bindings, guards, vaults, catalogs, validators and
//! converters are pluggable implementations of these traits. The registry
//! is populated from a fixed set of compiled-in implementations at startup;
//! the resolved factory (not the name) is cached on the hot path.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::core::{Frame, WorkerContext};
use crate::model::{BindingConfig, NamespaceDoc};
use crate::{Result, SchemaError, StreamError};

/// Per-stream protocol state machine. Handlers are created on the owning
/// worker thread and never leave it.
pub trait StreamHandler {
    /// Applies one frame. An error maps to `reset` of the offending stream
    /// and `abort` of its pair; it never unwinds the agent thread.
    fn on_frame(&mut self, ctx: &mut WorkerContext<'_>, frame: &Frame)
        -> std::result::Result<(), StreamError>;

    /// Fired for a scheduled signal owned by this handler's stream.
    fn on_signal(
        &mut self,
        _ctx: &mut WorkerContext<'_>,
        _signal_id: u64,
    ) -> std::result::Result<(), StreamError> {
        Ok(())
    }
}

/// Per-worker factory for stream handlers; invoked when a route exits into
/// the owning binding.
pub trait StreamFactory: Send + Sync {
    fn create(&self, begin: &Frame) -> std::result::Result<Box<dyn StreamHandler>, StreamError>;
}

/// Produced by a binding implementation; describes the binding type and
/// builds its per-worker machinery.
pub trait BindingFactory: Send + Sync {
    /// Type name referenced by the routing document (`"tcp"`, `"echo"`, ...).
    fn type_name(&self) -> &'static str;

    /// Schema URL describing the options shape; informational.
    fn schema_url(&self) -> &'static str {
        ""
    }

    /// Preferred worker count; `None` defers to the engine settings.
    fn worker_hint(&self) -> Option<usize> {
        None
    }

    /// Validates the protocol-specific options block at parse time.
    fn validate(&self, binding: &BindingConfig) -> std::result::Result<(), SchemaError>;

    /// A binding may synthesize a child namespace (e.g. an OpenAPI binding
    /// expanding into tcp/tls/http bindings), optionally consulting
    /// catalogs. Expanded depth-first at parse time.
    fn composite(
        &self,
        _binding: &BindingConfig,
        _catalogs: &dyn CatalogHandler,
    ) -> std::result::Result<Option<NamespaceDoc>, SchemaError> {
        Ok(None)
    }

    /// Per-worker stream factory for one configured binding, used to
    /// instantiate exit-side handlers.
    fn stream_factory(&self, worker: usize, binding: &Arc<BindingConfig>) -> Arc<dyn StreamFactory>;

    /// Opens listening resources on the worker the binding is assigned to
    /// (e.g. binding a TCP port and registering its accept poller).
    /// Non-server bindings keep the default no-op.
    fn attach(&self, _ctx: &mut WorkerContext<'_>, _binding: &Arc<BindingConfig>) -> Result<()> {
        Ok(())
    }
}

/// Authorization collaborator consulted during route resolution.
pub trait Guard: Send + Sync {
    fn authorize(&self, token: &str, roles: &[String]) -> bool;
}

pub trait GuardFactory: Send + Sync {
    fn type_name(&self) -> &'static str;
    fn create(&self, options: &Value) -> std::result::Result<Arc<dyn Guard>, SchemaError>;
}

/// Credential/trust collaborator.
pub trait Vault: Send + Sync {
    fn secret(&self, key: &str) -> Option<String>;
}

pub trait VaultFactory: Send + Sync {
    fn type_name(&self) -> &'static str;
    fn create(&self, options: &Value) -> std::result::Result<Arc<dyn Vault>, SchemaError>;
}

/// Schema-registry collaborator.
pub trait Catalog: Send + Sync {
    fn lookup(&self, subject: &str) -> Option<String>;
}

pub trait CatalogFactory: Send + Sync {
    fn type_name(&self) -> &'static str;
    fn create(&self, options: &Value) -> std::result::Result<Arc<dyn Catalog>, SchemaError>;
}

/// Resolves catalog instances for composite expansion.
pub trait CatalogHandler {
    fn supply_catalog(&self, name: &str) -> Option<Arc<dyn Catalog>>;
}

/// Payload validator collaborator, fully external.
pub trait Validator: Send + Sync {
    fn validate(&self, data: &[u8]) -> bool;
}

pub trait ValidatorFactory: Send + Sync {
    fn type_name(&self) -> &'static str;
    fn create(&self, model: &Value) -> std::result::Result<Arc<dyn Validator>, SchemaError>;
}

/// Payload transformation collaborator (wire form to internal form or
/// back); `None` rejects the payload.
pub trait Converter: Send + Sync {
    fn convert(&self, data: &[u8]) -> Option<Vec<u8>>;
}

pub trait ConverterFactory: Send + Sync {
    fn type_name(&self) -> &'static str;

    /// Converter applied to payloads read off the wire.
    fn create_reader(&self, model: &Value)
        -> std::result::Result<Arc<dyn Converter>, SchemaError>;

    /// Converter applied to payloads written to the wire.
    fn create_writer(&self, model: &Value)
        -> std::result::Result<Arc<dyn Converter>, SchemaError>;
}

/// Static registry of compiled-in kinds, keyed by type-name string.
/// Populated once at startup; lookups return the cached factory.
#[derive(Default)]
pub struct FactoryRegistry {
    bindings: HashMap<&'static str, Arc<dyn BindingFactory>>,
    guards: HashMap<&'static str, Arc<dyn GuardFactory>>,
    vaults: HashMap<&'static str, Arc<dyn VaultFactory>>,
    catalogs: HashMap<&'static str, Arc<dyn CatalogFactory>>,
    validators: HashMap<&'static str, Arc<dyn ValidatorFactory>>,
    converters: HashMap<&'static str, Arc<dyn ConverterFactory>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the in-tree reference implementations.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_binding(Arc::new(crate::bindings::TcpBindingFactory));
        registry.register_binding(Arc::new(crate::bindings::EchoBindingFactory));
        registry.register_guard(Arc::new(StaticGuardFactory));
        registry.register_vault(Arc::new(StaticVaultFactory));
        registry.register_catalog(Arc::new(InlineCatalogFactory));
        registry.register_validator(Arc::new(JsonValidatorFactory));
        registry.register_converter(Arc::new(JsonConverterFactory));
        registry
    }

    pub fn register_binding(&mut self, factory: Arc<dyn BindingFactory>) {
        self.bindings.insert(factory.type_name(), factory);
    }

    pub fn register_guard(&mut self, factory: Arc<dyn GuardFactory>) {
        self.guards.insert(factory.type_name(), factory);
    }

    pub fn register_vault(&mut self, factory: Arc<dyn VaultFactory>) {
        self.vaults.insert(factory.type_name(), factory);
    }

    pub fn register_catalog(&mut self, factory: Arc<dyn CatalogFactory>) {
        self.catalogs.insert(factory.type_name(), factory);
    }

    pub fn register_validator(&mut self, factory: Arc<dyn ValidatorFactory>) {
        self.validators.insert(factory.type_name(), factory);
    }

    pub fn register_converter(&mut self, factory: Arc<dyn ConverterFactory>) {
        self.converters.insert(factory.type_name(), factory);
    }

    pub fn binding(&self, type_name: &str) -> Option<Arc<dyn BindingFactory>> {
        self.bindings.get(type_name).cloned()
    }

    pub fn guard(&self, type_name: &str) -> Option<Arc<dyn GuardFactory>> {
        self.guards.get(type_name).cloned()
    }

    pub fn vault(&self, type_name: &str) -> Option<Arc<dyn VaultFactory>> {
        self.vaults.get(type_name).cloned()
    }

    pub fn catalog(&self, type_name: &str) -> Option<Arc<dyn CatalogFactory>> {
        self.catalogs.get(type_name).cloned()
    }

    pub fn validator(&self, type_name: &str) -> Option<Arc<dyn ValidatorFactory>> {
        self.validators.get(type_name).cloned()
    }

    pub fn converter(&self, type_name: &str) -> Option<Arc<dyn ConverterFactory>> {
        self.converters.get(type_name).cloned()
    }
}

// ------------------------------------------------------------------
// In-tree reference implementations of the non-binding kinds.

/// Guard over a fixed token table: options map each accepted token to its
/// granted roles. Authorization requires the token to be present and every
/// required role to be granted.
struct StaticGuard {
    tokens: HashMap<String, Vec<String>>,
}

impl Guard for StaticGuard {
    fn authorize(&self, token: &str, roles: &[String]) -> bool {
        match self.tokens.get(token) {
            Some(granted) => roles.iter().all(|r| granted.contains(r)),
            None => false,
        }
    }
}

pub struct StaticGuardFactory;

impl GuardFactory for StaticGuardFactory {
    fn type_name(&self) -> &'static str {
        "static"
    }

    fn create(&self, options: &Value) -> std::result::Result<Arc<dyn Guard>, SchemaError> {
        let tokens: HashMap<String, Vec<String>> =
            serde_json::from_value(options.get("tokens").cloned().unwrap_or(Value::Null))
                .unwrap_or_default();
        Ok(Arc::new(StaticGuard { tokens }))
    }
}

/// Vault over an inline key/value table.
struct StaticVault {
    secrets: HashMap<String, String>,
}

impl Vault for StaticVault {
    fn secret(&self, key: &str) -> Option<String> {
        self.secrets.get(key).cloned()
    }
}

pub struct StaticVaultFactory;

impl VaultFactory for StaticVaultFactory {
    fn type_name(&self) -> &'static str {
        "static"
    }

    fn create(&self, options: &Value) -> std::result::Result<Arc<dyn Vault>, SchemaError> {
        let secrets: HashMap<String, String> =
            serde_json::from_value(options.clone()).unwrap_or_default();
        Ok(Arc::new(StaticVault { secrets }))
    }
}

/// Catalog over an inline subject/schema table.
struct InlineCatalog {
    subjects: HashMap<String, String>,
}

impl Catalog for InlineCatalog {
    fn lookup(&self, subject: &str) -> Option<String> {
        self.subjects.get(subject).cloned()
    }
}

pub struct InlineCatalogFactory;

impl CatalogFactory for InlineCatalogFactory {
    fn type_name(&self) -> &'static str {
        "inline"
    }

    fn create(&self, options: &Value) -> std::result::Result<Arc<dyn Catalog>, SchemaError> {
        let subjects: HashMap<String, String> =
            serde_json::from_value(options.clone()).unwrap_or_default();
        Ok(Arc::new(InlineCatalog { subjects }))
    }
}

/// Accepts exactly the payloads that parse as JSON.
struct JsonValidator;

impl Validator for JsonValidator {
    fn validate(&self, data: &[u8]) -> bool {
        serde_json::from_slice::<serde::de::IgnoredAny>(data).is_ok()
    }
}

pub struct JsonValidatorFactory;

impl ValidatorFactory for JsonValidatorFactory {
    fn type_name(&self) -> &'static str {
        "json"
    }

    fn create(&self, _model: &Value) -> std::result::Result<Arc<dyn Validator>, SchemaError> {
        Ok(Arc::new(JsonValidator))
    }
}

/// Canonicalizes JSON payloads: parse, then re-serialize in compact form.
/// Malformed payloads are rejected.
struct JsonConverter;

impl Converter for JsonConverter {
    fn convert(&self, data: &[u8]) -> Option<Vec<u8>> {
        let value: Value = serde_json::from_slice(data).ok()?;
        serde_json::to_vec(&value).ok()
    }
}

pub struct JsonConverterFactory;

impl ConverterFactory for JsonConverterFactory {
    fn type_name(&self) -> &'static str {
        "json"
    }

    fn create_reader(
        &self,
        _model: &Value,
    ) -> std::result::Result<Arc<dyn Converter>, SchemaError> {
        Ok(Arc::new(JsonConverter))
    }

    fn create_writer(
        &self,
        _model: &Value,
    ) -> std::result::Result<Arc<dyn Converter>, SchemaError> {
        Ok(Arc::new(JsonConverter))
    }
}
