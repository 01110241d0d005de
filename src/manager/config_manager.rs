//! Parses routing documents into namespace graphs and applies them to the
//! dispatch agents: validate, register, unregister, and the all-or-nothing
//! hot-reload swap with automatic rollback.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::core::{DispatchAgent, RegistrationSet};
use crate::factory::{Catalog, CatalogHandler, FactoryRegistry, Guard, Vault};
use crate::ident;
use crate::labels::LabelRegistry;
use crate::metrics;
use crate::model::{
    decode_document, BindingConfig, ExitRef, GuardedConfig, HandlerConfig, NamespaceConfig,
    NamespaceDoc, RouteConfig,
};
use crate::{Error, RegistrationError, Result, SchemaError};

/// The configuration currently live on the agents; readable without locks
/// through the manager's `ArcSwap`.
#[derive(Default)]
pub struct ActiveConfig {
    pub source: String,
    pub namespaces: Vec<Arc<NamespaceConfig>>,
}

pub struct ConfigManager {
    agents: Vec<Arc<DispatchAgent>>,
    registry: Arc<FactoryRegistry>,
    labels: Arc<LabelRegistry>,
    active: ArcSwap<ActiveConfig>,
    next_worker: AtomicUsize,
    drain_on_close: bool,
}

impl ConfigManager {
    pub fn new(
        agents: Vec<Arc<DispatchAgent>>,
        registry: Arc<FactoryRegistry>,
        labels: Arc<LabelRegistry>,
        drain_on_close: bool,
    ) -> Self {
        Self {
            agents,
            registry,
            labels,
            active: ArcSwap::from_pointee(ActiveConfig::default()),
            next_worker: AtomicUsize::new(0),
            drain_on_close,
        }
    }

    pub fn active(&self) -> Arc<ActiveConfig> {
        self.active.load_full()
    }

    // --- parse ----------------------------------------------------------

    /// Decodes and fully validates a routing document, expanding
    /// binding-contributed composite namespaces depth-first. Nothing is
    /// applied; a schema violation leaves the running configuration alone.
    pub fn parse(&self, source: &str, text: &str) -> Result<Vec<Arc<NamespaceConfig>>> {
        let document = decode_document(source, text).map_err(Error::from)?;

        let mut worklist: VecDeque<(NamespaceDoc, Option<u64>)> = document
            .namespaces
            .into_iter()
            .map(|doc| (doc, None))
            .collect();
        let mut built = Vec::new();
        let mut seen = HashSet::new();

        while let Some((doc, composite_of)) = worklist.pop_front() {
            if !seen.insert(doc.name.clone()) {
                return Err(SchemaError::DuplicateName(doc.name).into());
            }
            let (namespace, expansions) = self.build_namespace(&doc, composite_of)?;
            worklist.extend(expansions);
            built.push(namespace);
        }

        self.resolve_references(&mut built)?;
        Ok(built.into_iter().map(|ns| Arc::new(ns.freeze())).collect())
    }

    fn build_namespace(
        &self,
        doc: &NamespaceDoc,
        composite_of: Option<u64>,
    ) -> Result<(NamespaceBuild, Vec<(NamespaceDoc, Option<u64>)>)> {
        let label = self.labels.supply_label_id(&doc.name)?;

        let guards = self.build_handlers(doc, &doc.guards, "guard", label)?;
        let vaults = self.build_handlers(doc, &doc.vaults, "vault", label)?;
        let catalogs = self.build_handlers(doc, &doc.catalogs, "catalog", label)?;
        let guard_names: HashSet<&str> = doc.guards.iter().map(|g| g.name.as_str()).collect();

        let mut bindings = Vec::with_capacity(doc.bindings.len());
        let mut binding_names = HashSet::new();
        let mut expansions = Vec::new();
        let catalog_handler = self.instantiate_catalogs(&catalogs)?;

        for binding_doc in &doc.bindings {
            let qualified = format!("{}:{}", doc.name, binding_doc.name);
            if !binding_names.insert(binding_doc.name.clone()) {
                return Err(SchemaError::DuplicateName(qualified).into());
            }
            let binding_label = self.labels.supply_label_id(&qualified)?;

            let routes: Vec<RouteConfig> = binding_doc
                .routes
                .iter()
                .map(|route| RouteConfig {
                    when: route.when.clone(),
                    with: route.with.clone(),
                    guarded: route
                        .guarded
                        .iter()
                        .cloned()
                        .map(GuardedConfig::from)
                        .collect(),
                    exit: route.exit.as_deref().map(ExitRef::unresolved),
                })
                .collect();

            // Guard references are namespace-local; check them up front.
            for route in &routes {
                for guarded in &route.guarded {
                    if !guard_names.contains(guarded.name.as_str()) {
                        return Err(SchemaError::UnresolvedReference {
                            from: qualified,
                            reference: guarded.name.clone(),
                        }
                        .into());
                    }
                }
            }

            let config = BindingConfig {
                id: ident::combine(label as u32, binding_label as u32),
                name: binding_doc.name.clone(),
                qualified_name: qualified,
                type_name: binding_doc.type_name.clone(),
                kind: binding_doc.kind,
                options: binding_doc.options.clone(),
                routes,
                exit: binding_doc.exit.as_deref().map(ExitRef::unresolved),
                affinity: binding_doc.options.get("affinity").and_then(Value::as_u64),
            };

            let factory = self.registry.binding(&config.type_name).ok_or_else(|| {
                SchemaError::UnknownType {
                    kind: "binding",
                    name: config.type_name.clone(),
                }
            })?;
            factory.validate(&config).map_err(Error::from)?;

            if let Some(child) = factory
                .composite(&config, &catalog_handler)
                .map_err(Error::from)?
            {
                expansions.push((child, Some(config.id)));
            }
            bindings.push(config);
        }

        Ok((
            NamespaceBuild {
                label,
                name: doc.name.clone(),
                bindings,
                guards,
                vaults,
                catalogs,
                telemetry: doc.telemetry.clone(),
                composite_of,
            },
            expansions,
        ))
    }

    fn build_handlers(
        &self,
        doc: &NamespaceDoc,
        handlers: &[crate::model::HandlerDoc],
        kind: &'static str,
        label: i32,
    ) -> Result<Vec<HandlerConfig>> {
        let mut names = HashSet::new();
        let mut out = Vec::with_capacity(handlers.len());
        for handler in handlers {
            if !names.insert(handler.name.clone()) {
                return Err(SchemaError::DuplicateName(format!(
                    "{}:{}:{}",
                    doc.name, kind, handler.name
                ))
                .into());
            }
            let known = match kind {
                "guard" => self.registry.guard(&handler.type_name).is_some(),
                "vault" => self.registry.vault(&handler.type_name).is_some(),
                _ => self.registry.catalog(&handler.type_name).is_some(),
            };
            if !known {
                return Err(SchemaError::UnknownType {
                    kind,
                    name: handler.type_name.clone(),
                }
                .into());
            }
            let qualified = format!("{}:{}:{}", doc.name, kind, handler.name);
            let handler_label = self.labels.supply_label_id(&qualified)?;
            out.push(HandlerConfig {
                id: ident::combine(label as u32, handler_label as u32),
                name: handler.name.clone(),
                type_name: handler.type_name.clone(),
                options: handler.options.clone(),
            });
        }
        Ok(out)
    }

    fn instantiate_catalogs(&self, configs: &[HandlerConfig]) -> Result<ParsedCatalogs> {
        let mut map = HashMap::new();
        for config in configs {
            let factory = self.registry.catalog(&config.type_name).ok_or_else(|| {
                SchemaError::UnknownType {
                    kind: "catalog",
                    name: config.type_name.clone(),
                }
            })?;
            map.insert(
                config.name.clone(),
                factory.create(&config.options).map_err(Error::from)?,
            );
        }
        Ok(ParsedCatalogs { map })
    }

    /// Fills every `ExitRef` with the identifier of the named binding.
    /// References resolve at registration granularity, never at parse time,
    /// so composites and cross-namespace exits all participate.
    fn resolve_references(&self, built: &mut [NamespaceBuild]) -> Result<()> {
        let mut ids: HashMap<String, u64> = HashMap::new();
        for ns in built.iter() {
            for binding in &ns.bindings {
                ids.insert(binding.qualified_name.clone(), binding.id);
            }
        }

        for ns in built.iter_mut() {
            let ns_name = ns.name.clone();
            for binding in &mut ns.bindings {
                let from = binding.qualified_name.clone();
                if let Some(exit) = &mut binding.exit {
                    resolve_exit_ref(exit, &ns_name, &from, &ids)?;
                }
                for route in &mut binding.routes {
                    if let Some(exit) = &mut route.exit {
                        resolve_exit_ref(exit, &ns_name, &from, &ids)?;
                    }
                }
            }
        }
        Ok(())
    }

    // --- register / unregister ------------------------------------------

    /// Broadcasts the namespaces to every dispatch agent. Any failure rolls
    /// the partial registration back off the agents that already acked, and
    /// the error surfaces to the caller.
    pub async fn register(&self, namespaces: &[Arc<NamespaceConfig>]) -> Result<()> {
        if namespaces.is_empty() {
            return Ok(());
        }
        let set = Arc::new(self.build_set(namespaces)?);

        let mut acked: Vec<&Arc<DispatchAgent>> = Vec::new();
        for agent in &self.agents {
            if let Err(e) = agent.register(set.clone()).await {
                error!(worker = agent.worker(), error = %e, "registration failed; rolling back");
                for prior in acked {
                    for ns in namespaces {
                        if let Err(re) = prior.unregister(ns.label, false).await {
                            return Err(RegistrationError::RollbackFailed(re.to_string()).into());
                        }
                    }
                }
                return Err(e);
            }
            acked.push(agent);
        }
        Ok(())
    }

    /// Tears the namespaces down on every agent; idempotent and
    /// best-effort (an unreachable agent is logged, not fatal).
    pub async fn unregister(&self, namespaces: &[Arc<NamespaceConfig>], drain: bool) {
        for agent in &self.agents {
            for ns in namespaces {
                if let Err(e) = agent.unregister(ns.label, drain).await {
                    warn!(worker = agent.worker(), namespace = %ns.name, error = %e,
                        "unregister failed");
                }
            }
        }
    }

    /// Hot-reload: parse the new document, swap it in atomically. On a
    /// failed swap the previous configuration is re-registered, so routing
    /// state is all-or-nothing.
    pub async fn apply(&self, source: &str, text: &str) -> Result<()> {
        let new = self.parse(source, text)?;
        let old = self.active.load_full();

        self.unregister(&old.namespaces, self.drain_on_close).await;
        match self.register(&new).await {
            Ok(()) => {
                self.active.store(Arc::new(ActiveConfig {
                    source: source.to_string(),
                    namespaces: new,
                }));
                metrics::RECONFIGURATIONS.inc();
                info!(source, namespaces = self.active.load().namespaces.len(),
                    "configuration applied");
                Ok(())
            }
            Err(e) => {
                metrics::RECONFIGURATION_ROLLBACKS.inc();
                error!(source, error = %e, "configuration swap failed; restoring previous");
                if let Err(restore) = self.register(&old.namespaces).await {
                    return Err(
                        RegistrationError::RollbackFailed(restore.to_string()).into()
                    );
                }
                Err(e)
            }
        }
    }

    /// Installs a runtime-generated composite namespace on all agents
    /// without a full reconfiguration.
    pub async fn attach_composite(&self, doc: NamespaceDoc, generated_by: u64) -> Result<()> {
        let (mut build, _) = self.build_namespace(&doc, Some(generated_by))?;

        // Resolve against the active graph plus the new namespace itself.
        let mut ids: HashMap<String, u64> = HashMap::new();
        for ns in &self.active.load().namespaces {
            for binding in &ns.bindings {
                ids.insert(binding.qualified_name.clone(), binding.id);
            }
        }
        for binding in &build.bindings {
            ids.insert(binding.qualified_name.clone(), binding.id);
        }
        let ns_name = build.name.clone();
        for binding in &mut build.bindings {
            let from = binding.qualified_name.clone();
            if let Some(exit) = &mut binding.exit {
                resolve_exit_ref(exit, &ns_name, &from, &ids)?;
            }
            for route in &mut binding.routes {
                if let Some(exit) = &mut route.exit {
                    resolve_exit_ref(exit, &ns_name, &from, &ids)?;
                }
            }
        }

        let namespace = Arc::new(build.freeze());
        let set = Arc::new(self.build_set(std::slice::from_ref(&namespace))?);
        let mut acked: Vec<&Arc<DispatchAgent>> = Vec::new();
        for agent in &self.agents {
            if let Err(e) = agent.attach_composite(set.clone()).await {
                for prior in acked {
                    let _ = prior.detach_composite(namespace.label).await;
                }
                return Err(e);
            }
            acked.push(agent);
        }

        let old = self.active.load_full();
        let mut namespaces = old.namespaces.clone();
        namespaces.push(namespace.clone());
        self.active.store(Arc::new(ActiveConfig {
            source: old.source.clone(),
            namespaces,
        }));
        info!(namespace = %namespace.name, "composite namespace attached");
        Ok(())
    }

    /// Removes a runtime-generated composite namespace from all agents.
    pub async fn detach_composite(&self, name: &str) -> Result<()> {
        let label = self.labels.supply_label_id(name)?;
        for agent in &self.agents {
            agent.detach_composite(label).await?;
        }
        let old = self.active.load_full();
        let namespaces = old
            .namespaces
            .iter()
            .filter(|ns| ns.label != label)
            .cloned()
            .collect();
        self.active.store(Arc::new(ActiveConfig {
            source: old.source.clone(),
            namespaces,
        }));
        info!(namespace = name, "composite namespace detached");
        Ok(())
    }

    /// Engine-close teardown of whatever is live.
    pub async fn unregister_active(&self) {
        let old = self.active.swap(Arc::new(ActiveConfig::default()));
        self.unregister(&old.namespaces, self.drain_on_close).await;
    }

    fn build_set(&self, namespaces: &[Arc<NamespaceConfig>]) -> Result<RegistrationSet> {
        let mut factories = HashMap::new();
        let mut assignments = HashMap::new();
        let mut guards: HashMap<i32, HashMap<String, Arc<dyn Guard>>> = HashMap::new();
        let mut vaults: HashMap<i32, HashMap<String, Arc<dyn Vault>>> = HashMap::new();
        let mut catalogs: HashMap<i32, HashMap<String, Arc<dyn Catalog>>> = HashMap::new();

        for ns in namespaces {
            for binding in &ns.bindings {
                let factory = self.registry.binding(&binding.type_name).ok_or_else(|| {
                    SchemaError::UnknownType {
                        kind: "binding",
                        name: binding.type_name.clone(),
                    }
                })?;
                factories.insert(binding.id, factory);
                assignments.insert(binding.id, self.assign_worker(binding)?);
            }

            let mut ns_guards = HashMap::new();
            for config in &ns.guards {
                let factory = self.registry.guard(&config.type_name).ok_or_else(|| {
                    SchemaError::UnknownType {
                        kind: "guard",
                        name: config.type_name.clone(),
                    }
                })?;
                ns_guards.insert(
                    config.name.clone(),
                    factory.create(&config.options).map_err(Error::from)?,
                );
            }
            guards.insert(ns.label, ns_guards);

            let mut ns_vaults = HashMap::new();
            for config in &ns.vaults {
                let factory = self.registry.vault(&config.type_name).ok_or_else(|| {
                    SchemaError::UnknownType {
                        kind: "vault",
                        name: config.type_name.clone(),
                    }
                })?;
                ns_vaults.insert(
                    config.name.clone(),
                    factory.create(&config.options).map_err(Error::from)?,
                );
            }
            vaults.insert(ns.label, ns_vaults);

            let mut ns_catalogs = HashMap::new();
            for config in &ns.catalogs {
                let factory = self.registry.catalog(&config.type_name).ok_or_else(|| {
                    SchemaError::UnknownType {
                        kind: "catalog",
                        name: config.type_name.clone(),
                    }
                })?;
                ns_catalogs.insert(
                    config.name.clone(),
                    factory.create(&config.options).map_err(Error::from)?,
                );
            }
            catalogs.insert(ns.label, ns_catalogs);
        }

        Ok(RegistrationSet {
            namespaces: namespaces.to_vec(),
            factories,
            assignments,
            guards,
            vaults,
            catalogs,
        })
    }

    /// Deterministic round-robin over the workers the binding's affinity
    /// mask allows; no mask means every worker is eligible.
    fn assign_worker(&self, binding: &BindingConfig) -> Result<usize> {
        let eligible: Vec<usize> = (0..self.agents.len())
            .filter(|worker| {
                binding
                    .affinity
                    .map(|mask| mask & (1u64 << worker) != 0)
                    .unwrap_or(true)
            })
            .collect();
        if eligible.is_empty() {
            return Err(RegistrationError::Rejected(format!(
                "affinity mask of '{}' selects no worker",
                binding.qualified_name
            ))
            .into());
        }
        let n = self.next_worker.fetch_add(1, Ordering::Relaxed);
        Ok(eligible[n % eligible.len()])
    }
}

fn resolve_exit_ref(
    exit: &mut ExitRef,
    own_namespace: &str,
    from: &str,
    ids: &HashMap<String, u64>,
) -> Result<()> {
    let (ns, binding) = exit.split(own_namespace);
    let key = format!("{}:{}", ns, binding);
    exit.id = *ids.get(&key).ok_or_else(|| SchemaError::UnresolvedReference {
        from: from.to_string(),
        reference: exit.name.clone(),
    })?;
    Ok(())
}

struct ParsedCatalogs {
    map: HashMap<String, Arc<dyn Catalog>>,
}

impl CatalogHandler for ParsedCatalogs {
    fn supply_catalog(&self, name: &str) -> Option<Arc<dyn Catalog>> {
        self.map.get(name).cloned()
    }
}

/// Mutable namespace under construction; frozen into the immutable
/// `NamespaceConfig` after reference resolution.
struct NamespaceBuild {
    label: i32,
    name: String,
    bindings: Vec<BindingConfig>,
    guards: Vec<HandlerConfig>,
    vaults: Vec<HandlerConfig>,
    catalogs: Vec<HandlerConfig>,
    telemetry: crate::model::TelemetryDoc,
    composite_of: Option<u64>,
}

impl NamespaceBuild {
    fn freeze(self) -> NamespaceConfig {
        NamespaceConfig {
            id: ident::combine(self.label as u32, 0),
            label: self.label,
            name: self.name,
            bindings: self.bindings.into_iter().map(Arc::new).collect(),
            guards: self.guards,
            vaults: self.vaults,
            catalogs: self.catalogs,
            telemetry: self.telemetry,
            composite_of: self.composite_of,
        }
    }
}
