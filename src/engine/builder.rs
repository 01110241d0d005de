//! A builder pattern implementation for constructing an [`Engine`] instance.
//!
//! The [`EngineBuilder`] provides a fluent interface to configure and
//! assemble the pieces of the gateway runtime: the worker dispatch agents,
//! the budget ledger, the label table, the factory registry and the
//! configuration manager.
//!
//! ## Example
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(());
//! let engine = EngineBuilder::init(settings, shutdown_rx)
//!     .registry(custom_registry)  // Optional override
//!     .build()
//!     .start_metrics_server(shutdown_tx.subscribe())
//!     .ready()
//!     .unwrap();
//! ```

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::info;

use super::Engine;
use crate::budget::BudgetLedger;
use crate::config::GatewaySettings;
use crate::core::DispatchAgent;
use crate::factory::FactoryRegistry;
use crate::labels::LabelRegistry;
use crate::manager::ConfigManager;
use crate::metrics;
use crate::utils::{HostResolver, SystemHostResolver};
use crate::{Error, Result};

/// Fluent assembly of the gateway runtime with overridable components.
pub struct EngineBuilder {
    pub(super) settings: GatewaySettings,
    pub(super) shutdown_signal: watch::Receiver<()>,
    pub(super) registry: Option<Arc<FactoryRegistry>>,
    pub(super) resolver: Option<Arc<dyn HostResolver>>,

    pub(super) engine: Option<Arc<Engine>>,
}

impl EngineBuilder {
    pub fn init(settings: GatewaySettings, shutdown_signal: watch::Receiver<()>) -> Self {
        Self {
            settings,
            shutdown_signal,
            registry: None,
            resolver: None,
            engine: None,
        }
    }

    /// Replaces the default factory registry (in-tree binding, guard, vault
    /// and catalog types).
    pub fn registry(mut self, registry: Arc<FactoryRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replaces the system host resolver.
    pub fn resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Assembles the engine and spawns the worker threads. No configuration
    /// is applied yet; that happens in [`Engine::start`].
    ///
    /// # Panics
    /// Panics if the label table cannot be opened.
    pub fn build(mut self) -> Self {
        let settings = self.settings.clone();

        let labels = if settings.runtime.label_dir.is_empty() {
            LabelRegistry::temporary()
        } else {
            LabelRegistry::open(&settings.runtime.label_dir)
        }
        .expect("open label table successfully.");
        let labels = Arc::new(labels);

        let ledger = Arc::new(BudgetLedger::new());
        let registry = self
            .registry
            .take()
            .unwrap_or_else(|| Arc::new(FactoryRegistry::with_defaults()));
        let resolver = self
            .resolver
            .take()
            .unwrap_or_else(|| Arc::new(SystemHostResolver));

        let agents: Vec<Arc<DispatchAgent>> = (0..settings.runtime.worker_count)
            .map(|worker| {
                DispatchAgent::spawn(
                    worker,
                    &settings,
                    ledger.clone(),
                    labels.clone(),
                    resolver.clone(),
                    registry.clone(),
                )
            })
            .collect();
        info!(workers = agents.len(), "dispatch agents spawned");

        let manager = Arc::new(ConfigManager::new(
            agents.clone(),
            registry,
            labels.clone(),
            settings.runtime.drain_on_close,
        ));

        self.engine = Some(Arc::new(Engine {
            settings,
            manager,
            agents,
            labels,
            ledger,
            shutdown_signal: self.shutdown_signal.clone(),
            ready: AtomicBool::new(false),
            reload_rx: Mutex::new(None),
            watcher: Mutex::new(None),
        }));
        self
    }

    /// Launches the Prometheus endpoint on the configured port, if enabled.
    pub fn start_metrics_server(self, shutdown_signal: watch::Receiver<()>) -> Self {
        if self.settings.monitoring.prometheus_enabled {
            let port = self.settings.monitoring.prometheus_port;
            tokio::spawn(async move {
                metrics::start_server(port, shutdown_signal).await;
            });
        }
        self
    }

    /// Returns the built engine instance after successful construction.
    ///
    /// # Errors
    /// Returns `Error::Fatal` if `build()` has not completed.
    pub fn ready(self) -> Result<Arc<Engine>> {
        self.engine
            .ok_or_else(|| Error::Fatal("engine has not been built".to_string()))
    }
}
