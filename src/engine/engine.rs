use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::budget::BudgetLedger;
use crate::config::GatewaySettings;
use crate::core::DispatchAgent;
use crate::labels::LabelRegistry;
use crate::manager::{fetch_source, ConfigManager, ConfigWatcher, ReloadEvent};
use crate::{Error, Result};

/// The assembled gateway: worker agents, the configuration manager and the
/// source watcher, driven by one shutdown signal.
pub struct Engine {
    pub(crate) settings: GatewaySettings,
    pub(crate) manager: Arc<ConfigManager>,
    pub(crate) agents: Vec<Arc<DispatchAgent>>,
    pub(crate) labels: Arc<LabelRegistry>,
    pub(crate) ledger: Arc<BudgetLedger>,
    pub(crate) shutdown_signal: watch::Receiver<()>,
    pub(crate) ready: AtomicBool,
    pub(crate) reload_rx: Mutex<Option<mpsc::Receiver<ReloadEvent>>>,
    pub(crate) watcher: Mutex<Option<ConfigWatcher>>,
}

impl Engine {
    /// Fetches and applies the initial routing document, then starts the
    /// source watcher. A rejected initial document is fatal; there is no
    /// previous configuration to keep.
    pub async fn start(&self) -> Result<()> {
        let source = self.settings.watch.source.clone();
        let text = fetch_source(&source).await?;
        self.manager.apply(&source, &text).await.map_err(|e| {
            error!(source = %source, error = %e, "initial routing document rejected");
            Error::Fatal(format!("initial routing document rejected: {}", e))
        })?;

        let (reload_tx, reload_rx) = mpsc::channel(8);
        let watcher = ConfigWatcher::spawn(self.settings.watch.clone(), Some(&text), reload_tx);
        *self.reload_rx.lock() = Some(reload_rx);
        *self.watcher.lock() = Some(watcher);

        self.ready.store(true, Ordering::SeqCst);
        info!(source = %source, workers = self.agents.len(), "gateway started");
        Ok(())
    }

    /// Runs until the shutdown signal fires. Watched source changes go
    /// through the manager's apply pipeline; a rejected reload keeps the
    /// running configuration and is only logged.
    pub async fn run(&self) -> Result<()> {
        self.start().await?;

        let mut shutdown = self.shutdown_signal.clone();
        let reload_rx = self.reload_rx.lock().take();
        let mut reload_rx =
            reload_rx.ok_or_else(|| Error::Fatal("engine is already running".to_string()))?;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown signal received");
                    break;
                }
                event = reload_rx.recv() => {
                    match event {
                        Some(ReloadEvent { source, text }) => {
                            match self.manager.apply(&source, &text).await {
                                Ok(()) => info!(source = %source, "configuration reloaded"),
                                Err(e) => {
                                    error!(
                                        source = %source,
                                        error = %e,
                                        "reload rejected, previous configuration kept"
                                    );
                                }
                            }
                        }
                        None => {
                            warn!("watcher channel closed");
                            break;
                        }
                    }
                }
            }
        }

        self.close().await
    }

    /// Stops the watcher, unregisters the active configuration from every
    /// worker, joins the worker threads and flushes the label table.
    pub async fn close(&self) -> Result<()> {
        self.ready.store(false, Ordering::SeqCst);

        let watcher = self.watcher.lock().take();
        if let Some(watcher) = watcher {
            watcher.close().await;
        }

        self.manager.unregister_active().await;
        futures::future::join_all(self.agents.iter().map(|agent| agent.shutdown())).await;

        if let Err(e) = self.labels.flush() {
            warn!(error = %e, "label table flush failed");
        }
        info!("gateway stopped");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn manager(&self) -> Arc<ConfigManager> {
        self.manager.clone()
    }

    pub fn ledger(&self) -> Arc<BudgetLedger> {
        self.ledger.clone()
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }
}
