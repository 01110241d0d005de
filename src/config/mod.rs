//! Engine settings (NOT the routing document).
//!
//! Settings cover the runtime shape of the process: worker count, buffer
//! sizing, idle strategy, watch source and monitoring. They load from an
//! optional TOML file overlaid with `FLOWGATE__*` environment variables.
//! The routing document (namespaces/bindings/routes) is parsed separately
//! by the configuration manager.

mod buffers;
mod monitoring;
mod runtime;
mod watch;
pub use buffers::*;
pub use monitoring::*;
pub use runtime::*;
pub use watch::*;

//---
use config::{Config, Environment, File};
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct GatewaySettings {
    /// Worker count, per-worker capacity and idle strategy
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Write buffer and buffer-pool sizing
    #[serde(default)]
    pub buffers: BufferConfig,

    /// Configuration source and polling cadence
    #[serde(default)]
    pub watch: WatchConfig,

    /// Prometheus endpoint settings
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl GatewaySettings {
    /// Load settings with priority: defaults < optional config file <
    /// `FLOWGATE__*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        let settings: GatewaySettings = builder
            .add_source(Environment::with_prefix("FLOWGATE").separator("__"))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.runtime.validate()?;
        self.buffers.validate()?;
        self.watch.validate()?;
        self.monitoring.validate()?;
        Ok(())
    }
}
