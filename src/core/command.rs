//! Control-plane commands delivered to dispatch agents.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::factory::{BindingFactory, Catalog, Guard, Vault};
use crate::model::NamespaceConfig;
use crate::Result;

/// Everything an agent needs to bring a set of namespaces live: the
/// resolved configuration, the binding factories cached at parse time,
/// instantiated guard/vault/catalog collaborators (keyed by namespace
/// label), and the worker each server binding attaches on.
pub struct RegistrationSet {
    pub namespaces: Vec<Arc<NamespaceConfig>>,
    pub factories: HashMap<u64, Arc<dyn BindingFactory>>,
    pub assignments: HashMap<u64, usize>,
    pub guards: HashMap<i32, HashMap<String, Arc<dyn Guard>>>,
    pub vaults: HashMap<i32, HashMap<String, Arc<dyn Vault>>>,
    pub catalogs: HashMap<i32, HashMap<String, Arc<dyn Catalog>>>,
}

pub enum AgentCommand {
    /// Bring namespaces live; acked after listening resources are open.
    Register {
        set: Arc<RegistrationSet>,
        ack: oneshot::Sender<Result<()>>,
    },

    /// Tear a namespace down. `drain` keeps in-flight streams alive until
    /// they terminate naturally; otherwise they are force-terminated.
    /// Idempotent for unknown labels.
    Unregister {
        label: i32,
        drain: bool,
        ack: oneshot::Sender<Result<()>>,
    },

    /// Install a runtime-generated composite namespace without stopping
    /// the agent.
    AttachComposite {
        set: Arc<RegistrationSet>,
        ack: oneshot::Sender<Result<()>>,
    },

    /// Remove a runtime-generated composite namespace.
    DetachComposite {
        label: i32,
        ack: oneshot::Sender<Result<()>>,
    },

    /// Stop the event loop after tearing everything down.
    Shutdown { ack: oneshot::Sender<()> },
}
