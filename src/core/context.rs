//! The per-worker capability surface handed to binding implementations.
//!
//! A `WorkerContext` borrows the agent's single-threaded state for exactly
//! one callback: handlers and pollers must not retain references past the
//! invocation that supplied them. Everything a binding may do — allocate
//! stream ids, send frames, take budget views, schedule signals, borrow
//! buffers, resolve names — goes through here.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use crossbeam_channel::Sender;
use serde_json::Value;
use tracing::trace;

use super::{BufferPool, Frame, SignalQueue, StreamTable};
use crate::budget::{BudgetLedger, Creditor, Debitor};
use crate::factory::{
    Catalog, Converter, ConverterFactory, FactoryRegistry, Guard, StreamFactory, StreamHandler,
    Validator, Vault,
};
use crate::ident;
use crate::labels::LabelRegistry;
use crate::metrics;
use crate::model::{resolve_route, BindingConfig, NamespaceConfig};
use crate::utils::HostResolver;
use crate::{BudgetError, SchemaError, StreamError};

/// Readiness source polled once per event-loop iteration (nonblocking
/// sockets owned by bindings).
pub trait Poller {
    /// Originating binding, used for namespace teardown matching.
    fn binding_id(&self) -> u64;

    /// Listeners are closed on drain unregistration; connection pollers
    /// survive until their streams terminate.
    fn is_listener(&self) -> bool {
        false
    }

    fn poll(&mut self, ctx: &mut WorkerContext<'_>) -> Result<PollOutcome, StreamError>;

    /// Hard teardown: release the underlying resource immediately.
    fn shutdown(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing ready
    Idle,
    /// Performed work; keep the loop hot
    Busy,
    /// Resource finished; drop the poller
    Done,
}

/// Frame-level send handle for a worker's queue; clonable across threads,
/// used by collaborators that produce frames from outside the agent.
#[derive(Clone)]
pub struct FrameSender {
    tx: Sender<Frame>,
}

impl FrameSender {
    pub(crate) fn new(tx: Sender<Frame>) -> Self {
        Self { tx }
    }

    pub fn send(&self, frame: Frame) -> Result<(), StreamError> {
        self.tx
            .send(frame)
            .map_err(|_| StreamError::Io("agent frame queue closed".into()))
    }
}

/// Per-namespace instantiated collaborators.
pub struct NamespaceRuntime {
    pub config: Arc<NamespaceConfig>,
    pub guards: HashMap<String, Arc<dyn Guard>>,
    pub vaults: HashMap<String, Arc<dyn Vault>>,
    pub catalogs: HashMap<String, Arc<dyn Catalog>>,
}

/// One binding brought live on this worker.
pub struct BindingInstance {
    pub config: Arc<BindingConfig>,
    pub namespace_label: i32,
    pub stream_factory: Arc<dyn StreamFactory>,
    /// Set while draining after unregistration; rejects new streams.
    pub retiring: bool,
}

/// The mutable per-worker state a context borrows. Owned by the agent's
/// thread; nothing here is shared across workers.
pub struct AgentShared {
    pub worker: usize,
    pub streams: StreamTable,
    pub bindings: HashMap<u64, BindingInstance>,
    pub namespaces: HashMap<i32, NamespaceRuntime>,
    pub outbox: VecDeque<Frame>,
    pub new_pollers: Vec<Box<dyn Poller>>,
    pub new_handlers: Vec<(u64, Box<dyn StreamHandler>)>,
    pub signals: SignalQueue,
    pub write_buf: BytesMut,
    pub pool: BufferPool,
    pub ledger: Arc<BudgetLedger>,
    pub labels: Arc<LabelRegistry>,
    pub resolver: Arc<dyn HostResolver>,
    pub registry: Arc<FactoryRegistry>,
    pub frame_tx: Sender<Frame>,
    pub next_seq: u64,
    pub max_streams: usize,
}

pub struct WorkerContext<'a> {
    shared: &'a mut AgentShared,
}

impl<'a> WorkerContext<'a> {
    pub(crate) fn new(shared: &'a mut AgentShared) -> Self {
        Self { shared }
    }

    pub fn worker(&self) -> usize {
        self.shared.worker
    }

    // --- stream lifecycle ------------------------------------------------

    /// Allocates a fresh initial/reply stream pair owned by this worker.
    /// Worker bits partition the id space, so no cross-agent coordination
    /// is needed. Rejects with `WorkerCapacity` when the shard is full.
    pub fn supply_initial_id(&mut self, binding_id: u64) -> Result<u64, StreamError> {
        if self.shared.streams.pair_count() >= self.shared.max_streams {
            return Err(StreamError::WorkerCapacity {
                worker: self.shared.worker,
            });
        }
        if !self.shared.bindings.contains_key(&binding_id) {
            return Err(StreamError::UnknownBinding(binding_id));
        }
        self.shared.next_seq += 1;
        let id = ident::initial_stream_id(self.shared.worker, self.shared.next_seq);
        self.shared.streams.open_pair(id, binding_id);
        metrics::STREAMS_OPENED
            .with_label_values(&[&self.shared.worker.to_string()])
            .inc();
        trace!(stream_id = id, binding_id, "stream pair opened");
        Ok(id)
    }

    pub fn supply_reply_id(&self, initial_id: u64) -> u64 {
        ident::paired_stream_id(initial_id)
    }

    pub fn stream_state(&self, stream_id: u64) -> Option<super::StreamState> {
        self.shared.streams.state(stream_id)
    }

    /// Whether the stream ended through orderly pair retirement, as opposed
    /// to never existing or being torn down by a hard unregister.
    pub fn is_stream_retired(&self, stream_id: u64) -> bool {
        self.shared.streams.is_retired(stream_id)
    }

    /// Registers the receiver for frames flowing on `stream_id`.
    pub fn register_receiver(&mut self, stream_id: u64, handler: Box<dyn StreamHandler>) {
        self.shared.new_handlers.push((stream_id, handler));
    }

    /// Registers a readiness source polled every loop iteration.
    pub fn register_poller(&mut self, poller: Box<dyn Poller>) {
        self.shared.new_pollers.push(poller);
    }

    /// Enqueues a frame for dispatch on this worker (local fast path).
    pub fn send(&mut self, frame: Frame) {
        self.shared.outbox.push_back(frame);
    }

    /// Send handle usable from other threads.
    pub fn supply_sender(&self) -> FrameSender {
        FrameSender::new(self.shared.frame_tx.clone())
    }

    // --- routing ---------------------------------------------------------

    /// First-match route resolution for a candidate arriving on `binding_id`.
    /// Returns the exit binding's identifier; `NoRoute` means the caller
    /// must reject the stream attempt.
    pub fn resolve_exit(
        &self,
        binding_id: u64,
        candidate: &Value,
        token: &str,
    ) -> Result<u64, StreamError> {
        let instance = self
            .shared
            .bindings
            .get(&binding_id)
            .ok_or(StreamError::UnknownBinding(binding_id))?;
        let no_guards = HashMap::new();
        let guards = self
            .shared
            .namespaces
            .get(&instance.namespace_label)
            .map(|ns| &ns.guards)
            .unwrap_or(&no_guards);

        let chosen = resolve_route(&instance.config.routes, candidate, token, guards)
            .and_then(|route| route.exit.as_ref())
            .or(instance.config.exit.as_ref());
        match chosen {
            Some(exit) if exit.id != ident::UNSET => Ok(exit.id),
            _ => Err(StreamError::NoRoute {
                binding: instance.config.qualified_name.clone(),
            }),
        }
    }

    /// Instantiates the exit-side handler for a freshly-opened stream and
    /// registers it as the receiver for the initial direction.
    pub fn instantiate(&mut self, exit_binding_id: u64, begin: &Frame) -> Result<(), StreamError> {
        let instance = self
            .shared
            .bindings
            .get(&exit_binding_id)
            .ok_or(StreamError::UnknownBinding(exit_binding_id))?;
        if instance.retiring {
            return Err(StreamError::UnknownBinding(exit_binding_id));
        }
        let factory = instance.stream_factory.clone();
        let handler = factory.create(begin)?;
        self.shared.new_handlers.push((begin.stream_id, handler));
        Ok(())
    }

    // --- budgets ---------------------------------------------------------

    pub fn supply_budget_id(&self) -> u64 {
        self.shared.ledger.supply_budget_id()
    }

    pub fn supply_child_budget_id(&self, parent: u64) -> Result<u64, BudgetError> {
        self.shared.ledger.supply_child_budget_id(parent)
    }

    pub fn creditor(&self) -> Creditor {
        Creditor::new(self.shared.ledger.clone())
    }

    pub fn supply_debitor(&self, budget_id: u64) -> Debitor {
        Debitor::new(self.shared.ledger.clone(), budget_id)
    }

    /// Marks one consumer of the budget detached; the entry is reclaimed
    /// after the linger delay.
    pub fn watch_close_budget(&self, budget_id: u64) {
        self.shared.ledger.watch_close(budget_id);
    }

    // --- signals ---------------------------------------------------------

    /// Schedules a cancellable wake-up for a stream's handler; `repeat`
    /// makes it periodic.
    pub fn schedule(&mut self, stream_id: u64, delay: Duration, repeat: Option<Duration>) -> u64 {
        self.shared.signals.schedule(stream_id, delay, repeat)
    }

    /// Cancels a pending signal; a no-op after it fired.
    pub fn cancel_signal(&mut self, signal_id: u64) -> bool {
        self.shared.signals.cancel(signal_id)
    }

    // --- buffers ---------------------------------------------------------

    /// The worker's shared write buffer; contents are valid only within
    /// the current callback.
    pub fn write_buffer(&mut self) -> &mut BytesMut {
        &mut self.shared.write_buf
    }

    pub fn acquire_slot(&mut self) -> Result<usize, StreamError> {
        self.shared.pool.acquire()
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut BytesMut {
        self.shared.pool.slot_mut(index)
    }

    pub fn release_slot(&mut self, index: usize) {
        self.shared.pool.release(index);
    }

    pub fn slot_size(&self) -> usize {
        self.shared.pool.slot_size()
    }

    // --- name/id resolution and collaborators ----------------------------

    pub fn supply_label_id(&self, name: &str) -> crate::Result<i32> {
        self.shared.labels.supply_label_id(name)
    }

    pub fn lookup_label(&self, id: i32) -> Option<String> {
        self.shared.labels.lookup_label(id)
    }

    pub fn resolve_host(&self, name: &str) -> Result<Vec<SocketAddr>, StreamError> {
        self.shared.resolver.resolve_host(name)
    }

    pub fn supply_guard(&self, id: u64) -> Option<Arc<dyn Guard>> {
        let ns = self.namespace_of(id)?;
        let name = ns.config.guards.iter().find(|g| g.id == id)?.name.clone();
        ns.guards.get(&name).cloned()
    }

    pub fn supply_vault(&self, id: u64) -> Option<Arc<dyn Vault>> {
        let ns = self.namespace_of(id)?;
        let name = ns.config.vaults.iter().find(|v| v.id == id)?.name.clone();
        ns.vaults.get(&name).cloned()
    }

    pub fn supply_catalog(&self, id: u64) -> Option<Arc<dyn Catalog>> {
        let ns = self.namespace_of(id)?;
        let name = ns.config.catalogs.iter().find(|c| c.id == id)?.name.clone();
        ns.catalogs.get(&name).cloned()
    }

    /// Schema/codec collaborator for a model config block; fully external.
    pub fn supply_validator(
        &self,
        model: &Value,
    ) -> Result<Option<Arc<dyn Validator>>, SchemaError> {
        let Some(type_name) = model.get("model").and_then(Value::as_str) else {
            return Ok(None);
        };
        match self.shared.registry.validator(type_name) {
            Some(factory) => factory.create(model).map(Some),
            None => Err(SchemaError::UnknownType {
                kind: "validator",
                name: type_name.to_string(),
            }),
        }
    }

    /// Read-path payload converter for a model config block.
    pub fn supply_read_converter(
        &self,
        model: &Value,
    ) -> Result<Option<Arc<dyn Converter>>, SchemaError> {
        self.supply_converter(model, |factory, model| factory.create_reader(model))
    }

    /// Write-path payload converter for a model config block.
    pub fn supply_write_converter(
        &self,
        model: &Value,
    ) -> Result<Option<Arc<dyn Converter>>, SchemaError> {
        self.supply_converter(model, |factory, model| factory.create_writer(model))
    }

    fn supply_converter(
        &self,
        model: &Value,
        create: impl FnOnce(
            &dyn ConverterFactory,
            &Value,
        ) -> Result<Arc<dyn Converter>, SchemaError>,
    ) -> Result<Option<Arc<dyn Converter>>, SchemaError> {
        let Some(type_name) = model.get("model").and_then(Value::as_str) else {
            return Ok(None);
        };
        match self.shared.registry.converter(type_name) {
            Some(factory) => create(factory.as_ref(), model).map(Some),
            None => Err(SchemaError::UnknownType {
                kind: "converter",
                name: type_name.to_string(),
            }),
        }
    }

    fn namespace_of(&self, id: u64) -> Option<&NamespaceRuntime> {
        self.shared
            .namespaces
            .get(&(ident::namespace_id(id) as i32))
    }
}
