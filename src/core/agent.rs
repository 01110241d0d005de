//! Per-worker dispatch agent.
//!
//! One single-threaded, cooperatively-scheduled event loop per worker, on a
//! dedicated OS thread. Each iteration drains the control queue, dispatches
//! queued frames into exactly one handler per frame, polls readiness
//! sources, fires due signals, then applies the bounded backoff idle
//! strategy. The agent owns its shard of streams end to end: id allocation,
//! state transitions, handler lifecycle and teardown. No stream state is
//! shared across workers; cross-worker coordination is message passing via
//! the control and frame queues.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

use super::{
    AgentCommand, AgentShared, BindingInstance, BufferPool, Frame, FrameKind, FrameSender,
    IdleStrategy, NamespaceRuntime, PollOutcome, Poller, RegistrationSet, SignalQueue,
    StreamState, StreamTable, WorkerContext,
};
use crate::budget::BudgetLedger;
use crate::config::GatewaySettings;
use crate::factory::{FactoryRegistry, StreamHandler};
use crate::ident;
use crate::labels::LabelRegistry;
use crate::metrics;
use crate::utils::HostResolver;
use crate::{Error, RegistrationError, Result, StreamError};

const MAX_FRAMES_PER_PASS: usize = 256;

/// Cross-thread handle to one worker's event loop.
pub struct DispatchAgent {
    worker: usize,
    control_tx: Sender<AgentCommand>,
    frame_tx: Sender<Frame>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchAgent {
    /// Spawns the worker thread and returns its handle.
    pub fn spawn(
        worker: usize,
        settings: &GatewaySettings,
        ledger: Arc<BudgetLedger>,
        labels: Arc<LabelRegistry>,
        resolver: Arc<dyn HostResolver>,
        registry: Arc<FactoryRegistry>,
    ) -> Arc<Self> {
        let (control_tx, control_rx) = unbounded();
        let (frame_tx, frame_rx) = unbounded();

        // Handlers and pollers are single-threaded state, so the core is
        // assembled on the worker thread itself; only the channels and the
        // shared services cross the spawn.
        let settings = settings.clone();
        let thread_frame_tx = frame_tx.clone();
        let handle = std::thread::Builder::new()
            .name(format!("flowgate-worker-{}", worker))
            .spawn(move || {
                let shared = AgentShared {
                    worker,
                    streams: StreamTable::new(),
                    bindings: HashMap::new(),
                    namespaces: HashMap::new(),
                    outbox: std::collections::VecDeque::new(),
                    new_pollers: Vec::new(),
                    new_handlers: Vec::new(),
                    signals: SignalQueue::new(),
                    write_buf: BytesMut::with_capacity(settings.buffers.write_buffer_capacity),
                    pool: BufferPool::new(settings.buffers.slot_count, settings.buffers.slot_size),
                    ledger,
                    labels,
                    resolver,
                    registry,
                    frame_tx: thread_frame_tx,
                    next_seq: 0,
                    max_streams: settings.runtime.max_streams_per_worker,
                };

                let core = AgentCore {
                    shared,
                    handlers: HashMap::new(),
                    pollers: Vec::new(),
                    control_rx,
                    frame_rx,
                    idle: IdleStrategy::new(
                        settings.runtime.spin_limit,
                        settings.runtime.yield_limit,
                        Duration::from_micros(settings.runtime.park_timeout_us),
                    ),
                    linger_ms: settings.runtime.budget_linger_ms,
                    drain_default: settings.runtime.drain_on_close,
                    last_sweep: Instant::now(),
                    worker_label: worker.to_string(),
                };
                core.run()
            })
            .expect("spawn dispatch agent thread");

        Arc::new(Self {
            worker,
            control_tx,
            frame_tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Send handle onto this worker's frame queue.
    pub fn frame_sender(&self) -> FrameSender {
        FrameSender::new(self.frame_tx.clone())
    }

    pub async fn register(&self, set: Arc<RegistrationSet>) -> Result<()> {
        let (ack, rx) = oneshot::channel();
        self.send_command(AgentCommand::Register { set, ack })?;
        self.await_ack(rx).await
    }

    pub async fn unregister(&self, label: i32, drain: bool) -> Result<()> {
        let (ack, rx) = oneshot::channel();
        self.send_command(AgentCommand::Unregister { label, drain, ack })?;
        self.await_ack(rx).await
    }

    pub async fn attach_composite(&self, set: Arc<RegistrationSet>) -> Result<()> {
        let (ack, rx) = oneshot::channel();
        self.send_command(AgentCommand::AttachComposite { set, ack })?;
        self.await_ack(rx).await
    }

    pub async fn detach_composite(&self, label: i32) -> Result<()> {
        let (ack, rx) = oneshot::channel();
        self.send_command(AgentCommand::DetachComposite { label, ack })?;
        self.await_ack(rx).await
    }

    /// Stops the event loop and joins the worker thread. Best-effort on an
    /// already-stopped agent.
    pub async fn shutdown(&self) {
        let (ack, rx) = oneshot::channel();
        if self.send_command(AgentCommand::Shutdown { ack }).is_ok() {
            let _ = rx.await;
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    fn send_command(&self, cmd: AgentCommand) -> Result<()> {
        self.control_tx
            .send(cmd)
            .map_err(|_| RegistrationError::AgentUnavailable { worker: self.worker }.into())
    }

    async fn await_ack(&self, rx: oneshot::Receiver<Result<()>>) -> Result<()> {
        rx.await
            .map_err(|_| Error::from(RegistrationError::AgentUnavailable { worker: self.worker }))?
    }
}

struct AgentCore {
    shared: AgentShared,
    handlers: HashMap<u64, Box<dyn StreamHandler>>,
    pollers: Vec<Box<dyn Poller>>,
    control_rx: Receiver<AgentCommand>,
    frame_rx: Receiver<Frame>,
    idle: IdleStrategy,
    linger_ms: u64,
    drain_default: bool,
    last_sweep: Instant,
    worker_label: String,
}

impl AgentCore {
    fn run(mut self) {
        debug!(worker = self.shared.worker, "dispatch agent started");

        loop {
            let mut worked = false;

            // Control queue first: registration and teardown win over data.
            loop {
                match self.control_rx.try_recv() {
                    Ok(AgentCommand::Shutdown { ack }) => {
                        self.teardown();
                        let _ = ack.send(());
                        debug!(worker = self.shared.worker, "dispatch agent stopped");
                        return;
                    }
                    Ok(cmd) => {
                        worked = true;
                        self.handle_command(cmd);
                    }
                    Err(_) => break,
                }
            }

            // Frames from other threads.
            for _ in 0..MAX_FRAMES_PER_PASS {
                match self.frame_rx.try_recv() {
                    Ok(frame) => {
                        worked = true;
                        self.dispatch(frame);
                    }
                    Err(_) => break,
                }
            }

            // Locally-enqueued frames; bounded by the snapshot length so a
            // handler feeding the outbox cannot starve the pollers.
            let pending = self.shared.outbox.len();
            for _ in 0..pending {
                if let Some(frame) = self.shared.outbox.pop_front() {
                    worked = true;
                    self.dispatch(frame);
                }
            }

            if self.poll_sources() {
                worked = true;
            }

            let now = Instant::now();
            while let Some((signal_id, stream_id)) = self.shared.signals.pop_due(now) {
                worked = true;
                self.dispatch_signal(signal_id, stream_id);
            }

            if self.last_sweep.elapsed() >= Duration::from_millis(self.linger_ms.max(50)) {
                self.shared.ledger.sweep(self.linger_ms);
                self.last_sweep = Instant::now();
                metrics::WORKER_QUEUE_DEPTH
                    .with_label_values(&[&self.worker_label])
                    .set(self.frame_rx.len() as f64);
            }

            if worked {
                self.idle.reset();
            } else {
                self.idle.idle();
            }
        }
    }

    fn handle_command(&mut self, cmd: AgentCommand) {
        match cmd {
            AgentCommand::Register { set, ack } | AgentCommand::AttachComposite { set, ack } => {
                let result = self.apply_registration(&set);
                let _ = ack.send(result);
            }
            AgentCommand::Unregister { label, drain, ack } => {
                self.remove_namespace(label, drain);
                let _ = ack.send(Ok(()));
            }
            AgentCommand::DetachComposite { label, ack } => {
                self.remove_namespace(label, self.drain_default);
                let _ = ack.send(Ok(()));
            }
            AgentCommand::Shutdown { .. } => unreachable!("handled by the run loop"),
        }
    }

    fn apply_registration(&mut self, set: &RegistrationSet) -> Result<()> {
        let mut applied: Vec<i32> = Vec::new();

        for ns in &set.namespaces {
            self.shared.namespaces.insert(
                ns.label,
                NamespaceRuntime {
                    config: ns.clone(),
                    guards: set.guards.get(&ns.label).cloned().unwrap_or_default(),
                    vaults: set.vaults.get(&ns.label).cloned().unwrap_or_default(),
                    catalogs: set.catalogs.get(&ns.label).cloned().unwrap_or_default(),
                },
            );
            applied.push(ns.label);

            for binding in &ns.bindings {
                let Some(factory) = set.factories.get(&binding.id).map(Arc::clone) else {
                    self.rollback_partial(&applied);
                    return Err(RegistrationError::Rejected(format!(
                        "no factory cached for binding '{}'",
                        binding.qualified_name
                    ))
                    .into());
                };

                self.shared.bindings.insert(
                    binding.id,
                    BindingInstance {
                        config: binding.clone(),
                        namespace_label: ns.label,
                        stream_factory: factory.stream_factory(self.shared.worker, binding),
                        retiring: false,
                    },
                );

                if set.assignments.get(&binding.id).copied() == Some(self.shared.worker) {
                    let attach_result = {
                        let mut ctx = WorkerContext::new(&mut self.shared);
                        factory.attach(&mut ctx, binding)
                    };
                    self.absorb_new();
                    if let Err(e) = attach_result {
                        error!(
                            worker = self.shared.worker,
                            binding = %binding.qualified_name,
                            error = %e,
                            "binding attach failed; rolling back partial registration"
                        );
                        self.rollback_partial(&applied);
                        return Err(e);
                    }
                }
            }
            info!(
                worker = self.shared.worker,
                namespace = %ns.name,
                bindings = ns.bindings.len(),
                composite = ns.is_composite(),
                "namespace registered"
            );
        }
        Ok(())
    }

    fn rollback_partial(&mut self, applied: &[i32]) {
        for label in applied {
            self.remove_namespace(*label, false);
        }
    }

    /// Tears down one namespace. Idempotent: unknown labels fall through
    /// every step without effect.
    fn remove_namespace(&mut self, label: i32, drain: bool) {
        let known = self.shared.namespaces.remove(&label).is_some();

        let binding_ids: Vec<u64> = self
            .shared
            .bindings
            .keys()
            .copied()
            .filter(|id| ident::namespace_id(*id) == label as u32)
            .collect();

        // Listeners always close; connection pollers survive a drain so
        // in-flight streams can complete under the old binding instance.
        let mut retained = Vec::new();
        for mut poller in std::mem::take(&mut self.pollers) {
            let in_namespace = ident::namespace_id(poller.binding_id()) == label as u32;
            if in_namespace && (poller.is_listener() || !drain) {
                poller.shutdown();
            } else {
                retained.push(poller);
            }
        }
        self.pollers = retained;

        if drain {
            for id in &binding_ids {
                if let Some(instance) = self.shared.bindings.get_mut(id) {
                    instance.retiring = true;
                }
            }
            // Nothing in flight: drop the instances right away.
            if self.shared.streams.ids_in_namespace(label).is_empty() {
                for id in &binding_ids {
                    self.shared.bindings.remove(id);
                }
            }
        } else {
            for stream_id in self.shared.streams.ids_in_namespace(label) {
                self.shared.streams.force_terminal(stream_id, StreamState::Aborted);
                self.handlers.remove(&stream_id);
            }
            for stream_id in self.shared.streams.ids_in_namespace(label) {
                if self.shared.streams.retire_pair(stream_id).is_some() {
                    metrics::STREAMS_ABORTED
                        .with_label_values(&[&self.worker_label])
                        .inc();
                }
            }
            for id in &binding_ids {
                self.shared.bindings.remove(id);
            }
        }

        if known {
            info!(worker = self.shared.worker, label, drain, "namespace unregistered");
        }
    }

    fn dispatch(&mut self, frame: Frame) {
        metrics::FRAMES_DISPATCHED
            .with_label_values(&[&self.worker_label])
            .inc();
        let stream_id = frame.stream_id;

        match self.shared.streams.apply(stream_id, frame.kind) {
            Ok(state) => {
                if let Some(mut handler) = self.handlers.remove(&stream_id) {
                    let result = {
                        let mut ctx = WorkerContext::new(&mut self.shared);
                        handler.on_frame(&mut ctx, &frame)
                    };
                    match result {
                        // Handlers live until the pair retires, not until
                        // their own direction terminates: the exit side may
                        // still be draining toward the reply direction.
                        Ok(()) => {
                            self.handlers.insert(stream_id, handler);
                        }
                        Err(e) => {
                            warn!(
                                worker = self.shared.worker,
                                stream_id,
                                frame = frame.kind.name(),
                                error = %e,
                                "handler failed; resetting stream pair"
                            );
                            self.fail_stream(stream_id);
                        }
                    }
                    self.absorb_new();
                }

                // A reset on one direction synthesizes an abort on its pair
                // unless the peer already terminated.
                if frame.kind == FrameKind::Reset {
                    let pair = ident::paired_stream_id(stream_id);
                    if let Some(s) = self.shared.streams.state(pair) {
                        if !s.is_terminal() {
                            self.shared.outbox.push_back(Frame::abort(pair));
                        }
                    }
                }

                if state.is_terminal() {
                    self.try_retire(stream_id);
                }
            }
            Err(StreamError::UnknownStream(_)) => {
                trace!(stream_id, frame = frame.kind.name(), "frame for unknown stream dropped");
            }
            Err(e) => {
                warn!(
                    worker = self.shared.worker,
                    stream_id,
                    frame = frame.kind.name(),
                    error = %e,
                    "protocol violation"
                );
                metrics::PROTOCOL_VIOLATIONS
                    .with_label_values(&[&self.worker_label])
                    .inc();
                self.fail_stream(stream_id);
            }
        }
    }

    fn dispatch_signal(&mut self, signal_id: u64, stream_id: u64) {
        if let Some(mut handler) = self.handlers.remove(&stream_id) {
            let result = {
                let mut ctx = WorkerContext::new(&mut self.shared);
                handler.on_signal(&mut ctx, signal_id)
            };
            match result {
                Ok(()) => {
                    self.handlers.insert(stream_id, handler);
                }
                Err(e) => {
                    warn!(stream_id, signal_id, error = %e, "signal handler failed");
                    self.fail_stream(stream_id);
                }
            }
            self.absorb_new();
        }
    }

    /// Receiver-initiated rejection of the offending stream. The reset
    /// flows through normal dispatch, whose synthesis is the single
    /// authority for the paired abort; enqueueing the abort here as well
    /// would double-terminate the pair. Only when the offending direction
    /// is already terminal does the pair get aborted directly.
    fn fail_stream(&mut self, stream_id: u64) {
        match self.shared.streams.state(stream_id) {
            Some(s) if !s.is_terminal() => {
                self.shared.outbox.push_back(Frame::reset(stream_id));
            }
            _ => {
                let pair = ident::paired_stream_id(stream_id);
                if let Some(s) = self.shared.streams.state(pair) {
                    if !s.is_terminal() {
                        self.shared.outbox.push_back(Frame::abort(pair));
                    }
                }
            }
        }
    }

    fn try_retire(&mut self, stream_id: u64) {
        let binding_id = self.shared.streams.get(stream_id).map(|e| e.binding_id);
        if let Some((own, pair)) = self.shared.streams.retire_pair(stream_id) {
            let pair_id = ident::paired_stream_id(stream_id);
            self.handlers.remove(&stream_id);
            self.handlers.remove(&pair_id);

            let initial_state = if ident::is_initial(stream_id) { own } else { pair };
            let counter = match initial_state {
                StreamState::Closed => &*metrics::STREAMS_CLOSED,
                StreamState::Aborted => &*metrics::STREAMS_ABORTED,
                _ => &*metrics::STREAMS_RESET,
            };
            counter.with_label_values(&[&self.worker_label]).inc();
            trace!(stream_id, state = initial_state.name(), "stream pair retired");

            // Last stream of a draining binding: finish the teardown.
            if let Some(binding_id) = binding_id {
                let label = ident::namespace_id(binding_id) as i32;
                let draining = self
                    .shared
                    .bindings
                    .get(&binding_id)
                    .map(|b| b.retiring)
                    .unwrap_or(false);
                if draining && self.shared.streams.ids_in_namespace(label).is_empty() {
                    self.shared
                        .bindings
                        .retain(|id, _| ident::namespace_id(*id) != label as u32);
                    debug!(label, "drained namespace fully torn down");
                }
            }
        }
    }

    fn poll_sources(&mut self) -> bool {
        if self.pollers.is_empty() && self.shared.new_pollers.is_empty() {
            return false;
        }
        let mut worked = false;
        let mut keep = Vec::with_capacity(self.pollers.len());

        for mut poller in std::mem::take(&mut self.pollers) {
            let outcome = {
                let mut ctx = WorkerContext::new(&mut self.shared);
                poller.poll(&mut ctx)
            };
            self.absorb_handlers();
            match outcome {
                Ok(PollOutcome::Busy) => {
                    worked = true;
                    keep.push(poller);
                }
                Ok(PollOutcome::Idle) => keep.push(poller),
                Ok(PollOutcome::Done) => worked = true,
                Err(e) => {
                    warn!(
                        binding_id = poller.binding_id(),
                        error = %e,
                        "poller failed; dropping"
                    );
                    poller.shutdown();
                    worked = true;
                }
            }
        }

        // Pollers registered during this pass land in self.pollers via
        // absorb; merge them behind the survivors.
        keep.append(&mut self.pollers);
        keep.extend(self.shared.new_pollers.drain(..));
        self.pollers = keep;
        worked
    }

    fn absorb_new(&mut self) {
        self.absorb_handlers();
        if !self.shared.new_pollers.is_empty() {
            self.pollers.extend(self.shared.new_pollers.drain(..));
        }
    }

    fn absorb_handlers(&mut self) {
        for (id, handler) in self.shared.new_handlers.drain(..) {
            self.handlers.insert(id, handler);
        }
    }

    fn teardown(&mut self) {
        for mut poller in std::mem::take(&mut self.pollers) {
            poller.shutdown();
        }
        self.handlers.clear();
        self.shared.bindings.clear();
        self.shared.namespaces.clear();
    }
}
