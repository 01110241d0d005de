use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use serial_test::serial;

use crate::budget::BudgetLedger;
use crate::config::GatewaySettings;
use crate::factory::{BindingFactory, FactoryRegistry, StreamFactory, StreamHandler};
use crate::labels::LabelRegistry;
use crate::manager::ConfigManager;
use crate::metrics;
use crate::model::BindingConfig;
use crate::utils::SystemHostResolver;
use crate::{SchemaError, StreamError};

use super::{DispatchAgent, Frame, FrameKind, PollOutcome, Poller, WorkerContext};

type FrameLog = Arc<Mutex<Vec<FrameKind>>>;

/// Exit binding whose handler fails on every `Data` frame.
struct FaultyExitFactory;

impl BindingFactory for FaultyExitFactory {
    fn type_name(&self) -> &'static str {
        "faulty"
    }

    fn validate(&self, _binding: &BindingConfig) -> Result<(), SchemaError> {
        Ok(())
    }

    fn stream_factory(
        &self,
        _worker: usize,
        _binding: &Arc<BindingConfig>,
    ) -> Arc<dyn StreamFactory> {
        Arc::new(FaultyStreamFactory)
    }
}

struct FaultyStreamFactory;

impl StreamFactory for FaultyStreamFactory {
    fn create(&self, _begin: &Frame) -> Result<Box<dyn StreamHandler>, StreamError> {
        Ok(Box::new(FaultyHandler))
    }
}

struct FaultyHandler;

impl StreamHandler for FaultyHandler {
    fn on_frame(
        &mut self,
        _ctx: &mut WorkerContext<'_>,
        frame: &Frame,
    ) -> Result<(), StreamError> {
        match frame.kind {
            FrameKind::Data => Err(StreamError::Handler("injected data failure".into())),
            _ => Ok(()),
        }
    }
}

/// Server binding that opens one stream pair toward its route exit on the
/// first poll and injects the frames its `mode` option names.
struct DriverFactory {
    log: FrameLog,
}

impl BindingFactory for DriverFactory {
    fn type_name(&self) -> &'static str {
        "driver"
    }

    fn validate(&self, _binding: &BindingConfig) -> Result<(), SchemaError> {
        Ok(())
    }

    fn stream_factory(
        &self,
        _worker: usize,
        _binding: &Arc<BindingConfig>,
    ) -> Arc<dyn StreamFactory> {
        Arc::new(NoExitFactory)
    }

    fn attach(&self, ctx: &mut WorkerContext<'_>, binding: &Arc<BindingConfig>) -> crate::Result<()> {
        ctx.register_poller(Box::new(DriverPoller {
            binding: binding.clone(),
            log: self.log.clone(),
        }));
        Ok(())
    }
}

struct NoExitFactory;

impl StreamFactory for NoExitFactory {
    fn create(&self, _begin: &Frame) -> Result<Box<dyn StreamHandler>, StreamError> {
        Err(StreamError::Handler("driver binding has no exit side".into()))
    }
}

struct DriverPoller {
    binding: Arc<BindingConfig>,
    log: FrameLog,
}

impl Poller for DriverPoller {
    fn binding_id(&self) -> u64 {
        self.binding.id
    }

    fn poll(&mut self, ctx: &mut WorkerContext<'_>) -> Result<PollOutcome, StreamError> {
        let exit = ctx.resolve_exit(self.binding.id, &Value::Null, "")?;
        let initial = ctx.supply_initial_id(self.binding.id)?;
        let reply = ctx.supply_reply_id(initial);

        let begin = Frame::begin(initial, exit, reply);
        ctx.instantiate(exit, &begin)?;
        ctx.register_receiver(reply, Box::new(Recorder { log: self.log.clone() }));
        ctx.send(begin);

        match self.binding.options.get("mode").and_then(Value::as_str) {
            Some("reset") => ctx.send(Frame::reset(initial)),
            _ => ctx.send(Frame::data(initial, Bytes::from_static(b"x"))),
        }
        Ok(PollOutcome::Done)
    }

    fn shutdown(&mut self) {}
}

/// Receiver for the reply direction; records every frame kind it sees.
struct Recorder {
    log: FrameLog,
}

impl StreamHandler for Recorder {
    fn on_frame(
        &mut self,
        _ctx: &mut WorkerContext<'_>,
        frame: &Frame,
    ) -> Result<(), StreamError> {
        self.log.lock().push(frame.kind);
        Ok(())
    }
}

async fn run_scenario(mode: &str) -> (FrameLog, Arc<DispatchAgent>) {
    let log: FrameLog = Arc::new(Mutex::new(Vec::new()));
    let mut registry = FactoryRegistry::with_defaults();
    registry.register_binding(Arc::new(DriverFactory { log: log.clone() }));
    registry.register_binding(Arc::new(FaultyExitFactory));
    let registry = Arc::new(registry);

    let settings = GatewaySettings::default();
    let labels = Arc::new(LabelRegistry::temporary().expect("labels"));
    let agent = DispatchAgent::spawn(
        0,
        &settings,
        Arc::new(BudgetLedger::new()),
        labels.clone(),
        Arc::new(SystemHostResolver),
        registry.clone(),
    );
    let manager = ConfigManager::new(vec![agent.clone()], registry, labels, true);

    let doc = format!(
        r#"{{ "namespaces": [ {{ "name": "lab", "bindings": [
            {{ "name": "drive", "type": "driver", "kind": "server",
               "options": {{ "mode": "{mode}" }},
               "routes": [ {{ "exit": "sink" }} ] }},
            {{ "name": "sink", "type": "faulty", "kind": "duplex" }} ] }} ] }}"#
    );
    manager.apply("lab.json", &doc).await.expect("apply");

    for _ in 0..100 {
        if log.lock().contains(&FrameKind::Abort) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    (log, agent)
}

#[tokio::test]
#[serial]
async fn test_handler_failure_resets_pair_without_violation() {
    let violations_before = metrics::PROTOCOL_VIOLATIONS.with_label_values(&["0"]).get();
    let resets_before = metrics::STREAMS_RESET.with_label_values(&["0"]).get();

    let (log, agent) = run_scenario("fail").await;

    let recorded = log.lock().clone();
    assert_eq!(
        recorded.iter().filter(|k| **k == FrameKind::Abort).count(),
        1,
        "exactly one abort reaches the paired direction, got {:?}",
        recorded
    );
    assert_eq!(
        metrics::PROTOCOL_VIOLATIONS.with_label_values(&["0"]).get(),
        violations_before,
        "a failing handler is not a peer protocol violation"
    );
    assert_eq!(
        metrics::STREAMS_RESET.with_label_values(&["0"]).get(),
        resets_before + 1
    );

    agent.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_reset_synthesizes_abort_on_paired_direction() {
    let violations_before = metrics::PROTOCOL_VIOLATIONS.with_label_values(&["0"]).get();

    let (log, agent) = run_scenario("reset").await;

    let recorded = log.lock().clone();
    assert_eq!(
        recorded.iter().filter(|k| **k == FrameKind::Abort).count(),
        1,
        "reset on one direction aborts its pair exactly once, got {:?}",
        recorded
    );
    assert_eq!(
        metrics::PROTOCOL_VIOLATIONS.with_label_values(&["0"]).get(),
        violations_before
    );

    agent.shutdown().await;
}
