//! Duplex exit binding that mirrors every data byte back on the reply
//! direction, within the credit window advertised by the peer.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::trace;

use crate::core::{Frame, FrameKind, WorkerContext};
use crate::factory::{BindingFactory, StreamFactory, StreamHandler};
use crate::ident;
use crate::model::BindingConfig;
use crate::{SchemaError, StreamError};

/// Interval for retrying a credit-stalled forward when no grant frame can
/// reach us anymore (peer direction already terminal).
const RETRY_INTERVAL: Duration = Duration::from_millis(1);

pub struct EchoBindingFactory;

impl BindingFactory for EchoBindingFactory {
    fn type_name(&self) -> &'static str {
        "echo"
    }

    fn validate(&self, binding: &BindingConfig) -> Result<(), SchemaError> {
        if !binding.options.is_null() && !binding.options.is_object() {
            return Err(SchemaError::MalformedOptions {
                binding: binding.qualified_name.clone(),
                detail: "options must be an object".into(),
            });
        }
        match binding.options.get("window") {
            None => Ok(()),
            Some(window) => match window.as_u64() {
                Some(w) if w >= 1 && w <= u32::MAX as u64 => Ok(()),
                _ => Err(SchemaError::MalformedOptions {
                    binding: binding.qualified_name.clone(),
                    detail: "window must be an integer in 1..=u32::MAX".into(),
                }),
            },
        }
    }

    fn stream_factory(
        &self,
        _worker: usize,
        binding: &Arc<BindingConfig>,
    ) -> Arc<dyn StreamFactory> {
        Arc::new(EchoStreamFactory {
            binding: binding.clone(),
        })
    }
}

struct EchoStreamFactory {
    binding: Arc<BindingConfig>,
}

impl StreamFactory for EchoStreamFactory {
    fn create(&self, begin: &Frame) -> Result<Box<dyn StreamHandler>, StreamError> {
        let reply_id = begin
            .begin_reply_to()
            .ok_or_else(|| StreamError::Handler("begin frame missing reply id".into()))?;
        Ok(Box::new(EchoHandler {
            initial_id: begin.stream_id,
            reply_id,
            window: self.binding.window(),
            inbound_budget: ident::UNSET,
            send_debitor: None,
            queue: VecDeque::new(),
            peer_ended: false,
            end_sent: false,
            retry_signal: None,
        }))
    }
}

/// Receives the initial direction, echoes onto the reply direction.
///
/// Credit discipline: data received was pre-debited from our inbound budget
/// by the sender; every byte forwarded re-credits it and advertises the
/// grant. Forwarding itself debits the peer's receive budget, learned from
/// the first `Window` grant; a stalled forward re-arms via the signaler.
struct EchoHandler {
    initial_id: u64,
    reply_id: u64,
    window: u64,
    inbound_budget: u64,
    send_debitor: Option<crate::budget::Debitor>,
    queue: VecDeque<Bytes>,
    peer_ended: bool,
    end_sent: bool,
    retry_signal: Option<u64>,
}

impl StreamHandler for EchoHandler {
    fn on_frame(
        &mut self,
        ctx: &mut WorkerContext<'_>,
        frame: &Frame,
    ) -> Result<(), StreamError> {
        match frame.kind {
            FrameKind::Begin => {
                let budget = ctx.supply_budget_id();
                ctx.creditor()
                    .credit(budget, self.window)
                    .map_err(|e| StreamError::Handler(e.to_string()))?;
                self.inbound_budget = budget;

                ctx.send(Frame::begin(
                    self.reply_id,
                    frame.begin_binding_id().unwrap_or(ident::UNSET),
                    self.initial_id,
                ));
                ctx.send(Frame::window(self.reply_id, budget, self.window as u32));
                trace!(
                    stream_id = self.initial_id,
                    window = self.window,
                    "echo stream opened"
                );
            }
            FrameKind::Data => {
                self.queue.push_back(frame.payload.clone());
                self.pump(ctx);
            }
            FrameKind::Flush => {
                if !self.end_sent {
                    ctx.send(Frame::flush(self.reply_id));
                }
            }
            FrameKind::Window => {
                if self.send_debitor.is_none() {
                    if let Some(budget) = frame.window_budget_id() {
                        self.send_debitor = Some(ctx.supply_debitor(budget));
                    }
                }
                self.pump(ctx);
            }
            FrameKind::End => {
                self.peer_ended = true;
                self.pump(ctx);
            }
            FrameKind::Abort | FrameKind::Reset => {
                self.queue.clear();
                if !self.end_sent {
                    ctx.send(Frame::abort(self.reply_id));
                    self.end_sent = true;
                }
                self.release(ctx);
            }
        }
        Ok(())
    }

    fn on_signal(
        &mut self,
        ctx: &mut WorkerContext<'_>,
        _signal_id: u64,
    ) -> Result<(), StreamError> {
        self.retry_signal = None;
        self.pump(ctx);
        Ok(())
    }
}

impl EchoHandler {
    /// Forwards as much queued data as the peer's window allows, taking
    /// partial chunks when credit covers only part of the front.
    fn pump(&mut self, ctx: &mut WorkerContext<'_>) {
        if self.end_sent {
            return;
        }
        while let Some(front) = self.queue.front_mut() {
            let Some(debitor) = &self.send_debitor else {
                break;
            };
            let balance = debitor.balance().unwrap_or(0).max(0) as usize;
            let take = front.len().min(balance);
            if take == 0 || !debitor.debit(take as u64) {
                break;
            }
            let chunk = if take == front.len() {
                self.queue.pop_front().unwrap_or_default()
            } else {
                front.split_to(take)
            };
            let granted = chunk.len() as u64;
            ctx.send(Frame::data(self.reply_id, chunk));

            // Re-open our receive window for the bytes just consumed.
            if self.inbound_budget != ident::UNSET {
                let _ = ctx.creditor().credit(self.inbound_budget, granted);
                ctx.send(Frame::window(
                    self.reply_id,
                    self.inbound_budget,
                    granted as u32,
                ));
            }
        }

        if self.queue.is_empty() {
            if let Some(signal_id) = self.retry_signal.take() {
                ctx.cancel_signal(signal_id);
            }
        } else if self.retry_signal.is_none() {
            // Stalled on credit; grants land in the ledger even when no
            // frame can carry the notification, so poll for them.
            self.retry_signal = Some(ctx.schedule(self.initial_id, RETRY_INTERVAL, None));
        }

        if self.peer_ended && self.queue.is_empty() && !self.end_sent {
            ctx.send(Frame::end(self.reply_id));
            self.end_sent = true;
            self.release(ctx);
        }
    }

    fn release(&mut self, ctx: &mut WorkerContext<'_>) {
        if let Some(signal_id) = self.retry_signal.take() {
            ctx.cancel_signal(signal_id);
        }
        if self.inbound_budget != ident::UNSET {
            ctx.watch_close_budget(self.inbound_budget);
            self.inbound_budget = ident::UNSET;
        }
    }
}
