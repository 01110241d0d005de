//! Nonblocking TCP server binding: the origin side of the transport.
//!
//! A listener poller accepts sockets, resolves the route exit for each
//! connection and opens a stream pair. Per connection, a poller moves bytes
//! between the socket and the stream transport (reads become budget-limited
//! `Data` frames on the initial direction, reply-direction data drains to
//! the socket) while a handler on the reply direction records grants and
//! terminal frames. Poller and handler share connection state through an
//! `Rc<RefCell<..>>` that never leaves the worker thread.

use std::cell::RefCell;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::rc::Rc;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use serde_json::json;
use tracing::{debug, info, trace, warn};

use crate::budget::Debitor;
use crate::core::{Frame, FrameKind, PollOutcome, Poller, WorkerContext};
use crate::factory::{BindingFactory, StreamFactory, StreamHandler};
use crate::model::BindingConfig;
use crate::{RegistrationError, SchemaError, StreamError};

pub struct TcpBindingFactory;

impl TcpBindingFactory {
    fn port(binding: &BindingConfig) -> Option<u16> {
        binding
            .options
            .get("port")
            .and_then(serde_json::Value::as_u64)
            .filter(|p| (1..=u16::MAX as u64).contains(p))
            .map(|p| p as u16)
    }

    fn host(binding: &BindingConfig) -> String {
        binding
            .options
            .get("host")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("0.0.0.0")
            .to_string()
    }
}

impl BindingFactory for TcpBindingFactory {
    fn type_name(&self) -> &'static str {
        "tcp"
    }

    fn validate(&self, binding: &BindingConfig) -> Result<(), SchemaError> {
        if binding.kind != crate::model::BindingKind::Server {
            return Err(SchemaError::MalformedOptions {
                binding: binding.qualified_name.clone(),
                detail: "only the server kind is supported".into(),
            });
        }
        if Self::port(binding).is_none() {
            return Err(SchemaError::MalformedOptions {
                binding: binding.qualified_name.clone(),
                detail: "port must be an integer in 1..=65535".into(),
            });
        }
        Ok(())
    }

    fn stream_factory(
        &self,
        _worker: usize,
        binding: &Arc<BindingConfig>,
    ) -> Arc<dyn StreamFactory> {
        Arc::new(OriginOnlyFactory {
            binding: binding.clone(),
        })
    }

    fn attach(&self, ctx: &mut WorkerContext<'_>, binding: &Arc<BindingConfig>) -> crate::Result<()> {
        let port = Self::port(binding).unwrap_or_default();
        let addr = format!("{}:{}", Self::host(binding), port);
        let listener = TcpListener::bind(&addr).map_err(|e| RegistrationError::AttachFailed {
            binding: binding.qualified_name.clone(),
            detail: e.to_string(),
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|e| RegistrationError::AttachFailed {
                binding: binding.qualified_name.clone(),
                detail: e.to_string(),
            })?;

        info!(
            binding = %binding.qualified_name,
            %addr,
            worker = ctx.worker(),
            "tcp listener attached"
        );
        ctx.register_poller(Box::new(TcpListenerPoller {
            binding: binding.clone(),
            port,
            listener: Some(listener),
        }));
        Ok(())
    }
}

/// A server origin never instantiates on the exit side of a route.
struct OriginOnlyFactory {
    binding: Arc<BindingConfig>,
}

impl StreamFactory for OriginOnlyFactory {
    fn create(&self, _begin: &Frame) -> Result<Box<dyn StreamHandler>, StreamError> {
        Err(StreamError::Handler(format!(
            "tcp binding '{}' cannot be a route exit",
            self.binding.qualified_name
        )))
    }
}

struct TcpListenerPoller {
    binding: Arc<BindingConfig>,
    port: u16,
    listener: Option<TcpListener>,
}

impl Poller for TcpListenerPoller {
    fn binding_id(&self) -> u64 {
        self.binding.id
    }

    fn is_listener(&self) -> bool {
        true
    }

    fn poll(&mut self, ctx: &mut WorkerContext<'_>) -> Result<PollOutcome, StreamError> {
        let Some(listener) = &self.listener else {
            return Ok(PollOutcome::Done);
        };
        match listener.accept() {
            Ok((socket, peer)) => {
                if let Err(e) = self.admit(ctx, socket, peer.to_string()) {
                    // Capacity and routing rejections drop the socket; the
                    // peer observes the close. The listener itself stays up.
                    warn!(
                        binding = %self.binding.qualified_name,
                        peer = %peer,
                        error = %e,
                        "connection rejected"
                    );
                }
                Ok(PollOutcome::Busy)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(PollOutcome::Idle),
            Err(e) => Err(e.into()),
        }
    }

    fn shutdown(&mut self) {
        if self.listener.take().is_some() {
            debug!(binding = %self.binding.qualified_name, "tcp listener closed");
        }
    }
}

impl TcpListenerPoller {
    fn admit(
        &self,
        ctx: &mut WorkerContext<'_>,
        socket: TcpStream,
        peer: String,
    ) -> Result<(), StreamError> {
        socket.set_nonblocking(true)?;

        let candidate = json!({ "port": self.port, "peer": peer });
        let exit_id = ctx.resolve_exit(self.binding.id, &candidate, "")?;
        let initial = ctx.supply_initial_id(self.binding.id)?;
        let reply = ctx.supply_reply_id(initial);

        let begin = Frame::begin(initial, exit_id, reply);
        if let Err(e) = ctx.instantiate(exit_id, &begin) {
            ctx.send(Frame::reset(initial));
            return Err(e);
        }

        // Receive budget for the reply direction; the exit debits it before
        // sending anything back.
        let window = self.binding.window();
        let reply_budget = ctx.supply_budget_id();
        ctx.creditor()
            .credit(reply_budget, window)
            .map_err(|e| StreamError::Handler(e.to_string()))?;

        let conn = Rc::new(RefCell::new(TcpConn {
            socket,
            initial,
            reply,
            reply_budget,
            exit_debitor: None,
            pending: BytesMut::new(),
            out: BytesMut::new(),
            socket_eof: false,
            end_sent: false,
            peer_done: false,
            failed: false,
        }));
        ctx.register_receiver(reply, Box::new(TcpConnHandler { conn: conn.clone() }));
        ctx.register_poller(Box::new(TcpConnPoller {
            binding_id: self.binding.id,
            conn,
        }));

        ctx.send(begin);
        ctx.send(Frame::window(initial, reply_budget, window as u32));
        trace!(
            binding = %self.binding.qualified_name,
            peer = %peer,
            stream_id = initial,
            "connection admitted"
        );
        Ok(())
    }
}

struct TcpConn {
    socket: TcpStream,
    initial: u64,
    reply: u64,
    /// Our receive window; re-credited as echoed bytes reach the socket.
    reply_budget: u64,
    /// The exit's receive budget, learned from its first grant.
    exit_debitor: Option<Debitor>,
    /// Bytes read off the socket awaiting credit.
    pending: BytesMut,
    /// Reply-direction bytes awaiting the socket.
    out: BytesMut,
    socket_eof: bool,
    end_sent: bool,
    peer_done: bool,
    failed: bool,
}

/// Receiver for the reply direction of one connection.
struct TcpConnHandler {
    conn: Rc<RefCell<TcpConn>>,
}

impl StreamHandler for TcpConnHandler {
    fn on_frame(
        &mut self,
        ctx: &mut WorkerContext<'_>,
        frame: &Frame,
    ) -> Result<(), StreamError> {
        let mut conn = self.conn.borrow_mut();
        match frame.kind {
            FrameKind::Begin | FrameKind::Flush => {}
            FrameKind::Window => {
                if conn.exit_debitor.is_none() {
                    if let Some(budget) = frame.window_budget_id() {
                        conn.exit_debitor = Some(ctx.supply_debitor(budget));
                    }
                }
            }
            FrameKind::Data => {
                conn.out.extend_from_slice(&frame.payload);
            }
            FrameKind::End => {
                conn.peer_done = true;
            }
            FrameKind::Abort | FrameKind::Reset => {
                conn.failed = true;
            }
        }
        Ok(())
    }
}

/// Moves bytes between the socket and the stream pair.
struct TcpConnPoller {
    binding_id: u64,
    conn: Rc<RefCell<TcpConn>>,
}

impl Poller for TcpConnPoller {
    fn binding_id(&self) -> u64 {
        self.binding_id
    }

    fn poll(&mut self, ctx: &mut WorkerContext<'_>) -> Result<PollOutcome, StreamError> {
        let mut conn = self.conn.borrow_mut();
        let conn = &mut *conn;

        if conn.failed {
            if !conn.end_sent {
                ctx.send(Frame::abort(conn.initial));
                conn.end_sent = true;
            }
            return Ok(self.finish(conn, ctx));
        }
        // Streams torn down out from under us (hard unregister) stop
        // immediately; an orderly retirement keeps the poller alive until
        // buffered reply bytes have reached the socket.
        if ctx.stream_state(conn.initial).is_none() && ctx.stream_state(conn.reply).is_none() {
            if !ctx.is_stream_retired(conn.reply) {
                return Ok(self.finish(conn, ctx));
            }
            conn.socket_eof = true;
            conn.end_sent = true;
            conn.peer_done = true;
        }

        let mut busy = false;

        // Socket -> pending, one slot per pass.
        if !conn.socket_eof && !conn.end_sent && conn.pending.len() < ctx.slot_size() {
            if let Ok(index) = ctx.acquire_slot() {
                let size = ctx.slot_size();
                let slot = ctx.slot_mut(index);
                slot.resize(size, 0);
                match conn.socket.read(&mut slot[..]) {
                    Ok(0) => conn.socket_eof = true,
                    Ok(n) => {
                        let read = &ctx.slot_mut(index)[..n];
                        conn.pending.extend_from_slice(read);
                        busy = true;
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(e) => {
                        debug!(stream_id = conn.initial, error = %e, "socket read failed");
                        conn.failed = true;
                    }
                }
                ctx.release_slot(index);
            }
        }

        // Pending -> Data frames, bounded by the exit's window. A partial
        // grant sends what credit covers and stalls the rest.
        while !conn.pending.is_empty() && !conn.end_sent && !conn.failed {
            let Some(debitor) = conn.exit_debitor.clone() else {
                break;
            };
            let balance = debitor.balance().unwrap_or(0).max(0) as usize;
            let take = conn.pending.len().min(balance).min(ctx.slot_size());
            if take == 0 || !debitor.debit(take as u64) {
                break;
            }
            let chunk = conn.pending.split_to(take).freeze();
            ctx.send(Frame::data(conn.initial, chunk));
            busy = true;
        }

        // Orderly end once the read side is drained.
        if conn.socket_eof && conn.pending.is_empty() && !conn.end_sent && !conn.failed {
            ctx.send(Frame::end(conn.initial));
            conn.end_sent = true;
            busy = true;
        }

        // Reply data -> socket, re-crediting our window per byte written.
        while !conn.out.is_empty() {
            match conn.socket.write(&conn.out) {
                Ok(0) => {
                    conn.failed = true;
                    break;
                }
                Ok(n) => {
                    conn.out.advance(n);
                    let _ = ctx.creditor().credit(conn.reply_budget, n as u64);
                    if !conn.end_sent {
                        ctx.send(Frame::window(conn.initial, conn.reply_budget, n as u32));
                    }
                    busy = true;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!(stream_id = conn.initial, error = %e, "socket write failed");
                    conn.failed = true;
                    break;
                }
            }
        }

        if conn.failed && !conn.end_sent {
            ctx.send(Frame::abort(conn.initial));
            conn.end_sent = true;
        }
        if conn.peer_done && conn.end_sent && conn.out.is_empty() {
            return Ok(self.finish(conn, ctx));
        }
        Ok(if busy {
            PollOutcome::Busy
        } else {
            PollOutcome::Idle
        })
    }

    fn shutdown(&mut self) {
        let conn = self.conn.borrow();
        let _ = conn.socket.shutdown(Shutdown::Both);
    }
}

impl TcpConnPoller {
    fn finish(&self, conn: &mut TcpConn, ctx: &mut WorkerContext<'_>) -> PollOutcome {
        let _ = conn.socket.shutdown(Shutdown::Both);
        ctx.watch_close_budget(conn.reply_budget);
        trace!(stream_id = conn.initial, "connection finished");
        PollOutcome::Done
    }
}
