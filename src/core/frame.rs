//! Internal frame protocol.
//!
//! Frames are in-memory values on the per-worker queues; they never cross a
//! process boundary, so there is no serialized form. `Begin` carries
//! `binding_id | reply_to` and `Window` carries `budget_id | credit`, both
//! packed little-endian into the payload so exit-side handlers can read
//! them without knowing the originating binding. Frames on one stream are
//! applied in send order.

use bytes::{Buf, BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Opens a stream direction
    Begin,
    /// Application bytes, bounded by budget
    Data,
    /// Delivery barrier with no payload
    Flush,
    /// Orderly terminal
    End,
    /// Sender-initiated terminal
    Abort,
    /// Receiver-initiated rejection
    Reset,
    /// Credit grant notification
    Window,
}

impl FrameKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::Data => "data",
            Self::Flush => "flush",
            Self::End => "end",
            Self::Abort => "abort",
            Self::Reset => "reset",
            Self::Window => "window",
        }
    }

    /// Whether this frame drives its stream into a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End | Self::Abort | Self::Reset)
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub stream_id: u64,
    pub kind: FrameKind,
    pub payload: Bytes,
}

impl Frame {
    fn new(stream_id: u64, kind: FrameKind, payload: Bytes) -> Self {
        Self {
            stream_id,
            kind,
            payload,
        }
    }

    pub fn begin(stream_id: u64, binding_id: u64, reply_to: u64) -> Self {
        let mut payload = BytesMut::with_capacity(16);
        payload.put_u64_le(binding_id);
        payload.put_u64_le(reply_to);
        Self::new(stream_id, FrameKind::Begin, payload.freeze())
    }

    pub fn data(stream_id: u64, payload: Bytes) -> Self {
        Self::new(stream_id, FrameKind::Data, payload)
    }

    pub fn flush(stream_id: u64) -> Self {
        Self::new(stream_id, FrameKind::Flush, Bytes::new())
    }

    pub fn end(stream_id: u64) -> Self {
        Self::new(stream_id, FrameKind::End, Bytes::new())
    }

    pub fn abort(stream_id: u64) -> Self {
        Self::new(stream_id, FrameKind::Abort, Bytes::new())
    }

    pub fn reset(stream_id: u64) -> Self {
        Self::new(stream_id, FrameKind::Reset, Bytes::new())
    }

    pub fn window(stream_id: u64, budget_id: u64, credit: u32) -> Self {
        let mut payload = BytesMut::with_capacity(12);
        payload.put_u64_le(budget_id);
        payload.put_u32_le(credit);
        Self::new(stream_id, FrameKind::Window, payload.freeze())
    }

    /// Binding the receiver should instantiate for; `Begin` frames only.
    pub fn begin_binding_id(&self) -> Option<u64> {
        if self.kind != FrameKind::Begin || self.payload.len() < 16 {
            return None;
        }
        Some((&self.payload[0..8]).get_u64_le())
    }

    /// Paired reply-direction stream id; `Begin` frames only.
    pub fn begin_reply_to(&self) -> Option<u64> {
        if self.kind != FrameKind::Begin || self.payload.len() < 16 {
            return None;
        }
        Some((&self.payload[8..16]).get_u64_le())
    }

    /// Budget the grant applies to; `Window` frames only.
    pub fn window_budget_id(&self) -> Option<u64> {
        if self.kind != FrameKind::Window || self.payload.len() < 12 {
            return None;
        }
        Some((&self.payload[0..8]).get_u64_le())
    }

    /// Credit amount carried by the grant; `Window` frames only.
    pub fn window_credit(&self) -> Option<u32> {
        if self.kind != FrameKind::Window || self.payload.len() < 12 {
            return None;
        }
        Some((&self.payload[8..12]).get_u32_le())
    }
}
