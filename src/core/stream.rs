//! Per-direction stream state machine and the per-worker stream table.
//!
//! `Idle → Open → Streaming → {Closed | Aborted | Reset}`. Terminal ids are
//! retired and never reused; frames arriving for a retired id are protocol
//! violations. Every stream belongs to exactly one binding instance and one
//! dispatch agent.

use std::collections::{HashMap, HashSet};

use super::FrameKind;
use crate::ident;
use crate::StreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    Streaming,
    Closed,
    Aborted,
    Reset,
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Aborted | Self::Reset)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Open => "open",
            Self::Streaming => "streaming",
            Self::Closed => "closed",
            Self::Aborted => "aborted",
            Self::Reset => "reset",
        }
    }

    /// Applies one frame kind, returning the successor state or a protocol
    /// violation. `Window` and `Flush` are credit/barrier traffic: legal in
    /// any non-terminal state (`Flush` only once the direction is open) and
    /// `Window` never changes state.
    pub fn apply(self, stream_id: u64, kind: FrameKind) -> Result<StreamState, StreamError> {
        if self.is_terminal() {
            return Err(StreamError::AfterTerminal(stream_id));
        }
        match (self, kind) {
            (Self::Idle, FrameKind::Begin) => Ok(Self::Open),
            (Self::Open | Self::Streaming, FrameKind::Data | FrameKind::Flush) => {
                Ok(Self::Streaming)
            }
            (_, FrameKind::Window) => Ok(self),
            (_, FrameKind::End) => Ok(Self::Closed),
            (_, FrameKind::Abort) => Ok(Self::Aborted),
            (_, FrameKind::Reset) => Ok(Self::Reset),
            _ => Err(StreamError::InvalidTransition {
                stream_id,
                state: self.name(),
                frame: kind.name(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: u64,
    /// Originating binding; both directions of a pair carry the same one.
    pub binding_id: u64,
    pub state: StreamState,
}

/// Live streams of one dispatch agent. An initial id and its reply are
/// opened and retired together.
///
/// Retirement is tracked by allocation sequence: everything at or below
/// `retired_floor` is retired, and only sequences retired out of order sit
/// in the overflow set until the floor catches up. The bookkeeping stays
/// bounded by the number of concurrently live pairs, not by the number of
/// pairs ever served.
#[derive(Default)]
pub struct StreamTable {
    entries: HashMap<u64, StreamEntry>,
    retired: HashSet<u64>,
    retired_floor: u64,
}

impl StreamTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts both directions of a fresh pair in `Idle`.
    pub fn open_pair(&mut self, initial_id: u64, binding_id: u64) {
        debug_assert!(ident::is_initial(initial_id));
        for id in [initial_id, ident::paired_stream_id(initial_id)] {
            self.entries.insert(
                id,
                StreamEntry {
                    id,
                    binding_id,
                    state: StreamState::Idle,
                },
            );
        }
    }

    pub fn get(&self, stream_id: u64) -> Option<&StreamEntry> {
        self.entries.get(&stream_id)
    }

    pub fn state(&self, stream_id: u64) -> Option<StreamState> {
        self.entries.get(&stream_id).map(|e| e.state)
    }

    pub fn is_retired(&self, stream_id: u64) -> bool {
        let seq = ident::stream_sequence(stream_id);
        seq != 0 && (seq <= self.retired_floor || self.retired.contains(&seq))
    }

    /// Sequences retired out of order, still waiting for the floor.
    #[cfg(test)]
    pub(crate) fn retired_backlog(&self) -> usize {
        self.retired.len()
    }

    /// Live pairs currently owned by the agent.
    pub fn pair_count(&self) -> usize {
        self.entries.len() / 2
    }

    /// Applies a frame to the stream's state machine.
    pub fn apply(&mut self, stream_id: u64, kind: FrameKind) -> Result<StreamState, StreamError> {
        if self.is_retired(stream_id) {
            return Err(StreamError::AfterTerminal(stream_id));
        }
        let entry = self
            .entries
            .get_mut(&stream_id)
            .ok_or(StreamError::UnknownStream(stream_id))?;
        let next = entry.state.apply(stream_id, kind)?;
        entry.state = next;
        Ok(next)
    }

    /// Forces a direction into a terminal state without a frame (hard
    /// teardown). No-op for unknown or already terminal streams.
    pub fn force_terminal(&mut self, stream_id: u64, state: StreamState) {
        debug_assert!(state.is_terminal());
        if let Some(entry) = self.entries.get_mut(&stream_id) {
            if !entry.state.is_terminal() {
                entry.state = state;
            }
        }
    }

    /// Removes both directions once both are terminal, marking the ids
    /// retired. Returns the pair's final states when it retired.
    pub fn retire_pair(&mut self, stream_id: u64) -> Option<(StreamState, StreamState)> {
        let pair_id = ident::paired_stream_id(stream_id);
        let own = self.entries.get(&stream_id)?.state;
        let pair = self.entries.get(&pair_id)?.state;
        if !own.is_terminal() || !pair.is_terminal() {
            return None;
        }
        self.entries.remove(&stream_id);
        self.entries.remove(&pair_id);
        let seq = ident::stream_sequence(stream_id);
        if seq == self.retired_floor + 1 {
            self.retired_floor = seq;
            while self.retired.remove(&(self.retired_floor + 1)) {
                self.retired_floor += 1;
            }
        } else {
            self.retired.insert(seq);
        }
        Some((own, pair))
    }

    /// Ids of all live streams belonging to bindings of the namespace.
    pub fn ids_in_namespace(&self, namespace_label: i32) -> Vec<u64> {
        self.entries
            .values()
            .filter(|e| ident::namespace_id(e.binding_id) == namespace_label as u32)
            .map(|e| e.id)
            .collect()
    }
}
