//! Namespaced identifier codec.
//!
//! Every namespace, binding, route, guard, vault and catalog is named by a
//! single `u64` composed of a namespace id (high 32 bits) and a local id
//! (low 32 bits). Stream ids use a different partition: the worker index
//! lives in bits 48..56, a per-agent sequence in bits 1..48, and bit 0
//! carries the direction (1 = initial, 0 = reply), so an initial stream and
//! its paired reply differ only in the low bit.

/// Reserved "unset" identifier.
pub const UNSET: u64 = 0;

const LOCAL_MASK: u64 = 0xFFFF_FFFF;

const STREAM_WORKER_SHIFT: u64 = 48;
const STREAM_WORKER_MASK: u64 = 0xFF;
const STREAM_SEQ_MASK: u64 = (1 << 47) - 1;
const STREAM_DIR_INITIAL: u64 = 0x01;

/// Packs a (namespace id, local id) pair into one identifier.
pub fn combine(
    namespace_id: u32,
    local_id: u32,
) -> u64 {
    ((namespace_id as u64) << 32) | (local_id as u64)
}

/// Extracts the namespace id from a combined identifier.
pub fn namespace_id(id: u64) -> u32 {
    (id >> 32) as u32
}

/// Extracts the local id from a combined identifier.
pub fn local_id(id: u64) -> u32 {
    (id & LOCAL_MASK) as u32
}

/// Builds the initial-direction stream id for a worker-local sequence.
pub fn initial_stream_id(
    worker: usize,
    sequence: u64,
) -> u64 {
    ((worker as u64 & STREAM_WORKER_MASK) << STREAM_WORKER_SHIFT)
        | ((sequence & STREAM_SEQ_MASK) << 1)
        | STREAM_DIR_INITIAL
}

/// The paired stream id: reply for an initial id and vice versa.
pub fn paired_stream_id(stream_id: u64) -> u64 {
    stream_id ^ STREAM_DIR_INITIAL
}

/// Whether the id names the initial direction of a stream pair.
pub fn is_initial(stream_id: u64) -> bool {
    stream_id & STREAM_DIR_INITIAL == STREAM_DIR_INITIAL
}

/// The worker index a stream id was allocated on.
pub fn stream_worker(stream_id: u64) -> usize {
    ((stream_id >> STREAM_WORKER_SHIFT) & STREAM_WORKER_MASK) as usize
}

/// The per-worker allocation sequence; both directions of a pair carry the
/// same one.
pub fn stream_sequence(stream_id: u64) -> u64 {
    (stream_id >> 1) & STREAM_SEQ_MASK
}
