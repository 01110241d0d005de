use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Sizing for the per-worker shared write buffer and the slot pool bindings
/// borrow for socket reads.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BufferConfig {
    /// Capacity of the per-worker shared write buffer in bytes
    #[serde(default = "default_write_buffer_capacity")]
    pub write_buffer_capacity: usize,

    /// Size of one buffer-pool slot in bytes
    #[serde(default = "default_slot_size")]
    pub slot_size: usize,

    /// Number of slots in the per-worker buffer pool
    #[serde(default = "default_slot_count")]
    pub slot_count: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            write_buffer_capacity: default_write_buffer_capacity(),
            slot_size: default_slot_size(),
            slot_count: default_slot_count(),
        }
    }
}

impl BufferConfig {
    pub fn validate(&self) -> Result<()> {
        if self.slot_size < 64 {
            return Err(Error::InvalidConfig(format!(
                "slot_size {} too small, minimum 64 bytes",
                self.slot_size
            )));
        }
        if self.slot_count == 0 {
            return Err(Error::InvalidConfig("slot_count must be >= 1".into()));
        }
        if self.write_buffer_capacity < self.slot_size {
            return Err(Error::InvalidConfig(
                "write_buffer_capacity must be >= slot_size".into(),
            ));
        }
        Ok(())
    }
}

fn default_write_buffer_capacity() -> usize {
    1024 * 1024
}

fn default_slot_size() -> usize {
    16 * 1024
}

fn default_slot_count() -> usize {
    256
}
