//! Gateway runtime assembly: the builder wires workers, the configuration
//! manager and the source watcher together; the engine owns their lifecycle.

mod builder;
mod engine;

pub use builder::*;
pub use engine::*;

#[cfg(test)]
mod engine_test;
