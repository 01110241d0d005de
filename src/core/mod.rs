//! The internal stream transport and its dispatch machinery: frame codec,
//! stream state machine, per-worker dispatch agents and the capability
//! surface they expose to bindings.

mod agent;
mod buffers;
mod command;
mod context;
mod frame;
mod idle;
mod signaler;
mod stream;
pub use agent::*;
pub use buffers::*;
pub use command::*;
pub use context::*;
pub use frame::*;
pub use idle::*;
pub use signaler::*;
pub use stream::*;

#[cfg(test)]
mod agent_test;
#[cfg(test)]
mod frame_test;
#[cfg(test)]
mod idle_test;
#[cfg(test)]
mod signaler_test;
