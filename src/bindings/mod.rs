//! In-tree reference bindings: a nonblocking `tcp` server origin and an
//! `echo` duplex exit. They exercise the full capability surface (pollers,
//! stream handlers, budgets, signals, buffer pool) without pulling any
//! application protocol into the core.

mod echo;
mod tcp;
pub use echo::*;
pub use tcp::*;
