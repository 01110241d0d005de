//! The control plane: routing-document parsing and registration, and the
//! watcher feeding it.

mod config_manager;
mod watcher;
pub use config_manager::*;
pub use watcher::*;

#[cfg(test)]
mod config_manager_test;
#[cfg(test)]
mod watcher_test;
