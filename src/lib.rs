mod bindings;
mod budget;
mod config;
mod core;
mod engine;
mod errors;
mod factory;
pub mod ident;
mod labels;
mod manager;
pub mod metrics;
mod model;
pub mod utils;

pub use core::*;

pub use bindings::*;
pub use budget::*;
pub use config::*;
pub use engine::*;
pub use errors::*;
pub use factory::*;
pub use labels::*;
pub use manager::*;
pub use model::*;
pub use utils::*;
