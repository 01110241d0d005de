//! Configuration model: the routing document and the immutable value
//! objects parsed from it, plus route resolution.
//!
//! Parsing produces `NamespaceConfig` graphs with symbolic exit references;
//! references are resolved to identifiers at registration time by the
//! configuration manager, never at parse time.

mod document;
mod namespace;
mod resolve;
pub use document::*;
pub use namespace::*;
pub use resolve::*;

#[cfg(test)]
mod document_test;
