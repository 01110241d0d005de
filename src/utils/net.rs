use std::net::{SocketAddr, ToSocketAddrs};

use crate::StreamError;

/// Pluggable host-name resolution, overridable per engine (e.g. for tests
/// that pin names to loopback addresses).
#[cfg_attr(test, mockall::automock)]
pub trait HostResolver: Send + Sync {
    fn resolve_host(&self, name: &str) -> Result<Vec<SocketAddr>, StreamError>;
}

/// Default resolver backed by the system's `ToSocketAddrs`.
pub struct SystemHostResolver;

impl HostResolver for SystemHostResolver {
    fn resolve_host(&self, name: &str) -> Result<Vec<SocketAddr>, StreamError> {
        let target = if name.contains(':') {
            name.to_string()
        } else {
            format!("{}:0", name)
        };
        let addrs = target
            .to_socket_addrs()
            .map_err(|e| StreamError::Io(format!("resolve {}: {}", name, e)))?;
        Ok(addrs.collect())
    }
}
