use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Configuration-source watching. The source is a URL: a bare path or
/// `file://` path polled by mtime+content, or `http(s)://` polled by GET
/// with ETag revalidation.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchConfig {
    /// Routing-document source URL
    #[serde(default = "default_source")]
    pub source: String,

    /// Poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Random jitter added to each poll interval, in milliseconds
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// HTTP request timeout in milliseconds (http sources only)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            poll_interval_ms: default_poll_interval_ms(),
            jitter_ms: default_jitter_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl WatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.source.is_empty() {
            return Err(Error::InvalidConfig("watch source cannot be empty".into()));
        }
        if self.poll_interval_ms < 100 {
            return Err(Error::InvalidConfig(format!(
                "poll_interval_ms {} too aggressive, minimum 100ms",
                self.poll_interval_ms
            )));
        }
        if self.jitter_ms > self.poll_interval_ms {
            return Err(Error::InvalidConfig(
                "jitter_ms cannot exceed poll_interval_ms".into(),
            ));
        }
        Ok(())
    }
}

fn default_source() -> String {
    "config/gateway.json".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_jitter_ms() -> u64 {
    200
}

fn default_request_timeout_ms() -> u64 {
    5000
}
