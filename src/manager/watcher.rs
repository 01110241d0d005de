//! Configuration-source watcher: polls a file path or an HTTP URL on a
//! jittered interval and emits the text whenever its content changes. The
//! HTTP path is ETag-aware, turning unchanged polls into 304 round-trips.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::time::Duration;

use rand::Rng;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WatchConfig;
use crate::{Result, WatchError};

/// A changed configuration text, ready for the manager's apply pipeline.
#[derive(Debug)]
pub struct ReloadEvent {
    pub source: String,
    pub text: String,
}

fn source_error(source: &str, detail: impl ToString) -> WatchError {
    WatchError::Source {
        url: source.to_string(),
        detail: detail.to_string(),
    }
}

fn is_http(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// One-shot fetch of the configured source; used for the initial load.
pub async fn fetch_source(source: &str) -> Result<String> {
    if is_http(source) {
        let response = reqwest::get(source)
            .await
            .map_err(|e| source_error(source, e))?;
        if !response.status().is_success() {
            return Err(source_error(source, format!("status {}", response.status())).into());
        }
        Ok(response.text().await.map_err(|e| source_error(source, e))?)
    } else if let Some(path) = source.strip_prefix("file://") {
        Ok(tokio::fs::read_to_string(path)
            .await
            .map_err(|e| source_error(source, e))?)
    } else if source.contains("://") {
        Err(WatchError::UnsupportedScheme(source.to_string()).into())
    } else {
        Ok(tokio::fs::read_to_string(source)
            .await
            .map_err(|e| source_error(source, e))?)
    }
}

/// Conditional HTTP fetch; `Ok(None)` means not modified.
async fn fetch_conditional(
    client: &reqwest::Client,
    source: &str,
    etag: Option<&str>,
) -> Result<Option<(String, Option<String>)>> {
    let mut request = client.get(source);
    if let Some(tag) = etag {
        request = request.header(IF_NONE_MATCH, tag);
    }
    let response = request.send().await.map_err(|e| source_error(source, e))?;
    if response.status() == StatusCode::NOT_MODIFIED {
        return Ok(None);
    }
    if !response.status().is_success() {
        return Err(source_error(source, format!("status {}", response.status())).into());
    }
    let tag = response
        .headers()
        .get(ETAG)
        .and_then(|value| value.to_str().ok())
        .map(String::from);
    let text = response.text().await.map_err(|e| source_error(source, e))?;
    Ok(Some((text, tag)))
}

pub(crate) fn digest(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write(text.as_bytes());
    hasher.finish()
}

pub struct ConfigWatcher {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ConfigWatcher {
    /// Spawns the polling task. `initial_text` seeds change detection so
    /// the already-applied text does not immediately re-fire.
    pub fn spawn(
        settings: WatchConfig,
        initial_text: Option<&str>,
        tx: mpsc::Sender<ReloadEvent>,
    ) -> Self {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let mut last_digest = initial_text.map(digest);

        let handle = tokio::spawn(async move {
            let source = settings.source.clone();
            let client = reqwest::Client::builder()
                .timeout(Duration::from_millis(settings.request_timeout_ms))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new());
            let mut etag: Option<String> = None;
            info!(source = %source, interval_ms = settings.poll_interval_ms, "watcher started");

            loop {
                let jitter = if settings.jitter_ms > 0 {
                    rand::thread_rng().gen_range(0..settings.jitter_ms)
                } else {
                    0
                };
                let delay = Duration::from_millis(settings.poll_interval_ms + jitter);
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }

                let fetched = if is_http(&source) {
                    match fetch_conditional(&client, &source, etag.as_deref()).await {
                        Ok(Some((text, tag))) => {
                            etag = tag;
                            Some(text)
                        }
                        Ok(None) => None,
                        Err(e) => {
                            warn!(source = %source, error = %e, "watch poll failed");
                            None
                        }
                    }
                } else {
                    match fetch_source(&source).await {
                        Ok(text) => Some(text),
                        Err(e) => {
                            // Transient source failures keep the current
                            // configuration; retry on the next tick.
                            warn!(source = %source, error = %e, "watch poll failed");
                            None
                        }
                    }
                };

                let Some(text) = fetched else { continue };
                let current = digest(&text);
                if last_digest == Some(current) {
                    continue;
                }
                last_digest = Some(current);
                debug!(source = %source, "configuration change detected");
                let event = ReloadEvent {
                    source: source.clone(),
                    text,
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            info!(source = %source, "watcher stopped");
        });

        Self { token, handle }
    }

    pub async fn close(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }
}
