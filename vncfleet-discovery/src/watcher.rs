//! Supervised endpoint watch loop
//!
//! The watch primitive in [`EndpointsClient`] returns when its stream ends;
//! this wrapper owns the reconnect-with-backoff policy and hands each event
//! to a registered callback. One watcher per process.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vncfleet_core::config::DiscoveryConfig;

use crate::endpoints::{EndpointsClient, WatchEvent};

/// Callback invoked for every watch event. Kept synchronous; consumers spawn
/// their own tasks for anything slow (e.g. a registry refresh).
pub type WatchCallback = Arc<dyn Fn(WatchEvent) + Send + Sync>;

/// Restartable watch task with capped exponential reconnect backoff
pub struct EndpointWatcher {
    client: Arc<EndpointsClient>,
    initial_backoff: Duration,
    max_backoff: Duration,
    cancel_token: CancellationToken,
}

impl EndpointWatcher {
    #[must_use]
    pub fn new(client: Arc<EndpointsClient>, cfg: &DiscoveryConfig) -> Self {
        Self {
            client,
            initial_backoff: Duration::from_millis(cfg.watch_backoff_initial_ms),
            max_backoff: Duration::from_secs(cfg.watch_backoff_max_secs),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Start the supervised watch loop.
    ///
    /// Returns the `JoinHandle` so the caller can detect task completion.
    /// Use `shutdown()` to stop the loop.
    pub fn start(&self, callback: WatchCallback) -> tokio::task::JoinHandle<()> {
        let client = self.client.clone();
        let cancel_token = self.cancel_token.clone();
        let initial_backoff = self.initial_backoff;
        let max_backoff = self.max_backoff;

        tokio::spawn(async move {
            let mut backoff = initial_backoff;

            loop {
                if cancel_token.is_cancelled() {
                    tracing::info!("Endpoint watcher shutting down");
                    return;
                }

                let (tx, mut rx) = mpsc::channel::<WatchEvent>(32);
                let watch_client = client.clone();
                let mut watch =
                    tokio::spawn(async move { watch_client.watch(tx).await });

                let mut saw_event = false;
                loop {
                    tokio::select! {
                        () = cancel_token.cancelled() => {
                            watch.abort();
                            tracing::info!("Endpoint watcher shutting down");
                            return;
                        }
                        event = rx.recv() => match event {
                            Some(event) => {
                                saw_event = true;
                                tracing::debug!(
                                    event_type = %event.event_type,
                                    "Endpoint watch event"
                                );
                                callback(event);
                            }
                            None => break, // watch stream ended
                        },
                        result = &mut watch => {
                            match result {
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => {
                                    tracing::warn!(error = %e, "Endpoint watch failed");
                                }
                                Err(e) => {
                                    tracing::error!(error = %e, "Endpoint watch task panicked");
                                }
                            }
                            // Drain any events already queued before the
                            // stream terminated.
                            while let Ok(event) = rx.try_recv() {
                                saw_event = true;
                                callback(event);
                            }
                            break;
                        }
                    }
                }

                // A stream that delivered events earned a fresh backoff.
                if saw_event {
                    backoff = initial_backoff;
                }
                tracing::debug!(backoff = ?backoff, "Endpoint watch reconnecting");
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        tracing::info!("Endpoint watcher shutting down");
                        return;
                    }
                    () = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(max_backoff);
            }
        })
    }

    /// Gracefully stop the watch loop.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}
