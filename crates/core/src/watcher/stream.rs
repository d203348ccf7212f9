//! Persistent push connection feeding the waiter registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use crate::config::WatcherConfig;
use crate::metrics;

use super::{EventStreamSession, ReconnectBackoff, SessionState, WaiterRegistry};

/// Listens for job events and settles waiters as they arrive.
pub struct CompletionWatcher {
    url: String,
    token: String,
    config: WatcherConfig,
    registry: Arc<WaiterRegistry>,
}

/// Handle to a running watcher task.
pub struct WatcherHandle {
    shutdown_tx: watch::Sender<bool>,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Whether an authenticated connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Shared flag mirroring [`WatcherHandle::is_connected`].
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    /// Stop the watcher and wait for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Completion watcher task ended abnormally");
        }
    }
}

impl CompletionWatcher {
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        config: WatcherConfig,
        registry: Arc<WaiterRegistry>,
    ) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            config,
            registry,
        }
    }

    pub fn spawn(self) -> WatcherHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(self.run(shutdown_rx, Arc::clone(&connected)));
        WatcherHandle {
            shutdown_tx,
            connected,
            task,
        }
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>, connected: Arc<AtomicBool>) {
        let mut backoff =
            ReconnectBackoff::new(self.config.reconnect_base_ms, self.config.reconnect_max_ms);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match connect_async(self.url.as_str()).await {
                Ok((ws_stream, _)) => {
                    let (mut write, mut read) = ws_stream.split();

                    if let Err(e) = write.send(Message::text(self.token.clone())).await {
                        warn!(error = %e, "Failed to send event stream token");
                    } else {
                        debug!(url = %self.url, "Event stream token sent");

                        // Until a frame arrives the token is unproven, so a drop
                        // here counts as a failed attempt.
                        let mut session = EventStreamSession::new();
                        loop {
                            let frame = tokio::select! {
                                msg = read.next() => msg,
                                _ = shutdown_rx.changed() => {
                                    let _ = write.close().await;
                                    connected.store(false, Ordering::Relaxed);
                                    info!("Completion watcher stopped");
                                    return;
                                }
                            };

                            match frame {
                                Some(Ok(Message::Text(text))) => {
                                    if let Some(event) = session.on_text(text.as_str()) {
                                        self.registry.handle_event(&event);
                                    }
                                }
                                Some(Ok(Message::Close(frame))) => {
                                    debug!(?frame, "Event stream closed by server");
                                    break;
                                }
                                Some(Ok(_)) => session.on_other(),
                                Some(Err(e)) => {
                                    warn!(error = %e, "Event stream read error");
                                    break;
                                }
                                None => {
                                    debug!("Event stream ended");
                                    break;
                                }
                            }

                            if session.state() == SessionState::Authenticated
                                && !connected.swap(true, Ordering::Relaxed)
                            {
                                info!(url = %self.url, "Event stream connected");
                                backoff.reset();
                            }
                        }
                    }
                    connected.store(false, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(url = %self.url, error = %e, "Event stream connection failed");
                }
            }

            let delay = backoff.next_delay();
            metrics::WATCHER_RECONNECTS.inc();
            debug!(delay_ms = delay.as_millis() as u64, "Reconnecting event stream");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => break,
            }
        }

        connected.store(false, Ordering::Relaxed);
        info!("Completion watcher stopped");
    }
}
