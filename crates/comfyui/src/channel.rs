//! Persistent WebSocket event channel to the local engine.
//!
//! [`EventChannel::start`] spawns a background task that keeps a socket
//! open to the engine, parses every frame, filters it against the
//! handle in [`HandleSlot`], and forwards the survivors into an
//! in-process queue read through [`EventFeed`]. Lost connections are
//! re-established with exponential backoff until shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fognode_core::types::ExecutionHandle;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::events::{map_message, ResultEvent};
use crate::messages::{parse_message, EngineMessage};
use crate::reconnect::{next_delay, ReconnectConfig};

/// How long shutdown waits for the receive task to exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Shared slot holding the handle of the workflow currently in flight.
///
/// The orchestrator fills it right after submission and clears it when
/// the cycle ends. The receive loop reads it to decide which incoming
/// events to forward; an empty slot drops everything.
#[derive(Clone, Default)]
pub struct HandleSlot {
    inner: Arc<Mutex<Option<ExecutionHandle>>>,
}

impl HandleSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a freshly submitted workflow.
    pub async fn set(&self, handle: ExecutionHandle) {
        *self.inner.lock().await = Some(handle);
    }

    /// Stop tracking; subsequent engine events are dropped.
    pub async fn clear(&self) {
        *self.inner.lock().await = None;
    }

    /// The handle currently being tracked, if any.
    pub async fn get(&self) -> Option<ExecutionHandle> {
        self.inner.lock().await.clone()
    }
}

/// Control half of the event channel.
///
/// Owns the background receive task. Dropping it without calling
/// [`shutdown`](Self::shutdown) leaves the task running until its
/// cancellation token fires.
pub struct EventChannel {
    connected: Arc<AtomicBool>,
    reset: Arc<Notify>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

/// Consumer half of the event channel: the filtered event queue.
pub struct EventFeed {
    rx: mpsc::UnboundedReceiver<ResultEvent>,
    connected: Arc<AtomicBool>,
}

impl EventChannel {
    /// Spawn the receive task and hand back the control and consumer
    /// halves.
    ///
    /// * `ws_url`    - WebSocket base URL, e.g. `ws://127.0.0.1:8188`.
    /// * `client_id` - handshake id; must match the one workflows are
    ///                 submitted with, or the engine routes execution
    ///                 events to someone else's socket.
    pub fn start(
        ws_url: String,
        client_id: String,
        slot: HandleSlot,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
    ) -> (EventChannel, EventFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let reset = Arc::new(Notify::new());

        let ctx = ReceiveContext {
            ws_url,
            client_id,
            slot,
            tx,
            connected: Arc::clone(&connected),
            reset: Arc::clone(&reset),
            reconnect,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(run_receive_loop(ctx));

        let channel = EventChannel {
            connected: Arc::clone(&connected),
            reset,
            cancel,
            task,
        };
        let feed = EventFeed { rx, connected };
        (channel, feed)
    }

    /// Whether a socket to the engine is currently open.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Drop the current socket; the receive loop builds a fresh one.
    pub fn reset(&self) {
        self.reset.notify_one();
    }

    /// Cancel the receive task and wait (bounded) for it to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.task)
            .await
            .is_err()
        {
            tracing::warn!("Event channel receive task did not exit in time");
        }
    }
}

impl EventFeed {
    /// Wait up to `wait` for the next event. `None` on timeout or when
    /// the sending side has gone away; a closed feed reads unhealthy
    /// from then on.
    pub async fn next_timeout(&mut self, wait: Duration) -> Option<ResultEvent> {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(event)) => Some(event),
            Ok(None) => {
                // Every sender is gone; no event will ever arrive.
                self.connected.store(false, Ordering::Relaxed);
                None
            }
            Err(_) => None,
        }
    }

    /// Non-blocking read of the connection health flag.
    pub fn healthy(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Throw away everything queued. Returns the number of events
    /// dropped.
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Feed detached from any socket, driven by the returned writer.
    /// Lets consumers be exercised without a live engine.
    pub fn detached() -> (FeedWriter, EventFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));
        let writer = FeedWriter {
            tx,
            connected: Arc::clone(&connected),
        };
        (writer, EventFeed { rx, connected })
    }
}

/// Driver for a detached [`EventFeed`].
pub struct FeedWriter {
    tx: mpsc::UnboundedSender<ResultEvent>,
    connected: Arc<AtomicBool>,
}

impl FeedWriter {
    /// Queue an event for the feed.
    pub fn push(&self, event: ResultEvent) {
        let _ = self.tx.send(event);
    }

    /// Flip the health flag the feed reports.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }
}

// ---- receive task ----

/// Everything the receive task needs, bundled to keep the spawn tidy.
struct ReceiveContext {
    ws_url: String,
    client_id: String,
    slot: HandleSlot,
    tx: mpsc::UnboundedSender<ResultEvent>,
    connected: Arc<AtomicBool>,
    reset: Arc<Notify>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
}

/// Core loop: connect, read frames until the socket drops, back off,
/// repeat. Exits only on cancellation.
async fn run_receive_loop(ctx: ReceiveContext) {
    let mut delay = ctx.reconnect.initial_delay;

    loop {
        let url = format!("{}/ws?clientId={}", ctx.ws_url, ctx.client_id);
        let attempt = tokio::select! {
            _ = ctx.cancel.cancelled() => return,
            result = connect_async(&url) => result,
        };

        match attempt {
            Ok((ws_stream, _response)) => {
                tracing::info!(
                    url = %ctx.ws_url,
                    client_id = %ctx.client_id,
                    "Connected to engine event socket",
                );
                ctx.connected.store(true, Ordering::Relaxed);
                delay = ctx.reconnect.initial_delay;

                read_frames(ws_stream, &ctx).await;

                ctx.connected.store(false, Ordering::Relaxed);
                if ctx.cancel.is_cancelled() {
                    return;
                }
                tracing::info!("Engine event socket lost, reconnecting");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Engine event socket connect failed");
            }
        }

        // Pace the next attempt, bailing out early on cancellation.
        tokio::select! {
            _ = ctx.cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = next_delay(delay, &ctx.reconnect);
    }
}

/// Read frames until the socket closes, a receive error occurs, a
/// reset is requested, or the task is cancelled.
async fn read_frames(mut ws_stream: WsStream, ctx: &ReceiveContext) {
    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                let _ = ws_stream.close(None).await;
                return;
            }
            _ = ctx.reset.notified() => {
                tracing::info!("Event channel reset requested, dropping socket");
                let _ = ws_stream.close(None).await;
                return;
            }
            frame = ws_stream.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_text_frame(&text, ctx).await,
                Some(Ok(Message::Binary(_))) => {
                    // Preview image frames; nothing to collect from them.
                    tracing::trace!("Ignoring binary frame");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // Handled automatically by tungstenite.
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "Engine closed the event socket");
                    return;
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Event socket receive error");
                    return;
                }
                None => return,
            },
        }
    }
}

/// Parse one text frame and forward it if it concerns the tracked
/// workflow.
async fn handle_text_frame(text: &str, ctx: &ReceiveContext) {
    let msg = match parse_message(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!(error = %e, raw_message = %text, "Failed to parse engine message");
            return;
        }
    };

    match &msg {
        EngineMessage::Status(data) => {
            tracing::debug!(
                queue_remaining = data.status.exec_info.queue_remaining,
                "Engine queue status",
            );
            return;
        }
        EngineMessage::Progress(data) => {
            tracing::debug!(value = data.value, max = data.max, "Workflow progress");
            return;
        }
        EngineMessage::Unhandled { kind } => {
            tracing::trace!(kind = %kind, "Engine message kind without task semantics");
            return;
        }
        EngineMessage::ExecutionError(data) => {
            tracing::error!(
                prompt_id = %data.prompt_id,
                node_id = %data.node_id,
                error_type = %data.exception_type,
                error_message = %data.exception_message,
                "Engine reported execution error",
            );
        }
        _ => {}
    }

    let Some(handle) = ctx.slot.get().await else {
        tracing::trace!("No workflow tracked, dropping engine event");
        return;
    };

    if let Some(event) = map_message(&msg, handle.as_str()) {
        if ctx.tx.send(event).is_err() {
            tracing::debug!("Event feed dropped, discarding event");
        }
    }
}
