//! Connection lifecycle: transport, heartbeat, reconnect.
//!
//! ```text
//!        ┌──────────────────────────────────────────────┐
//!        ▼                                              │
//!   Connecting ──ok──► Open ──close/error──► Closed ──(delay)
//!        │                                      ▲
//!        └──────────fail/timeout────────────────┘
//! ```
//!
//! One manager task owns one transport and one heartbeat at a time. Frames
//! are handed to the [`FrameHandler`] sequentially; the next frame is not
//! read until the handler returns. On close the heartbeat is stopped, then
//! the handler is told the transport is gone, and only then does the
//! reconnect delay start.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::SyncConfig;
use crate::protocol::{SessionId, WsMessage};

/// Transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Snapshot exposed to callers through `SyncClient::connection_status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// `None` until the server identifies the session, and again as soon as
    /// the transport closes.
    pub session_id: Option<SessionId>,
    /// Consecutive attempts since the last successful open.
    pub reconnect_attempts: u32,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Closed,
            session_id: None,
            reconnect_attempts: 0,
        }
    }
}

/// Receives transport events from the connection task.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    async fn on_open(&self);

    /// Handle one inbound text frame. Returned messages are sent back on the
    /// same transport, in order.
    async fn on_frame(&self, text: &str) -> Vec<WsMessage>;

    /// The transport is gone. Called once per opened transport.
    async fn on_closed(&self);
}

/// Shortest period a heartbeat runs with.
const MIN_HEARTBEAT: Duration = Duration::from_millis(1);

/// Periodic client ping. `stop` may be called any number of times.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Option<Interval>,
}

impl Heartbeat {
    /// First tick fires one full period after start. A zero period is
    /// raised to [`MIN_HEARTBEAT`].
    pub fn start(period: Duration) -> Self {
        let period = period.max(MIN_HEARTBEAT);
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval: Some(interval),
        }
    }

    /// Wait for the next tick. Never completes once stopped.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// Returns `true` only for the call that actually stopped the timer.
    pub fn stop(&mut self) -> bool {
        self.interval.take().is_some()
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Closed,
    Shutdown,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Drives one logical connection until shutdown.
pub struct ConnectionManager {
    config: SyncConfig,
    handler: Arc<dyn FrameHandler>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionManager {
    pub fn new(
        config: SyncConfig,
        handler: Arc<dyn FrameHandler>,
        status: Arc<watch::Sender<ConnectionStatus>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            handler,
            status,
            shutdown,
        }
    }

    /// Connect, serve, and reconnect until shutdown is signalled.
    pub async fn run(mut self) {
        let url = self.config.server_url.clone();
        let mut attempt: u32 = 0;

        while !*self.shutdown.borrow() {
            self.status.send_modify(|s| s.state = ConnectionState::Connecting);
            debug!("Connecting to {url}");

            let connect = timeout(self.config.connect_timeout, tokio_tungstenite::connect_async(url.as_str()));
            let connected = tokio::select! {
                result = connect => result,
                _ = wait_shutdown(&mut self.shutdown) => break,
            };

            match connected {
                Ok(Ok((ws, _response))) => {
                    attempt = 0;
                    self.status.send_modify(|s| {
                        s.state = ConnectionState::Open;
                        s.reconnect_attempts = 0;
                    });
                    info!("Connected to {url}");
                    self.handler.on_open().await;

                    let end = run_session(
                        ws,
                        self.handler.as_ref(),
                        self.config.heartbeat_interval,
                        &mut self.shutdown,
                    )
                    .await;

                    self.status.send_modify(|s| s.state = ConnectionState::Closed);
                    info!("Connection to {url} closed");
                    self.handler.on_closed().await;

                    if end == SessionEnd::Shutdown {
                        break;
                    }
                }
                Ok(Err(e)) => warn!("Connection to {url} failed: {e}"),
                Err(_) => warn!("Connection to {url} timed out"),
            }

            self.status.send_modify(|s| s.state = ConnectionState::Closed);
            attempt = attempt.saturating_add(1);
            self.status.send_modify(|s| s.reconnect_attempts = attempt);
            let delay = self.config.reconnect.delay_for(attempt);
            info!("Reconnecting in {delay:?} (attempt {attempt})");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_shutdown(&mut self.shutdown) => break,
            }
        }

        self.status.send_modify(|s| s.state = ConnectionState::Closed);
        debug!("Connection manager for {url} stopped");
    }
}

async fn run_session(
    ws: WsStream,
    handler: &dyn FrameHandler,
    heartbeat_period: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();
    let mut heartbeat = Heartbeat::start(heartbeat_period);

    let end = loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let replies = handler.on_frame(text.as_str()).await;
                    if send_all(&mut sink, replies).await.is_err() {
                        break SessionEnd::Closed;
                    }
                }
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => {
                        let replies = handler.on_frame(text).await;
                        if send_all(&mut sink, replies).await.is_err() {
                            break SessionEnd::Closed;
                        }
                    }
                    Err(e) => warn!("Dropping non UTF-8 binary frame: {e}"),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!("Server closed the connection: {frame:?}");
                    break SessionEnd::Closed;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Transport error: {e}");
                    break SessionEnd::Closed;
                }
                None => break SessionEnd::Closed,
            },
            _ = heartbeat.tick() => {
                trace!("Heartbeat ping");
                if send_all(&mut sink, vec![WsMessage::Ping]).await.is_err() {
                    break SessionEnd::Closed;
                }
            }
            _ = wait_shutdown(shutdown) => {
                let _ = sink.send(Message::Close(None)).await;
                break SessionEnd::Shutdown;
            }
        }
    };

    heartbeat.stop();
    end
}

/// Encode and send in order. Unencodable messages are dropped; the first
/// sink error ends the transport.
async fn send_all<S>(sink: &mut S, messages: Vec<WsMessage>) -> Result<(), S::Error>
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    for msg in messages {
        let text = match msg.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!("Dropping outbound message: {e}");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::text(text)).await {
            warn!("Send failed: {e}");
            return Err(e);
        }
    }
    Ok(())
}

/// Completes once shutdown is requested or the sender is gone.
async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await.map(|_| ());
}
