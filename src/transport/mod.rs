//! Transport — the single WebSocket channel to the assistant service.
//!
//! `Transport` is owned by the session loop and never touches the socket
//! directly. Each connection attempt runs in its own task and reports
//! back through [`TransportEvent`]s tagged with a generation number;
//! events from superseded attempts are ignored. Reconnection is an
//! explicit state machine with one owned timer:
//!
//! ```text
//! Idle ─connect─▶ Connecting ─open─▶ Connected ─close─▶ Scheduled ─timer─▶ Connecting
//!                     └──────────close────────────────────▲
//! ```
//!
//! `dispose` moves to `Disposed` from any state; nothing leaves it.

use std::fmt;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::config::WebSocketConfig;
use crate::protocol::{InboundFrame, OutboundFrame};

/// Observable connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    #[default]
    Disconnected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Disconnected => "Disconnected - Reconnecting...",
            ConnectionStatus::Error => "Connection Error",
        };
        f.write_str(label)
    }
}

/// Raw notifications from connection tasks and the reconnect timer.
#[derive(Debug)]
pub enum TransportEvent {
    Opened {
        generation: u64,
        sender: mpsc::UnboundedSender<Message>,
    },
    Frame {
        generation: u64,
        text: String,
    },
    Error {
        generation: u64,
        reason: String,
    },
    /// Always follows `Error`, and ends every attempt.
    Closed {
        generation: u64,
    },
    ReconnectDue {
        token: u64,
    },
}

/// What the session needs to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Status(ConnectionStatus),
    Inbound(InboundFrame),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Idle,
    Connecting,
    Connected,
    Scheduled { token: u64 },
    Disposed,
}

/// Owner of the channel handle and the reconnect timer.
pub struct Transport {
    url: String,
    reconnect_delay: Duration,
    max_reconnect_attempts: Option<u32>,
    state: LinkState,
    status: ConnectionStatus,
    generation: u64,
    timer_token: u64,
    /// Reconnect attempts since the last successful open.
    attempts: u32,
    sender: Option<mpsc::UnboundedSender<Message>>,
    timer: Option<JoinHandle<()>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Transport {
    pub fn new(config: &WebSocketConfig, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            url: config.url.clone(),
            reconnect_delay: config.reconnect_delay(),
            max_reconnect_attempts: config.max_reconnect_attempts,
            state: LinkState::Idle,
            status: ConnectionStatus::Disconnected,
            generation: 0,
            timer_token: 0,
            attempts: 0,
            sender: None,
            timer: None,
            events,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Whether a channel is open and `send` would transmit.
    pub fn is_open(&self) -> bool {
        self.state == LinkState::Connected && self.sender.as_ref().is_some_and(|s| !s.is_closed())
    }

    pub fn has_pending_reconnect(&self) -> bool {
        matches!(self.state, LinkState::Scheduled { .. })
    }

    /// Start a connection attempt. No-op while connecting, connected,
    /// or after `dispose`. Supersedes a pending reconnect timer.
    pub fn connect(&mut self) -> Option<Signal> {
        match self.state {
            LinkState::Connecting | LinkState::Connected | LinkState::Disposed => return None,
            LinkState::Idle | LinkState::Scheduled { .. } => {}
        }
        self.cancel_timer();

        self.generation += 1;
        self.state = LinkState::Connecting;
        info!(url = %self.url, generation = self.generation, "connecting");
        tokio::spawn(run_channel(
            self.url.clone(),
            self.generation,
            self.events.clone(),
        ));
        self.set_status(ConnectionStatus::Connecting)
    }

    /// Apply one transport event.
    pub fn handle(&mut self, event: TransportEvent) -> Option<Signal> {
        match event {
            TransportEvent::Opened { generation, sender } => {
                if generation != self.generation || self.state != LinkState::Connecting {
                    debug!(generation, "dropping superseded channel");
                    return None;
                }
                info!("connected");
                self.sender = Some(sender);
                self.state = LinkState::Connected;
                self.attempts = 0;
                self.set_status(ConnectionStatus::Connected)
            }
            TransportEvent::Frame { generation, text } => {
                if generation != self.generation || self.state != LinkState::Connected {
                    return None;
                }
                match InboundFrame::decode(&text) {
                    Ok(frame) => {
                        debug!(kind = frame.kind(), "frame received");
                        Some(Signal::Inbound(frame))
                    }
                    Err(e) => {
                        warn!("dropping malformed frame: {e}");
                        None
                    }
                }
            }
            TransportEvent::Error { generation, reason } => {
                if generation != self.generation || self.state == LinkState::Disposed {
                    return None;
                }
                error!("channel error: {reason}");
                self.set_status(ConnectionStatus::Error)
            }
            TransportEvent::Closed { generation } => {
                if generation != self.generation {
                    return None;
                }
                match self.state {
                    LinkState::Connecting | LinkState::Connected => {}
                    _ => return None,
                }
                info!("disconnected");
                self.sender = None;
                self.schedule_reconnect();
                self.set_status(ConnectionStatus::Disconnected)
            }
            TransportEvent::ReconnectDue { token } => {
                if self.state != (LinkState::Scheduled { token }) {
                    debug!(token, "stale reconnect timer");
                    return None;
                }
                self.timer = None;
                self.connect()
            }
        }
    }

    /// Queue a frame on the open channel. Returns false (and logs) when
    /// no channel is open; nothing is queued for later.
    pub fn send(&self, frame: &OutboundFrame) -> bool {
        let Some(sender) = self.sender.as_ref().filter(|_| self.state == LinkState::Connected) else {
            error!(kind = frame.kind(), "channel not connected, frame not sent");
            return false;
        };
        let text = match frame.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!(kind = frame.kind(), "failed to encode frame: {e}");
                return false;
            }
        };
        if sender.send(Message::Text(text)).is_err() {
            warn!(kind = frame.kind(), "channel closed before send");
            return false;
        }
        debug!(kind = frame.kind(), "frame sent");
        true
    }

    /// Cancel any pending reconnect and close the channel. Idempotent.
    pub fn dispose(&mut self) {
        if self.state == LinkState::Disposed {
            return;
        }
        self.cancel_timer();
        // Dropping the sender makes the connection task close the socket.
        self.sender = None;
        self.state = LinkState::Disposed;
        self.status = ConnectionStatus::Disconnected;
        info!("transport disposed");
    }

    fn schedule_reconnect(&mut self) {
        self.cancel_timer();
        self.attempts += 1;
        if let Some(max) = self.max_reconnect_attempts {
            if self.attempts > max {
                warn!(
                    attempt = self.attempts,
                    max, "reconnect attempts past advisory limit, still retrying"
                );
            }
        }

        self.timer_token += 1;
        let token = self.timer_token;
        let delay = self.reconnect_delay;
        let events = self.events.clone();
        debug!(attempt = self.attempts, ?delay, "reconnect scheduled");
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(TransportEvent::ReconnectDue { token });
        }));
        self.state = LinkState::Scheduled { token };
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) -> Option<Signal> {
        self.status = status;
        Some(Signal::Status(status))
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

/// One connection attempt: open, pump frames both ways, report close.
async fn run_channel(url: String, generation: u64, events: mpsc::UnboundedSender<TransportEvent>) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            let _ = events.send(TransportEvent::Error {
                generation,
                reason: format!("connect failed: {e}"),
            });
            let _ = events.send(TransportEvent::Closed { generation });
            return;
        }
    };

    let (mut sink, mut source) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    if events.send(TransportEvent::Opened { generation, sender: tx }).is_err() {
        return;
    }

    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(msg) => {
                    if let Err(e) = sink.send(msg).await {
                        let _ = events.send(TransportEvent::Error {
                            generation,
                            reason: format!("send failed: {e}"),
                        });
                        break;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(TransportEvent::Frame { generation, text });
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        let _ = events.send(TransportEvent::Frame { generation, text });
                    }
                    Err(_) => warn!("dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(TransportEvent::Error {
                        generation,
                        reason: e.to_string(),
                    });
                    break;
                }
            },
        }
    }

    let _ = events.send(TransportEvent::Closed { generation });
}
