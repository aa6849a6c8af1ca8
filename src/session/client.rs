//! The session actor.
//!
//! One tokio task owns the [`Session`] and the [`Transport`] and serializes
//! every mutation through a single `select!` loop: user commands, transport
//! events, and its own completions (attachments prepared, busy grace
//! elapsed). Observers get whole-session snapshots over a `watch` channel.

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::encoder::{self, EncodeResult, FileSource};
use crate::protocol::{AuthCredentials, OutboundFilePayload, OutboundFrame};
use crate::transcript::Attachment;
use crate::transport::{ConnectionStatus, Signal, Transport, TransportEvent};

use super::router::{route, Effect, RouterConfig};
use super::Session;

pub const NOT_CONNECTED: &str = "Not connected to the assistant service";

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ClientError {
    #[error("session client is no longer running")]
    Closed,
}

/// User actions accepted by the actor.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Authenticate(AuthCredentials),
    SendQuery { text: String, files: Vec<FileSource> },
    UploadFiles(Vec<FileSource>),
    SetModel(String),
    ClearConversation,
    Shutdown,
}

/// What a prepared batch of attachments was for.
#[derive(Debug)]
enum Pending {
    Query(String),
    Upload,
}

#[derive(Debug)]
enum Internal {
    Prepared {
        request: Pending,
        result: EncodeResult<(Vec<Attachment>, Vec<OutboundFilePayload>)>,
    },
    BusyGraceElapsed,
}

/// Cheap, cloneable front door to a running [`SessionClient`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<Session>,
}

impl SessionHandle {
    async fn command(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).await.map_err(|_| ClientError::Closed)
    }

    pub async fn authenticate(&self, credentials: AuthCredentials) -> Result<(), ClientError> {
        self.command(Command::Authenticate(credentials)).await
    }

    pub async fn send_query(
        &self,
        text: impl Into<String>,
        files: Vec<FileSource>,
    ) -> Result<(), ClientError> {
        self.command(Command::SendQuery {
            text: text.into(),
            files,
        })
        .await
    }

    pub async fn upload_files(&self, files: Vec<FileSource>) -> Result<(), ClientError> {
        self.command(Command::UploadFiles(files)).await
    }

    pub async fn set_model(&self, model: impl Into<String>) -> Result<(), ClientError> {
        self.command(Command::SetModel(model.into())).await
    }

    pub async fn clear_conversation(&self) -> Result<(), ClientError> {
        self.command(Command::ClearConversation).await
    }

    /// Receiver that yields a fresh snapshot after every state change.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.clone()
    }

    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    /// Stop the actor and wait until it has torn the transport down.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.command(Command::Shutdown).await?;
        let mut state = self.state.clone();
        while state.changed().await.is_ok() {}
        Ok(())
    }
}

pub struct SessionClient {
    config: ClientConfig,
    router: RouterConfig,
    session: Session,
    transport: Transport,
    state: watch::Sender<Session>,
    commands: mpsc::Receiver<Command>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
}

impl SessionClient {
    /// Spawn the actor on the current runtime and start connecting.
    pub fn spawn(config: ClientConfig) -> SessionHandle {
        let (commands_tx, commands) = mpsc::channel(64);
        let (events_tx, transport_events) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let session = Session::new(config.chat.default_model.clone());
        let (state, state_rx) = watch::channel(session.clone());

        let client = Self {
            router: RouterConfig {
                tool_result_grace: config.chat.tool_result_grace(),
            },
            transport: Transport::new(&config.websocket, events_tx),
            config,
            session,
            state,
            commands,
            transport_events,
            internal_tx,
            internal_rx,
        };
        tokio::spawn(client.run());

        SessionHandle {
            commands: commands_tx,
            state: state_rx,
        }
    }

    async fn run(mut self) {
        let signal = self.transport.connect();
        self.apply(signal);
        self.publish();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.transport_events.recv() => {
                    let signal = self.transport.handle(event);
                    self.apply(signal);
                }
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal),
            }
            self.publish();
        }

        self.transport.dispose();
        self.session
            .set_connection_status(ConnectionStatus::Disconnected);
        self.publish();
        info!("session client stopped");
    }

    fn publish(&self) {
        let session = &self.session;
        self.state.send_if_modified(|current| {
            if current == session {
                return false;
            }
            *current = session.clone();
            true
        });
    }

    fn apply(&mut self, signal: Option<Signal>) {
        match signal {
            Some(Signal::Status(status)) => self.session.set_connection_status(status),
            Some(Signal::Inbound(frame)) => {
                for effect in route(&mut self.session, frame, &self.router) {
                    self.run_effect(effect);
                }
            }
            None => {}
        }
    }

    fn run_effect(&self, effect: Effect) {
        match effect {
            Effect::ClearBusyAfter(delay) => {
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Internal::BusyGraceElapsed);
                });
            }
        }
    }

    /// Connection, then authentication. Appends one error entry and
    /// returns false on the first failed check.
    fn ready_to_send(&mut self, action: &str) -> bool {
        if !self.transport.is_open() {
            self.session.transcript.push_error(NOT_CONNECTED);
            return false;
        }
        if !self.session.is_authenticated {
            self.session
                .transcript
                .push_error(format!("Please authenticate first before {action}"));
            return false;
        }
        true
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Authenticate(credentials) => {
                if !self.transport.is_open() {
                    self.session.transcript.push_error(NOT_CONNECTED);
                    return;
                }
                self.transport
                    .send(&OutboundFrame::Authenticate { credentials });
            }

            Command::SendQuery { text, files } => {
                let query = text.trim().to_string();
                if query.is_empty() && files.is_empty() {
                    debug!("ignoring empty query");
                    return;
                }
                let max = self.config.chat.max_message_length;
                if query.chars().count() > max {
                    self.session.transcript.push_error(format!(
                        "Message is too long. Maximum length is {max} characters"
                    ));
                    return;
                }
                if !self.ready_to_send("sending messages") {
                    return;
                }

                if files.is_empty() {
                    self.session.transcript.push_user(query.clone(), Vec::new());
                    self.transport.send(&OutboundFrame::Query {
                        query,
                        files: Vec::new(),
                    });
                } else {
                    self.prepare(Pending::Query(query), files);
                }
            }

            Command::UploadFiles(files) => {
                if files.is_empty() {
                    debug!("ignoring empty upload");
                    return;
                }
                if self.ready_to_send("uploading files") {
                    self.prepare(Pending::Upload, files);
                }
            }

            Command::SetModel(model) => {
                let model = model.trim().to_string();
                if model.is_empty() {
                    debug!("ignoring empty model name");
                    return;
                }
                if !self.ready_to_send("switching models") {
                    return;
                }
                if model == self.session.active_model {
                    debug!(%model, "model already active");
                    return;
                }
                self.transport.send(&OutboundFrame::SetModel { model });
            }

            Command::ClearConversation => {
                self.session.transcript.clear();
                self.session.is_busy = false;
                if self.transport.is_open() {
                    self.transport.send(&OutboundFrame::ClearConversation);
                }
            }

            // Handled by the loop.
            Command::Shutdown => {}
        }
    }

    /// Validate and encode off the loop; the result comes back as
    /// [`Internal::Prepared`].
    fn prepare(&self, request: Pending, files: Vec<FileSource>) {
        let limits = self.config.file_upload.clone();
        let tx = self.internal_tx.clone();
        debug!(count = files.len(), "preparing attachments");
        tokio::spawn(async move {
            let result = encoder::prepare(&files, &limits).await;
            let _ = tx.send(Internal::Prepared { request, result });
        });
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::BusyGraceElapsed => self.session.is_busy = false,

            Internal::Prepared { request, result } => {
                let (attachments, payloads) = match result {
                    Ok(prepared) => prepared,
                    Err(e) => {
                        let message = match request {
                            Pending::Query(_) => format!("Error processing files: {e}"),
                            Pending::Upload => format!("Error uploading files: {e}"),
                        };
                        self.session.transcript.push_error(message);
                        return;
                    }
                };

                // The channel may have dropped while files were encoding.
                if !self.session.is_authenticated || !self.transport.is_open() {
                    warn!("connection or authentication lost while encoding, send dropped");
                    return;
                }

                let names = attachments
                    .iter()
                    .map(|a| a.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                match request {
                    Pending::Query(query) => {
                        let echo = format!("{query} [Files: {names}]").trim_start().to_string();
                        self.session.transcript.push_user(echo, attachments);
                        self.transport.send(&OutboundFrame::Query {
                            query,
                            files: payloads,
                        });
                    }
                    Pending::Upload => {
                        let echo = format!("Uploaded {} file(s): {names}", attachments.len());
                        self.session.transcript.push_user(echo, attachments);
                        self.transport
                            .send(&OutboundFrame::UploadFiles { files: payloads });
                    }
                }
            }
        }
    }
}
