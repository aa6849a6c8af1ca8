//! Session — the client-side aggregate for one logical conversation.
//!
//! `Session` is plain data. It changes only through [`router::route`]
//! (inbound frames) and the [`client::SessionClient`] loop (user actions,
//! connection status), both of which run on one task.

pub mod client;
pub mod router;

use serde::Serialize;

use crate::tools::{correlate, Correlation};
use crate::transcript::Transcript;
use crate::transport::ConnectionStatus;

pub use client::{ClientError, Command, SessionClient, SessionHandle};
pub use router::{route, Effect, RouterConfig};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub connection_status: ConnectionStatus,
    pub is_authenticated: bool,
    pub active_model: String,
    pub transcript: Transcript,
    /// The service is working on a reply.
    pub is_busy: bool,
}

impl Session {
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            connection_status: ConnectionStatus::Disconnected,
            is_authenticated: false,
            active_model: default_model.into(),
            transcript: Transcript::new(),
            is_busy: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_status == ConnectionStatus::Connected
    }

    /// Tool call/result pairs derived from the current transcript.
    pub fn tool_executions(&self) -> Correlation<'_> {
        correlate(self.transcript.events())
    }

    /// Apply a connection status change. Any status other than
    /// `Connected` clears the busy flag.
    pub fn set_connection_status(&mut self, status: ConnectionStatus) {
        self.connection_status = status;
        if status != ConnectionStatus::Connected {
            self.is_busy = false;
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new("claude")
    }
}
