//! chatwire — reconnecting real-time session client for a remote
//! assistant service.
//!
//! Keeps one WebSocket channel alive, routes inbound frames into a
//! transcript, pairs tool calls with their results, and encodes file
//! attachments for upload.

pub mod config;
pub mod encoder;
pub mod protocol;
pub mod session;
pub mod tools;
pub mod transcript;
pub mod transport;
