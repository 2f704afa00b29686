//! stream-relay - WebRTC signaling server for a single video source
//!
//! Browsers connect over a WebSocket, negotiate capabilities, get a receive
//! transport and a consumer of the shared source, then resume it to start
//! media. The server keeps one session per connection in a
//! [`session::SessionRegistry`]; [`client`] holds the receiving side of the
//! same protocol.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod session;
pub mod signaling;
pub mod state;
pub mod web;

pub use error::{AppError, Result};
