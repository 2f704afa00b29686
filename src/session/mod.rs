//! Session management
//!
//! One session per signaling connection. A session owns at most one receive
//! transport and at most one consumer bound to it; both are released when the
//! connection goes away.

mod registry;

pub use registry::{SessionInfo, SessionRegistry, SessionSettings};
