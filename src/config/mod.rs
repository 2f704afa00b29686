//! Configuration: serde schema plus a file-backed, lock-free store

mod schema;
mod store;

pub use schema::{
    AppConfig, MediaConfig, SessionConfig, SourceConfig, TransportReplacePolicy, WebConfig,
};
pub use store::ConfigStore;
