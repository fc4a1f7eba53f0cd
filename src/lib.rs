//! Consul KV configuration provider.
//!
//! Loads a Consul KV folder whose values are JSON documents, flattens them into
//! `section:key` configuration paths and keeps the result fresh with blocking queries,
//! failing over between Consul agents when one is unavailable.

pub mod client;
pub mod endpoint;
pub mod flatten;
pub mod provider;
pub mod settings;
pub mod snapshot;
pub mod utils;
pub mod watch;

pub use client::{KvClient, KvResponse};
pub use endpoint::{Endpoint, EndpointRotator};
pub use flatten::{flatten, FlatEntry, RawNode};
pub use provider::{ConsulConfigProvider, ConsulConfigSource};
pub use settings::ConsulConfig;
pub use snapshot::{ConfigSnapshot, SnapshotStore};
pub use utils::{ConsulConfigError, Result, KEY_DELIMITER};
pub use watch::DEFAULT_PAUSE_INTERVAL;
