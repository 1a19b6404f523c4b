//! Control-plane admin client for Strata storage nodes.
//!
//! This crate speaks the framed admin protocol on each node's admin port:
//! bulk streaming of key/value entries in and out of a node, background
//! partition migration with status polling, and version-vector metadata
//! management. Higher layers supply a cluster descriptor (or bootstrap
//! URLs) and drive everything through [`AdminClient`].

pub mod client;
pub mod cluster;
pub mod config;
pub mod error;
pub mod filter;
pub mod framing;
pub mod metadata;
pub mod pool;
pub mod proto;
pub mod stream;
pub mod versioning;

pub use client::{AdminClient, AsyncStatus};
pub use cluster::{ClusterDescriptor, NodeDescriptor, NodeId};
pub use config::AdminClientConfig;
pub use error::AdminError;
pub use filter::{NamedFilter, StreamFilter};
pub use metadata::{MetadataKey, ServerState, StoreDefinition};
pub use pool::{Destination, PoolStats, ProtocolTag, SocketPool};
pub use stream::{EntryStream, KeyStream};
pub use versioning::{CausalOrder, PartitionEntry, VectorClock, Versioned};
