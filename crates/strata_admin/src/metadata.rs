//! Well-known per-node metadata keys and their value codecs.
//!
//! Keys and values travel as UTF-8 byte sequences; the documents behind
//! `cluster.json` and `stores.json` are serde-encoded JSON, and
//! `server.state` is a bare enum token.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AdminError;

/// The three metadata keys every node serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetadataKey {
    /// The cluster descriptor.
    Cluster,
    /// The store-definition list.
    Stores,
    /// The node's operating state.
    ServerState,
}

impl MetadataKey {
    /// Key string as it appears on the wire.
    pub const fn wire_name(self) -> &'static str {
        match self {
            MetadataKey::Cluster => "cluster.json",
            MetadataKey::Stores => "stores.json",
            MetadataKey::ServerState => "server.state",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        match name {
            "cluster.json" => Some(MetadataKey::Cluster),
            "stores.json" => Some(MetadataKey::Stores),
            "server.state" => Some(MetadataKey::ServerState),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Operating state a node advertises under `server.state`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    Normal,
    /// Participating in a partition migration.
    Rebalancing,
    Offline,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            ServerState::Normal => "NORMAL",
            ServerState::Rebalancing => "REBALANCING",
            ServerState::Offline => "OFFLINE",
        };
        f.write_str(token)
    }
}

impl FromStr for ServerState {
    type Err = AdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NORMAL" => Ok(ServerState::Normal),
            "REBALANCING" => Ok(ServerState::Rebalancing),
            "OFFLINE" => Ok(ServerState::Offline),
            other => Err(AdminError::InvalidMetadata {
                message: format!("unrecognized server state {other:?}"),
            }),
        }
    }
}

/// One store as described in the `stores.json` list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDefinition {
    pub name: String,
    pub replication_factor: u32,
    pub required_reads: u32,
    pub required_writes: u32,
}

/// Serialize a store-definition list for the `stores.json` value.
pub fn encode_store_defs(defs: &[StoreDefinition]) -> Result<String, AdminError> {
    Ok(serde_json::to_string(defs)?)
}

/// Parse a `stores.json` value.
pub fn decode_store_defs(text: &str) -> Result<Vec<StoreDefinition>, AdminError> {
    Ok(serde_json::from_str(text)?)
}
