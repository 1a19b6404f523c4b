//! Cluster membership snapshot used to route admin traffic.
//!
//! A descriptor is an immutable picture of the fleet. The client never
//! mutates nodes in place; reconfiguration replaces the whole snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::AdminError;

pub type NodeId = u64;

/// One storage node: where to reach it and which partitions it owns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub node_id: NodeId,
    pub host: String,
    /// Data-plane port.
    pub client_port: u16,
    /// Control-plane port; all traffic from this crate goes here.
    pub admin_port: u16,
    /// Partitions this node owns, as fixed numeric shard ids.
    pub partitions: Vec<u32>,
}

/// Ordered set of nodes forming the cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    pub name: String,
    nodes: BTreeMap<NodeId, NodeDescriptor>,
}

impl ClusterDescriptor {
    pub fn new(name: impl Into<String>, nodes: impl IntoIterator<Item = NodeDescriptor>) -> Self {
        Self {
            name: name.into(),
            nodes: nodes
                .into_iter()
                .map(|node| (node.node_id, node))
                .collect(),
        }
    }

    /// Look up a node by id. Asking for an unknown node is a caller error.
    pub fn node(&self, node_id: NodeId) -> Result<&NodeDescriptor, AdminError> {
        self.nodes
            .get(&node_id)
            .ok_or(AdminError::UnknownNode(node_id))
    }

    /// Iterate nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeDescriptor> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Serialize for the `cluster.json` metadata value.
    pub fn to_json(&self) -> Result<String, AdminError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a `cluster.json` metadata value.
    pub fn from_json(text: &str) -> Result<Self, AdminError> {
        Ok(serde_json::from_str(text)?)
    }
}
