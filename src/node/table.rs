//! Node-table boundary and an in-memory implementation.

use crate::node::id::NodeId;
use crate::node::record::NodeRecord;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::trace;

/// Known-peer storage consumed by the session layer.
pub trait NodeTable: Send + Sync {
    fn lookup(&self, node_id: &NodeId) -> Option<NodeRecord>;

    /// Install a record. Returns `false` when an equal or newer record is already held.
    fn insert(&self, record: NodeRecord) -> bool;

    /// Records whose log distance from `home` equals `distance`, at most `limit`.
    fn nodes_at_distance(&self, home: &NodeId, distance: u16, limit: usize) -> Vec<NodeRecord>;
}

/// Thread-safe map of node id to latest record.
#[derive(Debug, Default)]
pub struct MemoryNodeTable {
    nodes: RwLock<HashMap<NodeId, NodeRecord>>,
}

impl MemoryNodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl NodeTable for MemoryNodeTable {
    fn lookup(&self, node_id: &NodeId) -> Option<NodeRecord> {
        self.nodes.read().get(node_id).cloned()
    }

    fn insert(&self, record: NodeRecord) -> bool {
        let node_id = record.node_id();
        let mut nodes = self.nodes.write();
        match nodes.get(&node_id) {
            Some(existing) if existing.seq() >= record.seq() => false,
            _ => {
                trace!(%node_id, seq = record.seq(), "Node record installed");
                nodes.insert(node_id, record);
                true
            }
        }
    }

    fn nodes_at_distance(&self, home: &NodeId, distance: u16, limit: usize) -> Vec<NodeRecord> {
        self.nodes
            .read()
            .iter()
            .filter(|(id, _)| home.log2_distance(id) == distance)
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect()
    }
}
