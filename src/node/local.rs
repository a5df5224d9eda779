use crate::error::{DiscoveryError, Result};
use crate::node::id::NodeId;
use crate::node::key::NodeKey;
use crate::node::record::NodeRecord;

/// Identity of the node this process runs: static key plus its signed record.
#[derive(Debug)]
pub struct LocalNode {
    key: NodeKey,
    record: NodeRecord,
    id: NodeId,
}

impl LocalNode {
    /// Pair a key with the record it signed. The record must derive the key's node id.
    pub fn new(key: NodeKey, record: NodeRecord) -> Result<Self> {
        let id = key.node_id();
        if record.node_id() != id {
            return Err(DiscoveryError::ConfigError(
                "local record does not belong to the local key".into(),
            ));
        }
        Ok(Self { key, record, id })
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    pub fn record(&self) -> &NodeRecord {
        &self.record
    }

    pub fn seq(&self) -> u64 {
        self.record.seq()
    }
}
