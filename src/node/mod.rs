//! # Node Identity
//!
//! Node identifiers, the local identity key, signed node records, and the
//! node-table boundary the session layer reads from and writes to.

pub mod id;
pub mod key;
pub mod local;
pub mod record;
pub mod table;

pub use id::{NodeId, NODE_ID_SIZE};
pub use key::NodeKey;
pub use local::LocalNode;
pub use record::{EncodedRecord, NodeRecord, RecordVerifier, V4Verifier, MAX_RECORD_SIZE};
pub use table::{MemoryNodeTable, NodeTable};
