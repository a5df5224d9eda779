//! # Discovery Protocol
//!
//! Session core of a discv5-style peer discovery protocol over UDP.
//!
//! ## Layers
//! - **core**: packet codec, message encoding, RLP, datagram framing
//! - **node**: node ids, identity keys, signed records, node table boundary
//! - **protocol**: handshake crypto, session state machine, request correlation
//! - **pipeline**: inbound and outbound envelope handler chains
//! - **service**: wiring plus the task API (`ping`, `find_nodes`, `talk`)
//! - **transport**: UDP socket adapter
//!
//! ## Example
//! ```rust,no_run
//! use discovery_protocol::config::DiscoveryConfig;
//! use discovery_protocol::node::{LocalNode, NodeKey, NodeRecord};
//! use discovery_protocol::service::DiscoveryService;
//! use discovery_protocol::transport::UdpTransport;
//! use std::sync::Arc;
//!
//! # async fn run() -> discovery_protocol::error::Result<()> {
//! let config = DiscoveryConfig::from_env()?;
//! discovery_protocol::utils::logging::init(&config.logging)?;
//!
//! let listen = "127.0.0.1:9000".parse().unwrap();
//! let key = NodeKey::generate()?;
//! let record = NodeRecord::builder().seq(1).udp(listen).sign(&key)?;
//! let service = Arc::new(DiscoveryService::builder(config, LocalNode::new(key, record)?).build()?);
//! service.start();
//!
//! let transport = UdpTransport::bind(listen, Arc::clone(&service)).await?;
//! transport.run().await
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod core;
pub mod error;
pub mod node;
pub mod pipeline;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::DiscoveryConfig;
pub use error::{DiscoveryError, Result};
pub use node::{LocalNode, NodeId, NodeKey, NodeRecord};
pub use protocol::{Task, TaskFuture, TaskResult, TaskType};
pub use service::DiscoveryService;
