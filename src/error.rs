//! # Error Types
//!
//! Error handling for the discovery protocol core.
//!
//! This module defines every error variant that can occur while decoding packets,
//! running the session handshake, correlating requests, or wiring the service.
//!
//! ## Error Categories
//! - **Packet Errors**: structurally invalid bytes below the crypto layer, unknown flags
//! - **Cryptographic Errors**: AEAD failures, handshake verification failures
//! - **Message Errors**: garbled plaintext under a correct key, unknown message types
//! - **Task Errors**: unsupported tasks, timeouts, expired sessions
//! - **Service Errors**: configuration, I/O, stopped service
//!
//! Packet and message failures never cross the pipeline boundary: they are recorded
//! on the envelope and dropped by the bad-packet handler. Task failures are
//! delivered to the caller through the task's completion.
//!
//! ## Example Usage
//! ```rust
//! use discovery_protocol::error::{DiscoveryError, Result};
//!
//! fn check_flag(flag: u8) -> Result<u8> {
//!     if flag > 2 {
//!         return Err(DiscoveryError::UnknownPacketType(flag));
//!     }
//!     Ok(flag)
//! }
//!
//! assert!(check_flag(7).unwrap_err().is_decode_failure());
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Packet layout errors
    pub const ERR_PACKET_TOO_SMALL: &str = "Packet shorter than minimum size";
    pub const ERR_PACKET_TOO_LARGE: &str = "Packet exceeds maximum size";
    pub const ERR_INVALID_PROTOCOL_ID: &str = "Invalid protocol id";
    pub const ERR_INVALID_VERSION: &str = "Unsupported protocol version";
    pub const ERR_AUTHDATA_TRUNCATED: &str = "Auth-data shorter than declared size";
    pub const ERR_AUTHDATA_SIZE: &str = "Auth-data size does not match packet kind";
    pub const ERR_CHALLENGE_WITH_MESSAGE: &str = "Challenge packet carries message bytes";

    /// Message layout errors
    pub const ERR_EMPTY_MESSAGE: &str = "Message is missing its type byte";
    pub const ERR_REQUEST_ID_TOO_LONG: &str = "Request id longer than 8 bytes";
    pub const ERR_TRAILING_BYTES: &str = "Trailing bytes after encoded item";

    /// Handshake errors
    pub const ERR_NO_CHALLENGE: &str = "No challenge was issued to this peer";
    pub const ERR_NO_PEER_RECORD: &str = "Peer record is unknown";
    pub const ERR_RECORD_ID_MISMATCH: &str = "Record does not belong to the sender";
    pub const ERR_RECORD_SEQ_REGRESSION: &str = "Record sequence number went backwards";
    pub const ERR_INVALID_ID_SIGNATURE: &str = "Id signature verification failed";
    pub const ERR_INVALID_EPHEMERAL_KEY: &str = "Invalid ephemeral public key";
    pub const ERR_UNMATCHED_CHALLENGE: &str = "Challenge does not match any pending request";

    /// Record errors
    pub const ERR_RECORD_TOO_LARGE: &str = "Record exceeds maximum size";
    pub const ERR_RECORD_SCHEME: &str = "Unsupported identity scheme";

    /// Task errors
    pub const ERR_UNKNOWN_REQUEST: &str = "Response does not match any pending request";
    pub const ERR_NO_SESSION: &str = "Session could not be resolved";
    pub const ERR_NO_ADDRESS: &str = "Node record carries no UDP address";
    pub const ERR_EMPTY_DISTANCES: &str = "Find-node task needs at least one distance";
    pub const ERR_DISTANCE_RANGE: &str = "Distance above 256";

    /// Service errors
    pub const ERR_QUEUE_FULL: &str = "Pipeline queue is full";
    pub const ERR_RANDOM_SOURCE: &str = "System random source failed";
}

/// DiscoveryError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Unknown packet type: {0}")]
    UnknownPacketType(u8),

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Unsupported message type: {0:#04x}")]
    UnsupportedMessageType(u8),

    #[error("Handshake verification failed: {0}")]
    HandshakeVerification(String),

    #[error("Invalid node record: {0}")]
    InvalidRecord(String),

    #[error("Unsupported task: {0}")]
    UnsupportedTask(String),

    #[error("Too many in-flight requests for session")]
    TooManyRequests,

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Session expired")]
    SessionExpired,

    #[error("Request timed out")]
    Timeout,

    #[error("Discovery service stopped")]
    ServiceStopped,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl DiscoveryError {
    /// True for every failure that happens while turning wire bytes into a message.
    ///
    /// AEAD and structural failures are grouped so callers handle a decoy payload
    /// and a genuinely corrupt one the same way.
    pub fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            DiscoveryError::MalformedPacket(_)
                | DiscoveryError::UnknownPacketType(_)
                | DiscoveryError::DecryptionFailure
                | DiscoveryError::MalformedMessage(_)
                | DiscoveryError::UnsupportedMessageType(_)
        )
    }
}

impl From<alloy_rlp::Error> for DiscoveryError {
    fn from(err: alloy_rlp::Error) -> Self {
        DiscoveryError::MalformedMessage(format!("rlp: {err}"))
    }
}

/// Type alias for Results using DiscoveryError
pub type Result<T> = std::result::Result<T, DiscoveryError>;
