//! # Utility Modules
//!
//! Supporting utilities used throughout the protocol implementation.
//!
//! ## Components
//! - **Crypto**: AES-128-CTR header masking and ChaCha20-Poly1305 message sealing
//! - **Expiration**: keyed timers for session and request lifetimes
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//!
//! ## Security
//! - Cryptographically secure RNG (getrandom for long-lived keys)
//! - Memory zeroing for sensitive data (zeroize crate)

pub mod crypto;
pub mod expiration;
pub mod logging;
pub mod metrics;

pub use expiration::ExpirationScheduler;
