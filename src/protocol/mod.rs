//! # Session Protocol
//!
//! Handshake cryptography, the per-peer session state machine, the session registry,
//! task/response correlation and message dispatch.
//!
//! ## Flow
//! ```text
//! A: request, no keys  -> random ordinary packet (nonce N)
//! B: cannot decrypt    -> challenge echoing N
//! A: challenge matches -> handshake packet carrying the request, A established
//! B: handshake valid   -> B established, request dispatched
//! ```

pub mod dispatcher;
pub mod handshake;
pub mod registry;
pub mod session;
pub mod task;

pub use dispatcher::{Dispatch, Dispatcher, EmptyTalkHandler, TalkHandler};
pub use registry::{SessionHandle, SessionRegistry};
pub use session::{Session, SessionKey, SessionState};
pub use task::{Completion, Task, TaskFuture, TaskResult, TaskType};
