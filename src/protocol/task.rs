//! Caller tasks and their correlation with request/response messages.
//!
//! A task becomes a request message with a fresh random request id. The request is
//! kept in its session's in-flight map together with a [`Completion`] until a
//! matching response arrives, the request times out, or the session expires.
//! Whichever happens first resolves the completion; later resolutions are ignored.

use crate::core::message::{Message, MessageType, RequestId, MAX_DISTANCE};
use crate::core::packet::Nonce;
use crate::error::{constants, DiscoveryError, Result};
use crate::node::record::NodeRecord;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Task kinds a caller can request by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    Ping,
    FindNode,
    TalkRequest,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Ping => "ping",
            TaskType::FindNode => "findnode",
            TaskType::TalkRequest => "talkreq",
        }
    }

    /// Message kind that answers this task.
    pub fn response_type(&self) -> MessageType {
        match self {
            TaskType::Ping => MessageType::Pong,
            TaskType::FindNode => MessageType::Nodes,
            TaskType::TalkRequest => MessageType::TalkResponse,
        }
    }
}

impl FromStr for TaskType {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ping" => Ok(TaskType::Ping),
            "findnode" | "find_node" => Ok(TaskType::FindNode),
            "talkreq" | "talk" => Ok(TaskType::TalkRequest),
            _ => Err(DiscoveryError::UnsupportedTask(s.to_string())),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Ping,
    FindNode { distances: Vec<u16> },
    TalkRequest { protocol: Vec<u8>, request: Vec<u8> },
}

impl Task {
    pub fn task_type(&self) -> TaskType {
        match self {
            Task::Ping => TaskType::Ping,
            Task::FindNode { .. } => TaskType::FindNode,
            Task::TalkRequest { .. } => TaskType::TalkRequest,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Task::FindNode { distances } = self {
            if distances.is_empty() {
                return Err(DiscoveryError::UnsupportedTask(
                    constants::ERR_EMPTY_DISTANCES.into(),
                ));
            }
            if distances.iter().any(|d| *d > MAX_DISTANCE) {
                return Err(DiscoveryError::UnsupportedTask(
                    constants::ERR_DISTANCE_RANGE.into(),
                ));
            }
        }
        Ok(())
    }
}

/// Turn a task into its request message under a fresh random request id.
///
/// `enr_seq` is the local record's sequence number, advertised in PING.
pub fn build_request(task: &Task, enr_seq: u64) -> Result<(Message, RequestId)> {
    task.validate()?;
    let request_id = RequestId::random();
    let message = match task {
        Task::Ping => Message::Ping {
            request_id: request_id.clone(),
            enr_seq,
        },
        Task::FindNode { distances } => Message::FindNode {
            request_id: request_id.clone(),
            distances: distances.clone(),
        },
        Task::TalkRequest { protocol, request } => Message::TalkRequest {
            request_id: request_id.clone(),
            protocol: protocol.clone(),
            request: request.clone(),
        },
    };
    Ok((message, request_id))
}

/// Successful task outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskResult {
    Pong { enr_seq: u64, observed: SocketAddr },
    Nodes(Vec<NodeRecord>),
    TalkResponse(Vec<u8>),
}

/// Resolve-once handle to a caller's pending future.
pub struct Completion {
    sender: Mutex<Option<oneshot::Sender<Result<TaskResult>>>>,
}

impl Completion {
    pub fn new() -> (Arc<Self>, TaskFuture) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                sender: Mutex::new(Some(tx)),
            }),
            TaskFuture { receiver: rx },
        )
    }

    /// Deliver the outcome. Returns `false` if the completion was already resolved.
    pub fn resolve(&self, result: Result<TaskResult>) -> bool {
        match self.sender.lock().take() {
            Some(sender) => {
                // the caller may have dropped its future; the outcome is simply discarded
                let _ = sender.send(result);
                true
            }
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Future returned by the task API.
#[derive(Debug)]
pub struct TaskFuture {
    receiver: oneshot::Receiver<Result<TaskResult>>,
}

impl Future for TaskFuture {
    type Output = Result<TaskResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(DiscoveryError::ServiceStopped)))
    }
}

/// A request waiting for its response.
#[derive(Debug)]
pub struct InFlightRequest {
    pub request_id: RequestId,
    pub task: Task,
    /// Kept so the request can be carried by a handshake packet once the peer challenges.
    pub message: Message,
    pub completion: Arc<Completion>,
    /// Nonce of the last packet that carried the request.
    pub nonce: Option<Nonce>,
    nodes: Vec<NodeRecord>,
    responses: u64,
}

impl InFlightRequest {
    pub fn new(
        request_id: RequestId,
        task: Task,
        message: Message,
        completion: Arc<Completion>,
    ) -> Self {
        Self {
            request_id,
            task,
            message,
            completion,
            nonce: None,
            nodes: Vec::new(),
            responses: 0,
        }
    }

    /// Add one NODES message. Returns the collected records once `total` messages
    /// have arrived.
    pub fn accumulate_nodes(&mut self, total: u64, records: Vec<NodeRecord>) -> Option<Vec<NodeRecord>> {
        self.nodes.extend(records);
        self.responses += 1;
        if self.responses >= total.max(1) {
            Some(std::mem::take(&mut self.nodes))
        } else {
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_parsing() {
        assert_eq!("ping".parse::<TaskType>().unwrap(), TaskType::Ping);
        assert_eq!("FINDNODE".parse::<TaskType>().unwrap(), TaskType::FindNode);
        assert_eq!("talkreq".parse::<TaskType>().unwrap(), TaskType::TalkRequest);
        assert!(matches!(
            "register_topic".parse::<TaskType>(),
            Err(DiscoveryError::UnsupportedTask(_))
        ));
    }

    #[test]
    fn test_build_request_uses_fresh_ids() {
        let (first, id1) = build_request(&Task::Ping, 7).unwrap();
        let (_, id2) = build_request(&Task::Ping, 7).unwrap();
        assert_ne!(id1, id2);
        assert_eq!(first.request_id(), &id1);
        assert!(matches!(first, Message::Ping { enr_seq: 7, .. }));
    }

    #[test]
    fn test_find_node_distance_validation() {
        let empty = Task::FindNode { distances: vec![] };
        assert!(matches!(
            build_request(&empty, 1),
            Err(DiscoveryError::UnsupportedTask(_))
        ));
        let too_far = Task::FindNode {
            distances: vec![256, 257],
        };
        assert!(build_request(&too_far, 1).is_err());
        let ok = Task::FindNode {
            distances: vec![0, 256],
        };
        assert!(build_request(&ok, 1).is_ok());
    }

    #[tokio::test]
    async fn test_completion_resolves_once() {
        let (completion, future) = Completion::new();
        assert!(completion.resolve(Err(DiscoveryError::Timeout)));
        assert!(!completion.resolve(Ok(TaskResult::TalkResponse(vec![]))));
        assert!(matches!(future.await, Err(DiscoveryError::Timeout)));
    }

    #[tokio::test]
    async fn test_dropped_completion_reports_stopped() {
        let (completion, future) = Completion::new();
        drop(completion);
        assert!(matches!(future.await, Err(DiscoveryError::ServiceStopped)));
    }

    #[test]
    fn test_nodes_accumulate_until_total() {
        let (completion, _future) = Completion::new();
        let (message, id) = build_request(&Task::FindNode { distances: vec![1] }, 1).unwrap();
        let mut request = InFlightRequest::new(id, Task::FindNode { distances: vec![1] }, message, completion);
        assert!(request.accumulate_nodes(2, vec![]).is_none());
        assert!(request.accumulate_nodes(2, vec![]).is_some());
    }
}
