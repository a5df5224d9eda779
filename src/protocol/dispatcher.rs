use crate::core::message::Message;
use crate::error::{constants, DiscoveryError, Result};
use crate::node::id::NodeId;
use crate::node::local::LocalNode;
use crate::node::record::{EncodedRecord, NodeRecord, RecordVerifier};
use crate::node::table::NodeTable;
use crate::protocol::session::Session;
use crate::protocol::task::{InFlightRequest, Task, TaskResult};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Upper bound on records returned for one FINDNODE, across all NODES messages.
pub const MAX_FINDNODE_RESULTS: usize = 16;

/// Application hook answering TALKREQ.
pub trait TalkHandler: Send + Sync {
    fn on_talk_request(&self, from: &NodeId, protocol: &[u8], request: &[u8]) -> Vec<u8>;
}

/// Answers every TALKREQ with an empty response, meaning "protocol not supported".
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyTalkHandler;

impl TalkHandler for EmptyTalkHandler {
    fn on_talk_request(&self, _from: &NodeId, _protocol: &[u8], _request: &[u8]) -> Vec<u8> {
        Vec::new()
    }
}

/// What the caller has to do after a message was dispatched.
#[derive(Debug)]
pub enum Dispatch {
    /// Send these messages back to the peer.
    Reply(Vec<Message>),
    /// The request is finished; resolve its completion with the result.
    Completed(InFlightRequest, TaskResult),
    /// Part of a multi-message response arrived; the request stays open.
    Pending,
}

/// Routes decoded messages: requests are answered, responses are matched against the
/// session's in-flight requests.
pub struct Dispatcher {
    local: Arc<LocalNode>,
    table: Arc<dyn NodeTable>,
    verifier: Arc<dyn RecordVerifier>,
    talk: Arc<dyn TalkHandler>,
    max_nodes_per_message: usize,
}

impl Dispatcher {
    pub fn new(
        local: Arc<LocalNode>,
        table: Arc<dyn NodeTable>,
        verifier: Arc<dyn RecordVerifier>,
        talk: Arc<dyn TalkHandler>,
        max_nodes_per_message: usize,
    ) -> Self {
        Self {
            local,
            table,
            verifier,
            talk,
            max_nodes_per_message: max_nodes_per_message.max(1),
        }
    }

    pub fn dispatch(
        &self,
        message: Message,
        session: &mut Session,
        remote: SocketAddr,
    ) -> Result<Dispatch> {
        trace!(
            opcode = message.message_type().as_str(),
            request_id = %message.request_id(),
            "Dispatching message"
        );
        match message {
            Message::Ping { request_id, .. } => Ok(Dispatch::Reply(vec![Message::Pong {
                request_id,
                enr_seq: self.local.seq(),
                recipient_ip: remote.ip(),
                recipient_port: remote.port(),
            }])),
            Message::FindNode {
                request_id,
                distances,
            } => {
                let records: Vec<EncodedRecord> = self
                    .collect_nodes(&distances)
                    .iter()
                    .map(EncodedRecord::from)
                    .collect();
                let mut chunks: Vec<Vec<EncodedRecord>> = records
                    .chunks(self.max_nodes_per_message)
                    .map(<[EncodedRecord]>::to_vec)
                    .collect();
                if chunks.is_empty() {
                    chunks.push(Vec::new());
                }
                let total = chunks.len() as u64;
                Ok(Dispatch::Reply(
                    chunks
                        .into_iter()
                        .map(|records| Message::Nodes {
                            request_id: request_id.clone(),
                            total,
                            records,
                        })
                        .collect(),
                ))
            }
            Message::TalkRequest {
                request_id,
                protocol,
                request,
            } => {
                let response = self
                    .talk
                    .on_talk_request(session.node_id(), &protocol, &request);
                Ok(Dispatch::Reply(vec![Message::TalkResponse {
                    request_id,
                    response,
                }]))
            }
            response => self.correlate(response, session),
        }
    }

    fn correlate(&self, response: Message, session: &mut Session) -> Result<Dispatch> {
        let request_id = response.request_id().clone();
        let responder = *session.node_id();
        let request = session.request_mut(&request_id).ok_or_else(|| {
            DiscoveryError::UnexpectedMessage(constants::ERR_UNKNOWN_REQUEST.into())
        })?;

        let expected = request.task.task_type().response_type();
        if expected != response.message_type() {
            return Err(DiscoveryError::UnexpectedMessage(format!(
                "{} answered with {}",
                request.task.task_type(),
                response.message_type().as_str()
            )));
        }

        let result = match response {
            Message::Pong {
                enr_seq,
                recipient_ip,
                recipient_port,
                ..
            } => TaskResult::Pong {
                enr_seq,
                observed: SocketAddr::new(recipient_ip, recipient_port),
            },
            Message::Nodes { total, records, .. } => {
                let distances = match &request.task {
                    Task::FindNode { distances } => distances.clone(),
                    _ => Vec::new(),
                };
                let verified = self.accept_records(records, &responder, &distances);
                match request.accumulate_nodes(total, verified) {
                    Some(all) => TaskResult::Nodes(all),
                    None => return Ok(Dispatch::Pending),
                }
            }
            Message::TalkResponse { response, .. } => TaskResult::TalkResponse(response),
            other => {
                return Err(DiscoveryError::UnexpectedMessage(
                    other.message_type().as_str().into(),
                ))
            }
        };

        match session.take_request(&request_id) {
            Some(request) => Ok(Dispatch::Completed(request, result)),
            None => Err(DiscoveryError::UnexpectedMessage(
                constants::ERR_UNKNOWN_REQUEST.into(),
            )),
        }
    }

    /// Records for the requested distances; distance 0 is our own record.
    fn collect_nodes(&self, distances: &[u16]) -> Vec<NodeRecord> {
        let mut records = Vec::new();
        let mut seen = Vec::with_capacity(distances.len());
        for &distance in distances {
            if seen.contains(&distance) {
                continue;
            }
            seen.push(distance);

            let room = MAX_FINDNODE_RESULTS - records.len();
            if distance == 0 {
                records.push(self.local.record().clone());
            } else {
                records.extend(self.table.nodes_at_distance(self.local.id(), distance, room));
            }
            if records.len() >= MAX_FINDNODE_RESULTS {
                records.truncate(MAX_FINDNODE_RESULTS);
                break;
            }
        }
        records
    }

    /// Verify records from a NODES response and install them in the node table.
    ///
    /// Records that fail verification or lie outside the requested distances from the
    /// responder are dropped.
    fn accept_records(
        &self,
        records: Vec<EncodedRecord>,
        responder: &NodeId,
        distances: &[u16],
    ) -> Vec<NodeRecord> {
        records
            .into_iter()
            .filter_map(|record| match self.verifier.verify_and_parse(record.as_bytes()) {
                Ok(verified) => {
                    let id = verified.node_id();
                    let distance = responder.log2_distance(&id);
                    if !distances.contains(&distance) {
                        debug!(%id, distance, "Record outside requested distances");
                        return None;
                    }
                    self.table.insert(verified.clone());
                    Some(verified)
                }
                Err(e) => {
                    warn!(error = %e, "Rejected record in NODES response");
                    None
                }
            })
            .collect()
    }
}
