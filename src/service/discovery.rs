use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, Result};
use crate::node::id::NodeId;
use crate::node::local::LocalNode;
use crate::node::record::{NodeRecord, RecordVerifier, V4Verifier};
use crate::node::table::{MemoryNodeTable, NodeTable};
use crate::pipeline::common::{BadPacketHandler, NodeIdToSession};
use crate::pipeline::context::ContextParts;
use crate::pipeline::inbound::{
    ChallengePacketHandler, ChallengeSessionResolver, HandshakePacketHandler, IncomingDataPacker,
    MessageHandler, OrdinaryPacketHandler, PacketDemasker, SenderResolver,
};
use crate::pipeline::outbound::{
    MessageEncoder, OutgoingParcelHandler, RequestRegistration, TaskIntake,
};
use crate::pipeline::{Envelope, EnvelopeHandler, EnvelopeQueue, Pipeline, PipelineContext};
use crate::protocol::dispatcher::{Dispatcher, EmptyTalkHandler, TalkHandler};
use crate::protocol::task::{Completion, Task, TaskFuture};
use crate::transport::OutboundPacket;
use crate::utils::metrics::MetricsSnapshot;
use bytes::Bytes;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

pub struct DiscoveryServiceBuilder {
    config: DiscoveryConfig,
    local: LocalNode,
    table: Option<Arc<dyn NodeTable>>,
    verifier: Option<Arc<dyn RecordVerifier>>,
    talk: Option<Arc<dyn TalkHandler>>,
}

impl DiscoveryServiceBuilder {
    /// Use an existing node table instead of a fresh in-memory one
    pub fn with_table(mut self, table: Arc<dyn NodeTable>) -> Self {
        self.table = Some(table);
        self
    }

    /// Replace the default "v4" record verifier
    pub fn with_verifier(mut self, verifier: Arc<dyn RecordVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Answer TALKREQ through `talk` instead of empty responses
    pub fn with_talk_handler(mut self, talk: Arc<dyn TalkHandler>) -> Self {
        self.talk = Some(talk);
        self
    }

    /// Build the service. Must be called inside a tokio runtime.
    pub fn build(self) -> Result<DiscoveryService> {
        self.config.validate_strict()?;

        let local = Arc::new(self.local);
        let table = self
            .table
            .unwrap_or_else(|| Arc::new(MemoryNodeTable::new()));
        let verifier = self.verifier.unwrap_or_else(|| Arc::new(V4Verifier));
        let talk = self.talk.unwrap_or_else(|| Arc::new(EmptyTalkHandler));
        let transport = &self.config.transport;

        let (inbound_queue, inbound_rx) = EnvelopeQueue::channel("inbound", transport.queue_capacity);
        let (outbound_queue, outbound_rx) =
            EnvelopeQueue::channel("outbound", transport.queue_capacity);
        let (datagrams, outgoing) = mpsc::channel(transport.outbound_capacity);

        let shutdown = CancellationToken::new();
        let dispatcher = Dispatcher::new(
            Arc::clone(&local),
            Arc::clone(&table),
            Arc::clone(&verifier),
            talk,
            self.config.session.max_nodes_per_message,
        );
        let context = PipelineContext::new(
            ContextParts {
                local: Arc::clone(&local),
                config: self.config.session.clone(),
                table,
                verifier,
                dispatcher,
                outbound: outbound_queue.clone(),
                transport: datagrams,
            },
            shutdown.clone(),
        );

        let inbound = Pipeline::new(
            "inbound",
            inbound_handlers(&context),
            inbound_queue,
            inbound_rx,
        );
        let outbound = Pipeline::new(
            "outbound",
            outbound_handlers(&context),
            outbound_queue,
            outbound_rx,
        );

        info!(node_id = %local.id(), seq = local.seq(), "Discovery service built");
        Ok(DiscoveryService {
            config: self.config,
            local,
            context,
            inbound: Arc::new(inbound),
            outbound: Arc::new(outbound),
            outgoing: Mutex::new(Some(outgoing)),
            workers: Mutex::new(Vec::new()),
            shutdown,
        })
    }
}

fn inbound_handlers(context: &Arc<PipelineContext>) -> Vec<Box<dyn EnvelopeHandler>> {
    vec![
        Box::new(IncomingDataPacker::new(Arc::clone(context))),
        Box::new(PacketDemasker::new(Arc::clone(context))),
        Box::new(ChallengeSessionResolver::new(Arc::clone(context))),
        Box::new(SenderResolver),
        Box::new(NodeIdToSession::new(Arc::clone(context))),
        Box::new(ChallengePacketHandler::new(Arc::clone(context))),
        Box::new(HandshakePacketHandler::new(Arc::clone(context))),
        Box::new(OrdinaryPacketHandler::new(Arc::clone(context))),
        Box::new(MessageHandler::new(Arc::clone(context))),
        Box::new(BadPacketHandler::new(Arc::clone(context))),
    ]
}

fn outbound_handlers(context: &Arc<PipelineContext>) -> Vec<Box<dyn EnvelopeHandler>> {
    vec![
        Box::new(TaskIntake),
        Box::new(NodeIdToSession::new(Arc::clone(context))),
        Box::new(RequestRegistration::new(Arc::clone(context))),
        Box::new(MessageEncoder::new(Arc::clone(context))),
        Box::new(OutgoingParcelHandler::new(Arc::clone(context))),
        Box::new(BadPacketHandler::new(Arc::clone(context))),
    ]
}

/// The session core of one discovery node.
///
/// ## Example
/// ```rust,no_run
/// use discovery_protocol::config::DiscoveryConfig;
/// use discovery_protocol::node::{LocalNode, NodeKey, NodeRecord};
/// use discovery_protocol::service::DiscoveryService;
///
/// # async fn run(peer: NodeRecord) -> discovery_protocol::error::Result<()> {
/// let key = NodeKey::generate()?;
/// let record = NodeRecord::builder()
///     .seq(1)
///     .udp("127.0.0.1:9000".parse().unwrap())
///     .sign(&key)?;
/// let service = DiscoveryService::builder(DiscoveryConfig::default(), LocalNode::new(key, record)?)
///     .build()?;
/// service.start();
///
/// let pong = service.ping(peer).await?;
/// println!("{pong:?}");
/// # Ok(())
/// # }
/// ```
pub struct DiscoveryService {
    config: DiscoveryConfig,
    local: Arc<LocalNode>,
    context: Arc<PipelineContext>,
    inbound: Arc<Pipeline>,
    outbound: Arc<Pipeline>,
    outgoing: Mutex<Option<mpsc::Receiver<OutboundPacket>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl DiscoveryService {
    pub fn builder(config: DiscoveryConfig, local: LocalNode) -> DiscoveryServiceBuilder {
        DiscoveryServiceBuilder {
            config,
            local,
            table: None,
            verifier: None,
            talk: None,
        }
    }

    /// Start both pipelines. Calling it again has no effect.
    pub fn start(&self) {
        let workers = self.config.transport.workers;
        let mut handles = self.workers.lock();
        handles.extend(self.inbound.start(workers, self.shutdown.child_token()));
        handles.extend(self.outbound.start(workers, self.shutdown.child_token()));
        debug!(workers, "Discovery service started");
    }

    /// Stop the pipelines and timers and fail every pending request with
    /// [`DiscoveryError::ServiceStopped`].
    pub fn stop(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.context.stop_timers();

        let registry = &self.context.registry;
        let mut failed = 0usize;
        for key in registry.keys() {
            if let Some(session) = registry.remove(&key) {
                for request in session.lock().drain_requests() {
                    if request.completion.resolve(Err(DiscoveryError::ServiceStopped)) {
                        failed += 1;
                    }
                }
            }
        }
        for handle in self.workers.lock().drain(..) {
            handle.abort();
        }
        info!(failed_requests = failed, "Discovery service stopped");
        self.context.metrics.log_metrics();
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Token cancelled when the service stops.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Feed one received datagram into the inbound pipeline.
    pub fn handle_incoming(&self, bytes: Bytes, remote: SocketAddr) -> Result<()> {
        if !self.is_running() {
            return Err(DiscoveryError::ServiceStopped);
        }
        self.inbound.push(Envelope::incoming(bytes, remote))
    }

    /// Datagrams to put on the wire. Can be taken once.
    pub fn take_outgoing(&self) -> Option<mpsc::Receiver<OutboundPacket>> {
        self.outgoing.lock().take()
    }

    /// Send PING and resolve with the peer's PONG.
    pub fn ping(&self, node: NodeRecord) -> TaskFuture {
        self.execute(Task::Ping, node)
    }

    /// Send FINDNODE and resolve with every record of the NODES responses.
    pub fn find_nodes(&self, node: NodeRecord, distances: Vec<u16>) -> TaskFuture {
        self.execute(Task::FindNode { distances }, node)
    }

    /// Send TALKREQ and resolve with the TALKRESP payload.
    pub fn talk(&self, node: NodeRecord, protocol: Vec<u8>, request: Vec<u8>) -> TaskFuture {
        self.execute(Task::TalkRequest { protocol, request }, node)
    }

    /// Submit a task. The future resolves exactly once: with the response, a timeout,
    /// session expiry, or a submission failure.
    #[instrument(level = "debug", skip(self, node))]
    pub fn execute(&self, task: Task, node: NodeRecord) -> TaskFuture {
        let (completion, future) = Completion::new();
        if !self.is_running() {
            completion.resolve(Err(DiscoveryError::ServiceStopped));
            return future;
        }
        // a failed push resolves the completion itself
        let _ = self.outbound.push(Envelope::task(task, node, completion));
        future
    }

    pub fn local_id(&self) -> &NodeId {
        self.local.id()
    }

    pub fn local_record(&self) -> &NodeRecord {
        self.local.record()
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn table(&self) -> &Arc<dyn NodeTable> {
        &self.context.table
    }

    /// Number of live sessions
    pub fn sessions(&self) -> usize {
        self.context.registry.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.context.metrics.snapshot()
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        self.stop();
    }
}
