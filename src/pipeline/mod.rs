//! # Envelope Pipelines
//!
//! A pipeline is an ordered handler chain fixed at construction. Envelopes are
//! pushed into a bounded queue and processed by a bounded pool of workers; each
//! envelope runs through the whole chain sequentially while different envelopes
//! run concurrently.
//!
//! ## Inbound chain
//! `IncomingDataPacker -> PacketDemasker -> ChallengeSessionResolver -> SenderResolver
//! -> NodeIdToSession -> ChallengePacketHandler -> HandshakePacketHandler
//! -> OrdinaryPacketHandler -> MessageHandler -> BadPacketHandler`
//!
//! ## Outbound chain
//! `TaskIntake -> NodeIdToSession -> RequestRegistration -> MessageEncoder
//! -> OutgoingParcelHandler -> BadPacketHandler`

pub mod common;
pub mod context;
pub mod envelope;
pub mod inbound;
pub mod outbound;

pub use context::PipelineContext;
pub use envelope::Envelope;

use crate::error::{constants, DiscoveryError, Result};
use crate::utils::metrics::global_metrics;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, trace_span, warn};

/// One stage of a pipeline.
pub trait EnvelopeHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Inspect and update the envelope. Must not block.
    fn handle(&self, envelope: &mut Envelope);
}

/// Producer side of a pipeline's bounded queue.
#[derive(Clone, Debug)]
pub struct EnvelopeQueue {
    name: &'static str,
    sender: mpsc::Sender<Envelope>,
}

impl EnvelopeQueue {
    pub fn channel(name: &'static str, capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { name, sender }, receiver)
    }

    /// Enqueue without waiting. A full queue drops the envelope.
    pub fn push(&self, envelope: Envelope) -> Result<()> {
        self.sender.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(dropped) => {
                global_metrics().envelope_dropped();
                warn!(pipeline = self.name, "Pipeline queue full, dropping envelope");
                if let Some(completion) = dropped.completion {
                    completion.resolve(Err(DiscoveryError::Custom(
                        constants::ERR_QUEUE_FULL.into(),
                    )));
                }
                DiscoveryError::Custom(constants::ERR_QUEUE_FULL.into())
            }
            mpsc::error::TrySendError::Closed(dropped) => {
                if let Some(completion) = dropped.completion {
                    completion.resolve(Err(DiscoveryError::ServiceStopped));
                }
                DiscoveryError::ServiceStopped
            }
        })
    }
}

pub struct Pipeline {
    name: &'static str,
    handlers: Vec<Box<dyn EnvelopeHandler>>,
    queue: EnvelopeQueue,
    receiver: Mutex<Option<mpsc::Receiver<Envelope>>>,
}

impl Pipeline {
    pub fn new(
        name: &'static str,
        handlers: Vec<Box<dyn EnvelopeHandler>>,
        queue: EnvelopeQueue,
        receiver: mpsc::Receiver<Envelope>,
    ) -> Self {
        debug!(
            pipeline = name,
            handlers = ?handlers.iter().map(|h| h.name()).collect::<Vec<_>>(),
            "Pipeline built"
        );
        Self {
            name,
            handlers,
            queue,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn push(&self, envelope: Envelope) -> Result<()> {
        self.queue.push(envelope)
    }

    /// Run the whole chain on the calling task.
    pub fn process(&self, envelope: &mut Envelope) {
        let span = trace_span!("pipeline", name = self.name);
        let _guard = span.enter();
        for handler in &self.handlers {
            trace!(handler = handler.name(), "Handling envelope");
            handler.handle(envelope);
        }
    }

    /// Spawn the worker loop. At most `workers` envelopes are in the chain at once.
    ///
    /// Returns `None` if the pipeline was already started.
    pub fn start(self: &Arc<Self>, workers: usize, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        let mut receiver = self.receiver.lock().take()?;
        let pipeline = Arc::clone(self);
        let permits = Arc::new(Semaphore::new(workers.max(1)));

        Some(tokio::spawn(async move {
            loop {
                let envelope = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    envelope = receiver.recv() => match envelope {
                        Some(envelope) => envelope,
                        None => break,
                    },
                };
                let permit = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    permit = Arc::clone(&permits).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    let mut envelope = envelope;
                    pipeline.process(&mut envelope);
                    drop(permit);
                });
            }
            debug!(pipeline = pipeline.name, "Pipeline stopped");
        }))
    }
}
