//! Handlers shared by the inbound and outbound chains.

use crate::error::DiscoveryError;
use crate::pipeline::{Envelope, EnvelopeHandler, PipelineContext};
use std::sync::Arc;
use tracing::{debug, trace};

/// Resolves `session_lookup` to a session handle, creating the session on first use,
/// and refreshes the session's idle deadline.
pub struct NodeIdToSession {
    context: Arc<PipelineContext>,
}

impl NodeIdToSession {
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self { context }
    }
}

impl EnvelopeHandler for NodeIdToSession {
    fn name(&self) -> &'static str {
        "NodeIdToSession"
    }

    fn handle(&self, envelope: &mut Envelope) {
        if envelope.is_bad() || envelope.session.is_some() {
            return;
        }
        let Some(key) = envelope.session_lookup else {
            return;
        };

        let record = envelope
            .node
            .clone()
            .or_else(|| self.context.table.lookup(&key.node_id));
        let (session, created) = self.context.registry.get_or_create(key, record);
        if created {
            self.context.metrics.session_created();
        }
        self.context.touch_session(key);
        envelope.session = Some(session);
    }
}

/// Terminal handler: logs and counts failures, and fails any task still attached.
pub struct BadPacketHandler {
    context: Arc<PipelineContext>,
}

impl BadPacketHandler {
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self { context }
    }
}

impl EnvelopeHandler for BadPacketHandler {
    fn name(&self) -> &'static str {
        "BadPacketHandler"
    }

    fn handle(&self, envelope: &mut Envelope) {
        if let Some(error) = &envelope.bad_packet {
            if error.is_decode_failure() && !matches!(error, DiscoveryError::DecryptionFailure) {
                self.context.metrics.packet_malformed();
            }
            debug!(remote = ?envelope.remote, error = %error, "Dropping bad packet");
        } else if let Some(error) = &envelope.bad_message {
            debug!(remote = ?envelope.remote, error = %error, "Dropping bad message");
        } else {
            trace!("Envelope done");
            return;
        }

        if envelope.completion.is_some() {
            let error = envelope
                .bad_packet
                .take()
                .or_else(|| envelope.bad_message.take())
                .unwrap_or(DiscoveryError::ServiceStopped);
            envelope.fail_task(error);
        }
    }
}
