use crate::config::SessionConfig;
use crate::core::message::RequestId;
use crate::core::packet::Nonce;
use crate::error::DiscoveryError;
use crate::node::local::LocalNode;
use crate::node::record::RecordVerifier;
use crate::node::table::NodeTable;
use crate::pipeline::EnvelopeQueue;
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::registry::SessionRegistry;
use crate::protocol::session::SessionKey;
use crate::transport::OutboundPacket;
use crate::utils::expiration::ExpirationScheduler;
use crate::utils::metrics::{global_metrics, Metrics};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Everything needed to build a [`PipelineContext`] besides its timers.
pub(crate) struct ContextParts {
    pub local: Arc<LocalNode>,
    pub config: SessionConfig,
    pub table: Arc<dyn NodeTable>,
    pub verifier: Arc<dyn RecordVerifier>,
    pub dispatcher: Dispatcher,
    pub outbound: EnvelopeQueue,
    pub transport: mpsc::Sender<OutboundPacket>,
}

/// State shared by every handler of both pipelines.
pub struct PipelineContext {
    pub local: Arc<LocalNode>,
    pub config: SessionConfig,
    pub registry: SessionRegistry,
    pub table: Arc<dyn NodeTable>,
    pub verifier: Arc<dyn RecordVerifier>,
    pub dispatcher: Dispatcher,
    pub session_timers: ExpirationScheduler<SessionKey>,
    pub request_timers: ExpirationScheduler<(SessionKey, RequestId)>,
    /// Replies and protocol packets produced while handling inbound traffic
    pub outbound: EnvelopeQueue,
    pub transport: mpsc::Sender<OutboundPacket>,
    pub metrics: &'static Metrics,
}

impl PipelineContext {
    /// Must be called inside a tokio runtime: the timers spawn their drivers.
    pub(crate) fn new(parts: ContextParts, shutdown: CancellationToken) -> Arc<Self> {
        let max_requests = parts.config.max_requests_per_session;
        Arc::new(Self {
            local: parts.local,
            config: parts.config,
            registry: SessionRegistry::new(max_requests),
            table: parts.table,
            verifier: parts.verifier,
            dispatcher: parts.dispatcher,
            session_timers: ExpirationScheduler::new("session-expiry", shutdown.child_token()),
            request_timers: ExpirationScheduler::new("request-timeout", shutdown.child_token()),
            outbound: parts.outbound,
            transport: parts.transport,
            metrics: global_metrics(),
        })
    }

    pub fn stop_timers(&self) {
        self.session_timers.stop();
        self.request_timers.stop();
    }

    /// Push the session's idle deadline out by the session timeout.
    ///
    /// On expiry the session is removed and its pending requests fail with
    /// [`DiscoveryError::SessionExpired`].
    pub fn touch_session(self: &Arc<Self>, key: SessionKey) {
        let context = Arc::downgrade(self);
        self.session_timers
            .schedule(key, self.config.session_timeout, move || {
                if let Some(context) = context.upgrade() {
                    context.expire_session(&key);
                }
            });
    }

    fn expire_session(&self, key: &SessionKey) {
        let Some(handle) = self.registry.remove(key) else {
            return;
        };
        let requests = handle.lock().drain_requests();
        for request in requests {
            self.request_timers.cancel(&(*key, request.request_id.clone()));
            request.completion.resolve(Err(DiscoveryError::SessionExpired));
        }
        self.metrics.session_expired();
        debug!(session = %key, "Session expired");
    }

    /// Fail the request with [`DiscoveryError::Timeout`] unless it completes first.
    pub fn schedule_request_timeout(self: &Arc<Self>, key: SessionKey, request_id: RequestId) {
        let context: Weak<Self> = Arc::downgrade(self);
        let timer_id = request_id.clone();
        self.request_timers
            .schedule((key, timer_id), self.config.request_timeout, move || {
                if let Some(context) = context.upgrade() {
                    context.time_out_request(&key, &request_id);
                }
            });
    }

    fn time_out_request(&self, key: &SessionKey, request_id: &RequestId) {
        let Some(handle) = self.registry.get(key) else {
            return;
        };
        let Some(request) = handle.lock().take_request(request_id) else {
            return;
        };
        if let Some(nonce) = request.nonce.as_ref() {
            self.registry.forget_nonce(nonce);
        }
        if request.completion.resolve(Err(DiscoveryError::Timeout)) {
            self.metrics.request_timed_out();
            debug!(session = %key, %request_id, "Request timed out");
        }
    }

    /// Clean up after a request left its session's in-flight map.
    pub fn finish_request(&self, key: &SessionKey, request_id: &RequestId, nonce: Option<&Nonce>) {
        self.request_timers.cancel(&(*key, request_id.clone()));
        if let Some(nonce) = nonce {
            self.registry.forget_nonce(nonce);
        }
    }
}
