//! Observability and Metrics
//!
//! Process-wide atomic counters for packet, handshake, request and session events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Global metrics collector for discovery operations
#[derive(Debug)]
pub struct Metrics {
    /// Datagrams handed to the inbound pipeline
    pub packets_received: AtomicU64,
    /// Datagrams emitted by the outbound pipeline
    pub packets_sent: AtomicU64,
    /// Bytes received
    pub bytes_received: AtomicU64,
    /// Bytes sent
    pub bytes_sent: AtomicU64,
    /// Packets rejected by the codec
    pub packets_malformed: AtomicU64,
    /// Messages that failed AEAD or plaintext decoding
    pub decrypt_failures: AtomicU64,
    /// Challenges issued
    pub challenges_sent: AtomicU64,
    /// Handshakes completed, either role
    pub handshakes_success: AtomicU64,
    /// Handshakes dropped during verification
    pub handshakes_failed: AtomicU64,
    /// Requests sent
    pub requests_sent: AtomicU64,
    /// Requests resolved with a timeout
    pub requests_timed_out: AtomicU64,
    /// Sessions created
    pub sessions_created: AtomicU64,
    /// Sessions destroyed by inactivity
    pub sessions_expired: AtomicU64,
    /// Envelopes dropped because a pipeline queue was full
    pub envelopes_dropped: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            packets_received: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            packets_malformed: AtomicU64::new(0),
            decrypt_failures: AtomicU64::new(0),
            challenges_sent: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            requests_sent: AtomicU64::new(0),
            requests_timed_out: AtomicU64::new(0),
            sessions_created: AtomicU64::new(0),
            sessions_expired: AtomicU64::new(0),
            envelopes_dropped: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn packet_received(&self, byte_count: u64) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn packet_sent(&self, byte_count: u64) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn packet_malformed(&self) {
        self.packets_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrypt_failure(&self) {
        self.decrypt_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn challenge_sent(&self) {
        self.challenges_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_success(&self) {
        self.handshakes_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_timed_out(&self) {
        self.requests_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_expired(&self) {
        self.sessions_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn envelope_dropped(&self) {
        self.envelopes_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            packets_malformed: self.packets_malformed.load(Ordering::Relaxed),
            decrypt_failures: self.decrypt_failures.load(Ordering::Relaxed),
            challenges_sent: self.challenges_sent.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            requests_timed_out: self.requests_timed_out.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_expired: self.sessions_expired.load(Ordering::Relaxed),
            envelopes_dropped: self.envelopes_dropped.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            packets_received = snapshot.packets_received,
            packets_sent = snapshot.packets_sent,
            bytes_received = snapshot.bytes_received,
            bytes_sent = snapshot.bytes_sent,
            packets_malformed = snapshot.packets_malformed,
            decrypt_failures = snapshot.decrypt_failures,
            challenges_sent = snapshot.challenges_sent,
            handshakes_success = snapshot.handshakes_success,
            handshakes_failed = snapshot.handshakes_failed,
            requests_sent = snapshot.requests_sent,
            requests_timed_out = snapshot.requests_timed_out,
            sessions_created = snapshot.sessions_created,
            sessions_expired = snapshot.sessions_expired,
            envelopes_dropped = snapshot.envelopes_dropped,
            uptime_seconds = snapshot.uptime_seconds,
            "Discovery metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub packets_received: u64,
    pub packets_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub packets_malformed: u64,
    pub decrypt_failures: u64,
    pub challenges_sent: u64,
    pub handshakes_success: u64,
    pub handshakes_failed: u64,
    pub requests_sent: u64,
    pub requests_timed_out: u64,
    pub sessions_created: u64,
    pub sessions_expired: u64,
    pub envelopes_dropped: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}
