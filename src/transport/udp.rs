use crate::core::codec::DatagramCodec;
use crate::error::{DiscoveryError, Result};
use crate::service::DiscoveryService;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::udp::UdpFramed;
use tracing::{debug, info, warn};

/// Drives a [`DiscoveryService`] from a UDP socket until the service stops.
pub struct UdpTransport {
    socket: UdpSocket,
    service: Arc<DiscoveryService>,
}

impl UdpTransport {
    /// Bind to `addr`, e.g. the configured listen address.
    pub async fn bind(addr: SocketAddr, service: Arc<DiscoveryService>) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket, service })
    }

    pub fn new(socket: UdpSocket, service: Arc<DiscoveryService>) -> Self {
        Self { socket, service }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(self) -> Result<()> {
        let outgoing = self
            .service
            .take_outgoing()
            .ok_or_else(|| DiscoveryError::Custom("transport already attached".into()))?;
        let local_addr = self.socket.local_addr()?;
        let shutdown = self.service.shutdown_token();

        let (mut sink, mut stream) = UdpFramed::new(self.socket, DatagramCodec).split();
        let mut outgoing = ReceiverStream::new(outgoing);
        info!(%local_addr, "UDP transport running");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = stream.next() => match received {
                    Some(Ok((bytes, remote))) => {
                        if let Err(e) = self.service.handle_incoming(bytes, remote) {
                            debug!(%remote, error = %e, "Inbound datagram dropped");
                        }
                    }
                    // oversized datagrams and ICMP errors surface here; keep reading
                    Some(Err(e)) => debug!(error = %e, "Receive error"),
                    None => break,
                },
                packet = outgoing.next() => match packet {
                    Some(packet) => {
                        if let Err(e) = sink.send((packet.bytes, packet.destination)).await {
                            warn!(destination = %packet.destination, error = %e, "Send failed");
                        }
                    }
                    None => break,
                },
            }
        }

        info!(%local_addr, "UDP transport stopped");
        Ok(())
    }
}
