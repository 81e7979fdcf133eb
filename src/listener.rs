//! UDP listener for packet forwarder traffic
//!
//! One socket, one loop. Each datagram is acked before anything else is looked at, so a
//! slow or failing pipeline never makes the forwarder retransmit. Decoded uplinks go to
//! the router over a bounded channel; when the router falls behind they are dropped
//! rather than waited for.

use crate::error::TransportError;
use crate::gwmp::{extract_json_segment, Envelope, PacketType};
use crate::pipeline::{IngestContext, UplinkEvent};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_RECV_BUFFER: usize = 4096;

pub struct UdpListener {
    socket: UdpSocket,
    context: Arc<IngestContext>,
    recv_buffer: usize,
}

impl UdpListener {
    pub async fn bind(
        addr: SocketAddr,
        context: Arc<IngestContext>,
        recv_buffer: usize,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        Ok(Self {
            socket,
            context,
            recv_buffer: recv_buffer.max(crate::gwmp::HEADER_LEN),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive until cancelled or the router goes away
    ///
    /// Only a failed ack send ends the loop with an error.
    pub async fn run(
        self,
        tx: mpsc::Sender<UplinkEvent>,
        shutdown: CancellationToken,
    ) -> Result<(), TransportError> {
        let mut buf = vec![0u8; self.recv_buffer];
        info!(addr = ?self.local_addr().ok(), "UDP listener started");

        loop {
            let (len, peer) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Received shutdown signal, stopping listener");
                    break;
                }
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok(received) => received,
                    Err(e) => {
                        error!(error = %e, "UDP recv error");
                        continue;
                    }
                },
            };

            let uplinks = self.handle_datagram(&buf[..len], peer).await?;
            for uplink in uplinks {
                match tx.try_send(uplink) {
                    Ok(()) => {}
                    Err(TrySendError::Full(dropped)) => {
                        warn!(
                            dev_addr = %dropped.devaddr,
                            fcnt = dropped.fcnt,
                            "Router queue full, uplink dropped"
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        warn!("Router channel closed, stopping listener");
                        return Ok(());
                    }
                }
            }
        }

        info!("UDP listener stopped");
        Ok(())
    }

    /// Ack and decode one datagram
    async fn handle_datagram(
        &self,
        datagram: &[u8],
        peer: SocketAddr,
    ) -> Result<Vec<UplinkEvent>, TransportError> {
        let Ok(envelope) = Envelope::parse(datagram) else {
            debug!(peer = %peer, len = datagram.len(), "Datagram too short, dropped");
            return Ok(Vec::new());
        };

        let Some(ack) = envelope.ack() else {
            debug!(
                peer = %peer,
                packet_type = envelope.packet_type,
                "Unhandled packet type, dropped"
            );
            return Ok(Vec::new());
        };

        self.socket
            .send_to(&ack, peer)
            .await
            .map_err(|source| TransportError::Send { addr: peer, source })?;

        if envelope.kind() != Some(PacketType::PushData) {
            debug!(peer = %peer, token = %hex::encode(envelope.token), "PULL_DATA acked");
            return Ok(Vec::new());
        }

        let body = match extract_json_segment(envelope.json_body()) {
            Ok(body) => body,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Dropping PUSH_DATA");
                return Ok(Vec::new());
            }
        };

        debug!(
            peer = %peer,
            token = %hex::encode(envelope.token),
            rxpk = body.rxpk.len(),
            "PUSH_DATA received"
        );

        Ok(self.context.process_push_data(body))
    }
}
