//! Bounded retransmission
//!
//! Every wait inside a transfer goes through a [`RetryPolicy`]: the last packet
//! we sent is retransmitted each time `interval` passes in silence, and the
//! wait fails with [`TransferError::Timeout`] once `timeout` has elapsed.
//!
//! Socket errors on the connected transfer socket (such as `ConnectionRefused`
//! after an ICMP port-unreachable) never end a wait early: the peer is treated
//! as silent and only the timeout ends the transfer.

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};

use crate::error::TransferError;
use crate::protocol::{DATAGRAM_BUFFER_SIZE, Packet};

/// Retransmission interval and overall ceiling for one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Send `packet` and wait for the peer's reply
    pub async fn exchange(&self, sock: &UdpSocket, packet: &[u8]) -> Result<Packet, TransferError> {
        send_datagram(sock, packet).await;
        self.await_reply(sock, packet).await
    }

    /// Wait for the next decodable packet from the peer
    ///
    /// `last_sent` has already been sent once by the caller and is resent on
    /// every silent interval. Datagrams that fail to decode are skipped
    /// without restarting the interval.
    pub async fn await_reply(&self, sock: &UdpSocket, last_sent: &[u8]) -> Result<Packet, TransferError> {
        let deadline = Instant::now() + self.timeout;
        let mut resend_at = Instant::now() + self.interval;
        let mut buf = [0u8; DATAGRAM_BUFFER_SIZE];

        loop {
            match timeout_at(resend_at.min(deadline), sock.recv(&mut buf)).await {
                Ok(Ok(len)) => match Packet::decode(&buf[..len]) {
                    Ok(packet) => return Ok(packet),
                    Err(e) => tracing::debug!("Ignoring undecodable datagram: {}", e),
                },
                Ok(Err(e)) => tracing::debug!("Receive on transfer socket failed: {}", e),
                Err(_) => {
                    if Instant::now() >= deadline {
                        return Err(TransferError::Timeout(self.timeout));
                    }
                    tracing::trace!("No reply within {:?}, retransmitting", self.interval);
                    send_datagram(sock, last_sent).await;
                    resend_at = Instant::now() + self.interval;
                }
            }
        }
    }
}

/// Send one datagram to the connected peer
///
/// A failed send is indistinguishable from a lost datagram, so it is only
/// logged; the caller's next wait retransmits or times out.
pub(crate) async fn send_datagram(sock: &UdpSocket, packet: &[u8]) {
    if let Err(e) = sock.send(packet).await {
        tracing::debug!("Send on transfer socket failed: {}", e);
    }
}
