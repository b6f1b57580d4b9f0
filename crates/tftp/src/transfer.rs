//! TFTP File Transfer Logic
//!
//! This module runs a single transfer from the moment a request is accepted
//! until the last block is acknowledged or the transfer fails.
//!
//! Each transfer owns a UDP socket bound to a fresh ephemeral port and
//! connected to the client; that (client address, server port) pair is the
//! transfer ID for the rest of the exchange.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};

use crate::error::TransferError;
use crate::protocol::{BLOCK_SIZE, DATAGRAM_BUFFER_SIZE, Packet, RequestKind, TftpRequest};
use crate::retry::{RetryPolicy, send_datagram};
use crate::storage::{ReadPort, WritePort, resolve_path};

const RETRY_INTERVAL_SECS: u64 = 3;
const TIMEOUT_SECS: u64 = 30;

/// Transfer session configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Directory requested filenames are resolved against
    pub root_dir: PathBuf,
    /// Silence after which the last packet is retransmitted
    pub retry_interval: Duration,
    /// Longest wait for any single reply before the transfer is abandoned
    pub timeout: Duration,
    /// Local address for transfer sockets; the client's unspecified address when unset
    pub local_bind: Option<IpAddr>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            retry_interval: Duration::from_secs(RETRY_INTERVAL_SECS),
            timeout: Duration::from_secs(TIMEOUT_SECS),
            local_bind: None,
        }
    }
}

impl TransferConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_interval, self.timeout)
    }
}

/// Outcome of a completed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    pub kind: RequestKind,
    /// DATA blocks sent or accepted, including the final short block
    pub blocks: u32,
    pub bytes: u64,
}

impl TransferSummary {
    fn new(kind: RequestKind) -> Self {
        Self {
            kind,
            blocks: 0,
            bytes: 0,
        }
    }

    fn record(&mut self, len: usize) {
        self.blocks += 1;
        self.bytes += len as u64;
    }
}

impl TryFrom<Packet> for TftpRequest {
    type Error = TransferError;

    fn try_from(packet: Packet) -> Result<Self, Self::Error> {
        match packet {
            Packet::Request(request) => Ok(request),
            other => Err(TransferError::UnexpectedPacket(other.opcode())),
        }
    }
}

/// One client transfer, from request acknowledgment to completion
pub struct TransferSession<R, W> {
    sock: UdpSocket,
    peer: SocketAddr,
    request: TftpRequest,
    config: Arc<TransferConfig>,
    reader: Arc<R>,
    writer: Arc<W>,
}

impl<R: ReadPort, W: WritePort> TransferSession<R, W> {
    /// Allocate the transfer socket for `request` from `peer`
    pub async fn open(
        peer: SocketAddr,
        request: TftpRequest,
        config: Arc<TransferConfig>,
        reader: Arc<R>,
        writer: Arc<W>,
    ) -> Result<Self> {
        let sock = create_ephemeral_socket(peer, config.local_bind).await?;
        sock.connect(peer)
            .await
            .with_context(|| format!("failed to connect transfer socket to {}", peer))?;

        Ok(Self {
            sock,
            peer,
            request,
            config,
            reader,
            writer,
        })
    }

    /// Local address of the transfer socket (the server side of the transfer ID)
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.sock.local_addr()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Run the transfer to completion
    ///
    /// On failure an ERROR packet is sent to the peer (when the failure is
    /// one the peer should hear about) before the error is returned.
    pub async fn run(self) -> Result<TransferSummary, TransferError> {
        let result = self.transfer().await;
        if let Err(e) = &result {
            self.report(e).await;
        }
        result
    }

    async fn transfer(&self) -> Result<TransferSummary, TransferError> {
        if self.request.transfer_mode().is_none() {
            return Err(TransferError::UnsupportedMode(self.request.mode.clone()));
        }

        send_datagram(&self.sock, &Packet::Ack { block: 0 }.encode()).await;

        match self.request.kind {
            RequestKind::Read => self.send_file().await,
            RequestKind::Write => self.receive_file().await,
        }
    }

    /// Read state machine: send blocks 1, 2, ... each awaiting its ACK
    async fn send_file(&self) -> Result<TransferSummary, TransferError> {
        let path = resolve_path(&self.config.root_dir, &self.request.filename)?;
        let path = self.reader.confine(&self.config.root_dir, path).await?;
        let mut source = self.reader.open_for_read(&path).await?;
        let policy = self.config.retry_policy();

        let mut summary = TransferSummary::new(RequestKind::Read);
        let mut buf = [0u8; BLOCK_SIZE];
        let mut block: u16 = 1;

        loop {
            let len = read_block(&mut source, &mut buf).await?;
            let data = Packet::Data {
                block,
                payload: buf[..len].to_vec(),
            }
            .encode();

            match policy.exchange(&self.sock, &data).await? {
                Packet::Ack { block: acked } if acked == block => {}
                Packet::Ack { block: acked } => {
                    return Err(TransferError::BlockSequence {
                        expected: block,
                        received: acked,
                    });
                }
                Packet::Error { code, message } => return Err(TransferError::from_error_packet(code, message)),
                other => return Err(TransferError::UnexpectedPacket(other.opcode())),
            }

            summary.record(len);

            // A short block was acknowledged, transfer is complete
            if len < BLOCK_SIZE {
                return Ok(summary);
            }

            block = block.wrapping_add(1);
        }
    }

    /// Write state machine: accept blocks 1, 2, ... acknowledging each once written
    async fn receive_file(&self) -> Result<TransferSummary, TransferError> {
        let path = resolve_path(&self.config.root_dir, &self.request.filename)?;
        let path = self.writer.confine(&self.config.root_dir, path).await?;
        let mut sink = self.writer.open_for_write(&path).await?;
        let policy = self.config.retry_policy();

        let mut summary = TransferSummary::new(RequestKind::Write);
        let mut previous: u16 = 0;
        let mut last_ack = Packet::Ack { block: previous }.encode();

        loop {
            let expected = previous.wrapping_add(1);

            match policy.await_reply(&self.sock, &last_ack).await? {
                Packet::Data { block, .. } if block == previous => {
                    // Our ACK was lost; the payload is already written.
                    tracing::debug!("Duplicate block {} from {}, resending ACK", block, self.peer);
                    send_datagram(&self.sock, &last_ack).await;
                }
                Packet::Data { block, payload } if block == expected => {
                    sink.write_all(&payload).await?;
                    summary.record(payload.len());
                    previous = block;
                    last_ack = Packet::Ack { block }.encode();

                    if payload.len() < BLOCK_SIZE {
                        sink.flush().await?;
                        sink.shutdown().await?;
                        send_datagram(&self.sock, &last_ack).await;
                        self.linger(block, &last_ack).await;
                        return Ok(summary);
                    }

                    send_datagram(&self.sock, &last_ack).await;
                }
                Packet::Data { block, .. } => {
                    return Err(TransferError::BlockSequence {
                        expected,
                        received: block,
                    });
                }
                Packet::Error { code, message } => return Err(TransferError::from_error_packet(code, message)),
                other => return Err(TransferError::UnexpectedPacket(other.opcode())),
            }
        }
    }

    /// Keep answering retransmissions of the final block until the peer goes quiet
    ///
    /// The window is the full reply timeout, since the peer retransmits on its
    /// own schedule rather than ours. Each retransmission restarts the window;
    /// other datagrams are ignored.
    async fn linger(&self, final_block: u16, final_ack: &[u8]) {
        let mut deadline = Instant::now() + self.config.timeout;
        let mut buf = [0u8; DATAGRAM_BUFFER_SIZE];

        loop {
            let len = match timeout_at(deadline, self.sock.recv(&mut buf)).await {
                Err(_) => return,
                Ok(Err(e)) => {
                    tracing::debug!("Stopped waiting for {} after final ACK: {}", self.peer, e);
                    return;
                }
                Ok(Ok(len)) => len,
            };

            if let Ok(Packet::Data { block, .. }) = Packet::decode(&buf[..len])
                && block == final_block
            {
                tracing::debug!("Final block {} repeated by {}, resending ACK", block, self.peer);
                send_datagram(&self.sock, final_ack).await;
                deadline = Instant::now() + self.config.timeout;
            }
        }
    }

    /// Best-effort ERROR packet for a failed transfer
    async fn report(&self, error: &TransferError) {
        let Some(packet) = error.to_packet() else {
            return;
        };
        if let Err(e) = self.sock.send(&packet.encode()).await {
            tracing::debug!("Failed to send {} to {}: {}", packet, self.peer, e);
        }
    }
}

/// Open and run a transfer session, logging its outcome
///
/// This is the body of the task spawned per accepted request.
pub async fn handle_request<R: ReadPort, W: WritePort>(
    peer: SocketAddr,
    request: TftpRequest,
    config: Arc<TransferConfig>,
    reader: Arc<R>,
    writer: Arc<W>,
) {
    let filename = request.filename.clone();
    let session = match TransferSession::open(peer, request, config, reader, writer).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!("Failed to open transfer session for {}: {:#}", peer, e);
            return;
        }
    };

    match session.run().await {
        Ok(summary) => tracing::info!(
            "Transferred '{}' {} {} ({} bytes in {} blocks)",
            filename,
            match summary.kind {
                RequestKind::Read => "to",
                RequestKind::Write => "from",
            },
            peer,
            summary.bytes,
            summary.blocks
        ),
        Err(e) => tracing::warn!("Transfer of '{}' with {} failed: {}", filename, peer, e),
    }
}

/// Fill `buf` from `source`, stopping early only at end of file
async fn read_block<S: AsyncRead + Unpin>(source: &mut S, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Create an ephemeral UDP socket appropriate for the client address family
async fn create_ephemeral_socket(client: SocketAddr, local_bind: Option<IpAddr>) -> Result<UdpSocket> {
    let ip = local_bind.unwrap_or(match client {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    });

    let sock = UdpSocket::bind(SocketAddr::new(ip, 0))
        .await
        .context("failed to bind ephemeral socket")?;

    tracing::debug!("Transfer socket bound to {}", sock.local_addr()?);
    Ok(sock)
}
