//! TFTP Server Implementation
//!
//! This module contains the main TFTP server logic that handles incoming
//! requests and dispatches each one to its own transfer session.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{UdpSocket, lookup_host};

use crate::protocol::{DATAGRAM_BUFFER_SIZE, Packet, TftpRequest};
use crate::storage::{FileSystem, ReadPort, WritePort};
use crate::transfer::{TransferConfig, handle_request};

/// TFTP Server configuration
#[derive(Debug, Clone)]
pub struct TftpServerConfig {
    pub bind_address: String,
    pub transfer_config: TransferConfig,
}

impl Default for TftpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:69".to_string(),
            transfer_config: TransferConfig::default(),
        }
    }
}

/// Main TFTP server
pub struct TftpServer<R = FileSystem, W = FileSystem> {
    config: TftpServerConfig,
    reader: Arc<R>,
    writer: Arc<W>,
    socket: Option<UdpSocket>,
}

impl TftpServer {
    /// Create a new TFTP server serving the local filesystem
    pub fn new(config: TftpServerConfig) -> Self {
        Self::with_ports(config, FileSystem::default(), FileSystem::default())
    }

    /// Create a new TFTP server with default configuration
    pub fn with_defaults() -> Self {
        Self::new(TftpServerConfig::default())
    }

    /// Create a new TFTP server with custom bind address and root directory
    pub fn with_config(bind_address: String, root_directory: PathBuf) -> Self {
        let mut config = TftpServerConfig {
            bind_address,
            ..Default::default()
        };
        config.transfer_config.root_dir = root_directory;

        Self::new(config)
    }
}

impl<R: ReadPort, W: WritePort> TftpServer<R, W> {
    /// Create a new TFTP server opening files through the given ports
    pub fn with_ports(config: TftpServerConfig, reader: R, writer: W) -> Self {
        Self {
            config,
            reader: Arc::new(reader),
            writer: Arc::new(writer),
            socket: None,
        }
    }

    /// Get the server's configuration
    pub fn config(&self) -> &TftpServerConfig {
        &self.config
    }

    /// Get a mutable reference to the server's configuration
    pub fn config_mut(&mut self) -> &mut TftpServerConfig {
        &mut self.config
    }

    /// Bind the listening socket, returning the address actually bound
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let addr = lookup_host(&self.config.bind_address)
            .await
            .with_context(|| format!("Invalid bind address: {}", self.config.bind_address))?
            .next()
            .ok_or_else(|| anyhow!("Bind address {} resolved to nothing", self.config.bind_address))?;

        let socket = bind_listener(addr)?;
        let local_addr = socket.local_addr().context("Failed to get local address")?;
        tracing::info!(
            "TFTP server listening on {}, serving files from {}",
            local_addr,
            self.config.transfer_config.root_dir.display()
        );

        self.socket = Some(socket);
        Ok(local_addr)
    }

    /// Start the TFTP server and run the main loop
    pub async fn run(&mut self) -> Result<()> {
        self.bind().await?;
        self.serve().await
    }

    /// Get the local address the server is bound to (if running)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Main server loop
    ///
    /// Returns only if the listening socket fails.
    pub async fn serve(&self) -> Result<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| anyhow!("Server must be bound before serving"))?;
        let transfer_config = Arc::new(self.config.transfer_config.clone());

        let mut buffer = [0u8; DATAGRAM_BUFFER_SIZE];

        loop {
            let (len, client_addr) = socket
                .recv_from(&mut buffer)
                .await
                .context("Failed to receive on TFTP server socket")?;

            // No transfer ID exists yet, so nothing is ever sent back from here.
            let request = match Packet::decode(&buffer[..len]).map(TftpRequest::try_from) {
                Ok(Ok(request)) => request,
                Ok(Err(e)) => {
                    tracing::debug!("Ignoring {} from {}", e, client_addr);
                    continue;
                }
                Err(e) => {
                    tracing::debug!("Dropping {} from {}", e, client_addr);
                    continue;
                }
            };

            tracing::info!(
                "{:?} request for '{}' in {} mode from {}",
                request.kind,
                request.filename,
                request.mode,
                client_addr
            );

            tokio::spawn(handle_request(
                client_addr,
                request,
                transfer_config.clone(),
                self.reader.clone(),
                self.writer.clone(),
            ));
        }
    }
}

/// Bind the well-known listening socket
fn bind_listener(addr: SocketAddr) -> Result<UdpSocket> {
    let socket =
        Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP)).context("Failed to create socket")?;

    // Allow quick restarts while clients still hold the old port in flight
    socket
        .set_reuse_address(true)
        .context("Failed to set SO_REUSEADDR on TFTP socket")?;

    socket
        .set_nonblocking(true)
        .context("Failed to set socket to non-blocking mode")?;

    socket
        .bind(&addr.into())
        .with_context(|| format!("Failed to bind TFTP server socket to {}", addr))?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).context("Failed to convert to Tokio socket")
}

/// Run a TFTP server with the given bind address and root directory
///
/// This is a convenience function that creates and runs a TFTP server.
pub async fn run_tftp_server(bind_address: String, root_directory: PathBuf, local_bind: Option<IpAddr>) -> Result<()> {
    let mut server = TftpServer::with_config(bind_address, root_directory);
    server.config.transfer_config.local_bind = local_bind;
    server.run().await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::tempdir;
    use tokio::time::timeout;

    use super::*;
    use crate::storage::memory::{MemoryFiles, MemorySink};

    #[test]
    fn test_tftp_server_config_default() {
        let config = TftpServerConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0:69");
        assert_eq!(config.transfer_config.root_dir, PathBuf::from("."));
    }

    #[test]
    fn test_tftp_server_creation() {
        let server = TftpServer::with_defaults();
        assert_eq!(server.config().bind_address, "0.0.0.0:69");
        assert!(server.local_addr().is_none()); // Not bound yet

        let custom_server = TftpServer::with_config("127.0.0.1:9999".to_string(), PathBuf::from("/tmp/tftp"));
        assert_eq!(custom_server.config().bind_address, "127.0.0.1:9999");
        assert_eq!(
            custom_server.config().transfer_config.root_dir,
            PathBuf::from("/tmp/tftp")
        );
    }

    #[tokio::test]
    async fn test_server_bind() {
        let temp_dir = tempdir().unwrap();
        let mut server = TftpServer::with_config("127.0.0.1:0".to_string(), temp_dir.path().to_path_buf());

        let addr = server.bind().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addr(), Some(addr));
    }

    #[tokio::test]
    async fn test_serve_requires_bind() {
        let server = TftpServer::with_defaults();
        assert!(server.serve().await.is_err());
    }

    #[tokio::test]
    async fn test_server_bind_error() {
        let mut server = TftpServer::with_config("not an address".to_string(), PathBuf::from("."));
        assert!(server.bind().await.is_err());
    }

    #[tokio::test]
    async fn test_dispatcher_ignores_junk_and_serves_requests() {
        let files = MemoryFiles::default().with_file("/srv/hello.txt", b"Hello, TFTP!".to_vec());
        let mut config = TftpServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            ..Default::default()
        };
        config.transfer_config.root_dir = PathBuf::from("/srv");

        let mut server = TftpServer::with_ports(config, files, MemorySink::default());
        let server_addr = server.bind().await.unwrap();
        let server_task = tokio::spawn(async move { server.serve().await });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut buf = [0u8; DATAGRAM_BUFFER_SIZE];

        // Garbage and non-request packets are dropped without reply
        client.send_to(&[0x00], server_addr).await.unwrap();
        client.send_to(&[0, 42, 0, 0], server_addr).await.unwrap();
        client.send_to(&Packet::Ack { block: 1 }.encode(), server_addr).await.unwrap();
        assert!(
            timeout(Duration::from_millis(200), client.recv_from(&mut buf))
                .await
                .is_err()
        );

        let rrq = Packet::Request(TftpRequest::read_request("hello.txt", "octet"));
        client.send_to(&rrq.encode(), server_addr).await.unwrap();

        let (n, tid) = timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Packet::decode(&buf[..n]).unwrap(), Packet::Ack { block: 0 });
        assert_ne!(tid.port(), server_addr.port());

        let (n, _) = timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            Packet::decode(&buf[..n]).unwrap(),
            Packet::Data {
                block: 1,
                payload: b"Hello, TFTP!".to_vec()
            }
        );
        client.send_to(&Packet::Ack { block: 1 }.encode(), tid).await.unwrap();

        // The accept loop keeps running after handing off the session
        assert!(!server_task.is_finished());
        server_task.abort();
    }
}
