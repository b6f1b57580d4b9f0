//! TFTP (Trivial File Transfer Protocol) Implementation
//!
//! This crate provides an RFC 1350 TFTP server with support for:
//! - Read (RRQ) and write (WRQ) requests
//! - Binary (octet) transfers in 512-byte blocks
//! - Retransmission on silence with an overall per-wait timeout
//! - Path confinement to a served root directory
//! - Concurrent transfers, each on its own ephemeral port
//!
//! # Protocol Organization
//!
//! - [`Packet`] - The five TFTP packet kinds with their wire codec
//! - [`TftpOpcode`] - Opcodes and their display names
//! - [`TftpErrorCode`] - Standard error codes with default messages
//! - [`TransferMode`] - The supported transfer mode
//! - [`TransferError`] - Why a transfer ended, and how it is reported to the peer
//!
//! # Basic Server Usage
//!
//! ```rust,no_run
//! use tftp::{run_tftp_server, TftpServer};
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Simple usage with convenience function
//!     run_tftp_server("0.0.0.0:69".to_string(), PathBuf::from("./tftp_root"), None).await?;
//!
//!     // Or use the server struct for more control
//!     let mut server = TftpServer::with_config("127.0.0.1:6969".to_string(), PathBuf::from("./files"));
//!     server.config_mut().transfer_config.retry_interval = std::time::Duration::from_secs(1);
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Working with Packets
//!
//! ```rust
//! use tftp::{Packet, TftpErrorCode, TftpOpcode, TftpRequest, TransferMode};
//!
//! let request = Packet::Request(TftpRequest::read_request("boot.img", "OCTET"));
//! let bytes = request.encode();
//! assert_eq!(&bytes[..2], &[0, 1]);
//! assert_eq!(Packet::decode(&bytes).unwrap(), request);
//!
//! assert_eq!(TftpOpcode::ReadRequest.name(), "RRQ");
//! assert_eq!("octet".parse::<TransferMode>().unwrap(), TransferMode::Octet);
//!
//! let error = Packet::error(TftpErrorCode::FileNotFound);
//! assert_eq!(error.encode(), b"\x00\x05\x00\x01File not found\x00");
//! ```

mod error;
mod protocol;
mod retry;
mod server;
mod storage;
mod transfer;

pub use error::*;
pub use protocol::*;
pub use retry::*;
pub use server::*;
pub use storage::*;
pub use transfer::*;
