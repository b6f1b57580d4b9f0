//! Error types for the TFTP engine
//!
//! [`DecodeError`] covers datagrams that are not valid TFTP packets.
//! [`TransferError`] covers everything that ends a single transfer session and
//! knows how (or whether) the failure is reported back to the peer.

use std::io;
use std::time::Duration;

use crate::protocol::{Packet, TftpErrorCode, TftpOpcode};

/// A datagram that could not be decoded into a [`Packet`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
    #[error("unrecognized opcode {0}")]
    UnrecognizedOpcode(u16),
}

/// Why a transfer session ended without completing
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The peer sent an ERROR packet.
    #[error("peer aborted transfer: {} ({code}): {message}", describe_code(.code))]
    Remote { code: u16, message: String },

    #[error("no reply from peer within {0:?}")]
    Timeout(Duration),

    #[error("block sequence violation: expected block {expected}, received {received}")]
    BlockSequence { expected: u16, received: u16 },

    #[error("unexpected {0} packet")]
    UnexpectedPacket(TftpOpcode),

    #[error("unsupported transfer mode '{0}'")]
    UnsupportedMode(String),

    #[error("access violation: {0}")]
    AccessViolation(String),

    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),
}

impl TransferError {
    /// Map an ERROR packet received from the peer into a local failure
    pub fn from_error_packet(code: u16, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
        }
    }

    /// The protocol code used to report this failure to the peer
    ///
    /// Returns `None` for failures the peer must not be told about: errors the
    /// peer itself sent, and timeouts (the peer is presumed gone).
    pub fn error_code(&self) -> Option<TftpErrorCode> {
        match self {
            Self::Remote { .. } | Self::Timeout(_) => None,
            Self::Decode(_) | Self::BlockSequence { .. } | Self::UnexpectedPacket(_) | Self::UnsupportedMode(_) => {
                Some(TftpErrorCode::IllegalOperation)
            }
            Self::AccessViolation(_) => Some(TftpErrorCode::AccessViolation),
            Self::Io(e) => Some(io_error_code(e)),
        }
    }

    /// Build the ERROR packet reporting this failure, if it is reported at all
    ///
    /// I/O failures are reported with the code's default message so that
    /// local paths never leak to the peer.
    pub fn to_packet(&self) -> Option<Packet> {
        let code = self.error_code()?;
        let packet = match self {
            Self::Io(_) => Packet::error(code),
            other => Packet::error_with_message(code, other.to_string()),
        };
        Some(packet)
    }
}

fn describe_code(code: &u16) -> &'static str {
    TftpErrorCode::describe(*code)
}

/// Closest protocol error code for an I/O failure
pub fn io_error_code(error: &io::Error) -> TftpErrorCode {
    match error.kind() {
        io::ErrorKind::NotFound => TftpErrorCode::FileNotFound,
        io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => TftpErrorCode::AccessViolation,
        io::ErrorKind::AlreadyExists => TftpErrorCode::FileAlreadyExists,
        io::ErrorKind::StorageFull | io::ErrorKind::FileTooLarge => TftpErrorCode::DiskFull,
        _ => TftpErrorCode::NotDefined,
    }
}
