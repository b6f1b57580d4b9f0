//! TFTP Protocol Implementation
//!
//! This module contains the wire-level part of the protocol: opcodes, error
//! codes, transfer modes and the [`Packet`] codec.
//!
//! # TFTP Protocol Overview
//!
//! TFTP (Trivial File Transfer Protocol) is defined in RFC 1350. Every packet
//! starts with a 2-byte big-endian opcode followed by a fixed layout:
//!
//! ```text
//!  RRQ/WRQ | 01/02 | Filename | 0 | Mode | 0 |
//!  DATA    | 03    | Block #  | Data (0..=512 bytes) |
//!  ACK     | 04    | Block #  |
//!  ERROR   | 05    | ErrorCode | ErrMsg | 0 |
//! ```
//!
//! A DATA packet carrying fewer than [`BLOCK_SIZE`] bytes ends the transfer.

use std::fmt;
use std::str::FromStr;

use crate::error::DecodeError;

/// Payload bytes carried by a full DATA packet
pub const BLOCK_SIZE: usize = 512;

/// Size of the fixed header preceding DATA payloads and ACK/ERROR bodies
pub const HEADER_SIZE: usize = 4;

/// Size of the buffers used to receive datagrams
///
/// Large enough for any DATA packet and for requests with long filenames.
pub const DATAGRAM_BUFFER_SIZE: usize = 1500;

/// TFTP Protocol Opcodes
///
/// These opcodes identify the type of TFTP packet being sent or received.
/// Each opcode corresponds to a specific packet format as defined in RFC 1350.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TftpOpcode {
    /// Read Request (RRQ) - Opcode 1
    ///
    /// Client requests to read a file from the server.
    ///
    /// Packet format: | Opcode | Filename | 0 | Mode | 0 |
    ReadRequest = 1,

    /// Write Request (WRQ) - Opcode 2
    ///
    /// Client requests to write a file to the server.
    ///
    /// Packet format: | Opcode | Filename | 0 | Mode | 0 |
    WriteRequest = 2,

    /// Data Packet (DATA) - Opcode 3
    ///
    /// Contains a 2-byte block number and up to 512 bytes of file data.
    /// The last packet of a transfer contains less than a full block.
    ///
    /// Packet format: | Opcode | Block# | Data |
    Data = 3,

    /// Acknowledgment (ACK) - Opcode 4
    ///
    /// Acknowledges receipt of a data packet. Block number 0 acknowledges
    /// the initial request.
    ///
    /// Packet format: | Opcode | Block# |
    Acknowledgment = 4,

    /// Error Packet (ERROR) - Opcode 5
    ///
    /// Reports an error condition and terminates the current transfer.
    /// Error packets are never acknowledged nor retransmitted.
    ///
    /// Packet format: | Opcode | ErrorCode | ErrMsg | 0 |
    Error = 5,
}

impl TftpOpcode {
    /// Convert a u16 value to a TftpOpcode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpOpcode;
    ///
    /// assert_eq!(TftpOpcode::from_u16(1), Some(TftpOpcode::ReadRequest));
    /// assert_eq!(TftpOpcode::from_u16(6), None);
    /// ```
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::ReadRequest),
            2 => Some(Self::WriteRequest),
            3 => Some(Self::Data),
            4 => Some(Self::Acknowledgment),
            5 => Some(Self::Error),
            _ => None,
        }
    }

    /// Convert the opcode to its u16 representation
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get the human-readable name of the opcode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpOpcode;
    ///
    /// assert_eq!(TftpOpcode::WriteRequest.name(), "WRQ");
    /// assert_eq!(TftpOpcode::Acknowledgment.name(), "ACK");
    /// ```
    pub fn name(self) -> &'static str {
        match self {
            Self::ReadRequest => "RRQ",
            Self::WriteRequest => "WRQ",
            Self::Data => "DATA",
            Self::Acknowledgment => "ACK",
            Self::Error => "ERROR",
        }
    }
}

impl From<TftpOpcode> for u16 {
    fn from(opcode: TftpOpcode) -> Self {
        opcode.as_u16()
    }
}

impl fmt::Display for TftpOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// TFTP Error Codes
///
/// Standard error codes as defined in RFC 1350.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TftpErrorCode {
    /// Error code 0: Not defined, see error message
    NotDefined = 0,

    /// Error code 1: File not found
    FileNotFound = 1,

    /// Error code 2: Access violation
    ///
    /// Includes requests for paths outside the served root.
    AccessViolation = 2,

    /// Error code 3: Disk full or allocation exceeded
    DiskFull = 3,

    /// Error code 4: Illegal TFTP operation
    ///
    /// Used for out-of-sequence blocks, unexpected packets and unsupported modes.
    IllegalOperation = 4,

    /// Error code 5: Unknown transfer ID
    UnknownTransferId = 5,

    /// Error code 6: File already exists
    FileAlreadyExists = 6,

    /// Error code 7: No such user
    NoSuchUser = 7,
}

impl TftpErrorCode {
    /// Convert a u16 value to a TftpErrorCode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpErrorCode;
    ///
    /// assert_eq!(TftpErrorCode::from_u16(3), Some(TftpErrorCode::DiskFull));
    /// assert_eq!(TftpErrorCode::from_u16(8), None);
    /// ```
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::NotDefined),
            1 => Some(Self::FileNotFound),
            2 => Some(Self::AccessViolation),
            3 => Some(Self::DiskFull),
            4 => Some(Self::IllegalOperation),
            5 => Some(Self::UnknownTransferId),
            6 => Some(Self::FileAlreadyExists),
            7 => Some(Self::NoSuchUser),
            _ => None,
        }
    }

    /// Convert the error code to its u16 representation
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get the default error message for this error code
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpErrorCode;
    ///
    /// assert_eq!(TftpErrorCode::FileNotFound.default_message(), "File not found");
    /// assert_eq!(TftpErrorCode::DiskFull.default_message(), "Disk full or allocation exceeded");
    /// ```
    pub fn default_message(self) -> &'static str {
        match self {
            Self::NotDefined => "Not defined",
            Self::FileNotFound => "File not found",
            Self::AccessViolation => "Access violation",
            Self::DiskFull => "Disk full or allocation exceeded",
            Self::IllegalOperation => "Illegal TFTP operation",
            Self::UnknownTransferId => "Unknown transfer ID",
            Self::FileAlreadyExists => "File already exists",
            Self::NoSuchUser => "No such user",
        }
    }

    /// Describe a raw error code received off the wire
    pub fn describe(code: u16) -> &'static str {
        Self::from_u16(code).map_or("Unknown error code", Self::default_message)
    }
}

impl From<TftpErrorCode> for u16 {
    fn from(error_code: TftpErrorCode) -> Self {
        error_code.as_u16()
    }
}

impl fmt::Display for TftpErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.default_message(), self.as_u16())
    }
}

/// TFTP Transfer Modes
///
/// Only binary (octet) mode is served. Requests naming any other mode are
/// refused with [`TftpErrorCode::IllegalOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferMode {
    /// Binary mode (octet)
    ///
    /// Data is transferred as-is without any character set conversion.
    Octet,
}

impl TransferMode {
    /// Parse a transfer mode from a string
    ///
    /// The comparison is case-insensitive.
    ///
    /// # Examples
    /// ```
    /// use tftp::TransferMode;
    ///
    /// assert_eq!(TransferMode::from_str_opt("OCTET"), Some(TransferMode::Octet));
    /// assert_eq!(TransferMode::from_str_opt("netascii"), None);
    /// ```
    pub fn from_str_opt(s: &str) -> Option<Self> {
        s.eq_ignore_ascii_case("octet").then_some(Self::Octet)
    }

    /// Get the string representation of the transfer mode
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Octet => "octet",
        }
    }
}

impl FromStr for TransferMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_opt(s).ok_or_else(|| format!("Unsupported transfer mode: {}", s))
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction of a transfer, as named by the request opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// The client reads a file from the server (RRQ)
    Read,
    /// The client writes a file to the server (WRQ)
    Write,
}

impl RequestKind {
    /// Get the opcode carrying this kind of request
    pub fn opcode(self) -> TftpOpcode {
        match self {
            Self::Read => TftpOpcode::ReadRequest,
            Self::Write => TftpOpcode::WriteRequest,
        }
    }
}

/// TFTP Request (RRQ/WRQ) representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TftpRequest {
    /// Whether the client reads or writes
    pub kind: RequestKind,
    /// Requested filename, relative to the served root
    pub filename: String,
    /// Transfer mode exactly as sent by the client
    pub mode: String,
}

impl TftpRequest {
    /// Create a new read request
    ///
    /// # Examples
    /// ```
    /// use tftp::{RequestKind, TftpRequest};
    ///
    /// let request = TftpRequest::read_request("boot.img", "octet");
    /// assert_eq!(request.kind, RequestKind::Read);
    /// assert_eq!(request.filename, "boot.img");
    /// ```
    pub fn read_request(filename: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Read,
            filename: filename.into(),
            mode: mode.into(),
        }
    }

    /// Create a new write request
    pub fn write_request(filename: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Write,
            filename: filename.into(),
            mode: mode.into(),
        }
    }

    /// Parse the requested transfer mode
    pub fn transfer_mode(&self) -> Option<TransferMode> {
        TransferMode::from_str_opt(&self.mode)
    }
}

/// A decoded TFTP packet
///
/// The opcode alone decides which fields are present, so each packet kind is
/// its own variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// RRQ or WRQ
    Request(TftpRequest),
    /// DATA carrying `payload` for `block`
    Data { block: u16, payload: Vec<u8> },
    /// ACK for `block`
    Ack { block: u16 },
    /// ERROR with a raw code and human-readable message
    Error { code: u16, message: String },
}

impl Packet {
    /// Build an ERROR packet with the default message for `code`
    ///
    /// # Examples
    /// ```
    /// use tftp::{Packet, TftpErrorCode};
    ///
    /// let packet = Packet::error(TftpErrorCode::FileNotFound);
    /// assert_eq!(packet, Packet::Error { code: 1, message: "File not found".to_string() });
    /// ```
    pub fn error(code: TftpErrorCode) -> Self {
        Self::error_with_message(code, code.default_message())
    }

    /// Build an ERROR packet with a custom message
    pub fn error_with_message(code: TftpErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.as_u16(),
            message: message.into(),
        }
    }

    /// Get the opcode of this packet
    pub fn opcode(&self) -> TftpOpcode {
        match self {
            Self::Request(request) => request.kind.opcode(),
            Self::Data { .. } => TftpOpcode::Data,
            Self::Ack { .. } => TftpOpcode::Acknowledgment,
            Self::Error { .. } => TftpOpcode::Error,
        }
    }

    /// Serialize the packet into its wire representation
    pub fn encode(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(self.encoded_len());
        v.extend_from_slice(&self.opcode().as_u16().to_be_bytes());

        match self {
            Self::Request(request) => {
                v.extend_from_slice(request.filename.as_bytes());
                v.push(0);
                v.extend_from_slice(request.mode.as_bytes());
                v.push(0);
            }
            Self::Data { block, payload } => {
                v.extend_from_slice(&block.to_be_bytes());
                v.extend_from_slice(payload);
            }
            Self::Ack { block } => {
                v.extend_from_slice(&block.to_be_bytes());
            }
            Self::Error { code, message } => {
                v.extend_from_slice(&code.to_be_bytes());
                v.extend_from_slice(message.as_bytes());
                v.push(0);
            }
        }

        v
    }

    fn encoded_len(&self) -> usize {
        match self {
            Self::Request(request) => 2 + request.filename.len() + 1 + request.mode.len() + 1,
            Self::Data { payload, .. } => HEADER_SIZE + payload.len(),
            Self::Ack { .. } => HEADER_SIZE,
            Self::Error { message, .. } => HEADER_SIZE + message.len() + 1,
        }
    }

    /// Parse a packet from a received datagram
    ///
    /// Bytes following the mode string of a request (RFC 2347 options) are
    /// ignored.
    ///
    /// # Examples
    /// ```
    /// use tftp::Packet;
    ///
    /// let packet = Packet::decode(&[0, 4, 0, 7]).unwrap();
    /// assert_eq!(packet, Packet::Ack { block: 7 });
    ///
    /// assert!(Packet::decode(&[0, 4, 0]).is_err());
    /// ```
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < HEADER_SIZE {
            return Err(DecodeError::Malformed("packet shorter than 4 bytes"));
        }

        let raw_opcode = u16::from_be_bytes([buf[0], buf[1]]);
        let opcode = TftpOpcode::from_u16(raw_opcode).ok_or(DecodeError::UnrecognizedOpcode(raw_opcode))?;

        match opcode {
            TftpOpcode::ReadRequest => parse_request(RequestKind::Read, buf),
            TftpOpcode::WriteRequest => parse_request(RequestKind::Write, buf),
            TftpOpcode::Data => {
                let payload = &buf[HEADER_SIZE..];
                if payload.len() > BLOCK_SIZE {
                    return Err(DecodeError::Malformed("data payload exceeds block size"));
                }
                Ok(Self::Data {
                    block: read_u16(buf),
                    payload: payload.to_vec(),
                })
            }
            TftpOpcode::Acknowledgment => Ok(Self::Ack { block: read_u16(buf) }),
            TftpOpcode::Error => {
                if buf.len() < HEADER_SIZE + 1 {
                    return Err(DecodeError::Malformed("error packet shorter than 5 bytes"));
                }
                let msg_bytes = &buf[HEADER_SIZE..];
                let end = find_zero(msg_bytes, 0).unwrap_or(msg_bytes.len());
                Ok(Self::Error {
                    code: read_u16(buf),
                    message: String::from_utf8_lossy(&msg_bytes[..end]).into_owned(),
                })
            }
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(request) => write!(
                f,
                "{} '{}' ({})",
                request.kind.opcode(),
                request.filename,
                request.mode
            ),
            Self::Data { block, payload } => write!(f, "DATA #{} ({} bytes)", block, payload.len()),
            Self::Ack { block } => write!(f, "ACK #{}", block),
            Self::Error { code, message } => write!(f, "ERROR {}: {}", code, message),
        }
    }
}

/// Find the next null byte in a buffer starting from a given position
pub fn find_zero(buf: &[u8], start: usize) -> Option<usize> {
    buf.get(start..)?.iter().position(|&b| b == 0).map(|pos| start + pos)
}

/// Read the big-endian u16 that follows the opcode.
///
/// Callers have already checked `buf.len() >= HEADER_SIZE`.
fn read_u16(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[2], buf[3]])
}

fn parse_request(kind: RequestKind, buf: &[u8]) -> Result<Packet, DecodeError> {
    let mut i = 2;

    let fname_end = find_zero(buf, i).ok_or(DecodeError::Malformed("filename not terminated"))?;
    let filename = std::str::from_utf8(&buf[i..fname_end])
        .map_err(|_| DecodeError::Malformed("filename is not valid UTF-8"))?
        .to_string();
    i = fname_end + 1;

    let mode_end = find_zero(buf, i).ok_or(DecodeError::Malformed("mode not terminated"))?;
    let mode = std::str::from_utf8(&buf[i..mode_end])
        .map_err(|_| DecodeError::Malformed("mode is not valid UTF-8"))?
        .to_string();

    Ok(Packet::Request(TftpRequest { kind, filename, mode }))
}
