//! TFTP Daemon Library
//!
//! Support code for the `tftpd` executable, which serves a single directory
//! over TFTP using the [`tftp`] crate.

pub mod util;

pub use tftp;
