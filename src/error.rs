//! Error types for the SOCKS4 tunnel.

use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::describe_status;

/// Result type alias using the tunnel's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Malformed reply bytes at the codec boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("reply must be exactly {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("reply null byte is 0x{0:02x}, expected 0x00")]
    NullByte(u8),

    #[error("reply could not be unpacked: {0}")]
    Unpack(String),
}

/// Errors that end a tunnel attempt.
#[derive(Error, Debug)]
pub enum Error {
    // Connect phase
    #[error("proxy {addr} unreachable: {source}")]
    ProxyUnreachable {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("destination {host} has no IPv4 address: {reason}")]
    AddressError { host: String, reason: String },

    #[error("identifier must not contain a NUL byte")]
    InvalidIdentifier,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to encode SOCKS4 request: {0}")]
    Encode(#[source] io::Error),

    // Handshake phase
    #[error("failed to send SOCKS4 request: {0}")]
    HandshakeWriteError(#[source] io::Error),

    #[error("no complete SOCKS4 reply within {0:?}")]
    ReplyTimeout(Duration),

    #[error("SOCKS4 reply truncated: proxy closed after {received} of 8 bytes")]
    ShortReply { received: usize },

    #[error("failed to read SOCKS4 reply: {0}")]
    ReplyReadError(#[source] io::Error),

    #[error("proxy rejected the request, code {0} ({})", describe_status(*.0))]
    ProxyRejected(u8),

    #[error("malformed SOCKS4 reply: {0}")]
    Decode(#[from] DecodeError),

    // Relay phase
    #[error("relay failed: {0}")]
    RelayError(#[source] io::Error),
}
