//! SOCKS4 CONNECT framing.
//!
//! ```text
//! request:  VN(1)=4 | CD(1)=1 | DSTPORT(2) | DSTIP(4) | USERID(N) | NULL(1)
//! reply:    VN(1)   | CD(1)   | DSTPORT(2) | DSTIP(4)
//! ```
//!
//! Multi-byte fields are big-endian. Nothing here touches a socket.

use crate::error::{DecodeError, Error, Result};
use std::net::Ipv4Addr;

pub const SOCKS4_VERSION: u8 = 0x04;
pub const TCP_CONNECT_COMMAND_CODE: u8 = 0x01;

pub const TCP_CONNECT_RESPONSE_OK: u8 = 0x5a;
pub const TCP_CONNECT_RESPONSE_REJECTED: u8 = 0x5b;
pub const TCP_CONNECT_RESPONSE_NO_IDENTD: u8 = 0x5c;
pub const TCP_CONNECT_RESPONSE_IDENTD_MISMATCH: u8 = 0x5d;

/// Length of the fixed request header and of the whole reply.
pub const HEADER_LEN: usize = 8;
pub const REPLY_LEN: usize = 8;

/// Outcome carried by the CD field of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Granted,
    Rejected(u8),
}

impl ReplyStatus {
    pub fn from_code(code: u8) -> Self {
        if code == TCP_CONNECT_RESPONSE_OK {
            ReplyStatus::Granted
        } else {
            ReplyStatus::Rejected(code)
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, ReplyStatus::Granted)
    }
}

/// Human readable meaning of a reply code, for diagnostics.
pub fn describe_status(code: u8) -> &'static str {
    match code {
        TCP_CONNECT_RESPONSE_OK => "request granted",
        TCP_CONNECT_RESPONSE_REJECTED => "request rejected or failed",
        TCP_CONNECT_RESPONSE_NO_IDENTD => "identd not reachable from proxy",
        TCP_CONNECT_RESPONSE_IDENTD_MISMATCH => "identd reported a different user id",
        _ => "unknown reply code",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    destination_port: u16,
    destination_address: Ipv4Addr,
    identifier: Vec<u8>,
}

impl ConnectRequest {
    /// Fails if the identifier would be cut short by an embedded NUL.
    pub fn new(destination_address: Ipv4Addr, destination_port: u16, identifier: &[u8]) -> Result<Self> {
        if identifier.contains(&0) {
            return Err(Error::InvalidIdentifier);
        }
        return Ok(Self {
            destination_port,
            destination_address,
            identifier: identifier.to_vec(),
        });
    }

    pub fn destination_port(&self) -> u16 {
        self.destination_port
    }

    pub fn destination_address(&self) -> Ipv4Addr {
        self.destination_address
    }

    pub fn identifier(&self) -> &[u8] {
        &self.identifier
    }

    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.identifier.len() + 1
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let s = structure!(">BBH4s");
        let mut buf: Vec<u8> = s
            .pack(
                SOCKS4_VERSION,
                TCP_CONNECT_COMMAND_CODE,
                self.destination_port,
                &self.destination_address.octets(),
            )
            .map_err(Error::Encode)?;
        buf.reserve(self.identifier.len() + 1);
        buf.extend_from_slice(&self.identifier);
        buf.push(0); // userid terminator
        return Ok(buf);
    }
}

/// Build the CONNECT request for an already resolved IPv4 destination.
pub fn encode_request(destination: Ipv4Addr, port: u16, identifier: &[u8]) -> Result<Vec<u8>> {
    return ConnectRequest::new(destination, port, identifier)?.to_bytes();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectReply {
    pub null_byte: u8,
    pub status: u8,
    pub bound_port: u16,
    pub bound_address: Ipv4Addr,
}

impl ConnectReply {
    /// Decode a complete reply. With `strict` set a non-zero first byte is
    /// refused; otherwise it is ignored, since proxies disagree on it.
    pub fn decode(bytes: &[u8], strict: bool) -> std::result::Result<Self, DecodeError> {
        if bytes.len() != REPLY_LEN {
            return Err(DecodeError::Length {
                expected: REPLY_LEN,
                actual: bytes.len(),
            });
        }
        let s = structure!(">BBH4s");
        let (null_byte, status, bound_port, address) = s
            .unpack(bytes)
            .map_err(|e| DecodeError::Unpack(e.to_string()))?;
        if strict && null_byte != 0 {
            return Err(DecodeError::NullByte(null_byte));
        }
        let octets: [u8; 4] = address
            .as_slice()
            .try_into()
            .map_err(|_| DecodeError::Unpack(format!("address field is {} bytes", address.len())))?;
        return Ok(Self {
            null_byte,
            status,
            bound_port,
            bound_address: Ipv4Addr::from(octets),
        });
    }

    pub fn status(&self) -> ReplyStatus {
        ReplyStatus::from_code(self.status)
    }
}

/// Decode a reply down to the only field the client acts on.
pub fn decode_reply(bytes: &[u8], strict: bool) -> std::result::Result<ReplyStatus, DecodeError> {
    return ConnectReply::decode(bytes, strict).map(|reply| reply.status());
}
