//! SOCKS5 wire format: field values, canonical replies and a bounds-checked
//! reader for decoding client messages.

use crate::error::{Result, Socks5Error};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// RSV: Fields marked RESERVED (RSV) must be set to X'00'.
pub const RSV: u8 = 0x00;

/// Largest message a client sends before the relay starts: a
/// sub-negotiation with two 255-byte fields
pub const MAX_MESSAGE: usize = 1 + 1 + 255 + 1 + 255;

/// Reply sent when none of the offered methods is acceptable
pub const METHOD_NO_ACCEPTABLE: [u8; 2] = [Version::SOCKS5 as u8, AuthMethod::NoAcceptable as u8];

/// Username/password sub-negotiation replies
pub const AUTH_SUCCESS: [u8; 2] = [Version::SOCKS5 as u8, AuthStatus::Success as u8];
pub const AUTH_FAILURE: [u8; 2] = [Version::SOCKS5 as u8, AuthStatus::Failure as u8];

pub const REPLY_COMMAND_NOT_SUPPORTED: [u8; 10] = failure_reply(ReplyCode::CommandNotSupported);
pub const REPLY_HOST_UNREACHABLE: [u8; 10] = failure_reply(ReplyCode::HostUnreachable);

// Unsupported address families reuse the command-not-supported bytes
pub const REPLY_ADDR_TYPE_NOT_SUPPORTED: [u8; 10] = REPLY_COMMAND_NOT_SUPPORTED;

/// failure_reply builds a reply with an all-zero IPv4 bound address
const fn failure_reply(code: ReplyCode) -> [u8; 10] {
    [
        Version::SOCKS5 as u8,
        code as u8,
        RSV,
        AddressType::IPv4 as u8,
        0,
        0,
        0,
        0,
        0,
        0,
    ]
}

/// Version represents available SOCKS proxy versions
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Version {
    SOCKS5 = 0x05,
}

/// AuthMethod represents the SOCKS5 authentication methods this
/// server knows about
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    NoAuth = 0x00,
    // Gssapi = 0x01, not implemented
    UserPass = 0x02,
    // 0x03 - 0x7f: IANA reserved
    // 0x80 - 0xFE: private methods
    NoAcceptable = 0xFF,
}

impl AuthMethod {
    /// from_byte converts a byte to its related authentication method
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(AuthMethod::NoAuth),
            0x02 => Some(AuthMethod::UserPass),
            0xFF => Some(AuthMethod::NoAcceptable),
            _ => None,
        }
    }

    /// selection_reply is the method selection message announcing this method
    pub fn selection_reply(self) -> [u8; 2] {
        [Version::SOCKS5 as u8, self as u8]
    }
}

/// AuthStatus is the STATUS field of the username/password reply
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AuthStatus {
    Success = 0x00,
    Failure = 0x01,
}

/// Command represents SOCKS5 protocol commands
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Connect = 0x01,
    Bind = 0x02,
    UdpAssociate = 0x03,
}

impl Command {
    /// from_byte converts a byte to its related SOCKS5 protocol command
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Command::Connect),
            0x02 => Some(Command::Bind),
            0x03 => Some(Command::UdpAssociate),
            _ => None,
        }
    }
}

/// AddressType represents the SOCKS5 address types:
/// IPv4, Domain Name, IPv6
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AddressType {
    IPv4 = 0x01,
    DomainName = 0x03,
    IPv6 = 0x04,
}

impl AddressType {
    /// from_byte converts a byte to its related network address type
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(AddressType::IPv4),
            0x03 => Some(AddressType::DomainName),
            0x04 => Some(AddressType::IPv6),
            _ => None,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReplyCode {
    Succeeded = 0x00,
    HostUnreachable = 0x04,
    CommandNotSupported = 0x07,
}

/// connect_reply builds the CONNECT success reply carrying the local
/// address of the outbound socket
pub fn connect_reply(bound_addr: SocketAddr) -> Vec<u8> {
    // SOCKS5 reply format
    // +----+-----+-------+------+----------+----------+
    // |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+
    let mut reply = Vec::with_capacity(22);
    reply.extend_from_slice(&[Version::SOCKS5 as u8, ReplyCode::Succeeded as u8, RSV]);

    match bound_addr {
        SocketAddr::V4(addr) => {
            reply.push(AddressType::IPv4 as u8);
            reply.extend_from_slice(&addr.ip().octets());
            reply.extend_from_slice(&addr.port().to_be_bytes());
        }
        SocketAddr::V6(addr) => {
            reply.push(AddressType::IPv6 as u8);
            reply.extend_from_slice(&addr.ip().octets());
            reply.extend_from_slice(&addr.port().to_be_bytes());
        }
    }

    reply
}

/// Cursor reads fields front to back out of a received message, failing
/// instead of reading past its end
#[derive(Debug)]
pub struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// remaining is the number of unread bytes
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// take returns the next `len` bytes and advances past them
    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(Socks5Error::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }

        let field = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(field)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// read_u16 reads a big-endian (network order) u16
    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// read_prefixed reads a one-byte length followed by that many bytes
    pub fn read_prefixed(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u8()? as usize;
        self.take(len)
    }

    /// finish fails if anything is left after the last field
    pub fn finish(&self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            extra => Err(Socks5Error::TrailingBytes { extra }),
        }
    }
}

/// read_message performs a single read from the client and returns the
/// bytes received; every handshake message is expected in one read
pub async fn read_message<'b, S>(stream: &mut S, buf: &'b mut [u8]) -> Result<&'b [u8]>
where
    S: AsyncRead + Unpin,
{
    let n = stream.read(buf).await?;
    if n == 0 {
        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
    }
    Ok(&buf[..n])
}

/// write_message writes a complete protocol message and flushes it
pub async fn write_message<S>(stream: &mut S, message: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(message).await?;
    stream.flush().await?;
    Ok(())
}
