use crate::address::{self, AddressSpec, Destination, Resolver};
use crate::error::{Result, Socks5Error};
use crate::protocol::{Command, Cursor, MAX_MESSAGE, Version, read_message, write_message};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// ConnectRequest is a decoded CONNECT request, not yet resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub address: AddressSpec,
    pub port: u16,
}

/// parse_request decodes a client request. Only CONNECT is accepted and the
/// command is checked before the address is looked at
pub fn parse_request(request: &[u8]) -> Result<ConnectRequest> {
    // SOCKS5 request format
    // +----+-----+-------+------+----------+----------+
    // |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+
    let mut cursor = Cursor::new(request);

    // Ensure version is 0x05 -> SOCKS5
    let version = cursor.read_u8()?;
    if version != Version::SOCKS5 as u8 {
        return Err(Socks5Error::InvalidVersion { got: version });
    }

    let code = cursor.read_u8()?;
    match Command::from_byte(code) {
        Some(Command::Connect) => {}
        Some(Command::Bind) | Some(Command::UdpAssociate) | None => {
            return Err(Socks5Error::CommandNotSupported { code });
        }
    }

    // Not validating RSV (RESERVED) -> 0x00
    let _rsv = cursor.read_u8()?;

    let atyp = cursor.read_u8()?;
    let address = AddressSpec::decode(atyp, &mut cursor)?;
    let port = cursor.read_u16()?;

    // Nothing may follow DST.PORT: the relay has not started yet
    cursor.finish()?;

    Ok(ConnectRequest { address, port })
}

/// dispatch reads the client's request and resolves its destination. When
/// the request fails in a way the protocol has a reply for, that reply is
/// written before the error is returned
pub async fn dispatch<S, R>(stream: &mut S, resolver: &R) -> Result<Destination>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: Resolver,
{
    let mut buf = [0u8; MAX_MESSAGE];
    let request = read_message(stream, &mut buf).await?;
    debug!("got request {:?}", request);

    let result = match parse_request(request) {
        Ok(req) => {
            debug!("client asks for {}:{}", req.address, req.port);
            address::resolve(resolver, req.address, req.port).await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(destination) => Ok(destination),
        Err(e) => {
            if let Some(reply) = e.reply() {
                write_message(stream, reply).await?;
            }
            Err(e)
        }
    }
}

/// connect opens the outbound connection for a dispatched request. There is
/// no deadline on the dial
pub async fn connect<S>(stream: &mut S, destination: Destination) -> Result<TcpStream>
where
    S: AsyncWrite + Unpin,
{
    match TcpStream::connect(std::net::SocketAddr::from(destination)).await {
        Ok(outbound) => {
            info!(
                "opened connection from {} to {}",
                outbound.local_addr()?,
                destination
            );
            Ok(outbound)
        }
        Err(source) => {
            let e = Socks5Error::HostUnreachable {
                destination,
                source,
            };
            if let Some(reply) = e.reply() {
                write_message(stream, reply).await?;
            }
            Err(e)
        }
    }
}
