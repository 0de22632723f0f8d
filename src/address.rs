use crate::error::{Result, Socks5Error};
use crate::protocol::{AddressType, Cursor};
use std::fmt;
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4};
use tracing::debug;

/// AddressSpec is the destination address as the client sent it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressSpec {
    Ipv4(Ipv4Addr),
    DomainName(String),
    /// Decoded but never resolved: IPv6 destinations are not supported
    Ipv6(Ipv6Addr),
}

impl AddressSpec {
    /// decode reads DST.ADDR for the given ATYP byte
    pub fn decode(atyp: u8, cursor: &mut Cursor<'_>) -> Result<Self> {
        match AddressType::from_byte(atyp) {
            Some(AddressType::IPv4) => {
                Ok(AddressSpec::Ipv4(Ipv4Addr::from(cursor.read_array::<4>()?)))
            }
            Some(AddressType::DomainName) => {
                // First octet in DomainName contains the number of
                // octets to follow
                let name = cursor.read_prefixed()?;
                let name = std::str::from_utf8(name).map_err(|_| Socks5Error::InvalidDomain)?;
                Ok(AddressSpec::DomainName(name.to_owned()))
            }
            Some(AddressType::IPv6) => {
                Ok(AddressSpec::Ipv6(Ipv6Addr::from(cursor.read_array::<16>()?)))
            }
            None => Err(Socks5Error::AddressTypeNotSupported { atyp }),
        }
    }
}

impl fmt::Display for AddressSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressSpec::Ipv4(ip) => write!(f, "{ip}"),
            AddressSpec::DomainName(name) => f.write_str(name),
            AddressSpec::Ipv6(ip) => write!(f, "[{ip}]"),
        }
    }
}

/// Destination is a resolved CONNECT target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub address: Ipv4Addr,
    pub port: u16,
}

impl Destination {
    pub fn new(address: Ipv4Addr, port: u16) -> Self {
        Self { address, port }
    }
}

impl From<Destination> for SocketAddr {
    fn from(dest: Destination) -> Self {
        SocketAddr::V4(SocketAddrV4::new(dest.address, dest.port))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Resolver looks up the addresses of a host name
pub trait Resolver {
    fn lookup(&self, host: &str) -> impl Future<Output = io::Result<Vec<IpAddr>>> + Send;
}

/// SystemResolver uses the operating system's resolver through tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn lookup(&self, host: &str) -> impl Future<Output = io::Result<Vec<IpAddr>>> + Send {
        let host = host.to_owned();
        async move {
            let addrs = tokio::net::lookup_host((host.as_str(), 0)).await?;
            Ok(addrs.map(|addr| addr.ip()).collect())
        }
    }
}

/// resolve turns a requested address into a dialable IPv4 destination
pub async fn resolve<R>(resolver: &R, spec: AddressSpec, port: u16) -> Result<Destination>
where
    R: Resolver,
{
    match spec {
        AddressSpec::Ipv4(ip) => Ok(Destination::new(ip, port)),
        AddressSpec::DomainName(host) => {
            let addrs = match resolver.lookup(&host).await {
                Ok(addrs) => addrs,
                Err(e) => {
                    debug!("lookup of {host:?} failed: {e}");
                    return Err(Socks5Error::CannotResolve { host });
                }
            };

            // Only the first answer is considered, even if a later one is IPv4
            match addrs.first() {
                None => Err(Socks5Error::CannotResolve { host }),
                Some(IpAddr::V4(ip)) => {
                    debug!("resolved {host:?} into {ip}:{port}");
                    Ok(Destination::new(*ip, port))
                }
                Some(IpAddr::V6(_)) => Err(Socks5Error::AddressTypeNotSupported {
                    atyp: AddressType::IPv6 as u8,
                }),
            }
        }
        AddressSpec::Ipv6(_) => Err(Socks5Error::AddressTypeNotSupported {
            atyp: AddressType::IPv6 as u8,
        }),
    }
}
