use crate::address::Destination;
use crate::protocol::{
    REPLY_ADDR_TYPE_NOT_SUPPORTED, REPLY_COMMAND_NOT_SUPPORTED, REPLY_HOST_UNREACHABLE,
};
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Socks5Error>;

/// Socks5Error covers every way a single client connection can fail
#[derive(Error, Debug)]
pub enum Socks5Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid SOCKS version: expected 5, got {got}")]
    InvalidVersion { got: u8 },

    #[error("NMETHODS declares {declared} methods but {actual} were sent")]
    MethodCountMismatch { declared: usize, actual: usize },

    #[error("message truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("{extra} unexpected bytes after the message")]
    TrailingBytes { extra: usize },

    #[error("domain name is not valid UTF-8")]
    InvalidDomain,

    #[error("no acceptable authentication method")]
    NoAcceptableMethod,

    #[error("authentication method 0x{method:02X} is not supported")]
    MethodNotSupported { method: u8 },

    #[error("authentication failed for user {username:?}")]
    AuthFailed { username: String },

    #[error("command 0x{code:02X} is not supported")]
    CommandNotSupported { code: u8 },

    #[error("address type 0x{atyp:02X} is not supported")]
    AddressTypeNotSupported { atyp: u8 },

    #[error("cannot resolve {host:?}")]
    CannotResolve { host: String },

    #[error("cannot reach {destination}: {source}")]
    HostUnreachable {
        destination: Destination,
        source: io::Error,
    },
}

impl Socks5Error {
    /// reply returns the request reply owed to the client for this error,
    /// if the protocol defines one
    pub fn reply(&self) -> Option<&'static [u8]> {
        match self {
            Socks5Error::CommandNotSupported { .. } => Some(&REPLY_COMMAND_NOT_SUPPORTED),
            Socks5Error::AddressTypeNotSupported { .. } => Some(&REPLY_ADDR_TYPE_NOT_SUPPORTED),
            Socks5Error::CannotResolve { .. } | Socks5Error::HostUnreachable { .. } => {
                Some(&REPLY_HOST_UNREACHABLE)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_request_failures_carry_a_reply() {
        let err = Socks5Error::CommandNotSupported { code: 2 };
        assert_eq!(err.reply(), Some(&REPLY_COMMAND_NOT_SUPPORTED[..]));

        let err = Socks5Error::CannotResolve {
            host: "nowhere.invalid".into(),
        };
        assert_eq!(err.reply(), Some(&REPLY_HOST_UNREACHABLE[..]));

        assert!(Socks5Error::NoAcceptableMethod.reply().is_none());
        assert!(Socks5Error::Truncated { needed: 2, remaining: 0 }.reply().is_none());
        assert!(Socks5Error::TrailingBytes { extra: 5 }.reply().is_none());
    }

    #[test]
    fn auth_failure_names_username_only() {
        let err = Socks5Error::AuthFailed {
            username: "alice".into(),
        };
        assert_eq!(err.to_string(), "authentication failed for user \"alice\"");
    }
}
