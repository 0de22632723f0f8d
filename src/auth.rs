use crate::error::{Result, Socks5Error};
use crate::protocol::{
    AUTH_FAILURE, AUTH_SUCCESS, AuthMethod, Cursor, MAX_MESSAGE, METHOD_NO_ACCEPTABLE, Version,
    read_message, write_message,
};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// Credential is a username/password pair accepted by the server
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Never print passwords
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum CredentialParseError {
    #[error("expected USERNAME:PASSWORD")]
    MissingSeparator,
    #[error("username must not be empty")]
    EmptyUsername,
    #[error("{0} is longer than 255 bytes")]
    TooLong(&'static str),
}

/// Parses `username:password`, splitting at the first colon
impl FromStr for Credential {
    type Err = CredentialParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (username, password) = s.split_once(':').ok_or(CredentialParseError::MissingSeparator)?;
        if username.is_empty() {
            return Err(CredentialParseError::EmptyUsername);
        }

        // ULEN and PLEN are single bytes on the wire
        if username.len() > 255 {
            return Err(CredentialParseError::TooLong("username"));
        }
        if password.len() > 255 {
            return Err(CredentialParseError::TooLong("password"));
        }

        Ok(Credential::new(username, password))
    }
}

/// AuthConfig is the server's authentication policy. It is built once at
/// startup and only ever read afterwards
#[derive(Debug, Clone)]
pub struct AuthConfig {
    allowed_method: AuthMethod,
    method_response: [u8; 2],
    credentials: HashSet<Credential>,
}

impl AuthConfig {
    /// no_auth accepts every client without credentials
    pub fn no_auth() -> Self {
        Self {
            allowed_method: AuthMethod::NoAuth,
            method_response: AuthMethod::NoAuth.selection_reply(),
            credentials: HashSet::new(),
        }
    }

    /// user_pass requires one of the given username/password pairs
    pub fn user_pass(credentials: impl IntoIterator<Item = Credential>) -> Self {
        Self {
            allowed_method: AuthMethod::UserPass,
            method_response: AuthMethod::UserPass.selection_reply(),
            credentials: credentials.into_iter().collect(),
        }
    }

    pub fn allowed_method(&self) -> AuthMethod {
        self.allowed_method
    }

    /// method_response is the method selection reply sent when the client
    /// offers the allowed method
    pub fn method_response(&self) -> [u8; 2] {
        self.method_response
    }

    pub fn credentials(&self) -> &HashSet<Credential> {
        &self.credentials
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::no_auth()
    }
}

/// choose_method validates a client greeting and picks the method to use,
/// which is `NoAcceptable` when the client does not offer the allowed one
pub fn choose_method(config: &AuthConfig, greeting: &[u8]) -> Result<AuthMethod> {
    // ClientHello format
    // +----+----------+----------+
    // |VER | NMETHODS | METHODS  |
    // +----+----------+----------+
    // | 1  |    1     | 1 to 255 |
    // +----+----------+----------+
    let mut cursor = Cursor::new(greeting);

    // Ensure version is 0x05 -> SOCKS5
    let version = cursor.read_u8()?;
    if version != Version::SOCKS5 as u8 {
        return Err(Socks5Error::InvalidVersion { got: version });
    }

    // NMETHODS must account for exactly the bytes that follow it
    let declared = cursor.read_u8()? as usize;
    if cursor.remaining() != declared {
        return Err(Socks5Error::MethodCountMismatch {
            declared,
            actual: cursor.remaining(),
        });
    }
    let methods = cursor.take(declared)?;

    if methods.contains(&(config.allowed_method as u8)) {
        Ok(config.allowed_method)
    } else {
        Ok(AuthMethod::NoAcceptable)
    }
}

/// negotiate reads the client greeting and answers with the selected
/// method. A malformed greeting closes the connection without a reply
pub async fn negotiate<S>(stream: &mut S, config: &AuthConfig) -> Result<AuthMethod>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; MAX_MESSAGE];
    let greeting = read_message(stream, &mut buf).await?;

    let method = choose_method(config, greeting)?;

    // ServerChoice method selection reply format
    // +----+--------+
    // |VER | METHOD |
    // +----+--------+
    // | 1  |   1    |
    // +----+--------+
    if method == AuthMethod::NoAcceptable {
        write_message(stream, &METHOD_NO_ACCEPTABLE).await?;
        return Err(Socks5Error::NoAcceptableMethod);
    }

    write_message(stream, &config.method_response()).await?;
    debug!("client and server agreed on {:?}", method);

    Ok(method)
}

/// verify_credentials decodes a username/password request and checks it
/// against the configured credentials
pub fn verify_credentials(config: &AuthConfig, payload: &[u8]) -> Result<Credential> {
    // Client Username/Password Request
    // +----+------+----------+------+----------+
    // |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
    // +----+------+----------+------+----------+
    // | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
    // +----+------+----------+------+----------+
    if payload.len() < 4 {
        return Err(Socks5Error::Truncated {
            needed: 4,
            remaining: payload.len(),
        });
    }

    let mut cursor = Cursor::new(payload);

    // VER is not checked, clients disagree on its value
    let _ver = cursor.read_u8()?;
    let username = cursor.read_prefixed()?;
    let password = cursor.read_prefixed()?;
    cursor.finish()?;

    let credential = match (std::str::from_utf8(username), std::str::from_utf8(password)) {
        (Ok(username), Ok(password)) => Some(Credential::new(username, password)),
        _ => None,
    };

    match credential {
        Some(credential) if config.credentials.contains(&credential) => Ok(credential),
        _ => Err(Socks5Error::AuthFailed {
            username: String::from_utf8_lossy(username).into_owned(),
        }),
    }
}

/// authenticate runs the sub-negotiation for the method chosen by
/// [`negotiate`]
pub async fn authenticate<S>(stream: &mut S, config: &AuthConfig, method: AuthMethod) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match method {
        AuthMethod::NoAuth => Ok(()),
        AuthMethod::UserPass => {
            let mut buf = [0u8; MAX_MESSAGE];
            let payload = read_message(stream, &mut buf).await?;

            // Username/Password Server response
            // +----+--------+
            // |VER | STATUS |
            // +----+--------+
            // | 1  |   1    |
            // +----+--------+
            match verify_credentials(config, payload) {
                Ok(credential) => {
                    write_message(stream, &AUTH_SUCCESS).await?;
                    debug!("user {:?} authenticated", credential.username);
                    Ok(())
                }
                Err(e @ Socks5Error::AuthFailed { .. }) => {
                    write_message(stream, &AUTH_FAILURE).await?;
                    warn!("{e}");
                    Err(e)
                }
                Err(e) => Err(e),
            }
        }
        AuthMethod::NoAcceptable => Err(Socks5Error::MethodNotSupported {
            method: method as u8,
        }),
    }
}
