//! A lightweight SOCKS5 proxy library
//!
//! ## SOCKS5 Implementation
//!
//! - Features:
//!     - CONNECT to IPv4 addresses and domain names resolving to IPv4
//!     - No Authentication
//!     - Username/Password Authentication against a fixed set of users
//!     - Async using tokio, one task per client and one per relay direction
//! - Not supported: BIND, UDP ASSOCIATE and IPv6 destinations are refused
//!   with an explicit reply
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//! - [Username/Password Authentication (RFC 1929)](https://datatracker.ietf.org/doc/html/rfc1929)
//!
//! # Example
//! ```no_run
//! use minisocks::{AuthConfig, Credential, Socks5Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let auth = AuthConfig::user_pass([Credential::new("user", "pass")]);
//!     let mut server = Socks5Server::new("127.0.0.1:1080").with_auth(auth);
//!     server.run().await
//! }
//! ```

pub mod address;
pub mod auth;
pub mod commands;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod server;

// Re-export main types at crate root for convenience
pub use address::{AddressSpec, Destination, Resolver, SystemResolver};
pub use auth::{AuthConfig, Credential};
pub use error::Socks5Error;
pub use protocol::{AuthMethod, Command, ReplyCode, Version};
pub use relay::RelayStats;
pub use server::{Socks5Server, handle_connection};
