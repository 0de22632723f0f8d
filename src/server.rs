use crate::{
    address::{Resolver, SystemResolver},
    auth::{self, AuthConfig},
    commands,
    error::Result,
    relay::{self, RelayStats},
};
use anyhow::bail;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
};
use tracing::{Instrument, error, info, info_span};

/// Socks5Server represents a SOCKS5 server and houses related
/// configuration data
pub struct Socks5Server<R = SystemResolver> {
    pub listen_addr: String,
    auth_config: Arc<AuthConfig>,
    resolver: Arc<R>,
    listener: Option<TcpListener>,
}

impl Socks5Server {
    /// new is a constructor for the Socks5Server type. Clients are accepted
    /// without authentication until [`Socks5Server::with_auth`] says otherwise
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            auth_config: Arc::new(AuthConfig::no_auth()),
            resolver: Arc::new(SystemResolver),
            listener: None,
        }
    }
}

impl<R> Socks5Server<R>
where
    R: Resolver + Send + Sync + 'static,
{
    /// with_auth applies the authentication policy shared by all connections
    pub fn with_auth(mut self, auth_config: AuthConfig) -> Self {
        self.auth_config = Arc::new(auth_config);
        self
    }

    /// with_resolver replaces the resolver used for domain name requests
    pub fn with_resolver<T>(self, resolver: T) -> Socks5Server<T>
    where
        T: Resolver + Send + Sync + 'static,
    {
        Socks5Server {
            listen_addr: self.listen_addr,
            auth_config: self.auth_config,
            resolver: Arc::new(resolver),
            listener: self.listener,
        }
    }

    pub fn auth_config(&self) -> &AuthConfig {
        &self.auth_config
    }

    /// bind to the listen address and return the address actually bound
    pub async fn bind(&mut self) -> anyhow::Result<SocketAddr> {
        if self.listener.is_some() {
            bail!("already bound to {}", self.listen_addr);
        }

        // Instantiate tokio listener
        let listener = TcpListener::bind(&self.listen_addr).await?;
        let addr = listener.local_addr()?;

        info!("SOCKS5 proxy listening on {}", addr);

        self.listener = Some(listener);
        Ok(addr)
    }

    /// run handles server spinup and listens for incoming connections
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => {
                self.bind().await?;
                match self.listener.take() {
                    Some(listener) => listener,
                    None => bail!("listener missing after bind"),
                }
            }
        };

        // Listen for connections to proxy
        loop {
            // Accept incoming connection
            let (inbound, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("accept failed: {}", e);
                    continue;
                }
            };

            // Clone for this connection
            let auth_config = self.auth_config.clone();
            let resolver = self.resolver.clone();

            // Spawn async task
            tokio::spawn(
                async move {
                    info!("new client");

                    // Send connection to connection handler
                    let result =
                        handle_connection(inbound, &auth_config, resolver.as_ref()).await;
                    if let Err(e) = result {
                        error!("connection error: {}", e);
                    }
                }
                .instrument(info_span!("conn", peer = %peer_addr)),
            );
        }
    }
}

/// handle_connection runs the full SOCKS5 exchange for one client: method
/// negotiation, authentication, the request, and finally the relay
pub async fn handle_connection<S, R>(
    mut stream: S,
    auth_config: &AuthConfig,
    resolver: &R,
) -> Result<RelayStats>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    R: Resolver,
{
    // Negotiate authentication with client
    let method = auth::negotiate(&mut stream, auth_config).await?;
    auth::authenticate(&mut stream, auth_config, method).await?;

    // Handle connection request from client
    let destination = commands::dispatch(&mut stream, resolver).await?;
    let outbound = commands::connect(&mut stream, destination).await?;

    // Proxy
    relay::run(stream, outbound).await
}
