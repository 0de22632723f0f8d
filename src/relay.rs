use crate::error::Result;
use crate::protocol::{connect_reply, write_message};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Size of the chunk each direction copies at a time
const CHUNK_SIZE: usize = 8192;

/// RelayStats counts the bytes copied in each direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub from_client: u64,
    pub from_server: u64,
}

/// run answers a successful CONNECT and then relays bytes between the client
/// and the destination until either side closes or fails
pub async fn run<C>(mut client: C, outbound: TcpStream) -> Result<RelayStats>
where
    C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    // The reply carries the address the destination sees us connecting from
    let bound_addr = outbound.local_addr()?;
    write_message(&mut client, &connect_reply(bound_addr)).await?;

    let (client_read, client_write) = tokio::io::split(client);
    let (server_read, server_write) = outbound.into_split();

    let from_client = Arc::new(AtomicU64::new(0));
    let from_server = Arc::new(AtomicU64::new(0));

    let mut tasks = JoinSet::new();
    tasks.spawn(forward(client_read, server_write, "client", from_client.clone()));
    tasks.spawn(forward(server_read, client_write, "server", from_server.clone()));

    // Whichever direction ends first tears the pair down: aborting the other
    // task drops the remaining halves, which closes both sockets
    if let Some(Ok(Err(e))) = tasks.join_next().await {
        debug!("relay stopped: {e}");
    }
    tasks.shutdown().await;

    let stats = RelayStats {
        from_client: from_client.load(Ordering::Relaxed),
        from_server: from_server.load(Ordering::Relaxed),
    };

    info!(
        "connection closed: {} bytes from client, {} bytes from server",
        stats.from_client, stats.from_server
    );

    Ok(stats)
}

/// forward copies chunks from `reader` to `writer` verbatim until EOF or
/// an error on either side
async fn forward<R, W>(
    mut reader: R,
    mut writer: W,
    from: &'static str,
    count: Arc<AtomicU64>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            debug!("{from} closed its side");
            return Ok(());
        }

        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        count.fetch_add(n as u64, Ordering::Relaxed);
    }
}
