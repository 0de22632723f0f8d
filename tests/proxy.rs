//! End-to-end tests against a running server on a loopback port.

use minisocks::{AuthConfig, Credential, Resolver, Socks5Server};
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use test_log::test;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const DEADLINE: Duration = Duration::from_secs(5);
const COMMAND_NOT_SUPPORTED: [u8; 10] = [5, 7, 0, 1, 0, 0, 0, 0, 0, 0];
const HOST_UNREACHABLE: [u8; 10] = [5, 4, 0, 1, 0, 0, 0, 0, 0, 0];

/// FixedResolver answers every lookup with the same addresses
#[derive(Clone)]
struct FixedResolver(Vec<IpAddr>);

impl Resolver for FixedResolver {
    fn lookup(&self, _host: &str) -> impl Future<Output = io::Result<Vec<IpAddr>>> + Send {
        let answer = self.0.clone();
        async move { Ok(answer) }
    }
}

async fn start(auth: AuthConfig, resolver: FixedResolver) -> SocketAddr {
    let mut server = Socks5Server::new("127.0.0.1:0")
        .with_auth(auth)
        .with_resolver(resolver);
    let addr = server.bind().await.unwrap();
    tokio::spawn(async move { server.run().await });
    addr
}

/// echo_server echoes every connection until the peer closes
async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    let n = match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    if stream.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

async fn handshake_no_auth(proxy: SocketAddr) -> TcpStream {
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(&[5, 1, 0]).await.unwrap();
    let mut resp = [0u8; 2];
    client.read_exact(&mut resp).await.unwrap();
    assert_eq!(resp, [5, 0]);
    client
}

fn ipv4_request(cmd: u8, addr: SocketAddr) -> Vec<u8> {
    let SocketAddr::V4(addr) = addr else {
        panic!("test addresses are IPv4");
    };
    let mut req = vec![5, cmd, 0, 1];
    req.extend_from_slice(&addr.ip().octets());
    req.extend_from_slice(&addr.port().to_be_bytes());
    req
}

fn domain_request(name: &str, port: u16) -> Vec<u8> {
    let mut req = vec![5, 1, 0, 3, name.len() as u8];
    req.extend_from_slice(name.as_bytes());
    req.extend_from_slice(&port.to_be_bytes());
    req
}

/// assert_closed waits for the proxy to close the client connection with a
/// clean EOF and nothing left to read
async fn assert_closed(client: &mut TcpStream) {
    let mut rest = Vec::new();
    let read = timeout(DEADLINE, client.read_to_end(&mut rest)).await.unwrap();
    assert!(read.is_ok(), "connection was not closed cleanly: {read:?}");
    assert!(rest.is_empty(), "unexpected bytes after close: {rest:?}");
}

#[test(tokio::test)]
async fn connect_ipv4_and_relay() {
    let echo = echo_server().await;
    let proxy = start(AuthConfig::no_auth(), FixedResolver(vec![])).await;

    let mut client = handshake_no_auth(proxy).await;
    client.write_all(&ipv4_request(1, echo)).await.unwrap();

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[..4], [5, 0, 0, 1]);
    assert_eq!(reply[4..8], [127, 0, 0, 1]);
    assert_ne!(u16::from_be_bytes([reply[8], reply[9]]), 0);

    for message in [&b"Hello through SOCKS5!"[..], &[0u8, 1, 2, 0xFF][..]] {
        client.write_all(message).await.unwrap();
        let mut echoed = vec![0u8; message.len()];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(echoed, message);
    }
}

#[test(tokio::test)]
async fn connect_domain_and_relay() {
    let echo = echo_server().await;
    let proxy = start(
        AuthConfig::no_auth(),
        FixedResolver(vec!["127.0.0.1".parse().unwrap()]),
    )
    .await;

    let mut client = handshake_no_auth(proxy).await;
    client.write_all(&domain_request("echo.test", echo.port())).await.unwrap();

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0);

    client.write_all(b"domain test").await.unwrap();
    let mut echoed = [0u8; 11];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"domain test");
}

#[test(tokio::test)]
async fn destination_close_closes_client() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = listener.local_addr().unwrap();
    let proxy = start(AuthConfig::no_auth(), FixedResolver(vec![])).await;

    let mut client = handshake_no_auth(proxy).await;
    client.write_all(&ipv4_request(1, target)).await.unwrap();
    let (mut upstream, _) = listener.accept().await.unwrap();

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0);

    upstream.write_all(b"bye").await.unwrap();
    drop(upstream);

    let mut received = Vec::new();
    timeout(DEADLINE, client.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, b"bye");
}

#[test(tokio::test)]
async fn user_pass_required() {
    let echo = echo_server().await;
    let auth = AuthConfig::user_pass([Credential::new("alice", "s3cret")]);
    let proxy = start(auth, FixedResolver(vec![])).await;

    // Correct credentials get through
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(&[5, 2, 0, 2]).await.unwrap();
    let mut resp = [0u8; 2];
    client.read_exact(&mut resp).await.unwrap();
    assert_eq!(resp, [5, 2]);

    let mut login = vec![1, 5];
    login.extend_from_slice(b"alice");
    login.push(6);
    login.extend_from_slice(b"s3cret");
    client.write_all(&login).await.unwrap();
    client.read_exact(&mut resp).await.unwrap();
    assert_eq!(resp, [5, 0]);

    client.write_all(&ipv4_request(1, echo)).await.unwrap();
    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0);

    // Wrong password is refused and the connection closed
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(&[5, 1, 2]).await.unwrap();
    client.read_exact(&mut resp).await.unwrap();
    assert_eq!(resp, [5, 2]);
    client.write_all(&[1, 5, b'a', b'l', b'i', b'c', b'e', 1, b'x']).await.unwrap();
    client.read_exact(&mut resp).await.unwrap();
    assert_eq!(resp, [5, 1]);
    assert_closed(&mut client).await;

    // Offering only no-auth is not acceptable
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(&[5, 1, 0]).await.unwrap();
    client.read_exact(&mut resp).await.unwrap();
    assert_eq!(resp, [0x05, 0xFF]);
    assert_closed(&mut client).await;
}

#[test(tokio::test)]
async fn malformed_greeting_gets_no_reply() {
    let proxy = start(AuthConfig::no_auth(), FixedResolver(vec![])).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(&[5, 3, 0]).await.unwrap();
    assert_closed(&mut client).await;
}

#[test(tokio::test)]
async fn bind_command_not_supported() {
    let echo = echo_server().await;
    let proxy = start(AuthConfig::no_auth(), FixedResolver(vec![])).await;

    let mut client = handshake_no_auth(proxy).await;
    client.write_all(&ipv4_request(2, echo)).await.unwrap();

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, COMMAND_NOT_SUPPORTED);
    assert_closed(&mut client).await;
}

#[test(tokio::test)]
async fn data_sent_with_the_request_is_refused() {
    let echo = echo_server().await;
    let proxy = start(AuthConfig::no_auth(), FixedResolver(vec![])).await;

    let mut client = handshake_no_auth(proxy).await;
    let mut req = ipv4_request(1, echo);
    req.extend_from_slice(b"EARLY");
    client.write_all(&req).await.unwrap();

    // No success reply, and nothing half-relayed
    assert_closed(&mut client).await;
}

#[test(tokio::test)]
async fn ipv6_only_domain_not_supported() {
    let proxy = start(
        AuthConfig::no_auth(),
        FixedResolver(vec!["::1".parse().unwrap()]),
    )
    .await;

    let mut client = handshake_no_auth(proxy).await;
    client.write_all(&domain_request("v6.test", 80)).await.unwrap();

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, COMMAND_NOT_SUPPORTED);
    assert_closed(&mut client).await;
}

#[test(tokio::test)]
async fn unreachable_destination() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);

    let proxy = start(AuthConfig::no_auth(), FixedResolver(vec![])).await;

    let mut client = handshake_no_auth(proxy).await;
    client.write_all(&ipv4_request(1, dead)).await.unwrap();

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, HOST_UNREACHABLE);
    assert_closed(&mut client).await;
}

#[test(tokio::test)]
async fn connections_are_independent() {
    let echo = echo_server().await;
    let proxy = start(AuthConfig::no_auth(), FixedResolver(vec![])).await;

    // A client stuck mid-handshake does not hold up anyone else
    let mut stalled = TcpStream::connect(proxy).await.unwrap();
    stalled.write_all(&[5, 1, 0]).await.unwrap();

    let mut client = handshake_no_auth(proxy).await;
    client.write_all(&ipv4_request(1, echo)).await.unwrap();
    let mut reply = [0u8; 10];
    timeout(DEADLINE, client.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply[1], 0);
}
