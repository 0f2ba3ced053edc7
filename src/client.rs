use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::{ConnectReply, ConnectRequest, ReplyStatus, REPLY_LEN};

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Progress of a single tunnel attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    Connecting,
    HandshakeSent,
    AwaitingReply,
    Established,
    Failed,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::Idle => "idle",
            HandshakeState::Connecting => "connecting",
            HandshakeState::HandshakeSent => "handshake-sent",
            HandshakeState::AwaitingReply => "awaiting-reply",
            HandshakeState::Established => "established",
            HandshakeState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Owns the proxy socket for the duration of one handshake.
struct Handshake {
    state: HandshakeState,
    stream: Option<TcpStream>,
}

impl Handshake {
    fn new() -> Self {
        Self {
            state: HandshakeState::Idle,
            stream: None,
        }
    }

    fn advance(&mut self, next: HandshakeState) {
        debug!("socks4 handshake {} -> {}", self.state, next);
        self.state = next;
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "proxy socket already closed"))
    }

    /// Move to `Failed`, closing the socket if it is still held.
    async fn fail(&mut self, err: Error) -> Error {
        self.advance(HandshakeState::Failed);
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("shutdown of proxy socket failed: {}", e);
            }
        }
        err
    }

    fn establish(mut self) -> io::Result<TcpStream> {
        self.advance(HandshakeState::Established);
        self.stream
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "proxy socket already closed"))
    }
}

/// SOCKS4 CONNECT client. Holds only configuration, so one instance can
/// drive any number of concurrent attempts.
#[derive(Debug, Clone)]
pub struct Socks4Client {
    config: Config,
}

impl Socks4Client {
    pub fn new(config: Config) -> Result<Self> {
        if config.identifier.as_bytes().contains(&0) {
            return Err(Error::InvalidIdentifier);
        }
        config
            .validate()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        return Ok(Self { config });
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open a tunnel to `target_host:target_port` through the proxy. On
    /// success the returned stream carries raw bytes to the destination.
    pub async fn establish(&self, target_host: &str, target_port: u16) -> Result<TcpStream> {
        let mut handshake = Handshake::new();
        let outcome = self.run(&mut handshake, target_host, target_port).await;
        match outcome {
            Ok(()) => {
                let stream = handshake.establish().map_err(Error::ReplyReadError)?;
                info!(
                    "socks4 tunnel established to {}:{} via {}",
                    target_host, target_port, self.config.proxy_addr
                );
                Ok(stream)
            }
            Err(err) => Err(handshake.fail(err).await),
        }
    }

    async fn run(&self, handshake: &mut Handshake, target_host: &str, target_port: u16) -> Result<()> {
        let proxy = self.config.proxy_addr.as_str();

        handshake.advance(HandshakeState::Connecting);
        let stream = match timeout(self.config.connect_timeout, TcpStream::connect(proxy)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(Error::ProxyUnreachable {
                    addr: proxy.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(Error::ProxyUnreachable {
                    addr: proxy.to_string(),
                    source: timed_out("connect", self.config.connect_timeout),
                })
            }
        };
        debug!("connected to proxy {:?}", stream.peer_addr());
        handshake.stream = Some(stream);

        let destination = resolve_ipv4(target_host, target_port).await?;
        let request = ConnectRequest::new(destination, target_port, self.config.identifier.as_bytes())?;
        let buf = request.to_bytes()?;

        let write_timeout = self.config.write_timeout;
        let stream = handshake.stream().map_err(Error::HandshakeWriteError)?;
        match timeout(write_timeout, stream.write_all(&buf)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(Error::HandshakeWriteError(e)),
            Err(_) => return Err(Error::HandshakeWriteError(timed_out("write", write_timeout))),
        }
        handshake.advance(HandshakeState::HandshakeSent);
        debug!("sent {} byte socks4 request for {}:{}", buf.len(), destination, target_port);

        handshake.advance(HandshakeState::AwaitingReply);
        let read_timeout = self.config.read_timeout;
        let stream = handshake.stream().map_err(Error::ReplyReadError)?;
        let mut reply = [0u8; REPLY_LEN];
        match timeout(read_timeout, read_reply(stream, &mut reply)).await {
            Ok(result) => result?,
            Err(_) => return Err(Error::ReplyTimeout(read_timeout)),
        }

        let reply = ConnectReply::decode(&reply, self.config.strict_reply)?;
        debug!(
            "socks4 reply: status {} bound {}:{}",
            reply.status, reply.bound_address, reply.bound_port
        );
        match reply.status() {
            ReplyStatus::Granted => Ok(()),
            ReplyStatus::Rejected(code) => {
                warn!("proxy {} rejected {}:{} with code {}", proxy, target_host, target_port, code);
                Err(Error::ProxyRejected(code))
            }
        }
    }
}

/// Connect through `proxy_addr` using default settings otherwise.
pub async fn make_client_tcp_stream(
    proxy_addr: &str,
    target_host: &str,
    target_port: u16,
) -> Result<TcpStream> {
    let config = Config {
        proxy_addr: proxy_addr.to_string(),
        ..Config::default()
    };
    return Socks4Client::new(config)?.establish(target_host, target_port).await;
}

/// Fill `buf` completely. The proxy may split the reply across segments,
/// so short reads keep going until EOF.
async fn read_reply(stream: &mut TcpStream, buf: &mut [u8; REPLY_LEN]) -> Result<()> {
    let mut filled = 0;
    while filled < REPLY_LEN {
        let n = stream
            .read(&mut buf[filled..])
            .await
            .map_err(Error::ReplyReadError)?;
        if n == 0 {
            return Err(Error::ShortReply { received: filled });
        }
        filled += n;
        if filled < REPLY_LEN {
            warn!("socks4 reply incomplete ({} of {} bytes), waiting for more", filled, REPLY_LEN);
        }
    }
    return Ok(());
}

/// SOCKS4 carries only an IPv4 address, so hostnames are resolved locally
/// and anything without an A record is refused.
async fn resolve_ipv4(host: &str, port: u16) -> Result<Ipv4Addr> {
    let address_error = |reason: String| Error::AddressError {
        host: host.to_string(),
        reason,
    };

    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => return Ok(ip),
        Ok(IpAddr::V6(_)) => return Err(address_error("IPv6 destinations need SOCKS4a or SOCKS5".to_string())),
        Err(_) => {}
    }

    let addrs = lookup_host((host, port))
        .await
        .map_err(|e| address_error(e.to_string()))?;
    return first_ipv4(host, addrs);
}

/// Pick the first IPv4 result of a lookup.
fn first_ipv4<I>(host: &str, addrs: I) -> Result<Ipv4Addr>
where
    I: IntoIterator<Item = SocketAddr>,
{
    for addr in addrs {
        if let IpAddr::V4(ip) = addr.ip() {
            debug!("resolved {} to {}", host, ip);
            return Ok(ip);
        }
    }
    return Err(Error::AddressError {
        host: host.to_string(),
        reason: "no A record".to_string(),
    });
}

fn timed_out(what: &str, after: Duration) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{} timed out after {:?}", what, after))
}
