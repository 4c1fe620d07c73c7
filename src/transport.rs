//! Socket ownership for a single remote endpoint, with no protocol awareness.
use std::fmt;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::time::timeout;

use crate::error::SourceQueryError;

/// Source query responses use 1400 bytes + IP/UDP headers.
pub const UDP_BUFFER_SIZE: usize = 1400;
/// Stream reads are done in fixed chunks of this size.
pub const TCP_BUFFER_SIZE: usize = 8192;
/// RFC 1035 upper bound on a host name, counted in characters.
pub const HOSTNAME_LIMIT: usize = 255;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);
pub const DEFAULT_MAX_CHALLENGE_ATTEMPTS: usize = 3;

/// Transport requested by the caller. Only [TransportProtocol::Tcp] and
/// [TransportProtocol::Udp] can carry the query protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProtocol {
    Tcp,
    Udp,
    Icmp,
    Raw,
}

impl TransportProtocol {
    /// Receive buffer size for this transport, `None` if unsupported.
    pub fn buffer_size(self) -> Option<usize> {
        match self {
            TransportProtocol::Tcp => Some(TCP_BUFFER_SIZE),
            TransportProtocol::Udp => Some(UDP_BUFFER_SIZE),
            TransportProtocol::Icmp | TransportProtocol::Raw => None,
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportProtocol::Tcp => "TCP",
            TransportProtocol::Udp => "UDP",
            TransportProtocol::Icmp => "ICMP",
            TransportProtocol::Raw => "raw",
        };
        f.write_str(name)
    }
}

/// Timeouts and retry limits shared by the transport and the query layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Bound on each send.
    pub send_timeout: Duration,
    /// Bound on each receive, and on connection establishment.
    pub recv_timeout: Duration,
    max_challenge_attempts: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            send_timeout: DEFAULT_TIMEOUT,
            recv_timeout: DEFAULT_TIMEOUT,
            max_challenge_attempts: DEFAULT_MAX_CHALLENGE_ATTEMPTS,
        }
    }
}

impl ClientConfig {
    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn with_recv_timeout(mut self, recv_timeout: Duration) -> Self {
        self.recv_timeout = recv_timeout;
        self
    }

    /// How many challenge responses are tolerated before giving up.
    pub fn max_challenge_attempts(&self) -> usize {
        self.max_challenge_attempts
    }

    /// Set the challenge limit. Values below 1 are raised to 1, since
    /// A2S_PLAYER and A2S_RULES always need one challenge.
    pub fn with_max_challenge_attempts(mut self, attempts: usize) -> Self {
        self.max_challenge_attempts = attempts.max(1);
        self
    }
}

#[derive(Debug)]
enum Socket {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

#[derive(Debug)]
struct Connection {
    socket: Socket,
    remote: SocketAddr,
    buffer_size: usize,
}

/// Owns at most one TCP or UDP socket to one remote endpoint.
///
/// Dropping the client closes the socket.
#[derive(Debug, Default)]
pub struct TransportClient {
    config: ClientConfig,
    connection: Option<Connection>,
}

impl TransportClient {
    pub fn new(config: ClientConfig) -> Self {
        TransportClient {
            config,
            connection: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.connection.as_ref().map(|c| c.remote)
    }

    /// Fixed receive buffer size of the current connection.
    pub fn buffer_size(&self) -> Option<usize> {
        self.connection.as_ref().map(|c| c.buffer_size)
    }

    /// Connect to `host`, which may be an IP literal or a host name.
    ///
    /// Host names are resolved with the system resolver and the first
    /// returned address is used. Input is validated before any socket or
    /// DNS work happens. Connecting again replaces the current socket.
    pub async fn connect(
        &mut self,
        host: &str,
        port: u16,
        protocol: TransportProtocol,
    ) -> Result<SocketAddr, SourceQueryError> {
        if protocol.buffer_size().is_none() {
            return Err(SourceQueryError::UnsupportedProtocol(protocol));
        }
        let host = host.trim();
        if host.is_empty() {
            return Err(SourceQueryError::InvalidHost);
        }
        let len = host.chars().count();
        if len > HOSTNAME_LIMIT {
            return Err(SourceQueryError::HostTooLong {
                len,
                limit: HOSTNAME_LIMIT,
            });
        }

        let addr = match host.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, port),
            Err(_) => self.resolve(host, port).await?,
        };
        self.connect_addr(addr, protocol).await
    }

    /// Connect to an already resolved address.
    pub async fn connect_addr(
        &mut self,
        addr: SocketAddr,
        protocol: TransportProtocol,
    ) -> Result<SocketAddr, SourceQueryError> {
        let buffer_size = protocol
            .buffer_size()
            .ok_or(SourceQueryError::UnsupportedProtocol(protocol))?;
        self.close();

        debug!("connecting to {addr} over {protocol}");
        let limit = self.config.recv_timeout;
        let socket = timeout(limit, open(addr, protocol))
            .await
            .map_err(|_| SourceQueryError::Timeout("connect", limit.as_millis()))??;

        self.connection = Some(Connection {
            socket,
            remote: addr,
            buffer_size,
        });
        Ok(addr)
    }

    async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr, SourceQueryError> {
        let limit = self.config.recv_timeout;
        let mut addrs = timeout(limit, lookup_host((host, port)))
            .await
            .map_err(|_| SourceQueryError::Timeout("host lookup", limit.as_millis()))?
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidInput => SourceQueryError::InvalidHost,
                _ => SourceQueryError::ResolveFailed {
                    host: host.to_owned(),
                    source: e,
                },
            })?;
        let addr = addrs
            .next()
            .ok_or_else(|| SourceQueryError::NoAddressRecords(host.to_owned()))?;
        debug!("resolved {host} to {addr}");
        Ok(addr)
    }

    /// Send one payload. Returns the number of bytes written.
    pub async fn send(&mut self, payload: &[u8]) -> Result<usize, SourceQueryError> {
        let limit = self.config.send_timeout;
        let conn = self
            .connection
            .as_mut()
            .ok_or(SourceQueryError::NotConnected)?;

        let sent = match &mut conn.socket {
            Socket::Udp(sock) => timeout(limit, sock.send(payload))
                .await
                .map_err(|_| SourceQueryError::Timeout("send", limit.as_millis()))?
                .map_err(SourceQueryError::SendError)?,
            Socket::Tcp(stream) => {
                timeout(limit, stream.write_all(payload))
                    .await
                    .map_err(|_| SourceQueryError::Timeout("send", limit.as_millis()))?
                    .map_err(SourceQueryError::SendError)?;
                payload.len()
            }
        };
        debug!("sent {sent} byte(s) to {}", conn.remote);
        Ok(sent)
    }

    /// Perform one receive and return exactly the bytes read.
    pub async fn receive(&mut self) -> Result<Vec<u8>, SourceQueryError> {
        let limit = self.config.recv_timeout;
        let conn = self
            .connection
            .as_mut()
            .ok_or(SourceQueryError::NotConnected)?;

        let mut buf = vec![0u8; conn.buffer_size];
        let read = match &mut conn.socket {
            Socket::Udp(sock) => timeout(limit, sock.recv(&mut buf))
                .await
                .map_err(|_| SourceQueryError::Timeout("receive", limit.as_millis()))?
                .map_err(SourceQueryError::ReceiveError)?,
            Socket::Tcp(stream) => {
                let n = timeout(limit, stream.read(&mut buf))
                    .await
                    .map_err(|_| SourceQueryError::Timeout("receive", limit.as_millis()))?
                    .map_err(SourceQueryError::ReceiveError)?;
                if n == 0 {
                    return Err(SourceQueryError::ConnectionClosed);
                }
                n
            }
        };
        buf.truncate(read);
        debug!("received {read} byte(s) from {}", conn.remote);
        Ok(buf)
    }

    /// Close the socket. Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            debug!("closing connection to {}", conn.remote);
        }
    }
}

async fn open(addr: SocketAddr, protocol: TransportProtocol) -> Result<Socket, SourceQueryError> {
    match protocol {
        TransportProtocol::Udp => {
            // any local port will do
            let local = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
            let sock = UdpSocket::bind(local)
                .await
                .map_err(SourceQueryError::FailedPortBind)?;
            sock.connect(addr)
                .await
                .map_err(SourceQueryError::UnreachableHost)?;
            Ok(Socket::Udp(sock))
        }
        TransportProtocol::Tcp => {
            let stream = TcpStream::connect(addr)
                .await
                .map_err(SourceQueryError::UnreachableHost)?;
            Ok(Socket::Tcp(stream))
        }
        other => Err(SourceQueryError::UnsupportedProtocol(other)),
    }
}
