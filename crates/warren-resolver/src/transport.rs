//! The transport seam: the resolver core only ever asks for "these
//! octets, to this endpoint, give me the response octets".  Socket
//! handling lives behind the `Transport` trait so tests can swap in a
//! scripted implementation, and so the resolver itself never touches
//! I/O directly.

use bytes::BytesMut;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

/// The standard DNS port.
pub const DNS_PORT: u16 = 53;

/// The biggest message a UDP channel can carry.
pub const UDP_MAX_MESSAGE_SIZE: usize = 512;

/// Which protocol to carry a request over.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Proto {
    Udp,
    Tcp,
}

impl std::fmt::Display for Proto {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Proto::Udp => write!(f, "udp"),
            Proto::Tcp => write!(f, "tcp"),
        }
    }
}

/// Where a request goes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Endpoint {
    pub addr: SocketAddr,
    pub proto: Proto,
}

impl Endpoint {
    pub fn udp(addr: SocketAddr) -> Self {
        Self {
            addr,
            proto: Proto::Udp,
        }
    }

    pub fn tcp(addr: SocketAddr) -> Self {
        Self {
            addr,
            proto: Proto::Tcp,
        }
    }
}

/// An error from a single exchange with a single endpoint.  These are
/// recovered from locally, by trying the next candidate nameserver:
/// only the resolver decides when to give up.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TransportError {
    Timeout,
    NoRoute,
    ConnectionRefused,
    PeerReset,
    Io { kind: io::ErrorKind },
}

impl From<io::Error> for TransportError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::TimedOut => TransportError::Timeout,
            io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                TransportError::PeerReset
            }
            kind => TransportError::Io { kind },
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TransportError::Timeout => write!(f, "request timed out"),
            TransportError::NoRoute => write!(f, "no route to nameserver"),
            TransportError::ConnectionRefused => write!(f, "connection refused"),
            TransportError::PeerReset => write!(f, "connection reset by peer"),
            TransportError::Io { kind } => write!(f, "i/o error: {kind}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// One request-response exchange of raw message octets.
///
/// TCP framing (the 2-octet big-endian length prefix) is the
/// implementation's concern: callers hand over and receive bare
/// message octets either way.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: &[u8],
        endpoint: Endpoint,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;
}

/// The real transport, using one ephemeral socket per exchange.
///
/// No timeout is applied here: the resolver cancels slow exchanges
/// from the outside, which keeps this layer trivially cancel-safe.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetTransport;

impl NetTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for NetTransport {
    async fn send(&self, request: &[u8], endpoint: Endpoint) -> Result<Vec<u8>, TransportError> {
        match endpoint.proto {
            Proto::Udp => {
                let sock = UdpSocket::bind("0.0.0.0:0").await?;
                sock.connect(endpoint.addr).await?;
                sock.send(request).await?;

                let mut buf = vec![0u8; UDP_MAX_MESSAGE_SIZE];
                let size = sock.recv(&mut buf).await?;
                buf.truncate(size);
                Ok(buf)
            }
            Proto::Tcp => {
                let mut stream = TcpStream::connect(endpoint.addr).await?;
                send_tcp_message(&mut stream, request).await?;
                let bytes = read_tcp_message(&mut stream).await?;
                Ok(bytes.to_vec())
            }
        }
    }
}

/// Write a serialised message to a TCP stream, with the length
/// prefix.
pub async fn send_tcp_message(
    stream: &mut TcpStream,
    bytes: &[u8],
) -> Result<(), TransportError> {
    let len = u16::try_from(bytes.len()).map_err(|_| TransportError::Io {
        kind: io::ErrorKind::InvalidInput,
    })?;

    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(bytes).await?;

    Ok(())
}

/// Read a DNS message from a TCP stream.
///
/// A DNS TCP message is slightly different to a DNS UDP message: it
/// has a big-endian u16 prefix giving the total length of the
/// message.  This is redundant, but it means the entire message can
/// be read before parsing begins.
pub async fn read_tcp_message(stream: &mut TcpStream) -> Result<BytesMut, TransportError> {
    let expected = stream.read_u16().await? as usize;
    let mut bytes = BytesMut::with_capacity(expected);

    while bytes.len() < expected {
        if stream.read_buf(&mut bytes).await? == 0 {
            return Err(TransportError::PeerReset);
        }
    }

    Ok(bytes)
}
