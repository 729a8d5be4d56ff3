// src/network/transport.rs
//! Line-delimited transport to a pool
//!
//! The pool session talks to a [`Transport`], which reads one frame per line
//! and writes either a JSON frame or the single-byte keep-alive ping. The
//! production [`TcpConnector`] opens TCP (optionally TLS) sockets with
//! aggressive keep-alive; tests swap in a channel-backed mock.

use crate::config::PoolConfig;
use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use socket2::{SockRef, TcpKeepalive};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed, LinesCodec, LinesCodecError};
use url::Url;

/// Longest frame accepted from a pool
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Idle time before the first keep-alive probe
const KEEPALIVE_IDLE: Duration = Duration::from_secs(1);

/// Interval between keep-alive probes
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(3);

/// URL schemes that select TLS
const TLS_SCHEMES: [&str; 4] = ["stratum+ssl", "stratum+tls", "ssl", "tls"];

/// Something the session writes to the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// One serialized JSON-RPC request
    Frame(String),
    /// Keep-alive control byte
    Ping,
}

/// Newline-delimited frame codec
///
/// Blank lines are skipped. Over-long lines are dropped with a warning
/// rather than failing the connection.
#[derive(Debug, Clone)]
pub struct StratumCodec {
    lines: LinesCodec,
}

impl StratumCodec {
    /// Codec with the default line limit
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    /// Codec with a custom line limit
    pub fn with_max_length(max: usize) -> Self {
        StratumCodec {
            lines: LinesCodec::new_with_max_length(max),
        }
    }

    fn filter(
        &mut self,
        buf: &mut BytesMut,
        eof: bool,
    ) -> Result<Option<String>, MinerError> {
        loop {
            let decoded = if eof {
                self.lines.decode_eof(buf)
            } else {
                self.lines.decode(buf)
            };
            match decoded {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        return Ok(Some(line.to_string()));
                    }
                }
                Ok(None) => return Ok(None),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    log::warn!("Dropping frame longer than the line limit");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Default for StratumCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for StratumCodec {
    type Item = String;
    type Error = MinerError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, MinerError> {
        self.filter(buf, false)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, MinerError> {
        self.filter(buf, true)
    }
}

impl Encoder<Outgoing> for StratumCodec {
    type Error = MinerError;

    fn encode(&mut self, item: Outgoing, buf: &mut BytesMut) -> Result<(), MinerError> {
        match item {
            Outgoing::Frame(frame) => {
                buf.reserve(frame.len() + 1);
                buf.put_slice(frame.as_bytes());
                buf.put_u8(b'\n');
            }
            Outgoing::Ping => buf.put_u8(b'\r'),
        }
        Ok(())
    }
}

/// Frame-level I/O with a pool
#[async_trait]
pub trait Transport: Send {
    /// Reads the next non-empty line; `None` on clean close
    async fn read_line(&mut self) -> Result<Option<String>, MinerError>;

    /// Writes one frame or ping
    async fn write(&mut self, msg: Outgoing) -> Result<(), MinerError>;
}

/// Opens transports to a pool endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects, returning a ready transport
    async fn connect(&self, endpoint: &PoolEndpoint) -> Result<Box<dyn Transport>, MinerError>;
}

/// Byte streams a [`FramedTransport`] can run over
pub trait PoolIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> PoolIo for T {}

/// [`Transport`] over any byte stream
pub struct FramedTransport<T> {
    framed: Framed<T, StratumCodec>,
}

impl<T: PoolIo> FramedTransport<T> {
    /// Wraps a connected stream
    pub fn new(io: T) -> Self {
        FramedTransport {
            framed: Framed::new(io, StratumCodec::new()),
        }
    }
}

#[async_trait]
impl<T: PoolIo> Transport for FramedTransport<T> {
    async fn read_line(&mut self) -> Result<Option<String>, MinerError> {
        self.framed.next().await.transpose()
    }

    async fn write(&mut self, msg: Outgoing) -> Result<(), MinerError> {
        self.framed.send(msg).await
    }
}

/// TCP/TLS connector used in production
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Connector giving up on a connect attempt after `connect_timeout`
    pub fn new(connect_timeout: Duration) -> Self {
        TcpConnector { connect_timeout }
    }

    async fn open(&self, endpoint: &PoolEndpoint) -> Result<TcpStream, MinerError> {
        let attempt = TcpStream::connect((endpoint.host.as_str(), endpoint.port));
        let stream = tokio::time::timeout(self.connect_timeout, attempt)
            .await
            .map_err(|_| MinerError::ConnectionError(format!("{}: connect timed out", endpoint)))?
            .map_err(|e| MinerError::ConnectionError(format!("{}: {}", endpoint, e)))?;

        stream.set_nodelay(true)?;
        let keepalive = TcpKeepalive::new()
            .with_time(KEEPALIVE_IDLE)
            .with_interval(KEEPALIVE_INTERVAL);
        SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;

        Ok(stream)
    }

    async fn wrap_tls(
        &self,
        stream: TcpStream,
        host: &str,
    ) -> Result<Box<dyn Transport>, MinerError> {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| MinerError::TlsError(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

        let name = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|e| MinerError::TlsError(format!("{}: {}", host, e)))?;

        let stream = tokio_rustls::TlsConnector::from(Arc::new(config))
            .connect(name, stream)
            .await
            .map_err(|e| MinerError::TlsError(format!("{}: {}", host, e)))?;

        Ok(Box::new(FramedTransport::new(stream)))
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        TcpConnector::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &PoolEndpoint) -> Result<Box<dyn Transport>, MinerError> {
        let stream = self.open(endpoint).await?;
        if endpoint.tls {
            self.wrap_tls(stream, &endpoint.host).await
        } else {
            Ok(Box::new(FramedTransport::new(stream)))
        }
    }
}

/// Where and as whom to mine; fixed for the life of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEndpoint {
    /// Pool hostname or address
    pub host: String,
    /// Pool port
    pub port: u16,
    /// Wrap the socket in TLS
    pub tls: bool,
    /// Wallet address or pool username
    pub login: String,
    /// Worker password
    pub password: String,
    /// Hash variant the pool expects
    pub algorithm: AlgorithmType,
}

impl PoolEndpoint {
    /// Parses a pool URL
    ///
    /// A URL without a scheme is treated as `stratum+tcp://`. TLS is used
    /// when the scheme asks for it or `force_tls` is set.
    pub fn parse(
        url: &str,
        login: &str,
        password: &str,
        algorithm: AlgorithmType,
        force_tls: bool,
    ) -> Result<Self, MinerError> {
        let url = url.trim();
        let full = if url.contains("://") {
            url.to_string()
        } else {
            format!("stratum+tcp://{}", url)
        };

        let parsed = Url::parse(&full).map_err(|e| match e {
            url::ParseError::InvalidPort => MinerError::ConfigError("Invalid pool port".into()),
            url::ParseError::EmptyHost => MinerError::ConfigError("Invalid pool URL".into()),
            other => MinerError::from(other),
        })?;

        let host = parsed
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
            .filter(|h| !h.is_empty())
            .ok_or_else(|| MinerError::ConfigError("Invalid pool URL".into()))?;
        let port = parsed
            .port()
            .filter(|p| *p != 0)
            .ok_or_else(|| MinerError::ConfigError("Invalid pool port".into()))?;

        Ok(PoolEndpoint {
            host: host.to_string(),
            port,
            tls: force_tls || TLS_SCHEMES.contains(&parsed.scheme()),
            login: login.to_string(),
            password: password.to_string(),
            algorithm,
        })
    }

    /// Endpoint for a configured pool
    pub fn from_config(pool: &PoolConfig) -> Result<Self, MinerError> {
        Self::parse(
            &pool.url,
            &pool.login,
            &pool.password,
            pool.algorithm,
            pool.tls,
        )
    }
}

impl fmt::Display for PoolEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn codec_skips_blank_and_oversized_lines() {
        let mut codec = StratumCodec::with_max_length(16);
        let mut buf = BytesMut::from(&b"\n  \n{\"id\":1}\n0123456789abcdefghij\nok\r\npartial"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("{\"id\":1}"));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("ok"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(codec.decode_eof(&mut buf).unwrap().as_deref(), Some("partial"));
    }

    #[test]
    fn codec_encodes_frames_and_ping() {
        let mut codec = StratumCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Outgoing::Frame("{\"id\":1}".into()), &mut buf)
            .unwrap();
        codec.encode(Outgoing::Ping, &mut buf).unwrap();
        assert_eq!(&buf[..], b"{\"id\":1}\n\r");
    }

    #[tokio::test]
    async fn framed_transport_over_duplex() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut transport = FramedTransport::new(client);

        server.write_all(b"{\"method\":\"job\"}\n\n").await.unwrap();
        assert_eq!(
            transport.read_line().await.unwrap().as_deref(),
            Some("{\"method\":\"job\"}")
        );

        transport.write(Outgoing::Ping).await.unwrap();
        let mut byte = [0u8; 1];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut byte)
            .await
            .unwrap();
        assert_eq!(byte, [b'\r']);

        drop(server);
        assert_eq!(transport.read_line().await.unwrap(), None);
    }

    #[test]
    fn endpoint_parsing() {
        let ep = PoolEndpoint::parse(
            "stratum+tcp://pool.example.com:3333",
            "wallet",
            "x",
            AlgorithmType::Cryptonight,
            false,
        )
        .unwrap();
        assert_eq!(ep.host, "pool.example.com");
        assert_eq!(ep.port, 3333);
        assert!(!ep.tls);
        assert_eq!(ep.to_string(), "pool.example.com:3333");

        let ep = PoolEndpoint::parse("pool.example.com:5555", "w", "x", AlgorithmType::Cryptonight, false)
            .unwrap();
        assert_eq!((ep.host.as_str(), ep.port, ep.tls), ("pool.example.com", 5555, false));

        let ep = PoolEndpoint::parse(
            "stratum+ssl://pool.example.com:443",
            "w",
            "x",
            AlgorithmType::CryptonightLight,
            false,
        )
        .unwrap();
        assert!(ep.tls);

        let ep = PoolEndpoint::parse("pool.example.com:80", "w", "x", AlgorithmType::Cryptonight, true)
            .unwrap();
        assert!(ep.tls);
    }

    #[test]
    fn endpoint_errors() {
        let err = PoolEndpoint::parse("pool.example.com", "w", "x", AlgorithmType::Cryptonight, false)
            .unwrap_err();
        assert!(matches!(err, MinerError::ConfigError(ref m) if m == "Invalid pool port"));

        let err = PoolEndpoint::parse("pool.example.com:abc", "w", "x", AlgorithmType::Cryptonight, false)
            .unwrap_err();
        assert!(matches!(err, MinerError::ConfigError(ref m) if m == "Invalid pool port"));

        let err = PoolEndpoint::parse("stratum+tcp://:3333", "w", "x", AlgorithmType::Cryptonight, false)
            .unwrap_err();
        assert!(matches!(err, MinerError::ConfigError(ref m) if m == "Invalid pool URL"));
    }
}
