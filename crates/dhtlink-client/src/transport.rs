//! Byte transports between the session and the broker.
//!
//! The session only sees [`Transport`]: a duplex byte stream with timed
//! reads. [`Connector`] opens a new one per connection attempt, which lets
//! tests swap the TLS socket for an in-memory broker.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use rustls::{ClientConnection, StreamOwned};

use crate::config::TlsConfig;
use crate::error::{ClientError, Result};
use crate::tls;

/// Smallest read timeout handed to the OS (a zero timeout is rejected).
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// A connected byte stream.
pub trait Transport: Send {
    /// Read whatever is available, waiting at most `timeout`.
    ///
    /// `Ok(0)` means the peer closed the stream. `WouldBlock` and
    /// `TimedOut` errors mean nothing arrived in time.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Write and flush all of `bytes`.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Close the stream. Errors are ignored.
    fn close(&mut self);
}

/// Opens transports.
pub trait Connector: Send {
    fn open(
        &mut self,
        host: &str,
        port: u16,
        tls: &TlsConfig,
        timeout: Duration,
    ) -> Result<Box<dyn Transport>>;
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Stream {
    fn tcp(&self) -> &TcpStream {
        match self {
            Stream::Plain(s) => s,
            Stream::Tls(s) => s.get_ref(),
        }
    }
}

/// TCP stream, optionally wrapped in TLS.
pub struct TcpTransport {
    stream: Stream,
}

impl Transport for TcpTransport {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.stream
            .tcp()
            .set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))?;
        match &mut self.stream {
            Stream::Plain(s) => s.read(buf),
            Stream::Tls(s) => s.read(buf),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match &mut self.stream {
            Stream::Plain(s) => {
                s.write_all(bytes)?;
                s.flush()
            }
            Stream::Tls(s) => {
                s.write_all(bytes)?;
                s.flush()
            }
        }
    }

    fn close(&mut self) {
        if let Stream::Tls(s) = &mut self.stream {
            s.conn.send_close_notify();
            let _ = s.flush();
        }
        let _ = self.stream.tcp().shutdown(Shutdown::Both);
    }
}

/// Opens TCP connections and performs the TLS handshake.
///
/// The rustls config is built once and reused for every reconnect.
#[derive(Default)]
pub struct TlsConnector {
    tls_config: Option<Arc<rustls::ClientConfig>>,
}

impl TlsConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn client_config(&mut self, tls: &TlsConfig) -> Result<Arc<rustls::ClientConfig>> {
        if let Some(config) = &self.tls_config {
            return Ok(config.clone());
        }
        let config = Arc::new(tls::build_client_config(tls)?);
        self.tls_config = Some(config.clone());
        Ok(config)
    }
}

impl Connector for TlsConnector {
    fn open(
        &mut self,
        host: &str,
        port: u16,
        tls: &TlsConfig,
        timeout: Duration,
    ) -> Result<Box<dyn Transport>> {
        let address = format!("{}:{}", host, port);
        let mut tcp = connect_tcp(host, port, timeout).map_err(|source| ClientError::Connect {
            address: address.clone(),
            source,
        })?;
        tcp.set_nodelay(true)?;
        tcp.set_write_timeout(Some(timeout))?;

        if !tls.enabled {
            log::debug!("Connected to {} (plain TCP)", address);
            return Ok(Box::new(TcpTransport {
                stream: Stream::Plain(tcp),
            }));
        }

        let config = self.client_config(tls)?;
        let server_name = tls::server_name(tls, host)?;
        let mut conn =
            ClientConnection::new(config, server_name).map_err(|e| ClientError::Tls(e.to_string()))?;

        tcp.set_read_timeout(Some(timeout))?;
        while conn.is_handshaking() {
            conn.complete_io(&mut tcp).map_err(handshake_error)?;
        }
        log::debug!(
            "TLS handshake with {} complete ({:?})",
            address,
            conn.protocol_version()
        );

        Ok(Box::new(TcpTransport {
            stream: Stream::Tls(Box::new(StreamOwned::new(conn, tcp))),
        }))
    }
}

fn connect_tcp(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
    }))
}

/// Certificate and protocol failures are TLS errors; anything else during
/// the handshake is a plain I/O failure.
fn handshake_error(err: io::Error) -> ClientError {
    let is_tls = err
        .get_ref()
        .map(|inner| inner.is::<rustls::Error>())
        .unwrap_or(false);
    if is_tls {
        ClientError::Tls(err.to_string())
    } else {
        ClientError::Io(err)
    }
}
