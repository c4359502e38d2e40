/*!
 * Blocking Client Connection
 *
 * A `Connection` owns one socket plus the read buffer that sits between the
 * socket and the Framer. Replies are read by a parse-driven loop: ask the
 * Framer whether the buffer holds a whole reply, and only if it does not,
 * block on one more socket read. Nothing assumes how long a reply is.
 *
 * A `FrameScanner` answers "whole reply yet?" and remembers how far it got,
 * so a large reply is walked once while it arrives and decoded once when it
 * is complete. The read size grows with the amount already buffered.
 *
 * Any failure that leaves the byte stream in an unknown position (protocol
 * error, peer close, timeout, I/O error) closes the connection; every later
 * call then fails with `ClientError::Closed` without touching the socket.
 */

use crate::config::ClientConfig;
use crate::error::{ClientError, FrameError};
use crate::protocol::{self, FrameLimits, FrameScanner, ParseResult, Reply};
use bytes::{Buf, BytesMut};
use log::{debug, trace, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Upper bound for the read size reached by growing the scratch buffer
const MAX_READ_CHUNK: usize = 1024 * 1024;

/// A single client connection
///
/// Generic over the stream so the framing loop can be driven by anything
/// that reads and writes bytes; in practice this is a `TcpStream`.
/// Not meant to be shared: every operation takes `&mut self`.
#[derive(Debug)]
pub struct Connection<S = TcpStream> {
    /// `None` once closed
    stream: Option<S>,
    /// Bytes received but not yet consumed by a parsed reply
    rbuf: BytesMut,
    /// Encoded command not yet accepted by the socket
    wbuf: BytesMut,
    /// Scratch space for one socket read
    chunk: Vec<u8>,
    /// Progress through the reply at the front of `rbuf`
    scanner: FrameScanner,
    limits: FrameLimits,
}

impl Connection<TcpStream> {
    /// Connect to `host:port`
    ///
    /// `timeout` bounds the connect itself and each later read or write.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, ClientError> {
        let cfg = ClientConfig::default()
            .host(host)
            .port(port)
            .timeout(timeout);
        Self::open(&cfg)
    }

    /// Connect using a full configuration
    ///
    /// Every address the host resolves to is tried in order; the error of
    /// the last attempt is reported if none succeeds.
    pub fn open(cfg: &ClientConfig) -> Result<Self, ClientError> {
        cfg.validate()?;
        let addr = cfg.addr();

        let resolved: Vec<SocketAddr> = (cfg.host.as_str(), cfg.port)
            .to_socket_addrs()
            .map_err(|source| ClientError::Connect {
                addr: addr.clone(),
                source,
            })?
            .collect();

        let mut last_err = None;
        for sa in resolved {
            match connect_socket(sa, cfg) {
                Ok(stream) => {
                    debug!("connected to {} ({})", addr, sa);
                    return Ok(Self::from_stream(stream, cfg));
                }
                Err(e) => {
                    debug!("connect to {} failed: {}", sa, e);
                    last_err = Some(e);
                }
            }
        }

        let source = last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
        });
        Err(ClientError::Connect { addr, source })
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref()?.peer_addr().ok()
    }
}

/// Build a blocking client socket with socket2
///
/// Timeouts are set on the socket itself so they cover every later read and
/// write on the `TcpStream`.
fn connect_socket(addr: SocketAddr, cfg: &ClientConfig) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.connect_timeout(&addr.into(), cfg.timeout)?;
    socket.set_nodelay(cfg.nodelay)?;
    socket.set_read_timeout(Some(cfg.timeout))?;
    socket.set_write_timeout(Some(cfg.timeout))?;
    Ok(socket.into())
}

impl<S: Read + Write> Connection<S> {
    /// Wrap an already established stream
    ///
    /// Timeouts are the stream's own business here; only the read chunk size
    /// and frame limits are taken from `cfg`.
    pub fn from_stream(stream: S, cfg: &ClientConfig) -> Self {
        Self {
            stream: Some(stream),
            rbuf: BytesMut::with_capacity(cfg.read_chunk),
            wbuf: BytesMut::new(),
            chunk: vec![0u8; cfg.read_chunk.max(1)],
            scanner: FrameScanner::new(),
            limits: cfg.limits,
        }
    }

    /// Encode `parts` as one command and write all of it
    ///
    /// Short writes are retried until the whole command is accepted.
    pub fn send_command<P: AsRef<[u8]>>(&mut self, parts: &[P]) -> Result<(), ClientError> {
        let stream = self.stream.as_mut().ok_or(ClientError::Closed)?;
        if parts.is_empty() {
            return Err(ClientError::EmptyCommand);
        }

        self.wbuf.clear();
        protocol::encode_into(parts, &mut self.wbuf);
        trace!("sending {} byte command", self.wbuf.len());

        if let Err(e) = write_all(stream, &mut self.wbuf) {
            debug!("write failed: {}; closing connection", e);
            self.close();
            return Err(e);
        }
        Ok(())
    }

    /// Block until one complete reply has been read
    ///
    /// Bytes past the end of the reply stay buffered for the next call.
    ///
    /// # Errors
    /// * `Timeout` - a single read waited longer than the configured timeout
    /// * `ConnectionClosed` - the peer closed before the reply was complete
    /// * `Protocol` - the bytes received are not a valid reply
    /// * `Read` - any other socket failure
    /// * `Closed` - the connection was already closed
    ///
    /// All but `Closed` close the connection.
    pub fn read_reply(&mut self) -> Result<Reply, ClientError> {
        if self.stream.is_none() {
            return Err(ClientError::Closed);
        }

        loop {
            match self.next_buffered() {
                Ok(Some(reply)) => return Ok(reply),
                Ok(None) => {
                    if let Err(e) = self.fill() {
                        debug!("read failed: {}; closing connection", e);
                        self.close();
                        return Err(e);
                    }
                }
                Err(e) => {
                    warn!("protocol error: {}; closing connection", e);
                    self.close();
                    return Err(e.into());
                }
            }
        }
    }

    /// Decode the reply at the front of the read buffer if all of it is there
    fn next_buffered(&mut self) -> Result<Option<Reply>, FrameError> {
        let Some(len) = self.scanner.scan(&self.rbuf, &self.limits)? else {
            return Ok(None);
        };

        match protocol::try_parse_with(&self.rbuf[..len], &self.limits) {
            ParseResult::Parsed(reply, consumed) => {
                self.rbuf.advance(consumed);
                trace!("parsed {} byte reply, {} bytes left", consumed, self.rbuf.len());
                Ok(Some(reply))
            }
            ParseResult::Malformed(e) => Err(e),
            // Unreachable while scanner and parser share their checks
            ParseResult::NeedMoreBytes => Ok(None),
        }
    }

    /// Send one command and read its reply
    pub fn request<P: AsRef<[u8]>>(&mut self, parts: &[P]) -> Result<Reply, ClientError> {
        self.send_command(parts)?;
        self.read_reply()
    }

    /// One blocking read appended to the read buffer
    ///
    /// The read size is the larger of the configured chunk and what is
    /// already buffered, capped at `MAX_READ_CHUNK`.
    fn fill(&mut self) -> Result<(), ClientError> {
        let stream = self.stream.as_mut().ok_or(ClientError::Closed)?;
        let want = self.rbuf.len().min(MAX_READ_CHUNK);
        if want > self.chunk.len() {
            self.chunk.resize(want, 0);
        }
        loop {
            match stream.read(&mut self.chunk) {
                Ok(0) => return Err(ClientError::ConnectionClosed),
                Ok(n) => {
                    self.rbuf.extend_from_slice(&self.chunk[..n]);
                    trace!("read {} bytes, {} buffered", n, self.rbuf.len());
                    return Ok(());
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ClientError::from_read(e)),
            }
        }
    }
}

impl<S> Connection<S> {
    /// Release the socket and drop any buffered bytes; safe to call repeatedly
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("connection closed");
        }
        self.rbuf.clear();
        self.wbuf.clear();
        self.scanner.reset();
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Bytes already received that belong to a reply not yet read
    pub fn buffered(&self) -> usize {
        self.rbuf.len()
    }

    pub fn get_ref(&self) -> Option<&S> {
        self.stream.as_ref()
    }
}

/// Write the whole buffer, looping on short writes
fn write_all<S: Write>(stream: &mut S, wbuf: &mut BytesMut) -> Result<(), ClientError> {
    while !wbuf.is_empty() {
        match stream.write(&wbuf[..]) {
            Ok(0) => {
                return Err(ClientError::Write(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "socket accepted no bytes",
                )))
            }
            Ok(n) => wbuf.advance(n),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ClientError::from_write(e)),
        }
    }
    stream.flush().map_err(ClientError::from_write)
}
