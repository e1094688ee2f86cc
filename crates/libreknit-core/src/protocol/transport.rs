//! Transport abstraction
//!
//! The session driver only needs a byte channel it can poll: a bounded-
//! timeout read, a write, and open/close state. Physical serial ports,
//! network tunnels and the in-memory simulator all satisfy the same trait,
//! so tests drive the state machine deterministically by injecting the
//! simulated variant.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::{ProtocolError, READ_TIMEOUT};

/// Default TCP port of a network-tunnelled controller.
pub const TUNNEL_PORT: u16 = 12346;

/// Sentinel port name selecting the in-memory simulator.
pub const SIMULATION_PORT: &str = "simulation";

/// Byte channel to the machine controller.
///
/// `read` must return within roughly [`READ_TIMEOUT`]; returning `Ok(0)` or
/// a `TimedOut`/`WouldBlock` error both mean "no data yet".
pub trait Transport: Send {
    /// Whether the channel is open.
    fn is_open(&self) -> bool;

    /// Read available bytes, waiting at most the configured timeout.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Number of bytes that can be read without waiting.
    fn bytes_to_read(&mut self) -> io::Result<u32>;

    /// Write the whole buffer.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Close the channel. Best-effort; the driver logs but ignores failure.
    fn close(&mut self) -> io::Result<()>;
}

/// How a port identifier string is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSpec {
    /// A serial device path such as `/dev/ttyACM0` or `COM3`.
    Serial(String),
    /// The in-memory simulated machine.
    Simulation,
    /// A TCP tunnel to a remote controller (`tcp://host[:port]`).
    Tunnel(String, u16),
}

impl PortSpec {
    /// Parse a port identifier from configuration.
    pub fn parse(portname: &str) -> Result<PortSpec, ProtocolError> {
        let trimmed = portname.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::InvalidPort(portname.to_string()));
        }
        if trimmed.eq_ignore_ascii_case(SIMULATION_PORT) {
            return Ok(PortSpec::Simulation);
        }
        if let Some(rest) = trimmed.strip_prefix("tcp://") {
            let (host, port) = match rest.rsplit_once(':') {
                Some((host, port)) => {
                    let port = port
                        .parse::<u16>()
                        .map_err(|_| ProtocolError::InvalidPort(portname.to_string()))?;
                    (host, port)
                }
                None => (rest, TUNNEL_PORT),
            };
            if host.is_empty() {
                return Err(ProtocolError::InvalidPort(portname.to_string()));
            }
            return Ok(PortSpec::Tunnel(host.to_string(), port));
        }
        Ok(PortSpec::Serial(trimmed.to_string()))
    }
}

/// Serial port wrapper implementing [`Transport`].
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Open the named device at the controller baud rate.
    pub fn open(name: &str) -> Result<Self, ProtocolError> {
        let mut port = super::serial::open_port(name)?;
        super::serial::clear_buffers(port.as_mut())?;
        Ok(Self { port: Some(port) })
    }
}

impl Transport for SerialTransport {
    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.as_mut() {
            Some(port) => port.read(buf),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "port closed")),
        }
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        match self.port.as_mut() {
            Some(port) => port.bytes_to_read().map_err(io::Error::other),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "port closed")),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self.port.as_mut() {
            Some(port) => {
                port.write_all(buf)?;
                port.flush()
            }
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "port closed")),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        // Dropping the handle releases the device
        self.port = None;
        Ok(())
    }
}

/// TCP stream wrapper implementing [`Transport`], for tunnelled controllers.
pub struct TcpTransport {
    stream: Option<TcpStream>,
}

impl TcpTransport {
    /// Connect to `host:port` and configure the poll-friendly read timeout.
    pub fn connect(host: &str, port: u16) -> Result<Self, ProtocolError> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?
            .next()
            .ok_or_else(|| ProtocolError::OpenFailed(format!("{host}:{port}")))?;
        let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(10))
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
        Ok(Self {
            stream: Some(stream),
        })
    }
}

impl Transport for TcpTransport {
    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.as_mut() {
            Some(stream) => stream.read(buf),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "socket closed",
            )),
        }
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        let stream = self.stream.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "socket closed")
        })?;
        // peek() reports min(available, buffer size), which is plenty for
        // the short frames this protocol uses
        stream.set_nonblocking(true)?;
        let mut buf = [0u8; 4096];
        let result = stream.peek(&mut buf);
        stream.set_nonblocking(false)?;
        match result {
            Ok(n) => Ok(n as u32),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self.stream.as_mut() {
            Some(stream) => {
                stream.write_all(buf)?;
                stream.flush()
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "socket closed",
            )),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(stream) = self.stream.take() {
            stream.shutdown(std::net::Shutdown::Both)?;
        }
        Ok(())
    }
}
