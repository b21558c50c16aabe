use crate::prelude::*;
use crate::kaco::simulator::SimulatedChannel;

use {
    enum_dispatch::enum_dispatch,
    std::io::{self, ErrorKind, Read, Write},
    std::net::{TcpStream, ToSocketAddrs},
    std::time::Duration,
};

// {{{ SerialChannel
/// Byte level, half duplex link to one or more inverters on a bus.
#[enum_dispatch]
pub trait SerialChannel {
    fn connect(&mut self) -> io::Result<()>;

    fn disconnect(&mut self) -> io::Result<()>;

    /// Blocks until a byte arrives. `Ok(None)` means end of stream: the
    /// device has nothing more to send for the current exchange.
    fn read_byte(&mut self) -> io::Result<Option<u8>>;

    /// Writes the whole buffer and returns the number of bytes written.
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<usize>;
}
// }}}

// {{{ ChannelGuard
/// Keeps a channel connected for the lifetime of the guard; the channel is
/// disconnected when the guard goes out of scope, whichever way that happens.
pub struct ChannelGuard<C: SerialChannel> {
    channel: C,
}

impl<C: SerialChannel> ChannelGuard<C> {
    pub fn open(mut channel: C) -> io::Result<Self> {
        channel.connect()?;
        Ok(Self { channel })
    }
}

impl<C: SerialChannel> std::ops::Deref for ChannelGuard<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.channel
    }
}

impl<C: SerialChannel> std::ops::DerefMut for ChannelGuard<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.channel
    }
}

impl<C: SerialChannel> Drop for ChannelGuard<C> {
    fn drop(&mut self) {
        if let Err(e) = self.channel.disconnect() {
            warn!("failed to close channel: {}", e);
        }
    }
}
// }}}

fn not_connected() -> io::Error {
    io::Error::new(ErrorKind::NotConnected, "channel not connected")
}

fn already_connected() -> io::Error {
    io::Error::new(ErrorKind::AddrInUse, "channel already connected")
}

// {{{ UsbChannel
pub struct UsbChannel {
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl UsbChannel {
    pub fn new(port_name: &str, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud_rate,
            timeout,
            port: None,
        }
    }
}

impl SerialChannel for UsbChannel {
    fn connect(&mut self) -> io::Result<()> {
        if self.port.is_some() {
            return Err(already_connected());
        }

        debug!("opening {} at {} baud", self.port_name, self.baud_rate);
        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(self.timeout)
            .open()?;

        // drop anything the device sent while nobody was listening
        port.clear(serialport::ClearBuffer::All)?;

        self.port = Some(port);
        Ok(())
    }

    fn disconnect(&mut self) -> io::Result<()> {
        debug!("closing {}", self.port_name);
        self.port.take().map(drop).ok_or_else(not_connected)
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let port = self.port.as_mut().ok_or_else(not_connected)?;

        let mut buf = [0u8; 1];
        match port.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let port = self.port.as_mut().ok_or_else(not_connected)?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(bytes.len())
    }
}
// }}}

// {{{ TcpChannel
/// Serial bus reached through a transparent TCP-to-RS485 converter.
pub struct TcpChannel {
    host: String,
    port: u16,
    timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpChannel {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout,
            stream: None,
        }
    }
}

impl SerialChannel for TcpChannel {
    fn connect(&mut self) -> io::Result<()> {
        if self.stream.is_some() {
            return Err(already_connected());
        }

        debug!("connecting to {}:{}", self.host, self.port);
        let mut last_error = None;
        for addr in (self.host.as_str(), self.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("Failed to set TCP_NODELAY: {}", e);
                    }
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                ErrorKind::NotFound,
                format!("{}:{} did not resolve", self.host, self.port),
            )
        }))
    }

    fn disconnect(&mut self) -> io::Result<()> {
        debug!("disconnecting from {}:{}", self.host, self.port);
        let stream = self.stream.take().ok_or_else(not_connected)?;
        match stream.shutdown(std::net::Shutdown::Both) {
            Err(e) if e.kind() != ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;

        let mut buf = [0u8; 1];
        match stream.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(bytes.len())
    }
}
// }}}

// {{{ Connection
#[enum_dispatch(SerialChannel)]
pub enum Connection {
    Usb(UsbChannel),
    Tcp(TcpChannel),
    Simulated(SimulatedChannel),
}

impl Connection {
    pub fn from_transport(transport: &config::Transport) -> Self {
        use config::Transport::*;

        match transport {
            Serial {
                port,
                baud_rate,
                timeout_ms,
            } => UsbChannel::new(port, *baud_rate, Duration::from_millis(*timeout_ms)).into(),
            Tcp {
                host,
                port,
                timeout_ms,
            } => TcpChannel::new(host, *port, Duration::from_millis(*timeout_ms)).into(),
            Simulated => SimulatedChannel::reference_device().into(),
        }
    }
}
// }}}

// {{{ ConnectionFactory
/// Builds a fresh, unconnected channel for each work cycle.
pub trait ConnectionFactory {
    type Channel: SerialChannel;

    fn create_connection(&self, inverter: &config::Inverter) -> io::Result<Self::Channel>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultConnectionFactory;

impl ConnectionFactory for DefaultConnectionFactory {
    type Channel = Connection;

    fn create_connection(&self, inverter: &config::Inverter) -> io::Result<Connection> {
        Ok(Connection::from_transport(inverter.transport()))
    }
}
// }}}
