mod common;
use common::*;
use schueco_bridge::kaco::channel::{ChannelGuard, SerialChannel};
use schueco_bridge::kaco::frame::Frame;
use schueco_bridge::kaco::protocol::{KacoProtocol, MAX_LINE_LENGTH};
use schueco_bridge::kaco::simulator::{self, SimulatedChannel};
use std::collections::VecDeque;
use std::io;

fn open(device: &SimulatedChannel) -> ChannelGuard<SimulatedChannel> {
    ChannelGuard::open(device.clone()).unwrap()
}

#[test]
fn arity_table() {
    assert_eq!(KacoProtocol::reply_arity('9'), Some(1));
    assert_eq!(KacoProtocol::reply_arity('0'), Some(9));
    assert_eq!(KacoProtocol::reply_arity('5'), None);
}

#[test]
fn round_trip_with_reference_device() -> io::Result<()> {
    common_setup();

    let device = SimulatedChannel::reference_device();
    let mut channel = open(&device);

    let identification = KacoProtocol::exchange(&mut *channel, &Frame::request(1, '9'))?;
    assert!(identification.is_valid());
    assert_eq!(identification.data(), ["SG3502"]);

    let measurement = KacoProtocol::exchange(&mut *channel, &Frame::request(1, '0'))?;
    assert!(measurement.is_valid());
    assert_eq!(measurement.data().len(), 9);
    assert_eq!(measurement.data(), Factory::measurement_data().as_slice());

    assert_eq!(
        device.requests(),
        vec![
            simulator::IDENTIFICATION_REQUEST.as_bytes().to_vec(),
            simulator::MEASUREMENT_REQUEST.as_bytes().to_vec(),
        ]
    );

    Ok(())
}

#[test]
fn skips_empty_leading_lines() -> io::Result<()> {
    common_setup();

    let device = SimulatedChannel::new();
    device.set_reply(
        simulator::MEASUREMENT_REQUEST,
        "\r\n\r\n*010   4 350.0  1.18   414 229.2  1.74   398  31   1139 x\r",
    );
    let mut channel = open(&device);

    let frame = KacoProtocol::exchange(&mut *channel, &Frame::request(1, '0'))?;

    assert!(frame.is_valid());
    assert_eq!(frame.data()[0], "4");

    Ok(())
}

#[test]
fn reads_exactly_one_line() -> io::Result<()> {
    let device = SimulatedChannel::new();
    device.set_reply(simulator::IDENTIFICATION_REQUEST, "\n*019 SG3502 h\r*019 OTHER h\r");
    let mut channel = open(&device);

    let request = Frame::request(1, '9');
    KacoProtocol::send_data(&mut *channel, &request)?;

    let first = KacoProtocol::receive_data(&mut *channel, &request)?;
    assert_eq!(first.data(), ["SG3502"]);

    let second = KacoProtocol::receive_data(&mut *channel, &request)?;
    assert_eq!(second.data(), ["OTHER"]);

    Ok(())
}

#[test]
fn end_of_stream_before_terminator_is_invalid() -> io::Result<()> {
    common_setup();

    let device = SimulatedChannel::new();
    device.set_reply(simulator::MEASUREMENT_REQUEST, "\n*010   4 350.0  1.18");
    let mut channel = open(&device);

    let frame = KacoProtocol::exchange(&mut *channel, &Frame::request(1, '0'))?;

    assert!(!frame.is_valid());
    assert_eq!(frame.data(), ["*010", "4", "350.0", "1.18"]);

    Ok(())
}

#[test]
fn silent_device_yields_invalid_frame() -> io::Result<()> {
    let device = SimulatedChannel::new();
    device.set_reply(simulator::MEASUREMENT_REQUEST, "");
    let mut channel = open(&device);

    let frame = KacoProtocol::exchange(&mut *channel, &Frame::request(1, '0'))?;

    assert!(!frame.is_valid());
    assert!(frame.data().is_empty());

    Ok(())
}

#[test]
fn overlong_line_is_invalid() -> io::Result<()> {
    let device = SimulatedChannel::new();
    let reply = format!("\n*010 {}\r", "9".repeat(MAX_LINE_LENGTH * 2));
    device.set_reply(simulator::MEASUREMENT_REQUEST, &reply);
    let mut channel = open(&device);

    let frame = KacoProtocol::exchange(&mut *channel, &Frame::request(1, '0'))?;
    assert!(!frame.is_valid());

    Ok(())
}

#[test]
fn unknown_request_is_a_transport_error() {
    common_setup();

    let device = SimulatedChannel::reference_device();
    let mut channel = open(&device);

    let err = KacoProtocol::exchange(&mut *channel, &Frame::request(1, '5')).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
}

struct BrokenChannel;

impl SerialChannel for BrokenChannel {
    fn connect(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn disconnect(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<usize> {
        Ok(bytes.len() - 1)
    }
}

#[test]
fn read_errors_propagate() {
    let err = KacoProtocol::receive_data(&mut BrokenChannel, &Frame::request(1, '0')).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
}

#[test]
fn short_writes_are_errors() {
    let err = KacoProtocol::send_data(&mut BrokenChannel, &Frame::request(1, '0')).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::WriteZero);
}

#[test]
fn guard_closes_channel_on_drop() {
    let device = SimulatedChannel::reference_device();
    {
        let _channel = open(&device);
        assert!(device.is_open());
    }
    assert!(!device.is_open());
}

#[test]
fn simulator_refuses_double_open() {
    let device = SimulatedChannel::reference_device();
    let _channel = open(&device);

    assert!(ChannelGuard::open(device.clone()).is_err());
}

/// Bytes stay on the line across exchanges, the way a real port buffers them.
struct WireChannel {
    buffer: VecDeque<u8>,
}

impl WireChannel {
    fn new(wire: &str) -> Self {
        Self {
            buffer: wire.bytes().collect(),
        }
    }
}

impl SerialChannel for WireChannel {
    fn connect(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn disconnect(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.buffer.pop_front())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<usize> {
        Ok(bytes.len())
    }
}

#[test]
fn overlong_line_does_not_leak_into_next_reply() -> io::Result<()> {
    common_setup();

    let wire = format!(
        "\n*010 {}\r{}",
        "9 ".repeat(MAX_LINE_LENGTH),
        simulator::IDENTIFICATION_REPLY
    );
    let mut channel = WireChannel::new(&wire);

    let measurement = KacoProtocol::receive_data(&mut channel, &Frame::request(1, '0'))?;
    assert!(!measurement.is_valid());

    let identification = KacoProtocol::receive_data(&mut channel, &Frame::request(1, '9'))?;
    assert!(identification.is_valid());
    assert_eq!(identification.data(), ["SG3502"]);

    Ok(())
}
