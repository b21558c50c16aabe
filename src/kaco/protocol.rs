use crate::prelude::*;
use crate::kaco::channel::SerialChannel;
use crate::kaco::frame::{Frame, KacoCommand, TERMINATOR};

use bytes::{BufMut, BytesMut};
use std::io::{self, ErrorKind};

/// Upper bound for one reply line; anything longer is not a KACO reply.
pub const MAX_LINE_LENGTH: usize = 256;

/// Number of payload tokens each reply layout carries.
const REPLY_ARITY: &[(KacoCommand, usize)] = &[
    // model name
    (KacoCommand::Identification, 1),
    // index, DC voltage, DC current, DC power, AC voltage, AC current,
    // AC power, temperature, daily energy
    (KacoCommand::Measurement, 9),
];

pub struct KacoProtocol;

impl KacoProtocol {
    pub fn reply_arity(command: char) -> Option<usize> {
        let command = KacoCommand::from_char(command)?;
        REPLY_ARITY
            .iter()
            .find(|(known, _)| *known == command)
            .map(|(_, arity)| *arity)
    }

    pub fn send_data<C: SerialChannel + ?Sized>(channel: &mut C, frame: &Frame) -> io::Result<()> {
        let bytes = frame.encode();
        debug!("TX {:?}", String::from_utf8_lossy(&bytes));

        let written = channel.write_bytes(&bytes)?;
        if written != bytes.len() {
            return Err(io::Error::new(
                ErrorKind::WriteZero,
                format!("short write: {} of {} bytes", written, bytes.len()),
            ));
        }

        Ok(())
    }

    /// Reads exactly one reply line for `request`.
    ///
    /// Terminators and line feeds in front of the payload are leftovers of
    /// the previous exchange and are skipped. If the stream ends before a
    /// terminator shows up, the partial line comes back as an invalid frame.
    /// Lines longer than `MAX_LINE_LENGTH` are consumed up to their terminator
    /// and come back invalid as well.
    pub fn receive_data<C: SerialChannel + ?Sized>(
        channel: &mut C,
        request: &Frame,
    ) -> io::Result<Frame> {
        let mut line = BytesMut::with_capacity(64);
        let mut terminated = false;
        let mut overlong = false;

        while let Some(byte) = channel.read_byte()? {
            match byte {
                TERMINATOR | b'\n' if line.is_empty() => continue,
                TERMINATOR => {
                    terminated = true;
                    break;
                }
                // keep draining up to the terminator so the next reply starts clean
                _ if line.len() >= MAX_LINE_LENGTH => overlong = true,
                _ => line.put_u8(byte),
            }
        }

        let text = String::from_utf8_lossy(&line);
        debug!("RX {:?}", text);

        if overlong {
            warn!("reply exceeds {} bytes, discarded", MAX_LINE_LENGTH);
            return Ok(Frame::partial(&text, request));
        }

        if !terminated {
            debug!("no terminator after {} bytes", line.len());
            return Ok(Frame::partial(&text, request));
        }

        Ok(Frame::decode(
            &text,
            request,
            Self::reply_arity(request.command()),
        ))
    }

    /// One full round trip: write the request, then block for its reply.
    pub fn exchange<C: SerialChannel + ?Sized>(channel: &mut C, request: &Frame) -> io::Result<Frame> {
        Self::send_data(channel, request)?;
        Self::receive_data(channel, request)
    }
}
