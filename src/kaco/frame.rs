use crate::prelude::*;

use nom::{
    bytes::complete::take_while_m_n,
    character::complete::{anychar, char as marker},
    combinator::map_res,
    sequence::tuple,
    IResult,
};
use num_enum::{IntoPrimitive, TryFromPrimitive};

pub const REQUEST_MARKER: char = '#';
pub const REPLY_MARKER: char = '*';
pub const TERMINATOR: u8 = b'\r';

// {{{ KacoCommand
/// Commands with a known reply layout. The wire carries the raw character,
/// so anything configured outside this list still encodes fine but can never
/// decode into a valid frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum KacoCommand {
    Measurement = b'0',
    Identification = b'9',
}

impl KacoCommand {
    pub fn as_char(self) -> char {
        u8::from(self) as char
    }

    pub fn from_char(command: char) -> Option<Self> {
        u8::try_from(command)
            .ok()
            .and_then(|byte| Self::try_from(byte).ok())
    }
}
// }}}

// {{{ Frame
/// One protocol unit. Requests only carry address and command, replies add
/// the payload tokens and the validity flag. Never mutated after construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    address: u8,
    command: char,
    data: Vec<String>,
    trailer: Option<String>,
    valid: bool,
}

impl Frame {
    pub fn request(address: u8, command: char) -> Self {
        Self {
            address,
            command,
            data: Vec::new(),
            trailer: None,
            valid: false,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn command(&self) -> char {
        self.command
    }

    pub fn data(&self) -> &[String] {
        &self.data
    }

    pub fn into_data(self) -> Vec<String> {
        self.data
    }

    /// Status token some replies append after the payload (`h`, `x`, ...).
    pub fn trailer(&self) -> Option<&str> {
        self.trailer.as_deref()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// `#` + two digit address + command + CR, e.g. `#010\r`.
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "{}{:02}{}{}",
            REQUEST_MARKER, self.address, self.command, TERMINATOR as char
        )
        .into_bytes()
    }

    /// Decodes one reply line for `request`. `arity` is the number of payload
    /// tokens the reply must carry; `None` means the reply layout is unknown.
    ///
    /// Never fails: anything malformed yields an invalid frame whose `data`
    /// holds whatever tokens could be split out of the line.
    pub fn decode(line: &str, request: &Frame, arity: Option<usize>) -> Frame {
        let line = line.trim_matches(|c: char| c.is_control());

        let (rest, (address, command)) = match Self::header(line) {
            Ok(parsed) => parsed,
            Err(_) => {
                debug!("reply without valid header: {:?}", line);
                return Self::partial(line, request);
            }
        };

        let mut frame = Frame::request(request.address, request.command);

        frame.data = Self::tokens(rest);

        if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
            debug!("reply header not followed by whitespace: {:?}", line);
            return frame;
        }

        if address != request.address || command != request.command {
            warn!(
                "reply echoes address {:02} command {}, expected address {:02} command {}",
                address, command, request.address, request.command
            );
            return frame;
        }

        let Some(arity) = arity else {
            warn!("no reply layout known for command {}", command);
            return frame;
        };

        match frame.data.len().checked_sub(arity) {
            Some(0) => frame.valid = true,
            Some(1) if frame.data.last().map_or(false, |t| is_status_token(t)) => {
                frame.trailer = frame.data.pop();
                frame.valid = true;
            }
            _ => {
                debug!(
                    "reply for command {} has {} tokens, expected {}",
                    command,
                    frame.data.len(),
                    arity
                );
            }
        }

        frame
    }

    /// Invalid frame holding the best-effort split of an incomplete line.
    pub fn partial(line: &str, request: &Frame) -> Frame {
        let mut frame = Frame::request(request.address, request.command);
        frame.data = Self::tokens(line.trim_matches(|c: char| c.is_control()));
        frame
    }

    fn header(input: &str) -> IResult<&str, (u8, char)> {
        let (rest, (_, address, command)) = tuple((
            marker(REPLY_MARKER),
            map_res(
                take_while_m_n(2, 2, |c: char| c.is_ascii_digit()),
                str::parse::<u8>,
            ),
            anychar,
        ))(input)?;

        Ok((rest, (address, command)))
    }

    fn tokens(input: &str) -> Vec<String> {
        input.split_whitespace().map(str::to_owned).collect()
    }
}

/// Status letters like `h` or `x`; a number in that position is an extra
/// payload token instead.
fn is_status_token(token: &str) -> bool {
    token.chars().all(|c| c.is_ascii_alphabetic())
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Frame(address={:02}, command={}, valid={}, data={:?})",
            self.address, self.command, self.valid, self.data
        )
    }
}
// }}}
