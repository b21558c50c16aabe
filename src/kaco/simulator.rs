use crate::prelude::*;
use crate::kaco::channel::SerialChannel;

use std::collections::{HashMap, VecDeque};
use std::io::{self, ErrorKind};
use std::sync::{Arc, Mutex};

pub const IDENTIFICATION_REQUEST: &str = "#019\r";
pub const IDENTIFICATION_REPLY: &str = "\n*019 SG3502 h\r";
pub const MEASUREMENT_REQUEST: &str = "#010\r";
pub const MEASUREMENT_REPLY: &str =
    "\n*010   4 350.0  1.18   414 229.2  1.74   398  31   1139 x\r";

#[derive(Debug, Default)]
struct State {
    replies: HashMap<Vec<u8>, Vec<u8>>,
    pending: VecDeque<u8>,
    requests: Vec<Vec<u8>>,
    open: bool,
    connects: u64,
}

/// Scripted inverter: answers known request byte sequences with canned
/// replies and rejects anything else as a write failure.
///
/// Clones share the same state, so a test can keep a handle while the
/// provider owns and drops its own copy.
#[derive(Clone, Debug, Default)]
pub struct SimulatedChannel {
    state: Arc<Mutex<State>>,
}

impl SimulatedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// An SG3502 at address 1 replaying a recorded exchange.
    pub fn reference_device() -> Self {
        let channel = Self::new();
        channel.set_reply(IDENTIFICATION_REQUEST, IDENTIFICATION_REPLY);
        channel.set_reply(MEASUREMENT_REQUEST, MEASUREMENT_REPLY);
        channel
    }

    pub fn set_reply(&self, request: &str, reply: &str) {
        self.state()
            .replies
            .insert(request.as_bytes().to_vec(), reply.as_bytes().to_vec());
    }

    /// Every request written so far, oldest first.
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.state().requests.clone()
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }

    pub fn connects(&self) -> u64 {
        self.state().connects
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        // a test panicking while holding the lock must not hide its own failure
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SerialChannel for SimulatedChannel {
    fn connect(&mut self) -> io::Result<()> {
        let mut state = self.state();
        debug!("simulator: open");
        if state.open {
            return Err(io::Error::new(ErrorKind::AddrInUse, "port already in use"));
        }
        state.open = true;
        state.connects += 1;
        Ok(())
    }

    fn disconnect(&mut self) -> io::Result<()> {
        let mut state = self.state();
        debug!("simulator: close");
        if !state.open {
            return Err(io::Error::new(
                ErrorKind::NotConnected,
                "closed port without open",
            ));
        }
        state.open = false;
        state.pending.clear();
        Ok(())
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut state = self.state();
        if !state.open {
            return Err(io::Error::new(ErrorKind::NotConnected, "port not open"));
        }
        Ok(state.pending.pop_front())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let mut state = self.state();
        if !state.open {
            return Err(io::Error::new(ErrorKind::NotConnected, "port not open"));
        }

        state.requests.push(bytes.to_vec());

        let Some(reply) = state.replies.get(bytes).cloned() else {
            error!("simulator: unknown command {:?}", String::from_utf8_lossy(bytes));
            return Err(io::Error::new(ErrorKind::InvalidInput, "unknown command"));
        };

        state.pending = reply.into_iter().collect();
        Ok(bytes.len())
    }
}
