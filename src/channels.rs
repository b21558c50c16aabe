use crate::prelude::*;
use crate::{datalog_writer, scheduler};

#[derive(Debug, Clone)]
pub struct Channels {
    pub to_datalog: broadcast::Sender<datalog_writer::ChannelData>,
    pub to_scheduler: broadcast::Sender<scheduler::ChannelData>,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    pub fn new() -> Self {
        Self {
            to_datalog: Self::channel(),
            to_scheduler: Self::channel(),
        }
    }

    fn channel<T: Clone>() -> broadcast::Sender<T> {
        broadcast::channel(256).0
    }
}
