pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::io::Write;
pub use tokio::sync::broadcast;

pub use crate::calculator::{StringArrayCalculator, Variables};
pub use crate::channels::Channels;
pub use crate::config::{self, Config, ConfigWrapper};
pub use crate::kaco::{self, Frame, KacoCommand, KacoProtocol};
pub use crate::options::Options;
pub use crate::property::{CommandProperty, PropertyField};
pub use crate::{file_error, file_error_with_source};
