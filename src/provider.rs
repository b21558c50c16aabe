use crate::prelude::*;
use crate::error::CONNECTION_FAILED;
use crate::kaco::{ChannelGuard, ConnectionFactory, DefaultConnectionFactory, SerialChannel};
use crate::property;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::io;

#[derive(Default, Debug, Clone)]
pub struct ProviderStats {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub frames_sent: u64,
    pub frames_valid: u64,
    pub frames_invalid: u64,
    pub cache_hits: u64,
    pub transport_errors: u64,
    pub last_successful_read: Option<DateTime<Local>>,
}

impl ProviderStats {
    pub fn print_summary(&self, name: &str) {
        info!("Statistics for {}:", name);
        info!("  Work cycles: {} ({} failed)", self.cycles, self.failed_cycles);
        info!("  Frames sent: {}", self.frames_sent);
        info!("  Frames received valid: {}", self.frames_valid);
        info!("  Frames received invalid: {}", self.frames_invalid);
        info!("  Served from cache: {}", self.cache_hits);
        info!("  Transport errors: {}", self.transport_errors);
        match self.last_successful_read {
            Some(at) => info!("  Last successful read: {}", at.format("%Y-%m-%dT%H:%M:%S")),
            None => info!("  Last successful read: never"),
        }
    }
}

/// What one work cycle hands over for publishing.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CycleResult {
    pub utc_timestamp: i64,
    pub inverter: String,
    pub model: Option<String>,
    pub variables: Variables,
}

/// Provider for Schueco SGI inverters on a KACO bus.
///
/// Owns the command list (and with it the per-command cache) of exactly one
/// inverter. Work cycles are strictly sequential: open the channel, issue
/// every command one after the other, close the channel.
pub struct Schueco<F: ConnectionFactory = DefaultConnectionFactory> {
    factory: F,
    setting: config::Inverter,
    properties: Vec<CommandProperty>,
    model: Option<String>,
    stats: ProviderStats,
}

impl Schueco<DefaultConnectionFactory> {
    pub fn new(setting: config::Inverter) -> Result<Self> {
        Self::with_factory(DefaultConnectionFactory, setting)
    }
}

impl<F: ConnectionFactory> Schueco<F> {
    pub fn with_factory(factory: F, setting: config::Inverter) -> Result<Self> {
        let properties = property::load_properties(setting.fields_file())?;
        Ok(Self::with_properties(factory, setting, properties))
    }

    pub fn with_properties(
        factory: F,
        setting: config::Inverter,
        properties: Vec<CommandProperty>,
    ) -> Self {
        debug!(
            "instantiate provider {} with {} commands",
            setting.name(),
            properties.len()
        );
        Self {
            factory,
            setting,
            properties,
            model: None,
            stats: ProviderStats::default(),
        }
    }

    pub fn default_provider_setting() -> config::Inverter {
        config::Inverter::default()
    }

    pub fn name(&self) -> &str {
        self.setting.name()
    }

    pub fn setting(&self) -> &config::Inverter {
        &self.setting
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn properties(&self) -> &[CommandProperty] {
        &self.properties
    }

    pub fn stats(&self) -> &ProviderStats {
        &self.stats
    }

    /// Asks the device at `setting` for its model. Any failure at all turns
    /// into the same `connection failed` error.
    pub fn test_provider_connection(&self, setting: &config::Inverter) -> Result<String> {
        let identify = || -> Result<String> {
            let channel = self.factory.create_connection(setting)?;
            let mut channel = ChannelGuard::open(channel)?;
            Self::identify(&mut *channel, setting.address())
        };

        match identify() {
            Ok(model) => Ok(format!("Connection successful, device: {}", model)),
            Err(e) => {
                debug!("connection test for {} failed: {:#}", setting.name(), e);
                Err(anyhow!(CONNECTION_FAILED))
            }
        }
    }

    /// Learns the model name once, so it can go out with every cycle.
    pub fn do_on_first_run(&mut self) -> Result<()> {
        let channel = self.factory.create_connection(&self.setting)?;
        let mut channel = ChannelGuard::open(channel)?;
        let model = Self::identify(&mut *channel, self.setting.address())?;
        info!("{}: found {}", self.setting.name(), model);
        self.model = Some(model);
        Ok(())
    }

    /// Runs one cycle and packages the variables for publishing.
    pub fn run_cycle(&mut self) -> Result<CycleResult> {
        let mut variables = Variables::new();
        self.do_activity_work(&mut variables)?;

        Ok(CycleResult {
            utc_timestamp: Utc::now().timestamp(),
            inverter: self.setting.name().to_string(),
            model: self.model.clone(),
            variables,
        })
    }

    /// Issues every configured command and merges the decoded values into
    /// `variables`.
    ///
    /// A transport error on one command does not stop the others, but the
    /// first one is returned once all commands have been tried. Invalid
    /// replies are not errors: the command either falls back to its cached
    /// reply or contributes nothing this cycle.
    pub fn do_activity_work(&mut self, variables: &mut Variables) -> Result<()> {
        self.stats.cycles += 1;

        let result = self.work_properties(variables);
        if result.is_err() {
            self.stats.failed_cycles += 1;
        }
        result
    }

    fn work_properties(&mut self, variables: &mut Variables) -> Result<()> {
        let name = self.setting.name().to_string();
        let address = self.setting.address();

        let mut channel = self
            .factory
            .create_connection(&self.setting)
            .and_then(ChannelGuard::open)
            .map_err(|e| {
                self.stats.transport_errors += 1;
                file_error_with_source!(e, "{}: cannot open channel", name)
            })?;

        if self.model.is_none() {
            match Self::identify(&mut *channel, address) {
                Ok(model) => {
                    info!("{}: found {}", name, model);
                    self.model = Some(model);
                }
                Err(e) => warn!("{}: identification failed: {:#}", name, e),
            }
        }

        let mut first_error = None;
        for property in self.properties.iter_mut() {
            let command = property.command;
            if let Err(e) = Self::handle_command_property(
                &mut *channel,
                address,
                property,
                &mut self.stats,
                variables,
            ) {
                error!("{}: command {} failed: {}", name, command, e);
                self.stats.transport_errors += 1;
                first_error.get_or_insert(file_error_with_source!(
                    e,
                    "{}: command {}",
                    name,
                    command
                ));
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn handle_command_property<C: SerialChannel + ?Sized>(
        channel: &mut C,
        address: u8,
        property: &mut CommandProperty,
        stats: &mut ProviderStats,
        variables: &mut Variables,
    ) -> io::Result<()> {
        let request = Frame::request(address, property.command);
        debug!("send command {} to address {}", property.command, address);

        stats.frames_sent += 1;
        let reply = KacoProtocol::exchange(channel, &request)?;
        debug!("{}", reply);

        if reply.is_valid() {
            stats.frames_valid += 1;
            stats.last_successful_read = Some(Local::now());

            let data = reply.into_data();
            StringArrayCalculator::calculate(&data, &property.property_field_list, variables);
            property.set_cached_value(data);
        } else {
            stats.frames_invalid += 1;
            error!(
                "invalid frame, address:{}, command:{}",
                address, property.command
            );

            if property.cache_on_failure {
                Self::handle_cached_command_property(property, stats, variables);
            }
        }

        Ok(())
    }

    fn handle_cached_command_property(
        property: &CommandProperty,
        stats: &mut ProviderStats,
        variables: &mut Variables,
    ) {
        match property.cached_value() {
            Some(cached) => {
                debug!("use cached value {:?}", cached);
                stats.cache_hits += 1;
                StringArrayCalculator::calculate(cached, &property.property_field_list, variables);
            }
            None => debug!("no cached value for command {} yet", property.command),
        }
    }

    fn identify<C: SerialChannel + ?Sized>(channel: &mut C, address: u8) -> Result<String> {
        let request = Frame::request(address, KacoCommand::Identification.as_char());
        let reply = KacoProtocol::exchange(channel, &request)?;

        match reply.data().first() {
            Some(model) if reply.is_valid() => Ok(model.clone()),
            _ => bail!("invalid identification reply: {}", reply),
        }
    }
}
