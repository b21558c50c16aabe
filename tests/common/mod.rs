#![allow(dead_code)]

use schueco_bridge::kaco::{ConnectionFactory, SimulatedChannel};
use schueco_bridge::prelude::*;
use std::io;

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Hands out clones of one simulated device, so a test keeps a handle on
/// the state the provider sees.
pub struct SimulatedFactory {
    pub device: SimulatedChannel,
}

impl ConnectionFactory for SimulatedFactory {
    type Channel = SimulatedChannel;

    fn create_connection(&self, _inverter: &config::Inverter) -> io::Result<SimulatedChannel> {
        Ok(self.device.clone())
    }
}

/// Always fails to produce a channel, like a missing USB adapter.
pub struct UnpluggedFactory;

impl ConnectionFactory for UnpluggedFactory {
    type Channel = SimulatedChannel;

    fn create_connection(&self, _inverter: &config::Inverter) -> io::Result<SimulatedChannel> {
        Err(io::Error::new(io::ErrorKind::NotFound, "/dev/ttyUSB0 not found"))
    }
}

pub struct Factory;

impl Factory {
    pub fn inverter() -> config::Inverter {
        config::Inverter {
            name: "roof".to_string(),
            transport: config::Transport::Simulated,
            ..Default::default()
        }
    }

    pub fn measurement_fields() -> Vec<PropertyField> {
        vec![
            PropertyField::new(1, "solarspannung").with_decimals(1),
            PropertyField::new(3, "solarleistung"),
            PropertyField::new(4, "netzspannung").with_decimals(1),
            PropertyField::new(6, "wattleistung"),
            PropertyField::new(7, "geraetetemperatur"),
            PropertyField::new(8, "tagesenergie"),
        ]
    }

    pub fn measurement_property() -> CommandProperty {
        CommandProperty::new('0', Self::measurement_fields()).with_cache_on_failure(true)
    }

    pub fn measurement_data() -> Vec<String> {
        ["4", "350.0", "1.18", "414", "229.2", "1.74", "398", "31", "1139"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
}
