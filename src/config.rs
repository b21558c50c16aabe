use crate::prelude::*;

use serde::Deserialize;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub inverters: Vec<Inverter>,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,

    /// Seconds between two work cycles of the same inverter.
    #[serde(default = "Config::default_interval_secs")]
    pub interval_secs: u64,

    /// Optional path to append each cycle's variables to, as JSON lines
    pub datalog_file: Option<String>,
}

// {{{ Transport
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Transport {
    Serial {
        port: String,
        #[serde(default = "Config::default_baud_rate")]
        baud_rate: u32,
        #[serde(default = "Config::default_timeout_ms")]
        timeout_ms: u64,
    },
    Tcp {
        host: String,
        port: u16,
        #[serde(default = "Config::default_timeout_ms")]
        timeout_ms: u64,
    },
    Simulated,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Serial { port, baud_rate, .. } => write!(f, "serial {} @ {} baud", port, baud_rate),
            Transport::Tcp { host, port, .. } => write!(f, "tcp {}:{}", host, port),
            Transport::Simulated => write!(f, "simulated"),
        }
    }
}
// }}}

// {{{ Inverter
#[derive(Clone, Debug, Deserialize)]
pub struct Inverter {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    pub name: String,

    /// Bus address, two decimal digits on the wire.
    #[serde(default = "Config::default_address")]
    pub address: u8,

    pub transport: Transport,

    /// JSON field definitions; the built-in Schueco set when absent.
    pub fields_file: Option<String>,
}

impl Default for Inverter {
    /// What a freshly added Schueco SGI starts with: USB serial at 9600 baud,
    /// bus address 1.
    fn default() -> Self {
        Self {
            enabled: Config::default_enabled(),
            name: "schueco".to_string(),
            address: Config::default_address(),
            transport: Transport::Serial {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: Config::default_baud_rate(),
                timeout_ms: Config::default_timeout_ms(),
            },
            fields_file: None,
        }
    }
}

impl Inverter {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn fields_file(&self) -> Option<&str> {
        self.fields_file.as_deref()
    }
}
// }}}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        Ok(Self::from_config(Config::new(file)?))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Config> {
        self.config.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn inverters(&self) -> Vec<Inverter> {
        self.lock().inverters.clone()
    }

    pub fn enabled_inverters(&self) -> Vec<Inverter> {
        self.inverters().into_iter().filter(|i| i.enabled()).collect()
    }

    pub fn inverter_with_name(&self, name: &str) -> Option<Inverter> {
        self.inverters().into_iter().find(|i| i.name() == name)
    }

    pub fn loglevel(&self) -> String {
        self.lock().loglevel.clone()
    }

    pub fn interval_secs(&self) -> u64 {
        self.lock().interval_secs
    }

    pub fn datalog_file(&self) -> Option<String> {
        self.lock().datalog_file.clone()
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| file_error!("error reading {}: {}", file, err))?;

        let config = Self::from_yaml(&content)?;

        info!("Configuration loaded successfully:");
        info!(
            "  Inverters: {} configured, {} enabled",
            config.inverters.len(),
            config.inverters.iter().filter(|i| i.enabled).count()
        );
        for (i, inv) in config.inverters.iter().enumerate() {
            info!("    Inverter[{}]:", i);
            info!("      Name: {}", inv.name);
            info!("      Enabled: {}", inv.enabled);
            info!("      Address: {}", inv.address);
            info!("      Transport: {}", inv.transport);
            info!(
                "      Fields: {}",
                inv.fields_file.as_deref().unwrap_or("built-in")
            );
        }
        info!("  Interval: {}s", config.interval_secs);
        info!(
            "  Datalog: {}",
            config.datalog_file.as_deref().unwrap_or("disabled")
        );
        info!("  Log Level: {}", config.loglevel);

        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.inverters.is_empty() {
            bail!("at least one inverter must be configured");
        }

        if self.interval_secs == 0 {
            return Err(file_error!("interval_secs must be at least 1"));
        }

        for (i, inv) in self.inverters.iter().enumerate() {
            if inv.name.is_empty() {
                return Err(file_error!("inverter[{}].name cannot be empty", i));
            }
            if inv.address > 99 {
                bail!("inverter[{}].address must be between 0 and 99", i);
            }

            match &inv.transport {
                Transport::Serial {
                    port,
                    baud_rate,
                    timeout_ms,
                } => {
                    if port.is_empty() {
                        return Err(file_error!("inverter[{}] serial port cannot be empty", i));
                    }
                    if *baud_rate == 0 {
                        return Err(file_error!("inverter[{}] invalid baud rate: 0", i));
                    }
                    if *timeout_ms == 0 {
                        return Err(file_error!("inverter[{}] invalid timeout: 0", i));
                    }
                }
                Transport::Tcp {
                    host,
                    port,
                    timeout_ms,
                } => {
                    if host.is_empty() {
                        return Err(file_error!("inverter[{}] host cannot be empty", i));
                    }
                    if *port == 0 {
                        bail!("inverter[{}].port must be between 1 and 65535", i);
                    }
                    if *timeout_ms == 0 {
                        return Err(file_error!("inverter[{}] invalid timeout: 0", i));
                    }
                }
                Transport::Simulated => {}
            }
        }

        Ok(())
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }

    fn default_interval_secs() -> u64 {
        60
    }

    fn default_address() -> u8 {
        1
    }

    fn default_baud_rate() -> u32 {
        9600
    }

    fn default_timeout_ms() -> u64 {
        1000
    }
}
