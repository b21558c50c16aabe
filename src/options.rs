use clap::Parser;

/// Schueco Bridge - polls Schueco SGI inverters over the KACO serial protocol
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Config file to read
    #[clap(short = 'c', long = "config", default_value = "config.yaml")]
    pub config_file: String,

    /// Check that every enabled inverter answers, then exit
    #[clap(long = "test-connection")]
    pub test_connection: bool,

    /// Run one work cycle per enabled inverter, print the results as JSON and exit
    #[clap(long = "once")]
    pub once: bool,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}

