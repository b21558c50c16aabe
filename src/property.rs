use crate::prelude::*;
use serde::Deserialize;
use std::collections::HashSet;

/// Field definitions for the Schueco SGI measurement block.
pub const DEFAULT_FIELDS: &str = include_str!("../resources/schueco_fields.json");

/// Maps one payload token to a named variable.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PropertyField {
    pub index: usize,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default)]
    pub offset: f64,
    /// Round the scaled value to this many decimal places, 15 at most.
    pub decimals: Option<u32>,
    #[serde(default)]
    pub unit: String,
}

/// More places than an f64 can represent.
const MAX_DECIMALS: u32 = 15;

fn default_factor() -> f64 {
    1.0
}

impl PropertyField {
    pub fn new(index: usize, name: &str) -> Self {
        Self {
            index,
            name: name.to_string(),
            description: String::new(),
            factor: default_factor(),
            offset: 0.0,
            decimals: None,
            unit: String::new(),
        }
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_decimals(mut self, decimals: u32) -> Self {
        self.decimals = Some(decimals);
        self
    }

    /// Parses `raw` with `.` as decimal separator regardless of locale and
    /// applies factor, offset and rounding. `None` if it isn't a number.
    pub fn decode_value(&self, raw: &str) -> Option<f64> {
        let value = raw.trim().parse::<f64>().ok()?;
        let value = value * self.factor + self.offset;

        let value = match self.decimals {
            Some(decimals) => {
                let scale = 10f64.powi(decimals.min(MAX_DECIMALS) as i32);
                (value * scale).round() / scale
            }
            None => value,
        };

        Some(value).filter(|v| v.is_finite())
    }
}

/// One command issued every work cycle plus the rules for its reply.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandProperty {
    pub command: char,
    #[serde(default)]
    pub description: String,
    /// Serve the last good reply when a live read comes back invalid.
    #[serde(default)]
    pub cache_on_failure: bool,
    #[serde(rename = "fields")]
    pub property_field_list: Vec<PropertyField>,
    #[serde(skip)]
    cached_value: Option<Vec<String>>,
}

impl CommandProperty {
    pub fn new(command: char, property_field_list: Vec<PropertyField>) -> Self {
        Self {
            command,
            description: String::new(),
            cache_on_failure: false,
            property_field_list,
            cached_value: None,
        }
    }

    pub fn with_cache_on_failure(mut self, cache_on_failure: bool) -> Self {
        self.cache_on_failure = cache_on_failure;
        self
    }

    pub fn cached_value(&self) -> Option<&[String]> {
        self.cached_value.as_deref()
    }

    pub fn set_cached_value(&mut self, data: Vec<String>) {
        self.cached_value = Some(data);
    }
}

#[derive(Debug, Deserialize)]
struct PropertyFile {
    commands: Vec<CommandProperty>,
}

/// Loads command definitions from `file`, or the built-in Schueco set.
pub fn load_properties(file: Option<&str>) -> Result<Vec<CommandProperty>> {
    match file {
        Some(file) => {
            info!("Reading field definitions from {}", file);
            let content = std::fs::read_to_string(file)
                .map_err(|err| anyhow!("Error reading field file {}: {}", file, err))?;
            parse_properties(&content)
        }
        None => parse_properties(DEFAULT_FIELDS),
    }
}

pub fn parse_properties(content: &str) -> Result<Vec<CommandProperty>> {
    let file: PropertyFile = serde_json::from_str(content)
        .map_err(|err| anyhow!("Error parsing field definitions: {}", err))?;

    if file.commands.is_empty() {
        bail!("field definitions contain no commands");
    }

    let mut seen = HashSet::new();
    for field in file.commands.iter().flat_map(|c| &c.property_field_list) {
        if !seen.insert(field.name.as_str()) {
            warn!("variable {} is defined more than once, last one wins", field.name);
        }
    }

    Ok(file.commands)
}
