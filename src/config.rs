use std::{
    collections::HashMap,
    io,
    net::{IpAddr, Ipv4Addr},
    path::Path,
    time::Duration,
};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::defs::{Circuit, CommandTable, Field};

/* === Definitions === */

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub vcontrold: VcontroldConfig,
    pub circuits: Vec<CircuitConfig>,
    pub refresh: RefreshConfig,
    pub server: ServerConfig,
    pub device: DeviceInfo,
}

/// Where the vcontrold daemon listens and how long to wait for it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VcontroldConfig {
    pub ip: IpAddr,
    pub port: u16,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CircuitConfig {
    pub circuit: Circuit,

    /// Raw mode written when the circuit is switched off. Defaults to the
    /// per-circuit convention (HK1 keeps hot water running).
    pub off_value: Option<f32>,

    #[serde(default = "default_min_setpoint")]
    pub min_setpoint: f32,
    #[serde(default = "default_max_setpoint")]
    pub max_setpoint: f32,

    #[serde(default)]
    pub commands: CommandOverrides,
}

/// Replacement or additional vcontrold command names, keyed by field.
/// Installations whose XML exposes e.g. a room temperature sensor can add
/// `read: { current_temperature: getTempRaumM1 }` here.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandOverrides {
    pub read: HashMap<Field, String>,
    pub write: HashMap<Field, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub ip: IpAddr,
    pub port: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    pub manufacturer: String,
    pub model: String,
}

/* === Implementations === */

impl Config {
    /// Reads and parses the YAML configuration. A missing file is not an
    /// error; the built-in defaults (both circuits, localhost daemon) apply.
    pub async fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();

        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,

            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::warn!("No configuration at {}, using defaults", path.display());
                return Ok(Config::default());
            }

            Err(err) => {
                return Err(err).wrap_err_with(|| format!("Failed to read {}", path.display()));
            }
        };

        serde_yaml::from_str(&contents)
            .wrap_err_with(|| format!("Failed to parse {}", path.display()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vcontrold: VcontroldConfig::default(),
            circuits: Circuit::iter().map(CircuitConfig::new).collect(),
            refresh: RefreshConfig::default(),
            server: ServerConfig::default(),
            device: DeviceInfo::default(),
        }
    }
}

impl Default for VcontroldConfig {
    fn default() -> Self {
        Self {
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 3002,
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitConfig {
    pub fn new(circuit: Circuit) -> Self {
        Self {
            circuit,
            off_value: None,
            min_setpoint: default_min_setpoint(),
            max_setpoint: default_max_setpoint(),
            commands: CommandOverrides::default(),
        }
    }

    pub fn off_value(&self) -> f32 {
        self.off_value
            .unwrap_or_else(|| self.circuit.default_off_value())
    }

    /// Default command names merged with the configured overrides.
    pub fn command_table(&self) -> CommandTable {
        let mut table = CommandTable::defaults(self.circuit);

        for field in Field::iter() {
            if let Some(target) = self.commands.read.get(&field) {
                table.set_read_target(field, target.clone());
            }

            if let Some(target) = self.commands.write.get(&field) {
                table.set_write_target(field, target.clone());
            }
        }

        table
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30 * 60),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8083,
        }
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            manufacturer: "Viessmann".to_owned(),
            model: "unknown".to_owned(),
        }
    }
}

fn default_min_setpoint() -> f32 {
    15.
}

fn default_max_setpoint() -> f32 {
    25.
}
