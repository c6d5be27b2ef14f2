use std::{collections::HashSet, fs, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";
pub const DEFAULT_WAIT_RETRIES: u32 = 5;
const DEFAULT_BROADCAST_CAPACITY: usize = 64;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    pub unix_socket: Option<String>,
    pub host: Option<String>,
    pub path: String,
}

#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    #[serde(rename = "in")]
    Input,
    #[serde(rename = "out")]
    Output,
}

impl Direction {
    pub fn as_sysfs(&self) -> &'static str {
        match self {
            Direction::Input => "in",
            Direction::Output => "out",
        }
    }

    pub fn from_sysfs(token: &str) -> Option<Self> {
        match token {
            "in" => Some(Direction::Input),
            "out" => Some(Direction::Output),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeDetect {
    #[default]
    None,
    Rising,
    Falling,
    Both,
}

impl EdgeDetect {
    pub fn as_sysfs(&self) -> &'static str {
        match self {
            EdgeDetect::None => "none",
            EdgeDetect::Rising => "rising",
            EdgeDetect::Falling => "falling",
            EdgeDetect::Both => "both",
        }
    }

    pub fn from_sysfs(token: &str) -> Option<Self> {
        match token {
            "none" => Some(EdgeDetect::None),
            "rising" => Some(EdgeDetect::Rising),
            "falling" => Some(EdgeDetect::Falling),
            "both" => Some(EdgeDetect::Both),
            _ => None,
        }
    }

    pub fn matches_level(&self, level: bool) -> bool {
        match self {
            EdgeDetect::None => false,
            EdgeDetect::Rising => level,
            EdgeDetect::Falling => !level,
            EdgeDetect::Both => true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MonitorMode {
    #[default]
    Edge,
    Blocking,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BlockingReadMode {
    #[default]
    Level,
    Edge,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PinConfig {
    pub name: String,
    pub line: u32,
    pub direction: Direction,
    #[serde(default)]
    pub initial_value: bool,
    #[serde(default)]
    pub edge: EdgeDetect,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub http: HttpConfig,
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,
    #[serde(default)]
    pub mode: MonitorMode,
    #[serde(default)]
    pub blocking_read: BlockingReadMode,
    #[serde(default = "default_wait_retries")]
    pub wait_retries: u32,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    pub pins: Vec<PinConfig>,
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from(DEFAULT_SYSFS_ROOT)
}

fn default_wait_retries() -> u32 {
    DEFAULT_WAIT_RETRIES
}

fn default_broadcast_capacity() -> usize {
    DEFAULT_BROADCAST_CAPACITY
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("Invalid config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.http.unix_socket.is_none() && self.http.host.is_none() {
            return Err(AppError::Config(
                "either 'unix_socket' or 'host' must be specified".into(),
            ));
        }
        if self.pins.is_empty() {
            return Err(AppError::Config("at least one pin must be configured".into()));
        }
        if self.wait_retries == 0 {
            return Err(AppError::Config("wait_retries must be at least 1".into()));
        }
        if self.broadcast_capacity == 0 {
            return Err(AppError::Config("broadcast_capacity must be at least 1".into()));
        }

        let mut names = HashSet::new();
        let mut lines = HashSet::new();
        for pin in &self.pins {
            if !names.insert(pin.name.as_str()) {
                return Err(AppError::Config(format!("duplicate pin name {}", pin.name)));
            }
            if !lines.insert(pin.line) {
                return Err(AppError::Config(format!(
                    "GPIO{} is configured more than once",
                    pin.line
                )));
            }
            match pin.direction {
                Direction::Output if pin.edge != EdgeDetect::None => {
                    return Err(AppError::Config(format!(
                        "output pin {} cannot use edge detection",
                        pin.name
                    )));
                }
                Direction::Input
                    if self.mode == MonitorMode::Edge && pin.edge == EdgeDetect::None =>
                {
                    return Err(AppError::Config(format!(
                        "input pin {} needs an edge in edge mode",
                        pin.name
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}
