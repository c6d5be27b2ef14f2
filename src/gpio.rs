use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::config::{Direction, EdgeDetect};
use crate::error::AppError;
use crate::sysfs::{Sysfs, read_attr, write_attr};

#[derive(Debug)]
pub struct PinHandle {
    name: String,
    line: u32,
    sysfs: Sysfs,
    direction_path: PathBuf,
    value_path: PathBuf,
    edge_path: PathBuf,
}

impl PinHandle {
    pub fn create(sysfs: &Sysfs, name: impl Into<String>, line: u32) -> Result<Self, AppError> {
        sysfs
            .export(line)
            .map_err(|source| AppError::Export { line, source })?;

        Ok(Self {
            name: name.into(),
            line,
            sysfs: sysfs.clone(),
            direction_path: sysfs.attr(line, "direction"),
            value_path: sysfs.attr(line, "value"),
            edge_path: sysfs.attr(line, "edge"),
        })
    }

    pub fn create_with(
        sysfs: &Sysfs,
        name: impl Into<String>,
        line: u32,
        direction: Direction,
        initial_value: bool,
    ) -> Result<Self, AppError> {
        // a failing step drops `pin`, which unexports the line again
        let pin = Self::create(sysfs, name, line)?;
        pin.set_direction(direction)?;
        if direction == Direction::Output {
            pin.set_value(initial_value)?;
        }
        Ok(pin)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn value_path(&self) -> &Path {
        &self.value_path
    }

    pub fn set_direction(&self, direction: Direction) -> Result<(), AppError> {
        write_attr(&self.direction_path, direction.as_sysfs()).map_err(|source| {
            AppError::Direction {
                line: self.line,
                source,
            }
        })
    }

    pub fn get_direction(&self) -> Result<Direction, AppError> {
        let content = read_attr(&self.direction_path).map_err(|source| AppError::Direction {
            line: self.line,
            source,
        })?;
        Direction::from_sysfs(strip_newline(&content))
            .ok_or_else(|| parse_error(&self.direction_path, &content))
    }

    pub fn set_value(&self, value: bool) -> Result<(), AppError> {
        write_attr(&self.value_path, if value { "1" } else { "0" }).map_err(|source| {
            AppError::Value {
                line: self.line,
                source,
            }
        })
    }

    pub fn get_value(&self) -> Result<bool, AppError> {
        let content = read_attr(&self.value_path).map_err(|source| AppError::Value {
            line: self.line,
            source,
        })?;
        match strip_newline(&content) {
            "0" => Ok(false),
            "1" => Ok(true),
            _ => Err(parse_error(&self.value_path, &content)),
        }
    }

    pub fn get_value_blocking(&self) -> Result<bool, AppError> {
        let mut file = File::open(&self.value_path).map_err(|source| AppError::Value {
            line: self.line,
            source,
        })?;
        let mut buffer = [0u8; 2];
        let n = file.read(&mut buffer).map_err(|source| AppError::Value {
            line: self.line,
            source,
        })?;

        match buffer[..n].first() {
            Some(b'0') => Ok(false),
            Some(b'1') => Ok(true),
            _ => Err(parse_error(
                &self.value_path,
                &String::from_utf8_lossy(&buffer[..n]),
            )),
        }
    }

    pub fn set_edge(&self, edge: EdgeDetect) -> Result<(), AppError> {
        write_attr(&self.edge_path, edge.as_sysfs()).map_err(|source| AppError::Edge {
            line: self.line,
            source,
        })
    }

    pub fn get_edge(&self) -> Result<EdgeDetect, AppError> {
        let content = read_attr(&self.edge_path).map_err(|source| AppError::Edge {
            line: self.line,
            source,
        })?;
        EdgeDetect::from_sysfs(strip_newline(&content))
            .ok_or_else(|| parse_error(&self.edge_path, &content))
    }
}

impl Drop for PinHandle {
    fn drop(&mut self) {
        match self.sysfs.unexport(self.line) {
            Ok(()) => debug!("released pin {} (GPIO{})", self.name, self.line),
            Err(source) => warn!(
                "{}",
                AppError::Unexport {
                    line: self.line,
                    source
                }
            ),
        }
    }
}

fn strip_newline(content: &str) -> &str {
    content.strip_suffix('\n').unwrap_or(content)
}

fn parse_error(path: &Path, content: &str) -> AppError {
    AppError::Parse {
        path: path.display().to_string(),
        content: content.to_string(),
    }
}
