use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::config::DEFAULT_SYSFS_ROOT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sysfs {
    root: PathBuf,
}

impl Default for Sysfs {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_ROOT)
    }
}

impl Sysfs {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn export(&self, line: u32) -> io::Result<()> {
        debug!("exporting GPIO{line} under {}", self.root.display());
        write_attr(&self.root.join("export"), &line.to_string())
    }

    pub fn unexport(&self, line: u32) -> io::Result<()> {
        debug!("unexporting GPIO{line} under {}", self.root.display());
        write_attr(&self.root.join("unexport"), &line.to_string())
    }

    pub fn line_dir(&self, line: u32) -> PathBuf {
        self.root.join(format!("gpio{line}"))
    }

    pub fn attr(&self, line: u32, attr: &str) -> PathBuf {
        self.line_dir(line).join(attr)
    }
}

pub(crate) fn write_attr(path: &Path, content: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
    file.write_all(content.as_bytes())?;
    file.flush()
}

pub(crate) fn read_attr(path: &Path) -> io::Result<String> {
    fs::read_to_string(path)
}
