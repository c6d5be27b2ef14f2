#![allow(dead_code)]

use std::fs;
use std::path::Path;

use sysgpio::{AppConfig, Sysfs};
use tempfile::TempDir;

/// A directory laid out like `/sys/class/gpio` with the given lines present.
pub struct FakeSysfs {
    dir: TempDir,
}

impl FakeSysfs {
    pub fn new(lines: &[u32]) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("export"), "").unwrap();
        fs::write(dir.path().join("unexport"), "").unwrap();
        let fake = Self { dir };
        for line in lines {
            fake.add_line(*line);
        }
        fake
    }

    pub fn add_line(&self, line: u32) {
        let gpio = self.dir.path().join(format!("gpio{line}"));
        fs::create_dir_all(&gpio).unwrap();
        fs::write(gpio.join("direction"), "in\n").unwrap();
        fs::write(gpio.join("value"), "0\n").unwrap();
        fs::write(gpio.join("edge"), "none\n").unwrap();
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn sysfs(&self) -> Sysfs {
        Sysfs::new(self.dir.path())
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.dir.path().join(relative)).unwrap()
    }

    pub fn write(&self, relative: &str, content: &str) {
        fs::write(self.dir.path().join(relative), content).unwrap();
    }

    pub fn remove(&self, relative: &str) {
        fs::remove_file(self.dir.path().join(relative)).unwrap();
    }

    /// Two rising-edge inputs and one output, as used by the service tests.
    pub fn sample_config(&self, mode: &str) -> AppConfig {
        let json = format!(
            r#"
            {{
                "http": {{ "host": "localhost:8080", "path": "/api/v1" }},
                "sysfs_root": {root:?},
                "mode": "{mode}",
                "pins": [
                    {{ "name": "A", "line": 47, "direction": "in", "edge": "rising" }},
                    {{ "name": "B", "line": 46, "direction": "in", "edge": "rising" }},
                    {{ "name": "LED", "line": 60, "direction": "out", "initial_value": true }}
                ]
            }}
            "#,
            root = self.dir.path().display().to_string(),
        );
        serde_json::from_str(&json).expect("valid sample config")
    }
}
