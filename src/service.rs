use std::sync::Arc;

use log::info;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::{AppConfig, Direction, EdgeDetect, MonitorMode};
use crate::error::AppError;
use crate::gpio::PinHandle;
use crate::monitor::{
    BlockingMonitor, EdgeMonitor, EventCallbackHandler, EventHandler, MonitoredPin, PinMonitor,
    PinStats, PulseEvent, WatchedPin,
};
use crate::registry::PinRegistry;
use crate::sysfs::Sysfs;

#[derive(Debug, Clone, Serialize)]
pub struct PinReport {
    pub name: String,
    pub line: u32,
    pub direction: Direction,
    pub edge: EdgeDetect,
    pub pulses: Option<u64>,
    pub level: Option<u8>,
}

struct PinEntry {
    direction: Direction,
    edge: EdgeDetect,
    stats: Option<Arc<PinStats>>,
}

pub struct PulseCounterService {
    // dropped before the registry so workers release their handles first
    monitor: Box<dyn PinMonitor>,
    registry: PinRegistry,
    entries: FxHashMap<String, PinEntry>,
    events: EventHandler,
}

impl PulseCounterService {
    pub fn start(config: &AppConfig) -> Result<Self, AppError> {
        config.validate()?;

        let sysfs = Sysfs::new(config.sysfs_root.clone());
        let events = Arc::new(EventCallbackHandler::new(config.broadcast_capacity));
        let mut registry = PinRegistry::new();
        let mut entries = FxHashMap::default();
        let mut monitored = Vec::new();

        // any error below drops `registry`, unexporting what was already set up
        for pin in &config.pins {
            let handle = PinHandle::create_with(
                &sysfs,
                pin.name.clone(),
                pin.line,
                pin.direction,
                pin.initial_value,
            )?;
            if pin.direction == Direction::Input && config.mode == MonitorMode::Edge {
                handle.set_edge(pin.edge)?;
            }
            let handle = registry.insert(handle)?;

            let stats = if pin.direction == Direction::Input {
                let watched = WatchedPin::new(pin.name.clone(), pin.edge);
                let stats = watched.stats.clone();
                monitored.push(MonitoredPin { handle, watched });
                Some(stats)
            } else {
                None
            };

            entries.insert(
                pin.name.clone(),
                PinEntry {
                    direction: pin.direction,
                    edge: pin.edge,
                    stats,
                },
            );
        }

        let monitor: Box<dyn PinMonitor> = match config.mode {
            MonitorMode::Edge => Box::new(EdgeMonitor::start(
                &monitored,
                config.wait_retries,
                Some(events.clone()),
            )?),
            MonitorMode::Blocking => Box::new(BlockingMonitor::start(
                &monitored,
                config.blocking_read,
                Some(events.clone()),
            )?),
        };
        info!(
            "monitoring {} of {} pins in {:?} mode",
            monitored.len(),
            registry.len(),
            config.mode
        );

        Ok(Self {
            monitor,
            registry,
            entries,
            events,
        })
    }

    pub fn registry(&self) -> &PinRegistry {
        &self.registry
    }

    pub fn report(&self) -> Vec<PinReport> {
        self.registry
            .iter()
            .filter_map(|pin| self.report_for(pin).ok())
            .collect()
    }

    pub fn pin_report(&self, name: &str) -> Result<PinReport, AppError> {
        let pin = self.registry.find(name)?;
        self.report_for(&pin)
    }

    fn report_for(&self, pin: &PinHandle) -> Result<PinReport, AppError> {
        let entry = self.entry(pin.name())?;
        Ok(PinReport {
            name: pin.name().to_string(),
            line: pin.line(),
            direction: entry.direction,
            edge: entry.edge,
            pulses: entry.stats.as_ref().map(|s| s.pulses()),
            level: entry
                .stats
                .as_ref()
                .and_then(|s| s.level())
                .map(u8::from),
        })
    }

    fn entry(&self, name: &str) -> Result<&PinEntry, AppError> {
        self.entries
            .get(name)
            .ok_or_else(|| AppError::NotFoundPin(name.to_string()))
    }

    pub fn pulses(&self, name: &str) -> Result<u64, AppError> {
        self.entry(name)?
            .stats
            .as_ref()
            .map(|s| s.pulses())
            .ok_or_else(|| AppError::InvalidState(format!("pin {name} is not monitored")))
    }

    pub fn read_value(&self, name: &str) -> Result<bool, AppError> {
        self.registry.find(name)?.get_value()
    }

    pub fn write_value(&self, name: &str, value: bool) -> Result<(), AppError> {
        let pin = self.registry.find(name)?;
        if self.entry(name)?.direction != Direction::Output {
            return Err(AppError::InvalidState(format!(
                "pin {name} must be an output to set its value"
            )));
        }
        pin.set_value(value)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PulseEvent> {
        self.events.subscribe()
    }

    pub fn stop(&self) {
        info!("stopping pin monitor");
        self.monitor.stop();
    }

    pub fn wait(&self) -> Result<(), AppError> {
        self.monitor.join()
    }
}
