use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, trace, warn};

use super::{EventHandler, MonitoredPin, PinMonitor, WatchedPin, WorkerSet, is_cancelled};
use crate::config::BlockingReadMode;
use crate::error::AppError;
use crate::gpio::PinHandle;

pub trait LevelSource: Send {
    fn read_level(&mut self) -> Result<bool, AppError>;
}

impl LevelSource for Arc<PinHandle> {
    fn read_level(&mut self) -> Result<bool, AppError> {
        self.get_value_blocking()
    }
}

// The cancel flag is checked between reads only, so a worker parked in a read
// that waits for a line change exits after that change arrives.
pub struct LevelWorker<S: LevelSource> {
    source: S,
    pin: WatchedPin,
    mode: BlockingReadMode,
    cancel: Arc<AtomicBool>,
    events: Option<EventHandler>,
}

impl<S: LevelSource> LevelWorker<S> {
    pub fn new(source: S, pin: WatchedPin, mode: BlockingReadMode, cancel: Arc<AtomicBool>) -> Self {
        Self {
            source,
            pin,
            mode,
            cancel,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventHandler) -> Self {
        self.events = Some(events);
        self
    }

    pub fn run(mut self) -> Result<(), AppError> {
        while !is_cancelled(&self.cancel) {
            let level = self.source.read_level().inspect_err(|e| {
                warn!("blocking read on pin {} failed: {e}", self.pin.name);
            })?;
            let previous = self.pin.stats.record_level(level);
            trace!("pin {} level {}", self.pin.name, u8::from(level));

            let pulse = match self.mode {
                BlockingReadMode::Level => {
                    previous.is_some_and(|p| p != level) && self.pin.edge.matches_level(level)
                }
                BlockingReadMode::Edge => self.pin.edge.matches_level(level),
            };
            if pulse {
                self.pin.stats.record_pulse();
            }
            if pulse || previous != Some(level) {
                self.pin.publish(self.events.as_ref(), Some(level));
            }
        }

        debug!("blocking reader for pin {} stopped", self.pin.name);
        Ok(())
    }
}

pub struct BlockingMonitor {
    cancel: Arc<AtomicBool>,
    workers: WorkerSet,
}

impl BlockingMonitor {
    pub fn start(
        pins: &[MonitoredPin],
        mode: BlockingReadMode,
        events: Option<EventHandler>,
    ) -> Result<Self, AppError> {
        let sources = pins
            .iter()
            .map(|p| (p.handle.clone(), p.watched.clone()))
            .collect();
        Self::start_with(sources, mode, events)
    }

    pub fn start_with<S: LevelSource + 'static>(
        sources: Vec<(S, WatchedPin)>,
        mode: BlockingReadMode,
        events: Option<EventHandler>,
    ) -> Result<Self, AppError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut monitor = Self {
            cancel: cancel.clone(),
            workers: WorkerSet::new(),
        };

        for (source, pin) in sources {
            let thread_name = format!("reader-{}", pin.name);
            let mut worker = LevelWorker::new(source, pin, mode, cancel.clone());
            if let Some(events) = &events {
                worker = worker.with_events(events.clone());
            }
            // a failed spawn drops `monitor`, which stops the readers already running
            monitor.workers.spawn(thread_name, move || worker.run())?;
        }
        monitor.workers.seal();

        Ok(monitor)
    }
}

impl PinMonitor for BlockingMonitor {
    fn stop(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    fn join(&self) -> Result<(), AppError> {
        self.workers.join()
    }
}

impl Drop for BlockingMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
