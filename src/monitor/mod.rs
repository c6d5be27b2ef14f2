mod blocking;
mod edge;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use log::warn;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::EdgeDetect;
use crate::error::AppError;
use crate::gpio::PinHandle;

pub use blocking::{BlockingMonitor, LevelSource, LevelWorker};
pub use edge::{EdgeMonitor, EdgeWatcher, EventSource, PollEventSource, ShutdownWaker};

const LEVEL_UNKNOWN: u8 = u8::MAX;

#[derive(Debug)]
pub struct PinStats {
    pulses: AtomicU64,
    samples: AtomicU64,
    level: AtomicU8,
}

impl Default for PinStats {
    fn default() -> Self {
        Self {
            pulses: AtomicU64::new(0),
            samples: AtomicU64::new(0),
            level: AtomicU8::new(LEVEL_UNKNOWN),
        }
    }
}

impl PinStats {
    pub fn pulses(&self) -> u64 {
        self.pulses.load(Ordering::Acquire)
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Acquire)
    }

    pub fn level(&self) -> Option<bool> {
        match self.level.load(Ordering::Acquire) {
            LEVEL_UNKNOWN => None,
            v => Some(v == 1),
        }
    }

    pub(crate) fn record_pulse(&self) -> u64 {
        self.pulses.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn record_level(&self, level: bool) -> Option<bool> {
        self.samples.fetch_add(1, Ordering::AcqRel);
        match self.level.swap(level as u8, Ordering::AcqRel) {
            LEVEL_UNKNOWN => None,
            v => Some(v == 1),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PulseEvent {
    pub pin: String,
    pub level: Option<u8>,
    pub pulses: u64,
    pub timestamp_ms: u64,
}

pub struct EventCallbackHandler {
    event_tx: broadcast::Sender<PulseEvent>,
}

impl EventCallbackHandler {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        Self { event_tx }
    }

    pub fn dispatch(&self, event: PulseEvent) {
        // no subscribers is not an error
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PulseEvent> {
        self.event_tx.subscribe()
    }
}

pub type EventHandler = Arc<EventCallbackHandler>;

#[derive(Debug, Clone)]
pub struct WatchedPin {
    pub name: String,
    pub edge: EdgeDetect,
    pub stats: Arc<PinStats>,
}

impl WatchedPin {
    pub fn new(name: impl Into<String>, edge: EdgeDetect) -> Self {
        Self {
            name: name.into(),
            edge,
            stats: Arc::new(PinStats::default()),
        }
    }

    pub(crate) fn publish(&self, events: Option<&EventHandler>, level: Option<bool>) {
        if let Some(events) = events {
            events.dispatch(PulseEvent {
                pin: self.name.clone(),
                level: level.map(u8::from),
                pulses: self.stats.pulses(),
                timestamp_ms: epoch_millis(),
            });
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitoredPin {
    pub handle: Arc<PinHandle>,
    pub watched: WatchedPin,
}

pub trait PinMonitor: Send + Sync {
    fn stop(&self);

    fn join(&self) -> Result<(), AppError>;
}

struct WorkerResults {
    rx: Receiver<Result<(), AppError>>,
    pending: usize,
}

pub(crate) struct WorkerSet {
    tx: Option<Sender<Result<(), AppError>>>,
    results: Mutex<WorkerResults>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerSet {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx: Some(tx),
            results: Mutex::new(WorkerResults { rx, pending: 0 }),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn spawn<F>(&mut self, name: String, work: F) -> Result<(), AppError>
    where
        F: FnOnce() -> Result<(), AppError> + Send + 'static,
    {
        let tx = self
            .tx
            .clone()
            .ok_or_else(|| AppError::InvalidState("worker set is sealed".into()))?;
        let handle = thread::Builder::new().name(name).spawn(move || {
            let _ = tx.send(work());
        })?;
        self.results.get_mut().pending += 1;
        self.handles.get_mut().push(handle);
        Ok(())
    }

    // drop the spawner's sender so a panicking worker cannot hang `join`
    pub(crate) fn seal(&mut self) {
        self.tx = None;
    }

    pub(crate) fn join(&self) -> Result<(), AppError> {
        {
            let mut results = self.results.lock();
            while results.pending > 0 {
                let outcome = results.rx.recv().map_err(|_| {
                    AppError::InvalidState("monitor worker terminated abnormally".into())
                });
                results.pending -= 1;
                outcome??;
            }
        }

        self.join_handles();
        Ok(())
    }

    fn join_handles(&self) {
        for handle in self.handles.lock().drain(..) {
            if handle.join().is_err() {
                warn!("monitor worker panicked");
            }
        }
    }
}

// workers hold pin handles; joining here releases them before the registry unexports
impl Drop for WorkerSet {
    fn drop(&mut self) {
        self.join_handles();
    }
}

pub(crate) fn is_cancelled(cancel: &AtomicBool) -> bool {
    cancel.load(Ordering::Acquire)
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
