use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, trace, warn};
use nix::fcntl::OFlag;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::unistd::pipe2;

use super::{EventHandler, MonitoredPin, PinMonitor, WatchedPin, WorkerSet, is_cancelled};
use crate::error::AppError;
use crate::gpio::PinHandle;

const EVENT_READ_BUFFER_SIZE: usize = 64;

pub trait EventSource: Send {
    // ready line indices, empty when woken for shutdown
    fn wait(&mut self) -> io::Result<Vec<usize>>;

    fn drain(&mut self, index: usize) -> io::Result<usize>;
}

#[derive(Clone)]
pub struct ShutdownWaker {
    tx: Arc<File>,
}

impl ShutdownWaker {
    pub fn wake(&self) {
        match (&*self.tx).write(&[1]) {
            Ok(_) => {}
            // pipe full or watcher already gone
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::BrokenPipe
                ) => {}
            Err(e) => warn!("failed to wake edge watcher: {e}"),
        }
    }
}

pub struct PollEventSource {
    lines: Vec<(Arc<PinHandle>, File)>,
    wake_rx: File,
    buffer: [u8; EVENT_READ_BUFFER_SIZE],
}

impl PollEventSource {
    pub fn open(pins: &[Arc<PinHandle>]) -> Result<(Self, ShutdownWaker), AppError> {
        let mut buffer = [0u8; EVENT_READ_BUFFER_SIZE];
        let mut lines = Vec::with_capacity(pins.len());

        for pin in pins {
            let mut file = OpenOptions::new()
                .read(true)
                .custom_flags(OFlag::O_NONBLOCK.bits())
                .open(pin.value_path())
                .map_err(|source| AppError::Value {
                    line: pin.line(),
                    source,
                })?;
            // consume the initial state so the first poll only reports real edges
            if let Err(e) = file.read(&mut buffer) {
                debug!("initial read of pin {} failed: {e}", pin.name());
            }
            lines.push((pin.clone(), file));
        }

        let (rx, tx) = pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC).map_err(io::Error::from)?;
        let waker = ShutdownWaker {
            tx: Arc::new(File::from(tx)),
        };

        Ok((
            Self {
                lines,
                wake_rx: File::from(rx),
                buffer,
            },
            waker,
        ))
    }

    fn clear_wakeups(&mut self) {
        while matches!(self.wake_rx.read(&mut self.buffer), Ok(n) if n > 0) {}
    }
}

impl EventSource for PollEventSource {
    fn wait(&mut self) -> io::Result<Vec<usize>> {
        let (ready, woken) = {
            let mut fds: Vec<PollFd> = self
                .lines
                .iter()
                .map(|(_, file)| PollFd::new(file.as_fd(), PollFlags::POLLPRI))
                .collect();
            fds.push(PollFd::new(self.wake_rx.as_fd(), PollFlags::POLLIN));

            poll(&mut fds, PollTimeout::NONE).map_err(io::Error::from)?;

            let mut ready = Vec::new();
            let mut woken = false;
            for (index, fd) in fds.iter().enumerate() {
                let revents = fd.revents().unwrap_or(PollFlags::empty());
                if index == self.lines.len() {
                    woken = revents.contains(PollFlags::POLLIN);
                } else if revents.contains(PollFlags::POLLPRI) {
                    ready.push(index);
                }
            }
            (ready, woken)
        };

        if woken {
            self.clear_wakeups();
        }
        Ok(ready)
    }

    fn drain(&mut self, index: usize) -> io::Result<usize> {
        let (_, file) = self
            .lines
            .get_mut(index)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such line"))?;
        file.seek(SeekFrom::Start(0))?;
        file.read(&mut self.buffer)
    }
}

pub struct EdgeWatcher<S: EventSource> {
    source: S,
    pins: Vec<WatchedPin>,
    max_retries: u32,
    cancel: Arc<AtomicBool>,
    events: Option<EventHandler>,
}

impl<S: EventSource> EdgeWatcher<S> {
    pub fn new(
        source: S,
        pins: Vec<WatchedPin>,
        max_retries: u32,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            pins,
            max_retries: max_retries.max(1),
            cancel,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventHandler) -> Self {
        self.events = Some(events);
        self
    }

    pub fn run(mut self) -> Result<(), AppError> {
        let mut retries = self.max_retries;
        // an undrained line stays ready, so failed drains share their own budget
        let mut drain_retries = self.max_retries;

        while !is_cancelled(&self.cancel) {
            let ready = match self.source.wait() {
                Ok(ready) => {
                    retries = self.max_retries;
                    ready
                }
                Err(source) => {
                    retries -= 1;
                    if retries == 0 {
                        error!("readiness wait failed, giving up: {source}");
                        return Err(AppError::Watch {
                            attempts: self.max_retries,
                            source,
                        });
                    }
                    warn!("readiness wait failed: {source}, {retries} retries left");
                    continue;
                }
            };

            for index in ready {
                match self.handle_ready(index) {
                    Ok(()) => drain_retries = self.max_retries,
                    Err(source) => {
                        drain_retries -= 1;
                        if drain_retries == 0 {
                            error!("edge acknowledgement failed, giving up: {source}");
                            return Err(AppError::Watch {
                                attempts: self.max_retries,
                                source,
                            });
                        }
                        warn!("edge acknowledgement failed: {source}, {drain_retries} retries left");
                    }
                }
            }
        }

        info!("edge watcher stopped");
        Ok(())
    }

    fn handle_ready(&mut self, index: usize) -> io::Result<()> {
        let Some(pin) = self.pins.get(index) else {
            warn!("readiness reported for unknown line index {index}");
            return Ok(());
        };

        match self.source.drain(index) {
            Ok(0) => trace!("spurious wakeup on pin {}", pin.name),
            Ok(_) => {
                let pulses = pin.stats.record_pulse();
                trace!("pulse on pin {}, total {pulses}", pin.name);
                pin.publish(self.events.as_ref(), None);
            }
            Err(e) => {
                warn!("failed to read pin {} after edge: {e}", pin.name);
                return Err(e);
            }
        }
        Ok(())
    }
}

pub struct EdgeMonitor {
    cancel: Arc<AtomicBool>,
    waker: Option<ShutdownWaker>,
    workers: WorkerSet,
}

impl EdgeMonitor {
    pub fn start(
        pins: &[MonitoredPin],
        max_retries: u32,
        events: Option<EventHandler>,
    ) -> Result<Self, AppError> {
        let handles: Vec<Arc<PinHandle>> = pins.iter().map(|p| p.handle.clone()).collect();
        let (source, waker) = PollEventSource::open(&handles)?;
        let watched = pins.iter().map(|p| p.watched.clone()).collect();

        Self::start_with(source, watched, max_retries, Some(waker), events)
    }

    pub fn start_with<S: EventSource + 'static>(
        source: S,
        pins: Vec<WatchedPin>,
        max_retries: u32,
        waker: Option<ShutdownWaker>,
        events: Option<EventHandler>,
    ) -> Result<Self, AppError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut watcher = EdgeWatcher::new(source, pins, max_retries, cancel.clone());
        if let Some(events) = events {
            watcher = watcher.with_events(events);
        }

        let mut workers = WorkerSet::new();
        workers.spawn("edge-watcher".into(), move || watcher.run())?;
        workers.seal();

        Ok(Self {
            cancel,
            waker,
            workers,
        })
    }
}

impl PinMonitor for EdgeMonitor {
    fn stop(&self) {
        if self.cancel.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(waker) = &self.waker {
            waker.wake();
        }
    }

    fn join(&self) -> Result<(), AppError> {
        self.workers.join()
    }
}

impl Drop for EdgeMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
