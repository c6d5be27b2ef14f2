mod config;
mod error;
mod gpio;
mod monitor;
mod registry;
mod routes;
mod service;
mod sysfs;

pub use config::{
    AppConfig, BlockingReadMode, DEFAULT_SYSFS_ROOT, DEFAULT_WAIT_RETRIES, Direction, EdgeDetect,
    HttpConfig, MonitorMode, PinConfig,
};
pub use error::AppError;
pub use gpio::PinHandle;
pub use monitor::{
    BlockingMonitor, EdgeMonitor, EdgeWatcher, EventCallbackHandler, EventHandler, EventSource,
    LevelSource, LevelWorker, MonitoredPin, PinMonitor, PinStats, PollEventSource, PulseEvent,
    ShutdownWaker, WatchedPin,
};
pub use registry::PinRegistry;
pub use routes::AppState;
pub use service::{PinReport, PulseCounterService};
pub use sysfs::Sysfs;
