use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use sysgpio::{
    AppError, BlockingMonitor, BlockingReadMode, EdgeDetect, EdgeMonitor, EdgeWatcher,
    EventCallbackHandler, EventSource, LevelSource, LevelWorker, PinMonitor, PinStats, WatchedPin,
};

enum Step {
    Fail,
    /// `(line index, bytes available on drain)`
    Ready(Vec<(usize, usize)>),
    /// line is ready but reading it back fails
    Broken(usize),
}

/// Replays a fixed sequence of wait outcomes, then cancels the watcher.
struct ScriptedEvents {
    steps: VecDeque<Step>,
    pending: HashMap<usize, usize>,
    broken: Option<usize>,
    cancel: Arc<AtomicBool>,
}

impl ScriptedEvents {
    fn new(steps: Vec<Step>, cancel: Arc<AtomicBool>) -> Self {
        Self {
            steps: steps.into(),
            pending: HashMap::new(),
            broken: None,
            cancel,
        }
    }
}

impl EventSource for ScriptedEvents {
    fn wait(&mut self) -> io::Result<Vec<usize>> {
        match self.steps.pop_front() {
            Some(Step::Fail) => Err(io::Error::from(io::ErrorKind::Interrupted)),
            Some(Step::Broken(index)) => {
                self.broken = Some(index);
                Ok(vec![index])
            }
            Some(Step::Ready(lines)) => {
                self.pending = lines.iter().copied().collect();
                Ok(lines.into_iter().map(|(index, _)| index).collect())
            }
            None => {
                self.cancel.store(true, Ordering::Release);
                Ok(Vec::new())
            }
        }
    }

    fn drain(&mut self, index: usize) -> io::Result<usize> {
        if self.broken.take() == Some(index) {
            return Err(io::Error::from(io::ErrorKind::InvalidData));
        }
        Ok(self.pending.remove(&index).unwrap_or(0))
    }
}

fn rising(name: &str) -> WatchedPin {
    WatchedPin::new(name, EdgeDetect::Rising)
}

fn run_watcher(steps: Vec<Step>, pins: &[WatchedPin]) -> Result<(), AppError> {
    let cancel = Arc::new(AtomicBool::new(false));
    let source = ScriptedEvents::new(steps, cancel.clone());
    EdgeWatcher::new(source, pins.to_vec(), 5, cancel).run()
}

#[test]
fn counts_one_pulse_per_readiness_event() {
    let pins = [rising("A"), rising("B")];
    let steps = vec![
        Step::Ready(vec![(0, 2)]),
        Step::Ready(vec![(1, 2), (0, 2)]),
        // spurious wakeup without data
        Step::Ready(vec![(0, 0)]),
    ];

    run_watcher(steps, &pins).unwrap();
    assert_eq!(pins[0].stats.pulses(), 2);
    assert_eq!(pins[1].stats.pulses(), 1);
}

#[test]
fn counts_k_events_and_leaves_quiet_pins_at_zero() {
    let pins = [rising("P"), rising("Q"), rising("R")];
    let steps = (0..7).map(|_| Step::Ready(vec![(1, 1)])).collect();

    run_watcher(steps, &pins).unwrap();
    assert_eq!(pins[0].stats.pulses(), 0);
    assert_eq!(pins[1].stats.pulses(), 7);
    assert_eq!(pins[2].stats.pulses(), 0);
}

#[test]
fn unknown_line_index_is_ignored() {
    let pins = [rising("A")];
    run_watcher(vec![Step::Ready(vec![(3, 2), (0, 2)])], &pins).unwrap();
    assert_eq!(pins[0].stats.pulses(), 1);
}

#[test]
fn four_failures_are_retried() {
    let pins = [rising("A")];
    let steps = vec![
        Step::Fail,
        Step::Fail,
        Step::Fail,
        Step::Fail,
        Step::Ready(vec![(0, 1)]),
    ];

    run_watcher(steps, &pins).unwrap();
    assert_eq!(pins[0].stats.pulses(), 1);
}

#[test]
fn successful_wait_restores_retry_budget() {
    let pins = [rising("A")];
    let mut steps = Vec::new();
    for _ in 0..3 {
        steps.extend([Step::Fail, Step::Fail, Step::Fail, Step::Fail]);
        steps.push(Step::Ready(vec![(0, 1)]));
    }

    run_watcher(steps, &pins).unwrap();
    assert_eq!(pins[0].stats.pulses(), 3);
}

#[test]
fn five_consecutive_failures_end_the_watch() {
    let pins = [rising("A")];
    let steps = vec![
        Step::Ready(vec![(0, 1)]),
        Step::Fail,
        Step::Fail,
        Step::Fail,
        Step::Fail,
        Step::Fail,
        Step::Ready(vec![(0, 1)]),
    ];

    let err = run_watcher(steps, &pins).unwrap_err();
    assert!(matches!(err, AppError::Watch { attempts: 5, .. }));
    assert_eq!(err.exit_code(), 8);
    assert_eq!(pins[0].stats.pulses(), 1);
}

#[test]
fn failed_acknowledgements_are_retried() {
    let pins = [rising("A")];
    let mut steps: Vec<Step> = (0..4).map(|_| Step::Broken(0)).collect();
    steps.push(Step::Ready(vec![(0, 1)]));
    steps.extend((0..4).map(|_| Step::Broken(0)));

    run_watcher(steps, &pins).unwrap();
    assert_eq!(pins[0].stats.pulses(), 1);
}

#[test]
fn persistent_acknowledgement_failure_ends_the_watch() {
    let pins = [rising("A")];
    let mut steps: Vec<Step> = (0..5).map(|_| Step::Broken(0)).collect();
    steps.push(Step::Ready(vec![(0, 1)]));

    let err = run_watcher(steps, &pins).unwrap_err();
    assert!(matches!(err, AppError::Watch { attempts: 5, .. }));
    assert_eq!(pins[0].stats.pulses(), 0);
}

#[test]
fn pulses_are_published() {
    let events = Arc::new(EventCallbackHandler::new(16));
    let mut rx = events.subscribe();
    let cancel = Arc::new(AtomicBool::new(false));
    let pins = vec![rising("A")];
    let source = ScriptedEvents::new(
        vec![Step::Ready(vec![(0, 1)]), Step::Ready(vec![(0, 1)])],
        cancel.clone(),
    );

    EdgeWatcher::new(source, pins, 5, cancel)
        .with_events(events)
        .run()
        .unwrap();

    let first = rx.try_recv().unwrap();
    let second = rx.try_recv().unwrap();
    assert_eq!((first.pin.as_str(), first.pulses), ("A", 1));
    assert_eq!((second.pin.as_str(), second.pulses), ("A", 2));
    assert!(rx.try_recv().is_err());
}

#[test]
fn edge_monitor_surfaces_watch_error_on_join() {
    let cancel = Arc::new(AtomicBool::new(false));
    let source = ScriptedEvents::new((0..5).map(|_| Step::Fail).collect(), cancel);
    let monitor = EdgeMonitor::start_with(source, vec![rising("A")], 5, None, None).unwrap();

    let monitor: &dyn PinMonitor = &monitor;
    assert!(matches!(monitor.join(), Err(AppError::Watch { .. })));
    // a second join has nothing left to wait for
    assert!(monitor.join().is_ok());
}

/// Returns scripted levels, cancelling the worker along with the last one.
struct ScriptedLevels {
    levels: VecDeque<bool>,
    cancel: Arc<AtomicBool>,
}

impl LevelSource for ScriptedLevels {
    fn read_level(&mut self) -> Result<bool, AppError> {
        let level = self
            .levels
            .pop_front()
            .ok_or_else(|| AppError::InvalidState("script exhausted".into()))?;
        if self.levels.is_empty() {
            self.cancel.store(true, Ordering::Release);
        }
        Ok(level)
    }
}

fn run_levels(levels: &[u8], edge: EdgeDetect, mode: BlockingReadMode) -> Arc<PinStats> {
    let cancel = Arc::new(AtomicBool::new(false));
    let source = ScriptedLevels {
        levels: levels.iter().map(|l| *l == 1).collect(),
        cancel: cancel.clone(),
    };
    let pin = WatchedPin::new("A", edge);
    let stats = pin.stats.clone();
    LevelWorker::new(source, pin, mode, cancel).run().unwrap();
    stats
}

#[test]
fn level_reads_count_qualifying_transitions() {
    let stats = run_levels(&[0, 1, 1, 0, 1], EdgeDetect::Rising, BlockingReadMode::Level);
    assert_eq!(stats.pulses(), 2);
    assert_eq!(stats.samples(), 5);
    assert_eq!(stats.level(), Some(true));

    let stats = run_levels(&[1, 0, 0, 1, 0], EdgeDetect::Falling, BlockingReadMode::Level);
    assert_eq!(stats.pulses(), 2);

    let stats = run_levels(&[0, 1, 0, 1], EdgeDetect::Both, BlockingReadMode::Level);
    assert_eq!(stats.pulses(), 3);

    let stats = run_levels(&[0, 1, 0, 1], EdgeDetect::None, BlockingReadMode::Level);
    assert_eq!(stats.pulses(), 0);
    assert_eq!(stats.level(), Some(true));
}

#[test]
fn first_level_sample_is_not_a_pulse() {
    let stats = run_levels(&[1, 1, 1], EdgeDetect::Rising, BlockingReadMode::Level);
    assert_eq!(stats.pulses(), 0);
}

#[test]
fn edge_reads_count_every_matching_return() {
    let stats = run_levels(&[1, 1, 0, 1], EdgeDetect::Rising, BlockingReadMode::Edge);
    assert_eq!(stats.pulses(), 3);

    let stats = run_levels(&[1, 1, 0, 1], EdgeDetect::Falling, BlockingReadMode::Edge);
    assert_eq!(stats.pulses(), 1);

    let stats = run_levels(&[1, 1, 0, 1], EdgeDetect::Both, BlockingReadMode::Edge);
    assert_eq!(stats.pulses(), 4);
}

#[test]
fn read_failure_ends_the_worker() {
    struct Broken;
    impl LevelSource for Broken {
        fn read_level(&mut self) -> Result<bool, AppError> {
            Err(AppError::Parse {
                path: "value".into(),
                content: "x".into(),
            })
        }
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let err = LevelWorker::new(Broken, rising("A"), BlockingReadMode::Level, cancel)
        .run()
        .unwrap_err();
    assert!(matches!(err, AppError::Parse { .. }));
}

/// Blocks like a read that waits for the line to change.
struct GatedLevels {
    rx: Receiver<bool>,
}

impl LevelSource for GatedLevels {
    fn read_level(&mut self) -> Result<bool, AppError> {
        self.rx
            .recv()
            .map_err(|_| AppError::InvalidState("gate closed".into()))
    }
}

fn gated(name: &str) -> (Sender<bool>, (GatedLevels, WatchedPin)) {
    let (tx, rx) = mpsc::channel();
    (tx, (GatedLevels { rx }, rising(name)))
}

fn wait_for_samples(stats: &PinStats, samples: u64) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while stats.samples() < samples {
        assert!(Instant::now() < deadline, "worker did not consume its reads");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn blocking_workers_are_independent_and_stop_after_their_read() {
    let (tx_a, source_a) = gated("A");
    let (tx_b, source_b) = gated("B");
    let stats_a = source_a.1.stats.clone();
    let stats_b = source_b.1.stats.clone();

    let monitor =
        BlockingMonitor::start_with(vec![source_a, source_b], BlockingReadMode::Level, None)
            .unwrap();

    for level in [false, true, false, true] {
        tx_a.send(level).unwrap();
    }
    tx_b.send(false).unwrap();
    wait_for_samples(&stats_a, 4);
    wait_for_samples(&stats_b, 1);
    assert_eq!(stats_b.pulses(), 0);

    monitor.stop();
    // both readers are parked in a read and only see the flag once it returns
    let _ = tx_a.send(true);
    let _ = tx_b.send(false);
    monitor.join().unwrap();

    assert_eq!(stats_a.pulses(), 2);
    assert_eq!(stats_b.pulses(), 0);
    assert!(stats_b.samples() <= 2);
}
