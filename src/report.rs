//! Structured run events and the reporters that render them.
//!
//! The supervisor and the workers never print directly. They hand an
//! [`Event`] to a [`Reporter`]; [`LogReporter`] turns it into a `log` record
//! when the configured [`Verbosity`] allows it, [`CollectingReporter`] keeps it
//! for later inspection.

use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use log::Level;

use crate::process::Pid;
use crate::request::KindCounts;
use crate::worker::WorkerKind;

/// How much the run says about itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Silent,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl Verbosity {
    /// Negative levels are silent, `0` keeps only failures, `1` adds
    /// warnings, `2` adds informational lines and `3` or more adds debug.
    pub fn from_level(level: i64) -> Self {
        match level {
            l if l < 0 => Verbosity::Silent,
            0 => Verbosity::Error,
            1 => Verbosity::Warn,
            2 => Verbosity::Info,
            _ => Verbosity::Debug,
        }
    }

    pub fn allows(self, level: Level) -> bool {
        let needed = match level {
            Level::Error => Verbosity::Error,
            Level::Warn => Verbosity::Warn,
            Level::Info => Verbosity::Info,
            Level::Debug | Level::Trace => Verbosity::Debug,
        };
        self >= needed
    }
}

/// Something worth telling the operator about.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Dispatching { counts: KindCounts },
    Host { cpus: usize },
    Memory { total: u64, available: u64 },
    MemoryPressure { requested: u64, available: u64 },
    BackoffUnit { us: u64 },
    PassBackoff { us: u64 },
    PassTimeout { secs: u64 },
    TimeExhausted { undispatched: KindCounts },
    DispatchHalted { undispatched: KindCounts },
    Launched { kind: WorkerKind, ordinal: u64, pid: Pid },
    LaunchFailed { kind: WorkerKind, error: String },
    ExitedNormally { pid: Pid },
    TimedOut { pid: Pid },
    Reaped { pid: Pid },
    ExitedWithError { pid: Pid, kind: WorkerKind, code: i32 },
    Signaled { pid: Pid, kind: WorkerKind, signal: i32 },
    ExitedAbnormally { pid: Pid, kind: WorkerKind, status: i32 },
    UnknownChild { pid: Pid },
    Reaping { siblings: usize },
    SignalFailed { pid: Pid, error: String },
    WaitFailed { error: String },
    RunCompleted { elapsed: Duration, failures: u64 },

    Allocating { bytes: u64 },
    Touching { stride: u64 },
    SleepingForever,
    Sleeping { secs: u64 },
    Freed { bytes: u64 },
    Seeding { bytes: usize },
    FileOpened { path: PathBuf, bytes: u64 },
    Unlinking { path: PathBuf },
    FastWriting,
    SlowWriting,
    FileClosed { written: u64 },
    WorkerFailed { error: String },
}

impl Event {
    pub fn level(&self) -> Level {
        use Event::*;
        match self {
            LaunchFailed { .. }
            | ExitedWithError { .. }
            | Signaled { .. }
            | ExitedAbnormally { .. }
            | SignalFailed { .. }
            | WaitFailed { .. }
            | WorkerFailed { .. } => Level::Error,
            RunCompleted { failures, .. } if *failures > 0 => Level::Error,
            MemoryPressure { .. }
            | TimeExhausted { .. }
            | DispatchHalted { .. }
            | UnknownChild { .. }
            | Reaping { .. } => Level::Warn,
            Dispatching { .. } | RunCompleted { .. } => Level::Info,
            _ => Level::Debug,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Event::*;
        match self {
            Dispatching { counts } => write!(f, "dispatching hogs: {counts}"),
            Host { cpus } => write!(f, "host has {cpus} logical cpus"),
            Memory { total, available } => {
                write!(f, "host memory: {total} bytes total, {available} bytes available")
            }
            MemoryPressure {
                requested,
                available,
            } => write!(
                f,
                "vm hogs request {requested} bytes, only {available} bytes available"
            ),
            BackoffUnit { us } => write!(f, "setting backoff coefficient to {us}us"),
            PassBackoff { us } => write!(f, "using backoff sleep of {us}us"),
            PassTimeout { secs } => write!(f, "setting timeout to {secs}s"),
            TimeExhausted { undispatched } => write!(
                f,
                "used up time before all workers dispatched ({undispatched} left)"
            ),
            DispatchHalted { undispatched } => {
                write!(f, "halting dispatch with {undispatched} left")
            }
            Launched { kind, ordinal, pid } => {
                write!(f, "--> {kind} worker {ordinal} [{pid}] forked")
            }
            LaunchFailed { kind, error } => write!(f, "fork of {kind} failed: {error}"),
            ExitedNormally { pid } => write!(f, "<-- worker {pid} returned normally"),
            TimedOut { pid } => write!(f, "<-- worker {pid} signalled normally"),
            Reaped { pid } => write!(f, "<-- worker {pid} reaped"),
            ExitedWithError { pid, kind, code } => {
                write!(f, "<-- {kind} worker {pid} returned error {code}")
            }
            Signaled { pid, kind, signal } => {
                write!(f, "<-- {kind} worker {pid} got signal {signal}")
            }
            ExitedAbnormally { pid, kind, status } => {
                write!(f, "<-- {kind} worker {pid} exited abnormally (status {status:#x})")
            }
            UnknownChild { pid } => write!(f, "<-- ignoring unknown child {pid}"),
            Reaping { siblings } => {
                write!(f, "now reaping {siblings} child worker processes")
            }
            SignalFailed { pid, error } => write!(f, "kill of {pid} failed: {error}"),
            WaitFailed { error } => write!(f, "error waiting for worker: {error}"),
            RunCompleted { elapsed, failures } if *failures > 0 => write!(
                f,
                "failed run completed in {}s ({failures} failed)",
                elapsed.as_secs()
            ),
            RunCompleted { elapsed, .. } => {
                write!(f, "successful run completed in {}s", elapsed.as_secs())
            }
            Allocating { bytes } => write!(f, "allocating {bytes} bytes ..."),
            Touching { stride } => {
                write!(f, "touching bytes in strides of {stride} bytes ...")
            }
            SleepingForever => write!(f, "sleeping forever with allocated memory"),
            Sleeping { secs } => write!(f, "sleeping for {secs}s with allocated memory"),
            Freed { bytes } => write!(f, "freed {bytes} bytes"),
            Seeding { bytes } => write!(f, "seeding {bytes} byte buffer with random data"),
            FileOpened { path, bytes } => {
                write!(f, "opened {} for writing {bytes} bytes", path.display())
            }
            Unlinking { path } => write!(f, "unlinking {}", path.display()),
            FastWriting => write!(f, "fast writing"),
            SlowWriting => write!(f, "slow writing"),
            FileClosed { written } => write!(f, "closing file after {written} bytes"),
            WorkerFailed { error } => write!(f, "{error}"),
        }
    }
}

/// Receives run events.
pub trait Reporter {
    fn report(&self, event: Event);
}

/// Renders events through the `log` facade, filtered by its own verbosity.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter {
    verbosity: Verbosity,
}

impl LogReporter {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }
}

impl Reporter for LogReporter {
    fn report(&self, event: Event) {
        let level = event.level();
        if self.verbosity.allows(level) {
            log::log!(level, "[{}] {}", std::process::id(), event);
        }
    }
}

/// Keeps every event in memory, in the order reported.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<Event>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events
            .lock()
            .map(|events| events.iter().filter(|&e| pred(e)).count())
            .unwrap_or(0)
    }
}

impl Reporter for CollectingReporter {
    fn report(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
