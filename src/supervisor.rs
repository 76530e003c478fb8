//! Dispatch workers round-robin, harvest them, and fail fast.
//!
//! The supervisor is single threaded. Dispatch launches at most one worker
//! of each kind per pass, pacing them with a backoff proportional to the
//! work still to go. Harvesting is strictly one termination at a time; the
//! first abnormal termination triggers a single reap broadcast to every
//! worker still alive.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::cpu_stress;
use crate::error::StressError;
use crate::memory_stress;
use crate::process::{
    ForkControl, LaunchPlan, Pid, ProcessControl, Termination, WaitMode, REAP_SIGNAL,
    TIMEOUT_SIGNAL,
};
use crate::report::{Event, Reporter};
use crate::request::{KindCounts, StressRequest};
use crate::worker::{WorkerKind, WorkerSpec};

/// A launched, not yet harvested worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pid: Pid,
    kind: WorkerKind,
    launched_at: Instant,
}

impl WorkerHandle {
    fn new(pid: Pid, kind: WorkerKind) -> Self {
        Self {
            pid,
            kind,
            launched_at: Instant::now(),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    pub fn launched_at(&self) -> Instant {
        self.launched_at
    }
}

/// What a termination means for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Success,
    TimedOut,
    Reaped,
    Failed { broadcast: bool },
}

pub fn classify(termination: Termination) -> Disposition {
    match termination {
        Termination::Exited(0) => Disposition::Success,
        Termination::Exited(_) => Disposition::Failed { broadcast: true },
        Termination::Signaled(TIMEOUT_SIGNAL) => Disposition::TimedOut,
        Termination::Signaled(REAP_SIGNAL) => Disposition::Reaped,
        Termination::Signaled(_) => Disposition::Failed { broadcast: true },
        Termination::Other(_) => Disposition::Failed { broadcast: false },
    }
}

/// Outcome of one stress run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub launched: u64,
    pub launch_failures: u64,
    /// Workers that did not end normally, plus a failed wait.
    pub failures: u64,
    /// Reap broadcasts sent; never more than one.
    pub broadcasts: u64,
    /// Units never launched because time ran out or reaping began.
    pub undispatched: KindCounts,
    pub elapsed: Duration,
}

impl RunSummary {
    /// `0` on success, otherwise the number of failed workers.
    pub fn status(&self) -> u64 {
        self.failures
    }

    pub fn is_success(&self) -> bool {
        self.failures == 0
    }

    pub fn into_result(self) -> Result<Self, StressError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(StressError::RunFailed(self))
        }
    }
}

struct SupervisorState {
    started: Instant,
    live: HashMap<Pid, WorkerHandle>,
    remaining: KindCounts,
    failures: u64,
    reaping: bool,
    wait_failed: bool,
    launched: u64,
    launch_failures: u64,
    broadcasts: u64,
}

impl SupervisorState {
    fn new(counts: KindCounts) -> Self {
        Self {
            started: Instant::now(),
            live: HashMap::new(),
            remaining: counts,
            failures: 0,
            reaping: false,
            wait_failed: false,
            launched: 0,
            launch_failures: 0,
            broadcasts: 0,
        }
    }

    fn track(&mut self, handle: WorkerHandle) {
        self.launched += 1;
        self.live.insert(handle.pid, handle);
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            launched: self.launched,
            launch_failures: self.launch_failures,
            failures: self.failures,
            broadcasts: self.broadcasts,
            undispatched: self.remaining,
            elapsed: self.started.elapsed(),
        }
    }
}

pub struct Supervisor<'a, C> {
    request: &'a StressRequest,
    control: C,
    reporter: &'a dyn Reporter,
}

impl<'a, C: ProcessControl> Supervisor<'a, C> {
    pub fn new(request: &'a StressRequest, control: C, reporter: &'a dyn Reporter) -> Self {
        Self {
            request,
            control,
            reporter,
        }
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    /// Dispatch every requested worker, wait for all of them, and summarize.
    /// Worker failures are part of the summary, not an error.
    pub fn run(&mut self) -> Result<RunSummary, StressError> {
        self.request.validate()?;
        let mut state = SupervisorState::new(self.request.counts);

        if !state.remaining.is_empty() {
            self.reporter.report(Event::Dispatching {
                counts: state.remaining,
            });
            self.probe_host();
        }
        if self.request.backoff_us > 0 {
            self.reporter.report(Event::BackoffUnit {
                us: self.request.backoff_us,
            });
        }

        self.dispatch(&mut state);
        self.reap(&mut state, WaitMode::Block);

        let summary = state.summary();
        self.reporter.report(Event::RunCompleted {
            elapsed: summary.elapsed,
            failures: summary.failures,
        });
        Ok(summary)
    }

    fn probe_host(&self) {
        self.reporter.report(Event::Host {
            cpus: cpu_stress::available_cores(),
        });
        let counts = &self.request.counts;
        if counts.vm == 0 {
            return;
        }
        let usage = memory_stress::check_memory_usage();
        self.reporter.report(Event::Memory {
            total: usage.total,
            available: usage.available,
        });
        let requested = counts.vm.saturating_mul(self.request.vm.bytes);
        if requested > usage.available {
            self.reporter.report(Event::MemoryPressure {
                requested,
                available: usage.available,
            });
        }
    }

    fn dispatch(&mut self, state: &mut SupervisorState) {
        loop {
            let forks = state.remaining.total();
            if forks == 0 {
                break;
            }
            if state.reaping || state.wait_failed {
                self.reporter.report(Event::DispatchHalted {
                    undispatched: state.remaining,
                });
                break;
            }

            let backoff_us = self.request.backoff_us.saturating_mul(forks);
            self.reporter.report(Event::PassBackoff { us: backoff_us });

            let timeout = match self.pass_timeout(state) {
                Ok(timeout) => timeout,
                Err(()) => {
                    self.reporter.report(Event::TimeExhausted {
                        undispatched: state.remaining,
                    });
                    break;
                }
            };

            for kind in WorkerKind::ALL {
                let ordinal = state.remaining.get(kind);
                if ordinal == 0 {
                    continue;
                }
                let plan = LaunchPlan {
                    spec: WorkerSpec::for_kind(kind, self.request),
                    ordinal,
                    timeout,
                    backoff: Duration::from_micros(backoff_us),
                    dry_run: self.request.dry_run,
                };
                match self.control.launch(&plan, self.reporter) {
                    Ok(pid) => {
                        self.reporter.report(Event::Launched { kind, ordinal, pid });
                        state.track(WorkerHandle::new(pid, kind));
                    }
                    Err(e) => {
                        state.launch_failures += 1;
                        self.reporter.report(Event::LaunchFailed {
                            kind,
                            error: e.to_string(),
                        });
                    }
                }
                state.remaining.decrement(kind);
            }

            self.reap(state, WaitMode::Poll);
        }
    }

    /// Seconds left before the global deadline, `Ok(None)` when unbounded,
    /// `Err` once the deadline has passed.
    fn pass_timeout(&self, state: &SupervisorState) -> Result<Option<u64>, ()> {
        let global = self.request.timeout_secs;
        if global == 0 {
            return Ok(None);
        }
        let elapsed = state.started.elapsed().as_secs();
        match global.checked_sub(elapsed).filter(|&left| left > 0) {
            Some(left) => {
                self.reporter.report(Event::PassTimeout { secs: left });
                Ok(Some(left))
            }
            None => Err(()),
        }
    }

    fn reap(&mut self, state: &mut SupervisorState, mode: WaitMode) {
        while !state.live.is_empty() && !state.wait_failed {
            match self.control.wait_any(mode) {
                Ok(Some((pid, termination))) => self.harvest(state, pid, termination),
                Ok(None) => break,
                Err(e) => {
                    state.failures += 1;
                    state.wait_failed = true;
                    self.reporter.report(Event::WaitFailed {
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    fn harvest(&mut self, state: &mut SupervisorState, pid: Pid, termination: Termination) {
        let Some(handle) = state.live.remove(&pid) else {
            self.reporter.report(Event::UnknownChild { pid });
            return;
        };
        let kind = handle.kind();

        match classify(termination) {
            Disposition::Success => self.reporter.report(Event::ExitedNormally { pid }),
            Disposition::TimedOut => self.reporter.report(Event::TimedOut { pid }),
            Disposition::Reaped => self.reporter.report(Event::Reaped { pid }),
            Disposition::Failed { broadcast } => {
                state.failures += 1;
                self.reporter.report(match termination {
                    Termination::Exited(code) => Event::ExitedWithError { pid, kind, code },
                    Termination::Signaled(signal) => Event::Signaled { pid, kind, signal },
                    Termination::Other(status) => Event::ExitedAbnormally { pid, kind, status },
                });
                if broadcast {
                    self.broadcast_reap(state);
                }
            }
        }
    }

    fn broadcast_reap(&mut self, state: &mut SupervisorState) {
        if state.reaping {
            return;
        }
        state.reaping = true;
        state.broadcasts += 1;
        self.reporter.report(Event::Reaping {
            siblings: state.live.len(),
        });

        let mut pids: Vec<Pid> = state.live.keys().copied().collect();
        pids.sort();
        for pid in pids {
            if let Err(e) = self.control.signal(pid, REAP_SIGNAL) {
                self.reporter.report(Event::SignalFailed {
                    pid,
                    error: e.to_string(),
                });
            }
        }
    }
}

/// Run `request` with real worker processes. A run with failed workers is
/// an error carrying its summary.
pub fn stress(request: &StressRequest, reporter: &dyn Reporter) -> Result<RunSummary, StressError> {
    Supervisor::new(request, ForkControl::new(), reporter)
        .run()?
        .into_result()
}
