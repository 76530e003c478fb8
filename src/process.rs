//! Worker processes: launching them, harvesting them, signalling them.

use std::fmt;
use std::io;
use std::mem;
use std::ptr;
use std::thread;
use std::time::Duration;

use crate::report::Reporter;
use crate::worker::{self, WorkerSpec};

/// Delivered by a worker's own alarm when its deadline passes.
pub const TIMEOUT_SIGNAL: i32 = libc::SIGALRM;
/// Broadcast to the surviving workers after a failure.
pub const REAP_SIGNAL: i32 = libc::SIGUSR1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub i32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How a harvested worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
    /// Neither an exit nor a fatal signal; the raw wait status.
    Other(i32),
}

impl Termination {
    pub fn from_wait_status(status: libc::c_int) -> Self {
        if libc::WIFEXITED(status) {
            Termination::Exited(libc::WEXITSTATUS(status))
        } else if libc::WIFSIGNALED(status) {
            Termination::Signaled(libc::WTERMSIG(status))
        } else {
            Termination::Other(status)
        }
    }
}

/// Everything a new worker needs to know before it starts hogging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub spec: WorkerSpec,
    /// Units of this kind left, counting this one.
    pub ordinal: u64,
    /// Seconds until the worker's own alarm fires.
    pub timeout: Option<u64>,
    /// Pause before starting work.
    pub backoff: Duration,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    Block,
    Poll,
}

/// The operating system side of supervision.
pub trait ProcessControl {
    /// Start a worker process running `plan`.
    fn launch(&mut self, plan: &LaunchPlan, reporter: &dyn Reporter) -> io::Result<Pid>;

    /// Harvest one terminated child. In [`WaitMode::Poll`] returns `None`
    /// when nothing has terminated yet.
    fn wait_any(&mut self, mode: WaitMode) -> io::Result<Option<(Pid, Termination)>>;

    fn signal(&mut self, pid: Pid, signal: i32) -> io::Result<()>;
}

/// Real worker processes, one `fork` each.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForkControl;

impl ForkControl {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessControl for ForkControl {
    fn launch(&mut self, plan: &LaunchPlan, reporter: &dyn Reporter) -> io::Result<Pid> {
        // SAFETY: the child never returns into the caller; it runs the worker
        // and leaves through _exit.
        match unsafe { libc::fork() } {
            -1 => Err(io::Error::last_os_error()),
            0 => run_child(plan, reporter),
            pid => Ok(Pid(pid)),
        }
    }

    fn wait_any(&mut self, mode: WaitMode) -> io::Result<Option<(Pid, Termination)>> {
        let flags = match mode {
            WaitMode::Block => 0,
            WaitMode::Poll => libc::WNOHANG,
        };
        loop {
            let mut status: libc::c_int = 0;
            // SAFETY: status is a valid out pointer for the duration of the call.
            match unsafe { libc::waitpid(-1, &mut status, flags) } {
                0 => return Ok(None),
                -1 => {
                    let err = io::Error::last_os_error();
                    if err.kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(err);
                }
                pid => return Ok(Some((Pid(pid), Termination::from_wait_status(status)))),
            }
        }
    }

    fn signal(&mut self, pid: Pid, signal: i32) -> io::Result<()> {
        // SAFETY: kill(2) has no memory safety preconditions.
        if unsafe { libc::kill(pid.0, signal) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// The timeout and reap signals as a set.
fn supervision_signals() -> libc::sigset_t {
    // SAFETY: the set is initialized by sigemptyset before use.
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, TIMEOUT_SIGNAL);
        libc::sigaddset(&mut set, REAP_SIGNAL);
        set
    }
}

/// Holds back the timeout and reap signals on the current thread until
/// dropped. Pending signals are delivered on drop.
pub(crate) struct DeferSignals {
    previous: libc::sigset_t,
}

impl DeferSignals {
    pub(crate) fn new() -> Self {
        // SAFETY: previous is filled in by pthread_sigmask before it is read.
        unsafe {
            let mut previous: libc::sigset_t = mem::zeroed();
            libc::pthread_sigmask(libc::SIG_BLOCK, &supervision_signals(), &mut previous);
            Self { previous }
        }
    }
}

impl Drop for DeferSignals {
    fn drop(&mut self) {
        // SAFETY: previous holds the mask saved in new().
        unsafe {
            libc::pthread_sigmask(libc::SIG_SETMASK, &self.previous, ptr::null_mut());
        }
    }
}

fn run_child(plan: &LaunchPlan, reporter: &dyn Reporter) -> ! {
    // SAFETY: resetting dispositions and the mask, and arming an alarm, only
    // touch this process' signal state.
    unsafe {
        libc::signal(TIMEOUT_SIGNAL, libc::SIG_DFL);
        libc::signal(REAP_SIGNAL, libc::SIG_DFL);
        libc::pthread_sigmask(libc::SIG_UNBLOCK, &supervision_signals(), ptr::null_mut());
        if let Some(secs) = plan.timeout {
            libc::alarm(secs.min(libc::c_uint::MAX as u64) as libc::c_uint);
        }
    }
    thread::sleep(plan.backoff);

    let result = worker::run(&plan.spec, plan.dry_run, reporter);
    let code = worker::exit_code(&result, reporter);
    // SAFETY: _exit skips the parent's atexit handlers and buffered state,
    // which this copy of the process must not run.
    unsafe { libc::_exit(code) }
}
