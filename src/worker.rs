//! Worker kinds and what a freshly launched worker process runs.

use std::fmt;

use crate::error::WorkerError;
use crate::report::{Event, Reporter};
use crate::request::{HddParams, StressRequest, VmParams};
use crate::{cpu_stress, disk_stress, io_stress, memory_stress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Cpu,
    Io,
    Vm,
    Hdd,
}

impl WorkerKind {
    /// Dispatch order within one pass.
    pub const ALL: [WorkerKind; 4] = [
        WorkerKind::Cpu,
        WorkerKind::Io,
        WorkerKind::Vm,
        WorkerKind::Hdd,
    ];
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkerKind::Cpu => "hogcpu",
            WorkerKind::Io => "hogio",
            WorkerKind::Vm => "hogvm",
            WorkerKind::Hdd => "hoghdd",
        })
    }
}

/// A worker kind together with the parameters its hog needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerSpec {
    Cpu,
    Io,
    Vm(VmParams),
    Hdd(HddParams),
}

impl WorkerSpec {
    pub fn for_kind(kind: WorkerKind, request: &StressRequest) -> Self {
        match kind {
            WorkerKind::Cpu => WorkerSpec::Cpu,
            WorkerKind::Io => WorkerSpec::Io,
            WorkerKind::Vm => WorkerSpec::Vm(request.vm.clone()),
            WorkerKind::Hdd => WorkerSpec::Hdd(request.hdd.clone()),
        }
    }

    pub fn kind(&self) -> WorkerKind {
        match self {
            WorkerSpec::Cpu => WorkerKind::Cpu,
            WorkerSpec::Io => WorkerKind::Io,
            WorkerSpec::Vm(_) => WorkerKind::Vm,
            WorkerSpec::Hdd(_) => WorkerKind::Hdd,
        }
    }
}

/// Run the hog for `spec`. Real hogs only come back on error.
///
/// In dry-run mode cpu, io and vm workers succeed without doing anything;
/// the disk worker fails.
pub fn run(spec: &WorkerSpec, dry_run: bool, reporter: &dyn Reporter) -> Result<(), WorkerError> {
    if dry_run {
        return match spec {
            WorkerSpec::Hdd(_) => Err(WorkerError::DryRunUnsupported),
            _ => Ok(()),
        };
    }
    let never = match spec {
        WorkerSpec::Cpu => cpu_stress::stress_cpu(),
        WorkerSpec::Io => io_stress::stress_io(),
        WorkerSpec::Vm(params) => memory_stress::stress_memory(params, reporter)?,
        WorkerSpec::Hdd(params) => disk_stress::stress_disk(params, reporter)?,
    };
    match never {}
}

/// Exit status of a worker process that finished with `result`.
pub fn exit_code(result: &Result<(), WorkerError>, reporter: &dyn Reporter) -> i32 {
    match result {
        Ok(()) => 0,
        Err(WorkerError::DryRunUnsupported) => 1,
        Err(e) => {
            reporter.report(Event::WorkerFailed {
                error: e.to_string(),
            });
            e.exit_code()
        }
    }
}
