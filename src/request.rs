//! The stress request: what to run, how many of each, and for how long.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::StressError;
use crate::report::Verbosity;
use crate::worker::WorkerKind;

/// Number of workers of each kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounts {
    pub cpu: u64,
    pub io: u64,
    pub vm: u64,
    pub hdd: u64,
}

impl KindCounts {
    pub fn new(cpu: u64, io: u64, vm: u64, hdd: u64) -> Self {
        Self { cpu, io, vm, hdd }
    }

    pub fn total(&self) -> u64 {
        self.cpu
            .saturating_add(self.io)
            .saturating_add(self.vm)
            .saturating_add(self.hdd)
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn get(&self, kind: WorkerKind) -> u64 {
        match kind {
            WorkerKind::Cpu => self.cpu,
            WorkerKind::Io => self.io,
            WorkerKind::Vm => self.vm,
            WorkerKind::Hdd => self.hdd,
        }
    }

    /// Take one unit off `kind`. Zero stays zero.
    pub fn decrement(&mut self, kind: WorkerKind) {
        let slot = match kind {
            WorkerKind::Cpu => &mut self.cpu,
            WorkerKind::Io => &mut self.io,
            WorkerKind::Vm => &mut self.vm,
            WorkerKind::Hdd => &mut self.hdd,
        };
        *slot = slot.saturating_sub(1);
    }
}

impl fmt::Display for KindCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cpu, {} io, {} vm, {} hdd",
            self.cpu, self.io, self.vm, self.hdd
        )
    }
}

/// What a memory worker does between touching its block and verifying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hang {
    /// Sleep forever holding the block; only a signal ends the worker.
    Forever,
    /// Sleep this long, then verify.
    For(Duration),
    /// Verify immediately.
    Never,
}

impl Hang {
    /// `0` hangs forever, a positive value sleeps that many seconds, a
    /// negative value does not sleep at all.
    pub fn from_secs(secs: i64) -> Self {
        match secs {
            0 => Hang::Forever,
            s if s > 0 => Hang::For(Duration::from_secs(s as u64)),
            _ => Hang::Never,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmParams {
    /// Bytes allocated per block.
    pub bytes: u64,
    /// Distance between touched bytes.
    pub stride: u64,
    pub hang: Hang,
    /// Keep the same block across cycles instead of freeing and reallocating.
    pub keep: bool,
}

impl Default for VmParams {
    fn default() -> Self {
        Self {
            bytes: 256 * 1024 * 1024,
            stride: 4096,
            hang: Hang::Never,
            keep: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HddParams {
    /// Bytes written per file; `0` writes a single file until killed.
    pub bytes: u64,
    /// Directory the temporary files are created in.
    pub dir: PathBuf,
}

impl Default for HddParams {
    fn default() -> Self {
        Self {
            bytes: 1024 * 1024 * 1024,
            dir: PathBuf::from("."),
        }
    }
}

/// A complete stress request. Built once, read-only during the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StressRequest {
    pub verbosity: Verbosity,
    /// Launch workers but have them report completion without doing work.
    pub dry_run: bool,
    /// Backoff unit in microseconds, multiplied by the forks still to go.
    pub backoff_us: u64,
    /// Global timeout in seconds; `0` means unbounded.
    pub timeout_secs: u64,
    pub counts: KindCounts,
    pub vm: VmParams,
    pub hdd: HddParams,
}

impl Default for StressRequest {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::default(),
            dry_run: false,
            backoff_us: 3000,
            timeout_secs: 0,
            counts: KindCounts::default(),
            vm: VmParams::default(),
            hdd: HddParams::default(),
        }
    }
}

impl StressRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn backoff_us(mut self, us: u64) -> Self {
        self.backoff_us = us;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn cpu(mut self, n: u64) -> Self {
        self.counts.cpu = n;
        self
    }

    pub fn io(mut self, n: u64) -> Self {
        self.counts.io = n;
        self
    }

    pub fn vm(mut self, n: u64) -> Self {
        self.counts.vm = n;
        self
    }

    pub fn vm_bytes(mut self, bytes: u64) -> Self {
        self.vm.bytes = bytes;
        self
    }

    pub fn vm_stride(mut self, stride: u64) -> Self {
        self.vm.stride = stride;
        self
    }

    pub fn vm_hang(mut self, hang: Hang) -> Self {
        self.vm.hang = hang;
        self
    }

    pub fn vm_keep(mut self, keep: bool) -> Self {
        self.vm.keep = keep;
        self
    }

    pub fn hdd(mut self, n: u64) -> Self {
        self.counts.hdd = n;
        self
    }

    pub fn hdd_bytes(mut self, bytes: u64) -> Self {
        self.hdd.bytes = bytes;
        self
    }

    pub fn hdd_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.hdd.dir = dir.into();
        self
    }

    /// The global deadline, if one was requested.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Check the parameters a worker would otherwise trip over after launch.
    pub fn validate(&self) -> Result<(), StressError> {
        if self.counts.vm > 0 {
            if self.vm.stride == 0 {
                return Err(StressError::invalid("vm-stride", "must be greater than zero"));
            }
            if self.vm.bytes > isize::MAX as u64 {
                return Err(StressError::invalid(
                    "vm-bytes",
                    format!("{} exceeds the address space", self.vm.bytes),
                ));
            }
        }
        if self.counts.hdd > 0 && self.hdd.dir.as_os_str().is_empty() {
            return Err(StressError::invalid("hdd-dir", "must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_decrement_each_kind_independently() {
        let mut counts = KindCounts::new(2, 1, 0, 3);
        counts.decrement(WorkerKind::Cpu);
        counts.decrement(WorkerKind::Vm);
        counts.decrement(WorkerKind::Hdd);

        assert_eq!(counts, KindCounts::new(1, 1, 0, 2));
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn should_map_hang_seconds() {
        assert_eq!(Hang::from_secs(0), Hang::Forever);
        assert_eq!(Hang::from_secs(3), Hang::For(Duration::from_secs(3)));
        assert_eq!(Hang::from_secs(-1), Hang::Never);
    }

    #[test]
    fn should_build_request_with_builder() {
        let req = StressRequest::new()
            .cpu(2)
            .io(1)
            .vm(3)
            .vm_bytes(1024)
            .vm_keep(true)
            .hdd(1)
            .timeout_secs(10)
            .backoff_us(0)
            .dry_run(true);

        assert_eq!(req.counts, KindCounts::new(2, 1, 3, 1));
        assert_eq!(req.vm.bytes, 1024);
        assert!(req.vm.keep);
        assert_eq!(req.timeout(), Some(Duration::from_secs(10)));
        assert!(req.dry_run);
    }

    #[test]
    fn should_treat_zero_timeout_as_unbounded() {
        assert_eq!(StressRequest::new().timeout(), None);
    }

    #[test]
    fn should_reject_zero_stride_only_when_vm_requested() {
        let req = StressRequest::new().vm_stride(0);
        assert!(req.validate().is_ok());

        let err = req.vm(1).validate().unwrap_err();
        assert!(err.to_string().contains("vm-stride"));
    }
}
