use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use log::Level;

use hogstress::units::{parse_duration, parse_size};
use hogstress::{stress, Hang, LogReporter, StressError, StressRequest, Verbosity};

/// Impose a configurable amount of cpu, io, memory and disk load.
#[derive(Parser, Debug)]
#[command(name = "hogstress", version)]
struct Args {
    /// Workers spinning on sqrt()
    #[arg(short, long, default_value_t = 0, env = "HOGSTRESS_CPU")]
    cpu: u64,

    /// Workers spinning on sync()
    #[arg(short, long, default_value_t = 0, env = "HOGSTRESS_IO")]
    io: u64,

    /// Workers spinning on malloc()/free()
    #[arg(short = 'm', long, default_value_t = 0, env = "HOGSTRESS_VM")]
    vm: u64,

    /// Bytes allocated per vm worker (suffixes b, k, m, g)
    #[arg(long, value_parser = parse_size, default_value = "256M", env = "HOGSTRESS_VM_BYTES")]
    vm_bytes: u64,

    /// Touch one byte every this many bytes
    #[arg(long, value_parser = parse_size, default_value = "4096", env = "HOGSTRESS_VM_STRIDE")]
    vm_stride: u64,

    /// Seconds to sleep before verifying; 0 sleeps forever, negative never sleeps
    #[arg(long, default_value_t = -1, allow_negative_numbers = true, env = "HOGSTRESS_VM_HANG")]
    vm_hang: i64,

    /// Redirty the same block instead of freeing and reallocating
    #[arg(long, env = "HOGSTRESS_VM_KEEP")]
    vm_keep: bool,

    /// Workers spinning on write()/unlink()
    #[arg(short = 'd', long, default_value_t = 0, env = "HOGSTRESS_HDD")]
    hdd: u64,

    /// Bytes written per hdd file; 0 writes until killed (suffixes b, k, m, g)
    #[arg(long, value_parser = parse_size, default_value = "1G", env = "HOGSTRESS_HDD_BYTES")]
    hdd_bytes: u64,

    /// Directory hdd workers create their temporary files in
    #[arg(long, default_value = ".", env = "HOGSTRESS_HDD_DIR")]
    hdd_dir: PathBuf,

    /// Stop after this long (suffixes s, m, h, d, y); 0 runs until failure
    #[arg(short, long, value_parser = parse_duration, default_value = "0", env = "HOGSTRESS_TIMEOUT")]
    timeout: u64,

    /// Backoff unit in microseconds before a worker starts
    #[arg(long, default_value_t = 3000, env = "HOGSTRESS_BACKOFF")]
    backoff: u64,

    /// Show what would be done without hogging anything
    #[arg(short = 'n', long, env = "HOGSTRESS_DRY_RUN")]
    dry_run: bool,

    /// Be more verbose; repeat for debug output
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Report failures only
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Args {
    fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Error
        } else {
            Verbosity::from_level(2 + i64::from(self.verbose))
        }
    }

    fn request(&self) -> StressRequest {
        StressRequest::new()
            .verbosity(self.verbosity())
            .dry_run(self.dry_run)
            .backoff_us(self.backoff)
            .timeout_secs(self.timeout)
            .cpu(self.cpu)
            .io(self.io)
            .vm(self.vm)
            .vm_bytes(self.vm_bytes)
            .vm_stride(self.vm_stride)
            .vm_hang(Hang::from_secs(self.vm_hang))
            .vm_keep(self.vm_keep)
            .hdd(self.hdd)
            .hdd_bytes(self.hdd_bytes)
            .hdd_dir(self.hdd_dir.clone())
    }
}

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Trace)
        .format(|buf, record| {
            let level = match record.level() {
                Level::Error => "FAIL",
                Level::Warn => "WARN",
                Level::Info => "info",
                Level::Debug | Level::Trace => "dbug",
            };
            writeln!(buf, "{}: {}: {}", env!("CARGO_PKG_NAME"), level, record.args())
        })
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging();

    let request = args.request();
    let reporter = LogReporter::new(request.verbosity);

    match stress(&request, &reporter) {
        Ok(_) => ExitCode::SUCCESS,
        // Already reported as the run's closing line.
        Err(StressError::RunFailed(_)) => ExitCode::FAILURE,
        Err(e) => {
            if reporter.verbosity().allows(Level::Error) {
                log::error!("[{}] {}", std::process::id(), e);
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn builds_request_from_flags() {
        let args = Args::try_parse_from([
            "hogstress",
            "--cpu",
            "2",
            "-m",
            "1",
            "--vm-bytes",
            "1k",
            "--vm-hang",
            "-1",
            "-t",
            "1m",
            "-vv",
        ])
        .unwrap();
        let request = args.request();

        assert_eq!(request.counts.cpu, 2);
        assert_eq!(request.counts.vm, 1);
        assert_eq!(request.vm.bytes, 1024);
        assert_eq!(request.vm.hang, Hang::Never);
        assert_eq!(request.timeout_secs, 60);
        assert_eq!(request.verbosity, Verbosity::Debug);
        assert_eq!(request.backoff_us, 3000);
    }

    #[test]
    fn quiet_keeps_only_failures() {
        let args = Args::try_parse_from(["hogstress", "-q", "-c", "1"]).unwrap();
        assert_eq!(args.request().verbosity, Verbosity::Error);
    }

    #[test]
    fn rejects_bad_size() {
        assert!(Args::try_parse_from(["hogstress", "--vm-bytes", "12q"]).is_err());
    }
}
