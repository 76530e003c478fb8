//! # hogstress
//!
//! Put a machine under load for a bounded time: one worker process per
//! requested unit of cpu, io, memory or disk load, a wall-clock deadline
//! each worker enforces on itself, and fail-fast supervision that reaps
//! every sibling as soon as one worker fails.
//!
//! ```rust,no_run
//! use hogstress::{stress, LogReporter, StressRequest, Verbosity};
//!
//! let request = StressRequest::new().cpu(2).vm(1).timeout_secs(10);
//! let reporter = LogReporter::new(Verbosity::Info);
//! match stress(&request, &reporter) {
//!     Ok(summary) => println!("ran {} workers", summary.launched),
//!     Err(e) => eprintln!("{e}"),
//! }
//! ```

pub mod cpu_stress;
pub mod disk_stress;
pub mod error;
pub mod io_stress;
pub mod memory_stress;
pub mod process;
pub mod report;
pub mod request;
pub mod supervisor;
pub mod units;
pub mod worker;

pub use error::{StressError, WorkerError};
pub use process::{ForkControl, Pid, ProcessControl, Termination};
pub use report::{CollectingReporter, Event, LogReporter, Reporter, Verbosity};
pub use request::{Hang, HddParams, KindCounts, StressRequest, VmParams};
pub use supervisor::{stress, RunSummary, Supervisor};
pub use worker::WorkerKind;
