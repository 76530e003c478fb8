//! Runs with real worker processes. The supervisor waits for any child, so
//! these tests take turns.

use std::fs;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use hogstress::{
    stress, CollectingReporter, Event, ForkControl, Hang, StressError, StressRequest, Supervisor,
};

static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[test]
fn dry_run_launches_and_harvests_every_worker() {
    let _turn = serial();
    let request = StressRequest::new()
        .cpu(2)
        .io(1)
        .vm(3)
        .backoff_us(0)
        .dry_run(true);
    let reporter = CollectingReporter::new();

    let summary = Supervisor::new(&request, ForkControl::new(), &reporter)
        .run()
        .unwrap();

    assert_eq!(summary.launched, 6);
    assert_eq!(summary.status(), 0);
    assert_eq!(reporter.count(|e| matches!(e, Event::Launched { .. })), 6);
    assert_eq!(reporter.count(|e| matches!(e, Event::ExitedNormally { .. })), 6);
}

#[test]
fn dry_run_succeeds_every_time() {
    let _turn = serial();
    let request = StressRequest::new().cpu(1).io(1).vm(1).backoff_us(0).dry_run(true);
    let reporter = CollectingReporter::new();

    for _ in 0..2 {
        let summary = stress(&request, &reporter).unwrap();
        assert_eq!(summary.status(), 0);
    }
}

#[test]
fn dry_run_disk_worker_reports_failure() {
    let _turn = serial();
    let request = StressRequest::new().hdd(1).backoff_us(0).dry_run(true);
    let reporter = CollectingReporter::new();

    match stress(&request, &reporter) {
        Err(StressError::RunFailed(summary)) => {
            assert_eq!(summary.launched, 1);
            assert_eq!(summary.failures, 1);
        }
        other => panic!("expected the dry-run disk worker to fail, got {other:?}"),
    }
    assert_eq!(
        reporter.count(|e| matches!(e, Event::ExitedWithError { code: 1, .. })),
        1
    );
}

#[test]
fn workers_stop_themselves_at_the_deadline() {
    let _turn = serial();
    let request = StressRequest::new()
        .cpu(1)
        .vm(1)
        .vm_bytes(1024 * 1024)
        .vm_hang(Hang::Forever)
        .timeout_secs(1)
        .backoff_us(0);
    let reporter = CollectingReporter::new();

    let summary = stress(&request, &reporter).unwrap();

    assert_eq!(summary.launched, 2);
    assert!(summary.elapsed < Duration::from_secs(10));
    assert_eq!(reporter.count(|e| matches!(e, Event::TimedOut { .. })), 2);
}

#[test]
fn failing_worker_reaps_its_siblings() {
    let _turn = serial();
    let request = StressRequest::new()
        .cpu(1)
        .vm(1)
        .vm_bytes(1 << 62)
        .timeout_secs(30)
        .backoff_us(0);
    let reporter = CollectingReporter::new();

    let summary = Supervisor::new(&request, ForkControl::new(), &reporter)
        .run()
        .unwrap();

    assert_eq!(summary.launched, 2);
    assert_eq!(summary.failures, 1);
    assert_eq!(summary.broadcasts, 1);
    assert!(summary.elapsed < Duration::from_secs(20));
    assert_eq!(reporter.count(|e| matches!(e, Event::Reaped { .. })), 1);
}

#[test]
fn disk_worker_leaves_nothing_behind() {
    let _turn = serial();
    let dir = tempfile::tempdir().unwrap();
    let request = StressRequest::new()
        .hdd(1)
        .hdd_bytes(64 * 1024)
        .hdd_dir(dir.path())
        .timeout_secs(1)
        .backoff_us(0);
    let reporter = CollectingReporter::new();

    let summary = stress(&request, &reporter).unwrap();

    assert_eq!(summary.status(), 0);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}
