use std::convert::Infallible;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::Rng;

use crate::error::WorkerError;
use crate::process::DeferSignals;
use crate::report::{Event, Reporter};
use crate::request::HddParams;

/// Size of the seeded buffer, one short of a whole block so the last
/// write of a file is a partial one.
pub const CHUNK: usize = 1024 * 1024 - 1;

/// One disk worker: a seeded buffer and the file size to churn through.
pub struct DiskHog<'a> {
    buffer: Vec<u8>,
    bytes: u64,
    dir: PathBuf,
    reporter: &'a dyn Reporter,
}

impl<'a> DiskHog<'a> {
    pub fn new(params: &HddParams, reporter: &'a dyn Reporter) -> Self {
        reporter.report(Event::Seeding { bytes: CHUNK });
        Self {
            buffer: seed_buffer(CHUNK, &mut rand::rng()),
            bytes: params.bytes,
            dir: params.dir.clone(),
            reporter,
        }
    }

    /// Create, unlink, fill and close one temporary file.
    /// Returns the number of bytes written; with `bytes == 0` it never returns.
    pub fn cycle(&self) -> Result<u64, WorkerError> {
        let mut file = self.create_unlinked()?;
        let written = self.fill(&mut file).map_err(WorkerError::Write)?;
        drop(file);
        self.reporter.report(Event::FileClosed { written });
        Ok(written)
    }

    /// Create a uniquely named file in the worker's directory and remove its
    /// name right away, keeping only the open handle.
    pub fn create_unlinked(&self) -> Result<File, WorkerError> {
        // A deadline must not land between creating the name and removing it.
        let _deferred = DeferSignals::new();
        let named = tempfile::Builder::new()
            .prefix("stress.")
            .rand_bytes(6)
            .tempfile_in(&self.dir)
            .map_err(WorkerError::Create)?;
        let (file, path) = named.into_parts();
        self.reporter.report(Event::FileOpened {
            path: path.to_path_buf(),
            bytes: self.bytes,
        });

        self.reporter.report(Event::Unlinking {
            path: path.to_path_buf(),
        });
        path.close().map_err(WorkerError::Unlink)?;
        Ok(file)
    }

    /// Write exactly `bytes` bytes (or forever when zero): whole chunks while
    /// more than a chunk remains, then the tail one byte at a time, then a
    /// closing newline.
    pub fn fill<W: Write>(&self, sink: &mut W) -> std::io::Result<u64> {
        let chunk = self.buffer.len() as u64;
        let mut written: u64 = 0;

        self.reporter.report(Event::FastWriting);
        while self.bytes == 0 || written + chunk < self.bytes {
            sink.write_all(&self.buffer)?;
            written += chunk;
        }

        self.reporter.report(Event::SlowWriting);
        while written + 1 < self.bytes {
            let byte = self.buffer[(written % chunk) as usize];
            sink.write_all(&[byte])?;
            written += 1;
        }
        sink.write_all(b"\n")?;
        Ok(written + 1)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Printable ASCII noise, ending in a newline.
fn seed_buffer(len: usize, rng: &mut impl Rng) -> Vec<u8> {
    let mut buffer: Vec<u8> = (0..len.saturating_sub(1))
        .map(|_| rng.random_range(32u8..127))
        .collect();
    buffer.push(b'\n');
    buffer
}

/// Churn through temporary files until killed or until I/O fails.
pub fn stress_disk(params: &HddParams, reporter: &dyn Reporter) -> Result<Infallible, WorkerError> {
    let hog = DiskHog::new(params, reporter);
    loop {
        hog.cycle()?;
    }
}
