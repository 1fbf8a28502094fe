//! One-shot trace file emission.
//!
//! The writer runs exactly once per recording, after every tier thread has
//! been joined, so it observes frozen buffers and needs no synchronization.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use thiserror::Error;
use tracing::info;

use super::{FastSample, FileHeader, MediumSample, SlowSample, SyncPoint, FAST_SAMPLE_SIZE};

/// Errors surfaced while writing a trace file.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("creating trace file {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("writing trace file {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// Frozen sample arrays for one completed recording.
pub struct TraceData<'a> {
    pub fast: &'a [FastSample],
    pub medium: &'a [MediumSample],
    pub slow: &'a [SlowSample],
    pub sync_points: &'a [SyncPoint],
}

/// Writes header and packed sample arrays to `path`.
///
/// The header's counts are taken from the final array lengths, never from
/// earlier estimates. Partial writes are not retried.
pub fn write_trace(path: &Path, mut header: FileHeader, data: &TraceData<'_>) -> Result<(), WriteError> {
    header.num_fast_samples = data.fast.len() as u64;
    header.num_medium_samples = data.medium.len() as u64;
    header.num_slow_samples = data.slow.len() as u64;
    header.num_sync_points = data.sync_points.len() as u64;

    let file = File::create(path).map_err(|source| WriteError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let mut out = BufWriter::new(file);

    let io_err = |source| WriteError::Write {
        path: path.display().to_string(),
        source,
    };

    let mut buf = Vec::with_capacity(FAST_SAMPLE_SIZE.max(super::HEADER_SIZE));
    header.encode_into(&mut buf);
    out.write_all(&buf).map_err(io_err)?;

    for s in data.fast {
        buf.clear();
        s.encode_into(&mut buf);
        out.write_all(&buf).map_err(io_err)?;
    }
    for s in data.medium {
        buf.clear();
        s.encode_into(&mut buf);
        out.write_all(&buf).map_err(io_err)?;
    }
    for s in data.slow {
        buf.clear();
        s.encode_into(&mut buf);
        out.write_all(&buf).map_err(io_err)?;
    }
    for sp in data.sync_points {
        buf.clear();
        sp.encode_into(&mut buf);
        out.write_all(&buf).map_err(io_err)?;
    }

    out.flush().map_err(io_err)?;

    info!(
        path = %path.display(),
        fast = data.fast.len(),
        medium = data.medium.len(),
        slow = data.slow.len(),
        sync_points = data.sync_points.len(),
        "trace written",
    );

    Ok(())
}
