//! Sampling engine: lifecycle, tier threads and concurrency coordination.
//!
//! The engine owns three OS threads, one per tier, each sampling on an
//! absolute-deadline cadence against the shared monotonic time origin `t0`.
//! Every tier thread owns its probes and its sample buffer outright; the
//! buffers come back to the engine through the thread join, so nothing reads
//! them until the producing thread is gone. The only cross-thread traffic
//! during a run is the `running` flag, the fast-sample counter and the
//! mutex-guarded sync-point log.

pub mod warmup;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, info};

use crate::board::BoardConfig;
use crate::clock;
use crate::config::EngineConfig;
use crate::probe::{FastProbes, RailProbes, ThermalProbes};
use crate::trace::writer::{write_trace, TraceData, WriteError};
use crate::trace::{
    FastSample, FileHeader, MediumSample, SlowSample, SyncPoint, MAX_CPU_CORES, MAX_POWER_RAILS,
    MAX_THERMAL_ZONES,
};

use self::warmup::WarmupBarrier;

/// Fast-tier samples taken before the warmup barrier releases. These prime
/// the per-core jiffy deltas; downstream tiers do not run until they are in.
pub const WARMUP_PRIMER_SAMPLES: u32 = 10;

/// Buffers are pre-sized for this many seconds of samples at tier rate.
const BUFFER_SECONDS_HINT: usize = 60;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Errors surfaced by the engine lifecycle.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },

    #[error("engine already running")]
    AlreadyRunning,

    #[error(transparent)]
    Trace(#[from] WriteError),
}

/// State shared between the engine façade and the tier threads.
#[derive(Debug)]
struct Shared {
    running: AtomicBool,
    fast_count: AtomicU64,
    warmup: WarmupBarrier,
    sync_points: Mutex<Vec<SyncPoint>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            fast_count: AtomicU64::new(0),
            warmup: WarmupBarrier::new(),
            sync_points: Mutex::new(Vec::new()),
        }
    }
}

/// Multi-tier sampling engine. One stationary owner of threads, probes and
/// buffers; deliberately neither `Clone` nor `Copy`.
pub struct Engine {
    output_path: PathBuf,
    board: BoardConfig,
    config: EngineConfig,
    shared: Arc<Shared>,
    emc_available: bool,
    fast_thread: Option<JoinHandle<Vec<FastSample>>>,
    medium_thread: Option<JoinHandle<Vec<MediumSample>>>,
    slow_thread: Option<JoinHandle<Vec<SlowSample>>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("output_path", &self.output_path)
            .field("board", &self.board)
            .field("config", &self.config)
            .field("shared", &self.shared)
            .field("emc_available", &self.emc_available)
            .field("fast_thread", &self.fast_thread.is_some())
            .field("medium_thread", &self.medium_thread.is_some())
            .field("slow_thread", &self.slow_thread.is_some())
            .finish()
    }
}

impl Engine {
    /// Validates bounds and builds an idle engine. Touches no files.
    pub fn new(
        output_path: impl Into<PathBuf>,
        board: BoardConfig,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let invalid = |reason: String| EngineError::InvalidConfig { reason };

        if board.num_cpu_cores == 0 || usize::from(board.num_cpu_cores) > MAX_CPU_CORES {
            return Err(invalid(format!(
                "num_cpu_cores must be 1..={MAX_CPU_CORES}, got {}",
                board.num_cpu_cores
            )));
        }
        if board.power_rails.len() > MAX_POWER_RAILS {
            return Err(invalid(format!(
                "at most {MAX_POWER_RAILS} power rails, got {}",
                board.power_rails.len()
            )));
        }
        if board.thermal_zones.len() > MAX_THERMAL_ZONES {
            return Err(invalid(format!(
                "at most {MAX_THERMAL_ZONES} thermal zones, got {}",
                board.thermal_zones.len()
            )));
        }
        if config.fast_hz == 0 || config.medium_hz == 0 || config.slow_hz == 0 {
            return Err(invalid(format!(
                "sampling rates must be > 0, got {}/{}/{}",
                config.fast_hz, config.medium_hz, config.slow_hz
            )));
        }

        Ok(Self {
            output_path: output_path.into(),
            board,
            config,
            shared: Arc::new(Shared::new()),
            emc_available: false,
            fast_thread: None,
            medium_thread: None,
            slow_thread: None,
        })
    }

    /// Opens the probe handles, captures the time origin and spawns the three
    /// tier threads. Each call begins a fresh run with empty buffers.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.is_running() {
            return Err(EngineError::AlreadyRunning);
        }

        // Fresh shared state per run: counter at zero, barrier armed,
        // sync log empty. Threads of a previous run were already joined.
        self.shared = Arc::new(Shared::new());
        self.shared.running.store(true, Ordering::Release);

        let fast_probes = FastProbes::open(&self.board);
        let rail_probes = RailProbes::open(&self.board);
        let thermal_probes = ThermalProbes::open(&self.board);
        self.emc_available = fast_probes.emc_available();

        // The time origin is captured exactly once, immediately before the
        // threads spawn, so all three tiers share it.
        let t0 = clock::monotonic_s();

        let shared = Arc::clone(&self.shared);
        let hz = self.config.fast_hz;
        self.fast_thread = Some(std::thread::spawn(move || {
            run_fast(&shared, fast_probes, t0, hz)
        }));

        let shared = Arc::clone(&self.shared);
        let hz = self.config.medium_hz;
        self.medium_thread = Some(std::thread::spawn(move || {
            run_medium(&shared, rail_probes, t0, hz)
        }));

        let shared = Arc::clone(&self.shared);
        let hz = self.config.slow_hz;
        self.slow_thread = Some(std::thread::spawn(move || {
            run_slow(&shared, thermal_probes, t0, hz)
        }));

        info!(
            board = %self.board.board_name,
            fast_hz = self.config.fast_hz,
            medium_hz = self.config.medium_hz,
            slow_hz = self.config.slow_hz,
            emc = self.emc_available,
            "sampling started",
        );

        Ok(())
    }

    /// Stops sampling, joins all tier threads and writes the trace file.
    ///
    /// Every started thread is joined before the writer runs, so a writer
    /// failure never leaks a thread. A never-started (or already-stopped)
    /// engine returns without touching the output path.
    pub fn stop(&mut self) -> Result<(), EngineError> {
        self.shared.running.store(false, Ordering::Release);
        self.shared.warmup.cancel();

        let fast = join_tier(self.fast_thread.take(), "fast");
        let medium = join_tier(self.medium_thread.take(), "medium");
        let slow = join_tier(self.slow_thread.take(), "slow");

        let (Some(fast), Some(medium), Some(slow)) = (fast, medium, slow) else {
            return Ok(());
        };

        let sync_points = std::mem::take(&mut *self.shared.sync_points.lock());

        write_trace(
            &self.output_path,
            self.header(),
            &TraceData {
                fast: &fast,
                medium: &medium,
                slow: &slow,
                sync_points: &sync_points,
            },
        )?;

        Ok(())
    }

    /// Blocks until the fast thread has finished its primer samples (or the
    /// run was stopped first).
    pub fn wait_for_warmup(&self) {
        self.shared.warmup.wait();
    }

    /// Records a sync point correlating this instant with the fast-tier
    /// sample index, returning its id (dense sequence starting at 1).
    ///
    /// Valid at any point of a run, warmup included.
    pub fn sync(&self) -> u64 {
        let mut log = self.shared.sync_points.lock();
        let id = log.len() as u64 + 1;
        log.push(SyncPoint {
            sync_id: id,
            fast_sample_idx: self.shared.fast_count.load(Ordering::Acquire),
        });
        id
    }

    /// Number of fast samples appended so far in the current run.
    pub fn sample_count(&self) -> u64 {
        self.shared.fast_count.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn header(&self) -> FileHeader {
        FileHeader {
            board_name: self.board.board_name.clone(),
            num_cpu_cores: self.board.num_cpu_cores,
            num_power_rails: self.board.power_rails.len() as u8,
            num_thermal_zones: self.board.thermal_zones.len() as u8,
            emc_available: self.emc_available,
            fast_hz: self.config.fast_hz,
            medium_hz: self.config.medium_hz,
            slow_hz: self.config.slow_hz,
            // Counts are filled by the writer from the final buffer sizes.
            num_fast_samples: 0,
            num_medium_samples: 0,
            num_slow_samples: 0,
            num_sync_points: 0,
            power_rail_names: self.board.power_rails.iter().map(|r| r.label.clone()).collect(),
            thermal_zone_names: self
                .board
                .thermal_zones
                .iter()
                .map(|z| z.name.clone())
                .collect(),
        }
    }
}

impl Drop for Engine {
    /// A still-running engine is stopped (and its trace written) on drop;
    /// errors are logged rather than propagated out of the destructor.
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop() {
                error!(error = %e, "stopping engine during drop failed");
            }
        }
    }
}

fn join_tier<T>(handle: Option<JoinHandle<Vec<T>>>, tier: &str) -> Option<Vec<T>> {
    match handle?.join() {
        Ok(buf) => Some(buf),
        Err(_) => {
            error!(tier, "tier thread panicked, its samples are lost");
            Some(Vec::new())
        }
    }
}

fn capacity_hint(hz: u32) -> usize {
    hz as usize * BUFFER_SECONDS_HINT
}

fn interval_ns(hz: u32) -> u64 {
    (NANOS_PER_SEC / u64::from(hz)).max(1)
}

/// Fast-tier loop: primer pass, warmup release, then the steady state.
fn run_fast(shared: &Shared, mut probes: FastProbes, t0: f64, hz: u32) -> Vec<FastSample> {
    let interval = interval_ns(hz);
    let mut samples = Vec::with_capacity(capacity_hint(hz));

    // Primer pass establishes the jiffy baselines. Relative sleeps suffice;
    // absolute cadence only matters once samples are meaningful.
    for _ in 0..WARMUP_PRIMER_SAMPLES {
        if !shared.running.load(Ordering::Acquire) {
            break;
        }
        push_fast_sample(shared, &mut probes, t0, &mut samples);
        clock::sleep_ns(interval);
    }

    shared.warmup.mark_warmed();

    let mut next = clock::monotonic_ns();
    while shared.running.load(Ordering::Acquire) {
        push_fast_sample(shared, &mut probes, t0, &mut samples);

        // Advancing the deadline (not re-reading the clock) keeps long-run
        // cadence exact; an overrun iteration just sleeps zero.
        next += interval;
        clock::sleep_until(next);
    }

    samples
}

fn push_fast_sample(
    shared: &Shared,
    probes: &mut FastProbes,
    t0: f64,
    samples: &mut Vec<FastSample>,
) {
    let s = probes.sample(clock::monotonic_s() - t0);
    samples.push(s);
    // Release pairs with the acquire in sample_count()/sync(): an observer
    // that reads count k knows samples 0..k have been appended.
    shared.fast_count.fetch_add(1, Ordering::Release);
}

/// Medium-tier loop: wait out warmup, then sample rails on cadence.
fn run_medium(shared: &Shared, probes: RailProbes, t0: f64, hz: u32) -> Vec<MediumSample> {
    shared.warmup.wait();

    let interval = interval_ns(hz);
    let mut samples = Vec::with_capacity(capacity_hint(hz));

    let mut next = clock::monotonic_ns();
    while shared.running.load(Ordering::Acquire) {
        samples.push(probes.sample(clock::monotonic_s() - t0));
        next += interval;
        clock::sleep_until(next);
    }

    samples
}

/// Slow-tier loop: wait out warmup, then sample thermals on cadence.
fn run_slow(shared: &Shared, probes: ThermalProbes, t0: f64, hz: u32) -> Vec<SlowSample> {
    shared.warmup.wait();

    let interval = interval_ns(hz);
    let mut samples = Vec::with_capacity(capacity_hint(hz));

    let mut next = clock::monotonic_ns();
    while shared.running.load(Ordering::Acquire) {
        samples.push(probes.sample(clock::monotonic_s() - t0));
        next += interval;
        clock::sleep_until(next);
    }

    samples
}
