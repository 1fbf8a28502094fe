//! Persistent pseudo-file readers for sysfs/procfs/debugfs counters.
//!
//! Every kernel counter is read through a handle opened once at engine start
//! and reused for the whole run: each tick issues a single bounded `pread` at
//! offset zero into a stack buffer, so the steady state performs no
//! allocation and no path lookups. Paths that cannot be opened disable their
//! metric for the run instead of failing it.

pub mod cpu;

use std::fs::File;
use std::os::unix::fs::FileExt;

use tracing::{debug, warn};

use crate::board::BoardConfig;
use crate::trace::{FastSample, MediumSample, SlowSample, MAX_CPU_CORES};

use self::cpu::{CpuTracker, STAT_BUF_LEN};

const MEMINFO_BUF_LEN: usize = 2048;
const INT_BUF_LEN: usize = 32;

/// A pre-opened kernel pseudo-file, read via `pread` at offset zero.
#[derive(Debug)]
pub struct PseudoFile {
    file: File,
}

impl PseudoFile {
    /// Opens `path` read-only. An empty path or an open failure yields `None`
    /// (the metric is disabled, not an error); failures are logged once here.
    pub fn open(path: &str) -> Option<Self> {
        if path.is_empty() {
            return None;
        }

        match File::open(path) {
            Ok(file) => Some(Self { file }),
            Err(e) => {
                warn!(path, error = %e, "metric source unavailable, slot disabled");
                None
            }
        }
    }

    /// Reads the file content from offset zero into `buf`.
    ///
    /// Returns the number of bytes read; a failed read returns 0 and the
    /// current tick reports the field's default.
    pub fn read_into(&self, buf: &mut [u8]) -> usize {
        self.file.read_at(buf, 0).unwrap_or(0)
    }

    /// Reads and parses a single decimal ASCII integer; 0 on any failure.
    pub fn read_i64(&self) -> i64 {
        self.try_read_i64().unwrap_or(0)
    }

    /// Reads and parses a single decimal ASCII integer, surfacing failure:
    /// `None` when the read returns no bytes or the content does not parse.
    pub fn try_read_i64(&self) -> Option<i64> {
        let mut buf = [0u8; INT_BUF_LEN];
        let n = self.read_into(&mut buf);
        if n == 0 {
            return None;
        }
        parse_i64_ascii(&buf[..n])
    }
}

/// Parses a decimal integer (optional sign) with surrounding whitespace.
fn parse_i64_ascii(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
}

/// Extracts `used_kb` and `available_kb` from `/proc/meminfo` text.
///
/// Values are kilobytes as reported by the kernel;
/// `used = MemTotal - MemAvailable`, floored at zero.
fn parse_meminfo(text: &str) -> (u64, u64) {
    let mut total = 0u64;
    let mut available = 0u64;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = first_u64(rest);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available = first_u64(rest);
            break; // MemAvailable follows MemTotal; both are in hand.
        }
    }

    (total.saturating_sub(available), available)
}

fn first_u64(s: &str) -> u64 {
    s.split_ascii_whitespace()
        .next()
        .and_then(|tok| tok.parse().ok())
        .unwrap_or(0)
}

/// Fast-tier sources: GPU load, `/proc/stat`, `/proc/meminfo` and the EMC
/// activity counter. Owned exclusively by the fast thread.
pub struct FastProbes {
    gpu: Option<PseudoFile>,
    stat: Option<PseudoFile>,
    meminfo: Option<PseudoFile>,
    emc: Option<PseudoFile>,
    cpu: CpuTracker,
}

impl FastProbes {
    pub fn open(board: &BoardConfig) -> Self {
        Self {
            gpu: PseudoFile::open(&board.gpu_load_path),
            stat: PseudoFile::open("/proc/stat"),
            meminfo: PseudoFile::open("/proc/meminfo"),
            emc: PseudoFile::open(&board.emc_path),
            cpu: CpuTracker::new(board.num_cpu_cores as usize),
        }
    }

    /// True when the EMC counter was opened at start.
    pub fn emc_available(&self) -> bool {
        self.emc.is_some()
    }

    /// Takes one full fast-tier sample stamped with `time_s`.
    pub fn sample(&mut self, time_s: f64) -> FastSample {
        let mut s = FastSample {
            time_s,
            gpu_load: self.read_gpu_load(),
            emc_util: self.read_emc(),
            ..FastSample::default()
        };

        s.cpu_aggregate = self.read_cpu(&mut s.cpu_util);

        let (used, available) = self.read_ram();
        s.ram_used_kb = used;
        s.ram_available_kb = available;

        s
    }

    fn read_gpu_load(&self) -> u16 {
        match &self.gpu {
            Some(f) => f.read_i64().clamp(0, 1000) as u16,
            None => 0,
        }
    }

    fn read_cpu(&mut self, per_core: &mut [f32; MAX_CPU_CORES]) -> f32 {
        let Some(stat) = &self.stat else { return 0.0 };

        let mut buf = [0u8; STAT_BUF_LEN];
        let n = stat.read_into(&mut buf);
        if n == 0 {
            return 0.0;
        }

        let text = match std::str::from_utf8(&buf[..n]) {
            Ok(t) => t,
            // A read truncated mid-multibyte sequence cannot happen for
            // /proc/stat's ASCII output; treat it as a failed read.
            Err(_) => return 0.0,
        };

        self.cpu.update(text, per_core)
    }

    fn read_ram(&self) -> (u64, u64) {
        let Some(meminfo) = &self.meminfo else {
            return (0, 0);
        };

        let mut buf = [0u8; MEMINFO_BUF_LEN];
        let n = meminfo.read_into(&mut buf);
        match std::str::from_utf8(&buf[..n]) {
            Ok(text) => parse_meminfo(text),
            Err(_) => (0, 0),
        }
    }

    fn read_emc(&self) -> f32 {
        let Some(f) = &self.emc else { return -1.0 };

        // The raw counter's units are kernel-dependent; it is treated as an
        // integer percentage and clamped until a scaling factor is supplied
        // by the board catalog. An unavailable handle and a failed mid-run
        // read both report the -1.0 sentinel.
        match f.try_read_i64() {
            Some(v) => (v as f32).clamp(0.0, 100.0),
            None => -1.0,
        }
    }
}

/// One power rail's voltage/current source pair.
struct RailProbe {
    voltage: Option<PseudoFile>,
    current: Option<PseudoFile>,
}

/// Medium-tier sources: INA3221-style rail voltage/current readings.
/// Owned exclusively by the medium thread.
pub struct RailProbes {
    rails: Vec<RailProbe>,
}

impl RailProbes {
    pub fn open(board: &BoardConfig) -> Self {
        let rails = board
            .power_rails
            .iter()
            .map(|r| RailProbe {
                voltage: PseudoFile::open(&r.voltage_path),
                current: PseudoFile::open(&r.current_path),
            })
            .collect();

        Self { rails }
    }

    /// Takes one medium-tier sample stamped with `time_s`.
    ///
    /// Rail slots past the configured count stay zeroed.
    pub fn sample(&self, time_s: f64) -> MediumSample {
        let mut s = MediumSample {
            time_s,
            ..MediumSample::default()
        };

        for (i, rail) in self.rails.iter().enumerate() {
            let v = rail.voltage.as_ref().map_or(0, PseudoFile::read_i64);
            let c = rail.current.as_ref().map_or(0, PseudoFile::read_i64);
            let v = v.clamp(0, i64::from(u32::MAX)) as u32;
            let c = c.clamp(0, i64::from(u32::MAX)) as u32;

            s.voltage_mv[i] = v;
            s.current_ma[i] = c;
            s.power_mw[i] = v as f32 * c as f32 / 1000.0;
        }

        s
    }
}

/// Slow-tier sources: thermal zone temperature files.
/// Owned exclusively by the slow thread.
pub struct ThermalProbes {
    zones: Vec<Option<PseudoFile>>,
}

impl ThermalProbes {
    pub fn open(board: &BoardConfig) -> Self {
        let zones = board
            .thermal_zones
            .iter()
            .map(|z| PseudoFile::open(&z.temp_path))
            .collect();

        debug!(zones = board.thermal_zones.len(), "thermal probes opened");

        Self { zones }
    }

    /// Takes one slow-tier sample stamped with `time_s`.
    ///
    /// Temperatures arrive in milli-degrees C; zone slots past the
    /// configured count stay zeroed.
    pub fn sample(&self, time_s: f64) -> SlowSample {
        let mut s = SlowSample {
            time_s,
            ..SlowSample::default()
        };

        for (i, zone) in self.zones.iter().enumerate() {
            if let Some(f) = zone {
                s.temp_c[i] = f.read_i64() as f32 / 1000.0;
            }
        }

        s
    }
}
