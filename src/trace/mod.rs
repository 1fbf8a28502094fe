//! Binary trace file format.
//!
//! A trace is a fixed-layout little-endian file with no internal padding:
//!
//! ```text
//! [FileHeader: 728 bytes]
//! [FastSample   x num_fast_samples]
//! [MediumSample x num_medium_samples]
//! [SlowSample   x num_slow_samples]
//! [SyncPoint    x num_sync_points]
//! ```
//!
//! Records are encoded field-by-field with explicit `to_le_bytes` writes and
//! decoded with offset-checked fixed-width reads, so the on-disk layout is
//! independent of Rust struct layout.

pub mod writer;

use thiserror::Error;

/// File magic, "NVMT" (NVMetrics Trace).
pub const MAGIC: u32 = 0x4E56_4D54;

/// Format version.
pub const VERSION: u32 = 1;

/// Maximum CPU cores represented in a fast sample.
pub const MAX_CPU_CORES: usize = 16;

/// Maximum power rails represented in a medium sample.
pub const MAX_POWER_RAILS: usize = 8;

/// Maximum thermal zones represented in a slow sample.
pub const MAX_THERMAL_ZONES: usize = 16;

/// Width of each rail/zone name slot in the header, NUL terminator included.
pub const NAME_WIDTH: usize = 24;

/// Encoded size of [`FileHeader`] in bytes.
pub const HEADER_SIZE: usize = 728;

/// Encoded size of [`FastSample`] in bytes.
pub const FAST_SAMPLE_SIZE: usize = 98;

/// Encoded size of [`MediumSample`] in bytes.
pub const MEDIUM_SAMPLE_SIZE: usize = 104;

/// Encoded size of [`SlowSample`] in bytes.
pub const SLOW_SAMPLE_SIZE: usize = 72;

/// Encoded size of [`SyncPoint`] in bytes.
pub const SYNC_POINT_SIZE: usize = 16;

/// Errors that can occur while decoding a trace file.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("{record} truncated: {size} bytes")]
    Truncated { record: &'static str, size: usize },

    #[error("bad magic: {raw:#010x}")]
    BadMagic { raw: u32 },

    #[error("unsupported version: {raw}")]
    UnsupportedVersion { raw: u32 },
}

/// Fast-tier sample: GPU, CPU, RAM and EMC activity at ~1 kHz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FastSample {
    /// Seconds since the engine's start instant.
    pub time_s: f64,
    /// GPU load in tenths of a percent, 0..=1000.
    pub gpu_load: u16,
    /// Per-core utilization percent; slots past the core count are 0.0.
    pub cpu_util: [f32; MAX_CPU_CORES],
    /// Mean utilization over the cores actually parsed.
    pub cpu_aggregate: f32,
    pub ram_used_kb: u64,
    pub ram_available_kb: u64,
    /// EMC utilization percent, or -1.0 when the counter is unavailable.
    pub emc_util: f32,
}

/// Medium-tier sample: power-rail voltage/current/power at ~100 Hz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediumSample {
    pub time_s: f64,
    pub voltage_mv: [u32; MAX_POWER_RAILS],
    pub current_ma: [u32; MAX_POWER_RAILS],
    pub power_mw: [f32; MAX_POWER_RAILS],
}

/// Slow-tier sample: thermal-zone temperatures at ~10 Hz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlowSample {
    pub time_s: f64,
    pub temp_c: [f32; MAX_THERMAL_ZONES],
}

/// Marks a caller-visible instant against the fast-tier timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPoint {
    /// Dense sequence starting at 1.
    pub sync_id: u64,
    /// Fast-sample count observed when the point was recorded.
    pub fast_sample_idx: u64,
}

/// Decoded trace file header.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub board_name: String,
    pub num_cpu_cores: u8,
    pub num_power_rails: u8,
    pub num_thermal_zones: u8,
    pub emc_available: bool,
    pub fast_hz: u32,
    pub medium_hz: u32,
    pub slow_hz: u32,
    pub num_fast_samples: u64,
    pub num_medium_samples: u64,
    pub num_slow_samples: u64,
    pub num_sync_points: u64,
    pub power_rail_names: Vec<String>,
    pub thermal_zone_names: Vec<String>,
}

impl FastSample {
    /// Appends the 98-byte encoding to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.time_s.to_le_bytes());
        out.extend_from_slice(&self.gpu_load.to_le_bytes());
        for u in &self.cpu_util {
            out.extend_from_slice(&u.to_le_bytes());
        }
        out.extend_from_slice(&self.cpu_aggregate.to_le_bytes());
        out.extend_from_slice(&self.ram_used_kb.to_le_bytes());
        out.extend_from_slice(&self.ram_available_kb.to_le_bytes());
        out.extend_from_slice(&self.emc_util.to_le_bytes());
    }

    /// Decodes one sample from the first 98 bytes of `data`.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < FAST_SAMPLE_SIZE {
            return Err(DecodeError::Truncated {
                record: "FastSample",
                size: data.len(),
            });
        }

        let mut cpu_util = [0.0f32; MAX_CPU_CORES];
        for (i, slot) in cpu_util.iter_mut().enumerate() {
            *slot = read_f32_le(data, 10 + i * 4);
        }

        Ok(Self {
            time_s: read_f64_le(data, 0),
            gpu_load: read_u16_le(data, 8),
            cpu_util,
            cpu_aggregate: read_f32_le(data, 74),
            ram_used_kb: read_u64_le(data, 78),
            ram_available_kb: read_u64_le(data, 86),
            emc_util: read_f32_le(data, 94),
        })
    }
}

impl MediumSample {
    /// Appends the 104-byte encoding to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.time_s.to_le_bytes());
        for v in &self.voltage_mv {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for c in &self.current_ma {
            out.extend_from_slice(&c.to_le_bytes());
        }
        for p in &self.power_mw {
            out.extend_from_slice(&p.to_le_bytes());
        }
    }

    /// Decodes one sample from the first 104 bytes of `data`.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < MEDIUM_SAMPLE_SIZE {
            return Err(DecodeError::Truncated {
                record: "MediumSample",
                size: data.len(),
            });
        }

        let mut voltage_mv = [0u32; MAX_POWER_RAILS];
        let mut current_ma = [0u32; MAX_POWER_RAILS];
        let mut power_mw = [0.0f32; MAX_POWER_RAILS];
        for i in 0..MAX_POWER_RAILS {
            voltage_mv[i] = read_u32_le(data, 8 + i * 4);
            current_ma[i] = read_u32_le(data, 40 + i * 4);
            power_mw[i] = read_f32_le(data, 72 + i * 4);
        }

        Ok(Self {
            time_s: read_f64_le(data, 0),
            voltage_mv,
            current_ma,
            power_mw,
        })
    }
}

impl SlowSample {
    /// Appends the 72-byte encoding to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.time_s.to_le_bytes());
        for t in &self.temp_c {
            out.extend_from_slice(&t.to_le_bytes());
        }
    }

    /// Decodes one sample from the first 72 bytes of `data`.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < SLOW_SAMPLE_SIZE {
            return Err(DecodeError::Truncated {
                record: "SlowSample",
                size: data.len(),
            });
        }

        let mut temp_c = [0.0f32; MAX_THERMAL_ZONES];
        for (i, slot) in temp_c.iter_mut().enumerate() {
            *slot = read_f32_le(data, 8 + i * 4);
        }

        Ok(Self {
            time_s: read_f64_le(data, 0),
            temp_c,
        })
    }
}

impl SyncPoint {
    /// Appends the 16-byte encoding to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.sync_id.to_le_bytes());
        out.extend_from_slice(&self.fast_sample_idx.to_le_bytes());
    }

    /// Decodes one sync point from the first 16 bytes of `data`.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < SYNC_POINT_SIZE {
            return Err(DecodeError::Truncated {
                record: "SyncPoint",
                size: data.len(),
            });
        }

        Ok(Self {
            sync_id: read_u64_le(data, 0),
            fast_sample_idx: read_u64_le(data, 8),
        })
    }
}

impl FileHeader {
    /// Appends the 728-byte encoding to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let start = out.len();

        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.extend_from_slice(&VERSION.to_le_bytes());
        put_fixed_str(out, &self.board_name, 32);
        out.push(self.num_cpu_cores);
        out.push(self.num_power_rails);
        out.push(self.num_thermal_zones);
        out.push(u8::from(self.emc_available));
        out.extend_from_slice(&self.fast_hz.to_le_bytes());
        out.extend_from_slice(&self.medium_hz.to_le_bytes());
        out.extend_from_slice(&self.slow_hz.to_le_bytes());
        out.extend_from_slice(&self.num_fast_samples.to_le_bytes());
        out.extend_from_slice(&self.num_medium_samples.to_le_bytes());
        out.extend_from_slice(&self.num_slow_samples.to_le_bytes());
        out.extend_from_slice(&self.num_sync_points.to_le_bytes());

        for i in 0..MAX_POWER_RAILS {
            let name = self.power_rail_names.get(i).map(String::as_str).unwrap_or("");
            put_fixed_str(out, name, NAME_WIDTH);
        }
        for i in 0..MAX_THERMAL_ZONES {
            let name = self
                .thermal_zone_names
                .get(i)
                .map(String::as_str)
                .unwrap_or("");
            put_fixed_str(out, name, NAME_WIDTH);
        }

        out.resize(start + HEADER_SIZE, 0); // reserved tail

        debug_assert_eq!(out.len() - start, HEADER_SIZE);
    }

    /// Decodes a header from the first 728 bytes of `data`.
    ///
    /// Name lists are truncated to the rail/zone counts the header declares.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < HEADER_SIZE {
            return Err(DecodeError::Truncated {
                record: "FileHeader",
                size: data.len(),
            });
        }

        let magic = read_u32_le(data, 0);
        if magic != MAGIC {
            return Err(DecodeError::BadMagic { raw: magic });
        }

        let version = read_u32_le(data, 4);
        if version != VERSION {
            return Err(DecodeError::UnsupportedVersion { raw: version });
        }

        let num_power_rails = data[41];
        let num_thermal_zones = data[42];

        let power_rail_names = (0..usize::from(num_power_rails).min(MAX_POWER_RAILS))
            .map(|i| read_fixed_str(data, 88 + i * NAME_WIDTH, NAME_WIDTH))
            .collect();
        let thermal_zone_names = (0..usize::from(num_thermal_zones).min(MAX_THERMAL_ZONES))
            .map(|i| read_fixed_str(data, 280 + i * NAME_WIDTH, NAME_WIDTH))
            .collect();

        Ok(Self {
            board_name: read_fixed_str(data, 8, 32),
            num_cpu_cores: data[40],
            num_power_rails,
            num_thermal_zones,
            emc_available: data[43] != 0,
            fast_hz: read_u32_le(data, 44),
            medium_hz: read_u32_le(data, 48),
            slow_hz: read_u32_le(data, 52),
            num_fast_samples: read_u64_le(data, 56),
            num_medium_samples: read_u64_le(data, 64),
            num_slow_samples: read_u64_le(data, 72),
            num_sync_points: read_u64_le(data, 80),
            power_rail_names,
            thermal_zone_names,
        })
    }

    /// Total file size implied by the sample counts in this header.
    pub fn expected_file_size(&self) -> u64 {
        HEADER_SIZE as u64
            + self.num_fast_samples * FAST_SAMPLE_SIZE as u64
            + self.num_medium_samples * MEDIUM_SAMPLE_SIZE as u64
            + self.num_slow_samples * SLOW_SAMPLE_SIZE as u64
            + self.num_sync_points * SYNC_POINT_SIZE as u64
    }
}

/// Writes `s` as a fixed-width field: truncated to `width - 1` bytes,
/// NUL-padded to `width`. Consumers treat the field as NUL-terminated.
fn put_fixed_str(out: &mut Vec<u8>, s: &str, width: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(width - 1);
    out.extend_from_slice(&bytes[..n]);
    out.resize(out.len() + width - n, 0);
}

/// Reads a NUL-terminated string out of a fixed-width field.
fn read_fixed_str(data: &[u8], offset: usize, width: usize) -> String {
    let field = &data[offset..offset + width];
    let end = field.iter().position(|&b| b == 0).unwrap_or(width);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

#[inline]
fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(&data[offset..offset + N]);
    buf
}

#[inline]
fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(read_fixed::<2>(data, offset))
}

#[inline]
fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(read_fixed::<4>(data, offset))
}

#[inline]
fn read_u64_le(data: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(read_fixed::<8>(data, offset))
}

#[inline]
fn read_f32_le(data: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes(read_fixed::<4>(data, offset))
}

#[inline]
fn read_f64_le(data: &[u8], offset: usize) -> f64 {
    f64::from_le_bytes(read_fixed::<8>(data, offset))
}

impl Default for FastSample {
    fn default() -> Self {
        Self {
            time_s: 0.0,
            gpu_load: 0,
            cpu_util: [0.0; MAX_CPU_CORES],
            cpu_aggregate: 0.0,
            ram_used_kb: 0,
            ram_available_kb: 0,
            emc_util: 0.0,
        }
    }
}

impl Default for MediumSample {
    fn default() -> Self {
        Self {
            time_s: 0.0,
            voltage_mv: [0; MAX_POWER_RAILS],
            current_ma: [0; MAX_POWER_RAILS],
            power_mw: [0.0; MAX_POWER_RAILS],
        }
    }
}

impl Default for SlowSample {
    fn default() -> Self {
        Self {
            time_s: 0.0,
            temp_c: [0.0; MAX_THERMAL_ZONES],
        }
    }
}
