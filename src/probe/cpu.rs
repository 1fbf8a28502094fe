//! `/proc/stat` parsing and per-core utilization deltas.
//!
//! Utilization is a ratio of jiffy deltas between consecutive reads, so the
//! tracker keeps the previous totals per core. The first reads after a reset
//! are primers: their deltas span the whole uptime and are meaningless, which
//! is why the engine gates downstream tiers behind a warmup period.

use crate::trace::MAX_CPU_CORES;

/// Read buffer size for `/proc/stat`. The aggregate line plus 16 per-core
/// lines fit comfortably; anything past the buffer is ignored.
pub const STAT_BUF_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, Default)]
struct CoreJiffies {
    total: u64,
    idle: u64,
}

/// Per-core previous jiffy snapshots, sized to the configured core count.
#[derive(Debug)]
pub struct CpuTracker {
    prev: Vec<CoreJiffies>,
}

impl CpuTracker {
    pub fn new(num_cores: usize) -> Self {
        Self {
            prev: vec![CoreJiffies::default(); num_cores],
        }
    }

    /// Parses `/proc/stat` text and fills `per_core` with utilization
    /// percentages, returning the mean over the cores actually parsed.
    ///
    /// The aggregate `cpu ` line is skipped; the overall figure is recomputed
    /// from per-core deltas. Slots past the parsed cores stay zero.
    pub fn update(&mut self, stat_text: &str, per_core: &mut [f32; MAX_CPU_CORES]) -> f32 {
        let mut lines = stat_text.lines();

        // First line is the "cpu " aggregate.
        let _ = lines.next();

        let mut sum = 0.0f32;
        let mut parsed = 0usize;

        for (core, prev) in self.prev.iter_mut().enumerate() {
            let Some(line) = lines.next() else { break };
            let Some((total, idle)) = parse_core_line(line) else {
                break;
            };

            let d_total = total.saturating_sub(prev.total);
            let d_idle = idle.saturating_sub(prev.idle);
            prev.total = total;
            prev.idle = idle;

            let util = if d_total > 0 {
                (100.0 * (d_total.saturating_sub(d_idle)) as f64 / d_total as f64) as f32
            } else {
                0.0
            };

            per_core[core] = util.clamp(0.0, 100.0);
            sum += per_core[core];
            parsed += 1;
        }

        if parsed > 0 {
            sum / parsed as f32
        } else {
            0.0
        }
    }
}

/// Parses one `cpuN ...` line into `(total, idle_sum)` jiffies.
///
/// `total` sums the first eight fields (user, nice, system, idle, iowait,
/// irq, softirq, steal). The guest fields are already counted inside
/// user/nice by the kernel and would be double-counted if included.
/// `idle_sum` is idle + iowait.
fn parse_core_line(line: &str) -> Option<(u64, u64)> {
    let rest = line.strip_prefix("cpu")?;
    if !rest.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }

    let mut fields = [0u64; 8];
    let mut count = 0usize;
    for tok in rest.split_ascii_whitespace().skip(1).take(8) {
        fields[count] = tok.parse().ok()?;
        count += 1;
    }
    if count < 5 {
        return None;
    }

    let total = fields.iter().sum();
    let idle_sum = fields[3] + fields[4];
    Some((total, idle_sum))
}
