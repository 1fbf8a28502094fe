//! Board catalogs and auto-detection.
//!
//! A [`BoardConfig`] is pure data: names plus sysfs/procfs/debugfs paths.
//! The sampling engine treats every path as an opaque readable byte stream,
//! so adding a board is a matter of adding a catalog entry or shipping a
//! YAML file; the engine itself never changes.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

/// One power rail: a label plus its hwmon voltage/current source files.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PowerRailConfig {
    /// Rail label as it appears in the trace header, e.g. "VDD_GPU_SOC".
    pub label: String,

    /// sysfs path to the rail's `in*_input` (millivolts).
    pub voltage_path: String,

    /// sysfs path to the rail's `curr*_input` (milliamps).
    pub current_path: String,
}

/// One thermal zone: a name plus its temperature source file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ThermalZoneConfig {
    /// Zone name as it appears in the trace header, e.g. "cpu-thermal".
    pub name: String,

    /// sysfs path to the zone's `temp` file (milli-degrees C).
    pub temp_path: String,
}

/// Everything the engine needs to know about one board.
#[derive(Debug, Clone, Deserialize)]
pub struct BoardConfig {
    /// Short board identifier, e.g. "agx_orin".
    pub board_name: String,

    /// Number of CPU cores sampled from `/proc/stat`.
    pub num_cpu_cores: u8,

    /// sysfs path to the GPU load counter (0..=1000). Empty = unavailable.
    #[serde(default)]
    pub gpu_load_path: String,

    /// debugfs path to the EMC activity counter. Empty = unavailable.
    #[serde(default)]
    pub emc_path: String,

    /// Power rails sampled by the medium tier, at most 8.
    #[serde(default)]
    pub power_rails: Vec<PowerRailConfig>,

    /// Thermal zones sampled by the slow tier, at most 16.
    #[serde(default)]
    pub thermal_zones: Vec<ThermalZoneConfig>,
}

impl BoardConfig {
    /// Loads a custom board definition from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading board file {}", path.display()))?;

        let board: BoardConfig = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing board file {}", path.display()))?;

        if board.board_name.is_empty() {
            bail!("board_name is required in {}", path.display());
        }

        Ok(board)
    }
}

fn thermal_zone(name: &str, index: u32) -> ThermalZoneConfig {
    ThermalZoneConfig {
        name: name.to_string(),
        temp_path: format!("/sys/class/thermal/thermal_zone{index}/temp"),
    }
}

fn ina3221_rail(label: &str, hwmon: &str, channel: u32) -> PowerRailConfig {
    PowerRailConfig {
        label: label.to_string(),
        voltage_path: format!("{hwmon}/in{channel}_input"),
        current_path: format!("{hwmon}/curr{channel}_input"),
    }
}

fn agx_orin() -> BoardConfig {
    // INA3221 monitors on the devkit carrier.
    let h0 = "/sys/bus/i2c/drivers/ina3221/1-0040/hwmon/hwmon3";
    let h1 = "/sys/bus/i2c/drivers/ina3221/1-0041/hwmon/hwmon4";

    BoardConfig {
        board_name: "agx_orin".to_string(),
        num_cpu_cores: 12,
        gpu_load_path: "/sys/devices/platform/bus@0/17000000.gpu/load".to_string(),
        emc_path: "/sys/kernel/debug/cactmon/mc_all".to_string(),
        power_rails: vec![
            ina3221_rail("VDD_GPU_SOC", h0, 1),
            ina3221_rail("VDD_CPU_CV", h0, 2),
            ina3221_rail("VIN_SYS_5V0", h0, 3),
            ina3221_rail("VDDQ_VDD2_1V8AO", h1, 2),
        ],
        thermal_zones: vec![
            thermal_zone("cpu-thermal", 0),
            thermal_zone("gpu-thermal", 1),
            thermal_zone("cv0-thermal", 2),
            thermal_zone("cv1-thermal", 3),
            thermal_zone("cv2-thermal", 4),
            thermal_zone("soc0-thermal", 5),
            thermal_zone("soc1-thermal", 6),
            thermal_zone("soc2-thermal", 7),
            thermal_zone("tj-thermal", 8),
            thermal_zone("tboard-thermal", 9),
            thermal_zone("tdiode-thermal", 10),
        ],
    }
}

fn orin_nx() -> BoardConfig {
    // Rail labels below match the NVIDIA devkit carrier (P3768); third-party
    // NX carriers may route the INA3221 channels differently.
    let h0 = "/sys/bus/i2c/drivers/ina3221/1-0040/hwmon/hwmon3";

    BoardConfig {
        board_name: "orin_nx".to_string(),
        num_cpu_cores: 8,
        gpu_load_path: "/sys/devices/platform/bus@0/17000000.gpu/load".to_string(),
        emc_path: "/sys/kernel/debug/cactmon/mc_all".to_string(),
        power_rails: vec![
            ina3221_rail("VDD_GPU_SOC", h0, 1),
            ina3221_rail("VDD_CPU_CV", h0, 2),
            ina3221_rail("VIN_SYS_5V0", h0, 3),
        ],
        thermal_zones: vec![
            thermal_zone("cpu-thermal", 0),
            thermal_zone("gpu-thermal", 1),
            thermal_zone("cv0-thermal", 2),
            thermal_zone("cv1-thermal", 3),
            thermal_zone("cv2-thermal", 4),
            thermal_zone("soc0-thermal", 5),
            thermal_zone("soc1-thermal", 6),
            thermal_zone("soc2-thermal", 7),
            thermal_zone("tj-thermal", 8),
            thermal_zone("tboard-thermal", 9),
        ],
    }
}

/// Returns the pre-baked catalog entry for `name`.
pub fn board_config(name: &str) -> Result<BoardConfig> {
    match name {
        "agx_orin" => Ok(agx_orin()),
        "orin_nx" => Ok(orin_nx()),
        _ => bail!("unknown board: {name} (known: agx_orin, orin_nx)"),
    }
}

/// Auto-detects the current board from the device tree.
///
/// Matches module identifiers inside `/proc/device-tree/compatible`
/// (NUL-separated strings), then prunes paths that are not readable on this
/// particular system so the engine only opens live counters.
pub fn detect() -> Result<BoardConfig> {
    let compatible = read_compatible("/proc/device-tree/compatible");
    detect_from_compatible(&compatible).map(|mut board| {
        prune(&mut board);
        info!(
            board = %board.board_name,
            cores = board.num_cpu_cores,
            rails = board.power_rails.len(),
            zones = board.thermal_zones.len(),
            "board detected",
        );
        board
    })
}

fn read_compatible(path: &str) -> String {
    let raw = std::fs::read(path).unwrap_or_default();
    // The device tree property is a sequence of NUL-terminated strings.
    String::from_utf8_lossy(&raw).replace('\0', " ")
}

fn detect_from_compatible(compatible: &str) -> Result<BoardConfig> {
    if compatible.contains("p3701") {
        Ok(agx_orin())
    } else if compatible.contains("p3767") {
        Ok(orin_nx())
    } else {
        bail!(
            "unrecognized board (compatible: {compatible:?}); \
             pass an explicit board name or a board YAML file"
        )
    }
}

/// Drops catalog paths that are not readable here and refreshes the core
/// count from `/proc/stat`, so static catalog entries degrade gracefully on
/// partially-provisioned systems.
fn prune(board: &mut BoardConfig) {
    if let Some(cores) = count_cpu_cores("/proc/stat") {
        board.num_cpu_cores = cores;
    }

    if !readable(&board.gpu_load_path) {
        debug!(path = %board.gpu_load_path, "gpu load counter not readable, disabling");
        board.gpu_load_path.clear();
    }

    if !readable(&board.emc_path) {
        debug!(path = %board.emc_path, "emc counter not readable, disabling");
        board.emc_path.clear();
    }

    board
        .power_rails
        .retain(|r| readable(&r.voltage_path) && readable(&r.current_path));
    board.thermal_zones.retain(|z| readable(&z.temp_path));
}

fn readable(path: &str) -> bool {
    !path.is_empty() && std::fs::File::open(path).is_ok()
}

/// Counts `cpuN` lines in `/proc/stat`, capped at the format's 16-core limit.
fn count_cpu_cores(stat_path: &str) -> Option<u8> {
    let text = std::fs::read_to_string(stat_path).ok()?;
    let count = text
        .lines()
        .filter(|l| {
            l.strip_prefix("cpu")
                .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
        })
        .count();

    if count == 0 {
        None
    } else {
        Some(count.min(crate::trace::MAX_CPU_CORES) as u8)
    }
}
