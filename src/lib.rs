//! High-frequency multi-tier telemetry sampler for Jetson-class Linux boards.
//!
//! Three OS threads sample kernel-surface counters at decoupled cadences:
//! fast (~1 kHz: GPU load, per-core CPU utilization, RAM, EMC), medium
//! (~100 Hz: power-rail voltage/current) and slow (~10 Hz: thermal zones).
//! Samples accumulate in memory and a single packed binary trace file is
//! written when sampling stops.

pub mod board;
pub mod clock;
pub mod config;
pub mod engine;
pub mod probe;
pub mod trace;
