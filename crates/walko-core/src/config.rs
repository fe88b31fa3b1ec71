//! Engine policy configuration
//!
//! Every timing and threshold constant the counter/session engine uses lives
//! here so the device build and the simulator can tune them in one place.

use serde::{Deserialize, Serialize};

/// Stop counting active time after this long without a rotation
pub const DEFAULT_ACTIVE_TIMEOUT_MS: u32 = 3_000;
/// Save every 2500 rotations (~0.5 miles)
pub const DEFAULT_ROTATION_SAVE_INTERVAL: u32 = 2_500;
/// Don't save on low voltage more than once per minute
pub const DEFAULT_MIN_VOLTAGE_SAVE_INTERVAL_MS: u32 = 60_000;
/// Wait up to 60 seconds for time sync before allowing threshold saves
pub const DEFAULT_TIME_SYNC_TIMEOUT_MS: u32 = 60_000;
/// Sessions closer together than 15 minutes are one walk
pub const DEFAULT_MERGE_GAP_SECS: u32 = 15 * 60;
/// Running average speed window
pub const DEFAULT_SPEED_WINDOW_SECS: usize = 5;

/// Voltage the device enables low-voltage saving at (3.3V)
pub const DEVICE_VOLTAGE_SAVE_THRESHOLD_MV: u16 = 3_300;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct OdometerConfig {
    /// Silence after the last rotation that closes an active period
    pub active_timeout_ms: u32,
    /// Rotations between threshold saves
    pub rotation_save_interval: u32,
    /// Minimum spacing between low-voltage saves
    pub min_voltage_save_interval_ms: u32,
    /// Uptime after which threshold saves proceed without wall-clock time
    pub time_sync_timeout_ms: u32,
    /// Largest gap between sessions that still merges them
    pub merge_gap_secs: u32,
    /// Number of one-second samples in the running speed window
    pub speed_window_secs: usize,
    /// Enables low-voltage saving at or below this reading
    pub voltage_save_threshold_mv: Option<u16>,
}

impl Default for OdometerConfig {
    fn default() -> Self {
        Self {
            active_timeout_ms: DEFAULT_ACTIVE_TIMEOUT_MS,
            rotation_save_interval: DEFAULT_ROTATION_SAVE_INTERVAL,
            min_voltage_save_interval_ms: DEFAULT_MIN_VOLTAGE_SAVE_INTERVAL_MS,
            time_sync_timeout_ms: DEFAULT_TIME_SYNC_TIMEOUT_MS,
            merge_gap_secs: DEFAULT_MERGE_GAP_SECS,
            speed_window_secs: DEFAULT_SPEED_WINDOW_SECS,
            voltage_save_threshold_mv: None,
        }
    }
}

impl OdometerConfig {
    /// Configuration used on the supercap-powered device: defaults plus
    /// low-voltage saving at 3.3V.
    pub fn device() -> Self {
        Self {
            voltage_save_threshold_mv: Some(DEVICE_VOLTAGE_SAVE_THRESHOLD_MV),
            ..Self::default()
        }
    }
}
