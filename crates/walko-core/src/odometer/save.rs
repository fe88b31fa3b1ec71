//! When to commit counters to flash

use crate::config::OdometerConfig;

/// Why a save was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveReason {
    RotationThreshold,
    LowVoltage,
    Reported,
    LifetimeOverride,
    Requested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveState {
    /// Low-voltage saving is enabled at or below this reading
    pub voltage_threshold_mv: Option<u16>,
    /// Lifetime rotations at the last save
    pub last_saved_count: u32,
    /// Boot time of the last save; `None` before the first one
    pub last_save_time_ms: Option<u32>,
}

impl SaveState {
    pub fn new(config: &OdometerConfig, lifetime_rotations: u32) -> Self {
        Self {
            voltage_threshold_mv: config.voltage_save_threshold_mv,
            last_saved_count: lifetime_rotations,
            last_save_time_ms: None,
        }
    }

    pub fn voltage_save_enabled(&self) -> bool {
        self.voltage_threshold_mv.is_some()
    }

    /// Enough rotations since the last save, and the session decision can no
    /// longer be improved by waiting for time sync.
    pub fn threshold_due(
        &self,
        config: &OdometerConfig,
        lifetime_rotations: u32,
        time_known: bool,
        now_ms: u32,
    ) -> bool {
        let unsaved = lifetime_rotations.wrapping_sub(self.last_saved_count);
        if unsaved < config.rotation_save_interval {
            return false;
        }
        time_known || now_ms >= config.time_sync_timeout_ms
    }

    /// Supply is sagging, there is something new to save, and the last save
    /// was long enough ago.
    pub fn voltage_due(
        &self,
        config: &OdometerConfig,
        lifetime_rotations: u32,
        voltage_mv: u16,
        now_ms: u32,
    ) -> bool {
        let Some(threshold) = self.voltage_threshold_mv else {
            return false;
        };
        if voltage_mv > threshold || lifetime_rotations == self.last_saved_count {
            return false;
        }
        self.last_save_time_ms
            .is_none_or(|last| now_ms.wrapping_sub(last) >= config.min_voltage_save_interval_ms)
    }

    pub fn record_save(&mut self, lifetime_rotations: u32, now_ms: u32) {
        self.last_saved_count = lifetime_rotations;
        self.last_save_time_ms = Some(now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_waits_for_time_sync() {
        let config = OdometerConfig::default();
        let save = SaveState::new(&config, 10_000);

        assert!(!save.threshold_due(&config, 12_499, true, 0));
        assert!(save.threshold_due(&config, 12_500, true, 0));
        assert!(
            !save.threshold_due(&config, 12_500, false, 59_999),
            "no time and still inside the sync window"
        );
        assert!(save.threshold_due(&config, 12_500, false, 60_000));
    }

    #[test]
    fn test_voltage_save_gates() {
        let config = OdometerConfig::device();
        let mut save = SaveState::new(&config, 100);

        assert!(!save.voltage_due(&config, 100, 3_000, 0), "nothing new");
        assert!(!save.voltage_due(&config, 101, 3_301, 0), "voltage fine");
        assert!(save.voltage_due(&config, 101, 3_300, 0), "first low reading");

        save.record_save(101, 5_000);
        assert!(!save.voltage_due(&config, 102, 3_000, 64_999));
        assert!(save.voltage_due(&config, 102, 3_000, 65_000));
    }

    #[test]
    fn test_voltage_save_disabled_by_default() {
        let config = OdometerConfig::default();
        let save = SaveState::new(&config, 0);
        assert!(!save.voltage_save_enabled());
        assert!(!save.voltage_due(&config, 50, 1_000, 100_000));
    }
}
