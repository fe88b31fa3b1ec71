use log::warn;

/// Readings below this are ADC glitches rather than a real supply level
pub const MIN_PLAUSIBLE_VOLTAGE_MV: u16 = 1_500;

/// Glitch filter for supply voltage readings.
///
/// The supply rail is sampled through an ADC pin shared with the radio, and
/// an occasional sample reads near zero. A reading under
/// [`MIN_PLAUSIBLE_VOLTAGE_MV`] is replaced with the last good reading when
/// one exists; before any good reading the raw value passes through.
#[derive(Debug, Default, Clone, Copy)]
pub struct VoltageFilter {
    last_valid_mv: Option<u16>,
}

impl VoltageFilter {
    pub const fn new() -> Self {
        Self {
            last_valid_mv: None,
        }
    }

    /// Filter one raw reading
    pub fn filter(&mut self, raw_mv: u16) -> u16 {
        if raw_mv >= MIN_PLAUSIBLE_VOLTAGE_MV {
            self.last_valid_mv = Some(raw_mv);
            return raw_mv;
        }

        match self.last_valid_mv {
            Some(cached) => {
                warn!(
                    "Invalid voltage reading {} mV, using cached {} mV",
                    raw_mv, cached
                );
                cached
            }
            None => raw_mv,
        }
    }

    /// Last reading that passed the filter
    pub fn last_valid_mv(&self) -> Option<u16> {
        self.last_valid_mv
    }
}
