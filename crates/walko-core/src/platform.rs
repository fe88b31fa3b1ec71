//! Collaborators the engine consumes from the board
//!
//! Voltage sampling, wall-clock acquisition and user feedback are
//! hardware-specific; the engine sees them only through [`Platform`].

use crate::events::{self, OdometerEvent};

pub trait Platform {
    /// Raw supply voltage in millivolts
    fn read_voltage_mv(&mut self) -> u16;

    /// Wall-clock time if the board has acquired it on its own (RTC, NTP)
    fn current_unix_time(&mut self) -> Option<u32> {
        None
    }

    /// Visual or haptic blip for counted rotations
    fn emit_rotation_feedback(&mut self) {}

    /// Every engine event passes through here; the default forwards to
    /// [`events::EVENT_CHANNEL`].
    fn on_event(&mut self, event: OdometerEvent) {
        events::publish(event);
    }
}
