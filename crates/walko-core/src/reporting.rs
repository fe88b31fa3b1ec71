//! Session history for the companion app
//!
//! The app collects every unreported session and acknowledges each one once
//! it has stored it. The live session is never listed: its totals are still
//! moving and it may be merged with a later boot.

use embedded_storage::nor_flash::NorFlash;
use log::debug;

use crate::odometer::Odometer;
use crate::platform::Platform;
use crate::storage::{SECTOR_COUNT, SessionData};

/// One finished session as sent to the app
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: u32,
    pub rotation_count: u32,
    pub active_time_seconds: u32,
    pub start_time_unix: u32,
    pub end_time_unix: u32,
}

impl SessionSummary {
    pub const WIRE_SIZE: usize = 20;

    /// Five little-endian u32s in field order
    pub fn to_le_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        let fields = [
            self.session_id,
            self.rotation_count,
            self.active_time_seconds,
            self.start_time_unix,
            self.end_time_unix,
        ];
        for (chunk, value) in out.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        out
    }
}

impl From<&SessionData> for SessionSummary {
    fn from(data: &SessionData) -> Self {
        Self {
            session_id: data.session_id,
            rotation_count: data.session_rotation_count,
            active_time_seconds: data.session_active_time_seconds,
            start_time_unix: data.session_start_time_unix,
            end_time_unix: data.session_end_time_unix,
        }
    }
}

/// Up to `MAX` unreported sessions, oldest first
pub fn list_unreported<const MAX: usize, F: NorFlash>(
    odometer: &mut Odometer<F>,
) -> heapless::Vec<SessionSummary, MAX> {
    let excluded = odometer.excluded_session_id();
    if let Some(id) = excluded {
        debug!("Excluding session {id} from unreported list");
    }

    let mut sessions = odometer
        .store_mut()
        .scan_all::<{ SECTOR_COUNT as usize }>();
    sessions.sort_unstable_by_key(|s| s.session_id);

    sessions
        .iter()
        .filter(|s| !s.reported && Some(s.session_id) != excluded)
        .take(MAX)
        .map(SessionSummary::from)
        .collect()
}

/// Acknowledge a session; see [`Odometer::mark_reported`]
pub fn mark_reported<F: NorFlash, P: Platform>(
    odometer: &mut Odometer<F>,
    platform: &mut P,
    session_id: u32,
    now_ms: u32,
) -> bool {
    odometer.mark_reported(session_id, platform, now_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odometer::tests::{CAPACITY, ScriptedPlatform, T0, boot, walk_session};
    use crate::storage::RamFlash;

    #[test]
    fn test_wire_layout() {
        let summary = SessionSummary {
            session_id: 1,
            rotation_count: 0x0102_0304,
            active_time_seconds: 3,
            start_time_unix: 4,
            end_time_unix: 5,
        };
        let bytes = summary.to_le_bytes();
        assert_eq!(&bytes[0..4], &[1, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &[4, 3, 2, 1]);
        assert_eq!(&bytes[16..20], &[5, 0, 0, 0]);
    }

    /// Three finished sessions far apart, then a boot with the clock set
    fn three_sessions() -> RamFlash {
        let flash = walk_session(RamFlash::new(CAPACITY), T0, 100);
        let flash = walk_session(flash, T0 + 10_000, 200);
        walk_session(flash, T0 + 20_000, 300)
    }

    #[test]
    fn test_live_session_excluded() {
        let mut odo = boot(three_sessions());
        let mut platform = ScriptedPlatform::healthy();
        odo.set_time_reference(T0 + 30_000, &mut platform, 0);
        assert_eq!(odo.current_session_id(), 4);

        let listed = list_unreported::<8, _>(&mut odo);
        let ids: heapless::Vec<u32, 8> = listed.iter().map(|s| s.session_id).collect();
        assert_eq!(ids.as_slice(), &[1, 2, 3]);
        assert_eq!(listed[1].rotation_count, 200);
        assert_eq!(listed[1].start_time_unix, T0 + 10_000);
    }

    #[test]
    fn test_undecided_boot_hides_mergeable_previous() {
        let mut odo = boot(three_sessions());
        let ids: heapless::Vec<u32, 8> = list_unreported::<8, _>(&mut odo)
            .iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(ids.as_slice(), &[1, 2], "session 3 may still be continued");
    }

    #[test]
    fn test_reported_sessions_drop_out() {
        let mut odo = boot(three_sessions());
        let mut platform = ScriptedPlatform::healthy();
        odo.set_time_reference(T0 + 30_000, &mut platform, 0);

        assert!(mark_reported(&mut odo, &mut platform, 2, 1_000));
        let ids: heapless::Vec<u32, 8> = list_unreported::<8, _>(&mut odo)
            .iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(ids.as_slice(), &[1, 3]);
    }

    #[test]
    fn test_list_is_bounded() {
        let mut odo = boot(three_sessions());
        let mut platform = ScriptedPlatform::healthy();
        odo.set_time_reference(T0 + 30_000, &mut platform, 0);
        let listed = list_unreported::<2, _>(&mut odo);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].session_id, 1);
    }

    #[test]
    fn test_reporting_live_session_rolls_over() {
        let mut odo = boot(RamFlash::new(CAPACITY));
        let mut platform = ScriptedPlatform::healthy();
        odo.set_time_reference(T0, &mut platform, 0);
        odo.add_rotations(42, &mut platform, 1_000);

        assert!(list_unreported::<4, _>(&mut odo).is_empty());
        assert!(mark_reported(&mut odo, &mut platform, 1, 2_000));
        assert_eq!(odo.current_session_id(), 2);
        assert!(
            list_unreported::<4, _>(&mut odo).is_empty(),
            "reported session is not listed again"
        );
    }
}
