//! Session identity and wall-clock mapping

use crate::storage::SessionData;

/// Outcome of the once-per-boot merge-or-new decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionDecision {
    /// Continue the previous session under its id
    Merge { session_id: u32 },
    /// Open a fresh session
    New { session_id: u32 },
}

impl SessionDecision {
    pub fn session_id(self) -> u32 {
        match self {
            Self::Merge { session_id } | Self::New { session_id } => session_id,
        }
    }

    pub fn is_merge(self) -> bool {
        matches!(self, Self::Merge { .. })
    }
}

/// Decide whether this boot continues `previous` or starts a new session.
///
/// In order: no previous session starts id 1; a reported session is never
/// reopened; without a current time or a previous end time the sessions
/// merge; otherwise they merge when the gap is at most `merge_gap_secs`.
pub fn decide(
    previous: Option<&SessionData>,
    current_start_unix: Option<u32>,
    merge_gap_secs: u32,
) -> SessionDecision {
    let Some(previous) = previous else {
        return SessionDecision::New { session_id: 1 };
    };
    let merge = SessionDecision::Merge {
        session_id: previous.session_id,
    };
    let new = SessionDecision::New {
        session_id: previous.session_id.wrapping_add(1),
    };

    if previous.reported {
        return new;
    }
    let Some(current_start) = current_start_unix else {
        return merge;
    };
    if previous.session_end_time_unix == 0 {
        return merge;
    }

    let gap = current_start.saturating_sub(previous.session_end_time_unix);
    if gap <= merge_gap_secs { merge } else { new }
}

/// Wall-clock time captured against the boot clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeReference {
    pub unix: u32,
    pub boot_ms: u32,
}

impl TimeReference {
    pub fn unix_at(&self, now_ms: u32) -> u32 {
        self.unix
            .wrapping_add(now_ms.wrapping_sub(self.boot_ms) / 1000)
    }

    /// Wall-clock time the device booted
    pub fn boot_unix(&self) -> u32 {
        self.unix.saturating_sub(self.boot_ms / 1000)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Live session id, 0 until decided
    pub current_session_id: u32,
    /// 0 = unknown
    pub session_start_time_unix: u32,
    pub time_reference: Option<TimeReference>,
    pub decided: bool,
    /// The live session continues one loaded from flash
    pub merged: bool,
}

impl SessionState {
    pub fn time_acquired(&self) -> bool {
        self.time_reference.is_some()
    }

    pub fn current_unix_time(&self, now_ms: u32) -> Option<u32> {
        self.time_reference.map(|r| r.unix_at(now_ms))
    }

    /// Start time a new session opened this boot would carry
    pub fn boot_start_unix(&self) -> Option<u32> {
        self.time_reference.map(|r| r.boot_unix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAP: u32 = 900;

    fn previous(end: u32, reported: bool) -> SessionData {
        SessionData {
            session_id: 41,
            write_index: 300,
            session_rotation_count: 1_000,
            session_active_time_seconds: 400,
            session_start_time_unix: end.saturating_sub(600),
            session_end_time_unix: end,
            lifetime_rotation_count: 50_000,
            lifetime_time_seconds: 20_000,
            reported,
        }
    }

    #[test]
    fn test_first_session_is_one() {
        assert_eq!(
            decide(None, Some(1_700_000_000), GAP),
            SessionDecision::New { session_id: 1 }
        );
        assert_eq!(decide(None, None, GAP), SessionDecision::New { session_id: 1 });
    }

    #[test]
    fn test_gap_boundary() {
        let prev = previous(1_700_000_000, false);
        assert_eq!(
            decide(Some(&prev), Some(1_700_000_900), GAP),
            SessionDecision::Merge { session_id: 41 },
            "exactly 900 s merges"
        );
        assert_eq!(
            decide(Some(&prev), Some(1_700_000_901), GAP),
            SessionDecision::New { session_id: 42 },
            "901 s starts new"
        );
    }

    #[test]
    fn test_unknown_previous_end_merges() {
        let prev = previous(0, false);
        assert!(decide(Some(&prev), Some(1_900_000_000), GAP).is_merge());
    }

    #[test]
    fn test_unknown_current_time_merges() {
        let prev = previous(1_700_000_000, false);
        assert!(decide(Some(&prev), None, GAP).is_merge());
    }

    #[test]
    fn test_reported_never_reopened() {
        let prev = previous(1_700_000_000, true);
        assert_eq!(
            decide(Some(&prev), Some(1_700_000_001), GAP),
            SessionDecision::New { session_id: 42 }
        );
        assert_eq!(decide(Some(&prev), None, GAP).session_id(), 42);
        let no_end = previous(0, true);
        assert!(!decide(Some(&no_end), None, GAP).is_merge());
    }

    #[test]
    fn test_clock_behind_previous_end_merges() {
        let prev = previous(1_700_000_000, false);
        assert!(decide(Some(&prev), Some(1_699_999_000), GAP).is_merge());
    }

    #[test]
    fn test_time_reference_mapping() {
        let reference = TimeReference {
            unix: 1_700_000_000,
            boot_ms: 12_345,
        };
        assert_eq!(reference.unix_at(12_345), 1_700_000_000);
        assert_eq!(reference.unix_at(14_400), 1_700_000_002);
        assert_eq!(reference.boot_unix(), 1_699_999_988);
    }
}
