//! Rotation and active-time counters

/// Rotation and active-second totals at three scopes: all time, the live
/// session, and this boot alone.
///
/// Active time runs from the first rotation of a burst until
/// `active_timeout_ms` after its last rotation. Closed periods are folded
/// into the totals by [`CounterState::tick`]; readers add the open period on
/// the fly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterState {
    pub lifetime_rotations: u32,
    pub lifetime_active_seconds: u32,
    pub session_rotations: u32,
    pub session_active_seconds: u32,
    pub boot_rotations: u32,
    pub boot_active_seconds: u32,
    last_rotation_ms: u32,
    active_start_ms: u32,
    is_active: bool,
    /// Sub-second remainder carried between folded periods
    carry_ms: u32,
}

impl CounterState {
    pub fn with_lifetime(rotations: u32, active_seconds: u32) -> Self {
        Self {
            lifetime_rotations: rotations,
            lifetime_active_seconds: active_seconds,
            ..Self::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn add_rotations(&mut self, count: u32, now_ms: u32) {
        if count == 0 {
            return;
        }

        self.lifetime_rotations = self.lifetime_rotations.saturating_add(count);
        self.session_rotations = self.session_rotations.saturating_add(count);
        self.boot_rotations = self.boot_rotations.saturating_add(count);

        if !self.is_active {
            self.active_start_ms = now_ms;
            self.is_active = true;
        }
        self.last_rotation_ms = now_ms;
    }

    /// Close the active period once the timeout has passed. Returns true when
    /// a period was folded into the totals.
    pub fn tick(&mut self, now_ms: u32, timeout_ms: u32) -> bool {
        if !self.is_active || now_ms.wrapping_sub(self.last_rotation_ms) < timeout_ms {
            return false;
        }

        let period_ms = self
            .last_rotation_ms
            .wrapping_add(timeout_ms)
            .wrapping_sub(self.active_start_ms);
        let total_ms = self.carry_ms + period_ms;
        let seconds = total_ms / 1000;
        self.carry_ms = total_ms % 1000;

        self.lifetime_active_seconds = self.lifetime_active_seconds.saturating_add(seconds);
        self.session_active_seconds = self.session_active_seconds.saturating_add(seconds);
        self.boot_active_seconds = self.boot_active_seconds.saturating_add(seconds);
        self.is_active = false;
        true
    }

    /// Whole seconds of the open active period not yet folded
    fn pending_seconds(&self, now_ms: u32, timeout_ms: u32) -> u32 {
        if !self.is_active {
            return 0;
        }
        let since_start = now_ms.wrapping_sub(self.active_start_ms);
        let period_end = self
            .last_rotation_ms
            .wrapping_add(timeout_ms)
            .wrapping_sub(self.active_start_ms);
        (self.carry_ms + since_start.min(period_end)) / 1000
    }

    pub fn lifetime_active_seconds_at(&self, now_ms: u32, timeout_ms: u32) -> u32 {
        self.lifetime_active_seconds
            .saturating_add(self.pending_seconds(now_ms, timeout_ms))
    }

    pub fn session_active_seconds_at(&self, now_ms: u32, timeout_ms: u32) -> u32 {
        self.session_active_seconds
            .saturating_add(self.pending_seconds(now_ms, timeout_ms))
    }

    /// Fold a previous session's totals into the live session
    pub fn absorb_session(&mut self, rotations: u32, active_seconds: u32) {
        self.session_rotations = self.session_rotations.saturating_add(rotations);
        self.session_active_seconds = self.session_active_seconds.saturating_add(active_seconds);
    }

    /// Start the live session over from the given totals
    pub fn restart_session(&mut self, rotations: u32, active_seconds: u32) {
        self.session_rotations = rotations;
        self.session_active_seconds = active_seconds;
    }
}
