//! Counter/session engine
//!
//! [`Odometer`] owns every piece of in-memory state: rotation and active-time
//! counters, the live session's identity, and the save throttle. It is
//! restored from the sector ring at boot and then driven from the main loop:
//!
//! ```rust,ignore
//! static EDGES: EdgeCounter = EdgeCounter::new();
//!
//! let mut odometer = Odometer::new(flash, OdometerConfig::device())?;
//! loop {
//!     odometer.poll(&EDGES, &mut platform, now_ms());
//!     Timer::after_millis(30).await;
//! }
//! ```
//!
//! ## Session identity
//!
//! Power can drop at any moment, so a walk often spans several boots. The
//! first save of a boot, or the moment wall-clock time arrives, settles
//! whether this boot continues the most recent stored session or opens a new
//! one (see [`session::decide`]). Until then the live session id reads 0.

pub mod counts;
pub mod save;
pub mod session;
pub mod speed;

pub use counts::CounterState;
pub use save::{SaveReason, SaveState};
pub use session::{SessionDecision, SessionState, TimeReference, decide};
pub use speed::SpeedWindow;

use embedded_storage::nor_flash::NorFlash;
use log::{debug, error, info, warn};

use crate::config::OdometerConfig;
use crate::events::OdometerEvent;
use crate::platform::Platform;
use crate::sensors::{EdgeCounter, VoltageFilter};
use crate::storage::{
    SECTOR_COUNT, SectorStore, SessionData, SettingsError, StoreError, UserSettings,
};
use crate::units::{self, DistanceUnit};

/// Sessions listed in the boot log
const BOOT_LOG_SESSIONS: usize = 10;

/// 2023-01-01T00:00:00Z
pub const PLAUSIBLE_UNIX_MIN: u32 = 1_672_531_200;
/// 2033-01-01T00:00:00Z
pub const PLAUSIBLE_UNIX_MAX: u32 = 1_988_150_400;

const SPEED_SAMPLE_INTERVAL_MS: u32 = 1_000;

const SECONDS_PER_DAY: i64 = 86_400;

pub struct Odometer<F> {
    config: OdometerConfig,
    store: SectorStore<F>,
    counts: CounterState,
    session: SessionState,
    save: SaveState,
    /// Most recent stored session at boot; only feeds the merge decision
    previous: Option<SessionData>,
    last_write_index: u32,
    speed: SpeedWindow,
    last_speed_sample_ms: Option<u32>,
    voltage: VoltageFilter,
    settings: UserSettings,
}

impl<F: NorFlash> Odometer<F> {
    /// Open the session ring on `flash` and restore from it
    pub fn new(flash: F, config: OdometerConfig) -> Result<Self, StoreError> {
        let store = SectorStore::new(flash)?;
        Ok(Self::restore(store, config))
    }

    /// Rebuild engine state from whatever the ring holds
    pub fn restore(mut store: SectorStore<F>, config: OdometerConfig) -> Self {
        let settings_offset = store.layout().settings_offset;
        let settings = UserSettings::load_or_default(store.flash_mut(), settings_offset);

        let mut sessions = store.scan_all::<{ SECTOR_COUNT as usize }>();
        sessions.sort_unstable_by(|a, b| b.session_id.cmp(&a.session_id));

        let last_write_index = sessions.iter().map(|s| s.write_index).max().unwrap_or(0);
        let previous = sessions.first().copied();

        if sessions.is_empty() {
            info!("No valid previous session found, starting fresh");
        } else {
            info!("Found {} valid session(s) in flash", sessions.len());
            let sector_count = store.layout().sector_count;
            for (i, s) in sessions.iter().take(BOOT_LOG_SESSIONS).enumerate() {
                info!(
                    "  [{}] Sector {}: {}",
                    i + 1,
                    s.write_index % sector_count,
                    s
                );
            }
        }

        let counts = match &previous {
            Some(p) => CounterState::with_lifetime(p.lifetime_rotation_count, p.lifetime_time_seconds),
            None => CounterState::default(),
        };
        info!(
            "Lifetime totals: {} rotations, {} sec; last write index {}",
            counts.lifetime_rotations, counts.lifetime_active_seconds, last_write_index
        );

        Self {
            save: SaveState::new(&config, counts.lifetime_rotations),
            speed: SpeedWindow::new(config.speed_window_secs),
            config,
            store,
            counts,
            session: SessionState::default(),
            previous,
            last_write_index,
            last_speed_sample_ms: None,
            voltage: VoltageFilter::new(),
            settings,
        }
    }

    /// Power off: hand the flash back
    pub fn into_flash(self) -> F {
        self.store.release()
    }

    /// One main-loop iteration: pick up wall-clock time if the board has it,
    /// drain the edge counter, and advance active-time and speed tracking.
    /// Returns true when rotations were counted.
    pub fn poll<P: Platform>(&mut self, edges: &EdgeCounter, platform: &mut P, now_ms: u32) -> bool {
        if !self.session.time_acquired()
            && let Some(unix) = platform.current_unix_time()
        {
            self.set_time_reference(unix, platform, now_ms);
        }

        let rotations = edges.take_and_clear();
        if rotations > 0 {
            self.add_rotations(rotations, platform, now_ms);
        }
        self.tick(now_ms);

        rotations > 0
    }

    /// Count `count` rotations and apply the save policy
    pub fn add_rotations<P: Platform>(&mut self, count: u32, platform: &mut P, now_ms: u32) {
        if count == 0 {
            return;
        }

        self.counts.add_rotations(count, now_ms);
        platform.emit_rotation_feedback();
        platform.on_event(OdometerEvent::Rotation {
            lifetime: self.counts.lifetime_rotations,
            session: self.counts.session_rotations,
        });

        if self.save.threshold_due(
            &self.config,
            self.counts.lifetime_rotations,
            self.session.time_acquired(),
            now_ms,
        ) {
            self.save_with(SaveReason::RotationThreshold, platform, now_ms);
        }

        if self.save.voltage_save_enabled() {
            let voltage_mv = self.voltage.filter(platform.read_voltage_mv());
            if self.save.voltage_due(
                &self.config,
                self.counts.lifetime_rotations,
                voltage_mv,
                now_ms,
            ) {
                info!("Supply at {voltage_mv} mV, saving before power loss");
                self.save_with(SaveReason::LowVoltage, platform, now_ms);
            }
        }
    }

    /// Close a timed-out active period and sample the speed window
    pub fn tick(&mut self, now_ms: u32) {
        self.counts.tick(now_ms, self.config.active_timeout_ms);

        let sample_due = self
            .last_speed_sample_ms
            .is_none_or(|last| now_ms.wrapping_sub(last) >= SPEED_SAMPLE_INTERVAL_MS);
        if sample_due {
            self.speed.sample(self.counts.session_rotations, now_ms);
            self.last_speed_sample_ms = Some(now_ms);
        }
    }

    pub fn enable_voltage_save(&mut self, threshold_mv: u16) {
        self.save.voltage_threshold_mv = Some(threshold_mv);
    }

    pub fn disable_voltage_save(&mut self) {
        self.save.voltage_threshold_mv = None;
    }

    /// Commit the live session now. Returns false if the write failed.
    pub fn save_now<P: Platform>(&mut self, platform: &mut P, now_ms: u32) -> bool {
        self.save_with(SaveReason::Requested, platform, now_ms)
    }

    fn save_with<P: Platform>(&mut self, reason: SaveReason, platform: &mut P, now_ms: u32) -> bool {
        self.ensure_decided(platform);

        let session_active = self
            .counts
            .session_active_seconds_at(now_ms, self.config.active_timeout_ms);
        let end = self.session.current_unix_time(now_ms).unwrap_or(0);
        if end != 0 && self.session.session_start_time_unix == 0 {
            self.session.session_start_time_unix = end.saturating_sub(session_active);
            info!(
                "Estimated session start from end - active: {} - {} = {}",
                end, session_active, self.session.session_start_time_unix
            );
        }

        if self.counts.session_rotations == 0 {
            debug!("Save ({reason:?}) skipped, session has no rotations");
            return true;
        }

        self.last_write_index = self.last_write_index.wrapping_add(1);
        let data = SessionData {
            session_id: self.session.current_session_id,
            write_index: self.last_write_index,
            session_rotation_count: self.counts.session_rotations,
            session_active_time_seconds: session_active,
            session_start_time_unix: self.session.session_start_time_unix,
            session_end_time_unix: end,
            lifetime_rotation_count: self.counts.lifetime_rotations,
            lifetime_time_seconds: self
                .counts
                .lifetime_active_seconds_at(now_ms, self.config.active_timeout_ms),
            reported: false,
        };

        info!("Saving session ({reason:?})");
        let ok = match self.store.write(&data) {
            Ok(()) => {
                platform.on_event(OdometerEvent::Saved {
                    session_id: data.session_id,
                    write_index: data.write_index,
                });
                true
            }
            Err(e) => {
                // The checksum keeps a bad sector invisible; carry on counting
                error!("Session save failed: {e}");
                platform.on_event(OdometerEvent::SaveFailed {
                    session_id: data.session_id,
                    write_index: data.write_index,
                });
                false
            }
        };

        self.save.record_save(self.counts.lifetime_rotations, now_ms);
        ok
    }

    /// Settle merge-or-new for this boot if it has not been settled yet
    fn ensure_decided<P: Platform>(&mut self, platform: &mut P) {
        if self.session.decided {
            return;
        }

        let boot_start = self.session.boot_start_unix();
        let decision = decide(self.previous.as_ref(), boot_start, self.config.merge_gap_secs);

        match (decision, self.previous) {
            (SessionDecision::Merge { session_id }, Some(previous)) => {
                self.counts.absorb_session(
                    previous.session_rotation_count,
                    previous.session_active_time_seconds,
                );
                self.session.session_start_time_unix = previous.session_start_time_unix;
                self.session.merged = true;
                info!(
                    "Continuing session {}: +{} rotations, +{} sec from flash",
                    session_id,
                    previous.session_rotation_count,
                    previous.session_active_time_seconds
                );
            }
            _ => {
                self.session.session_start_time_unix = boot_start.unwrap_or(0);
                self.session.merged = false;
                info!("Starting new session {}", decision.session_id());
            }
        }

        self.session.current_session_id = decision.session_id();
        self.session.decided = true;
        platform.on_event(OdometerEvent::SessionDecided {
            session_id: decision.session_id(),
            merged: self.session.merged,
        });
    }

    /// Anchor wall-clock time to the boot clock. A zero timestamp is
    /// rejected; implausible ones are accepted with a warning.
    pub fn set_time_reference<P: Platform>(
        &mut self,
        unix_timestamp: u32,
        platform: &mut P,
        now_ms: u32,
    ) -> bool {
        if unix_timestamp == 0 {
            warn!("Received invalid timestamp (0)");
            return false;
        }
        if !(PLAUSIBLE_UNIX_MIN..PLAUSIBLE_UNIX_MAX).contains(&unix_timestamp) {
            warn!("Timestamp {unix_timestamp} is outside 2023..2033, accepting anyway");
        }

        let reference = TimeReference {
            unix: unix_timestamp,
            boot_ms: now_ms,
        };
        self.session.time_reference = Some(reference);
        info!(
            "Time reference set: unix {} at uptime {} ms, booted at {}",
            unix_timestamp,
            now_ms,
            reference.boot_unix()
        );

        if !self.session.decided {
            self.ensure_decided(platform);
        } else if !self.session.merged && self.session.session_start_time_unix == 0 {
            self.session.session_start_time_unix = reference.boot_unix();
        }
        true
    }

    /// Mark a session acknowledged by the companion app.
    ///
    /// The live session is saved first and then replaced by a fresh one; if
    /// that save fails nothing is marked and the session stays live. A past
    /// session is rewritten in place with only the flag changed.
    pub fn mark_reported<P: Platform>(&mut self, session_id: u32, platform: &mut P, now_ms: u32) -> bool {
        if session_id == 0 {
            return false;
        }

        let live = self.session.decided && session_id == self.session.current_session_id;
        if live {
            info!("Marking current session {session_id} as reported");
            if !self.save_with(SaveReason::Reported, platform, now_ms) {
                error!("Current session {session_id} not saved, leaving it unreported");
                return false;
            }
        }

        let Some(mut data) = self.store.find_by_session_id(session_id) else {
            error!("Session {session_id} not found in flash, cannot mark reported");
            return false;
        };

        let ok = if data.reported {
            info!("Session {session_id} already reported");
            true
        } else {
            data.reported = true;
            match self.store.write(&data) {
                Ok(()) => {
                    info!(
                        "{} session {session_id} marked as reported",
                        if live { "Current" } else { "Old" }
                    );
                    true
                }
                Err(e) => {
                    error!("Session {session_id} may not be marked reported: {e}");
                    false
                }
            }
        };

        if let Some(previous) = self.previous.as_mut()
            && previous.session_id == session_id
        {
            previous.reported = true;
        }
        platform.on_event(OdometerEvent::SessionReported { session_id });

        if live {
            self.start_fresh_session(platform, now_ms);
        }
        ok
    }

    fn start_fresh_session<P: Platform>(&mut self, platform: &mut P, now_ms: u32) {
        if self.session.merged {
            // Only this boot's share of the reported session stays live
            self.counts
                .restart_session(self.counts.boot_rotations, self.counts.boot_active_seconds);
        } else {
            self.counts.restart_session(0, 0);
        }

        self.session.current_session_id = self.session.current_session_id.wrapping_add(1);
        self.session.merged = false;
        self.session.session_start_time_unix = self.session.current_unix_time(now_ms).unwrap_or(0);
        self.speed.reset();
        self.last_speed_sample_ms = None;

        info!(
            "Started session {} with {} rotations",
            self.session.current_session_id, self.counts.session_rotations
        );
        platform.on_event(OdometerEvent::SessionStarted {
            session_id: self.session.current_session_id,
        });
    }

    /// Administrative override for moving progress to a new device. The
    /// distance is in the user's unit. Returns true once the totals are in
    /// flash; with no rotations yet this session they are kept in memory
    /// and written by the next save.
    pub fn set_lifetime_totals<P: Platform>(
        &mut self,
        hours: f32,
        distance: f32,
        platform: &mut P,
        now_ms: u32,
    ) -> bool {
        let unit = self.distance_unit();
        let rotations = unit.rotations(distance);
        let seconds = units::hours_to_seconds(hours);

        info!(
            "Setting lifetime totals: {hours:.2} h -> {seconds} sec, {distance:.2} {} -> {rotations} rotations (was {} rotations, {} sec)",
            unit.label(),
            self.counts.lifetime_rotations,
            self.counts.lifetime_active_seconds
        );
        self.counts.lifetime_rotations = rotations;
        self.counts.lifetime_active_seconds = seconds;

        if self.counts.session_rotations == 0 {
            warn!("No rotations in this session yet, lifetime totals saved with the next record");
            self.save.last_saved_count = rotations;
            return false;
        }
        self.save_with(SaveReason::LifetimeOverride, platform, now_ms)
    }

    /// Replace user settings; flash is only written when they changed
    pub fn update_settings(&mut self, settings: UserSettings) -> Result<bool, SettingsError> {
        if settings == self.settings {
            return Ok(false);
        }
        let offset = self.store.layout().settings_offset;
        settings.save(self.store.flash_mut(), offset)?;
        self.settings = settings;
        Ok(true)
    }

    pub fn settings(&self) -> &UserSettings {
        &self.settings
    }

    pub fn config(&self) -> &OdometerConfig {
        &self.config
    }

    pub fn distance_unit(&self) -> DistanceUnit {
        DistanceUnit::from_metric(self.settings.metric)
    }

    /// Live session id, 0 while undecided
    pub fn current_session_id(&self) -> u32 {
        self.session.current_session_id
    }

    pub fn is_session_decided(&self) -> bool {
        self.session.decided
    }

    pub fn time_acquired(&self) -> bool {
        self.session.time_acquired()
    }

    pub fn current_unix_time(&self, now_ms: u32) -> Option<u32> {
        self.session.current_unix_time(now_ms)
    }

    /// Wall-clock time shifted by the user's timezone offset
    pub fn local_unix_time(&self, now_ms: u32) -> Option<u32> {
        let utc = self.current_unix_time(now_ms)?;
        utc.checked_add_signed(self.settings.timezone_offset_seconds)
    }

    /// Local `(hour, minute)` for the clock readout
    pub fn local_clock(&self, now_ms: u32) -> Option<(u8, u8)> {
        let utc = self.current_unix_time(now_ms)?;
        let local = i64::from(utc) + i64::from(self.settings.timezone_offset_seconds);
        let of_day = local.rem_euclid(SECONDS_PER_DAY);
        Some(((of_day / 3_600) as u8, (of_day % 3_600 / 60) as u8))
    }

    pub fn lifetime_rotations(&self) -> u32 {
        self.counts.lifetime_rotations
    }

    pub fn session_rotations(&self) -> u32 {
        self.counts.session_rotations
    }

    pub fn lifetime_active_seconds(&self, now_ms: u32) -> u32 {
        self.counts
            .lifetime_active_seconds_at(now_ms, self.config.active_timeout_ms)
    }

    pub fn session_active_seconds(&self, now_ms: u32) -> u32 {
        self.counts
            .session_active_seconds_at(now_ms, self.config.active_timeout_ms)
    }

    pub fn is_active(&self) -> bool {
        self.counts.is_active()
    }

    pub fn lifetime_distance(&self) -> f32 {
        self.distance_unit().distance(self.counts.lifetime_rotations)
    }

    pub fn session_distance(&self) -> f32 {
        self.distance_unit().distance(self.counts.session_rotations)
    }

    /// Speed over the last few seconds in the user's unit per hour
    pub fn running_speed(&self) -> f32 {
        self.distance_unit().speed(self.speed.rotations_per_second())
    }

    /// Average speed of the whole live session (merged boots included)
    pub fn session_speed(&self, now_ms: u32) -> f32 {
        let rate = speed::session_rotations_per_second(
            self.counts.session_rotations,
            self.session_active_seconds(now_ms),
        );
        self.distance_unit().speed(rate)
    }

    /// Filtered supply voltage from the last low-voltage check
    pub fn last_voltage_mv(&self) -> Option<u16> {
        self.voltage.last_valid_mv()
    }

    /// Session the reporting layer must not expose: the live one, or while
    /// undecided the previous one if this boot may still absorb it.
    pub fn excluded_session_id(&self) -> Option<u32> {
        if self.session.decided {
            return Some(self.session.current_session_id);
        }
        let decision = decide(
            self.previous.as_ref(),
            self.session.boot_start_unix(),
            self.config.merge_gap_secs,
        );
        match decision {
            SessionDecision::Merge { session_id } => Some(session_id),
            SessionDecision::New { .. } => None,
        }
    }

    pub(crate) fn store_mut(&mut self) -> &mut SectorStore<F> {
        &mut self.store
    }
}
