//! Desktop simulator for the walko odometer session store.
//!
//! Drives walko-core against an in-RAM NOR flash with a simulated clock:
//! a walk interrupted by a supercap brown-out, a quick reboot that continues
//! the same session, a later boot that starts a new one, and finally the
//! companion app collecting and acknowledging the history.
//!
//! Set `RUST_LOG=debug` to see every engine event and flash verification.

use log::{debug, error, info, warn};

use walko_core::config::OdometerConfig;
use walko_core::events::{EVENT_CHANNEL, EventSubscriber, OdometerEvent};
use walko_core::odometer::Odometer;
use walko_core::platform::Platform;
use walko_core::reporting::{self, SessionSummary};
use walko_core::sensors::EdgeCounter;
use walko_core::storage::flash::RAM_FLASH_SECTOR_SIZE;
use walko_core::storage::record::RecordV2;
use walko_core::storage::{
    FlashLayout, RamFlash, SECTOR_COUNT, SessionData, StoreError, UserSettings,
};

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

/// 2 MiB of QSPI flash, as on the Pico W
const FLASH_CAPACITY: usize = 512 * RAM_FLASH_SECTOR_SIZE;

/// Main loop period
const POLL_INTERVAL_MS: u32 = 30;

/// A brisk walk: one rotation every 380 ms (about 2 mph)
const ROTATION_PERIOD_MS: u32 = 380;

/// Wall-clock time of the first simulated boot
const WORLD_START_UNIX: u32 = 1_760_000_000;

/// Every Nth ADC sample glitches low
const VOLTAGE_GLITCH_EVERY: u32 = 400;

/// Interrupt-side rotation counter, fed by the simulated Hall sensor
static EDGES: EdgeCounter = EdgeCounter::new();

// ---------------------------------------------------------------------------
// Simulated board
// ---------------------------------------------------------------------------

struct SimPlatform {
    /// Wall-clock time at this boot
    boot_unix: u32,
    /// Uptime after which the phone has pushed the time; `None` never
    time_sync_after_ms: Option<u32>,
    now_ms: u32,
    supply_mv: u16,
    samples: u32,
}

impl SimPlatform {
    fn new(boot_unix: u32, time_sync_after_ms: Option<u32>) -> Self {
        Self {
            boot_unix,
            time_sync_after_ms,
            now_ms: 0,
            supply_mv: 5_000,
            samples: 0,
        }
    }
}

impl Platform for SimPlatform {
    fn read_voltage_mv(&mut self) -> u16 {
        self.samples += 1;
        if self.samples % VOLTAGE_GLITCH_EVERY == 0 {
            return 40;
        }
        self.supply_mv
    }

    fn current_unix_time(&mut self) -> Option<u32> {
        let sync_at = self.time_sync_after_ms?;
        (self.now_ms >= sync_at).then(|| self.boot_unix + self.now_ms / 1000)
    }
}

// ---------------------------------------------------------------------------
// Scenario helpers
// ---------------------------------------------------------------------------

/// Walk for `walk_ms` (with `rest_ms` of standing still afterwards). The
/// supply starts sagging once `brownout_at_ms` of uptime has passed.
fn walk(
    odometer: &mut Odometer<RamFlash>,
    platform: &mut SimPlatform,
    walk_ms: u32,
    rest_ms: u32,
    brownout_at_ms: Option<u32>,
) {
    let start = platform.now_ms;
    let mut next_rotation = start;

    while platform.now_ms < start + walk_ms + rest_ms {
        let now = platform.now_ms;

        while now < start + walk_ms && next_rotation <= now {
            EDGES.on_edge();
            next_rotation += ROTATION_PERIOD_MS;
        }

        if let Some(brownout) = brownout_at_ms
            && now >= brownout
        {
            let sag = ((now - brownout) / 20).min(1_800) as u16;
            platform.supply_mv = 5_000 - sag;
        }

        odometer.poll(&EDGES, platform, now);
        platform.now_ms += POLL_INTERVAL_MS;
    }

    info!(
        "After {:.1} min: session {} at {} rotations ({:.2} {}), {} active sec, running {:.2} {}",
        (platform.now_ms - start) as f32 / 60_000.0,
        odometer.current_session_id(),
        odometer.session_rotations(),
        odometer.session_distance(),
        odometer.distance_unit().label(),
        odometer.session_active_seconds(platform.now_ms),
        odometer.running_speed(),
        odometer.distance_unit().speed_label(),
    );
}

fn drain_events(subscriber: &mut Option<EventSubscriber<'static>>) {
    let Some(subscriber) = subscriber else {
        return;
    };
    let mut rotations = 0usize;
    while let Some(event) = subscriber.try_next_message_pure() {
        match event {
            OdometerEvent::Rotation { .. } => rotations += 1,
            other => debug!("event: {other:?}"),
        }
    }
    debug!("{rotations} rotation event(s)");
}

fn boot(flash: RamFlash, config: OdometerConfig) -> Result<Odometer<RamFlash>, StoreError> {
    info!("--- power on ---");
    Odometer::new(flash, config)
}

fn print_summary(summary: &SessionSummary) {
    let wire: String = summary
        .to_le_bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    info!(
        "  session {:>3}: {:>6} rotations, {:>5} sec, {} -> {}  [{}]",
        summary.session_id,
        summary.rotation_count,
        summary.active_time_seconds,
        summary.start_time_unix,
        summary.end_time_unix,
        wire
    );
}

fn run() -> Result<(), StoreError> {
    let config = OdometerConfig::device();
    let mut events = EVENT_CHANNEL.subscriber().ok();

    // Flash as left by older firmware: yesterday's walk in the v2 layout
    let mut flash = RamFlash::new(FLASH_CAPACITY);
    let legacy = SessionData {
        session_id: 1,
        session_rotation_count: 4_200,
        session_active_time_seconds: 1_650,
        session_start_time_unix: WORLD_START_UNIX - 86_400,
        session_end_time_unix: WORLD_START_UNIX - 86_400 + 1_700,
        lifetime_rotation_count: 4_200,
        lifetime_time_seconds: 1_650,
        ..SessionData::default()
    };
    let layout = FlashLayout::from_top(FLASH_CAPACITY, RAM_FLASH_SECTOR_SIZE, SECTOR_COUNT)?;
    if let Err(e) = flash.load(layout.sector_offset(1)?, &RecordV2::new(&legacy).to_bytes()) {
        warn!("Could not seed legacy record: {e:?}");
    }

    // Boot 1: walk, phone pushes the time after 20 s, supercap fades
    let mut odometer = boot(flash, config)?;
    let mut platform = SimPlatform::new(WORLD_START_UNIX, Some(20_000));
    walk(&mut odometer, &mut platform, 10 * 60_000, 5_000, Some(9 * 60_000));
    drain_events(&mut events);
    let mut world = WORLD_START_UNIX + platform.now_ms / 1000;
    info!("--- power lost ---");
    let flash = odometer.into_flash();

    // Boot 2, five minutes later: the walk continues
    world += 5 * 60;
    let mut odometer = boot(flash, config)?;
    let mut platform = SimPlatform::new(world, Some(2_000));
    walk(&mut odometer, &mut platform, 3 * 60_000, 5_000, None);
    let now = platform.now_ms;
    odometer.save_now(&mut platform, now);
    drain_events(&mut events);
    world += platform.now_ms / 1000;
    info!("--- power off ---");
    let flash = odometer.into_flash();

    // Boot 3, two hours later: a new session, user switches to kilometres
    world += 2 * 3600;
    let mut odometer = boot(flash, config)?;
    let mut platform = SimPlatform::new(world, Some(1_000));
    match odometer.update_settings(UserSettings {
        metric: true,
        timezone_offset_seconds: -7 * 3600,
    }) {
        Ok(true) => info!("Settings updated"),
        Ok(false) => info!("Settings unchanged"),
        Err(e) => error!("Settings update failed: {e}"),
    }
    walk(&mut odometer, &mut platform, 2 * 60_000, 5_000, None);
    let now = platform.now_ms;
    if let Some((hour, minute)) = odometer.local_clock(now) {
        info!("Local clock reads {hour:02}:{minute:02}");
    }
    odometer.save_now(&mut platform, now);
    drain_events(&mut events);

    // Companion app: collect and acknowledge
    let unreported = reporting::list_unreported::<16, _>(&mut odometer);
    info!("Companion app found {} unreported session(s):", unreported.len());
    for summary in &unreported {
        print_summary(summary);
    }
    for summary in &unreported {
        let ok = reporting::mark_reported(&mut odometer, &mut platform, summary.session_id, now);
        if !ok {
            warn!("Session {} could not be acknowledged", summary.session_id);
        }
    }

    let live = odometer.current_session_id();
    if reporting::mark_reported(&mut odometer, &mut platform, live, now) {
        info!("Live session {live} acknowledged, now on {}", odometer.current_session_id());
    }
    drain_events(&mut events);

    let left = reporting::list_unreported::<16, _>(&mut odometer);
    info!(
        "Unreported after sync: {}; lifetime {:.2} {} over {} sec",
        left.len(),
        odometer.lifetime_distance(),
        odometer.distance_unit().label(),
        odometer.lifetime_active_seconds(now)
    );

    Ok(())
}

fn main() {
    env_logger::init();
    info!("Starting walko odometer simulator");

    if let Err(e) = run() {
        error!("Simulation aborted: {e}");
        std::process::exit(1);
    }
}
