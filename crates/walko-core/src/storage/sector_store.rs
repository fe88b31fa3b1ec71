//! Wear-leveled ring of session sectors
//!
//! Every write goes to sector `write_index mod N`. The write index is a
//! global counter that only ever grows, so consecutive writes rotate through
//! the whole ring and the newest copy of a session is always the one with
//! the largest write index.

use embedded_storage::nor_flash::{NorFlash, NorFlashError};
use log::{debug, error, info, warn};

use super::flash::FlashLayout;
use super::record::{self, DecodeError, RecordV3, SessionData};
use super::{RECORD_PAGE_SIZE, SECTOR_COUNT, StoreError, WRITE_ATTEMPTS};

/// Session storage on a NOR flash.
///
/// Owns the flash so the settings sector can be reached through
/// [`SectorStore::flash_mut`]; keeps no session state of its own.
pub struct SectorStore<F> {
    flash: F,
    layout: FlashLayout,
}

impl<F: NorFlash> SectorStore<F> {
    /// Ring of [`SECTOR_COUNT`] sectors at the top of `flash`
    pub fn new(flash: F) -> Result<Self, StoreError> {
        Self::with_sector_count(flash, SECTOR_COUNT)
    }

    pub fn with_sector_count(flash: F, sector_count: u32) -> Result<Self, StoreError> {
        if RECORD_PAGE_SIZE % F::WRITE_SIZE != 0 || RECORD_PAGE_SIZE % F::READ_SIZE != 0 {
            error!(
                "Flash program unit {} does not divide the record page",
                F::WRITE_SIZE
            );
            return Err(StoreError::Geometry);
        }

        let layout = FlashLayout::from_top(flash.capacity(), F::ERASE_SIZE, sector_count)?;
        info!(
            "Session ring: {} sectors of {} bytes at {:#x}, settings at {:#x}",
            layout.sector_count, layout.sector_size, layout.ring_offset, layout.settings_offset
        );

        Ok(Self { flash, layout })
    }

    pub fn layout(&self) -> &FlashLayout {
        &self.layout
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Give the flash back (power-off)
    pub fn release(self) -> F {
        self.flash
    }

    /// Persist `data` to sector `write_index mod N`.
    ///
    /// Sessions without rotations are never stored; writing one succeeds
    /// without touching flash.
    pub fn write(&mut self, data: &SessionData) -> Result<(), StoreError> {
        if data.session_rotation_count == 0 {
            debug!("Skipping save of session {} with no rotations", data.session_id);
            return Ok(());
        }

        let sector = self.layout.sector_for(data.write_index);
        self.write_at(sector, data)
    }

    fn write_at(&mut self, sector: u32, data: &SessionData) -> Result<(), StoreError> {
        let offset = self.layout.sector_offset(sector)?;
        let page = record::encode(data);
        let expected = RecordV3::new(data);

        info!("Writing sector {sector}: {data}");

        let mut last_error = StoreError::VerifyFailed { sector };
        for attempt in 1..=WRITE_ATTEMPTS {
            if attempt > 1 {
                warn!("Retrying write to sector {sector} (attempt {attempt})");
            }

            if let Err(e) = self.program(offset, &page) {
                error!("Flash program of sector {sector} failed: {e}");
                last_error = e;
                continue;
            }

            match self.verify(offset, &expected) {
                Ok(()) => {
                    if attempt > 1 {
                        info!("Sector {sector} write succeeded on retry");
                    }
                    return Ok(());
                }
                Err(e) => last_error = e,
            }
        }

        error!("Write to sector {sector} failed after {WRITE_ATTEMPTS} attempts");
        match last_error {
            StoreError::Invalid(_) => Err(StoreError::VerifyFailed { sector }),
            other => Err(other),
        }
    }

    /// Erase and program one sector with interrupts held off for exactly
    /// that pair.
    fn program(&mut self, offset: u32, page: &[u8]) -> Result<(), StoreError> {
        let flash = &mut self.flash;
        let end = offset + self.layout.sector_size;

        critical_section::with(|_| {
            flash.erase(offset, end)?;
            flash.write(offset, page)
        })
        .map_err(|e| StoreError::Flash(e.kind()))
    }

    fn verify(&mut self, offset: u32, expected: &RecordV3) -> Result<(), StoreError> {
        let mut page = [0u8; RECORD_PAGE_SIZE];
        self.flash
            .read(offset, &mut page)
            .map_err(|e| StoreError::Flash(e.kind()))?;
        let actual = RecordV3::from_bytes(&page)?;

        let mut ok = true;
        if actual.magic != expected.magic {
            error!(
                "Verify: magic {:#010x} != {:#010x}",
                actual.magic, expected.magic
            );
            ok = false;
        }
        if actual.checksum != expected.checksum {
            error!(
                "Verify: stored checksum {:#010x} != {:#010x}",
                actual.checksum, expected.checksum
            );
            ok = false;
        }
        let recomputed = actual.compute_checksum();
        if recomputed != actual.checksum {
            error!(
                "Verify: recomputed checksum {:#010x} != stored {:#010x}",
                recomputed, actual.checksum
            );
            ok = false;
        }
        for ((name, got), (_, want)) in actual.fields().into_iter().zip(expected.fields()) {
            if got != want {
                error!("Verify: {name} = {got}, expected {want}");
                ok = false;
            }
        }

        if ok {
            Ok(())
        } else {
            Err(StoreError::Invalid(DecodeError::ChecksumMismatch {
                stored: actual.checksum,
                computed: recomputed,
            }))
        }
    }

    fn erase_sector(&mut self, sector: u32) -> Result<(), StoreError> {
        let offset = self.layout.sector_offset(sector)?;
        let flash = &mut self.flash;
        let end = offset + self.layout.sector_size;

        critical_section::with(|_| flash.erase(offset, end))
            .map_err(|e| StoreError::Flash(e.kind()))
    }

    /// Decode one ring sector.
    ///
    /// Records from newer firmware are erased so a downgraded build can never
    /// misread them. Records in an older layout are rewritten in place in the
    /// current layout; if that rewrite fails verification the legacy bytes
    /// are programmed back so the session is not lost.
    pub fn read(&mut self, sector: u32) -> Result<SessionData, StoreError> {
        let offset = self.layout.sector_offset(sector)?;
        let mut page = [0u8; RECORD_PAGE_SIZE];
        self.flash
            .read(offset, &mut page)
            .map_err(|e| StoreError::Flash(e.kind()))?;

        match record::decode(&page) {
            Ok(decoded) => {
                if decoded.needs_migration() {
                    info!(
                        "Migrating sector {sector} from v{} to the current layout",
                        decoded.version
                    );
                    if let Err(e) = self.write_at(sector, &decoded.data) {
                        warn!(
                            "Migration write-back of sector {sector} failed: {e}, restoring v{}",
                            decoded.version
                        );
                        if let Err(e) = self.program(offset, &page) {
                            error!("Failed to restore legacy sector {sector}: {e}");
                        }
                    }
                }
                Ok(decoded.data)
            }
            Err(DecodeError::FutureVersion(version)) => {
                warn!("Sector {sector} holds future record v{version}, erasing");
                if let Err(e) = self.erase_sector(sector) {
                    error!("Failed to erase sector {sector}: {e}");
                }
                Err(StoreError::Invalid(DecodeError::FutureVersion(version)))
            }
            Err(DecodeError::BadMagic) => Err(StoreError::Invalid(DecodeError::BadMagic)),
            Err(e) => {
                debug!("Sector {sector} invalid: {e}");
                Err(e.into())
            }
        }
    }

    /// One pass over the ring returning the newest copy of each session.
    ///
    /// When more than `MAX` sessions exist the ones with the highest ids
    /// are kept.
    pub fn scan_all<const MAX: usize>(&mut self) -> heapless::Vec<SessionData, MAX> {
        let mut found: heapless::Vec<SessionData, MAX> = heapless::Vec::new();

        for sector in 0..self.layout.sector_count {
            let Ok(data) = self.read(sector) else {
                continue;
            };

            if let Some(existing) = found.iter_mut().find(|s| s.session_id == data.session_id) {
                if data.write_index > existing.write_index {
                    *existing = data;
                }
                continue;
            }

            if let Err(data) = found.push(data) {
                let lowest = found
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, s)| s.session_id)
                    .map(|(i, s)| (i, s.session_id));
                if let Some((i, lowest_id)) = lowest
                    && data.session_id > lowest_id
                {
                    found[i] = data;
                }
            }
        }

        found
    }

    /// Newest copy of session `session_id`, if any sector holds it
    pub fn find_by_session_id(&mut self, session_id: u32) -> Option<SessionData> {
        let mut best: Option<SessionData> = None;

        for sector in 0..self.layout.sector_count {
            let Ok(data) = self.read(sector) else {
                continue;
            };
            if data.session_id != session_id {
                continue;
            }
            if best.is_none_or(|b| data.write_index > b.write_index) {
                best = Some(data);
            }
        }

        best
    }
}
