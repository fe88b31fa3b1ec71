//! Flash geometry and an in-memory NOR flash
//!
//! The session ring occupies the last `sector_count` erase sectors of the
//! device, with the user-settings sector directly below it:
//!
//! ```text
//! | ... program image ... | settings | ring[0] | ring[1] | ... | ring[N-1] |
//!                         ^          ^                                    ^
//!                 settings_offset  ring_offset                      capacity
//! ```

use alloc::vec;
use alloc::vec::Vec;

use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash, check_erase, check_read, check_write,
};

use super::{RECORD_PAGE_SIZE, StoreError};

/// Physical placement of the session ring and the settings sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashLayout {
    pub sector_size: u32,
    pub sector_count: u32,
    pub ring_offset: u32,
    pub settings_offset: u32,
}

impl FlashLayout {
    /// Place `sector_count` sectors at the top of a flash of `capacity` bytes.
    pub fn from_top(
        capacity: usize,
        sector_size: usize,
        sector_count: u32,
    ) -> Result<Self, StoreError> {
        if sector_count == 0 || sector_size < RECORD_PAGE_SIZE {
            return Err(StoreError::Geometry);
        }

        // Ring plus one settings sector
        let reserved = sector_size
            .checked_mul(sector_count as usize + 1)
            .ok_or(StoreError::Geometry)?;
        if reserved > capacity {
            return Err(StoreError::Geometry);
        }

        let ring_offset = u32::try_from(capacity - reserved + sector_size)
            .map_err(|_| StoreError::Geometry)?;
        let sector_size = u32::try_from(sector_size).map_err(|_| StoreError::Geometry)?;

        Ok(Self {
            sector_size,
            sector_count,
            ring_offset,
            settings_offset: ring_offset - sector_size,
        })
    }

    /// Byte offset of ring sector `sector`
    pub fn sector_offset(&self, sector: u32) -> Result<u32, StoreError> {
        if sector >= self.sector_count {
            return Err(StoreError::SectorOutOfRange { sector });
        }
        Ok(self.ring_offset + sector * self.sector_size)
    }

    /// Ring sector a given write index lands in
    pub fn sector_for(&self, write_index: u32) -> u32 {
        write_index % self.sector_count
    }
}

/// Erase sector size of [`RamFlash`], matching the 4 KiB sectors of common
/// QSPI NOR parts.
pub const RAM_FLASH_SECTOR_SIZE: usize = 4096;

/// NOR flash held in RAM.
///
/// Behaves like the real part: erase sets bytes to `0xFF`, programming can
/// only clear bits, and misaligned accesses are rejected. Faults can be
/// injected to exercise write verification.
#[derive(Debug, Clone)]
pub struct RamFlash {
    data: Vec<u8>,
    erase_counts: Vec<u32>,
    corrupt_programs: usize,
}

impl RamFlash {
    /// Fully erased flash of `capacity` bytes (a multiple of the sector size).
    pub fn new(capacity: usize) -> Self {
        let sectors = capacity / RAM_FLASH_SECTOR_SIZE;
        Self {
            data: vec![0xFF; sectors * RAM_FLASH_SECTOR_SIZE],
            erase_counts: vec![0; sectors],
            corrupt_programs: 0,
        }
    }

    /// Damage the next `count` program operations.
    ///
    /// A damaged program flips bits in one byte an eighth of the way into
    /// the programmed span after writing it.
    pub fn corrupt_next_programs(&mut self, count: usize) {
        self.corrupt_programs = count;
    }

    /// Number of times the sector containing `offset` has been erased
    pub fn erase_count(&self, offset: u32) -> u32 {
        self.erase_counts
            .get(offset as usize / RAM_FLASH_SECTOR_SIZE)
            .copied()
            .unwrap_or(0)
    }

    /// Raw view of the flash contents
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Overwrite raw contents without erase semantics, for seeding images
    /// written by older firmware.
    pub fn load(&mut self, offset: u32, bytes: &[u8]) -> Result<(), NorFlashErrorKind> {
        check_read(self, offset, bytes.len())?;
        let start = offset as usize;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl ErrorType for RamFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for RamFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(self, offset, bytes.len())?;
        let start = offset as usize;
        bytes.copy_from_slice(&self.data[start..start + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl NorFlash for RamFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = RAM_FLASH_SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(self, from, to)?;
        self.data[from as usize..to as usize].fill(0xFF);
        for sector in (from as usize / Self::ERASE_SIZE)..(to as usize / Self::ERASE_SIZE) {
            self.erase_counts[sector] += 1;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(self, offset, bytes.len())?;
        let start = offset as usize;
        for (cell, byte) in self.data[start..start + bytes.len()].iter_mut().zip(bytes) {
            *cell &= *byte;
        }

        if self.corrupt_programs > 0 && !bytes.is_empty() {
            self.corrupt_programs -= 1;
            self.data[start + bytes.len() / 8] ^= 0x5A;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_from_top() {
        let layout = FlashLayout::from_top(2 * 1024 * 1024, 4096, 64).unwrap();
        assert_eq!(layout.ring_offset, 2 * 1024 * 1024 - 64 * 4096);
        assert_eq!(layout.settings_offset, layout.ring_offset - 4096);
        assert_eq!(layout.sector_offset(63).unwrap(), 2 * 1024 * 1024 - 4096);
        assert_eq!(
            layout.sector_offset(64),
            Err(StoreError::SectorOutOfRange { sector: 64 })
        );
        assert_eq!(layout.sector_for(130), 2);
    }

    #[test]
    fn test_layout_rejects_small_flash() {
        assert_eq!(
            FlashLayout::from_top(64 * 4096, 4096, 64),
            Err(StoreError::Geometry),
            "no room for the settings sector"
        );
        assert_eq!(
            FlashLayout::from_top(1024 * 1024, 128, 64),
            Err(StoreError::Geometry),
            "sector smaller than one record page"
        );
    }

    #[test]
    fn test_ram_flash_nor_semantics() {
        let mut flash = RamFlash::new(8 * RAM_FLASH_SECTOR_SIZE);
        let mut buf = [0u8; 4];

        flash.write(0, &[0x0F, 0xF0, 0xAA, 0x55]).unwrap();
        flash.write(0, &[0xFF, 0x0F, 0xFF, 0xFF]).unwrap();
        flash.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0x0F, 0x00, 0xAA, 0x55], "program only clears bits");

        flash.erase(0, RAM_FLASH_SECTOR_SIZE as u32).unwrap();
        flash.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0xFF; 4]);
        assert_eq!(flash.erase_count(0), 1);
        assert_eq!(flash.erase_count(RAM_FLASH_SECTOR_SIZE as u32), 0);
    }

    #[test]
    fn test_ram_flash_alignment() {
        let mut flash = RamFlash::new(2 * RAM_FLASH_SECTOR_SIZE);
        assert_eq!(flash.write(2, &[0; 4]), Err(NorFlashErrorKind::NotAligned));
        assert_eq!(flash.erase(0, 100), Err(NorFlashErrorKind::NotAligned));
        let mut buf = [0u8; 8];
        assert_eq!(
            flash.read(2 * RAM_FLASH_SECTOR_SIZE as u32 - 4, &mut buf),
            Err(NorFlashErrorKind::OutOfBounds)
        );
    }

    #[test]
    fn test_injected_corruption_is_one_shot() {
        let mut flash = RamFlash::new(RAM_FLASH_SECTOR_SIZE);
        flash.corrupt_next_programs(1);
        flash.write(0, &[0u8; 16]).unwrap();
        assert_eq!(flash.as_bytes()[2], 0x5A);

        flash.erase(0, RAM_FLASH_SECTOR_SIZE as u32).unwrap();
        flash.write(0, &[0u8; 16]).unwrap();
        assert!(flash.as_bytes()[..16].iter().all(|b| *b == 0));
    }
}
