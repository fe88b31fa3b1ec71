//! User preferences stored in their own flash sector
//!
//! Layout: a 16-byte header followed by a postcard payload.
//!
//! ```text
//! offset  field
//!      0  magic        u32  0x53455454 ("SETT")
//!      4  version      u32
//!      8  payload_len  u32
//!     12  checksum     u32  XOR of header words and payload words
//!     16  payload      postcard bytes
//! ```

use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use super::RECORD_PAGE_SIZE;

/// "SETT"
pub const SETTINGS_MAGIC: u32 = 0x5345_5454;
pub const SETTINGS_VERSION: u32 = 2;

const HEADER_SIZE: usize = 16;
const MAX_PAYLOAD: usize = 32;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsError {
    #[error("flash operation failed: {0:?}")]
    Flash(NorFlashErrorKind),
    #[error("settings sector is empty or foreign")]
    BadMagic,
    #[error("unsupported settings version {0}")]
    UnsupportedVersion(u32),
    #[error("settings checksum mismatch")]
    ChecksumMismatch,
    #[error("settings could not be encoded")]
    Encode,
    #[error("settings payload could not be decoded")]
    Decode,
}

/// First settings layout: unit preference only
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
struct SettingsV1 {
    metric: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserSettings {
    /// Show kilometres instead of miles
    pub metric: bool,
    /// Offset from UTC applied when displaying times
    pub timezone_offset_seconds: i32,
}

impl From<SettingsV1> for UserSettings {
    fn from(v1: SettingsV1) -> Self {
        Self {
            metric: v1.metric,
            timezone_offset_seconds: 0,
        }
    }
}

fn checksum(version: u32, payload: &[u8]) -> u32 {
    let mut sum = SETTINGS_MAGIC ^ version ^ payload.len() as u32;
    for chunk in payload.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        sum ^= u32::from_le_bytes(word);
    }
    sum
}

fn header_word(page: &[u8], index: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&page[index * 4..index * 4 + 4]);
    u32::from_le_bytes(word)
}

impl UserSettings {
    /// Read settings from the sector at `offset`, migrating older layouts.
    ///
    /// A migrated sector is written back in the current layout.
    pub fn load<F: NorFlash>(flash: &mut F, offset: u32) -> Result<Self, SettingsError> {
        let mut page = [0u8; RECORD_PAGE_SIZE];
        flash
            .read(offset, &mut page)
            .map_err(|e| SettingsError::Flash(e.kind()))?;

        if header_word(&page, 0) != SETTINGS_MAGIC {
            return Err(SettingsError::BadMagic);
        }
        let version = header_word(&page, 1);
        let len = header_word(&page, 2) as usize;
        if len > MAX_PAYLOAD {
            return Err(SettingsError::Decode);
        }
        let payload = &page[HEADER_SIZE..HEADER_SIZE + len];
        if checksum(version, payload) != header_word(&page, 3) {
            return Err(SettingsError::ChecksumMismatch);
        }

        match version {
            1 => {
                let v1: SettingsV1 =
                    postcard::from_bytes(payload).map_err(|_| SettingsError::Decode)?;
                let settings = UserSettings::from(v1);
                info!("Migrating settings v1 to v{SETTINGS_VERSION}");
                if let Err(e) = settings.save(flash, offset) {
                    warn!("Settings migration write-back failed: {e}");
                }
                Ok(settings)
            }
            SETTINGS_VERSION => postcard::from_bytes(payload).map_err(|_| SettingsError::Decode),
            other => Err(SettingsError::UnsupportedVersion(other)),
        }
    }

    /// Like [`UserSettings::load`], falling back to defaults
    pub fn load_or_default<F: NorFlash>(flash: &mut F, offset: u32) -> Self {
        match Self::load(flash, offset) {
            Ok(settings) => settings,
            Err(SettingsError::BadMagic) => {
                info!("No stored settings, using defaults");
                Self::default()
            }
            Err(e) => {
                warn!("Stored settings unusable ({e}), using defaults");
                Self::default()
            }
        }
    }

    /// Erase the settings sector and write these settings to it
    pub fn save<F: NorFlash>(&self, flash: &mut F, offset: u32) -> Result<(), SettingsError> {
        let mut page = [0u8; RECORD_PAGE_SIZE];
        let len = postcard::to_slice(self, &mut page[HEADER_SIZE..HEADER_SIZE + MAX_PAYLOAD])
            .map_err(|_| SettingsError::Encode)?
            .len();

        let sum = checksum(SETTINGS_VERSION, &page[HEADER_SIZE..HEADER_SIZE + len]);
        page[0..4].copy_from_slice(&SETTINGS_MAGIC.to_le_bytes());
        page[4..8].copy_from_slice(&SETTINGS_VERSION.to_le_bytes());
        page[8..12].copy_from_slice(&(len as u32).to_le_bytes());
        page[12..16].copy_from_slice(&sum.to_le_bytes());

        let end = offset + F::ERASE_SIZE as u32;
        critical_section::with(|_| {
            flash.erase(offset, end)?;
            flash.write(offset, &page)
        })
        .map_err(|e| SettingsError::Flash(e.kind()))?;

        info!("Saved settings: {self:?}");
        Ok(())
    }
}
