pub mod flash;
pub mod record;
pub mod sector_store;
pub mod settings;

pub use flash::{FlashLayout, RamFlash};
pub use record::{DecodeError, Decoded, RecordVersion, SessionData};
pub use sector_store::SectorStore;
pub use settings::{SettingsError, UserSettings};

use embedded_storage::nor_flash::NorFlashErrorKind;
use thiserror_no_std::Error;

/// Number of sectors in the session ring (wear-leveling width)
pub const SECTOR_COUNT: u32 = 64;

/// Program granularity of the target flash; every record is zero-padded to it
pub const RECORD_PAGE_SIZE: usize = 256;

/// "ODOS" (Odometer Session)
pub const FLASH_MAGIC: u32 = 0x4F44_4F53;

/// Record layout written by this build. Increment when `SessionData` changes
/// and add a decoding arm for the old shape in [`record`].
pub const STRUCT_VERSION: u32 = 3;

/// Erase/program/verify attempts per write (initial + 1 retry)
pub const WRITE_ATTEMPTS: usize = 2;

/// Errors reported by the session sector store
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("flash operation failed: {0:?}")]
    Flash(NorFlashErrorKind),
    #[error("write to sector {sector} failed verification after retry")]
    VerifyFailed { sector: u32 },
    #[error("sector {sector} is outside the session ring")]
    SectorOutOfRange { sector: u32 },
    #[error("invalid record: {0}")]
    Invalid(DecodeError),
    #[error("flash geometry cannot hold the session ring")]
    Geometry,
}

impl From<DecodeError> for StoreError {
    fn from(err: DecodeError) -> Self {
        Self::Invalid(err)
    }
}
