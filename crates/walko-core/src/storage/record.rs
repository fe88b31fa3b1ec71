//! Versioned on-flash session record.
//!
//! Every record starts with the store magic and a layout version. Older
//! layouts stay decodable and are migrated to [`SessionData`] on read.
//!
//! Binary format of the current layout (version 3, little-endian):
//!
//! ```text
//! offset  field
//!      0  magic                        u32  0x4F444F53 ("ODOS")
//!      4  struct_version               u32  3
//!      8  session_id                   u32
//!     12  write_index                  u32
//!     16  session_rotation_count       u32
//!     20  session_active_time_seconds  u32
//!     24  session_start_time_unix      u32  (0 = unknown)
//!     28  session_end_time_unix        u32  (0 = unknown)
//!     32  lifetime_rotation_count      u32
//!     36  lifetime_time_seconds        u32
//!     40  reported                     u8   + 3 bytes padding
//!     44  checksum                     u32  XOR of all fields above
//!     48  zero padding up to RECORD_PAGE_SIZE
//! ```
//!
//! Version 2 is the same without `write_index`; version 1 additionally lacks
//! the start/end timestamps and the reported flag.

use core::fmt::Display;

use thiserror_no_std::Error;

use super::{FLASH_MAGIC, RECORD_PAGE_SIZE, STRUCT_VERSION};

/// Session and lifetime totals as the rest of the firmware sees them.
///
/// Internal record fields (magic, version, checksum) are handled by the codec
/// and never leak past it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionData {
    /// Monotonically increasing session counter, never reused
    pub session_id: u32,
    /// Global write counter; selects the sector and orders duplicate records
    pub write_index: u32,
    /// Rotations in this session
    pub session_rotation_count: u32,
    /// Active time in this session (seconds)
    pub session_active_time_seconds: u32,
    /// Unix timestamp when the session started (0 = unknown)
    pub session_start_time_unix: u32,
    /// Unix timestamp when the session ended (0 = unknown)
    pub session_end_time_unix: u32,
    /// All-time total rotations
    pub lifetime_rotation_count: u32,
    /// All-time total active seconds
    pub lifetime_time_seconds: u32,
    /// Acknowledged by the companion app
    pub reported: bool,
}

impl Display for SessionData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "ID={}, WrIdx={}, Rotations={}/{}, Time={}/{} sec, Start={}, End={}, Reported={}",
            self.session_id,
            self.write_index,
            self.session_rotation_count,
            self.lifetime_rotation_count,
            self.session_active_time_seconds,
            self.lifetime_time_seconds,
            self.session_start_time_unix,
            self.session_end_time_unix,
            if self.reported { "YES" } else { "NO" }
        )
    }
}

/// Reasons a sector does not hold a usable session record
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer too short for a record header")]
    Truncated,
    #[error("bad magic number")]
    BadMagic,
    #[error("unsupported struct version {0}")]
    UnsupportedVersion(u32),
    #[error("struct version {0} was written by newer firmware")]
    FutureVersion(u32),
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[error("record holds no rotations")]
    EmptySession,
}

/// Successfully decoded record plus the layout it was stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub data: SessionData,
    pub version: u32,
}

impl Decoded {
    /// The sector holds an older layout and should be rewritten
    pub fn needs_migration(&self) -> bool {
        self.version < STRUCT_VERSION
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}

fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Version 1 layout: counters only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordV1 {
    pub magic: u32,
    pub struct_version: u32,
    pub session_id: u32,
    pub session_rotation_count: u32,
    pub session_active_time_seconds: u32,
    pub lifetime_rotation_count: u32,
    pub lifetime_time_seconds: u32,
    pub checksum: u32,
}

impl RecordV1 {
    pub const VERSION: u32 = 1;
    pub const SIZE: usize = 32;

    /// Build a sealed version 1 record
    pub fn new(
        session_id: u32,
        session_rotation_count: u32,
        session_active_time_seconds: u32,
        lifetime_rotation_count: u32,
        lifetime_time_seconds: u32,
    ) -> Self {
        let mut record = Self {
            magic: FLASH_MAGIC,
            struct_version: Self::VERSION,
            session_id,
            session_rotation_count,
            session_active_time_seconds,
            lifetime_rotation_count,
            lifetime_time_seconds,
            checksum: 0,
        };
        record.checksum = record.compute_checksum();
        record
    }

    pub fn compute_checksum(&self) -> u32 {
        self.magic
            ^ self.struct_version
            ^ self.session_id
            ^ self.session_rotation_count
            ^ self.session_active_time_seconds
            ^ self.lifetime_rotation_count
            ^ self.lifetime_time_seconds
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < Self::SIZE {
            return Err(DecodeError::Truncated);
        }
        Ok(Self {
            magic: read_u32(bytes, 0),
            struct_version: read_u32(bytes, 4),
            session_id: read_u32(bytes, 8),
            session_rotation_count: read_u32(bytes, 12),
            session_active_time_seconds: read_u32(bytes, 16),
            lifetime_rotation_count: read_u32(bytes, 20),
            lifetime_time_seconds: read_u32(bytes, 24),
            checksum: read_u32(bytes, 28),
        })
    }

    pub fn to_bytes(&self) -> [u8; RECORD_PAGE_SIZE] {
        let mut page = [0u8; RECORD_PAGE_SIZE];
        write_u32(&mut page, 0, self.magic);
        write_u32(&mut page, 4, self.struct_version);
        write_u32(&mut page, 8, self.session_id);
        write_u32(&mut page, 12, self.session_rotation_count);
        write_u32(&mut page, 16, self.session_active_time_seconds);
        write_u32(&mut page, 20, self.lifetime_rotation_count);
        write_u32(&mut page, 24, self.lifetime_time_seconds);
        write_u32(&mut page, 28, self.checksum);
        page
    }
}

/// Version 2 layout: adds timestamps and the reported flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordV2 {
    pub magic: u32,
    pub struct_version: u32,
    pub session_id: u32,
    pub session_rotation_count: u32,
    pub session_active_time_seconds: u32,
    pub session_start_time_unix: u32,
    pub session_end_time_unix: u32,
    pub lifetime_rotation_count: u32,
    pub lifetime_time_seconds: u32,
    pub reported: u8,
    pub checksum: u32,
}

impl RecordV2 {
    pub const VERSION: u32 = 2;
    pub const SIZE: usize = 44;

    /// Build a sealed version 2 record from session fields (the write index
    /// is not part of this layout).
    pub fn new(data: &SessionData) -> Self {
        let mut record = Self {
            magic: FLASH_MAGIC,
            struct_version: Self::VERSION,
            session_id: data.session_id,
            session_rotation_count: data.session_rotation_count,
            session_active_time_seconds: data.session_active_time_seconds,
            session_start_time_unix: data.session_start_time_unix,
            session_end_time_unix: data.session_end_time_unix,
            lifetime_rotation_count: data.lifetime_rotation_count,
            lifetime_time_seconds: data.lifetime_time_seconds,
            reported: data.reported as u8,
            checksum: 0,
        };
        record.checksum = record.compute_checksum();
        record
    }

    pub fn compute_checksum(&self) -> u32 {
        self.magic
            ^ self.struct_version
            ^ self.session_id
            ^ self.session_rotation_count
            ^ self.session_active_time_seconds
            ^ self.session_start_time_unix
            ^ self.session_end_time_unix
            ^ self.lifetime_rotation_count
            ^ self.lifetime_time_seconds
            ^ self.reported as u32
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < Self::SIZE {
            return Err(DecodeError::Truncated);
        }
        Ok(Self {
            magic: read_u32(bytes, 0),
            struct_version: read_u32(bytes, 4),
            session_id: read_u32(bytes, 8),
            session_rotation_count: read_u32(bytes, 12),
            session_active_time_seconds: read_u32(bytes, 16),
            session_start_time_unix: read_u32(bytes, 20),
            session_end_time_unix: read_u32(bytes, 24),
            lifetime_rotation_count: read_u32(bytes, 28),
            lifetime_time_seconds: read_u32(bytes, 32),
            reported: bytes[36],
            checksum: read_u32(bytes, 40),
        })
    }

    pub fn to_bytes(&self) -> [u8; RECORD_PAGE_SIZE] {
        let mut page = [0u8; RECORD_PAGE_SIZE];
        write_u32(&mut page, 0, self.magic);
        write_u32(&mut page, 4, self.struct_version);
        write_u32(&mut page, 8, self.session_id);
        write_u32(&mut page, 12, self.session_rotation_count);
        write_u32(&mut page, 16, self.session_active_time_seconds);
        write_u32(&mut page, 20, self.session_start_time_unix);
        write_u32(&mut page, 24, self.session_end_time_unix);
        write_u32(&mut page, 28, self.lifetime_rotation_count);
        write_u32(&mut page, 32, self.lifetime_time_seconds);
        page[36] = self.reported;
        write_u32(&mut page, 40, self.checksum);
        page
    }
}

/// Version 3 (current) layout: adds the global write index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordV3 {
    pub magic: u32,
    pub struct_version: u32,
    pub session_id: u32,
    pub write_index: u32,
    pub session_rotation_count: u32,
    pub session_active_time_seconds: u32,
    pub session_start_time_unix: u32,
    pub session_end_time_unix: u32,
    pub lifetime_rotation_count: u32,
    pub lifetime_time_seconds: u32,
    pub reported: u8,
    pub checksum: u32,
}

impl RecordV3 {
    pub const VERSION: u32 = 3;
    pub const SIZE: usize = 48;

    /// Build a sealed record in the current layout
    pub fn new(data: &SessionData) -> Self {
        let mut record = Self {
            magic: FLASH_MAGIC,
            struct_version: Self::VERSION,
            session_id: data.session_id,
            write_index: data.write_index,
            session_rotation_count: data.session_rotation_count,
            session_active_time_seconds: data.session_active_time_seconds,
            session_start_time_unix: data.session_start_time_unix,
            session_end_time_unix: data.session_end_time_unix,
            lifetime_rotation_count: data.lifetime_rotation_count,
            lifetime_time_seconds: data.lifetime_time_seconds,
            reported: data.reported as u8,
            checksum: 0,
        };
        record.checksum = record.compute_checksum();
        record
    }

    pub fn compute_checksum(&self) -> u32 {
        self.magic
            ^ self.struct_version
            ^ self.session_id
            ^ self.write_index
            ^ self.session_rotation_count
            ^ self.session_active_time_seconds
            ^ self.session_start_time_unix
            ^ self.session_end_time_unix
            ^ self.lifetime_rotation_count
            ^ self.lifetime_time_seconds
            ^ self.reported as u32
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < Self::SIZE {
            return Err(DecodeError::Truncated);
        }
        Ok(Self {
            magic: read_u32(bytes, 0),
            struct_version: read_u32(bytes, 4),
            session_id: read_u32(bytes, 8),
            write_index: read_u32(bytes, 12),
            session_rotation_count: read_u32(bytes, 16),
            session_active_time_seconds: read_u32(bytes, 20),
            session_start_time_unix: read_u32(bytes, 24),
            session_end_time_unix: read_u32(bytes, 28),
            lifetime_rotation_count: read_u32(bytes, 32),
            lifetime_time_seconds: read_u32(bytes, 36),
            reported: bytes[40],
            checksum: read_u32(bytes, 44),
        })
    }

    pub fn to_bytes(&self) -> [u8; RECORD_PAGE_SIZE] {
        let mut page = [0u8; RECORD_PAGE_SIZE];
        write_u32(&mut page, 0, self.magic);
        write_u32(&mut page, 4, self.struct_version);
        write_u32(&mut page, 8, self.session_id);
        write_u32(&mut page, 12, self.write_index);
        write_u32(&mut page, 16, self.session_rotation_count);
        write_u32(&mut page, 20, self.session_active_time_seconds);
        write_u32(&mut page, 24, self.session_start_time_unix);
        write_u32(&mut page, 28, self.session_end_time_unix);
        write_u32(&mut page, 32, self.lifetime_rotation_count);
        write_u32(&mut page, 36, self.lifetime_time_seconds);
        page[40] = self.reported;
        write_u32(&mut page, 44, self.checksum);
        page
    }

    /// Named data fields (everything except magic and checksum), used for
    /// field-by-field verification after a write.
    pub fn fields(&self) -> [(&'static str, u32); 10] {
        [
            ("struct_version", self.struct_version),
            ("session_id", self.session_id),
            ("write_index", self.write_index),
            ("session_rotation_count", self.session_rotation_count),
            ("session_active_time_seconds", self.session_active_time_seconds),
            ("session_start_time_unix", self.session_start_time_unix),
            ("session_end_time_unix", self.session_end_time_unix),
            ("lifetime_rotation_count", self.lifetime_rotation_count),
            ("lifetime_time_seconds", self.lifetime_time_seconds),
            ("reported", self.reported as u32),
        ]
    }
}

/// A validated record in whichever layout it was stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordVersion {
    V1(RecordV1),
    V2(RecordV2),
    V3(RecordV3),
}

impl RecordVersion {
    /// Read the header, dispatch on the version tag and validate that
    /// version's checksum.
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < 8 {
            return Err(DecodeError::Truncated);
        }
        if read_u32(bytes, 0) != FLASH_MAGIC {
            return Err(DecodeError::BadMagic);
        }

        let record = match read_u32(bytes, 4) {
            RecordV1::VERSION => Self::V1(RecordV1::from_bytes(bytes)?),
            RecordV2::VERSION => Self::V2(RecordV2::from_bytes(bytes)?),
            RecordV3::VERSION => Self::V3(RecordV3::from_bytes(bytes)?),
            version if version > STRUCT_VERSION => {
                return Err(DecodeError::FutureVersion(version));
            }
            version => return Err(DecodeError::UnsupportedVersion(version)),
        };

        let (stored, computed) = match &record {
            Self::V1(r) => (r.checksum, r.compute_checksum()),
            Self::V2(r) => (r.checksum, r.compute_checksum()),
            Self::V3(r) => (r.checksum, r.compute_checksum()),
        };
        if stored != computed {
            return Err(DecodeError::ChecksumMismatch { stored, computed });
        }

        Ok(record)
    }

    pub fn version(&self) -> u32 {
        match self {
            Self::V1(_) => RecordV1::VERSION,
            Self::V2(_) => RecordV2::VERSION,
            Self::V3(_) => RecordV3::VERSION,
        }
    }

    /// Map any stored layout onto the current session fields.
    ///
    /// Legacy layouts chose their sector by `session_id mod N`, so the
    /// session id doubles as their write index; unknown timestamps become 0.
    pub fn migrate(self) -> SessionData {
        match self {
            Self::V1(r) => SessionData {
                session_id: r.session_id,
                write_index: r.session_id,
                session_rotation_count: r.session_rotation_count,
                session_active_time_seconds: r.session_active_time_seconds,
                session_start_time_unix: 0,
                session_end_time_unix: 0,
                lifetime_rotation_count: r.lifetime_rotation_count,
                lifetime_time_seconds: r.lifetime_time_seconds,
                reported: false,
            },
            Self::V2(r) => SessionData {
                session_id: r.session_id,
                write_index: r.session_id,
                session_rotation_count: r.session_rotation_count,
                session_active_time_seconds: r.session_active_time_seconds,
                session_start_time_unix: r.session_start_time_unix,
                session_end_time_unix: r.session_end_time_unix,
                lifetime_rotation_count: r.lifetime_rotation_count,
                lifetime_time_seconds: r.lifetime_time_seconds,
                reported: r.reported != 0,
            },
            Self::V3(r) => SessionData {
                session_id: r.session_id,
                write_index: r.write_index,
                session_rotation_count: r.session_rotation_count,
                session_active_time_seconds: r.session_active_time_seconds,
                session_start_time_unix: r.session_start_time_unix,
                session_end_time_unix: r.session_end_time_unix,
                lifetime_rotation_count: r.lifetime_rotation_count,
                lifetime_time_seconds: r.lifetime_time_seconds,
                reported: r.reported != 0,
            },
        }
    }
}

/// Encode session fields in the current layout, zero-padded to one page
pub fn encode(data: &SessionData) -> [u8; RECORD_PAGE_SIZE] {
    RecordV3::new(data).to_bytes()
}

/// Decode a sector's bytes into session fields.
///
/// Records that hold no rotations are void: a real session always has at
/// least one.
pub fn decode(bytes: &[u8]) -> Result<Decoded, DecodeError> {
    let record = RecordVersion::parse(bytes)?;
    let version = record.version();
    let data = record.migrate();

    if data.session_rotation_count == 0 {
        return Err(DecodeError::EmptySession);
    }

    Ok(Decoded { data, version })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> SessionData {
        SessionData {
            session_id: 7,
            write_index: 130,
            session_rotation_count: 2_600,
            session_active_time_seconds: 1_234,
            session_start_time_unix: 1_735_000_000,
            session_end_time_unix: 1_735_001_300,
            lifetime_rotation_count: 98_765,
            lifetime_time_seconds: 45_678,
            reported: false,
        }
    }

    #[test]
    fn test_record_sizes() {
        assert_eq!(RecordV1::SIZE, 32);
        assert_eq!(RecordV2::SIZE, 44);
        assert_eq!(RecordV3::SIZE, 48);
        assert!(RecordV3::SIZE <= RECORD_PAGE_SIZE);
    }

    #[test]
    fn test_current_layout_offsets() {
        let page = encode(&sample());
        assert_eq!(&page[0..4], &FLASH_MAGIC.to_le_bytes());
        assert_eq!(&page[4..8], &3u32.to_le_bytes());
        assert_eq!(&page[8..12], &7u32.to_le_bytes());
        assert_eq!(&page[12..16], &130u32.to_le_bytes());
        assert_eq!(&page[16..20], &2_600u32.to_le_bytes());
        assert_eq!(page[40], 0);
        assert!(
            page[RecordV3::SIZE..].iter().all(|b| *b == 0),
            "page tail must be zero padding"
        );
    }

    #[test]
    fn test_round_trip() {
        let mut data = sample();
        data.reported = true;
        let decoded = decode(&encode(&data)).unwrap();
        assert_eq!(decoded.data, data);
        assert_eq!(decoded.version, STRUCT_VERSION);
        assert!(!decoded.needs_migration());
    }

    #[test]
    fn test_erased_sector_is_bad_magic() {
        let erased = [0xFFu8; RECORD_PAGE_SIZE];
        assert_eq!(decode(&erased), Err(DecodeError::BadMagic));
    }

    #[test]
    fn test_flipped_bit_voids_record() {
        let mut page = encode(&sample());
        page[17] ^= 0x04;
        assert!(matches!(
            decode(&page),
            Err(DecodeError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_zero_rotation_record_is_void() {
        let mut data = sample();
        data.session_rotation_count = 0;
        assert_eq!(decode(&encode(&data)), Err(DecodeError::EmptySession));
    }

    #[test]
    fn test_future_version_is_reported() {
        let mut record = RecordV3::new(&sample());
        record.struct_version = 9;
        record.checksum = record.compute_checksum();
        assert_eq!(
            decode(&record.to_bytes()),
            Err(DecodeError::FutureVersion(9))
        );
    }

    #[test]
    fn test_version_zero_is_unsupported() {
        let mut record = RecordV3::new(&sample());
        record.struct_version = 0;
        record.checksum = record.compute_checksum();
        assert_eq!(
            decode(&record.to_bytes()),
            Err(DecodeError::UnsupportedVersion(0))
        );
    }

    #[test]
    fn test_short_buffer_is_truncated() {
        let page = encode(&sample());
        assert_eq!(decode(&page[..6]), Err(DecodeError::Truncated));
        assert_eq!(decode(&page[..40]), Err(DecodeError::Truncated));
    }

    #[test]
    fn test_v2_migrates_with_session_id_as_write_index() {
        let mut data = sample();
        data.reported = true;
        let page = RecordV2::new(&data).to_bytes();

        let decoded = decode(&page).unwrap();
        assert_eq!(decoded.version, 2);
        assert!(decoded.needs_migration());
        assert_eq!(decoded.data.write_index, data.session_id);
        assert_eq!(decoded.data.session_start_time_unix, data.session_start_time_unix);
        assert_eq!(decoded.data.session_end_time_unix, data.session_end_time_unix);
        assert!(decoded.data.reported);
    }

    #[test]
    fn test_v1_migrates_with_unknown_times() {
        let page = RecordV1::new(3, 500, 120, 10_000, 3_600).to_bytes();

        let decoded = decode(&page).unwrap();
        assert_eq!(decoded.version, 1);
        assert_eq!(
            decoded.data,
            SessionData {
                session_id: 3,
                write_index: 3,
                session_rotation_count: 500,
                session_active_time_seconds: 120,
                session_start_time_unix: 0,
                session_end_time_unix: 0,
                lifetime_rotation_count: 10_000,
                lifetime_time_seconds: 3_600,
                reported: false,
            }
        );
    }

    #[test]
    fn test_v2_checksum_uses_v2_field_set() {
        // A v2 page sealed with the v3 formula must not validate
        let data = sample();
        let mut record = RecordV2::new(&data);
        record.checksum = RecordV3::new(&data).checksum;
        if record.checksum != record.compute_checksum() {
            assert!(matches!(
                decode(&record.to_bytes()),
                Err(DecodeError::ChecksumMismatch { .. })
            ));
        }
    }

    fn arb_session() -> impl Strategy<Value = SessionData> {
        (
            any::<u32>(),
            any::<u32>(),
            1u32..,
            any::<u32>(),
            any::<u32>(),
            any::<u32>(),
            any::<u32>(),
            any::<u32>(),
            any::<bool>(),
        )
            .prop_map(
                |(id, wi, rotations, active, start, end, lifetime, lifetime_secs, reported)| {
                    SessionData {
                        session_id: id,
                        write_index: wi,
                        session_rotation_count: rotations,
                        session_active_time_seconds: active,
                        session_start_time_unix: start,
                        session_end_time_unix: end,
                        lifetime_rotation_count: lifetime,
                        lifetime_time_seconds: lifetime_secs,
                        reported,
                    }
                },
            )
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(data in arb_session()) {
            let decoded = decode(&encode(&data)).unwrap();
            prop_assert_eq!(decoded.data, data);
        }

        #[test]
        fn any_single_bit_flip_in_fields_is_detected(data in arb_session(), bit in 0usize..(44 * 8)) {
            let mut page = encode(&data);
            page[bit / 8] ^= 1 << (bit % 8);
            let result = decode(&page);
            // Flips in the padding after `reported` are outside the checksum
            let in_padding = (41..44).contains(&(bit / 8));
            if !in_padding {
                prop_assert!(result.is_err() || result.unwrap().data != data);
            }
        }
    }
}
