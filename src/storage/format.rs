//! Binary cassette layout
//!
//! ```text
//! +-------------+------------------------------+----------------------+
//! | FileHeader  | InteractionEntry x count     | encoded records      |
//! | 64 bytes    | 32 bytes each, recorded order| (see codec)          |
//! +-------------+------------------------------+----------------------+
//! ```

use bytemuck::{Pod, Zeroable};

/// File magic bytes: "TAPE\x00\x01\x00\x00"
pub const FILE_MAGIC: [u8; 8] = [0x54, 0x41, 0x50, 0x45, 0x00, 0x01, 0x00, 0x00];

/// Current format version
pub const FILE_VERSION: u32 = 1;

/// File header size
pub const HEADER_SIZE: usize = 64;

/// Index entry size
pub const INDEX_ENTRY_SIZE: usize = 32;

/// Byte range of the CRC field inside the header
pub const HEADER_CRC_RANGE: std::ops::Range<usize> = 12..16;

/// Entry flag: `recorded_at` holds a real timestamp
pub const ENTRY_HAS_TIMESTAMP: u32 = 1 << 0;

/// File header (64 bytes)
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct FileHeader {
    /// Magic bytes for file format identification
    pub magic: [u8; 8],

    /// Format version
    pub version: u32,

    /// CRC32 of header (excluding this field)
    pub header_crc: u32,

    /// Number of interactions stored
    pub interaction_count: u64,

    /// Offset to start of record section
    pub data_offset: u64,

    /// Size of record section in bytes
    pub data_size: u64,

    /// Save timestamp (Unix epoch milliseconds)
    pub saved_at: u64,

    /// Reserved for future use
    pub reserved: [u8; 16],
}

static_assertions::const_assert_eq!(std::mem::size_of::<FileHeader>(), HEADER_SIZE);

/// Index entry for a single interaction (32 bytes)
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct InteractionEntry {
    /// Offset to the encoded record, from the start of the file
    pub record_offset: u64,

    /// Capture time (Unix epoch milliseconds), valid with `ENTRY_HAS_TIMESTAMP`
    pub recorded_at: u64,

    /// Encoded record size
    pub record_size: u32,

    /// CRC32 of the encoded record
    pub record_crc: u32,

    /// Entry flags
    pub flags: u32,

    /// Reserved for future use
    pub reserved: u32,
}

static_assertions::const_assert_eq!(std::mem::size_of::<InteractionEntry>(), INDEX_ENTRY_SIZE);

impl Default for FileHeader {
    fn default() -> Self {
        Self {
            magic: FILE_MAGIC,
            version: FILE_VERSION,
            header_crc: 0,
            interaction_count: 0,
            data_offset: HEADER_SIZE as u64,
            data_size: 0,
            saved_at: 0,
            reserved: [0; 16],
        }
    }
}

impl FileHeader {
    /// Offset of the index entry at `index`, `None` on overflow
    #[must_use]
    pub fn entry_offset(index: usize) -> Option<usize> {
        index
            .checked_mul(INDEX_ENTRY_SIZE)?
            .checked_add(HEADER_SIZE)
    }

    /// Total file size described by this header, `None` on overflow
    #[must_use]
    pub fn file_size(&self) -> Option<u64> {
        self.data_offset.checked_add(self.data_size)
    }

    /// Number of index entries that fit between the header and the records
    #[must_use]
    pub fn index_capacity(&self) -> u64 {
        self.data_offset.saturating_sub(HEADER_SIZE as u64) / INDEX_ENTRY_SIZE as u64
    }
}

impl InteractionEntry {
    /// Capture time, if one was recorded
    #[must_use]
    pub fn timestamp(&self) -> Option<u64> {
        (self.flags & ENTRY_HAS_TIMESTAMP != 0).then_some(self.recorded_at)
    }
}

/// CRC32 of a serialized header with the CRC field skipped
#[must_use]
pub fn header_crc(header_bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header_bytes[..HEADER_CRC_RANGE.start]);
    hasher.update(&header_bytes[HEADER_CRC_RANGE.end..HEADER_SIZE]);
    hasher.finalize()
}
