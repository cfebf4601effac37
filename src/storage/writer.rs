//! Binary cassette writer

use std::fs::OpenOptions;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use bytemuck::bytes_of;
use memmap2::MmapMut;

use super::codec::encode_record;
use super::format::{
    header_crc, FileHeader, InteractionEntry, ENTRY_HAS_TIMESTAMP, HEADER_SIZE, INDEX_ENTRY_SIZE,
};
use crate::interaction::Interaction;
use crate::{Result, TapedeckError};

/// Writes a whole cassette in one pass
///
/// Records are encoded up front so the file can be sized once and filled
/// through a single mapping.
pub struct CassetteWriter {
    header: FileHeader,
    size: u64,
    entries: Vec<InteractionEntry>,
    records: Vec<Vec<u8>>,
}

impl CassetteWriter {
    /// Encode interactions in recorded order
    ///
    /// # Errors
    ///
    /// Returns error if a record is too large for the index
    pub fn new(interactions: &[Interaction]) -> Result<Self> {
        let index_size = INDEX_ENTRY_SIZE * interactions.len();
        let mut header = FileHeader::default();
        header.data_offset = (HEADER_SIZE + index_size) as u64;
        header.saved_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as u64);

        let mut entries = Vec::with_capacity(interactions.len());
        let mut records = Vec::with_capacity(interactions.len());
        let mut next_offset = header.data_offset;

        for interaction in interactions {
            let record = encode_record(interaction);
            let record_size = u32::try_from(record.len()).map_err(|_| {
                TapedeckError::InvalidFormat(format!(
                    "Record too large for binary cassette: {} bytes",
                    record.len()
                ))
            })?;

            let (recorded_at, flags) = match interaction.recorded_at() {
                Some(timestamp) => (timestamp, ENTRY_HAS_TIMESTAMP),
                None => (0, 0),
            };

            entries.push(InteractionEntry {
                record_offset: next_offset,
                recorded_at,
                record_size,
                record_crc: crc32fast::hash(&record),
                flags,
                reserved: 0,
            });
            next_offset += u64::from(record_size);
            records.push(record);
        }

        header.interaction_count = interactions.len() as u64;
        header.data_size = next_offset - header.data_offset;

        Ok(Self {
            header,
            size: next_offset,
            entries,
            records,
        })
    }

    /// Size of the file this writer produces
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.size
    }

    /// Write the cassette to `path`, replacing any existing file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created, mapped or flushed
    pub fn write_to(mut self, path: &Path) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(self.file_size())?;

        // SAFETY: the file was just created and truncated by us and is not
        // shared with any other mapping for the lifetime of `mmap`.
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };

        // Index entries
        for (index, entry) in self.entries.iter().enumerate() {
            let offset = FileHeader::entry_offset(index).ok_or_else(|| {
                TapedeckError::InvalidFormat(format!("Index entry {index} offset overflows"))
            })?;
            mmap[offset..offset + INDEX_ENTRY_SIZE].copy_from_slice(bytes_of(entry));
        }

        // Records
        for (entry, record) in self.entries.iter().zip(&self.records) {
            let offset = entry.record_offset as usize;
            mmap[offset..offset + record.len()].copy_from_slice(record);
        }

        // Header last, once the CRC can be computed
        self.header.header_crc = 0;
        self.header.header_crc = header_crc(bytes_of(&self.header));
        mmap[..HEADER_SIZE].copy_from_slice(bytes_of(&self.header));

        mmap.flush()?;
        Ok(())
    }
}
