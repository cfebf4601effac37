//! Binary cassette reader

use std::fs::File;
use std::path::Path;

use bytemuck::pod_read_unaligned;
use memmap2::Mmap;

use super::codec::decode_record;
use super::format::{header_crc, FileHeader, InteractionEntry, HEADER_SIZE, INDEX_ENTRY_SIZE};
use crate::interaction::Interaction;
use crate::{Result, TapedeckError};

/// Reader for binary cassette files
pub struct CassetteReader {
    _file: File,
    mmap: Mmap,
    header: FileHeader,
}

impl CassetteReader {
    /// Open an existing cassette file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be opened, mapped, or is invalid
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;

        // SAFETY: the mapping is read-only and cassette files are not
        // modified in place; a concurrent save replaces the whole file.
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < HEADER_SIZE {
            return Err(TapedeckError::InvalidFormat(
                "File too small to contain header".to_string(),
            ));
        }

        let header: FileHeader = pod_read_unaligned(&mmap[..HEADER_SIZE]);
        super::validate_header(&header)?;

        let computed_crc = header_crc(&mmap[..HEADER_SIZE]);
        if header.header_crc != computed_crc {
            return Err(TapedeckError::CorruptedData {
                offset: 0,
                expected: header.header_crc,
                actual: computed_crc,
            });
        }

        if header.data_offset < HEADER_SIZE as u64 {
            return Err(TapedeckError::InvalidFormat(format!(
                "Record section at offset {} overlaps header",
                header.data_offset
            )));
        }

        match header.file_size() {
            Some(size) if size <= mmap.len() as u64 => {}
            Some(size) => {
                return Err(TapedeckError::InvalidFormat(format!(
                    "Header describes {size} bytes but file has {}",
                    mmap.len()
                )));
            }
            None => {
                return Err(TapedeckError::InvalidFormat(format!(
                    "Header sizes overflow: offset {} + size {}",
                    header.data_offset, header.data_size
                )));
            }
        }

        if header.interaction_count > header.index_capacity() {
            return Err(TapedeckError::InvalidFormat(format!(
                "Index of {} entries overlaps record section at offset {}",
                header.interaction_count, header.data_offset
            )));
        }

        Ok(Self {
            _file: file,
            mmap,
            header,
        })
    }

    /// Get the file header
    #[must_use]
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Number of interactions in the file
    #[must_use]
    pub fn interaction_count(&self) -> usize {
        self.header.interaction_count as usize
    }

    /// Read the index entry at `index`
    ///
    /// # Errors
    ///
    /// Returns error if index is out of bounds
    pub fn entry(&self, index: usize) -> Result<InteractionEntry> {
        if index >= self.interaction_count() {
            return Err(TapedeckError::Other(format!(
                "Index {index} out of bounds (count: {})",
                self.interaction_count()
            )));
        }

        let entry = FileHeader::entry_offset(index)
            .and_then(|offset| self.mmap.get(offset..offset.checked_add(INDEX_ENTRY_SIZE)?))
            .ok_or_else(|| {
                TapedeckError::InvalidFormat(format!("Index entry {index} lies outside the file"))
            })?;
        Ok(pod_read_unaligned(entry))
    }

    /// Iterate over index entries in recorded order
    pub fn entries_iter(&self) -> impl Iterator<Item = Result<InteractionEntry>> + '_ {
        (0..self.interaction_count()).map(move |index| self.entry(index))
    }

    /// Read and verify the encoded record of an entry
    ///
    /// # Errors
    ///
    /// Returns error if the record lies outside the file or fails its CRC
    pub fn read_record(&self, entry: &InteractionEntry) -> Result<&[u8]> {
        let start = entry.record_offset as usize;
        let end = start
            .checked_add(entry.record_size as usize)
            .filter(|end| *end <= self.mmap.len() && start >= self.header.data_offset as usize)
            .ok_or_else(|| {
                TapedeckError::InvalidFormat(format!(
                    "Record at offset {start} lies outside the file"
                ))
            })?;

        let record = &self.mmap[start..end];
        let actual = crc32fast::hash(record);
        if actual != entry.record_crc {
            return Err(TapedeckError::CorruptedData {
                offset: entry.record_offset,
                expected: entry.record_crc,
                actual,
            });
        }

        Ok(record)
    }

    /// Decode every interaction in recorded order
    ///
    /// # Errors
    ///
    /// Returns error on the first entry that cannot be read or decoded
    pub fn interactions(&self) -> Result<Vec<Interaction>> {
        self.entries_iter()
            .map(|entry| {
                let entry = entry?;
                decode_record(self.read_record(&entry)?, entry.timestamp())
            })
            .collect()
    }
}
