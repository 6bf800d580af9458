//! Minimal ZIP reader for inspecting built packages
//!
//! Parses the central directory (classic and ZIP64) and can read back
//! Stored and DEFLATE entries. Enough to check what a package contains and
//! which permission bits it carries.

use crate::error::{PackError, Result};
use flate2::read::DeflateDecoder;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

/// ZIP local file header signature
const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;

/// ZIP central directory signature
const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x02014b50;

/// ZIP end of central directory signature
const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06054b50;

/// ZIP64 end of central directory record signature
const ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06064b50;

/// ZIP64 end of central directory locator signature
const ZIP64_LOCATOR_SIGNATURE: u32 = 0x07064b50;

/// EOCD is 22 bytes plus a comment of at most 65535 bytes
const EOCD_SEARCH_WINDOW: u64 = 22 + 65535;

/// `(S_IFMT | 0o777) << 16`: the part of external attributes holding the mode
pub const ZIP_PERMS_MASK: u32 = (0o170000 | 0o777) << 16;

/// Entry in the ZIP central directory
#[derive(Debug, Clone)]
pub struct ZipEntry {
    pub name: String,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub compression_method: u16,
    pub external_attr: u32,
    pub offset: u64,
}

impl ZipEntry {
    /// File type and permission bits from the external attributes
    pub fn unix_mode(&self) -> u32 {
        (self.external_attr & ZIP_PERMS_MASK) >> 16
    }
}

/// ZIP archive reader over any seekable source
pub struct ArchiveReader<R: Read + Seek> {
    source: R,
    entries: Vec<ZipEntry>,
}

impl ArchiveReader<BufReader<File>> {
    /// Open a ZIP file and read its central directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<'a> ArchiveReader<Cursor<&'a [u8]>> {
    /// Read an archive held in memory
    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self> {
        Self::new(Cursor::new(bytes))
    }
}

impl<R: Read + Seek> ArchiveReader<R> {
    /// Read the central directory from `source`
    pub fn new(mut source: R) -> Result<Self> {
        let entries = read_central_directory(&mut source)?;
        Ok(Self { source, entries })
    }

    /// Get list of all entries in the ZIP
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// Find an entry by name
    pub fn find_entry(&self, name: &str) -> Option<&ZipEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Read an entry's decompressed data into a vector
    pub fn read_entry(&mut self, entry: &ZipEntry) -> Result<Vec<u8>> {
        self.source.seek(SeekFrom::Start(entry.offset))?;

        let signature = read_u32_le(&mut self.source)?;
        if signature != LOCAL_FILE_HEADER_SIGNATURE {
            return Err(PackError::InvalidFormat(
                "Invalid local file header signature".to_string(),
            ));
        }

        // version, flags, method, time, date, crc, sizes
        self.source.seek(SeekFrom::Current(22))?;
        let filename_len = read_u16_le(&mut self.source)? as i64;
        let extra_len = read_u16_le(&mut self.source)? as i64;
        self.source
            .seek(SeekFrom::Current(filename_len + extra_len))?;

        // Sizes come from the central directory; let the buffers grow with
        // what is actually there instead of trusting them up front
        let mut compressed = Vec::new();
        (&mut self.source)
            .take(entry.compressed_size)
            .read_to_end(&mut compressed)?;
        if compressed.len() as u64 != entry.compressed_size {
            return Err(PackError::InvalidFormat(format!(
                "Truncated data for {}",
                entry.name
            )));
        }

        let data = match entry.compression_method {
            0 => compressed,
            8 => {
                let mut decompressed = Vec::new();
                DeflateDecoder::new(&compressed[..])
                    .take(entry.uncompressed_size.saturating_add(1))
                    .read_to_end(&mut decompressed)?;
                decompressed
            }
            other => return Err(PackError::UnsupportedCompression(other)),
        };

        if data.len() as u64 != entry.uncompressed_size {
            return Err(PackError::InvalidFormat(format!(
                "Size mismatch for {}",
                entry.name
            )));
        }

        if crc32fast::hash(&data) != entry.crc32 {
            return Err(PackError::InvalidFormat(format!(
                "CRC mismatch for {}",
                entry.name
            )));
        }

        Ok(data)
    }

    /// Read an entry by name
    pub fn read_entry_by_name(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .find_entry(name)
            .ok_or_else(|| PackError::EntryNotFound(name.to_string()))?
            .clone();

        self.read_entry(&entry)
    }
}

fn read_central_directory<R: Read + Seek>(source: &mut R) -> Result<Vec<ZipEntry>> {
    let eocd_offset = find_eocd(source)?;
    source.seek(SeekFrom::Start(eocd_offset + 4))?;

    // Skip disk number fields
    source.seek(SeekFrom::Current(4))?;
    let _entries_on_disk = read_u16_le(source)?;
    let total_entries_16 = read_u16_le(source)?;
    let cd_size_32 = read_u32_le(source)?;
    let cd_offset_32 = read_u32_le(source)?;

    let (total_entries, cd_offset) =
        if total_entries_16 == 0xFFFF || cd_size_32 == 0xFFFFFFFF || cd_offset_32 == 0xFFFFFFFF
        {
            read_zip64_eocd(source, eocd_offset)?
        } else {
            (total_entries_16 as u64, cd_offset_32 as u64)
        };

    source.seek(SeekFrom::Start(cd_offset))?;

    let mut entries = Vec::with_capacity(total_entries.min(65_536) as usize);
    for _ in 0..total_entries {
        let signature = read_u32_le(source)?;
        if signature != CENTRAL_DIRECTORY_SIGNATURE {
            return Err(PackError::InvalidFormat(format!(
                "Invalid central directory signature: 0x{:08x}",
                signature
            )));
        }

        // Skip version made by, version needed, flags
        source.seek(SeekFrom::Current(6))?;
        let compression_method = read_u16_le(source)?;
        // Skip modification time and date
        source.seek(SeekFrom::Current(4))?;
        let crc32 = read_u32_le(source)?;
        let compressed_size_32 = read_u32_le(source)?;
        let uncompressed_size_32 = read_u32_le(source)?;
        let filename_len = read_u16_le(source)? as usize;
        let extra_len = read_u16_le(source)? as usize;
        let comment_len = read_u16_le(source)? as usize;
        // Skip disk number, internal attributes
        source.seek(SeekFrom::Current(4))?;
        let external_attr = read_u32_le(source)?;
        let offset_32 = read_u32_le(source)?;

        let mut filename_buf = vec![0u8; filename_len];
        source.read_exact(&mut filename_buf)?;
        let name = String::from_utf8_lossy(&filename_buf).to_string();

        let mut extra_buf = vec![0u8; extra_len];
        source.read_exact(&mut extra_buf)?;

        if comment_len > 0 {
            source.seek(SeekFrom::Current(comment_len as i64))?;
        }

        let mut uncompressed_size = uncompressed_size_32 as u64;
        let mut compressed_size = compressed_size_32 as u64;
        let mut offset = offset_32 as u64;

        if let Some(zip64) = find_extra_field(&extra_buf, 0x0001) {
            // Only the fields that overflowed are present, in this order
            let mut values = zip64
                .chunks_exact(8)
                .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]));
            if uncompressed_size_32 == 0xFFFFFFFF {
                uncompressed_size = values.next().unwrap_or(uncompressed_size);
            }
            if compressed_size_32 == 0xFFFFFFFF {
                compressed_size = values.next().unwrap_or(compressed_size);
            }
            if offset_32 == 0xFFFFFFFF {
                offset = values.next().unwrap_or(offset);
            }
        }

        entries.push(ZipEntry {
            name,
            crc32,
            compressed_size,
            uncompressed_size,
            compression_method,
            external_attr,
            offset,
        });
    }

    Ok(entries)
}

/// Payload of the extra field with header `id`, if present
fn find_extra_field(extra: &[u8], id: u16) -> Option<&[u8]> {
    let mut i = 0usize;
    while i + 4 <= extra.len() {
        let field_id = u16::from_le_bytes([extra[i], extra[i + 1]]);
        let len = u16::from_le_bytes([extra[i + 2], extra[i + 3]]) as usize;
        i += 4;
        if i + len > extra.len() {
            return None;
        }
        if field_id == id {
            return Some(&extra[i..i + len]);
        }
        i += len;
    }
    None
}

/// Returns (total entries, central directory offset) from the ZIP64 record
fn read_zip64_eocd<R: Read + Seek>(source: &mut R, eocd_offset: u64) -> Result<(u64, u64)> {
    // The locator sits directly in front of the classic EOCD
    let locator_offset = eocd_offset
        .checked_sub(20)
        .ok_or_else(|| PackError::InvalidFormat("ZIP64 EOCD locator not found".to_string()))?;
    source.seek(SeekFrom::Start(locator_offset))?;
    if read_u32_le(source)? != ZIP64_LOCATOR_SIGNATURE {
        return Err(PackError::InvalidFormat(
            "ZIP64 EOCD locator not found".to_string(),
        ));
    }
    let _disk = read_u32_le(source)?;
    let zip64_eocd_offset = read_u64_le(source)?;

    source.seek(SeekFrom::Start(zip64_eocd_offset))?;
    let sig = read_u32_le(source)?;
    if sig != ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE {
        return Err(PackError::InvalidFormat(format!(
            "Invalid ZIP64 EOCD signature: 0x{:08x}",
            sig
        )));
    }

    // record size (8), versions (4), disk numbers (8), entries on this disk (8)
    source.seek(SeekFrom::Current(28))?;
    let total_entries = read_u64_le(source)?;
    let _cd_size = read_u64_le(source)?;
    let cd_offset = read_u64_le(source)?;

    Ok((total_entries, cd_offset))
}

/// Find the end of central directory record by scanning from the end
fn find_eocd<R: Read + Seek>(source: &mut R) -> Result<u64> {
    let size = source.seek(SeekFrom::End(0))?;
    let search_start = size.saturating_sub(EOCD_SEARCH_WINDOW);
    source.seek(SeekFrom::Start(search_start))?;

    let mut buffer = Vec::new();
    source.read_to_end(&mut buffer)?;

    buffer
        .windows(4)
        .rposition(|w| w == [0x50, 0x4b, 0x05, 0x06])
        .map(|i| search_start + i as u64)
        .ok_or_else(|| PackError::InvalidFormat("End of central directory not found".to_string()))
}

fn read_u16_le<R: Read>(source: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    source.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32_le<R: Read>(source: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    source.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64_le<R: Read>(source: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    source.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
