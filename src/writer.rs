//! Deterministic ZIP writer
//!
//! Every entry is handed over whole, so CRC and sizes are known before the
//! local header is written and no data descriptors are needed. Timestamps are
//! pinned to the DOS epoch and permission bits are normalized, which makes the
//! output a pure function of the entry names, modes and contents.

use crate::error::{PackError, Result};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::collections::HashSet;
use std::io::{Seek, Write};

/// Mode for executable entries
pub const EXECUTABLE_MODE: u32 = 0o755;

/// Mode for everything else
pub const REGULAR_MODE: u32 = 0o644;

/// DOS time for 00:00:00
const DOS_EPOCH_TIME: u16 = 0x0000;

/// DOS date for 1980-01-01
const DOS_EPOCH_DATE: u16 = 0x0021;

/// Version made by: Unix host (3), version 2.0
const VERSION_MADE_BY_UNIX: u16 = (3 << 8) | 20;

/// General purpose flag bit 11: names are UTF-8
const FLAG_UTF8: u16 = 1 << 11;

/// Compression method to use for ZIP entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMethod {
    /// No compression (stored)
    Stored,
    /// DEFLATE compression (most common)
    #[default]
    Deflate,
}

impl CompressionMethod {
    pub(crate) fn to_zip_method(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
        }
    }
}

/// Collapse arbitrary unix permission bits to the two modes Lambda accepts.
///
/// Anything the owner can execute becomes `0o755`, the rest `0o644`.
pub fn normalize_mode(mode: u32) -> u32 {
    if mode & 0o100 != 0 {
        EXECUTABLE_MODE
    } else {
        REGULAR_MODE
    }
}

/// Central directory record kept until `finish`
struct CentralEntry {
    name: String,
    flags: u16,
    local_header_offset: u64,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    compression_method: u16,
    mode: u32,
}

impl CentralEntry {
    fn needs_zip64(&self) -> bool {
        self.compressed_size > u32::MAX as u64
            || self.uncompressed_size > u32::MAX as u64
            || self.local_header_offset > u32::MAX as u64
    }

    fn version_needed(&self) -> u16 {
        if self.needs_zip64() {
            45
        } else if self.compression_method == 0 {
            10
        } else {
            20
        }
    }
}

/// ZIP writer producing byte-identical output for identical input
pub struct ArchiveWriter<W: Write + Seek> {
    output: W,
    entries: Vec<CentralEntry>,
    names: HashSet<String>,
    compression_level: u32,
    compression_method: CompressionMethod,
}

impl<W: Write + Seek> ArchiveWriter<W> {
    /// Create a writer over an arbitrary sink using DEFLATE level 6
    pub fn from_writer(writer: W) -> Self {
        Self::with_method(writer, CompressionMethod::Deflate, 6)
    }

    /// Create a writer with the given compression method and level (0-9)
    pub fn with_method(writer: W, method: CompressionMethod, compression_level: u32) -> Self {
        Self {
            output: writer,
            entries: Vec::new(),
            names: HashSet::new(),
            compression_level: compression_level.min(9),
            compression_method: method,
        }
    }

    /// Number of entries written so far
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries have been written yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a complete file entry.
    ///
    /// `mode` is passed through [`normalize_mode`], so callers may hand over
    /// raw `st_mode` values.
    pub fn add_entry(&mut self, name: &str, mode: u32, data: &[u8]) -> Result<()> {
        if name.is_empty() {
            return Err(PackError::InvalidFormat("Entry name is empty".to_string()));
        }
        if name.len() > u16::MAX as usize {
            return Err(PackError::InvalidFormat(format!(
                "Entry name too long: {} bytes",
                name.len()
            )));
        }
        if !self.names.insert(name.to_string()) {
            return Err(PackError::InvalidFormat(format!(
                "Duplicate entry: {}",
                name
            )));
        }

        let crc32 = crc32fast::hash(data);
        let compressed = match self.compression_method {
            CompressionMethod::Deflate => {
                let mut encoder = DeflateEncoder::new(
                    Vec::with_capacity(data.len() / 2 + 64),
                    Compression::new(self.compression_level),
                );
                encoder.write_all(data)?;
                encoder.finish()?
            }
            CompressionMethod::Stored => data.to_vec(),
        };

        let flags = if name.is_ascii() { 0 } else { FLAG_UTF8 };
        let entry = CentralEntry {
            name: name.to_string(),
            flags,
            local_header_offset: self.output.stream_position()?,
            crc32,
            compressed_size: compressed.len() as u64,
            uncompressed_size: data.len() as u64,
            compression_method: self.compression_method.to_zip_method(),
            mode: normalize_mode(mode),
        };

        self.write_local_header(&entry)?;
        self.output.write_all(&compressed)?;
        self.entries.push(entry);
        Ok(())
    }

    fn write_local_header(&mut self, entry: &CentralEntry) -> Result<()> {
        let sizes_overflow = entry.compressed_size > u32::MAX as u64
            || entry.uncompressed_size > u32::MAX as u64;

        // Local ZIP64 extra carries both sizes, in that order
        let mut extra: Vec<u8> = Vec::new();
        if sizes_overflow {
            extra.extend_from_slice(&0x0001u16.to_le_bytes());
            extra.extend_from_slice(&16u16.to_le_bytes());
            extra.extend_from_slice(&entry.uncompressed_size.to_le_bytes());
            extra.extend_from_slice(&entry.compressed_size.to_le_bytes());
        }

        let out = &mut self.output;
        out.write_all(&[0x50, 0x4b, 0x03, 0x04])?; // signature
        out.write_all(&entry.version_needed().to_le_bytes())?;
        out.write_all(&entry.flags.to_le_bytes())?;
        out.write_all(&entry.compression_method.to_le_bytes())?;
        out.write_all(&DOS_EPOCH_TIME.to_le_bytes())?;
        out.write_all(&DOS_EPOCH_DATE.to_le_bytes())?;
        out.write_all(&entry.crc32.to_le_bytes())?;
        if sizes_overflow {
            out.write_all(&0xFFFFFFFFu32.to_le_bytes())?;
            out.write_all(&0xFFFFFFFFu32.to_le_bytes())?;
        } else {
            out.write_all(&(entry.compressed_size as u32).to_le_bytes())?;
            out.write_all(&(entry.uncompressed_size as u32).to_le_bytes())?;
        }
        out.write_all(&(entry.name.len() as u16).to_le_bytes())?;
        out.write_all(&(extra.len() as u16).to_le_bytes())?;
        out.write_all(entry.name.as_bytes())?;
        out.write_all(&extra)?;
        Ok(())
    }

    /// Finish ZIP file (write central directory and return the writer)
    pub fn finish(mut self) -> Result<W> {
        let central_dir_offset = self.output.stream_position()?;

        for entry in &self.entries {
            // ZIP64 extra: only the overflowing fields, in APPNOTE order
            let mut extra_field: Vec<u8> = Vec::new();
            if entry.needs_zip64() {
                let mut data: Vec<u8> = Vec::new();
                if entry.uncompressed_size > u32::MAX as u64 {
                    data.extend_from_slice(&entry.uncompressed_size.to_le_bytes());
                }
                if entry.compressed_size > u32::MAX as u64 {
                    data.extend_from_slice(&entry.compressed_size.to_le_bytes());
                }
                if entry.local_header_offset > u32::MAX as u64 {
                    data.extend_from_slice(&entry.local_header_offset.to_le_bytes());
                }
                extra_field.extend_from_slice(&0x0001u16.to_le_bytes());
                extra_field.extend_from_slice(&(data.len() as u16).to_le_bytes());
                extra_field.extend_from_slice(&data);
            }

            let out = &mut self.output;
            out.write_all(&[0x50, 0x4b, 0x01, 0x02])?; // central dir sig
            out.write_all(&VERSION_MADE_BY_UNIX.to_le_bytes())?;
            out.write_all(&entry.version_needed().to_le_bytes())?;
            out.write_all(&entry.flags.to_le_bytes())?;
            out.write_all(&entry.compression_method.to_le_bytes())?;
            out.write_all(&DOS_EPOCH_TIME.to_le_bytes())?;
            out.write_all(&DOS_EPOCH_DATE.to_le_bytes())?;
            out.write_all(&entry.crc32.to_le_bytes())?;
            out.write_all(&clamp_u32(entry.compressed_size).to_le_bytes())?;
            out.write_all(&clamp_u32(entry.uncompressed_size).to_le_bytes())?;
            out.write_all(&(entry.name.len() as u16).to_le_bytes())?;
            out.write_all(&(extra_field.len() as u16).to_le_bytes())?;
            out.write_all(&0u16.to_le_bytes())?; // file comment len
            out.write_all(&0u16.to_le_bytes())?; // disk number start
            out.write_all(&0u16.to_le_bytes())?; // internal attrs
            out.write_all(&(entry.mode << 16).to_le_bytes())?; // external attrs
            out.write_all(&clamp_u32(entry.local_header_offset).to_le_bytes())?;
            out.write_all(entry.name.as_bytes())?;
            out.write_all(&extra_field)?;
        }

        let central_dir_size = self.output.stream_position()? - central_dir_offset;
        let entry_count = self.entries.len() as u64;

        // 0xFFFF itself is the ZIP64 marker, so a full u16 count needs the record
        let need_zip64 = entry_count >= u16::MAX as u64
            || central_dir_size > u32::MAX as u64
            || central_dir_offset > u32::MAX as u64;

        if need_zip64 {
            let zip64_eocd_pos = central_dir_offset + central_dir_size;
            let out = &mut self.output;

            // ZIP64 end of central directory record
            out.write_all(&[0x50, 0x4b, 0x06, 0x06])?;
            out.write_all(&44u64.to_le_bytes())?; // size of remaining record
            out.write_all(&VERSION_MADE_BY_UNIX.to_le_bytes())?;
            out.write_all(&45u16.to_le_bytes())?;
            out.write_all(&0u32.to_le_bytes())?; // this disk
            out.write_all(&0u32.to_le_bytes())?; // disk with central dir
            out.write_all(&entry_count.to_le_bytes())?;
            out.write_all(&entry_count.to_le_bytes())?;
            out.write_all(&central_dir_size.to_le_bytes())?;
            out.write_all(&central_dir_offset.to_le_bytes())?;

            // ZIP64 end of central directory locator
            out.write_all(&[0x50, 0x4b, 0x06, 0x07])?;
            out.write_all(&0u32.to_le_bytes())?;
            out.write_all(&zip64_eocd_pos.to_le_bytes())?;
            out.write_all(&1u32.to_le_bytes())?; // total disks
        }

        let out = &mut self.output;
        out.write_all(&[0x50, 0x4b, 0x05, 0x06])?;
        out.write_all(&0u16.to_le_bytes())?; // disk number
        out.write_all(&0u16.to_le_bytes())?; // disk with central dir
        let count16 = if need_zip64 {
            0xFFFF
        } else {
            entry_count as u16
        };
        out.write_all(&count16.to_le_bytes())?;
        out.write_all(&count16.to_le_bytes())?;
        out.write_all(&clamp_u32(central_dir_size).to_le_bytes())?;
        out.write_all(&clamp_u32(central_dir_offset).to_le_bytes())?;
        out.write_all(&0u16.to_le_bytes())?; // comment len

        out.flush()?;
        Ok(self.output)
    }
}

/// 32-bit field value, or the ZIP64 placeholder when it does not fit
fn clamp_u32(value: u64) -> u32 {
    if value > u32::MAX as u64 {
        0xFFFFFFFF
    } else {
        value as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn build(method: CompressionMethod, files: &[(&str, u32, &[u8])]) -> Vec<u8> {
        let mut writer = ArchiveWriter::with_method(Cursor::new(Vec::new()), method, 6);
        for (name, mode, data) in files {
            writer.add_entry(name, *mode, data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn normalize_mode_keeps_only_two_modes() {
        assert_eq!(normalize_mode(0o100755), 0o755);
        assert_eq!(normalize_mode(0o700), 0o755);
        assert_eq!(normalize_mode(0o100644), 0o644);
        assert_eq!(normalize_mode(0o600), 0o644);
        assert_eq!(normalize_mode(0o011), 0o644);
    }

    #[test]
    fn identical_input_gives_identical_bytes() {
        let files: &[(&str, u32, &[u8])] = &[
            ("handler.py", 0o644, &b"def handler(event, ctx):\n    return 1\n"[..]),
            ("bin/run", 0o755, &b"#!/bin/sh\nexec python handler.py\n"[..]),
        ];
        assert_eq!(
            build(CompressionMethod::Deflate, files),
            build(CompressionMethod::Deflate, files)
        );
    }

    #[test]
    fn empty_archive_is_just_eocd() {
        let bytes = build(CompressionMethod::Deflate, &[]);
        assert_eq!(bytes.len(), 22);
        assert_eq!(&bytes[..4], &[0x50, 0x4b, 0x05, 0x06]);
    }

    #[test]
    fn local_header_has_fixed_timestamp() {
        let bytes = build(CompressionMethod::Stored, &[("a.txt", 0o644, &b"abc"[..])]);
        assert_eq!(&bytes[..4], &[0x50, 0x4b, 0x03, 0x04]);
        assert_eq!(u16::from_le_bytes([bytes[10], bytes[11]]), DOS_EPOCH_TIME);
        assert_eq!(u16::from_le_bytes([bytes[12], bytes[13]]), DOS_EPOCH_DATE);
        // stored payload follows the 30-byte header and the name
        assert_eq!(&bytes[35..38], b"abc");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut writer = ArchiveWriter::from_writer(Cursor::new(Vec::new()));
        writer.add_entry("x", 0o644, b"1").unwrap();
        let err = writer.add_entry("x", 0o644, b"2").unwrap_err();
        assert!(matches!(err, PackError::InvalidFormat(_)));
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut writer = ArchiveWriter::from_writer(Cursor::new(Vec::new()));
        assert!(writer.add_entry("", 0o644, b"").is_err());
        assert!(writer.is_empty());
    }
}
