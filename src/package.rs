//! Directory to package.
//!
//! Walks a function directory, orders its files by archive name and writes
//! them through [`ArchiveWriter`] into memory. The resulting bytes depend only
//! on file names, contents and the owner-execute bit, so rebuilding an
//! unchanged directory yields the same [`Package::content_hash`].

use crate::error::{PackError, Result};
use crate::writer::{ArchiveWriter, CompressionMethod};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::fs::{self, Metadata};
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// How a directory is turned into a package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageOptions {
    pub compression: CompressionMethod,
    /// DEFLATE level, 0-9
    pub compression_level: u32,
    /// Descend into symlinked directories
    pub follow_symlinks: bool,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            compression: CompressionMethod::Deflate,
            compression_level: 6,
            follow_symlinks: false,
        }
    }
}

/// A file selected for packaging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// `/`-separated path relative to the packaged directory
    pub name: String,
    pub path: PathBuf,
    pub mode: u32,
}

/// An in-memory archive and its content hash
#[derive(Debug, Clone)]
pub struct Package {
    pub bytes: Vec<u8>,
    /// Lowercase hex MD5 of `bytes`
    pub content_hash: String,
    /// Entry names in archive order
    pub entries: Vec<String>,
}

impl Package {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Base64 MD5 for the `Content-MD5` header
    pub fn content_md5_base64(&self) -> String {
        content_md5_base64(&self.bytes)
    }
}

/// Lowercase hex MD5, the value S3 reports as ETag for single-part uploads
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

pub fn content_md5_base64(bytes: &[u8]) -> String {
    BASE64.encode(md5::compute(bytes).0)
}

/// List the regular files under `dir`, sorted bytewise by archive name.
///
/// Directories produce no entries of their own. Symlinks to files are read
/// through; symlinked directories are only entered with `follow_symlinks`.
pub fn collect_files(dir: &Path, options: &PackageOptions) -> Result<Vec<SourceFile>> {
    if !dir.is_dir() {
        return Err(PackError::InvalidDirectory(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .follow_links(options.follow_symlinks)
    {
        let entry = entry?;

        // Unfollowed links still count when they point at a file
        let metadata = if entry.file_type().is_symlink() {
            match fs::metadata(entry.path()) {
                Ok(metadata) if metadata.is_file() => metadata,
                _ => continue,
            }
        } else if entry.file_type().is_file() {
            entry.metadata()?
        } else {
            continue;
        };

        let relative = entry.path().strip_prefix(dir).map_err(|_| {
            PackError::InvalidFormat(format!(
                "{} is outside {}",
                entry.path().display(),
                dir.display()
            ))
        })?;

        files.push(SourceFile {
            name: archive_name(relative)?,
            path: entry.path().to_path_buf(),
            mode: file_mode(&metadata),
        });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// Build the package for `dir`
pub fn build_archive(dir: &Path, options: &PackageOptions) -> Result<Package> {
    let files = collect_files(dir, options)?;
    build_archive_from_files(&files, options)
}

/// Build a package from an already selected file list, in the given order
pub fn build_archive_from_files(files: &[SourceFile], options: &PackageOptions) -> Result<Package> {
    let mut writer = ArchiveWriter::with_method(
        Cursor::new(Vec::new()),
        options.compression,
        options.compression_level,
    );

    let mut entries = Vec::with_capacity(files.len());
    for file in files {
        let data = fs::read(&file.path)?;
        writer.add_entry(&file.name, file.mode, &data)?;
        entries.push(file.name.clone());
    }

    let bytes = writer.finish()?.into_inner();
    Ok(Package {
        content_hash: content_hash(&bytes),
        bytes,
        entries,
    })
}

fn archive_name(relative: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or_else(|| {
                PackError::InvalidFormat(format!(
                    "Non UTF-8 file name: {}",
                    relative.display()
                ))
            })?),
            _ => {
                return Err(PackError::InvalidFormat(format!(
                    "Unexpected path component in {}",
                    relative.display()
                )))
            }
        }
    }
    Ok(parts.join("/"))
}

#[cfg(unix)]
fn file_mode(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(_metadata: &Metadata) -> u32 {
    crate::writer::REGULAR_MODE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_helpers() {
        assert_eq!(content_hash(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(content_md5_base64(b""), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }

    #[test]
    fn archive_names_use_forward_slashes() {
        let path: PathBuf = ["test", "sub", "f1.py"].iter().collect();
        assert_eq!(archive_name(&path).unwrap(), "test/sub/f1.py");
    }

    #[test]
    fn archive_names_reject_parent_components() {
        assert!(archive_name(Path::new("../escape.py")).is_err());
    }

    #[test]
    fn missing_directory_is_invalid() {
        let err = collect_files(Path::new("/definitely/not/here"), &PackageOptions::default())
            .unwrap_err();
        assert!(matches!(err, PackError::InvalidDirectory(_)));
    }
}
