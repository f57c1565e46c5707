//! The PATCH (companion patch archive) reader: header detection,
//! single/multi-entry directory parsing, payload extraction and the
//! optional `data.integrity` side channel.

pub mod entry;
pub mod header;

use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::codec;
use crate::error::{CoreError, Result};
use crate::normalize::normalize;
use entry::PatchEntry;
use header::{PatchHeader, ENTRY_FLAG_REMOVE, MODE_MULTIPLE_FILES, MODE_SINGLE_FILE};

const INTEGRITY_FILE_NAME: &str = "data.integrity";

pub struct PatchArchive {
    path: PathBuf,
    header: PatchHeader,
    entries: Vec<PatchEntry>,
    checksums: std::collections::HashMap<String, u32>,
}

/// Cheap header-only summary, for probing a patch without reading its
/// full directory.
#[derive(Debug, Clone)]
pub struct PatchInfo {
    pub use_grf_merging: bool,
    pub target_arc_name: String,
    pub file_count: u32,
}

impl PatchArchive {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CoreError::NotFound(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let header = PatchHeader::read(&mut reader)?;
        let entries = match header.mode {
            MODE_SINGLE_FILE => read_single_table(&mut reader)?,
            MODE_MULTIPLE_FILES => read_multi_table(&mut reader, header.file_count)?,
            other => return Err(CoreError::InvalidMode(other)),
        };

        let mut archive = PatchArchive {
            path: path.to_path_buf(),
            header,
            entries,
            checksums: std::collections::HashMap::new(),
        };
        archive.parse_data_integrity(&mut reader)?;
        Ok(archive)
    }

    /// Cheap header-only probe, used by `patch-info`-style tooling.
    pub fn probe(path: impl AsRef<Path>) -> Result<PatchInfo> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let header = PatchHeader::read(&mut reader)?;
        Ok(PatchInfo {
            use_grf_merging: header.use_grf_merging,
            target_arc_name: header.target_arc_name,
            file_count: header.file_count,
        })
    }

    pub fn use_grf_merging(&self) -> bool {
        self.header.use_grf_merging
    }

    pub fn target_arc_name(&self) -> &str {
        &self.header.target_arc_name
    }

    pub fn file_count(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[PatchEntry] {
        &self.entries
    }

    pub fn find_entry(&self, name: &str) -> Option<&PatchEntry> {
        let key = normalize(name);
        self.entries.iter().find(|e| normalize(&e.relative_path) == key)
    }

    pub fn contains_file(&self, name: &str) -> bool {
        self.find_entry(name).is_some()
    }

    /// Reads and decompresses an entry's content. Removed and zero-size
    /// entries return empty.
    pub fn read_file_content(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .find_entry(name)
            .ok_or_else(|| CoreError::EntryNotFound(name.to_string()))?;

        if entry.is_removed || entry.size == 0 {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(entry.offset))?;
        let mut compressed = vec![0u8; entry.size_compressed as usize];
        file.read_exact(&mut compressed)?;
        codec::decompress(&compressed, entry.size as usize)
    }

    pub fn extract_file(&self, name: &str, destination: impl AsRef<Path>) -> Result<()> {
        let data = self.read_file_content(name)?;
        let destination = destination.as_ref();
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(destination, data)?;
        Ok(())
    }

    /// Checksums parsed from `data.integrity`, if present.
    pub fn checksums(&self) -> &std::collections::HashMap<String, u32> {
        &self.checksums
    }

    /// Cross-checks every non-removed entry's bytes against the
    /// `data.integrity` table, when one is present. Returns the names of
    /// entries that fail.
    pub fn validate(&self) -> Result<Vec<String>> {
        if self.checksums.is_empty() {
            return Ok(Vec::new());
        }
        let mut failures = Vec::new();
        for entry in &self.entries {
            if entry.is_removed {
                continue;
            }
            let key = normalize(&entry.relative_path);
            let Some(&expected) = self.checksums.get(&key) else {
                continue;
            };
            let data = self.read_file_content(&entry.relative_path)?;
            let actual = crc32fast::hash(&data);
            if actual != expected {
                failures.push(entry.relative_path.clone());
            }
        }
        Ok(failures)
    }

    fn parse_data_integrity(&mut self, reader: &mut BufReader<File>) -> Result<()> {
        let Some(entry) = self
            .entries
            .iter()
            .find(|e| e.relative_path.eq_ignore_ascii_case(INTEGRITY_FILE_NAME))
        else {
            return Ok(());
        };
        if entry.is_removed || entry.size == 0 {
            return Ok(());
        }

        reader.seek(SeekFrom::Start(entry.offset))?;
        let mut compressed = vec![0u8; entry.size_compressed as usize];
        reader.read_exact(&mut compressed)?;
        let data = codec::decompress(&compressed, entry.size as usize)?;
        let text = String::from_utf8_lossy(&data);

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('/') {
                continue;
            }
            if let Some((name, value)) = line.split_once('=') {
                if let Ok(crc) = value.trim().parse::<u32>() {
                    self.checksums.insert(normalize(name.trim()), crc);
                }
            }
        }
        Ok(())
    }
}

fn read_single_table<R: Read + Seek>(reader: &mut R) -> Result<Vec<PatchEntry>> {
    let table_offset = reader
        .read_u64::<LittleEndian>()
        .map_err(|_| CoreError::CorruptHeader("truncated single-entry table offset".into()))?;
    reader.seek(SeekFrom::Start(table_offset))?;

    let name_size = reader.read_u8()?;
    let mut name_bytes = vec![0u8; name_size as usize];
    reader.read_exact(&mut name_bytes)?;
    let flags = reader.read_u8()?;
    let offset = reader.read_u64::<LittleEndian>()?;
    let size_compressed = reader.read_u32::<LittleEndian>()?;
    let size = reader.read_u32::<LittleEndian>()?;

    Ok(vec![PatchEntry {
        relative_path: String::from_utf8_lossy(&name_bytes).into_owned(),
        size,
        size_compressed: if flags & ENTRY_FLAG_REMOVE != 0 { 0 } else { size_compressed },
        offset,
        is_removed: flags & ENTRY_FLAG_REMOVE != 0,
    }])
}

fn read_multi_table<R: Read + Seek>(reader: &mut R, file_count: u32) -> Result<Vec<PatchEntry>> {
    let table_compressed_size = reader
        .read_u32::<LittleEndian>()
        .map_err(|_| CoreError::CorruptHeader("truncated multi-entry table size".into()))?;
    let table_offset = reader
        .read_u32::<LittleEndian>()
        .map_err(|_| CoreError::CorruptHeader("truncated multi-entry table offset".into()))?;

    reader.seek(SeekFrom::Start(table_offset as u64))?;
    let mut compressed = vec![0u8; table_compressed_size as usize];
    reader.read_exact(&mut compressed)?;

    // The producer omits the zlib wrapper for multi-entry directories;
    // fall back to zlib framing if raw deflate doesn't look right.
    let table = codec::decompress_raw(&compressed, compressed.len() * 4)
        .or_else(|_| codec::decompress(&compressed, compressed.len() * 4))
        .map_err(|e| CoreError::CorruptDirectory(e.to_string()))?;

    let mut cursor = std::io::Cursor::new(table);
    let mut entries = Vec::with_capacity(file_count as usize);

    for _ in 0..file_count {
        let Ok(name_size) = cursor.read_u8() else {
            break;
        };
        let mut name_bytes = vec![0u8; name_size as usize];
        if cursor.read_exact(&mut name_bytes).is_err() {
            break;
        }
        let Ok(flags) = cursor.read_u8() else {
            break;
        };
        let is_removed = flags & ENTRY_FLAG_REMOVE != 0;

        let (offset, size_compressed, size) = if is_removed {
            (0, 0, 0)
        } else {
            let Ok(offset) = cursor.read_u32::<LittleEndian>() else {
                break;
            };
            let Ok(size_compressed) = cursor.read_u32::<LittleEndian>() else {
                break;
            };
            let Ok(size) = cursor.read_u32::<LittleEndian>() else {
                break;
            };
            (offset as u64, size_compressed, size)
        };

        entries.push(PatchEntry {
            relative_path: String::from_utf8_lossy(&name_bytes).into_owned(),
            size,
            size_compressed,
            offset,
            is_removed,
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_single_patch(name: &str, data: &[u8], dir: &std::path::Path) -> PathBuf {
        let path = dir.join("single.thor");
        let mut file = File::create(&path).unwrap();

        let compressed = codec::compress(data).unwrap();

        file.write_all(header::MAGIC_MODERN).unwrap();
        file.write_all(&[1]).unwrap(); // useGrfMerging
        file.write_all(&1u32.to_le_bytes()).unwrap(); // fileCount
        file.write_all(&MODE_SINGLE_FILE.to_le_bytes()).unwrap();
        file.write_all(&[0]).unwrap(); // targetArcNameSize

        let table_offset = header::MAGIC_MODERN.len() as u64 + 1 + 4 + 2 + 1 + 8;
        file.write_all(&table_offset.to_le_bytes()).unwrap();

        file.write_all(&[name.len() as u8]).unwrap();
        file.write_all(name.as_bytes()).unwrap();
        file.write_all(&[0]).unwrap(); // flags
        let data_offset = file.stream_position().unwrap() + 8 + 4 + 4;
        file.write_all(&data_offset.to_le_bytes()).unwrap();
        file.write_all(&(compressed.len() as u32).to_le_bytes()).unwrap();
        file.write_all(&(data.len() as u32).to_le_bytes()).unwrap();
        file.write_all(&compressed).unwrap();

        path
    }

    #[test]
    fn reads_single_entry_patch() {
        let dir = tempfile::tempdir().unwrap();
        let path = build_single_patch("data\\test.txt", b"patched content", dir.path());

        let patch = PatchArchive::open(&path).unwrap();
        assert_eq!(patch.file_count(), 1);
        assert!(patch.use_grf_merging());
        let content = patch.read_file_content("data\\test.txt").unwrap();
        assert_eq!(content, b"patched content");
    }
}
