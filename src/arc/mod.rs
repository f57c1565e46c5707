//! The ARC container: header, directory, reader and writer.

pub mod directory;
pub mod entry;
pub mod header;
mod reader;
mod writer;

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::codec;
use crate::error::{CoreError, Result};
use crate::normalize::{glob_to_matcher, normalize};
use entry::ArcEntry;
use header::ArcHeader;

/// Invoked per entry during long-running operations (`extractAll`, `save`,
/// `fullRepack`, `verifyIntegrity`). Returning `false` requests
/// cancellation.
pub type ProgressCallback<'a> = dyn FnMut(usize, usize, &str) -> bool + 'a;

/// Aggregate counts, grounded on `GrfFile::Statistics` in the original
/// implementation — not named in the distilled spec but not excluded by
/// any Non-goal either.
#[derive(Debug, Default, Clone, Copy)]
pub struct Statistics {
    pub total_files: usize,
    pub total_size: u64,
    pub compressed_size: u64,
    pub encrypted_files: usize,
}

/// The ARC engine. Owns its file handle and entry map exclusively;
/// entries never outlive it.
pub struct ArcEngine {
    path: PathBuf,
    file: File,
    read_only: bool,
    header: ArcHeader,
    entries: HashMap<String, ArcEntry>,
    custom_key: Option<Box<[u8; 256]>>,
    last_error: Option<CoreError>,
}

impl ArcEngine {
    /// Opens an existing ARC: read-write if possible, falling back to
    /// read-only on a permission failure.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CoreError::NotFound(path.to_path_buf()));
        }

        let (mut file, read_only) = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(f) => (f, false),
            Err(_) => {
                warn!("opening {path:?} read-write failed, retrying read-only");
                (
                    OpenOptions::new()
                        .read(true)
                        .open(path)
                        .map_err(|e| CoreError::OpenFailed {
                            path: path.to_path_buf(),
                            reason: e.to_string(),
                        })?,
                    true,
                )
            }
        };

        let header = ArcHeader::read(&mut file)?;
        debug!("opened {path:?}: version 0x{:x}", header.version);

        let entries = Self::read_directory(&mut file, &header)?;
        info!("loaded {} entries from {path:?}", entries.len());

        Ok(ArcEngine {
            path: path.to_path_buf(),
            file,
            read_only,
            header,
            entries,
            custom_key: None,
            last_error: None,
        })
    }

    /// Creates a brand-new, empty ARC at `path`.
    pub fn create(path: impl AsRef<Path>, version: u32) -> Result<Self> {
        if !header::is_supported(version) {
            return Err(CoreError::UnsupportedVersion(version));
        }
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)?;

        let mut header = ArcHeader::new(version);
        header.set_real_file_count(0);
        header.write(&mut file)?;
        // Empty table: tableSizeCompressed=0, tableSize=0.
        file.write_u32_pair(0, 0)?;

        Ok(ArcEngine {
            path: path.to_path_buf(),
            file,
            read_only: false,
            header,
            entries: HashMap::new(),
            custom_key: None,
            last_error: None,
        })
    }

    fn read_directory(file: &mut File, header: &ArcHeader) -> Result<HashMap<String, ArcEntry>> {
        file.seek(SeekFrom::Start(header::HEADER_SIZE + header.table_offset as u64))?;
        let table_size_compressed = file.read_u32_le()?;
        let table_size = file.read_u32_le()?;

        if table_size_compressed == 0 && table_size == 0 {
            return Ok(HashMap::new());
        }

        let mut compressed = vec![0u8; table_size_compressed as usize];
        file.read_exact(&mut compressed)?;
        let table = codec::decompress(&compressed, table_size as usize)?;

        let parsed = if header::is_v1(header.version) {
            directory::parse_v1(&table)
        } else {
            directory::parse_v2(&table)
        };

        let mut map = HashMap::with_capacity(parsed.len());
        for entry in parsed {
            map.insert(entry.filename.clone(), entry);
        }
        Ok(map)
    }

    pub fn close(self) {
        drop(self);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> u32 {
        self.header.version
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn get_file_count(&self) -> usize {
        self.entries.values().filter(|e| !e.is_deleted).count()
    }

    pub fn find_entry(&self, filename: &str) -> Option<&ArcEntry> {
        self.entries.get(&normalize(filename)).filter(|e| !e.is_deleted)
    }

    pub fn file_exists(&self, filename: &str) -> bool {
        self.find_entry(filename).is_some()
    }

    pub fn get_file_list(&self) -> Vec<String> {
        self.entries
            .values()
            .filter(|e| !e.is_deleted)
            .map(|e| e.filename.clone())
            .collect()
    }

    /// Lists files whose canonical name matches a GRF-style glob filter.
    pub fn list_matching(&self, filter: &str) -> Vec<String> {
        let matcher = glob_to_matcher(filter);
        self.entries
            .values()
            .filter(|e| !e.is_deleted && matcher(&e.filename))
            .map(|e| e.filename.clone())
            .collect()
    }

    pub fn set_encryption_key(&mut self, key: [u8; 256]) {
        self.custom_key = Some(Box::new(key));
    }

    pub fn clear_encryption_key(&mut self) {
        if let Some(mut key) = self.custom_key.take() {
            key.fill(0);
        }
    }

    pub fn has_encryption_key(&self) -> bool {
        self.custom_key.is_some()
    }

    pub fn get_last_error(&self) -> Option<&CoreError> {
        self.last_error.as_ref()
    }

    fn set_error(&mut self, error: CoreError) -> CoreError {
        let message = error.to_string();
        warn!("ARC operation failed: {message}");
        // CoreError doesn't implement Clone; stash a fresh InvalidOperation
        // carrying the message so GetLastError still reports something
        // useful, while the original error propagates to the caller.
        self.last_error = Some(CoreError::InvalidOperation(message));
        error
    }

    pub fn statistics(&self) -> Statistics {
        let mut stats = Statistics::default();
        for entry in self.entries.values() {
            if entry.is_deleted {
                continue;
            }
            stats.total_files += 1;
            stats.total_size += entry.size_decompressed as u64;
            stats.compressed_size += entry.size_compressed as u64;
            if entry.is_encrypted() {
                stats.encrypted_files += 1;
            }
        }
        stats
    }

    /// Re-reads and re-inflates every live entry, returning the names of
    /// any that fail. Progress is throttled to every 100 entries per the
    /// scheduling model.
    pub fn verify_integrity(&mut self, mut progress: Option<&mut ProgressCallback>) -> Result<Vec<String>> {
        let names: Vec<String> = self.get_file_list();
        let total = names.len();
        let mut failures = Vec::new();

        for (i, name) in names.iter().enumerate() {
            if i % 100 == 0 {
                if let Some(cb) = progress.as_deref_mut() {
                    if !cb(i, total, name) {
                        return Ok(failures);
                    }
                }
            }
            if self.extract_file(name).is_err() {
                failures.push(name.clone());
            }
        }

        Ok(failures)
    }
}

trait FileExt {
    fn read_u32_le(&mut self) -> std::io::Result<u32>;
    fn write_u32_pair(&mut self, a: u32, b: u32) -> std::io::Result<()>;
}

impl FileExt for File {
    fn read_u32_le(&mut self) -> std::io::Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn write_u32_pair(&mut self, a: u32, b: u32) -> std::io::Result<()> {
        use std::io::Write;
        self.write_all(&a.to_le_bytes())?;
        self.write_all(&b.to_le_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_add_save_reopen_extract_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.arc");

        let mut arc = ArcEngine::create(&path, header::VERSION_200).unwrap();
        arc.add_file("data\\test.txt", b"hello", true).unwrap();
        arc.save(None).unwrap();
        drop(arc);

        let mut reopened = ArcEngine::open(&path).unwrap();
        let data = reopened.extract_file("DATA/TEST.TXT").unwrap();
        assert_eq!(data, b"hello");
    }

    #[test]
    fn quick_merge_preserves_existing_offsets_and_appends_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.arc");

        let mut arc = ArcEngine::create(&path, header::VERSION_200).unwrap();
        let ten_entries: Vec<Vec<u8>> = (0..10).map(|i| vec![i as u8; 4096]).collect();
        for (i, data) in ten_entries.iter().enumerate() {
            arc.add_file(&format!("file{i}.bin"), data, false).unwrap();
        }
        arc.save(None).unwrap();

        arc.remove_file("file5.bin").unwrap();
        arc.save(None).unwrap();
        drop(arc);

        let mut reopened = ArcEngine::open(&path).unwrap();
        assert_eq!(reopened.get_file_count(), 9);
        for (i, expected) in ten_entries.iter().enumerate() {
            if i == 5 {
                continue;
            }
            let data = reopened.extract_file(&format!("file{i}.bin")).unwrap();
            assert_eq!(&data, expected);
        }
    }

    #[test]
    fn quick_merge_appends_past_furthest_live_payload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.arc");

        let mut arc = ArcEngine::create(&path, header::VERSION_200).unwrap();
        arc.add_file("a", &vec![1u8; 16], false).unwrap();
        arc.add_file("b", &vec![2u8; 24], false).unwrap();
        arc.save(None).unwrap();

        assert_eq!(arc.find_entry("a").unwrap().offset, 0);
        assert_eq!(arc.find_entry("b").unwrap().offset, 16);

        arc.add_file("c", &vec![3u8; 100], false).unwrap();
        arc.save(None).unwrap();

        assert_eq!(arc.find_entry("a").unwrap().offset, 0);
        assert_eq!(arc.find_entry("b").unwrap().offset, 16);
        assert_eq!(arc.find_entry("c").unwrap().offset, 40);
        assert_eq!(arc.header.table_offset, 40 + align8(100));
    }

    #[test]
    fn compression_below_threshold_stores_raw() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.arc");
        let mut arc = ArcEngine::create(&path, header::VERSION_200).unwrap();
        let data = vec![7u8; 64];
        arc.add_file("small.bin", &data, true).unwrap();
        let entry = arc.find_entry("small.bin").unwrap();
        assert_eq!(entry.size_compressed, entry.size_decompressed);
    }

    #[test]
    fn rename_to_existing_name_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.arc");
        let mut arc = ArcEngine::create(&path, header::VERSION_200).unwrap();
        arc.add_file("a.txt", b"one", false).unwrap();
        arc.add_file("b.txt", b"two", false).unwrap();
        assert!(arc.rename_file("a.txt", "b.txt").is_err());
    }
}
