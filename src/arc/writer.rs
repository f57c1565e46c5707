use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::arc::entry::{align8, ArcEntry, FLAG_FILE};
use crate::arc::header::{self, ArcHeader};
use crate::codec;
use crate::des::{self, Direction};
use crate::error::{CoreError, Result};
use crate::normalize::normalize;

use super::{directory, ArcEngine, ProgressCallback};

const COMPRESS_THRESHOLD: usize = 128;

impl ArcEngine {
    /// Adds a new file or replaces an existing one. Compression is
    /// attempted only when `compress && data.len() > 128`, and the
    /// compressed form is kept only if it's actually smaller.
    pub fn add_file(&mut self, filename: &str, data: &[u8], compress: bool) -> Result<()> {
        let key = normalize(filename);

        let stored = if compress && data.len() > COMPRESS_THRESHOLD {
            let compressed = codec::compress(data).map_err(|e| self.set_error(e))?;
            if compressed.len() < data.len() {
                compressed
            } else {
                data.to_vec()
            }
        } else {
            data.to_vec()
        };
        let size_decompressed = data.len() as u32;
        let size_compressed = stored.len() as u32;
        let size_compressed_aligned = align8(size_compressed);

        let existing = self.entries.contains_key(&key);
        let entry = self.entries.entry(key.clone()).or_insert_with(|| ArcEntry {
            filename: key.clone(),
            size_compressed: 0,
            size_compressed_aligned: 0,
            size_decompressed: 0,
            offset: 0,
            flags: FLAG_FILE,
            cycle: -1,
            is_new: !existing,
            is_modified: false,
            is_deleted: false,
            cached_data: None,
        });

        entry.size_compressed = size_compressed;
        entry.size_compressed_aligned = size_compressed_aligned;
        entry.size_decompressed = size_decompressed;
        entry.flags = FLAG_FILE;
        entry.cycle = -1;
        entry.is_modified = true;
        entry.is_new = !existing;
        entry.is_deleted = false;
        entry.cached_data = Some(stored);

        debug!("add_file: {key} ({size_decompressed} -> {size_compressed} bytes)");
        Ok(())
    }

    pub fn remove_file(&mut self, filename: &str) -> Result<()> {
        let key = normalize(filename);
        let entry = self
            .entries
            .get_mut(&key)
            .ok_or_else(|| CoreError::EntryNotFound(filename.to_string()))?;
        entry.is_deleted = true;
        Ok(())
    }

    pub fn rename_file(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        let old_key = normalize(old_name);
        let new_key = normalize(new_name);

        if self.entries.get(&new_key).is_some_and(|e| !e.is_deleted) {
            return Err(self.set_error(CoreError::InvalidOperation(format!(
                "rename target {new_key} already exists"
            ))));
        }

        let mut entry = self
            .entries
            .remove(&old_key)
            .ok_or_else(|| CoreError::EntryNotFound(old_name.to_string()))?;
        entry.filename = new_key.clone();
        entry.is_modified = true;
        self.entries.insert(new_key, entry);
        Ok(())
    }

    /// Recursively adds every file under `disk_dir`, namespaced under
    /// `base_path` in the archive.
    pub fn add_directory(
        &mut self,
        base_path: &str,
        disk_dir: impl AsRef<Path>,
        compress: bool,
        mut progress: Option<&mut ProgressCallback>,
    ) -> Result<(usize, usize)> {
        let disk_dir = disk_dir.as_ref();
        let mut paths = Vec::new();
        for walk_entry in walkdir::WalkDir::new(disk_dir).into_iter().filter_map(|e| e.ok()) {
            if walk_entry.path().is_file() {
                paths.push(walk_entry.path().to_path_buf());
            }
        }

        let total = paths.len();
        let mut added = 0;
        let mut failed = 0;
        for (i, path) in paths.iter().enumerate() {
            let rel = path.strip_prefix(disk_dir)?;
            let arc_name = format!(
                "{}\\{}",
                base_path.trim_end_matches(['\\', '/']),
                rel.to_string_lossy().replace('/', "\\")
            );

            if let Some(cb) = progress.as_deref_mut() {
                if !cb(i, total, &arc_name) {
                    return Ok((added, failed));
                }
            }

            match fs::read(path) {
                Ok(data) => {
                    if self.add_file(&arc_name, &data, compress).is_ok() {
                        added += 1;
                    } else {
                        failed += 1;
                    }
                }
                Err(e) => {
                    warn!("add_directory: failed to read {path:?}: {e}");
                    failed += 1;
                }
            }
        }

        Ok((added, failed))
    }

    /// `save()` tries QuickMerge first; any write-time error falls back
    /// to FullRepack.
    pub fn save(&mut self, progress: Option<&mut ProgressCallback>) -> Result<()> {
        if self.read_only {
            info!("{:?} is read-only; save() degrades to full repack via saveAs", self.path);
            return self.full_repack(None, progress);
        }

        match self.quick_merge(progress) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("QuickMerge failed ({e}); falling back to FullRepack");
                self.full_repack(None, None)
            }
        }
    }

    pub fn save_as(&mut self, path: impl AsRef<Path>, progress: Option<&mut ProgressCallback>) -> Result<()> {
        self.full_repack(Some(path.as_ref().to_path_buf()), progress)
    }

    fn quick_merge(&mut self, mut progress: Option<&mut ProgressCallback>) -> Result<()> {
        let end_offset = self
            .entries
            .values()
            .filter(|e| !e.is_deleted && !e.is_new)
            .map(|e| e.offset + e.size_compressed_aligned)
            .max()
            .unwrap_or(0);

        let mut write_offset = end_offset;
        let dirty_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.is_deleted && (e.is_new || e.is_modified))
            .map(|(k, _)| k.clone())
            .collect();

        let total = dirty_keys.len();
        for (i, key) in dirty_keys.iter().enumerate() {
            if let Some(cb) = progress.as_deref_mut() {
                if !cb(i, total, key) {
                    return Err(CoreError::Cancelled);
                }
            }

            let mut data = self
                .entries
                .get(key)
                .and_then(|e| e.cached_data.clone())
                .ok_or_else(|| CoreError::InvalidOperation(format!("{key} has no cached data")))?;

            self.maybe_encrypt(key, &mut data);

            let padded_len = align8(data.len() as u32) as usize;
            data.resize(padded_len, 0);

            self.file
                .seek(SeekFrom::Start(header::HEADER_SIZE + write_offset as u64))?;
            self.file.write_all(&data)?;

            let entry = self.entries.get_mut(key).unwrap();
            entry.offset = write_offset;
            entry.size_compressed_aligned = padded_len as u32;
            entry.is_new = false;
            entry.is_modified = false;
            entry.cached_data = None;

            write_offset += padded_len as u32;
        }

        self.header.table_offset = write_offset;
        self.write_directory_and_header()?;
        info!("QuickMerge saved {} entries to {:?}", self.get_file_count(), self.path);
        Ok(())
    }

    fn maybe_encrypt(&self, key: &str, data: &mut [u8]) {
        if !header::is_v1(self.header.version) {
            return;
        }
        if let Some(entry) = self.entries.get(key) {
            if entry.is_encrypted() {
                let entry_type = entry.flags & (crate::arc::entry::FLAG_ENCRYPT_MIXED | crate::arc::entry::FLAG_ENCRYPT_HEADER);
                des::crypt_file_data(data, entry_type, entry.cycle, Direction::Encrypt);
            }
        }
    }

    /// Always used by `saveAs`, and as the recovery path when QuickMerge
    /// fails. Writes a fresh file and atomically replaces the target; the
    /// original file is left intact if anything fails before the rename.
    fn full_repack(&mut self, output_path: Option<PathBuf>, mut progress: Option<&mut ProgressCallback>) -> Result<()> {
        let target = output_path.unwrap_or_else(|| self.path.clone());
        let tmp_path = target.with_extension("tmp");

        let result = (|| -> Result<()> {
            let mut tmp = OpenOptions::new()
                .create(true)
                .truncate(true)
                .read(true)
                .write(true)
                .open(&tmp_path)?;

            let placeholder = ArcHeader::new(self.header.version);
            placeholder.write(&mut tmp)?;

            let keys: Vec<String> = self
                .entries
                .iter()
                .filter(|(_, e)| !e.is_deleted)
                .map(|(k, _)| k.clone())
                .collect();
            let total = keys.len();

            let mut write_offset = 0u32;
            for (i, key) in keys.iter().enumerate() {
                if let Some(cb) = progress.as_deref_mut() {
                    if !cb(i, total, key) {
                        drop(tmp);
                        let _ = fs::remove_file(&tmp_path);
                        return Err(CoreError::Cancelled);
                    }
                }

                let mut data = {
                    let entry = self.entries.get(key).unwrap();
                    if let Some(cached) = &entry.cached_data {
                        cached.clone()
                    } else {
                        self.file
                            .seek(SeekFrom::Start(header::HEADER_SIZE + entry.offset as u64))?;
                        let mut buf = vec![0u8; entry.size_compressed_aligned as usize];
                        self.file.read_exact(&mut buf)?;
                        buf.truncate(entry.size_compressed as usize);
                        buf
                    }
                };

                if self
                    .entries
                    .get(key)
                    .map(|e| e.cached_data.is_some())
                    .unwrap_or(false)
                {
                    self.maybe_encrypt(key, &mut data);
                }

                let padded_len = align8(data.len() as u32) as usize;
                data.resize(padded_len, 0);
                tmp.write_all(&data)?;

                let entry = self.entries.get_mut(key).unwrap();
                entry.offset = write_offset;
                entry.size_compressed_aligned = padded_len as u32;
                entry.is_new = false;
                entry.is_modified = false;
                entry.cached_data = None;

                write_offset += padded_len as u32;
            }

            self.header.table_offset = write_offset;
            let real_count = self.get_file_count() as i32;
            self.header.set_real_file_count(real_count);

            let table = directory::serialize(self.entries.values());
            let compressed_table = codec::compress(&table).map_err(|e| self.set_error(e))?;
            tmp.seek(SeekFrom::Start(header::HEADER_SIZE + write_offset as u64))?;
            tmp.write_all(&(compressed_table.len() as u32).to_le_bytes())?;
            tmp.write_all(&(table.len() as u32).to_le_bytes())?;
            tmp.write_all(&compressed_table)?;

            tmp.seek(SeekFrom::Start(0))?;
            self.header.write(&mut tmp)?;
            tmp.flush()?;
            Ok(())
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        // Swap the temp file into place. No intermediate state is
        // observable at `target`: it's either the old file (rename
        // failed) or the fully-valid new one.
        if target.exists() {
            fs::remove_file(&target)?;
        }
        fs::rename(&tmp_path, &target)?;

        self.path = target.clone();
        self.file = OpenOptions::new().read(true).write(true).open(&target)?;
        self.read_only = false;
        info!("FullRepack wrote {} entries to {target:?}", self.get_file_count());
        Ok(())
    }

    fn write_directory_and_header(&mut self) -> Result<()> {
        let real_count = self.get_file_count() as i32;
        self.header.set_real_file_count(real_count);

        let table = directory::serialize(self.entries.values());
        let compressed_table = codec::compress(&table).map_err(|e| self.set_error(e))?;

        self.file
            .seek(SeekFrom::Start(header::HEADER_SIZE + self.header.table_offset as u64))?;
        self.file
            .write_all(&(compressed_table.len() as u32).to_le_bytes())?;
        self.file.write_all(&(table.len() as u32).to_le_bytes())?;
        self.file.write_all(&compressed_table)?;

        self.file.seek(SeekFrom::Start(0))?;
        self.header.write(&mut self.file)?;
        self.file.flush()?;
        Ok(())
    }
}
