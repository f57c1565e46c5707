use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;
use rayon::prelude::*;

use crate::arc::header;
use crate::codec;
use crate::des::{self, Direction};
use crate::error::{CoreError, Result};
use crate::normalize::normalize;

use super::{ArcEngine, ProgressCallback};

impl ArcEngine {
    /// Extracts a file's decompressed bytes. Dirty entries are served
    /// from `cached_data` (which holds compressed bytes) rather than
    /// disk.
    pub fn extract_file(&mut self, filename: &str) -> Result<Vec<u8>> {
        let key = normalize(filename);
        let entry = self
            .entries
            .get(&key)
            .filter(|e| !e.is_deleted)
            .ok_or_else(|| CoreError::EntryNotFound(filename.to_string()))?
            .clone();

        let compressed = if let Some(cached) = &entry.cached_data {
            cached.clone()
        } else {
            self.file
                .seek(SeekFrom::Start(header::HEADER_SIZE + entry.offset as u64))?;
            let mut buf = vec![0u8; entry.size_compressed_aligned as usize];
            self.file.read_exact(&mut buf)?;
            buf
        };

        let mut buf = compressed;

        if let Some(custom_key) = &self.custom_key {
            for (i, b) in buf.iter_mut().enumerate() {
                *b ^= custom_key[i % 256];
            }
        }

        if entry.is_encrypted() && header::is_v1(self.header.version) {
            let entry_type = entry.flags & (crate::arc::entry::FLAG_ENCRYPT_MIXED | crate::arc::entry::FLAG_ENCRYPT_HEADER);
            des::crypt_file_data(&mut buf, entry_type, entry.cycle, Direction::Decrypt);
        }

        buf.truncate(entry.size_compressed as usize);

        if entry.size_compressed == entry.size_decompressed {
            buf.truncate(entry.size_decompressed as usize);
            Ok(buf)
        } else {
            let result = codec::decompress(&buf, entry.size_decompressed as usize).map_err(|e| self.set_error(e))?;
            Ok(result)
        }
    }

    pub fn extract_to_file(&mut self, filename: &str, output_path: impl AsRef<Path>) -> Result<()> {
        let data = self.extract_file(filename)?;
        let output_path = output_path.as_ref();
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(output_path, data)?;
        Ok(())
    }

    /// Extracts every live entry into `output_dir`, preserving the
    /// directory's backslash-separated relative paths. Progress is
    /// throttled to every 1000 entries.
    pub fn extract_all(
        &mut self,
        output_dir: impl AsRef<Path>,
        mut progress: Option<&mut ProgressCallback>,
    ) -> Result<usize> {
        let output_dir = output_dir.as_ref();
        fs::create_dir_all(output_dir)?;

        let names = self.get_file_list();
        let total = names.len();
        let mut extracted = 0;

        for (i, name) in names.iter().enumerate() {
            if i % 1000 == 0 {
                if let Some(cb) = progress.as_deref_mut() {
                    if !cb(i, total, name) {
                        return Ok(extracted);
                    }
                }
            }
            let rel = name.replace('\\', std::path::MAIN_SEPARATOR_STR);
            match self.extract_file(name) {
                Ok(data) => {
                    let dest = output_dir.join(rel);
                    if let Some(parent) = dest.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    let mut f = fs::File::create(&dest)?;
                    f.write_all(&data)?;
                    extracted += 1;
                }
                Err(e) => debug!("extractAll: skipping {name}: {e}"),
            }
        }

        Ok(extracted)
    }

    /// Parallel variant used by the CLI for bulk unpack, reopening the
    /// file per task the way `rayon`-driven extraction needs to. Requires
    /// the archive to have no pending modifications (no cached-data path).
    pub fn extract_all_parallel(&self, output_dir: impl AsRef<Path>) -> Result<usize> {
        let output_dir = output_dir.as_ref();
        fs::create_dir_all(output_dir)?;

        let names: Vec<String> = self.get_file_list();
        let arc_path = self.path.clone();
        let version = self.header.version;
        let custom_key = self.custom_key.clone();

        let results: Vec<Result<()>> = names
            .par_iter()
            .map(|name| -> Result<()> {
                let entry = self
                    .entries
                    .get(name)
                    .ok_or_else(|| CoreError::EntryNotFound(name.clone()))?;
                if entry.cached_data.is_some() {
                    return Err(CoreError::InvalidOperation(
                        "extract_all_parallel cannot read dirty entries".into(),
                    ));
                }

                let mut file = fs::File::open(&arc_path)?;
                file.seek(SeekFrom::Start(header::HEADER_SIZE + entry.offset as u64))?;
                let mut buf = vec![0u8; entry.size_compressed_aligned as usize];
                file.read_exact(&mut buf)?;

                if let Some(key) = &custom_key {
                    for (i, b) in buf.iter_mut().enumerate() {
                        *b ^= key[i % 256];
                    }
                }
                if entry.is_encrypted() && header::is_v1(version) {
                    let entry_type = entry.flags
                        & (crate::arc::entry::FLAG_ENCRYPT_MIXED | crate::arc::entry::FLAG_ENCRYPT_HEADER);
                    des::crypt_file_data(&mut buf, entry_type, entry.cycle, Direction::Decrypt);
                }
                buf.truncate(entry.size_compressed as usize);

                let data = if entry.size_compressed == entry.size_decompressed {
                    buf
                } else {
                    codec::decompress(&buf, entry.size_decompressed as usize)?
                };

                let rel = name.replace('\\', std::path::MAIN_SEPARATOR_STR);
                let dest = output_dir.join(rel);
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&dest, data)?;
                Ok(())
            })
            .collect();

        let mut count = 0;
        for r in results {
            r?;
            count += 1;
        }
        Ok(count)
    }
}
