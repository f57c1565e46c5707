//! The merge engine: applies PATCH archives against an ARC (or directly to
//! disk), plus the version-file and patch-list bookkeeping that drives
//! which patches are due.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::arc::ArcEngine;
use crate::error::{CoreError, Result};
use crate::patch::PatchArchive;

const INTEGRITY_FILE_NAME: &str = "data.integrity";

/// Whether a patch's contents land inside an ARC or straight onto disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Follow the patch's own `useGrfMerging` flag.
    Auto,
    GrfMerge,
    DiskExtract,
}

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub mode: MergeMode,
    /// Directory patch-relative paths are resolved against, and where a
    /// bare `targetGrf` is looked up.
    pub extract_directory: PathBuf,
    /// Used when the patch's own `targetGrfName` is empty.
    pub target_grf: Option<String>,
    pub create_backup: bool,
    pub verify_after_patch: bool,
    pub continue_on_error: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        MergeOptions {
            mode: MergeMode::Auto,
            extract_directory: PathBuf::from("."),
            target_grf: None,
            create_backup: false,
            verify_after_patch: false,
            continue_on_error: false,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ApplyStats {
    pub files_applied: usize,
    pub files_removed: usize,
    pub files_failed: usize,
}

/// Applies a single patch archive according to `options`.
pub fn apply_patch(thor_path: impl AsRef<Path>, options: &MergeOptions) -> Result<ApplyStats> {
    let patch = PatchArchive::open(thor_path.as_ref())?;

    let use_grf_merging = match options.mode {
        MergeMode::Auto => patch.use_grf_merging(),
        MergeMode::GrfMerge => true,
        MergeMode::DiskExtract => false,
    };

    if use_grf_merging {
        apply_to_arc(&patch, options)
    } else {
        apply_to_disk(&patch, options)
    }
}

/// Applies patches in the given order, aggregating counts. With
/// `continue_on_error`, a failing patch is logged and skipped rather than
/// aborting the whole run.
pub fn apply_patches(thor_paths: &[PathBuf], options: &MergeOptions) -> Result<ApplyStats> {
    let mut total = ApplyStats::default();
    for path in thor_paths {
        match apply_patch(path, options) {
            Ok(stats) => {
                total.files_applied += stats.files_applied;
                total.files_removed += stats.files_removed;
                total.files_failed += stats.files_failed;
            }
            Err(e) => {
                if options.continue_on_error {
                    warn!("applyPatches: {path:?} failed: {e}; continuing");
                    total.files_failed += 1;
                } else {
                    return Err(e);
                }
            }
        }
    }
    Ok(total)
}

fn resolve_target_arc(patch: &PatchArchive, options: &MergeOptions) -> Result<PathBuf> {
    let name = if !patch.target_arc_name().is_empty() {
        patch.target_arc_name().to_string()
    } else {
        options
            .target_grf
            .clone()
            .ok_or_else(|| CoreError::InvalidOperation("no target ARC name available".into()))?
    };
    Ok(options.extract_directory.join(name))
}

fn apply_to_arc(patch: &PatchArchive, options: &MergeOptions) -> Result<ApplyStats> {
    let target = resolve_target_arc(patch, options)?;

    if options.create_backup {
        let mut backup_name = target.as_os_str().to_os_string();
        backup_name.push(".backup");
        let backup = PathBuf::from(backup_name);
        if let Err(e) = fs::copy(&target, &backup) {
            warn!("applyPatch: backup of {target:?} failed: {e} (continuing)");
        }
    }

    let mut arc = ArcEngine::open(&target)?;
    let mut stats = ApplyStats::default();

    for entry in patch.entries() {
        if entry.relative_path.eq_ignore_ascii_case(INTEGRITY_FILE_NAME) {
            continue;
        }

        let result = if entry.is_removed {
            arc.remove_file(&entry.relative_path).map(|_| {
                stats.files_removed += 1;
            })
        } else {
            patch
                .read_file_content(&entry.relative_path)
                .and_then(|data| arc.add_file(&entry.relative_path, &data, true))
                .map(|_| {
                    stats.files_applied += 1;
                })
        };

        if let Err(e) = result {
            if options.continue_on_error {
                warn!("applyPatch: {} failed: {e}", entry.relative_path);
                stats.files_failed += 1;
            } else {
                return Err(e);
            }
        }
    }

    arc.save(None)?;

    if options.verify_after_patch {
        let failures = arc.verify_integrity(None)?;
        if !failures.is_empty() {
            return Err(CoreError::IntegrityFailed(failures.join(", ")));
        }
    }

    info!(
        "applyPatch: {} applied, {} removed, {} failed against {target:?}",
        stats.files_applied, stats.files_removed, stats.files_failed
    );
    Ok(stats)
}

fn apply_to_disk(patch: &PatchArchive, options: &MergeOptions) -> Result<ApplyStats> {
    let mut stats = ApplyStats::default();

    for entry in patch.entries() {
        if entry.relative_path.eq_ignore_ascii_case(INTEGRITY_FILE_NAME) {
            continue;
        }

        let dest = options.extract_directory.join(&entry.relative_path);
        let result = if entry.is_removed {
            match fs::remove_file(&dest) {
                Ok(()) => {
                    stats.files_removed += 1;
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    stats.files_removed += 1;
                    Ok(())
                }
                Err(e) => Err(CoreError::from(e)),
            }
        } else {
            (|| -> Result<()> {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                let data = patch.read_file_content(&entry.relative_path)?;
                fs::write(&dest, data)?;
                stats.files_applied += 1;
                Ok(())
            })()
        };

        if let Err(e) = result {
            if options.continue_on_error {
                warn!("applyPatch (disk): {} failed: {e}", entry.relative_path);
                stats.files_failed += 1;
            } else {
                return Err(e);
            }
        }
    }

    info!(
        "applyPatch (disk): {} applied, {} removed, {} failed into {:?}",
        stats.files_applied, stats.files_removed, stats.files_failed, options.extract_directory
    );
    Ok(stats)
}

/// Reads the decimal patch index recorded in `plist.version`. A missing
/// file means no patch has ever been applied.
pub fn read_local_version(path: impl AsRef<Path>) -> Result<u32> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(0);
    }
    let text = fs::read_to_string(path)?;
    text.trim()
        .parse::<u32>()
        .map_err(|_| CoreError::CorruptHeader(format!("malformed version file {path:?}")))
}

pub fn write_local_version(path: impl AsRef<Path>, index: u32) -> Result<()> {
    fs::write(path, index.to_string())?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PatchListEntry {
    pub index: u32,
    pub filename: String,
}

/// Parses a patch list manifest: lines of `<index> <filename>`, with `#`
/// or `//` lines ignored.
pub fn parse_patch_list(text: &str) -> Vec<PatchListEntry> {
    let mut entries = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            continue;
        }
        let mut parts = line.splitn(2, char::is_whitespace);
        let Some(index_str) = parts.next() else {
            continue;
        };
        let Ok(index) = index_str.parse::<u32>() else {
            continue;
        };
        let filename = parts.next().unwrap_or("").trim().to_string();
        if filename.is_empty() {
            continue;
        }
        entries.push(PatchListEntry { index, filename });
    }
    entries
}

/// Selects entries with `index > local_version`, ascending.
pub fn get_patches_to_apply(list: &[PatchListEntry], local_version: u32) -> Vec<PatchListEntry> {
    let mut due: Vec<PatchListEntry> = list
        .iter()
        .filter(|e| e.index > local_version)
        .cloned()
        .collect();
    due.sort_by_key(|e| e.index);
    due
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_patch_list_ignoring_comments() {
        let text = "//869 a.thor\n870 b.thor\n871 c.thor\n";
        let list = parse_patch_list(text);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].index, 870);
        assert_eq!(list[1].index, 871);
    }

    #[test]
    fn selects_only_patches_past_local_version() {
        let text = "//869 a.thor\n870 b.thor\n871 c.thor\n";
        let list = parse_patch_list(text);
        let due = get_patches_to_apply(&list, 870);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].filename, "c.thor");
    }

    #[test]
    fn version_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plist.version");
        write_local_version(&path, 42).unwrap();
        assert_eq!(read_local_version(&path).unwrap(), 42);
    }

    #[test]
    fn missing_version_file_reads_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plist.version");
        assert_eq!(read_local_version(&path).unwrap(), 0);
    }
}
