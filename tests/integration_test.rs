use std::fs;
use std::io::Write;

use arcweave_core::arc::header::VERSION_200;
use arcweave_core::arc::ArcEngine;
use arcweave_core::merge::{self, MergeMode, MergeOptions};
use arcweave_core::patch::header::{MAGIC_MODERN, MODE_MULTIPLE_FILES};
use arcweave_core::{handle_pack, handle_unpack};
use tempfile::tempdir;

#[test]
fn pack_then_unpack_round_trips() {
    let dir = tempdir().unwrap();
    let input_dir = dir.path().join("source");
    fs::create_dir_all(&input_dir).unwrap();
    fs::write(input_dir.join("test.txt"), "test").unwrap();

    let output_path = dir.path().join("test.arc");
    handle_pack(&input_dir, &output_path, false, VERSION_200).unwrap();
    assert!(output_path.exists());

    let unpack_dir = dir.path().join("unpacked");
    let extracted = handle_unpack(&output_path, &unpack_dir).unwrap();
    assert_eq!(extracted, 1);
    assert_eq!(fs::read_to_string(unpack_dir.join("test.txt")).unwrap(), "test");
}

#[test]
fn pack_with_compression_round_trips() {
    let dir = tempdir().unwrap();
    let input_dir = dir.path().join("source");
    fs::create_dir_all(&input_dir).unwrap();
    let payload = "hello hello hello ".repeat(64);
    fs::write(input_dir.join("big.txt"), &payload).unwrap();

    let output_path = dir.path().join("test.arc");
    handle_pack(&input_dir, &output_path, true, VERSION_200).unwrap();

    let mut arc = ArcEngine::open(&output_path).unwrap();
    let data = arc.extract_file("big.txt").unwrap();
    assert_eq!(String::from_utf8(data).unwrap(), payload);
}

fn compress_zlib(data: &[u8]) -> Vec<u8> {
    use flate2::{write::ZlibEncoder, Compression};
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn compress_raw_deflate(data: &[u8]) -> Vec<u8> {
    use flate2::{write::DeflateEncoder, Compression};
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Builds a minimal multi-entry patch archive with one new file and one
/// removal, targeting `target_name`.
fn build_multi_patch(path: &std::path::Path, target_name: &str, new_file: (&str, &[u8]), removed_file: &str) {
    let header_end = MAGIC_MODERN.len() as u64 + 1 + 4 + 2 + 1 + target_name.len() as u64;
    let table_offset = header_end + 4 + 4; // right after tableCompressedSize + tableOffset fields
    let compressed_payload = compress_zlib(new_file.1);

    let table_for = |payload_offset: u32| -> Vec<u8> {
        let mut records = Vec::new();
        records.push(new_file.0.as_bytes().len() as u8);
        records.extend_from_slice(new_file.0.as_bytes());
        records.push(0); // flags: not removed
        records.extend_from_slice(&payload_offset.to_le_bytes());
        records.extend_from_slice(&(compressed_payload.len() as u32).to_le_bytes());
        records.extend_from_slice(&(new_file.1.len() as u32).to_le_bytes());

        records.push(removed_file.as_bytes().len() as u8);
        records.extend_from_slice(removed_file.as_bytes());
        records.push(0x01); // ENTRY_FLAG_REMOVE
        records
    };

    // The only value that depends on the compressed table's own length is
    // the payload offset embedded inside it; converge on a fixed point
    // rather than patching compressed bytes after the fact.
    let mut payload_offset = table_offset as u32;
    let mut table_compressed = compress_raw_deflate(&table_for(payload_offset));
    for _ in 0..4 {
        let candidate = table_offset as u32 + table_compressed.len() as u32;
        if candidate == payload_offset {
            break;
        }
        payload_offset = candidate;
        table_compressed = compress_raw_deflate(&table_for(payload_offset));
    }
    assert_eq!(payload_offset, table_offset as u32 + table_compressed.len() as u32);

    let mut file = fs::File::create(path).unwrap();
    file.write_all(MAGIC_MODERN).unwrap();
    file.write_all(&[1]).unwrap(); // useGrfMerging
    file.write_all(&2u32.to_le_bytes()).unwrap(); // fileCount
    file.write_all(&MODE_MULTIPLE_FILES.to_le_bytes()).unwrap();
    file.write_all(&[target_name.len() as u8]).unwrap();
    file.write_all(target_name.as_bytes()).unwrap();
    file.write_all(&(table_compressed.len() as u32).to_le_bytes()).unwrap();
    file.write_all(&(table_offset as u32).to_le_bytes()).unwrap();
    file.write_all(&table_compressed).unwrap();
    file.write_all(&compressed_payload).unwrap();
}

#[test]
fn apply_patch_adds_and_removes_entries_in_arc() {
    let dir = tempdir().unwrap();
    let arc_path = dir.path().join("client.arc");

    let mut arc = ArcEngine::create(&arc_path, VERSION_200).unwrap();
    arc.add_file("old.txt", b"stale content", false).unwrap();
    arc.save(None).unwrap();
    drop(arc);

    let patch_path = dir.path().join("001.thor");
    build_multi_patch(&patch_path, "client.arc", ("new.txt", b"patched content"), "old.txt");

    let options = MergeOptions {
        mode: MergeMode::Auto,
        extract_directory: dir.path().to_path_buf(),
        target_grf: None,
        create_backup: false,
        verify_after_patch: false,
        continue_on_error: false,
    };
    let stats = merge::apply_patch(&patch_path, &options).unwrap();
    assert_eq!(stats.files_applied, 1);
    assert_eq!(stats.files_removed, 1);

    let mut reopened = ArcEngine::open(&arc_path).unwrap();
    assert!(!reopened.file_exists("old.txt"));
    let data = reopened.extract_file("new.txt").unwrap();
    assert_eq!(data, b"patched content");
}

#[test]
fn patch_list_and_version_file_drive_which_patches_apply() {
    let dir = tempdir().unwrap();
    let version_path = dir.path().join("plist.version");
    merge::write_local_version(&version_path, 870).unwrap();

    let list_text = "//869 a.thor\n870 b.thor\n871 c.thor\n";
    let entries = merge::parse_patch_list(list_text);
    let local_version = merge::read_local_version(&version_path).unwrap();
    let due = merge::get_patches_to_apply(&entries, local_version);

    assert_eq!(due.len(), 1);
    assert_eq!(due[0].filename, "c.thor");
}
