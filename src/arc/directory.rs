//! Parsing and serialization of the inflated directory table. V1
//! (`0x102`/`0x103`) and V2+ records differ in layout on read; writes
//! always use the V2+ layout regardless of the loaded version, which is
//! what upgrades a legacy archive the first time it's saved.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::arc::entry::{align8, ArcEntry, FLAG_FILE};
use crate::des;
use crate::normalize::normalize;

/// Parses a V1 (`0x102`/`0x103`) directory table. Stops silently on
/// truncation rather than aborting the whole open.
pub fn parse_v1(table: &[u8]) -> Vec<ArcEntry> {
    let mut cursor = Cursor::new(table);
    let mut entries = Vec::new();

    loop {
        let Some(raw_name) = read_cstring(&mut cursor) else {
            break;
        };
        if raw_name.is_empty() {
            break;
        }

        let Ok(size_compressed) = cursor.read_u32::<LittleEndian>() else {
            break;
        };
        let Ok(size_compressed_aligned) = cursor.read_u32::<LittleEndian>() else {
            break;
        };
        let Ok(size_decompressed) = cursor.read_u32::<LittleEndian>() else {
            break;
        };
        let Ok(flags) = cursor.read_u8() else {
            break;
        };
        if skip(&mut cursor, 3).is_err() {
            break;
        }
        let Ok(offset) = cursor.read_u32::<LittleEndian>() else {
            break;
        };

        let filename = match des::decode_file_name(&raw_name) {
            Ok(name) => normalize(&name),
            Err(_) => continue,
        };

        let is_encrypted = flags & (crate::arc::entry::FLAG_ENCRYPT_MIXED
            | crate::arc::entry::FLAG_ENCRYPT_HEADER)
            != 0;
        let cycle = if is_encrypted {
            (size_compressed / 3).max(1) as i32
        } else {
            -1
        };

        entries.push(ArcEntry {
            filename,
            size_compressed,
            size_compressed_aligned,
            size_decompressed,
            offset,
            flags,
            cycle,
            is_new: false,
            is_modified: false,
            is_deleted: false,
            cached_data: None,
        });
    }

    entries
}

/// Parses a V2+ directory table. No DES, no padding.
pub fn parse_v2(table: &[u8]) -> Vec<ArcEntry> {
    let mut cursor = Cursor::new(table);
    let mut entries = Vec::new();

    loop {
        let Some(raw_name) = read_cstring(&mut cursor) else {
            break;
        };
        if raw_name.is_empty() {
            break;
        }

        let Ok(size_compressed) = cursor.read_u32::<LittleEndian>() else {
            break;
        };
        let Ok(size_compressed_aligned) = cursor.read_u32::<LittleEndian>() else {
            break;
        };
        let Ok(size_decompressed) = cursor.read_u32::<LittleEndian>() else {
            break;
        };
        let Ok(flags) = cursor.read_u8() else {
            break;
        };
        let Ok(offset) = cursor.read_u32::<LittleEndian>() else {
            break;
        };

        let filename = normalize(&String::from_utf8_lossy(&raw_name));

        entries.push(ArcEntry {
            filename,
            size_compressed,
            size_compressed_aligned,
            size_decompressed,
            offset,
            flags,
            cycle: -1,
            is_new: false,
            is_modified: false,
            is_deleted: false,
            cached_data: None,
        });
    }

    entries
}

/// Serializes non-deleted entries in V2+ layout, used by both QuickMerge
/// and FullRepack.
pub fn serialize<'a>(entries: impl Iterator<Item = &'a ArcEntry>) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries {
        if entry.is_deleted {
            continue;
        }
        out.extend_from_slice(entry.filename.as_bytes());
        out.push(0);
        out.write_u32::<LittleEndian>(entry.size_compressed).unwrap();
        out.write_u32::<LittleEndian>(entry.size_compressed_aligned)
            .unwrap();
        out.write_u32::<LittleEndian>(entry.size_decompressed).unwrap();
        out.push(entry.flags);
        out.write_u32::<LittleEndian>(entry.offset).unwrap();
    }
    out
}

/// Ensures an entry freshly created by `addFile` carries the regular-file
/// flag, as every live directory record must.
pub fn default_flags() -> u8 {
    FLAG_FILE
}

pub fn aligned(size: u32) -> u32 {
    align8(size)
}

fn read_cstring(cursor: &mut Cursor<&[u8]>) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        match std::io::Read::read(cursor, &mut byte) {
            Ok(0) => return if buf.is_empty() { None } else { Some(buf) },
            Ok(_) => {
                if byte[0] == 0 {
                    return Some(buf);
                }
                buf.push(byte[0]);
            }
            Err(_) => return None,
        }
    }
}

fn skip(cursor: &mut Cursor<&[u8]>, n: u64) -> std::io::Result<()> {
    cursor.set_position(cursor.position() + n);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(name: &str, offset: u32) -> ArcEntry {
        ArcEntry {
            filename: name.to_string(),
            size_compressed: 16,
            size_compressed_aligned: 16,
            size_decompressed: 16,
            offset,
            flags: FLAG_FILE,
            cycle: -1,
            is_new: false,
            is_modified: false,
            is_deleted: false,
            cached_data: None,
        }
    }

    #[test]
    fn v2_round_trips() {
        let entries = vec![sample_entry("data\\a.txt", 0), sample_entry("data\\b.txt", 16)];
        let table = serialize(entries.iter());
        let parsed = parse_v2(&table);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].filename, "data\\a.txt");
        assert_eq!(parsed[1].offset, 16);
    }

    #[test]
    fn deleted_entries_are_dropped_on_serialize() {
        let mut entries = vec![sample_entry("a", 0), sample_entry("b", 16)];
        entries[1].is_deleted = true;
        let table = serialize(entries.iter());
        let parsed = parse_v2(&table);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].filename, "a");
    }

    #[test]
    fn truncated_table_discards_partial_entry() {
        let entries = vec![sample_entry("data\\a.txt", 0)];
        let mut table = serialize(entries.iter());
        table.truncate(table.len() - 2);
        let parsed = parse_v2(&table);
        assert!(parsed.is_empty());
    }
}
