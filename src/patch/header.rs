use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Read;

use crate::error::{CoreError, Result};

pub const MAGIC_MODERN: &[u8; 24] = b"ASSF (C) 2007 Aeomin DEV";
pub const MAGIC_LEGACY: &[u8; 48] = b"ASSF (C) 2007 Aeokan (aeokan@gmail.com)";

pub const MODE_SINGLE_FILE: u16 = 33;
pub const MODE_MULTIPLE_FILES: u16 = 48;

pub const ENTRY_FLAG_REMOVE: u8 = 0x01;

#[derive(Debug, Clone)]
pub struct PatchHeader {
    pub use_grf_merging: bool,
    pub file_count: u32,
    pub mode: u16,
    pub target_arc_name: String,
}

impl PatchHeader {
    pub fn read<R: Read>(r: &mut R) -> Result<Self> {
        let mut probe = [0u8; 24];
        r.read_exact(&mut probe)
            .map_err(|_| CoreError::CorruptHeader("truncated magic".into()))?;

        if &probe != MAGIC_MODERN {
            // Not modern; probe the full legacy magic (48 bytes) instead.
            let mut rest = [0u8; 24];
            r.read_exact(&mut rest)
                .map_err(|_| CoreError::CorruptHeader("truncated legacy magic".into()))?;
            let mut full = [0u8; 48];
            full[..24].copy_from_slice(&probe);
            full[24..].copy_from_slice(&rest);
            if &full != MAGIC_LEGACY {
                return Err(CoreError::InvalidMagic(Default::default()));
            }
        }

        let use_grf_merging = r
            .read_u8()
            .map_err(|_| CoreError::CorruptHeader("truncated merge flag".into()))?
            == 1;
        let file_count = r
            .read_u32::<LittleEndian>()
            .map_err(|_| CoreError::CorruptHeader("truncated file count".into()))?;
        let mode = r
            .read_u16::<LittleEndian>()
            .map_err(|_| CoreError::CorruptHeader("truncated mode".into()))?;

        if mode != MODE_SINGLE_FILE && mode != MODE_MULTIPLE_FILES {
            return Err(CoreError::InvalidMode(mode));
        }

        let name_size = r
            .read_u8()
            .map_err(|_| CoreError::CorruptHeader("truncated name size".into()))?;
        let mut name_bytes = vec![0u8; name_size as usize];
        r.read_exact(&mut name_bytes)
            .map_err(|_| CoreError::CorruptHeader("truncated target name".into()))?;
        let target_arc_name = String::from_utf8_lossy(&name_bytes).into_owned();

        Ok(PatchHeader {
            use_grf_merging,
            file_count,
            mode,
            target_arc_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn build(magic: &[u8], mode: u16, name: &str) -> Vec<u8> {
        let mut buf = magic.to_vec();
        buf.push(1);
        buf.extend_from_slice(&5u32.to_le_bytes());
        buf.extend_from_slice(&mode.to_le_bytes());
        buf.push(name.len() as u8);
        buf.extend_from_slice(name.as_bytes());
        buf
    }

    #[test]
    fn parses_modern_header() {
        let buf = build(MAGIC_MODERN, MODE_MULTIPLE_FILES, "data.grf");
        let mut cursor = Cursor::new(buf);
        let header = PatchHeader::read(&mut cursor).unwrap();
        assert!(header.use_grf_merging);
        assert_eq!(header.file_count, 5);
        assert_eq!(header.mode, MODE_MULTIPLE_FILES);
        assert_eq!(header.target_arc_name, "data.grf");
    }

    #[test]
    fn parses_legacy_header() {
        let buf = build(MAGIC_LEGACY, MODE_SINGLE_FILE, "");
        let mut cursor = Cursor::new(buf);
        let header = PatchHeader::read(&mut cursor).unwrap();
        assert_eq!(header.mode, MODE_SINGLE_FILE);
        assert_eq!(header.target_arc_name, "");
    }

    #[test]
    fn rejects_invalid_mode() {
        let buf = build(MAGIC_MODERN, 99, "");
        let mut cursor = Cursor::new(buf);
        assert!(matches!(
            PatchHeader::read(&mut cursor),
            Err(CoreError::InvalidMode(99))
        ));
    }
}
