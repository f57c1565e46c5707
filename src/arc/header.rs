use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::{CoreError, Result};

pub const HEADER_SIZE: u64 = 46;
pub const MAGIC: &[u8; 15] = b"Master of Magic";
const MAGIC_FIELD_SIZE: usize = 16;
const KEY_SIZE: usize = 14;

pub const VERSION_102: u32 = 0x102;
pub const VERSION_103: u32 = 0x103;
pub const VERSION_200: u32 = 0x200;
pub const VERSION_300: u32 = 0x300;

pub fn is_v1(version: u32) -> bool {
    version == VERSION_102 || version == VERSION_103
}

pub fn is_supported(version: u32) -> bool {
    matches!(version, VERSION_102 | VERSION_103 | VERSION_200 | VERSION_300)
}

/// The fixed 46-byte ARC header.
#[derive(Debug, Clone)]
pub struct ArcHeader {
    pub key: [u8; KEY_SIZE],
    pub table_offset: u32,
    pub seed: i32,
    pub raw_file_count: i32,
    pub version: u32,
}

impl ArcHeader {
    pub fn new(version: u32) -> Self {
        ArcHeader {
            key: [0u8; KEY_SIZE],
            table_offset: 0,
            seed: 0,
            raw_file_count: 7,
            version,
        }
    }

    /// `rawFileCount = realFileCount + seed + 7`.
    pub fn set_real_file_count(&mut self, real_file_count: i32) {
        self.raw_file_count = real_file_count + self.seed + 7;
    }

    pub fn real_file_count(&self) -> i32 {
        self.raw_file_count - self.seed - 7
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Self> {
        let mut magic = [0u8; MAGIC_FIELD_SIZE];
        r.read_exact(&mut magic)
            .map_err(|_| CoreError::CorruptHeader("truncated magic".into()))?;
        if &magic[..MAGIC.len()] != MAGIC {
            return Err(CoreError::InvalidMagic(Default::default()));
        }

        let mut key = [0u8; KEY_SIZE];
        r.read_exact(&mut key)
            .map_err(|_| CoreError::CorruptHeader("truncated key".into()))?;

        let table_offset = r
            .read_u32::<LittleEndian>()
            .map_err(|_| CoreError::CorruptHeader("truncated table offset".into()))?;
        let seed = r
            .read_i32::<LittleEndian>()
            .map_err(|_| CoreError::CorruptHeader("truncated seed".into()))?;
        let raw_file_count = r
            .read_i32::<LittleEndian>()
            .map_err(|_| CoreError::CorruptHeader("truncated file count".into()))?;
        let version = r
            .read_u32::<LittleEndian>()
            .map_err(|_| CoreError::CorruptHeader("truncated version".into()))?;

        if !is_supported(version) {
            return Err(CoreError::UnsupportedVersion(version));
        }

        Ok(ArcHeader {
            key,
            table_offset,
            seed,
            raw_file_count,
            version,
        })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        let mut magic_field = [0u8; MAGIC_FIELD_SIZE];
        magic_field[..MAGIC.len()].copy_from_slice(MAGIC);
        w.write_all(&magic_field)?;
        w.write_all(&self.key)?;
        w.write_u32::<LittleEndian>(self.table_offset)?;
        w.write_i32::<LittleEndian>(self.seed)?;
        w.write_i32::<LittleEndian>(self.raw_file_count)?;
        w.write_u32::<LittleEndian>(self.version)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips() {
        let mut header = ArcHeader::new(VERSION_200);
        header.table_offset = 1234;
        header.seed = 3;
        header.set_real_file_count(9);

        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE as usize);

        let mut cursor = Cursor::new(buf);
        let parsed = ArcHeader::read(&mut cursor).unwrap();
        assert_eq!(parsed.table_offset, 1234);
        assert_eq!(parsed.seed, 3);
        assert_eq!(parsed.raw_file_count, 9 + 3 + 7);
        assert_eq!(parsed.version, VERSION_200);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = vec![0u8; HEADER_SIZE as usize];
        buf[..4].copy_from_slice(b"nope");
        let mut cursor = Cursor::new(buf);
        assert!(matches!(
            ArcHeader::read(&mut cursor),
            Err(CoreError::InvalidMagic(_))
        ));
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut header = ArcHeader::new(VERSION_200);
        header.version = 0x999;
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        assert!(matches!(
            ArcHeader::read(&mut cursor),
            Err(CoreError::UnsupportedVersion(0x999))
        ));
    }
}
