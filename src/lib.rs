pub mod arc;
pub mod cli;
pub mod codec;
pub mod des;
pub mod error;
pub mod merge;
pub mod normalize;
pub mod patch;

use std::path::Path;

use log::info;

use arc::ArcEngine;
use error::Result;

/// Packs a directory tree into a fresh ARC archive.
pub fn handle_pack(
    input_dir: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    compress: bool,
    version: u32,
) -> Result<()> {
    let input_dir = input_dir.as_ref();
    let output_path = output_path.as_ref();
    info!("packing {input_dir:?} into {output_path:?} (compress={compress}, version=0x{version:x})");

    let mut arc = ArcEngine::create(output_path, version)?;
    let (added, failed) = arc.add_directory("", input_dir, compress, None)?;
    arc.save(None)?;

    info!("pack finished: {added} files added, {failed} failed");
    Ok(())
}

/// Unpacks every live entry of an ARC archive to a directory.
pub fn handle_unpack(input_path: impl AsRef<Path>, output_dir: impl AsRef<Path>) -> Result<usize> {
    let input_path = input_path.as_ref();
    let output_dir = output_dir.as_ref();
    info!("unpacking {input_path:?} into {output_dir:?}");

    let arc = ArcEngine::open(input_path)?;
    let extracted = arc.extract_all_parallel(output_dir)?;

    info!("unpack finished: {extracted} files extracted");
    Ok(extracted)
}

/// Seam for a platform-specific MD5 helper, described only as an
/// interface. No implementation is bundled; callers that need file
/// digests supply their own.
pub trait FileDigest {
    fn digest(&self, data: &[u8]) -> String;
}

/// Default digest: returns an empty string, matching "absence is
/// acceptable" for the MD5 collaborator interface.
pub struct NoDigest;

impl FileDigest for NoDigest {
    fn digest(&self, _data: &[u8]) -> String {
        String::new()
    }
}
