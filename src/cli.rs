use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Packs a directory into an ARC archive
    Pack {
        /// Input directory path
        #[arg(required = true)]
        input: PathBuf,

        /// Output archive file path (optional)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Enable per-entry deflate compression
        #[arg(short, long, default_value_t = false)]
        compress: bool,

        /// ARC version to write (0x200 or 0x300)
        #[arg(long, default_value = "0x200")]
        version: String,
    },
    /// Unpacks an ARC archive into a directory
    Unpack {
        /// Input archive file path
        #[arg(required = true)]
        input: PathBuf,

        /// Output directory path (optional)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Lists entries in an ARC archive, optionally filtered by glob
    List {
        input: PathBuf,

        /// GRF-style glob, e.g. "data\\sprite\\*.spr"
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Re-reads and re-inflates every entry, reporting failures
    Verify { input: PathBuf },
    /// Prints a patch archive's header without reading its full directory
    PatchInfo { input: PathBuf },
    /// Applies one or more patch archives against an ARC or directory
    ApplyPatches {
        /// One or more .thor patch files, applied in order given
        #[arg(required = true)]
        patches: Vec<PathBuf>,

        /// Directory patch-relative paths resolve against
        #[arg(short, long, default_value = ".")]
        extract_directory: PathBuf,

        /// Fallback ARC name when a patch doesn't name its own target
        #[arg(long)]
        target_grf: Option<String>,

        /// Force extraction to disk instead of following the patch's own mode
        #[arg(long, default_value_t = false)]
        disk: bool,

        /// Copy the target ARC to `<name>.backup` before applying
        #[arg(long, default_value_t = false)]
        backup: bool,

        /// Re-verify integrity after applying
        #[arg(long, default_value_t = false)]
        verify: bool,

        /// Keep applying subsequent patches after one fails
        #[arg(long, default_value_t = false)]
        continue_on_error: bool,
    },
}
