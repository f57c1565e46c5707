use std::path::PathBuf;

use clap::Parser as _;
use path_absolutize::Absolutize;
use tap::Tap;

use arcweave_core::arc::ArcEngine;
use arcweave_core::cli::{Cli, Commands};
use arcweave_core::error::CoreError;
use arcweave_core::merge::{self, ApplyStats, MergeMode, MergeOptions};
use arcweave_core::patch::PatchArchive;
use arcweave_core::{handle_pack, handle_unpack};

fn parse_version(s: &str) -> Result<u32, CoreError> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(s, 16).map_err(|_| CoreError::InvalidOperation(format!("bad version: {s}")))
}

fn main() -> Result<(), CoreError> {
    _ = pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .parse_default_env()
        .try_init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Pack {
            input,
            output,
            compress,
            version,
        } => {
            let version = parse_version(&version)?;
            let output_path = output.unwrap_or_else(|| {
                PathBuf::from(
                    input
                        .absolutize()
                        .expect("cannot absolutize input path")
                        .as_os_str()
                        .to_owned()
                        .tap_mut(|x| x.push(".arc")),
                )
            });
            if output_path == input {
                return Err(CoreError::CannotDeriveOutputPath(input));
            }
            handle_pack(&input, &output_path, compress, version)?;
        }
        Commands::Unpack { input, output } => {
            let output_dir = output.unwrap_or_else(|| {
                let mut derived = input.with_extension("");
                if derived.file_name().is_none() || derived.file_name().unwrap().is_empty() {
                    derived = input
                        .file_name()
                        .map(|name| input.with_file_name(name))
                        .unwrap_or_else(|| PathBuf::from("output_dir"));
                }
                if derived == input {
                    derived.set_file_name(format!(
                        "{}_unpacked",
                        derived.file_name().unwrap_or_default().to_string_lossy()
                    ));
                }
                derived
            });
            if output_dir == input {
                return Err(CoreError::CannotDeriveOutputPath(input));
            }
            handle_unpack(&input, &output_dir)?;
        }
        Commands::List { input, filter } => {
            let arc = ArcEngine::open(&input)?;
            let names = match &filter {
                Some(pattern) => arc.list_matching(pattern),
                None => arc.get_file_list(),
            };
            for name in names {
                println!("{name}");
            }
        }
        Commands::Verify { input } => {
            let mut arc = ArcEngine::open(&input)?;
            let failures = arc.verify_integrity(None)?;
            if failures.is_empty() {
                println!("all {} entries verified ok", arc.get_file_count());
            } else {
                for name in &failures {
                    eprintln!("FAILED: {name}");
                }
                return Err(CoreError::IntegrityFailed(failures.join(", ")));
            }
        }
        Commands::PatchInfo { input } => {
            let info = PatchArchive::probe(&input)?;
            println!("useGrfMerging: {}", info.use_grf_merging);
            println!("targetArcName: {}", info.target_arc_name);
            println!("fileCount: {}", info.file_count);
        }
        Commands::ApplyPatches {
            patches,
            extract_directory,
            target_grf,
            disk,
            backup,
            verify,
            continue_on_error,
        } => {
            let options = MergeOptions {
                mode: if disk { MergeMode::DiskExtract } else { MergeMode::Auto },
                extract_directory,
                target_grf,
                create_backup: backup,
                verify_after_patch: verify,
                continue_on_error,
            };
            let ApplyStats {
                files_applied,
                files_removed,
                files_failed,
            } = merge::apply_patches(&patches, &options)?;
            println!("applied {files_applied}, removed {files_removed}, failed {files_failed}");
        }
    }

    Ok(())
}
