// Path policy: which files count as inputs and where outputs go

use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::core::errors::{ConfigError, ConfigResult, PipelineError, PipelineResult};

/// Directory name the scanned originals live under when mirroring
pub const ORIGINALS_DIR: &str = "02-original";
/// Sibling directory mirrored outputs are written to
pub const MIRRORED_OUT_DIR: &str = "03-for-import";

/// Deterministic output location: same base file name, different parent.
///
/// Two inputs sharing a base name under different subdirectories collide
/// here; that limitation is accepted, not solved.
pub fn output_path(input: &Path, out_dir: &Path) -> PipelineResult<PathBuf> {
    input
        .file_name()
        .map(|name| out_dir.join(name))
        .ok_or_else(|| PipelineError::InvalidInputPath(input.to_path_buf()))
}

/// Build the job list.
///
/// A single directory argument is listed without recursing; anything else is
/// treated as an explicit file list. Only files carrying the exact,
/// case-sensitive extension qualify.
pub fn discover_images(args: &[PathBuf], extension: &str) -> ConfigResult<Vec<PathBuf>> {
    if args.is_empty() {
        return Err(ConfigError::InvalidInputArguments);
    }

    let mut images = Vec::new();
    if args[0].is_dir() {
        if args.len() > 1 {
            return Err(ConfigError::InvalidInputArguments);
        }
        let entries = fs::read_dir(&args[0]).map_err(|source| ConfigError::ReadInput {
            path: args[0].clone(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| ConfigError::ReadInput {
                path: args[0].clone(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() && has_extension(&path, extension) {
                images.push(path);
            }
        }
        images.sort();
    } else {
        for path in args {
            if has_extension(path, extension) {
                images.push(path.clone());
            }
        }
    }

    if images.is_empty() {
        return Err(ConfigError::NoMatchingImages {
            extension: extension.to_string(),
        });
    }
    Ok(images)
}

/// Case-sensitive suffix match, so `.JPG` does not pick up `.jpg`.
fn has_extension(path: &Path, extension: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.len() > extension.len() && name.ends_with(extension))
        .unwrap_or(false)
}

/// Derive the mirrored output directory from the first input's parent: the
/// `02-original` path segment becomes `03-for-import`.
///
/// Opt-in and deliberately strict about its environment: the mirror root
/// must already exist where the tool is run from.
pub fn mirror_out_dir(first_input: &Path) -> ConfigResult<PathBuf> {
    let mirror_root = Path::new(MIRRORED_OUT_DIR);
    if !mirror_root.exists() {
        return Err(ConfigError::MirrorTargetMissing(mirror_root.to_path_buf()));
    }

    let parent = first_input.parent().unwrap_or_else(|| Path::new("."));
    let derived = replace_originals_segment(parent)
        .ok_or_else(|| ConfigError::MirrorDerivationFailed(parent.to_path_buf()))?;

    fs::create_dir_all(&derived).map_err(|source| ConfigError::CreateOutputDir {
        path: derived.clone(),
        source,
    })?;
    info!("output directory: {}", derived.display());
    Ok(derived)
}

/// Swap the first `02-original` component for `03-for-import`, or None when
/// the path has no such segment to swap.
fn replace_originals_segment(dir: &Path) -> Option<PathBuf> {
    let mut replaced = false;
    let derived: PathBuf = dir
        .components()
        .map(|component| {
            if !replaced && component.as_os_str() == ORIGINALS_DIR {
                replaced = true;
                std::ffi::OsStr::new(MIRRORED_OUT_DIR)
            } else {
                component.as_os_str()
            }
        })
        .collect();
    replaced.then_some(derived)
}
