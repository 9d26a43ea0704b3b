//! Scene identification
//!
//! Every supported vendor encoding registers one handler: a filename
//! pattern plus a metadata parser. [`identify`] tries the handlers in the
//! registry order; a handler that cannot match or parse the input fails
//! with a recoverable error and the next one is tried. Explicitly
//! unsupported product variants abort identification immediately, and
//! exhausting the registry is the terminal "format not supported" failure.

pub mod ceos_ers;
pub mod ceos_psr;
pub mod esa;
pub mod safe;
pub mod tsx;

use crate::io::archive;
use crate::types::{SarError, SarResult, Scene};
use regex::Regex;
use std::path::{Path, PathBuf};

/// A handler entry: display name plus parsing constructor.
type HandlerFn = fn(&Path) -> SarResult<Scene>;

/// Registry of format handlers, tried in this order.
pub const HANDLERS: &[(&str, HandlerFn)] = &[
    ("CEOS_ERS", ceos_ers::parse),
    ("CEOS_PSR", ceos_psr::parse),
    ("ESA", esa::parse),
    ("SAFE", safe::parse),
    ("TSX", tsx::parse),
];

/// Return the metadata record of the given scene.
pub fn identify(scene: &Path) -> SarResult<Scene> {
    for (name, handler) in HANDLERS {
        match handler(scene).and_then(|parsed| {
            parsed.meta.validate()?;
            Ok(parsed)
        }) {
            Ok(parsed) => {
                log::debug!("{} identified as {name}", scene.display());
                return Ok(parsed);
            }
            Err(err) if err.is_recoverable() => {
                log::debug!("{name} does not apply to {}: {err}", scene.display());
            }
            Err(err) => return Err(err),
        }
    }
    Err(SarError::FormatNotSupported(scene.to_path_buf()))
}

/// Identify a batch of scenes, silently skipping unidentifiable inputs.
/// Input order is preserved among the successes.
pub fn identify_many(scenes: &[PathBuf]) -> Vec<Scene> {
    let mut records = Vec::new();
    for scene in scenes {
        match identify(scene) {
            Ok(record) => records.push(record),
            Err(err) => {
                log::debug!("skipping {}: {err}", scene.display());
            }
        }
    }
    records
}

/// Resolve exactly one representative file matching the handler's naming
/// convention. Zero matches means the handler does not apply; several
/// matches are an ambiguity, also recoverable.
pub(crate) fn examine(
    scene: &Path,
    pattern: &Regex,
    include_folders: bool,
    handler: &'static str,
) -> SarResult<String> {
    let mut files = archive::find_files(scene, pattern, include_folders)?;
    match files.len() {
        1 => Ok(files.remove(0)),
        0 => Err(SarError::NotFound {
            scene: scene.to_path_buf(),
            handler,
        }),
        _ => Err(SarError::Ambiguous {
            scene: scene.to_path_buf(),
            candidates: files,
        }),
    }
}

/// Name to match a resolved member against a handler pattern: the member
/// basename, or the scene's own file name when the scene itself is the
/// match (standalone product files resolve to the empty member).
pub(crate) fn member_name<'a>(scene: &'a Path, member: &'a str) -> &'a str {
    if member.is_empty() {
        scene.file_name().and_then(|n| n.to_str()).unwrap_or_default()
    } else {
        basename(member)
    }
}

/// Basename of a member path or scene path, for pattern matching.
pub(crate) fn basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmatched_input_is_format_not_supported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.txt"), b"not a scene").unwrap();
        let err = identify(dir.path()).unwrap_err();
        assert!(matches!(err, SarError::FormatNotSupported(_)));
    }

    #[test]
    fn identify_many_skips_failures() {
        let dir = tempfile::tempdir().unwrap();
        let scenes = vec![dir.path().join("nonsense"), dir.path().join("more")];
        assert!(identify_many(&scenes).is_empty());
    }

    #[test]
    fn basename_strips_member_directories() {
        assert_eq!(basename("scene/annotation/a.xml"), "a.xml");
        assert_eq!(basename("scene.SAFE/"), "scene.SAFE");
        assert_eq!(basename("plain"), "plain");
    }
}
