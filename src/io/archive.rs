//! Scene container access
//!
//! A scene is an unpacked directory, a zip archive, a (optionally gzipped)
//! tar archive, or a single product file (the form ESA distributes ASAR and
//! ERS products in). Member reads open and close the container on every
//! call; nothing is cached across reads, so long batch scans never hold a
//! stale handle.

use crate::types::{SarError, SarResult};
use flate2::read::GzDecoder;
use regex::Regex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;
use zip::ZipArchive;

/// Physical packaging of a scene
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Dir,
    Zip,
    Tar,
    /// gzip-compressed tar
    TarGz,
    /// a single product file that is not an archive
    File,
}

/// Determine how a scene is packaged.
pub fn container_of(scene: &Path) -> SarResult<Container> {
    if scene.is_dir() {
        return Ok(Container::Dir);
    }
    let mut file = File::open(scene)?;
    let mut magic = [0u8; 4];
    let n = file.read(&mut magic)?;
    if n >= 4 && magic == [0x50, 0x4b, 0x03, 0x04] {
        return Ok(Container::Zip);
    }
    if n >= 2 && magic[..2] == [0x1f, 0x8b] {
        return Ok(Container::TarGz);
    }
    // plain tar carries "ustar" at offset 257
    let mut ustar = [0u8; 5];
    file.seek(SeekFrom::Start(257))?;
    if file.read(&mut ustar)? == 5 && &ustar == b"ustar" {
        return Ok(Container::Tar);
    }
    Ok(Container::File)
}

/// Whether the scene is packed into a single archive file.
pub fn is_compressed(scene: &Path) -> SarResult<bool> {
    Ok(matches!(
        container_of(scene)?,
        Container::Zip | Container::Tar | Container::TarGz
    ))
}

fn tar_reader(scene: &Path, container: Container) -> SarResult<tar::Archive<Box<dyn Read>>> {
    let file = File::open(scene)?;
    let reader: Box<dyn Read> = match container {
        Container::TarGz => Box::new(GzDecoder::new(file)),
        _ => Box::new(file),
    };
    Ok(tar::Archive::new(reader))
}

/// Enumerate member names whose basename matches a pattern.
///
/// Member names are relative to the scene root. For unpacked scenes the
/// directory itself is included when its own name matches and folders are
/// requested. A standalone product file whose own name matches is its sole
/// member, addressed by the empty member name.
pub fn find_files(scene: &Path, pattern: &Regex, include_folders: bool) -> SarResult<Vec<String>> {
    let mut members = Vec::new();
    match container_of(scene)? {
        Container::Dir => {
            for entry in WalkDir::new(scene).into_iter().filter_map(|e| e.ok()) {
                let path = entry.path();
                if path == scene {
                    continue;
                }
                let is_dir = path.is_dir();
                if is_dir && !include_folders {
                    continue;
                }
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    if pattern.is_match(name) {
                        if let Ok(rel) = path.strip_prefix(scene) {
                            members.push(rel.to_string_lossy().to_string());
                        }
                    }
                }
            }
            if include_folders {
                if let Some(name) = scene.file_name().and_then(|n| n.to_str()) {
                    if pattern.is_match(name) {
                        members.push(String::new());
                    }
                }
            }
        }
        Container::Zip => {
            let mut archive = ZipArchive::new(File::open(scene)?)?;
            for i in 0..archive.len() {
                let entry = archive.by_index_raw(i)?;
                let name = entry.name().trim_end_matches('/');
                if entry.is_dir() && !include_folders {
                    continue;
                }
                let base = name.rsplit('/').next().unwrap_or(name);
                if pattern.is_match(base) {
                    members.push(name.to_string());
                }
            }
        }
        container @ (Container::Tar | Container::TarGz) => {
            let mut archive = tar_reader(scene, container)?;
            for entry in archive.entries()? {
                let entry = entry?;
                if entry.header().entry_type().is_dir() && !include_folders {
                    continue;
                }
                let path = entry.path()?;
                let name = path.to_string_lossy().trim_end_matches('/').to_string();
                let base = name.rsplit('/').next().unwrap_or(&name).to_string();
                if pattern.is_match(&base) {
                    members.push(name);
                }
            }
        }
        Container::File => {
            if let Some(name) = scene.file_name().and_then(|n| n.to_str()) {
                if pattern.is_match(name) {
                    members.push(String::new());
                }
            }
        }
    }
    members.sort();
    Ok(members)
}

/// Read a member completely into memory.
pub fn read_member(scene: &Path, member: &str) -> SarResult<Vec<u8>> {
    read_member_limited(scene, member, None)
}

/// Read at most `limit` bytes from the start of a member.
///
/// Vendor headers sit at the front of otherwise huge measurement files;
/// this avoids pulling whole rasters into memory.
pub fn read_member_prefix(scene: &Path, member: &str, limit: usize) -> SarResult<Vec<u8>> {
    read_member_limited(scene, member, Some(limit))
}

/// Read `len` bytes starting at `offset` within a member.
///
/// Archive members cannot seek, so the stream is decompressed and discarded
/// up to the offset. Corner records sit at the very start and end of image
/// files; the extra I/O is accepted for the simplicity of one code path.
pub fn read_member_range(scene: &Path, member: &str, offset: u64, len: usize) -> SarResult<Vec<u8>> {
    match container_of(scene)? {
        Container::Dir | Container::File => {
            let path = if member.is_empty() {
                scene.to_path_buf()
            } else {
                scene.join(member)
            };
            let mut file = File::open(path)?;
            file.seek(SeekFrom::Start(offset))?;
            let mut data = Vec::new();
            file.take(len as u64).read_to_end(&mut data)?;
            Ok(data)
        }
        Container::Zip => {
            let mut archive = ZipArchive::new(File::open(scene)?)?;
            let mut entry = archive.by_name(member)?;
            std::io::copy(&mut (&mut entry).take(offset), &mut std::io::sink())?;
            let mut data = Vec::new();
            entry.take(len as u64).read_to_end(&mut data)?;
            Ok(data)
        }
        container @ (Container::Tar | Container::TarGz) => {
            let mut archive = tar_reader(scene, container)?;
            for entry in archive.entries()? {
                let mut entry = entry?;
                if entry.path()?.to_string_lossy() == member {
                    std::io::copy(&mut (&mut entry).take(offset), &mut std::io::sink())?;
                    let mut data = Vec::new();
                    entry.take(len as u64).read_to_end(&mut data)?;
                    return Ok(data);
                }
            }
            Err(SarError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("member {member} not found in {}", scene.display()),
            )))
        }
    }
}

fn read_member_limited(scene: &Path, member: &str, limit: Option<usize>) -> SarResult<Vec<u8>> {
    let mut data = Vec::new();
    match container_of(scene)? {
        Container::Dir | Container::File => {
            let path = if member.is_empty() {
                scene.to_path_buf()
            } else {
                scene.join(member)
            };
            let file = File::open(path)?;
            read_capped(file, limit, &mut data)?;
        }
        Container::Zip => {
            let mut archive = ZipArchive::new(File::open(scene)?)?;
            let entry = archive.by_name(member)?;
            read_capped(entry, limit, &mut data)?;
        }
        container @ (Container::Tar | Container::TarGz) => {
            let mut archive = tar_reader(scene, container)?;
            let mut found = false;
            for entry in archive.entries()? {
                let entry = entry?;
                if entry.path()?.to_string_lossy() == member {
                    read_capped(entry, limit, &mut data)?;
                    found = true;
                    break;
                }
            }
            if !found {
                return Err(SarError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("member {member} not found in {}", scene.display()),
                )));
            }
        }
    }
    Ok(data)
}

fn read_capped<R: Read>(reader: R, limit: Option<usize>, buf: &mut Vec<u8>) -> SarResult<()> {
    match limit {
        Some(n) => {
            reader.take(n as u64).read_to_end(buf)?;
        }
        None => {
            let mut reader = reader;
            reader.read_to_end(buf)?;
        }
    }
    Ok(())
}

/// Recursively collect files in a directory whose name matches a pattern.
pub fn find_in_dir(dir: &Path, pattern: &Regex, recursive: bool) -> Vec<PathBuf> {
    let walker = if recursive {
        WalkDir::new(dir)
    } else {
        WalkDir::new(dir).max_depth(1)
    };
    walker
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|n| pattern.is_match(n))
                .unwrap_or(false)
        })
        .map(|e| e.into_path())
        .collect()
}

/// Longest common prefix of all member names, used to strip a redundant
/// top-level folder while unpacking.
fn common_prefix(names: &[String]) -> String {
    let mut prefix = match names.first() {
        Some(first) => first.clone(),
        None => return String::new(),
    };
    for name in &names[1..] {
        while !name.starts_with(&prefix) {
            prefix.pop();
            if prefix.is_empty() {
                return prefix;
            }
        }
    }
    prefix
}

/// Unpack a scene archive into a target directory.
///
/// When the archive wraps everything in a single top-level folder, that
/// folder is stripped. Zip members whose CRC check fails are retried with
/// the external `unzip` command: some Sentinel-1 distributions ship intact
/// tiffs with wrong CRC-32 checksums, and `unzip` extracts before checking.
pub fn unpack(scene: &Path, directory: &Path) -> SarResult<()> {
    std::fs::create_dir_all(directory)?;
    match container_of(scene)? {
        Container::Dir | Container::File => {
            return Err(SarError::Malformed(format!(
                "scene {} is not an archive",
                scene.display()
            )));
        }
        Container::Zip => {
            let mut archive = ZipArchive::new(File::open(scene)?)?;
            let names: Vec<String> = (0..archive.len())
                .filter_map(|i| archive.by_index_raw(i).ok().map(|e| e.name().to_string()))
                .collect();
            let header = common_prefix(&names);
            let strip = header.ends_with('/');
            for i in 0..archive.len() {
                let mut entry = archive.by_index(i)?;
                let name = entry.name().to_string();
                let target = if strip {
                    name.replacen(&header, "", 1)
                } else {
                    name.clone()
                };
                if target.is_empty() {
                    continue;
                }
                let outname = directory.join(&target);
                if entry.is_dir() {
                    std::fs::create_dir_all(&outname)?;
                    continue;
                }
                if let Some(parent) = outname.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut buf = Vec::new();
                match entry.read_to_end(&mut buf) {
                    Ok(_) => std::fs::write(&outname, &buf)?,
                    Err(_) => {
                        log::warn!("CRC failure on {name}, retrying with external unzip");
                        let status = Command::new("unzip")
                            .args(["-j", "-qq", "-o"])
                            .arg(scene)
                            .arg(&name)
                            .arg("-d")
                            .arg(outname.parent().unwrap_or(directory))
                            .status();
                        match status {
                            Ok(s) if s.success() => {}
                            _ => {
                                log::warn!("external unzip failed for {name}, skipping member");
                                continue;
                            }
                        }
                    }
                }
            }
        }
        container @ (Container::Tar | Container::TarGz) => {
            // two passes: member names first, then extraction with the
            // common top-level folder stripped
            let names: Vec<String> = {
                let mut archive = tar_reader(scene, container)?;
                archive
                    .entries()?
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.path().ok().map(|p| p.to_string_lossy().to_string()))
                    .collect()
            };
            let header = common_prefix(&names);
            let strip = names.contains(&header) && !header.is_empty();
            let mut archive = tar_reader(scene, container)?;
            for entry in archive.entries()? {
                let mut entry = entry?;
                let name = entry.path()?.to_string_lossy().to_string();
                let target = if strip {
                    name.trim_start_matches(&header)
                        .trim_start_matches('/')
                        .to_string()
                } else {
                    name
                };
                if target.is_empty() {
                    continue;
                }
                entry.unpack(directory.join(target))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_zip(dir: &Path, members: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.join("scene.zip");
        let file = File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        for (name, data) in members {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    #[test]
    fn detects_zip_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_zip(dir.path(), &[("a.txt", b"hello")]);
        assert_eq!(container_of(&path).unwrap(), Container::Zip);
        assert_eq!(container_of(dir.path()).unwrap(), Container::Dir);
    }

    #[test]
    fn finds_members_by_basename() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_zip(
            dir.path(),
            &[
                ("scene/LEA_01.001", b"leader"),
                ("scene/DAT_01.001", b"data"),
            ],
        );
        let pattern = Regex::new("LEA_01.001").unwrap();
        let members = find_files(&path, &pattern, false).unwrap();
        assert_eq!(members, vec!["scene/LEA_01.001".to_string()]);
    }

    #[test]
    fn reads_member_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_zip(dir.path(), &[("header.bin", b"0123456789")]);
        let data = read_member_prefix(&path, "header.bin", 4).unwrap();
        assert_eq!(data, b"0123");
    }

    #[test]
    fn finds_files_in_directory_scene() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("annotation")).unwrap();
        std::fs::write(dir.path().join("manifest.safe"), b"<xml/>").unwrap();
        std::fs::write(dir.path().join("annotation/a.xml"), b"<xml/>").unwrap();
        let pattern = Regex::new(r"manifest\.safe$").unwrap();
        let members = find_files(dir.path(), &pattern, false).unwrap();
        assert_eq!(members, vec!["manifest.safe".to_string()]);
    }

    #[test]
    fn standalone_product_file_is_its_own_member() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ASA_IMP_1PXESA20040116_094601.N1");
        std::fs::write(&path, b"MPH follows").unwrap();
        assert_eq!(container_of(&path).unwrap(), Container::File);

        let pattern = Regex::new(r"^ASA_IMP.*\.N1$").unwrap();
        assert_eq!(find_files(&path, &pattern, false).unwrap(), vec![String::new()]);
        let miss = Regex::new(r"^LEA_01\.001$").unwrap();
        assert!(find_files(&path, &miss, false).unwrap().is_empty());

        // the empty member name addresses the file itself
        assert_eq!(read_member_prefix(&path, "", 3).unwrap(), b"MPH");
        assert_eq!(read_member_range(&path, "", 4, 7).unwrap(), b"follows");
    }

    #[test]
    fn compression_check_propagates_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_compressed(dir.path()).unwrap());
        assert!(is_compressed(&dir.path().join("absent.zip")).is_err());
        let zipped = make_zip(dir.path(), &[("a.txt", b"x")]);
        assert!(is_compressed(&zipped).unwrap());
    }

    #[test]
    fn common_prefix_of_wrapped_archive() {
        let names = vec![
            "scene.SAFE/manifest.safe".to_string(),
            "scene.SAFE/annotation/a.xml".to_string(),
        ];
        assert_eq!(common_prefix(&names), "scene.SAFE/".to_string());
    }

    #[test]
    fn unpack_strips_top_level_folder() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_zip(
            dir.path(),
            &[
                ("wrap/manifest.safe", b"m" as &[u8]),
                ("wrap/annotation/a.xml", b"a"),
            ],
        );
        let out = dir.path().join("out");
        unpack(&path, &out).unwrap();
        assert!(out.join("manifest.safe").is_file());
        assert!(out.join("annotation/a.xml").is_file());
    }
}
