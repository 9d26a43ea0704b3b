//! Conversion of identified scenes for the GAMMA processing software
//!
//! Each supported format maps to one of the vendor-specific `par_*`
//! programs. The commands are built from the scene metadata and returned
//! for inspection, then executed one by one; a scene whose product variant
//! the software cannot ingest is refused up front.

use crate::io::archive;
use crate::types::{Format, SarError, SarResult, Scene};
use regex::Regex;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

/// One invocation of a GAMMA program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GammaCommand {
    pub program: String,
    pub args: Vec<String>,
    /// text fed to the program on stdin, for interactive prompts
    pub stdin: Option<String>,
}

/// Build the conversion commands for a scene. The scene must be unpacked;
/// member paths are resolved against the scene directory.
pub fn conversion_commands(scene: &Scene, outdir: &Path) -> SarResult<Vec<GammaCommand>> {
    if archive::is_compressed(&scene.scene)? {
        return Err(SarError::Malformed(format!(
            "scene {} must be unpacked before conversion",
            scene.scene.display()
        )));
    }
    let base = outdir.join(scene.outname_base());
    let base = base.to_string_lossy().to_string();
    match scene.format {
        Format::CeosErs => ceos_ers_commands(scene, &base),
        Format::CeosPsr => ceos_psr_commands(scene, &base),
        Format::Esa => esa_commands(scene, &base),
        Format::Safe => safe_commands(scene, &base),
        Format::Tsx => tsx_commands(scene, &base),
    }
}

fn member_path(scene: &Scene, member: &str) -> String {
    if member.is_empty() {
        scene.scene.to_string_lossy().to_string()
    } else {
        scene.scene.join(member).to_string_lossy().to_string()
    }
}

fn ceos_ers_commands(scene: &Scene, base: &str) -> SarResult<Vec<GammaCommand>> {
    if scene.meta.product != "SLC" {
        return Err(SarError::UnsupportedProduct(format!(
            "ERS {} products are not supported by par_ESA_ERS",
            scene.meta.product
        )));
    }
    let proc_system = scene
        .meta
        .extensions
        .proc_system
        .as_deref()
        .unwrap_or_default();
    if !matches!(proc_system, "PGS-ERS" | "VMP-ERS" | "SPF-ERS") {
        return Err(SarError::UnsupportedProduct(format!(
            "unknown processing system {proc_system}"
        )));
    }
    Ok(vec![GammaCommand {
        program: "par_ESA_ERS".to_string(),
        args: vec![
            member_path(scene, "LEA_01.001"),
            format!("{base}.par"),
            member_path(scene, "DAT_01.001"),
            format!("{base}_slc"),
        ],
        stdin: Some(format!("{}\n", scene.outname_base())),
    }])
}

fn ceos_psr_commands(scene: &Scene, base: &str) -> SarResult<Vec<GammaCommand>> {
    if scene.meta.product == "1.0" {
        return Err(SarError::UnsupportedProduct(
            "PALSAR level 1.0 products cannot be converted directly".to_string(),
        ));
    }
    let img_pattern = Regex::new(r"^IMG-").expect("static pattern");
    let images = archive::find_files(&scene.scene, &img_pattern, false)?;
    let leader = member_path(scene, &scene.file);
    let mut commands = Vec::new();
    for image in images {
        let pol = image
            .rsplit('/')
            .next()
            .and_then(|name| name.get(4..6))
            .unwrap_or("XX")
            .to_lowercase();
        let command = if scene.meta.product == "1.1" {
            GammaCommand {
                program: "par_EORC_PALSAR".to_string(),
                args: vec![
                    leader.clone(),
                    format!("{base}_{pol}_slc.par"),
                    member_path(scene, &image),
                    format!("{base}_{pol}_slc"),
                ],
                stdin: None,
            }
        } else {
            GammaCommand {
                program: "par_EORC_PALSAR_geo".to_string(),
                args: vec![
                    leader.clone(),
                    format!("{base}_{pol}_mli_geo.par"),
                    member_path(scene, &image),
                    format!("{base}_{pol}_mli_geo"),
                ],
                stdin: None,
            }
        };
        commands.push(command);
    }
    if commands.is_empty() {
        return Err(SarError::Malformed("no IMG files to convert".to_string()));
    }
    Ok(commands)
}

fn esa_commands(scene: &Scene, base: &str) -> SarResult<Vec<GammaCommand>> {
    let suffix = if scene.meta.product == "SLC" {
        "slc"
    } else {
        "pri"
    };
    Ok(vec![GammaCommand {
        program: "par_ASAR".to_string(),
        args: vec![member_path(scene, &scene.file), format!("{base}_{suffix}")],
        stdin: None,
    }])
}

fn safe_commands(scene: &Scene, base: &str) -> SarResult<Vec<GammaCommand>> {
    if scene.meta.product == "OCN" {
        return Err(SarError::UnsupportedProduct(
            "OCN products carry no imagery".to_string(),
        ));
    }
    if scene.meta.extensions.category.as_deref() == Some("A") {
        return Err(SarError::UnsupportedProduct(
            "annotation-only products carry no imagery".to_string(),
        ));
    }
    let annotation_pattern =
        Regex::new(r"^s1[ab]-.*\.xml$").expect("static pattern");
    let annotations: Vec<String> = archive::find_files(&scene.scene, &annotation_pattern, false)?
        .into_iter()
        .filter(|m| m.contains("annotation/") && !m.contains("calibration/"))
        .collect();
    let mut commands = Vec::new();
    for annotation in annotations {
        let name = annotation.rsplit('/').next().unwrap_or(&annotation);
        let measurement = member_path(
            scene,
            &format!("measurement/{}", name.replace(".xml", ".tiff")),
        );
        let calibration = member_path(scene, &format!("annotation/calibration/calibration-{name}"));
        let noise = member_path(scene, &format!("annotation/calibration/noise-{name}"));
        let annotation_path = member_path(scene, &annotation);
        let parts: Vec<&str> = name.split('-').collect();
        let (swath, pol) = match (parts.get(1), parts.get(3)) {
            (Some(s), Some(p)) => (s.to_uppercase(), p.to_uppercase()),
            _ => {
                return Err(SarError::Malformed(format!(
                    "unrecognized annotation name {name}"
                )))
            }
        };
        let command = if scene.meta.product == "SLC" {
            // swath replaces the padded mode in the output name
            let out = base.replacen(
                &format!("{:_<4}", scene.meta.acquisition_mode),
                &format!("{swath:_<4}"),
                1,
            );
            GammaCommand {
                program: "par_S1_SLC".to_string(),
                args: vec![
                    measurement,
                    annotation_path,
                    calibration,
                    noise,
                    format!("{out}_{pol}_slc.par"),
                    format!("{out}_{pol}_slc"),
                    format!("{out}_{pol}_slc.tops_par"),
                ],
                stdin: None,
            }
        } else {
            GammaCommand {
                program: "par_S1_GRD".to_string(),
                args: vec![
                    measurement,
                    annotation_path,
                    calibration,
                    noise,
                    format!("{base}_{pol}_grd.par"),
                    format!("{base}_{pol}_grd"),
                ],
                stdin: None,
            }
        };
        commands.push(command);
    }
    if commands.is_empty() {
        return Err(SarError::Malformed(
            "no annotation files to convert".to_string(),
        ));
    }
    Ok(commands)
}

fn tsx_commands(scene: &Scene, base: &str) -> SarResult<Vec<GammaCommand>> {
    let annotation = member_path(scene, &scene.file);
    let image_pattern = Regex::new(
        r"^IMAGE_(?P<pol>HH|HV|VH|VV)_(?:SRA|FWD|AFT)_(?P<beam>[^\.]+)\.(cos|tif)$",
    )
    .expect("static pattern");
    let images = archive::find_files(&scene.scene, &image_pattern, false)?;
    let mut commands = Vec::new();
    for image in images {
        let name = image.rsplit('/').next().unwrap_or(&image);
        let pol = image_pattern
            .captures(name)
            .map(|c| c["pol"].to_lowercase())
            .unwrap_or_else(|| "xx".to_string());
        let command = match scene.meta.product.as_str() {
            "SSC" => GammaCommand {
                program: "par_TX_SLC".to_string(),
                args: vec![
                    annotation.clone(),
                    member_path(scene, &image),
                    format!("{base}_{pol}_slc.par"),
                    format!("{base}_{pol}_slc"),
                    pol.clone(),
                ],
                stdin: None,
            },
            "MGD" => GammaCommand {
                program: "par_TX_GRD".to_string(),
                args: vec![
                    annotation.clone(),
                    member_path(scene, &image),
                    format!("{base}_{pol}_mli.par"),
                    format!("{base}_{pol}_mli"),
                    pol.clone(),
                ],
                stdin: None,
            },
            "GEC" | "EEC" => GammaCommand {
                program: "par_TX_geo".to_string(),
                args: vec![
                    annotation.clone(),
                    member_path(scene, &image),
                    format!("{base}_{pol}_mli_geo.par"),
                    format!("{base}_{pol}_mli_geo.dem_par"),
                    format!("{base}_{pol}_mli_geo"),
                    pol.clone(),
                ],
                stdin: None,
            },
            other => {
                return Err(SarError::UnsupportedProduct(format!(
                    "unknown product variant {other}"
                )))
            }
        };
        commands.push(command);
    }
    if commands.is_empty() {
        return Err(SarError::Malformed("no image files to convert".to_string()));
    }
    Ok(commands)
}

/// Execute one command; a non-zero exit is surfaced with the program name.
pub fn run(command: &GammaCommand) -> SarResult<()> {
    log::debug!("running {} {}", command.program, command.args.join(" "));
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(if command.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SarError::External(format!("{}: {e}", command.program)))?;
    if let (Some(mut handle), Some(text)) = (child.stdin.take(), command.stdin.as_ref()) {
        handle
            .write_all(text.as_bytes())
            .map_err(|e| SarError::External(format!("{}: {e}", command.program)))?;
    }
    let output = child
        .wait_with_output()
        .map_err(|e| SarError::External(format!("{}: {e}", command.program)))?;
    if !output.status.success() {
        return Err(SarError::External(format!(
            "{} failed: {}",
            command.program,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Whether conversion output for a scene already exists in a directory.
pub fn is_processed(scene: &Scene, outdir: &Path, recursive: bool) -> bool {
    match Regex::new(&regex::escape(&scene.outname_base())) {
        Ok(pattern) => !archive::find_in_dir(outdir, &pattern, recursive).is_empty(),
        Err(_) => false,
    }
}

/// Drop scenes whose conversion output already exists.
pub fn filter_processed<'a>(
    scenes: &'a [Scene],
    outdir: &Path,
    recursive: bool,
) -> Vec<&'a Scene> {
    scenes
        .iter()
        .filter(|scene| !is_processed(scene, outdir, recursive))
        .collect()
}
