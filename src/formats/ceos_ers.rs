//! ERS-1/2 products in CEOS format
//!
//! Reference: ER-IS-EPO-GS-5902-3, Annex C. ERS SAR.SLC/SLC-I. CCT and
//! EXABYTE (ESA 1998). The scene carries a binary leader (`LEA_01.001`)
//! whose data-set-summary record starts after the 720-byte file descriptor,
//! and an image file (`DAT_01.001`) whose first and last signal data
//! records embed the geographic corner coordinates.

use crate::dates::parse_date;
use crate::io::records::{ascii_f64, ascii_i64, be_i32, field, Decode, RecordLayout};
use crate::io::{archive, crs};
use crate::types::{
    BoundingBox, Extensions, Format, OrbitDirection, Polarization, SarError, SarResult, Scene,
    SceneMetadata,
};
use regex::Regex;
use std::path::Path;

const PATTERN: &str = r"(?P<product_id>(?:SAR|ASA)_(?:IM(?:S|P|G|M|_)|AP(?:S|P|G|M|_)|WV(?:I|S|W|_)|WS(?:M|S|_))_[012B][CP])(?P<processing_stage_flag>[A-Z])(?P<originator_id>[A-Z\-]{3})(?P<start_day>[0-9]{8})_(?P<start_time>[0-9]{6})_(?P<duration>[0-9]{8})(?P<phase>[0-9A-Z])(?P<cycle>[0-9]{3})_(?P<relative_orbit>[0-9]{5})_(?P<absolute_orbit>[0-9]{5})_(?P<counter>[0-9]{4,})\.(?P<satellite_id>[EN][12])(?P<extension>(?:\.zip|\.tar\.gz|\.PS|))$";

const PATTERN_PID: &str = r"(?P<sat_id>(?:SAR|ASA))_(?P<image_mode>(?:IM(?:S|P|G|M|_)|AP(?:S|P|G|M|_)|WV(?:I|S|W|_)|WS(?:M|S|_)))_(?P<processing_level>[012B][CP])";

/// Byte offset of the data set summary within the leader.
const DSS_OFFSET: usize = 720;

/// Data set summary fields, relative to the record start.
const DATA_SET_SUMMARY: RecordLayout = RecordLayout {
    name: "data_set_summary",
    fields: &[
        field("orbit_frame", 36, 32, Decode::Text),
        field("sensor", 396, 16, Decode::Text),
        field("heading", 468, 8, Decode::Float),
        field("incidence", 484, 8, Decode::Float),
        field("proc_facility", 1045, 16, Decode::Text),
        field("proc_system", 1061, 8, Decode::Text),
        field("proc_version", 1069, 8, Decode::Text),
        field("looks_range", 1174, 16, Decode::Float),
        field("looks_azimuth", 1190, 16, Decode::Float),
        field("spacing_azimuth", 1686, 16, Decode::Float),
        field("spacing_range", 1702, 16, Decode::Float),
        field("start", 1814, 24, Decode::Text),
        field("stop", 1862, 24, Decode::Text),
    ],
};

/// Marker of the ESA general-type facility record that carries the
/// calibration constant.
const FACILITY_MARKER: &[u8] = b"FACILITY RELATED DATA RECORD [ESA GENERAL TYPE]";

pub fn parse(scene: &Path) -> SarResult<Scene> {
    let pattern = Regex::new(PATTERN).expect("static pattern");
    let file = super::examine(scene, &pattern, false, "CEOS_ERS")?;

    let captures = pattern
        .captures(super::member_name(scene, &file))
        .ok_or_else(|| SarError::NotFound {
            scene: scene.to_path_buf(),
            handler: "CEOS_ERS",
        })?;
    let product_id = &captures["product_id"];
    if product_id.contains("IM__0") {
        return Err(SarError::UnsupportedProduct(
            "product level 0 not supported (yet)".to_string(),
        ));
    }
    let pid = Regex::new(PATTERN_PID)
        .expect("static pattern")
        .captures(product_id)
        .ok_or_else(|| SarError::Malformed(format!("invalid product id {product_id}")))?;
    let acquisition_mode = pid["image_mode"].to_string();
    let product = if matches!(acquisition_mode.as_str(), "IMS" | "APS" | "WSS") {
        "SLC"
    } else {
        "PRI"
    };

    // leader file metadata
    let lea_pattern = Regex::new(r"^LEA_01\.001$").expect("static pattern");
    let lea_member = super::examine(scene, &lea_pattern, false, "CEOS_ERS")?;
    let lea = archive::read_member(scene, &lea_member)?;
    let dss = lea.get(DSS_OFFSET..).ok_or_else(|| {
        SarError::Malformed(format!("leader shorter than {DSS_OFFSET} bytes"))
    })?;
    let values = DATA_SET_SUMMARY.read(dss)?;

    let sensor = values["sensor"].as_text()?.replace('-', "");
    let heading = values["heading"].as_f64()?;
    let orbit = if heading > 180.0 {
        OrbitDirection::Descending
    } else {
        OrbitDirection::Ascending
    };
    let number_re = Regex::new(r"[0-9]+").expect("static pattern");
    let mut numbers = number_re.find_iter(values["orbit_frame"].as_text()?);
    let orbit_number = numbers
        .next()
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .ok_or_else(|| SarError::Malformed("orbit number missing".to_string()))?;
    let frame_number = numbers
        .next()
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .ok_or_else(|| SarError::Malformed("frame number missing".to_string()))?;

    let start = parse_date(values["start"].as_text()?)?;
    let stop = parse_date(values["stop"].as_text()?)?;

    // the ESA general-type facility record carries the calibration
    // constant; -10*log10(K), sign convention kept as documented upstream
    let k_db = match find_subslice(&lea, FACILITY_MARKER) {
        Some(pos) => {
            let record_start = pos.checked_sub(13).ok_or_else(|| {
                SarError::Malformed("facility record marker too close to file start".to_string())
            })?;
            let k = ascii_f64(&lea, record_start + 663, 16)?;
            Some(-10.0 * k.log10())
        }
        None => {
            log::debug!("no ESA general-type facility record in {lea_member}");
            None
        }
    };
    let sc_db = match sensor.as_str() {
        "ERS1" => Some(59.61),
        "ERS2" => Some(60.0),
        _ => None,
    };

    // raster dimensions and corners from the image file
    let dat_pattern = Regex::new(r"^DAT_01\.001$").expect("static pattern");
    let dat_member = super::examine(scene, &dat_pattern, false, "CEOS_ERS")?;
    let fd = archive::read_member_prefix(scene, &dat_member, 720)?;
    let lines = ascii_i64(&fd, 180, 6)? as usize;
    let record_length = ascii_i64(&fd, 186, 6)? as usize;
    let bytes_per_sample = if product == "SLC" { 4 } else { 2 };
    let samples = record_length
        .checked_sub(412)
        .map(|n| n / bytes_per_sample)
        .filter(|n| *n > 0)
        .ok_or_else(|| {
            SarError::Malformed(format!("implausible image record length {record_length}"))
        })?;
    let corners = image_corners(scene, &dat_member, record_length, lines)?;

    let meta = SceneMetadata {
        sensor: sensor.clone(),
        projection: crs::wgs84_wkt().to_string(),
        orbit,
        polarizations: vec![Polarization::VV],
        acquisition_mode,
        start,
        stop,
        product: product.to_string(),
        spacing: (
            values["spacing_range"].as_f64()?,
            values["spacing_azimuth"].as_f64()?,
        ),
        samples,
        lines,
        corners,
        extensions: Extensions {
            looks: Some((
                values["looks_range"].as_f64()?,
                values["looks_azimuth"].as_f64()?,
            )),
            incidence_angle: Some(values["incidence"].as_f64()?),
            k_db,
            sc_db,
            orbit_number_abs: Some(orbit_number),
            frame_number: Some(frame_number),
            heading: Some(heading),
            proc_facility: Some(values["proc_facility"].as_text()?.to_string()),
            proc_system: Some(values["proc_system"].as_text()?.to_string()),
            proc_version: Some(values["proc_version"].as_text()?.to_string()),
            ..Extensions::default()
        },
    };

    Ok(Scene {
        format: Format::CeosErs,
        scene: scene.to_path_buf(),
        file,
        meta,
    })
}

/// Decode the corner coordinates embedded in the first and last signal data
/// records of the image file: big-endian micro-degrees at fixed offsets
/// within each record prefix.
fn image_corners(
    scene: &Path,
    member: &str,
    record_length: usize,
    lines: usize,
) -> SarResult<BoundingBox> {
    if lines == 0 {
        return Err(SarError::Malformed("image file declares zero lines".to_string()));
    }
    let first = archive::read_member_range(scene, member, 720, 412)?;
    let last_offset = 720 + (record_length as u64) * (lines as u64 - 1);
    let last = archive::read_member_range(scene, member, last_offset, 412)?;

    let mut points = Vec::with_capacity(8);
    for record in [&first, &last] {
        for (lat_off, lon_off) in [(192, 204), (200, 212)] {
            let lat = f64::from(be_i32(record, lat_off)?) / 1_000_000.0;
            let lon = f64::from(be_i32(record, lon_off)?) / 1_000_000.0;
            points.push((lon, lat));
        }
    }
    BoundingBox::from_points(&points)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_pattern_accepts_ceos_products() {
        let pattern = Regex::new(PATTERN).unwrap();
        let name = "SAR_IMP_1PXASI19910729_203023_00000017A906_00129_00183_1771.E1";
        let captures = pattern.captures(name).unwrap();
        assert_eq!(&captures["product_id"], "SAR_IMP_1P");
        assert_eq!(&captures["satellite_id"], "E1");
    }

    #[test]
    fn level_zero_is_rejected_hard() {
        let pattern = Regex::new(PATTERN).unwrap();
        assert!(pattern
            .captures("SAR_IM__0PXASI19910729_203023_00000017A906_00129_00183_1771.E1")
            .map(|c| c["product_id"].contains("IM__0"))
            .unwrap_or(false));
    }

    #[test]
    fn product_level_from_mode() {
        let pid = Regex::new(PATTERN_PID).unwrap();
        let captures = pid.captures("SAR_IMS_1P").unwrap();
        assert_eq!(&captures["image_mode"], "IMS");
    }

    #[test]
    fn facility_marker_lookup() {
        let mut buf = vec![0u8; 100];
        buf.extend_from_slice(FACILITY_MARKER);
        buf.extend_from_slice(&[0u8; 900]);
        assert_eq!(find_subslice(&buf, FACILITY_MARKER), Some(100));
        assert_eq!(find_subslice(&buf[..50], FACILITY_MARKER), None);
    }
}
