//! ERS-1/2 and ENVISAT ASAR products in the ESA archive format
//!
//! Reference: PO-RS-MDA-GS-2009 ENVISAT-1 products specifications. A
//! product file starts with a fixed 1247-byte main product header (MPH) of
//! ASCII `KEY=value` lines, followed by a specific product header (SPH)
//! whose size the MPH declares. Data set descriptors (DSDs) at the end of
//! the SPH locate the measurement data sets.

use crate::dates::parse_date;
use crate::io::{archive, crs};
use crate::types::{
    BoundingBox, Extensions, Format, OrbitDirection, Polarization, SarError, SarResult, Scene,
    SceneMetadata,
};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

const PATTERN: &str = r"(?P<product_id>(?:SAR|ASA)_(?:IM(?:S|P|G|M|_)|AP(?:S|P|G|M|_)|WV(?:I|S|W|_)|WS(?:M|S|_))_[012B][CP])(?P<processing_stage_flag>[A-Z])(?P<originator_id>[A-Z\-]{3})(?P<start_day>[0-9]{8})_(?P<start_time>[0-9]{6})_(?P<duration>[0-9]{8})(?P<phase>[0-9A-Z])(?P<cycle>[0-9]{3})_(?P<relative_orbit>[0-9]{5})_(?P<absolute_orbit>[0-9]{5})_(?P<counter>[0-9]{4,})\.(?P<satellite_id>[EN][12])(?P<extension>(?:\.zip|\.tar\.gz|))$";

const MPH_SIZE: usize = 1247;

pub fn parse(scene: &Path) -> SarResult<Scene> {
    let pattern = Regex::new(PATTERN).expect("static pattern");
    let file = super::examine(scene, &pattern, false, "ESA")?;

    let captures = pattern
        .captures(super::member_name(scene, &file))
        .ok_or_else(|| SarError::NotFound {
            scene: scene.to_path_buf(),
            handler: "ESA",
        })?;
    if captures["product_id"].contains("IM__0") {
        return Err(SarError::UnsupportedProduct(
            "product level 0 not supported (yet)".to_string(),
        ));
    }
    let sensor = match &captures["satellite_id"] {
        "N1" => "ASAR",
        "E1" => "ERS1",
        "E2" => "ERS2",
        other => return Err(SarError::Malformed(format!("unknown satellite id {other}"))),
    };

    let mph_raw = archive::read_member_prefix(scene, &file, MPH_SIZE)?;
    let mut header = parse_header(&mph_raw);
    let sph_size: usize = header
        .get("SPH_SIZE")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| SarError::Malformed("MPH lacks a usable SPH_SIZE".to_string()))?;
    let sph_raw = archive::read_member_range(scene, &file, MPH_SIZE as u64, sph_size)?;
    let (sph, dsds) = parse_sph(&sph_raw);
    header.extend(sph);

    let acquisition_mode = captures["product_id"]
        .get(4..7)
        .unwrap_or_default()
        .to_string();
    let product = if matches!(acquisition_mode.as_str(), "IMS" | "APS" | "WSS") {
        "SLC"
    } else {
        "PRI"
    };

    let start = parse_date(get(&header, "SENSING_START")?)?;
    let stop = parse_date(get(&header, "SENSING_STOP")?)?;
    let orbit = OrbitDirection::parse(get(&header, "PASS")?)?;

    let spacing = (
        get_f64(&header, "RANGE_SPACING")?,
        get_f64(&header, "AZIMUTH_SPACING")?,
    );
    let looks = (
        get_f64(&header, "RANGE_LOOKS")?,
        get_f64(&header, "AZIMUTH_LOOKS")?,
    );
    let samples = get_f64(&header, "LINE_LENGTH")? as usize;

    // line count from the first measurement data set descriptor
    let lines = dsds
        .iter()
        .find(|d| d.get("DS_TYPE").map(String::as_str) == Some("M"))
        .and_then(|d| d.get("NUM_DSR"))
        .and_then(|v| v.parse::<usize>().ok())
        .ok_or_else(|| SarError::Malformed("no measurement DSD with NUM_DSR".to_string()))?;

    let polarizations = if sensor == "ASAR" {
        let mut pols = Vec::new();
        for (key, value) in &header {
            if key.contains("TX_RX_POLAR") && value.len() == 3 {
                let pol = Polarization::parse(value)?;
                if !pols.contains(&pol) {
                    pols.push(pol);
                }
            }
        }
        pols
    } else {
        vec![Polarization::VV]
    };

    // corner micro-degrees from the geolocation keys
    let mut points = Vec::new();
    for (lat_key, lon_key) in header.keys().filter(|k| k.contains("LAT")).filter_map(|k| {
        let lon_key = k.replace("LAT", "LONG");
        header.contains_key(&lon_key).then(|| (k.clone(), lon_key))
    }) {
        let lat = get_f64(&header, &lat_key)? / 1_000_000.0;
        let lon = get_f64(&header, &lon_key)? / 1_000_000.0;
        points.push((lon, lat));
    }
    let corners = BoundingBox::from_points(&points)?;

    let meta = SceneMetadata {
        sensor: sensor.to_string(),
        projection: crs::wgs84_wkt().to_string(),
        orbit,
        polarizations,
        acquisition_mode,
        start,
        stop,
        product: product.to_string(),
        spacing,
        samples,
        lines,
        corners,
        extensions: Extensions {
            looks: Some(looks),
            orbit_number_abs: header.get("ABS_ORBIT").and_then(|v| v.parse().ok()),
            orbit_number_rel: header.get("REL_ORBIT").and_then(|v| v.parse().ok()),
            proc_facility: header.get("PROC_CENTER").cloned(),
            proc_system: header.get("SOFTWARE_VER").cloned(),
            ..Extensions::default()
        },
    };

    Ok(Scene {
        format: Format::Esa,
        scene: scene.to_path_buf(),
        file,
        meta,
    })
}

/// Decode `KEY=value` header lines; quotes and `<unit>` suffixes are
/// stripped from the values.
fn parse_header(raw: &[u8]) -> HashMap<String, String> {
    let unit = Regex::new(r"<[a-zA-Z0-9/*^\-]+>$").expect("static pattern");
    let mut header = HashMap::new();
    for line in String::from_utf8_lossy(raw).lines() {
        if let Some((key, value)) = line.split_once('=') {
            let value = unit.replace(value.trim(), "");
            header.insert(
                key.trim().to_string(),
                value.trim_matches('"').trim().to_string(),
            );
        }
    }
    header
}

/// Split the SPH into its scalar header and the DSD blocks. DSDs repeat the
/// same key set, so each `DS_NAME` occurrence opens a new block.
fn parse_sph(raw: &[u8]) -> (HashMap<String, String>, Vec<HashMap<String, String>>) {
    let text = String::from_utf8_lossy(raw);
    let Some(first_dsd) = text.find("DS_NAME") else {
        return (parse_header(text.as_bytes()), Vec::new());
    };
    let header = parse_header(text[..first_dsd].as_bytes());
    let dsds = text[first_dsd..]
        .split("DS_NAME")
        .filter(|block| !block.trim().is_empty())
        .map(|block| parse_header(format!("DS_NAME{block}").as_bytes()))
        .collect();
    (header, dsds)
}

fn get<'a>(header: &'a HashMap<String, String>, key: &str) -> SarResult<&'a str> {
    header
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| SarError::Malformed(format!("header key {key} missing")))
}

fn get_f64(header: &HashMap<String, String>, key: &str) -> SarResult<f64> {
    get(header, key)?
        .trim_start_matches('+')
        .parse()
        .map_err(|_| SarError::Malformed(format!("header key {key} is not numeric")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_values_lose_quotes_and_units() {
        let raw = b"PRODUCT=\"ASA_IMP_1PNESA\"\nRANGE_SPACING=+1.25000000e+01<m>\nPASS=\"DESCENDING\"\n";
        let header = parse_header(raw);
        assert_eq!(header["PRODUCT"], "ASA_IMP_1PNESA");
        assert_eq!(header["RANGE_SPACING"], "+1.25000000e+01");
        assert_eq!(header["PASS"], "DESCENDING");
    }

    #[test]
    fn sph_splits_descriptor_blocks() {
        let raw = b"SPH_DESCRIPTOR=\"Image Mode Precision Image\"\nFIRST_NEAR_LAT=+0049334384<10-6degN>\nDS_NAME=\"MDS1\"\nDS_TYPE=M\nNUM_DSR=+0000008192\nDS_NAME=\"GEOLOCATION GRID ADS\"\nDS_TYPE=A\nNUM_DSR=+0000000012\n";
        let (header, dsds) = parse_sph(raw);
        assert_eq!(header["FIRST_NEAR_LAT"], "+0049334384");
        assert_eq!(dsds.len(), 2);
        assert_eq!(dsds[0]["DS_TYPE"], "M");
        assert_eq!(dsds[0]["NUM_DSR"], "+0000008192");
    }

    #[test]
    fn numeric_values_accept_leading_plus() {
        let mut header = HashMap::new();
        header.insert("LINE_LENGTH".to_string(), "+0005681".to_string());
        assert_eq!(get_f64(&header, "LINE_LENGTH").unwrap(), 5681.0);
    }

    #[test]
    fn envisat_filename_maps_to_asar() {
        let pattern = Regex::new(PATTERN).unwrap();
        let name = "ASA_APP_1PNPDE20040116_094601_000000182023_00265_09832_6044.N1";
        let captures = pattern.captures(name).unwrap();
        assert_eq!(&captures["satellite_id"], "N1");
        assert_eq!(&captures["product_id"], "ASA_APP_1P");
    }
}
