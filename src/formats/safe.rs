//! Sentinel-1 products in the SAFE format
//!
//! Reference: S1-RS-MDA-52-7443 Sentinel-1 product specification. A scene
//! is a `.SAFE` folder (often zipped) with a `manifest.safe` XFDU manifest
//! and per-swath annotation XML files. The manifest carries the acquisition
//! metadata; raster geometry comes from the first annotation file.

use crate::dates::parse_date;
use crate::io::{archive, crs, xml};
use crate::types::{
    BoundingBox, Extensions, Format, OrbitDirection, Polarization, SarError, SarResult, Scene,
    SceneMetadata,
};
use regex::Regex;
use serde::Deserialize;
use std::path::Path;

const PATTERN: &str = r"^(?P<sensor>S1[AB])_(?P<beam>S1|S2|S3|S4|S5|S6|IW|EW|WV|EN|N1|N2|N3|N4|N5|N6|IM)_(?P<product>SLC|GRD|OCN)(?:F|H|M|_)_(?:1|2)(?P<category>S|A)(?P<pols>SH|SV|DH|DV|VV|HH|HV|VH)_(?P<start>[0-9]{8}T[0-9]{6})_(?P<stop>[0-9]{8}T[0-9]{6})_(?P<orbitNumber>[0-9]{6})_(?P<dataTakeID>[0-9A-F]{6})_(?P<productIdentifier>[0-9A-F]{4})\.SAFE$";

const PATTERN_DS: &str = r"^s1[ab]-(?P<swath>s[1-6]|iw[1-3]?|ew[1-5]?|wv[1-2]|n[1-6])-(?P<product>slc|grd|ocn)-(?P<pol>hh|hv|vv|vh)-(?P<start>[0-9]{8}t[0-9]{6})-(?P<stop>[0-9]{8}t[0-9]{6})-(?:[0-9]{6})-(?:[0-9a-f]{6})-(?P<id>[0-9]{3})\.xml$";

/// Swath annotation, reduced to the raster geometry block.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Annotation {
    image_annotation: ImageAnnotation,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageAnnotation {
    image_information: ImageInformation,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageInformation {
    range_pixel_spacing: f64,
    azimuth_pixel_spacing: f64,
    number_of_samples: usize,
    number_of_lines: usize,
}

pub fn parse(scene: &Path) -> SarResult<Scene> {
    let pattern = Regex::new(PATTERN).expect("static pattern");
    let file = super::examine(scene, &pattern, true, "SAFE")?;

    let manifest_pattern = Regex::new(r"manifest\.safe$").expect("static pattern");
    let manifest_member = super::examine(scene, &manifest_pattern, false, "SAFE")?;
    let manifest_raw = archive::read_member(scene, &manifest_member)?;
    let manifest = xml::parse(&String::from_utf8_lossy(&manifest_raw))?;

    let product = manifest.find_text("s1sarl1:productType")?.to_string();
    if product == "OCN" {
        return Err(SarError::UnsupportedProduct(
            "OCN products carry no raster annotation".to_string(),
        ));
    }

    let sensor = format!(
        "{}{}",
        manifest.find_text("safe:familyName")?.replace("ENTINEL-", ""),
        manifest.find_text("safe:number")?
    );
    let acquisition_mode = manifest.find_text("s1sarl1:mode")?.to_string();
    let start = parse_date(manifest.find_text("safe:startTime")?)?;
    let stop = parse_date(manifest.find_text("safe:stopTime")?)?;
    let orbit = OrbitDirection::parse(manifest.find_text("s1:pass")?)?;
    let category = manifest.find_text("s1sarl1:productClass")?.to_string();

    let mut polarizations = Vec::new();
    for node in manifest.findall("s1sarl1:transmitterReceiverPolarisation") {
        let pol = Polarization::parse(&node.text)?;
        if !polarizations.contains(&pol) {
            polarizations.push(pol);
        }
    }

    // footprint: "lat,lon" pairs separated by whitespace
    let mut coordinates = Vec::new();
    for pair in manifest.find_text("coordinates")?.split_whitespace() {
        let (lat, lon) = pair
            .split_once(',')
            .ok_or_else(|| SarError::Xml(format!("malformed footprint pair {pair}")))?;
        let lat: f64 = lat
            .trim()
            .parse()
            .map_err(|_| SarError::Xml(format!("non-numeric latitude {lat}")))?;
        let lon: f64 = lon
            .trim()
            .parse()
            .map_err(|_| SarError::Xml(format!("non-numeric longitude {lon}")))?;
        coordinates.push((lon, lat));
    }
    let corners = BoundingBox::from_points(&coordinates)?;

    let orbit_number_abs = manifest
        .find("safe:orbitNumber[@type=\"start\"]")
        .and_then(|n| n.text.parse().ok());
    let orbit_number_rel = manifest
        .find("safe:relativeOrbitNumber[@type=\"start\"]")
        .and_then(|n| n.text.parse().ok());
    let ipf_version = manifest
        .find("safe:software")
        .and_then(|n| n.attr("version"))
        .and_then(|v| v.parse().ok());

    // raster geometry from the first annotation file
    let ds_pattern = Regex::new(PATTERN_DS).expect("static pattern");
    let annotation_members = archive::find_files(scene, &ds_pattern, false)?;
    let annotation_member = annotation_members.first().ok_or_else(|| SarError::NotFound {
        scene: scene.to_path_buf(),
        handler: "SAFE",
    })?;
    let annotation_raw = archive::read_member(scene, annotation_member)?;
    let annotation: Annotation =
        quick_xml::de::from_str(&String::from_utf8_lossy(&annotation_raw))
            .map_err(|e| SarError::Xml(format!("{annotation_member}: {e}")))?;
    let image = annotation.image_annotation.image_information;

    let meta = SceneMetadata {
        sensor,
        projection: crs::wgs84_wkt().to_string(),
        orbit,
        polarizations,
        acquisition_mode,
        start,
        stop,
        product,
        spacing: (image.range_pixel_spacing, image.azimuth_pixel_spacing),
        samples: image.number_of_samples,
        lines: image.number_of_lines,
        corners,
        extensions: Extensions {
            orbit_number_abs,
            orbit_number_rel,
            ipf_version,
            category: Some(category),
            coordinates,
            ..Extensions::default()
        },
    };

    Ok(Scene {
        format: Format::Safe,
        scene: scene.to_path_buf(),
        file,
        meta,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_folder_name_decomposition() {
        let pattern = Regex::new(PATTERN).unwrap();
        let name = "S1A_IW_GRDH_1SDV_20200101T170815_20200101T170840_030639_038261_1D85.SAFE";
        let captures = pattern.captures(name).unwrap();
        assert_eq!(&captures["sensor"], "S1A");
        assert_eq!(&captures["beam"], "IW");
        assert_eq!(&captures["product"], "GRD");
        assert_eq!(&captures["pols"], "DV");
        assert_eq!(&captures["start"], "20200101T170815");
    }

    #[test]
    fn annotation_name_decomposition() {
        let pattern = Regex::new(PATTERN_DS).unwrap();
        let name = "s1a-iw-grd-vv-20200101t170815-20200101t170840-030639-038261-001.xml";
        let captures = pattern.captures(name).unwrap();
        assert_eq!(&captures["swath"], "iw");
        assert_eq!(&captures["pol"], "vv");
    }

    #[test]
    fn annotation_raster_block_deserializes() {
        let xml = r#"<product>
            <imageAnnotation>
              <imageInformation>
                <rangePixelSpacing>1.000000e+01</rangePixelSpacing>
                <azimuthPixelSpacing>1.000000e+01</azimuthPixelSpacing>
                <numberOfSamples>25284</numberOfSamples>
                <numberOfLines>16797</numberOfLines>
              </imageInformation>
            </imageAnnotation>
        </product>"#;
        let annotation: Annotation = quick_xml::de::from_str(xml).unwrap();
        let image = annotation.image_annotation.image_information;
        assert_eq!(image.number_of_samples, 25284);
        assert_eq!(image.number_of_lines, 16797);
        assert_eq!(image.range_pixel_spacing, 10.0);
    }
}
