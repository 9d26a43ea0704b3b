//! TerraSAR-X and TanDEM-X products
//!
//! Reference: TX-GS-DD-3302 TerraSAR-X basic product specification. The
//! scene folder is named after its main annotation XML file, which holds
//! the complete acquisition and raster metadata.

use crate::dates::parse_date;
use crate::io::{archive, crs, xml};
use crate::types::{
    BoundingBox, Extensions, Format, OrbitDirection, Polarization, SarError, SarResult, Scene,
    SceneMetadata,
};
use regex::Regex;
use std::path::Path;

const PATTERN: &str = r"^(?P<sat>T[DS]X1)_SAR__(?P<prod>SSC|MGD|GEC|EEC)_(?P<var>____|SE__|RE__|MON1|MON2|BTX1|BRX2)_(?P<mode>SM|SL|HS|HS300|ST|SC)_(?P<pols>[SDTQ])_(?:SRA|DRA)_(?P<start>[0-9]{8}T[0-9]{6})_(?P<stop>[0-9]{8}T[0-9]{6})(?:\.xml|)$";

pub fn parse(scene: &Path) -> SarResult<Scene> {
    let pattern = Regex::new(PATTERN).expect("static pattern");
    let file = super::examine(scene, &pattern, false, "TSX")?;

    let raw = archive::read_member(scene, &file)?;
    let doc = xml::parse(&String::from_utf8_lossy(&raw))?;

    let sensor = doc.find_text("generalHeader/mission")?.replace('-', "");
    let product = doc.find_text("orderInfo/productVariant")?.to_string();
    let orbit = OrbitDirection::parse(doc.find_text("missionInfo/orbitDirection")?)?;
    let acquisition_mode = doc.find_text("acquisitionInfo/imagingMode")?.to_string();
    let start = parse_date(doc.find_text("sceneInfo/start/timeUTC")?)?;
    let stop = parse_date(doc.find_text("sceneInfo/stop/timeUTC")?)?;

    let mut polarizations = Vec::new();
    for node in doc.findall("acquisitionInfo/polarisationList/polLayer") {
        let pol = Polarization::parse(&node.text)?;
        if !polarizations.contains(&pol) {
            polarizations.push(pol);
        }
    }

    let spacing = (
        find_f64(&doc, "imageDataInfo/imageRaster/columnSpacing")?,
        find_f64(&doc, "imageDataInfo/imageRaster/rowSpacing")?,
    );
    let samples = find_f64(&doc, "imageDataInfo/imageRaster/numberOfColumns")? as usize;
    let lines = find_f64(&doc, "imageDataInfo/imageRaster/numberOfRows")? as usize;
    let looks = (
        find_f64(&doc, "imageDataInfo/imageRaster/rangeLooks")?,
        find_f64(&doc, "imageDataInfo/imageRaster/azimuthLooks")?,
    );
    let incidence_angle = find_f64(&doc, "sceneInfo/sceneCenterCoord/incidenceAngle")?;

    let mut points = Vec::new();
    for corner in doc.findall("sceneInfo/sceneCornerCoord") {
        let lat = corner
            .children
            .iter()
            .find(|c| c.tag == "lat")
            .and_then(|c| c.text.parse::<f64>().ok());
        let lon = corner
            .children
            .iter()
            .find(|c| c.tag == "lon")
            .and_then(|c| c.text.parse::<f64>().ok());
        if let (Some(lat), Some(lon)) = (lat, lon) {
            points.push((lon, lat));
        }
    }
    let corners = BoundingBox::from_points(&points)?;

    let meta = SceneMetadata {
        sensor,
        projection: crs::wgs84_wkt().to_string(),
        orbit,
        polarizations,
        acquisition_mode,
        start,
        stop,
        product,
        spacing,
        samples,
        lines,
        corners,
        extensions: Extensions {
            looks: Some(looks),
            incidence_angle: Some(incidence_angle),
            orbit_number_abs: doc
                .find("missionInfo/absOrbit")
                .and_then(|n| n.text.parse().ok()),
            orbit_number_rel: doc
                .find("missionInfo/relOrbit")
                .and_then(|n| n.text.parse().ok()),
            ..Extensions::default()
        },
    };

    Ok(Scene {
        format: Format::Tsx,
        scene: scene.to_path_buf(),
        file,
        meta,
    })
}

fn find_f64(doc: &xml::XmlDoc, path: &str) -> SarResult<f64> {
    doc.find_text(path)?
        .parse()
        .map_err(|_| SarError::Xml(format!("non-numeric value at {path}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANNOTATION: &str = r#"<level1Product>
      <generalHeader><mission>TDX-1</mission></generalHeader>
      <productInfo>
        <orderInfo><productVariant>SSC</productVariant></orderInfo>
        <missionInfo>
          <absOrbit>12345</absOrbit>
          <relOrbit>51</relOrbit>
          <orbitDirection>DESCENDING</orbitDirection>
        </missionInfo>
        <acquisitionInfo>
          <imagingMode>SM</imagingMode>
          <polarisationList><polLayer>HH</polLayer><polLayer>VV</polLayer></polarisationList>
        </acquisitionInfo>
        <imageDataInfo>
          <imageRaster>
            <numberOfRows>20000</numberOfRows>
            <numberOfColumns>15000</numberOfColumns>
            <rowSpacing>0.9</rowSpacing>
            <columnSpacing>1.3</columnSpacing>
            <azimuthLooks>1.0</azimuthLooks>
            <rangeLooks>1.0</rangeLooks>
          </imageRaster>
        </imageDataInfo>
        <sceneInfo>
          <start><timeUTC>2014-05-11T05:12:47.543987Z</timeUTC></start>
          <stop><timeUTC>2014-05-11T05:12:55.143987Z</timeUTC></stop>
          <sceneCenterCoord><incidenceAngle>33.2</incidenceAngle></sceneCenterCoord>
          <sceneCornerCoord><lat>50.1</lat><lon>8.5</lon></sceneCornerCoord>
          <sceneCornerCoord><lat>50.1</lat><lon>9.2</lon></sceneCornerCoord>
          <sceneCornerCoord><lat>49.6</lat><lon>8.5</lon></sceneCornerCoord>
          <sceneCornerCoord><lat>49.6</lat><lon>9.2</lon></sceneCornerCoord>
        </sceneInfo>
      </productInfo>
    </level1Product>"#;

    #[test]
    fn scene_name_decomposition() {
        let pattern = Regex::new(PATTERN).unwrap();
        let name = "TDX1_SAR__SSC______SM_D_SRA_20140511T051247_20140511T051255";
        let captures = pattern.captures(name).unwrap();
        assert_eq!(&captures["sat"], "TDX1");
        assert_eq!(&captures["prod"], "SSC");
        assert_eq!(&captures["mode"], "SM");
        assert!(pattern.is_match(&format!("{name}.xml")));
    }

    #[test]
    fn annotation_fields_resolve() {
        let doc = xml::parse(ANNOTATION).unwrap();
        assert_eq!(doc.find_text("generalHeader/mission").unwrap(), "TDX-1");
        assert_eq!(
            doc.find_text("missionInfo/orbitDirection").unwrap(),
            "DESCENDING"
        );
        assert_eq!(
            find_f64(&doc, "imageDataInfo/imageRaster/numberOfRows").unwrap(),
            20000.0
        );
        assert_eq!(doc.findall("sceneInfo/sceneCornerCoord").len(), 4);
    }

    #[test]
    fn corner_box_from_annotation() {
        let doc = xml::parse(ANNOTATION).unwrap();
        let mut points = Vec::new();
        for corner in doc.findall("sceneInfo/sceneCornerCoord") {
            let lat: f64 = corner.children.iter().find(|c| c.tag == "lat").unwrap().text.parse().unwrap();
            let lon: f64 = corner.children.iter().find(|c| c.tag == "lon").unwrap().text.parse().unwrap();
            points.push((lon, lat));
        }
        let corners = BoundingBox::from_points(&points).unwrap();
        assert_eq!(corners.xmin, 8.5);
        assert_eq!(corners.ymax, 50.1);
    }
}
