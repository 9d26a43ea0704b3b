//! ALOS PALSAR-1/2 products in CEOS format
//!
//! References: NEB-070062B ALOS/PALSAR Level 1.1/1.5 product format
//! description (JAXA 2009); ALOS-2/PALSAR-2 Level 1.1/1.5/2.1/3.1 CEOS SAR
//! product format description.
//!
//! The leader (`LED-...`) is a chain of variable-length records. Its file
//! descriptor declares length and count for every record group; the groups
//! are walked strictly in declaration order, and the trailing
//! facility-related records are consumed by their own embedded length
//! fields until end-of-file.

use crate::dates::parse_date;
use crate::io::records::{
    ascii_i64, be_i32, facility_records, field, Decode, RecordLayout, Value,
};
use crate::io::{archive, crs};
use crate::types::{
    BoundingBox, Extensions, Format, OrbitDirection, Polarization, SarError, SarResult, Scene,
    SceneMetadata,
};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

/// PALSAR-1 and PALSAR-2 leader naming conventions, tried in order.
const PATTERNS: [&str; 2] = [
    r"^LED-ALPSR(?P<sub>P|S)(?P<orbit>[0-9]{5})(?P<frame>[0-9]{4})-(?P<mode>[HWDPC])(?P<level>1\.[015])(?P<proc>G|_)(?P<proj>[UPML_])(?P<orbit_dir>A|D)$",
    r"^LED-ALOS2(?P<orbit>[0-9]{5})(?P<frame>[0-9]{4})-(?P<date>[0-9]{6})-(?P<mode>SBS|UBS|UBD|HBS|HBD|HBQ|FBS|FBD|FBQ|WBS|WBD|WWS|WWD|VBS|VBD)(?P<look_dir>L|R)(?P<level>1\.0|1\.1|1\.5|2\.1|3\.1)(?P<proc>[GR_])(?P<proj>[UPML_])(?P<orbit_dir>A|D)$",
];

/// Record group counts and lengths declared by the leader file descriptor.
const FILE_DESCRIPTOR: RecordLayout = RecordLayout {
    name: "file_descriptor",
    fields: &[
        field("mission_code", 48, 3, Decode::Text),
        field("dss_n", 180, 6, Decode::Int),
        field("dss_l", 186, 6, Decode::Int),
        field("mpd_n", 192, 6, Decode::Int),
        field("mpd_l", 198, 6, Decode::Int),
        field("ppd_n", 204, 6, Decode::Int),
        field("ppd_l", 210, 6, Decode::Int),
        field("adr_n", 216, 6, Decode::Int),
        field("adr_l", 222, 6, Decode::Int),
        field("rdr_n", 228, 6, Decode::Int),
        field("rdr_l", 234, 6, Decode::Int),
        field("dqs_n", 252, 6, Decode::Int),
        field("dqs_l", 258, 6, Decode::Int),
    ],
};

const DATA_SET_SUMMARY: RecordLayout = RecordLayout {
    name: "data_set_summary",
    fields: &[
        field("lines", 324, 8, Decode::Int),
        field("samples", 332, 8, Decode::Int),
        field("incidence", 484, 8, Decode::Float),
        field("wavelength", 500, 16, Decode::Float),
        field("proc_facility", 1046, 16, Decode::Text),
        field("proc_system", 1062, 8, Decode::Text),
        field("proc_version", 1070, 8, Decode::Text),
        field("looks_azimuth", 1174, 16, Decode::Float),
        field("looks_range", 1190, 16, Decode::Float),
        field("orbit", 1534, 8, Decode::Text),
        field("spacing_azimuth", 1686, 16, Decode::Float),
        field("spacing_range", 1702, 16, Decode::Float),
    ],
};

/// Corner coordinates of the map projection record.
const MAP_PROJECTION_CORNERS: RecordLayout = RecordLayout {
    name: "map_projection",
    fields: &[
        field("lat_1", 1072, 16, Decode::Float),
        field("lon_1", 1088, 16, Decode::Float),
        field("lat_2", 1104, 16, Decode::Float),
        field("lon_2", 1120, 16, Decode::Float),
        field("lat_3", 1136, 16, Decode::Float),
        field("lon_3", 1152, 16, Decode::Float),
        field("lat_4", 1168, 16, Decode::Float),
        field("lon_4", 1184, 16, Decode::Float),
        field("projdesc", 412, 32, Decode::Text),
    ],
};

const RADIOMETRIC: RecordLayout = RecordLayout {
    name: "radiometric",
    fields: &[field("k_db", 20, 16, Decode::Float)],
};

pub fn parse(scene: &Path) -> SarResult<Scene> {
    let (file, captures_pattern) = resolve_leader(scene)?;
    let pattern = Regex::new(captures_pattern).expect("static pattern");
    let led_name = super::member_name(scene, &file).to_string();
    let captures = pattern
        .captures(&led_name)
        .ok_or_else(|| SarError::NotFound {
            scene: scene.to_path_buf(),
            handler: "CEOS_PSR",
        })?;

    let led = archive::read_member(scene, &file)?;
    let summary = parse_summary(scene)?;

    // walk the record chain declared by the file descriptor
    let p1 = be_i32(&led, 8)? as usize;
    let fd = led
        .get(..p1)
        .ok_or_else(|| SarError::Malformed("leader shorter than its file descriptor".to_string()))?;
    let fdv = FILE_DESCRIPTOR.read(fd)?;
    let sensor = match fdv["mission_code"].as_text()? {
        "AL1" => "PSR1",
        "AL2" => "PSR2",
        other => {
            return Err(SarError::Malformed(format!("unknown mission code {other}")));
        }
    };

    let group_len = |n: &Value, l: &Value| -> SarResult<usize> {
        Ok((n.as_i64()? * l.as_i64()?) as usize)
    };
    let mut p0 = p1;
    let mut p1 = p1 + group_len(&fdv["dss_n"], &fdv["dss_l"])?;
    let dss = slice_record(&led, p0, p1, "data set summary")?;

    let mpd_len = group_len(&fdv["mpd_n"], &fdv["mpd_l"])?;
    let (projection, mut corners) = if mpd_len > 0 {
        p0 = p1;
        p1 += mpd_len;
        let mpd = slice_record(&led, p0, p1, "map projection")?;
        let (wkt, box_) = map_projection(mpd)?;
        (wkt, Some(box_))
    } else {
        (crs::wgs84_wkt().to_string(), None)
    };

    for (n, l) in [
        (&fdv["ppd_n"], &fdv["ppd_l"]),
        (&fdv["adr_n"], &fdv["adr_l"]),
    ] {
        p0 = p1;
        p1 += group_len(n, l)?;
        slice_record(&led, p0, p1, "platform position / attitude")?;
    }

    p0 = p1;
    p1 += group_len(&fdv["rdr_n"], &fdv["rdr_l"])?;
    let rdr = slice_record(&led, p0, p1, "radiometric")?;
    let k_db = RADIOMETRIC.read(rdr)?["k_db"].as_f64()?;

    p0 = p1;
    p1 += group_len(&fdv["dqs_n"], &fdv["dqs_l"])?;
    slice_record(&led, p0, p1, "data quality summary")?;

    // unknown total count; malformed lengths must not yield partial metadata
    facility_records(&led, p1)?;

    let values = DATA_SET_SUMMARY.read(dss)?;
    let lines = values["lines"].as_i64()? as usize * 2;
    let samples = values["samples"].as_i64()? as usize * 2;
    let orbit = OrbitDirection::parse(values["orbit"].as_text()?)?;

    let acquisition_mode = match captures.name("sub") {
        Some(sub) => format!("{}{}", sub.as_str(), &captures["mode"]),
        None => captures["mode"].to_string(),
    };
    let product = captures["level"].to_string();

    let (start, stop) = scene_times(&summary, &led, &led_name)?;

    // channel list from the image file names
    let img_pattern = Regex::new(r"^IMG-").expect("static pattern");
    let img_members = archive::find_files(scene, &img_pattern, false)?;
    let pol_pattern = Regex::new("[HV]{2}").expect("static pattern");
    let mut polarizations = Vec::new();
    for member in &img_members {
        if let Some(m) = pol_pattern.find(super::basename(member)) {
            let pol = Polarization::parse(m.as_str())?;
            if !polarizations.contains(&pol) {
                polarizations.push(pol);
            }
        }
    }

    if corners.is_none() {
        corners = summary_corners(&summary);
    }
    let corners = match corners {
        Some(c) => c,
        None => image_corners(scene, &img_members)?,
    };

    let meta = SceneMetadata {
        sensor: sensor.to_string(),
        projection,
        orbit,
        polarizations,
        acquisition_mode,
        start,
        stop,
        product,
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
            k_db: Some(k_db),
            orbit_number_abs: captures["orbit"].parse::<i64>().ok(),
            frame_number: captures["frame"].parse::<i64>().ok(),
            proc_facility: Some(values["proc_facility"].as_text()?.to_string()),
            proc_system: Some(values["proc_system"].as_text()?.to_string()),
            proc_version: Some(values["proc_version"].as_text()?.to_string()),
            ..Extensions::default()
        },
    };

    Ok(Scene {
        format: Format::CeosPsr,
        scene: scene.to_path_buf(),
        file,
        meta,
    })
}

/// Try both leader naming conventions; the last pattern's failure wins, as
/// with the upstream ordered trial.
fn resolve_leader(scene: &Path) -> SarResult<(String, &'static str)> {
    let mut last_err = None;
    for pattern_src in PATTERNS {
        let pattern = Regex::new(pattern_src).expect("static pattern");
        match super::examine(scene, &pattern, false, "CEOS_PSR") {
            Ok(file) => return Ok((file, pattern_src)),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.expect("at least one pattern tried"))
}

fn slice_record<'a>(led: &'a [u8], p0: usize, p1: usize, name: &str) -> SarResult<&'a [u8]> {
    led.get(p0..p1).ok_or_else(|| {
        SarError::Malformed(format!(
            "{name} record {p0}..{p1} exceeds leader of {} bytes",
            led.len()
        ))
    })
}

/// Projection WKT and corner box from the map projection record. Four
/// projection families are distinguished by the string tag at byte 412.
fn map_projection(mpd: &[u8]) -> SarResult<(String, BoundingBox)> {
    let values = MAP_PROJECTION_CORNERS.read(mpd)?;
    let points = [
        (values["lon_1"].as_f64()?, values["lat_1"].as_f64()?),
        (values["lon_2"].as_f64()?, values["lat_2"].as_f64()?),
        (values["lon_3"].as_f64()?, values["lat_3"].as_f64()?),
        (values["lon_4"].as_f64()?, values["lat_4"].as_f64()?),
    ];
    let corners = BoundingBox::from_points(&points)?;

    let float_at = |offset: usize| crate::io::records::ascii_f64(mpd, offset, 16);
    let wkt = match values["projdesc"].as_text()? {
        "UTM-PROJECTION" => {
            let zone = ascii_i64(mpd, 476, 4)? as u32;
            let false_northing = float_at(496)?;
            crs::utm_wkt(zone, false_northing <= 0.0)
        }
        "UPS-PROJECTION" => {
            let lon = float_at(624)?;
            let lat = float_at(640)?;
            let scale = float_at(656)?;
            crs::polar_stereographic_wkt(lat, lon, scale)
        }
        "MER-PROJECTION" => {
            let lon = float_at(736)?;
            let lat = float_at(752)?;
            crs::mercator_wkt(lat, lon)
        }
        "LCC-PROJECTION" => {
            let lon = float_at(736)?;
            let lat = float_at(752)?;
            let stdp1 = float_at(768)?;
            let stdp2 = float_at(784)?;
            crs::lambert_conformal_conic_wkt(stdp1, stdp2, lat, lon)
        }
        _ => crs::wgs84_wkt().to_string(),
    };
    Ok((wkt, corners))
}

/// The `summary.txt` / `workreport` companion file holds `key="value"`
/// lines with scene times and, for geocoded products, corner coordinates.
fn parse_summary(scene: &Path) -> SarResult<HashMap<String, String>> {
    let pattern = Regex::new("summary|workreport").expect("static pattern");
    let mut summary = HashMap::new();
    let members = archive::find_files(scene, &pattern, false)?;
    let member = match members.first() {
        Some(m) => m,
        None => return Ok(summary),
    };
    let text = String::from_utf8_lossy(&archive::read_member(scene, member)?).to_string();
    for line in text.lines() {
        if let Some((key, value)) = line.split_once('=') {
            summary.insert(
                key.trim().to_string(),
                value.trim().trim_matches('"').to_string(),
            );
        }
    }
    Ok(summary)
}

fn scene_times(
    summary: &HashMap<String, String>,
    led: &[u8],
    led_name: &str,
) -> SarResult<(String, String)> {
    if let (Some(start), Some(stop)) = (
        summary.get("Img_SceneStartDateTime"),
        summary.get("Img_SceneEndDateTime"),
    ) {
        return Ok((parse_date(start)?, parse_date(stop)?));
    }
    // fall back to a raw scan of the leader text
    let text = String::from_utf8_lossy(led);
    let start = scan_time(&text, "Img_SceneStartDateTime")?;
    let stop = scan_time(&text, "Img_SceneEndDateTime")?;
    match (start, stop) {
        (Some(start), Some(stop)) => Ok((start, stop)),
        _ => Err(SarError::Malformed(format!(
            "start and stop time stamps cannot be extracted; see file {led_name}"
        ))),
    }
}

fn scan_time(text: &str, key: &str) -> SarResult<Option<String>> {
    let pattern =
        Regex::new(&format!(r#"{key}[ ="]*(\d+\s[\d:.]+)"#)).expect("key is a fixed identifier");
    match pattern.captures(text) {
        Some(c) => Ok(Some(parse_date(&c[1])?)),
        None => Ok(None),
    }
}

/// Corner box from workreport coordinate entries, if present.
fn summary_corners(summary: &HashMap<String, String>) -> Option<BoundingBox> {
    let mut lat = Vec::new();
    let mut lon = Vec::new();
    for (key, value) in summary {
        if key.contains("Latitude") {
            if let Ok(v) = value.parse::<f64>() {
                lat.push(v);
            }
        } else if key.contains("Longitude") {
            if let Ok(v) = value.parse::<f64>() {
                lon.push(v);
            }
        }
    }
    if lat.is_empty() || lon.is_empty() {
        return None;
    }
    let points: Vec<(f64, f64)> = lon
        .iter()
        .flat_map(|&x| lat.iter().map(move |&y| (x, y)))
        .collect();
    BoundingBox::from_points(&points).ok()
}

/// Fallback: decode corner micro-degrees from the first and last signal
/// data records of an IMG file.
fn image_corners(scene: &Path, img_members: &[String]) -> SarResult<BoundingBox> {
    let member = img_members.first().ok_or_else(|| {
        SarError::Malformed("no IMG file available for corner extraction".to_string())
    })?;
    let fd = archive::read_member_prefix(scene, member, 720)?;
    let records = ascii_i64(&fd, 180, 6)? as u64;
    let record_length = ascii_i64(&fd, 186, 6)? as u64;
    if records == 0 {
        return Err(SarError::Malformed("IMG file declares zero records".to_string()));
    }
    let first = archive::read_member_range(scene, member, 720, 412)?;
    let last = archive::read_member_range(scene, member, 720 + record_length * (records - 1), 412)?;

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palsar1_leader_name() {
        let pattern = Regex::new(PATTERNS[0]).unwrap();
        let captures = pattern.captures("LED-ALPSRP224031000-H1.1__A").unwrap();
        assert_eq!(&captures["sub"], "P");
        assert_eq!(&captures["mode"], "H");
        assert_eq!(&captures["level"], "1.1");
        assert_eq!(&captures["orbit_dir"], "A");
    }

    #[test]
    fn palsar2_leader_name() {
        let pattern = Regex::new(PATTERNS[1]).unwrap();
        let captures = pattern
            .captures("LED-ALOS2048992750-150420-FBDR1.5RUD")
            .unwrap();
        assert_eq!(&captures["mode"], "FBD");
        assert_eq!(&captures["level"], "1.5");
        assert_eq!(&captures["orbit_dir"], "D");
    }

    #[test]
    fn summary_corner_extraction() {
        let mut summary = HashMap::new();
        summary.insert("Img_ImageSceneLeftTopLatitude".to_string(), "50.1".to_string());
        summary.insert("Img_ImageSceneRightBottomLatitude".to_string(), "48.9".to_string());
        summary.insert("Img_ImageSceneLeftTopLongitude".to_string(), "10.0".to_string());
        summary.insert("Img_ImageSceneRightBottomLongitude".to_string(), "12.0".to_string());
        let corners = summary_corners(&summary).unwrap();
        assert_eq!(corners.ymin, 48.9);
        assert_eq!(corners.ymax, 50.1);
        assert_eq!(corners.xmin, 10.0);
        assert_eq!(corners.xmax, 12.0);
    }

    #[test]
    fn workreport_time_scan() {
        let text = r#"other="1" Img_SceneStartDateTime="20110902 01:52:48.123" x"#;
        let start = scan_time(text, "Img_SceneStartDateTime").unwrap().unwrap();
        assert_eq!(start, "20110902T015248");
    }
}
