//! Coordinate reference system descriptors
//!
//! Map-projection records in CEOS leaders select among four projection
//! families; each is rendered as a WKT string on the WGS84 datum. Products
//! without a map projection record fall back to plain geographic WGS84.

const WGS84_GEOGCS: &str = "GEOGCS[\"WGS 84\",\
DATUM[\"WGS_1984\",SPHEROID[\"WGS 84\",6378137,298.257223563,AUTHORITY[\"EPSG\",\"7030\"]],AUTHORITY[\"EPSG\",\"6326\"]],\
PRIMEM[\"Greenwich\",0,AUTHORITY[\"EPSG\",\"8901\"]],\
UNIT[\"degree\",0.01745329251994328,AUTHORITY[\"EPSG\",\"9122\"]],\
AUTHORITY[\"EPSG\",\"4326\"]]";

/// Geographic WGS84 (EPSG:4326).
pub fn wgs84_wkt() -> &'static str {
    WGS84_GEOGCS
}

fn projcs(name: &str, projection: &str, parameters: &[(&str, f64)], authority: Option<u32>) -> String {
    let mut wkt = format!("PROJCS[\"{name}\",{WGS84_GEOGCS},PROJECTION[\"{projection}\"]");
    for (key, value) in parameters {
        wkt.push_str(&format!(",PARAMETER[\"{key}\",{value}]"));
    }
    wkt.push_str(",UNIT[\"metre\",1,AUTHORITY[\"EPSG\",\"9001\"]]");
    if let Some(code) = authority {
        wkt.push_str(&format!(",AUTHORITY[\"EPSG\",\"{code}\"]"));
    }
    wkt.push(']');
    wkt
}

/// WGS84 UTM zone; EPSG 326xx north, 327xx south.
pub fn utm_wkt(zone: u32, north: bool) -> String {
    let epsg = if north { 32600 + zone } else { 32700 + zone };
    let hemisphere = if north { "N" } else { "S" };
    let central_meridian = f64::from(zone) * 6.0 - 183.0;
    projcs(
        &format!("WGS 84 / UTM zone {zone}{hemisphere}"),
        "Transverse_Mercator",
        &[
            ("latitude_of_origin", 0.0),
            ("central_meridian", central_meridian),
            ("scale_factor", 0.9996),
            ("false_easting", 500000.0),
            ("false_northing", if north { 0.0 } else { 10000000.0 }),
        ],
        Some(epsg),
    )
}

/// Polar stereographic with explicit center and scale.
pub fn polar_stereographic_wkt(center_lat: f64, center_lon: f64, scale: f64) -> String {
    projcs(
        "WGS 84 / Polar Stereographic",
        "Polar_Stereographic",
        &[
            ("latitude_of_origin", center_lat),
            ("central_meridian", center_lon),
            ("scale_factor", scale),
            ("false_easting", 0.0),
            ("false_northing", 0.0),
        ],
        None,
    )
}

/// Mercator centered on the scene.
pub fn mercator_wkt(center_lat: f64, center_lon: f64) -> String {
    projcs(
        "WGS 84 / Mercator",
        "Mercator_1SP",
        &[
            ("latitude_of_origin", center_lat),
            ("central_meridian", center_lon),
            ("scale_factor", 1.0),
            ("false_easting", 0.0),
            ("false_northing", 0.0),
        ],
        None,
    )
}

/// Lambert conformal conic with two standard parallels.
pub fn lambert_conformal_conic_wkt(
    std_parallel_1: f64,
    std_parallel_2: f64,
    center_lat: f64,
    center_lon: f64,
) -> String {
    projcs(
        "WGS 84 / Lambert Conformal Conic",
        "Lambert_Conformal_Conic_2SP",
        &[
            ("standard_parallel_1", std_parallel_1),
            ("standard_parallel_2", std_parallel_2),
            ("latitude_of_origin", center_lat),
            ("central_meridian", center_lon),
            ("false_easting", 0.0),
            ("false_northing", 0.0),
        ],
        None,
    )
}
