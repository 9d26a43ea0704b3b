use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Polarization channels found in SAR products
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl Polarization {
    /// All channels in the canonical catalog order.
    pub const ALL: [Polarization; 4] = [
        Polarization::HH,
        Polarization::VV,
        Polarization::HV,
        Polarization::VH,
    ];

    /// Parse a channel code such as "VV" or "V/V" (ESA header notation).
    pub fn parse(code: &str) -> SarResult<Self> {
        match code.replace('/', "").to_uppercase().as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            other => Err(SarError::Malformed(format!(
                "invalid polarization code: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

/// Satellite pass direction during acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrbitDirection {
    Ascending,
    Descending,
}

impl OrbitDirection {
    /// Single-character code used in output base names and the catalog.
    pub fn as_char(self) -> char {
        match self {
            OrbitDirection::Ascending => 'A',
            OrbitDirection::Descending => 'D',
        }
    }

    /// Parse from a direction word or its first character ("ASCENDING", "A").
    pub fn parse(text: &str) -> SarResult<Self> {
        match text.chars().next() {
            Some('A') | Some('a') => Ok(OrbitDirection::Ascending),
            Some('D') | Some('d') => Ok(OrbitDirection::Descending),
            _ => Err(SarError::Malformed(format!(
                "invalid orbit direction: {text}"
            ))),
        }
    }
}

impl std::fmt::Display for OrbitDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Geographic bounding box in degrees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
}

impl BoundingBox {
    /// Smallest box enclosing a set of (lon, lat) points.
    pub fn from_points(points: &[(f64, f64)]) -> SarResult<Self> {
        if points.is_empty() {
            return Err(SarError::Malformed(
                "no coordinates available for bounding box".to_string(),
            ));
        }
        let mut bbox = BoundingBox {
            xmin: f64::INFINITY,
            xmax: f64::NEG_INFINITY,
            ymin: f64::INFINITY,
            ymax: f64::NEG_INFINITY,
        };
        for &(lon, lat) in points {
            bbox.xmin = bbox.xmin.min(lon);
            bbox.xmax = bbox.xmax.max(lon);
            bbox.ymin = bbox.ymin.min(lat);
            bbox.ymax = bbox.ymax.max(lat);
        }
        Ok(bbox)
    }

    /// WKT polygon representation (EPSG:4326, closed ring).
    pub fn to_wkt(&self) -> String {
        format!(
            "POLYGON(({x0} {y0}, {x1} {y0}, {x1} {y1}, {x0} {y1}, {x0} {y0}))",
            x0 = self.xmin,
            x1 = self.xmax,
            y0 = self.ymin,
            y1 = self.ymax
        )
    }
}

/// Supported vendor encodings, in registry order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Format {
    /// ERS in CEOS format (LEA_01.001 leader)
    CeosErs,
    /// ALOS PALSAR-1/2 in CEOS format (LED- leader)
    CeosPsr,
    /// Envisat ASAR / ERS in ESA format (.N1/.E1/.E2)
    Esa,
    /// Sentinel-1 SAFE
    Safe,
    /// TerraSAR-X / TanDEM-X
    Tsx,
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Format::CeosErs => "CEOS_ERS",
            Format::CeosPsr => "CEOS_PSR",
            Format::Esa => "ESA",
            Format::Safe => "SAFE",
            Format::Tsx => "TSX",
        };
        write!(f, "{name}")
    }
}

/// Additive, format-specific metadata
///
/// These fields never conflict with the canonical attributes; handlers fill
/// in whatever their format provides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extensions {
    /// (range, azimuth) looks
    pub looks: Option<(f64, f64)>,
    /// scene center incidence angle in degrees
    pub incidence_angle: Option<f64>,
    /// calibration constant in dB
    pub k_db: Option<f64>,
    /// per-sensor calibration offset in dB (ERS)
    pub sc_db: Option<f64>,
    pub orbit_number_abs: Option<i64>,
    pub orbit_number_rel: Option<i64>,
    pub frame_number: Option<i64>,
    /// platform heading in degrees
    pub heading: Option<f64>,
    pub proc_facility: Option<String>,
    pub proc_system: Option<String>,
    pub proc_version: Option<String>,
    /// Sentinel-1 Instrument Processing Facility version
    pub ipf_version: Option<f64>,
    /// Sentinel-1 product class (S: standard, A: annotation-only)
    pub category: Option<String>,
    /// footprint vertices as (lon, lat)
    pub coordinates: Vec<(f64, f64)>,
}

/// Unified metadata model populated by every format handler
///
/// All fields carry identical semantics across formats: downstream code
/// never branches on the producing format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneMetadata {
    /// platform/sensor family code (S1A, ASAR, ERS1, PSR2, TSX1, ...)
    pub sensor: String,
    /// coordinate reference system as WKT
    pub projection: String,
    pub orbit: OrbitDirection,
    /// ordered polarization channels present in the product
    pub polarizations: Vec<Polarization>,
    pub acquisition_mode: String,
    /// acquisition start, normalized to YYYYMMDDTHHMMSS
    pub start: String,
    /// acquisition stop, normalized to YYYYMMDDTHHMMSS
    pub stop: String,
    /// processing level / product type code
    pub product: String,
    /// (range, azimuth) pixel spacing in meters
    pub spacing: (f64, f64),
    pub samples: usize,
    pub lines: usize,
    /// geographic corner coordinates
    pub corners: BoundingBox,
    pub extensions: Extensions,
}

impl SceneMetadata {
    /// Check the invariants every valid record must satisfy before a handler
    /// may return it.
    pub fn validate(&self) -> SarResult<()> {
        if self.sensor.is_empty() {
            return Err(SarError::Malformed("sensor not populated".to_string()));
        }
        if self.projection.is_empty() {
            return Err(SarError::Malformed("projection not populated".to_string()));
        }
        if self.polarizations.is_empty() {
            return Err(SarError::Malformed(
                "no polarization channels found".to_string(),
            ));
        }
        if self.acquisition_mode.is_empty() || self.product.is_empty() {
            return Err(SarError::Malformed(
                "acquisition mode or product not populated".to_string(),
            ));
        }
        if self.start.len() != 15 || self.stop.len() != 15 {
            return Err(SarError::Malformed(format!(
                "timestamps not normalized: {} / {}",
                self.start, self.stop
            )));
        }
        if self.start > self.stop {
            return Err(SarError::Malformed(format!(
                "start {} is later than stop {}",
                self.start, self.stop
            )));
        }
        if self.samples == 0 || self.lines == 0 {
            return Err(SarError::Malformed(format!(
                "invalid raster dimensions: {} x {}",
                self.samples, self.lines
            )));
        }
        Ok(())
    }
}

/// A successfully identified scene
///
/// Binds the unified metadata to the producing format variant, the archive
/// path and the representative header/manifest file within it.
#[derive(Debug, Clone)]
pub struct Scene {
    pub format: Format,
    /// path to the scene directory or zip/tar archive
    pub scene: PathBuf,
    /// member path of the representative file within the scene
    pub file: String,
    pub meta: SceneMetadata,
}

impl Scene {
    /// Deterministic base name: sensor and mode padded to 4 characters,
    /// orbit direction and start time. Unique within a catalog.
    pub fn outname_base(&self) -> String {
        format!(
            "{:_<4}_{:_<4}_{}_{}",
            self.meta.sensor,
            self.meta.acquisition_mode,
            self.meta.orbit.as_char(),
            self.meta.start
        )
    }

    /// Bounding box polygon as WKT (EPSG:4326).
    pub fn bbox_wkt(&self) -> String {
        self.meta.corners.to_wkt()
    }

    pub fn scene_path(&self) -> &Path {
        &self.scene
    }
}

impl std::fmt::Display for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pols: Vec<String> = self
            .meta
            .polarizations
            .iter()
            .map(|p| p.to_string())
            .collect();
        writeln!(f, "acquisition_mode: {}", self.meta.acquisition_mode)?;
        writeln!(f, "lines: {}", self.meta.lines)?;
        writeln!(f, "orbit: {}", self.meta.orbit)?;
        writeln!(f, "polarizations: {}", pols.join(" "))?;
        writeln!(f, "product: {}", self.meta.product)?;
        writeln!(f, "projection: {}", self.meta.projection)?;
        writeln!(f, "samples: {}", self.meta.samples)?;
        writeln!(f, "sensor: {}", self.meta.sensor)?;
        writeln!(f, "spacing: {} {}", self.meta.spacing.0, self.meta.spacing.1)?;
        writeln!(f, "start: {}", self.meta.start)?;
        write!(f, "stop: {}", self.meta.stop)
    }
}

/// Error types for scene identification and cataloging
#[derive(Debug, thiserror::Error)]
pub enum SarError {
    /// no file in the scene matches the handler's naming convention
    #[error("scene {scene} does not match the {handler} naming convention")]
    NotFound {
        scene: PathBuf,
        handler: &'static str,
    },

    /// more than one file matched where exactly one was expected
    #[error("file ambiguity detected in {scene}: {candidates:?}")]
    Ambiguous {
        scene: PathBuf,
        candidates: Vec<String>,
    },

    /// a binary or text field failed to parse as expected
    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("unknown time format: {0}")]
    TimeFormat(String),

    /// terminal failure of scene identification
    #[error("data format not supported: {0}")]
    FormatNotSupported(PathBuf),

    /// recognized but explicitly unsupported product variant
    #[error("unsupported product: {0}")]
    UnsupportedProduct(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("external command failed: {0}")]
    External(String),

    #[error("download error: {0}")]
    Download(String),
}

impl SarError {
    /// Whether the scene identifier may catch this failure and move on to
    /// the next registered handler. Unsupported products and environment
    /// failures are never retried.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SarError::NotFound { .. }
                | SarError::Ambiguous { .. }
                | SarError::Malformed(_)
                | SarError::Xml(_)
                | SarError::TimeFormat(_)
                | SarError::Io(_)
                | SarError::Zip(_)
        )
    }
}

/// Result type for all catalog and identification operations
pub type SarResult<T> = Result<T, SarError>;
