//! Persistent scene inventory
//!
//! A single-table SQLite database keyed by the scene identifier
//! ([`Scene::outname_base`]). The footprint is stored as a WKT polygon and
//! queried through a registered scalar function, so spatial selection works
//! on a stock SQLite build.

use crate::formats;
use crate::io::archive;
use crate::types::{Polarization, SarError, SarResult, Scene};
use geo::algorithm::intersects::Intersects;
use geo::Polygon;
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params_from_iter, Connection, ErrorCode};
use std::path::{Path, PathBuf};
use wkt::TryFromWkt;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS data (
    sensor TEXT,
    orbit TEXT,
    acquisition_mode TEXT,
    start TEXT,
    stop TEXT,
    product TEXT,
    projection TEXT,
    samples INTEGER,
    lines INTEGER,
    outname_base TEXT PRIMARY KEY,
    scene TEXT,
    hh INTEGER,
    vv INTEGER,
    hv INTEGER,
    vh INTEGER,
    bbox TEXT
)";

/// Result of registering one scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The identifier is already present; carries the registered scene path.
    AlreadyRegistered(String),
}

/// An attribute filter on one metadata column.
#[derive(Debug, Clone)]
pub enum Filter {
    Eq(String),
    In(Vec<String>),
}

/// Selection criteria, combined conjunctively.
#[derive(Debug, Default)]
pub struct SelectParams {
    /// WKT polygon the scene footprint must intersect
    pub wkt: Option<String>,
    /// earliest acceptable start time, `YYYYmmddTHHMMSS`
    pub mindate: Option<String>,
    /// latest acceptable stop time, `YYYYmmddTHHMMSS`
    pub maxdate: Option<String>,
    /// polarizations the scene must all contain
    pub polarizations: Vec<Polarization>,
    /// exclude scenes already processed into this directory
    pub processdir: Option<PathBuf>,
    pub recursive: bool,
    /// per-column attribute filters
    pub filters: Vec<(String, Filter)>,
}

pub struct Archive {
    conn: Connection,
    dbfile: PathBuf,
}

impl Archive {
    /// Open or create the inventory database.
    pub fn open(dbfile: &Path) -> SarResult<Self> {
        let conn = Connection::open(dbfile)?;
        register_bbox_intersects(&conn)?;
        conn.execute(SCHEMA, [])?;
        log::debug!("opened inventory {}", dbfile.display());
        Ok(Archive {
            conn,
            dbfile: dbfile.to_path_buf(),
        })
    }

    pub fn dbfile(&self) -> &Path {
        &self.dbfile
    }

    /// Register one scene. A scene whose identifier is already present is
    /// reported, not treated as an error; batch imports carry on.
    pub fn insert(&self, scene: &Scene) -> SarResult<InsertOutcome> {
        let outname_base = scene.outname_base();
        let pols = &scene.meta.polarizations;
        let flag = |p: Polarization| pols.contains(&p) as i64;
        let result = self.conn.execute(
            "INSERT INTO data (sensor, orbit, acquisition_mode, start, stop, product,
                projection, samples, lines, outname_base, scene, hh, vv, hv, vh, bbox)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            rusqlite::params![
                scene.meta.sensor,
                scene.meta.orbit.as_char().to_string(),
                scene.meta.acquisition_mode,
                scene.meta.start,
                scene.meta.stop,
                scene.meta.product,
                scene.meta.projection,
                scene.meta.samples as i64,
                scene.meta.lines as i64,
                outname_base,
                scene.scene.to_string_lossy(),
                flag(Polarization::HH),
                flag(Polarization::VV),
                flag(Polarization::HV),
                flag(Polarization::VH),
                scene.bbox_wkt(),
            ],
        );
        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                let registered: String = self.conn.query_row(
                    "SELECT scene FROM data WHERE outname_base = ?1",
                    [&outname_base],
                    |row| row.get(0),
                )?;
                log::info!("{outname_base} already registered from {registered}");
                Ok(InsertOutcome::AlreadyRegistered(registered))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Identify and register a single scene path.
    pub fn insert_path(&self, scene: &Path) -> SarResult<InsertOutcome> {
        self.insert(&formats::identify(scene)?)
    }

    /// Identify and register a batch of scene paths. Unidentifiable inputs
    /// and duplicates are logged and skipped; each success is committed
    /// independently.
    pub fn insert_many(&self, scenes: &[PathBuf]) -> SarResult<usize> {
        let fresh = self.filter_scenelist(scenes)?;
        let mut inserted = 0;
        for scene in formats::identify_many(&fresh) {
            if self.insert(&scene)? == InsertOutcome::Inserted {
                inserted += 1;
            }
        }
        log::info!("registered {inserted} of {} scenes", scenes.len());
        Ok(inserted)
    }

    /// Drop paths whose file name is already registered, saving the
    /// identification cost on re-imports.
    pub fn filter_scenelist(&self, scenes: &[PathBuf]) -> SarResult<Vec<PathBuf>> {
        let mut stmt = self.conn.prepare("SELECT scene FROM data")?;
        let registered: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .filter_map(|path| {
                path.rsplit(['/', '\\'])
                    .next()
                    .map(str::to_string)
            })
            .collect();
        Ok(scenes
            .iter()
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|name| !registered.iter().any(|r| r == name))
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    /// Select scenes matching the given criteria, ordered by start time.
    /// Returns `(scene, outname_base)` pairs.
    pub fn select(&self, params: &SelectParams) -> SarResult<Vec<(String, String)>> {
        let columns = self.columns()?;
        let mut conditions: Vec<String> = Vec::new();
        let mut values: Vec<String> = Vec::new();

        for (column, filter) in &params.filters {
            if !columns.iter().any(|c| c == column) {
                log::warn!("ignoring filter on unknown column {column}");
                continue;
            }
            match filter {
                Filter::Eq(value) => {
                    conditions.push(format!("{column} = ?"));
                    values.push(value.clone());
                }
                Filter::In(options) => {
                    let marks = vec!["?"; options.len()].join(", ");
                    conditions.push(format!("{column} IN ({marks})"));
                    values.extend(options.iter().cloned());
                }
            }
        }
        for pol in &params.polarizations {
            conditions.push(format!("{} = 1", pol.to_string().to_lowercase()));
        }

        let date_ok = Regex::new(r"^[0-9]{8}T[0-9]{6}$").expect("static pattern");
        if let Some(mindate) = &params.mindate {
            if date_ok.is_match(mindate) {
                conditions.push("start >= ?".to_string());
                values.push(mindate.clone());
            } else {
                log::warn!("ignoring mindate {mindate}: not in format YYYYmmddTHHMMSS");
            }
        }
        if let Some(maxdate) = &params.maxdate {
            if date_ok.is_match(maxdate) {
                conditions.push("stop <= ?".to_string());
                values.push(maxdate.clone());
            } else {
                log::warn!("ignoring maxdate {maxdate}: not in format YYYYmmddTHHMMSS");
            }
        }
        if let Some(wkt) = &params.wkt {
            conditions.push("bbox_intersects(?, bbox) = 1".to_string());
            values.push(wkt.clone());
        }

        let mut query = "SELECT scene, outname_base FROM data".to_string();
        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }
        query.push_str(" ORDER BY start");

        let mut stmt = self.conn.prepare(&query)?;
        let mut rows: Vec<(String, String)> = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<_, _>>()?;

        if let Some(processdir) = &params.processdir {
            rows.retain(|(_, outname_base)| {
                let pattern = match Regex::new(&regex::escape(outname_base)) {
                    Ok(p) => p,
                    Err(_) => return true,
                };
                archive::find_in_dir(processdir, &pattern, params.recursive).is_empty()
            });
        }
        Ok(rows)
    }

    /// Number of registered scenes.
    pub fn size(&self) -> SarResult<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT count(*) FROM data", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn columns(&self) -> SarResult<Vec<String>> {
        let mut stmt = self.conn.prepare("PRAGMA table_info(data)")?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<_, _>>()?;
        Ok(columns)
    }

    pub fn close(self) -> SarResult<()> {
        self.conn
            .close()
            .map_err(|(_, e)| SarError::Db(e))?;
        Ok(())
    }
}

/// WKT polygon intersection as a SQL scalar, 1 or 0.
fn register_bbox_intersects(conn: &Connection) -> SarResult<()> {
    conn.create_scalar_function(
        "bbox_intersects",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let a: String = ctx.get(0)?;
            let b: String = ctx.get(1)?;
            let pa = Polygon::<f64>::try_from_wkt_str(&a)
                .map_err(|e| rusqlite::Error::UserFunctionError(e.to_string().into()))?;
            let pb = Polygon::<f64>::try_from_wkt_str(&b)
                .map_err(|e| rusqlite::Error::UserFunctionError(e.to_string().into()))?;
            Ok(pa.intersects(&pb) as i64)
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        BoundingBox, Extensions, Format, OrbitDirection, SceneMetadata,
    };

    fn dummy_scene(sensor: &str, start: &str, xmin: f64) -> Scene {
        Scene {
            format: Format::Safe,
            scene: PathBuf::from(format!("/data/{sensor}_{start}.zip")),
            file: String::new(),
            meta: SceneMetadata {
                sensor: sensor.to_string(),
                projection: crate::io::crs::wgs84_wkt().to_string(),
                orbit: OrbitDirection::Ascending,
                polarizations: vec![Polarization::VV, Polarization::VH],
                acquisition_mode: "IW".to_string(),
                start: start.to_string(),
                stop: start.to_string(),
                product: "GRD".to_string(),
                spacing: (10.0, 10.0),
                samples: 100,
                lines: 100,
                corners: BoundingBox {
                    xmin,
                    xmax: xmin + 2.0,
                    ymin: 50.0,
                    ymax: 52.0,
                },
                extensions: Extensions::default(),
            },
        }
    }

    fn open_archive(dir: &Path) -> Archive {
        Archive::open(&dir.join("inventory.db")).unwrap()
    }

    #[test]
    fn insert_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_archive(dir.path());
        let scene = dummy_scene("S1A", "20200101T000000", 10.0);
        assert_eq!(db.insert(&scene).unwrap(), InsertOutcome::Inserted);
        assert_eq!(db.size().unwrap(), 1);
    }

    #[test]
    fn duplicate_insert_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_archive(dir.path());
        let scene = dummy_scene("S1A", "20200101T000000", 10.0);
        db.insert(&scene).unwrap();
        match db.insert(&scene).unwrap() {
            InsertOutcome::AlreadyRegistered(path) => {
                assert!(path.contains("S1A_20200101T000000"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(db.size().unwrap(), 1);
    }

    #[test]
    fn spatial_selection_uses_footprints() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_archive(dir.path());
        db.insert(&dummy_scene("S1A", "20200101T000000", 10.0)).unwrap();
        db.insert(&dummy_scene("S1B", "20200102T000000", 40.0)).unwrap();

        let params = SelectParams {
            wkt: Some(
                "POLYGON ((9 49, 13 49, 13 53, 9 53, 9 49))".to_string(),
            ),
            ..SelectParams::default()
        };
        let rows = db.select(&params).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].1.starts_with("S1A"));
    }

    #[test]
    fn attribute_and_date_filters_combine() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_archive(dir.path());
        db.insert(&dummy_scene("S1A", "20200101T000000", 10.0)).unwrap();
        db.insert(&dummy_scene("S1B", "20200301T000000", 10.0)).unwrap();

        let params = SelectParams {
            mindate: Some("20200201T000000".to_string()),
            filters: vec![("sensor".to_string(), Filter::In(vec![
                "S1A".to_string(),
                "S1B".to_string(),
            ]))],
            polarizations: vec![Polarization::VV],
            ..SelectParams::default()
        };
        let rows = db.select(&params).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].1.starts_with("S1B"));
    }

    #[test]
    fn unknown_filter_column_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_archive(dir.path());
        db.insert(&dummy_scene("S1A", "20200101T000000", 10.0)).unwrap();
        let params = SelectParams {
            filters: vec![("no_such".to_string(), Filter::Eq("x".to_string()))],
            ..SelectParams::default()
        };
        // the filter is dropped rather than failing the query
        assert_eq!(db.select(&params).unwrap().len(), 1);
    }

    #[test]
    fn malformed_dates_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_archive(dir.path());
        db.insert(&dummy_scene("S1A", "20200101T000000", 10.0)).unwrap();
        let params = SelectParams {
            mindate: Some("2021-01-01".to_string()),
            ..SelectParams::default()
        };
        // the filter is dropped, the scene still matches
        assert_eq!(db.select(&params).unwrap().len(), 1);
    }

    #[test]
    fn scenelist_filter_skips_registered_names() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_archive(dir.path());
        let scene = dummy_scene("S1A", "20200101T000000", 10.0);
        db.insert(&scene).unwrap();
        let fresh = db
            .filter_scenelist(&[
                scene.scene.clone(),
                PathBuf::from("/elsewhere/S1B_other.zip"),
            ])
            .unwrap();
        assert_eq!(fresh, vec![PathBuf::from("/elsewhere/S1B_other.zip")]);
    }

    #[test]
    fn processdir_excludes_processed_scenes() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_archive(dir.path());
        let scene = dummy_scene("S1A", "20200101T000000", 10.0);
        db.insert(&scene).unwrap();
        let processed = dir.path().join("processed");
        std::fs::create_dir(&processed).unwrap();
        std::fs::write(
            processed.join(format!("{}_VV_gamma0.tif", scene.outname_base())),
            b"",
        )
        .unwrap();
        let params = SelectParams {
            processdir: Some(processed),
            ..SelectParams::default()
        };
        assert!(db.select(&params).unwrap().is_empty());
    }

    #[test]
    fn reopen_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = open_archive(dir.path());
            db.insert(&dummy_scene("S1A", "20200101T000000", 10.0)).unwrap();
            db.close().unwrap();
        }
        let db = open_archive(dir.path());
        assert_eq!(db.size().unwrap(), 1);
    }
}
