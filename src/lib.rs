//! sarchive: SAR scene identification and inventory
//!
//! The crate reads the vendor metadata of synthetic aperture radar scenes
//! without unpacking them, normalizes it into one record shape and keeps a
//! persistent, spatially queryable inventory of everything identified.
//!
//! Supported encodings:
//! - ERS-1/2 in CEOS format
//! - ALOS PALSAR-1/2 in CEOS format
//! - ERS-1/2 and ENVISAT ASAR in the ESA archive format
//! - Sentinel-1 SAFE
//! - TerraSAR-X / TanDEM-X
//!
//! ```no_run
//! use sarchive::{identify, Archive};
//! use std::path::Path;
//!
//! let scene = identify(Path::new(
//!     "S1A_IW_GRDH_1SDV_20200101T170815_20200101T170840_030639_038261_1D85.zip",
//! ))?;
//! println!("{scene}");
//!
//! let inventory = Archive::open(Path::new("scenes.db"))?;
//! inventory.insert(&scene)?;
//! # Ok::<(), sarchive::SarError>(())
//! ```

pub mod catalog;
pub mod core;
pub mod dates;
pub mod formats;
pub mod gamma;
pub mod io;
pub mod types;

pub use catalog::{Archive, Filter, InsertOutcome, SelectParams};
pub use formats::{identify, identify_many};
pub use types::{
    BoundingBox, Format, OrbitDirection, Polarization, SarError, SarResult, Scene, SceneMetadata,
};
