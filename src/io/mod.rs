pub mod archive;
pub mod crs;
pub mod osv;
pub mod records;
pub mod xml;
