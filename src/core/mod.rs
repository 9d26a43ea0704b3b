//! Raster-level corrections

pub mod border_noise;
