//! Sentinel-1 GRD border noise removal
//!
//! GRD products processed with IPF versions before 2.9 carry radiometric
//! artifacts along the image borders. The correction subtracts the scaled
//! noise lookup table from the squared digital numbers, masks residual
//! low-power pixels near the borders and clips each edge at the first
//! valid sample per line, with outlier clip indices replaced by a rolling
//! median.

use crate::types::{SarError, SarResult};
use ndarray::{Array2, Axis};
use serde::Deserialize;

/// Rows or columns processed per block when masking large rasters.
pub const BLOCKSIZE: usize = 2000;

/// Azimuth noise LUTs as stored in the calibration annotation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoiseAnnotation {
    noise_vector_list: NoiseVectorList,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NoiseVectorList {
    #[serde(rename = "noiseVector", default)]
    vectors: Vec<NoiseVector>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoiseVector {
    pub line: usize,
    pixel: String,
    noise_lut: String,
}

impl NoiseVector {
    pub fn pixels(&self) -> SarResult<Vec<usize>> {
        parse_list(&self.pixel)
    }

    pub fn lut(&self) -> SarResult<Vec<f64>> {
        parse_list(&self.noise_lut)
    }
}

fn parse_list<T: std::str::FromStr>(text: &str) -> SarResult<Vec<T>> {
    text.split_whitespace()
        .map(|v| {
            v.parse()
                .map_err(|_| SarError::Malformed(format!("non-numeric LUT entry {v}")))
        })
        .collect()
}

impl NoiseAnnotation {
    pub fn from_xml(xml: &str) -> SarResult<Self> {
        quick_xml::de::from_str(xml).map_err(|e| SarError::Xml(e.to_string()))
    }

    pub fn vectors(&self) -> &[NoiseVector] {
        &self.noise_vector_list.vectors
    }

    /// Expand the sparse vectors into a full raster of noise power.
    ///
    /// Pixels are interpolated linearly within each vector; lines between
    /// vectors reuse the nearest preceding vector, matching the coarse
    /// azimuth sampling of the annotation.
    pub fn to_raster(&self, lines: usize, samples: usize) -> SarResult<Array2<f64>> {
        if self.noise_vector_list.vectors.is_empty() {
            return Err(SarError::Malformed("empty noise vector list".to_string()));
        }
        let mut raster = Array2::zeros((lines, samples));
        let mut expanded: Vec<(usize, Vec<f64>)> = Vec::new();
        for vector in &self.noise_vector_list.vectors {
            let pixels = vector.pixels()?;
            let lut = vector.lut()?;
            expanded.push((vector.line, interpolate(&pixels, &lut, samples)?));
        }
        expanded.sort_by_key(|(line, _)| *line);
        for line in 0..lines {
            let row = expanded
                .iter()
                .rev()
                .find(|(l, _)| *l <= line)
                .or_else(|| expanded.first())
                .map(|(_, row)| row)
                .ok_or_else(|| SarError::Malformed("empty noise vector list".to_string()))?;
            for (sample, value) in row.iter().enumerate().take(samples) {
                raster[[line, sample]] = *value;
            }
        }
        Ok(raster)
    }
}

/// Linear interpolation of a sparse LUT onto a dense pixel axis, constant
/// beyond the outermost support points.
pub fn interpolate(pixels: &[usize], values: &[f64], width: usize) -> SarResult<Vec<f64>> {
    if pixels.len() != values.len() || pixels.is_empty() {
        return Err(SarError::Malformed(
            "noise vector pixel and LUT lengths differ".to_string(),
        ));
    }
    let mut dense = Vec::with_capacity(width);
    for x in 0..width {
        let value = match pixels.iter().position(|&p| p >= x) {
            Some(0) => values[0],
            None => values[values.len() - 1],
            Some(i) => {
                let (x0, x1) = (pixels[i - 1] as f64, pixels[i] as f64);
                let (y0, y1) = (values[i - 1], values[i]);
                if x1 == x0 {
                    y0
                } else {
                    y0 + (x as f64 - x0) * (y1 - y0) / (x1 - x0)
                }
            }
        };
        dense.push(value);
    }
    Ok(dense)
}

/// Scaling of the annotated noise power by IPF version and beam mode.
///
/// From IPF 2.9 the border noise is corrected by the processor itself and
/// from 2.5 the annotated LUT is already calibrated; older annotations need
/// the mode-dependent constant, and versions between 2.34 and 2.5 square
/// the azimuth noise term.
pub fn noise_scaling_factor(ipf: f64, mode: &str, azimuth_noise: f64) -> SarResult<f64> {
    if ipf >= 2.5 {
        return Ok(1.0);
    }
    let knoise = match mode {
        "IW" => 75088.7,
        "EW" => 56065.87,
        other => {
            return Err(SarError::Malformed(format!(
                "no noise constant for acquisition mode {other}"
            )))
        }
    };
    let adn = if ipf >= 2.34 {
        azimuth_noise * azimuth_noise
    } else {
        azimuth_noise
    };
    Ok(knoise * adn)
}

/// Subtract scaled noise power from squared digital numbers in place and
/// return the valid-data mask. Denoised power below 0.5 or raw amplitude
/// below 30 is treated as border residue.
pub fn denoise(dn: &mut Array2<f64>, noise: &Array2<f64>, scale: f64) -> SarResult<Array2<bool>> {
    if dn.dim() != noise.dim() {
        return Err(SarError::Malformed(format!(
            "noise raster {:?} does not match image {:?}",
            noise.dim(),
            dn.dim()
        )));
    }
    let mut mask = Array2::from_elem(dn.dim(), true);
    for ((index, value), noise_value) in dn.indexed_iter_mut().zip(noise.iter()) {
        let raw = *value;
        let mut power = raw * raw - noise_value * scale;
        if power < 0.0 {
            power = 0.0;
        }
        if power < 0.5 || raw < 30.0 {
            mask[index] = false;
        }
        *value = power.sqrt();
    }
    Ok(mask)
}

/// Image edges along which border noise is clipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Left,
    Right,
    Top,
    Bottom,
}

/// First valid sample per line (or column) from the given edge inward.
/// Lines without any valid sample clip completely.
pub fn border_indices(mask: &Array2<bool>, edge: Edge) -> Vec<usize> {
    let axis = match edge {
        Edge::Left | Edge::Right => Axis(0),
        Edge::Top | Edge::Bottom => Axis(1),
    };
    mask.lanes(Axis(1 - axis.index()))
        .into_iter()
        .map(|lane| {
            let n = lane.len();
            let found = match edge {
                Edge::Left | Edge::Top => lane.iter().position(|&v| v),
                Edge::Right | Edge::Bottom => lane.iter().rposition(|&v| v).map(|i| n - 1 - i),
            };
            found.unwrap_or(n)
        })
        .collect()
}

/// Replace outlier clip indices by the median of a centered window, keeping
/// genuine border steps while discarding single-line spikes.
pub fn smooth_indices(indices: &[usize], window: usize) -> Vec<usize> {
    if indices.len() < 3 || window < 3 {
        return indices.to_vec();
    }
    let half = window / 2;
    let mut smoothed = Vec::with_capacity(indices.len());
    for i in 0..indices.len() {
        let lo = i.saturating_sub(half);
        let hi = (i + half + 1).min(indices.len());
        let mut slice: Vec<usize> = indices[lo..hi].to_vec();
        slice.sort_unstable();
        let median = slice[slice.len() / 2];
        let deviation = indices[i].abs_diff(median);
        smoothed.push(if deviation > half { median } else { indices[i] });
    }
    smoothed
}

/// Zero every sample outside the smoothed border on one edge.
pub fn clip_edge(dn: &mut Array2<f64>, indices: &[usize], edge: Edge) {
    match edge {
        Edge::Left => {
            for (row, &cut) in indices.iter().enumerate() {
                for col in 0..cut.min(dn.ncols()) {
                    dn[[row, col]] = 0.0;
                }
            }
        }
        Edge::Right => {
            let ncols = dn.ncols();
            for (row, &cut) in indices.iter().enumerate() {
                for col in ncols.saturating_sub(cut)..ncols {
                    dn[[row, col]] = 0.0;
                }
            }
        }
        Edge::Top => {
            for (col, &cut) in indices.iter().enumerate() {
                for row in 0..cut.min(dn.nrows()) {
                    dn[[row, col]] = 0.0;
                }
            }
        }
        Edge::Bottom => {
            let nrows = dn.nrows();
            for (col, &cut) in indices.iter().enumerate() {
                for row in nrows.saturating_sub(cut)..nrows {
                    dn[[row, col]] = 0.0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const NOISE_XML: &str = r#"<noise>
      <noiseVectorList count="2">
        <noiseVector>
          <azimuthTime>2020-01-01T00:00:00.000000</azimuthTime>
          <line>0</line>
          <pixel count="3">0 4 8</pixel>
          <noiseLut count="3">100.0 200.0 300.0</noiseLut>
        </noiseVector>
        <noiseVector>
          <azimuthTime>2020-01-01T00:00:10.000000</azimuthTime>
          <line>5</line>
          <pixel count="3">0 4 8</pixel>
          <noiseLut count="3">110.0 210.0 310.0</noiseLut>
        </noiseVector>
      </noiseVectorList>
    </noise>"#;

    #[test]
    fn noise_annotation_deserializes() {
        let annotation = NoiseAnnotation::from_xml(NOISE_XML).unwrap();
        assert_eq!(annotation.vectors().len(), 2);
        assert_eq!(annotation.vectors()[1].line, 5);
        assert_eq!(annotation.vectors()[0].pixels().unwrap(), vec![0, 4, 8]);
        assert_eq!(annotation.vectors()[0].lut().unwrap(), vec![100.0, 200.0, 300.0]);
    }

    #[test]
    fn interpolation_matches_support_points() {
        let dense = interpolate(&[0, 4, 8], &[100.0, 200.0, 300.0], 10).unwrap();
        assert_relative_eq!(dense[0], 100.0);
        assert_relative_eq!(dense[2], 150.0);
        assert_relative_eq!(dense[4], 200.0);
        // beyond the last support point the LUT stays constant
        assert_relative_eq!(dense[9], 300.0);
    }

    #[test]
    fn raster_expansion_reuses_preceding_vector() {
        let annotation = NoiseAnnotation::from_xml(NOISE_XML).unwrap();
        let raster = annotation.to_raster(8, 9).unwrap();
        assert_relative_eq!(raster[[0, 0]], 100.0);
        assert_relative_eq!(raster[[4, 0]], 100.0);
        assert_relative_eq!(raster[[5, 0]], 110.0);
        assert_relative_eq!(raster[[7, 8]], 310.0);
    }

    #[test]
    fn scaling_depends_on_version_and_mode() {
        assert_relative_eq!(noise_scaling_factor(2.9, "IW", 1.5).unwrap(), 1.0);
        assert_relative_eq!(noise_scaling_factor(2.5, "EW", 1.5).unwrap(), 1.0);
        assert_relative_eq!(
            noise_scaling_factor(2.2, "IW", 1.5).unwrap(),
            75088.7 * 1.5
        );
        assert_relative_eq!(
            noise_scaling_factor(2.4, "EW", 1.5).unwrap(),
            56065.87 * 2.25
        );
        assert!(noise_scaling_factor(2.2, "SM", 1.5).is_err());
    }

    #[test]
    fn denoise_masks_low_power_pixels() {
        let mut dn = Array2::from_shape_vec((1, 3), vec![100.0, 31.0, 5.0]).unwrap();
        let noise = Array2::from_shape_vec((1, 3), vec![100.0, 960.0, 20.0]).unwrap();
        let mask = denoise(&mut dn, &noise, 1.0).unwrap();
        assert!(mask[[0, 0]]);
        // 31² − 960 = 1 >= 0.5 and raw >= 30, still valid
        assert!(mask[[0, 1]]);
        // raw amplitude below 30 is border residue
        assert!(!mask[[0, 2]]);
        assert_relative_eq!(dn[[0, 0]], (100.0f64 * 100.0 - 100.0).sqrt());
    }

    #[test]
    fn border_index_per_edge() {
        let mask = Array2::from_shape_vec(
            (3, 4),
            vec![
                false, true, true, true,
                false, false, true, true,
                false, false, false, false,
            ],
        )
        .unwrap();
        assert_eq!(border_indices(&mask, Edge::Left), vec![1, 2, 4]);
        assert_eq!(border_indices(&mask, Edge::Right), vec![0, 0, 4]);
        assert_eq!(border_indices(&mask, Edge::Top), vec![3, 0, 0, 0]);
    }

    #[test]
    fn spikes_are_replaced_by_the_rolling_median() {
        let indices = vec![10, 10, 11, 250, 11, 10, 10];
        let smoothed = smooth_indices(&indices, 5);
        assert_eq!(smoothed[3], 11);
        assert_eq!(smoothed[0], 10);
    }

    #[test]
    fn clipping_zeroes_outside_the_border() {
        let mut dn = Array2::from_elem((2, 4), 1.0);
        clip_edge(&mut dn, &[1, 2], Edge::Left);
        assert_eq!(dn[[0, 0]], 0.0);
        assert_eq!(dn[[0, 1]], 1.0);
        assert_eq!(dn[[1, 1]], 0.0);
        assert_eq!(dn[[1, 2]], 1.0);
    }
}
