//! Sentinel-1 orbit state vector retrieval
//!
//! Queries the ESA quality-control endpoint for precise (POE) orbit files
//! whose validity window covers the scene start, scrapes the file names
//! from the response and downloads those not yet present locally.

use crate::types::{SarError, SarResult};
use chrono::{Duration, NaiveDateTime};
use regex::Regex;
use std::io::Write;
use std::path::Path;

const REMOTE_POE: &str = "https://qc.sentinel1.eo.esa.int/aux_poeorb/";
const OSV_PATTERN: &str = r"S1[AB]_OPER_AUX_(?:POE|RES)ORB_OPOD_[0-9TV_]{48}\.EOF";

/// Build the query URL for orbit files valid one day around the scene start.
pub fn query_url(sensor: &str, start: &str) -> SarResult<String> {
    let date = NaiveDateTime::parse_from_str(start, "%Y%m%dT%H%M%S")
        .map_err(|_| SarError::TimeFormat(start.to_string()))?;
    let before = (date - Duration::days(1)).format("%Y-%m-%d");
    let after = (date + Duration::days(1)).format("%Y-%m-%d");
    Ok(format!(
        "{REMOTE_POE}?mission={sensor}&validity_start_time={before}..{after}"
    ))
}

/// Extract the orbit file names advertised in a query response page.
pub fn scrape_filenames(response: &str) -> Vec<String> {
    let pattern = Regex::new(OSV_PATTERN).expect("static pattern");
    let mut names: Vec<String> = pattern
        .find_iter(response)
        .map(|m| m.as_str().to_string())
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Download orbit files for a scene into `outdir`, skipping files already
/// present. Missing write permission and network failures are surfaced;
/// callers running batches typically downgrade the latter to a logged skip.
pub fn fetch(sensor: &str, start: &str, outdir: &Path) -> SarResult<Vec<String>> {
    if !outdir.is_dir() {
        std::fs::create_dir_all(outdir)?;
    }
    let probe = outdir.join(".write_probe");
    std::fs::write(&probe, b"").map_err(|_| {
        SarError::Download(format!(
            "insufficient directory permissions, unable to write to {}",
            outdir.display()
        ))
    })?;
    let _ = std::fs::remove_file(&probe);

    // the QC endpoint historically serves a certificate chain that fails
    // strict verification
    let client = reqwest::blocking::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(|e| SarError::Download(e.to_string()))?;

    let url = query_url(sensor, start)?;
    let response = client
        .get(&url)
        .send()
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.text())
        .map_err(|e| SarError::Download(format!("query {url} failed: {e}")))?;

    let mut fetched = Vec::new();
    for name in scrape_filenames(&response) {
        let target = outdir.join(&name);
        if target.is_file() {
            continue;
        }
        let remote = format!("{REMOTE_POE}{name}");
        let bytes = client
            .get(&remote)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.bytes())
            .map_err(|e| SarError::Download(format!("download {remote} failed: {e}")))?;
        let mut file = std::fs::File::create(&target)?;
        file.write_all(&bytes)?;
        log::info!("downloaded orbit file {name}");
        fetched.push(name);
    }
    Ok(fetched)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_url_spans_one_day_each_side() {
        let url = query_url("S1A", "20200101T000000").unwrap();
        assert!(url.contains("mission=S1A"));
        assert!(url.contains("validity_start_time=2019-12-31..2020-01-02"));
    }

    #[test]
    fn scrapes_and_dedupes_orbit_names() {
        let name = "S1A_OPER_AUX_POEORB_OPOD_20200121T120912_V20191231T225942_20200102T005942.EOF";
        let page = format!("<a href=\"{name}\">{name}</a> and again {name}");
        let names = scrape_filenames(&page);
        assert_eq!(names, vec![name.to_string()]);
    }

    #[test]
    fn rejects_non_canonical_start() {
        assert!(query_url("S1A", "2020-01-01").is_err());
    }
}
