use std::fs;
use std::path::Path;

use crate::error::ConflateError;
use crate::model::{ConflateSummary, MatchOutcome};

pub const METAINFO_HEADER: &str = "file,origin,osm_date,official_non_merged,osm_non_merged,merged";

/// Count outcomes per bucket.
pub fn compute_summary(outcomes: &[MatchOutcome]) -> ConflateSummary {
    let mut matched = 0;
    let mut missing_from_map = 0;
    let mut missing_from_official = 0;
    let mut possible_merges = 0;

    for outcome in outcomes {
        match outcome {
            MatchOutcome::Matched { .. } => matched += 1,
            MatchOutcome::MissingFromMap { .. } => missing_from_map += 1,
            MatchOutcome::MissingFromOfficial { .. } => missing_from_official += 1,
            MatchOutcome::PossibleMerge { .. } => possible_merges += 1,
        }
    }

    ConflateSummary {
        total_outcomes: outcomes.len(),
        matched,
        missing_from_map,
        missing_from_official,
        possible_merges,
        official_non_merged: missing_from_map + possible_merges,
        osm_non_merged: missing_from_official + possible_merges,
    }
}

/// The two lines of `<name>.metainfo.csv`.
pub fn render_metainfo(name: &str, url: &str, osm_date: &str, summary: &ConflateSummary) -> String {
    format!(
        "{METAINFO_HEADER}\n\"{name}\",\"{url}\",{osm_date},{},{},{}\n",
        summary.official_non_merged, summary.osm_non_merged, summary.matched,
    )
}

pub fn write_metainfo(
    path: &Path,
    name: &str,
    url: &str,
    osm_date: &str,
    summary: &ConflateSummary,
) -> Result<(), ConflateError> {
    fs::write(path, render_metainfo(name, url, osm_date, summary)).map_err(|e| {
        ConflateError::Export {
            path: path.display().to_string(),
            message: e.to_string(),
        }
    })
}
