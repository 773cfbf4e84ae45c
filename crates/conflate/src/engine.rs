use std::path::{Path, PathBuf};

use crate::classify::build_issues;
use crate::config::DatasetConfig;
use crate::error::ConflateError;
use crate::export::{by_osm_rows, official_rows, write_csv, CsvLayout, BY_OSM_HEAD, OFFICIAL_HEAD};
use crate::extract::{extract_map_items, extract_official, TagFactory};
use crate::matcher::{fold_duplicate_officials, match_records};
use crate::model::{ConflateMeta, ConflateResult, ExtractStats, MatchMode};
use crate::store::Session;
use crate::summary::{compute_summary, write_metainfo};
use crate::text::{TemplateText, TextPolicy};

/// Run conflation for one dataset with the tag mapping and description
/// templates declared in its config.
pub fn run(session: &Session, config: &DatasetConfig) -> Result<ConflateResult, ConflateError> {
    let factory = TagFactory::from_config(&config.tags);
    let text = TemplateText::new(config.text.clone());
    run_with(session, config, &factory, &text)
}

/// Run conflation with a caller-supplied tag factory and text policy.
pub fn run_with(
    session: &Session,
    config: &DatasetConfig,
    factory: &TagFactory,
    text: &dyn TextPolicy,
) -> Result<ConflateResult, ConflateError> {
    config.validate()?;
    let mode = if config.is_geo_only() { MatchMode::GeoOnly } else { MatchMode::Identifier };
    let mut stats = ExtractStats::default();

    let officials = extract_official(session, config, factory, &mut stats)?;
    let (officials, folded) = fold_duplicate_officials(officials);
    stats.duplicate_officials = folded;
    log::info!(
        "{}: {} official record(s) from {} source row(s), {} filtered, {} duplicate(s) folded",
        config.name,
        officials.len(),
        stats.source_rows,
        stats.filtered_rows,
        folded
    );

    let map_items = extract_map_items(session, &config.map, &mut stats)?;
    log::info!(
        "{}: {} map item(s) from {} feature(s)",
        config.name,
        map_items.len(),
        stats.map_features
    );

    let outcomes = match_records(&officials, &map_items, mode, config.conflation_distance);
    let summary = compute_summary(&outcomes);
    log::info!(
        "{} ({mode}): {} matched, {} missing from map, {} missing from official, {} possible merge(s)",
        config.name,
        summary.matched,
        summary.missing_from_map,
        summary.missing_from_official,
        summary.possible_merges
    );

    let issues = build_issues(&outcomes, &officials, &map_items, text);

    Ok(ConflateResult {
        meta: ConflateMeta {
            dataset: config.name.clone(),
            url: config.url.clone(),
            mode,
            conflation_distance: config.conflation_distance,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
        },
        summary,
        stats,
        outcomes,
        issues,
        officials,
        map_items,
    })
}

/// Write `<name>.csv`, `<name>.byOSM.csv` and `<name>.metainfo.csv` into
/// `out_dir`. Geo-only runs produce no reports. Files already written stay
/// in place when a later one fails.
pub fn write_reports(
    result: &ConflateResult,
    config: &DatasetConfig,
    out_dir: &Path,
) -> Result<Vec<PathBuf>, ConflateError> {
    if result.meta.mode == MatchMode::GeoOnly {
        log::info!("{}: geo-only run, no reports written", config.name);
        return Ok(Vec::new());
    }

    let mandatory = config.map.mandatory_keys();
    let mut written = Vec::new();

    let path = out_dir.join(format!("{}.csv", config.name));
    let layout = CsvLayout::new(&OFFICIAL_HEAD, &config.map.reference, mandatory.clone());
    let rows = write_csv(&path, &layout, official_rows(&result.officials))?;
    log::info!("wrote {} ({rows} rows)", path.display());
    written.push(path);

    let path = out_dir.join(format!("{}.byOSM.csv", config.name));
    let layout = CsvLayout::new(&BY_OSM_HEAD, &config.map.reference, mandatory);
    let rows = write_csv(&path, &layout, by_osm_rows(result))?;
    log::info!("wrote {} ({rows} rows)", path.display());
    written.push(path);

    let path = out_dir.join(format!("{}.metainfo.csv", config.name));
    write_metainfo(&path, &config.name, &config.url, &config.osm_date, &result.summary)?;
    log::info!("wrote {}", path.display());
    written.push(path);

    Ok(written)
}
