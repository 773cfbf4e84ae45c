use std::collections::BTreeMap;
use std::path::PathBuf;

use geomerge_conflate::config::DatasetConfig;
use geomerge_conflate::engine::{run, run_with, write_reports};
use geomerge_conflate::extract::{TagFactory, TagMapping};
use geomerge_conflate::geodesy::FeatureGeometry;
use geomerge_conflate::model::{Bucket, ConflateResult, ItemKind, Location, MatchOutcome};
use geomerge_conflate::store::{RawFeature, Session};
use geomerge_conflate::text::AttrView;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn load_config() -> DatasetConfig {
    let toml = std::fs::read_to_string(fixtures_dir().join("hydrants.toml")).unwrap();
    DatasetConfig::from_toml(&toml).unwrap()
}

fn feature(kind: ItemKind, id: i64, geometry: FeatureGeometry, tags: &[(&str, &str)]) -> RawFeature {
    RawFeature {
        kind,
        id,
        geometry,
        tags: tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
    }
}

fn square(lon: f64, lat: f64, half: f64) -> Vec<Location> {
    vec![
        Location::new(lon - half, lat - half),
        Location::new(lon + half, lat - half),
        Location::new(lon + half, lat + half),
        Location::new(lon - half, lat + half),
        Location::new(lon - half, lat - half),
    ]
}

fn map_features() -> Vec<RawFeature> {
    vec![
        feature(
            ItemKind::Node,
            100,
            FeatureGeometry::Point(Location::new(2.148, 43.928)),
            &[("emergency", "fire_hydrant"), ("ref:FR:SDIS81", "81-001")],
        ),
        feature(
            ItemKind::Way,
            200,
            FeatureGeometry::Line(square(2.15, 43.93, 0.0001)),
            &[("emergency", "fire_hydrant"), ("ref:FR:SDIS81", "81-002;81-007")],
        ),
        feature(
            ItemKind::Node,
            300,
            FeatureGeometry::Point(Location::new(2.18, 43.960_04)),
            &[("emergency", "fire_hydrant"), ("source", "survey")],
        ),
        feature(
            ItemKind::Node,
            400,
            FeatureGeometry::Point(Location::new(2.5, 44.0)),
            &[("emergency", "fire_hydrant"), ("ref:FR:SDIS81", "81-999")],
        ),
        feature(
            ItemKind::Node,
            500,
            FeatureGeometry::Point(Location::new(2.148, 43.928)),
            &[("amenity", "bench")],
        ),
    ]
}

fn prepared_session(config: &DatasetConfig) -> Session {
    let mut session = Session::open_in_memory().unwrap();
    let file = config.source.file.as_deref().unwrap();
    let csv = std::fs::read_to_string(fixtures_dir().join(file)).unwrap();
    session.import_csv(&config.source.table, &csv).unwrap();
    session.insert_map_features(&map_features()).unwrap();
    session
}

fn load_and_run() -> (DatasetConfig, ConflateResult) {
    let config = load_config();
    let session = prepared_session(&config);
    let result = run(&session, &config).unwrap();
    (config, result)
}

// -------------------------------------------------------------------------
// Extraction
// -------------------------------------------------------------------------

#[test]
fn extraction_stats() {
    let (_, result) = load_and_run();
    assert_eq!(result.stats.source_rows, 8);
    assert_eq!(result.stats.skipped_rows, 1);
    assert_eq!(result.stats.filtered_rows, 1);
    assert_eq!(result.stats.duplicate_officials, 1);
    // 81-002 has no diameter, 81-003 has an unknown type.
    assert_eq!(result.stats.tag_failures, 2);
    assert_eq!(result.stats.map_features, 4);
    assert_eq!(result.stats.map_items, 5);
    assert_eq!(result.officials.len(), 5);
}

#[test]
fn official_tags_from_mapping() {
    let (_, result) = load_and_run();
    let first = &result.officials[0];
    assert_eq!(first.identifier.as_deref(), Some("81-001"));
    assert_eq!(first.tags["ref:FR:SDIS81"], "81-001");
    assert_eq!(first.tags["emergency"], "fire_hydrant");
    assert_eq!(first.tags["fire_hydrant:type"], "pillar");
    assert_eq!(first.tags["fire_hydrant:diameter"], "100");
    assert_eq!(first.fields["commune"], "Albi");

    let second = &result.officials[1];
    assert!(!second.tags.contains_key("fire_hydrant:diameter"));
    assert_eq!(second.tags["fire_hydrant:type"], "underground");
}

// -------------------------------------------------------------------------
// Matching
// -------------------------------------------------------------------------

#[test]
fn buckets() {
    let (_, result) = load_and_run();
    assert_eq!(result.summary.total_outcomes, 6);
    assert_eq!(result.summary.matched, 3);
    assert_eq!(result.summary.possible_merges, 1);
    assert_eq!(result.summary.missing_from_map, 1);
    assert_eq!(result.summary.missing_from_official, 1);
    assert_eq!(result.summary.official_non_merged, 2);
    assert_eq!(result.summary.osm_non_merged, 2);
}

#[test]
fn multi_valued_reference_matches_each_official() {
    let (_, result) = load_and_run();
    let matched_refs: Vec<&str> = result
        .outcomes
        .iter()
        .filter_map(|o| match *o {
            MatchOutcome::Matched { official, map_item } => {
                assert_eq!(result.officials[official].identifier, result.map_items[map_item].identifier);
                result.officials[official].identifier.as_deref()
            }
            _ => None,
        })
        .collect();
    assert_eq!(matched_refs, vec!["81-001", "81-002", "81-007"]);
}

#[test]
fn issues_per_bucket() {
    let (_, result) = load_and_run();
    assert_eq!(result.issues.len(), 3);

    let missing = result.issues.iter().find(|i| i.bucket == Bucket::MissingFromMap).unwrap();
    assert_eq!(missing.official_ref.as_deref(), Some("81-003"));
    assert_eq!(missing.geometry, "POINT(2.16 43.94)");
    assert!(missing.subclass.is_some());
    assert_eq!(missing.text["en"], "Fire hydrant 81-003 in Castres");

    let merge = result.issues.iter().find(|i| i.bucket == Bucket::PossibleMerge).unwrap();
    assert_eq!(merge.official_ref.as_deref(), Some("81-006"));
    assert_eq!(merge.map_item.unwrap().id, 300);
    assert_eq!(merge.text["fr"], "Poteau 81-006 (Lisle, sur Tarn)");
    let fix = merge.fix.as_ref().unwrap();
    assert_eq!(fix.modify["source"], "SDIS 81");
    let d = merge.distance_m.unwrap();
    assert!(d > 3.0 && d < 6.0, "distance {d}");

    let orphan = result.issues.iter().find(|i| i.bucket == Bucket::MissingFromOfficial).unwrap();
    assert_eq!(orphan.map_item.unwrap().id, 400);
    assert!(orphan.fix.is_none());
    assert_eq!(orphan.text["en"], "Fire hydrant 81-999 in no value");
    assert_eq!(orphan.text["fr"], "Poteau 81-999 (no value)");
}

#[test]
fn rerun_is_deterministic() {
    let config = load_config();
    let session = prepared_session(&config);
    let a = run(&session, &config).unwrap();
    let b = run(&session, &config).unwrap();
    assert_eq!(a.outcomes, b.outcomes);
    assert_eq!(a.summary, b.summary);
    let subclasses = |r: &ConflateResult| r.issues.iter().map(|i| i.subclass.clone()).collect::<Vec<_>>();
    assert_eq!(subclasses(&a), subclasses(&b));
}

#[test]
fn custom_factory_and_text_policy() {
    let config = load_config();
    let session = prepared_session(&config);
    let factory = TagFactory::from_config(&config.tags).with_mapping(
        "name",
        TagMapping::computed(|row| Ok(row.get("commune").map(|c| format!("PEI {c}")))),
    );
    let text = |tags: AttrView<'_>, _fields: AttrView<'_>| {
        let mut out = BTreeMap::new();
        out.insert("en".to_string(), tags.get("name").to_string());
        out
    };
    let result = run_with(&session, &config, &factory, &text).unwrap();
    let missing = result.issues.iter().find(|i| i.bucket == Bucket::MissingFromMap).unwrap();
    assert_eq!(missing.text["en"], "PEI Castres");
}

#[test]
fn geo_only_dataset() {
    let toml = std::fs::read_to_string(fixtures_dir().join("hydrants.toml"))
        .unwrap()
        .replace("ref = \"ref_sdis\"", "ref = \"none\"");
    let config = DatasetConfig::from_toml(&toml).unwrap();
    let session = prepared_session(&config);
    let result = run(&session, &config).unwrap();

    assert!(result.officials.iter().all(|o| o.identifier.is_none()));
    // 81-001, 81-002 and 81-006 each have a map item within 50 m.
    assert_eq!(result.summary.matched, 3);
    assert_eq!(result.summary.missing_from_map, 2);
    assert_eq!(result.summary.missing_from_official, 0);
    assert_eq!(result.summary.possible_merges, 0);
    assert!(result.issues.iter().all(|i| i.bucket == Bucket::MissingFromMap));
}

// -------------------------------------------------------------------------
// Reports
// -------------------------------------------------------------------------

#[test]
fn official_csv_report() {
    let (config, result) = load_and_run();
    let dir = tempfile::tempdir().unwrap();
    write_reports(&result, &config, dir.path()).unwrap();

    let csv = std::fs::read_to_string(dir.path().join("hydrants_FR_SDIS_81.csv")).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(
        lines[0],
        "lon,lat,ref:FR:SDIS81,emergency,source,fire_hydrant:diameter,fire_hydrant:type"
    );
    assert_eq!(lines[1], "2.148,43.928,81-001,fire_hydrant,SDIS 81,100,pillar");
    assert_eq!(lines[2], "2.15,43.93,81-002,fire_hydrant,SDIS 81,,underground");
    assert_eq!(lines[3], "2.16,43.94,81-003,fire_hydrant,SDIS 81,80");
    assert_eq!(lines.len(), 6);
}

#[test]
fn by_osm_report() {
    let (config, result) = load_and_run();
    let dir = tempfile::tempdir().unwrap();
    write_reports(&result, &config, dir.path()).unwrap();

    let csv = std::fs::read_to_string(dir.path().join("hydrants_FR_SDIS_81.byOSM.csv")).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert!(lines[0].starts_with("osm_id,osm_type,lon,lat,ref:FR:SDIS81,emergency"));
    // n100, w200 once, two unmerged officials, n300, n400.
    assert_eq!(lines.len(), 7);
    assert!(lines[1].starts_with("100,n,2.148,43.928,81-001,fire_hydrant"));
    assert!(lines[2].starts_with("200,w,"));
    assert!(lines[3].starts_with(",,2.18,43.96,81-006,"));
    assert!(lines[4].starts_with(",,2.16,43.94,81-003,"));
    assert!(lines[5].starts_with("300,n,"));
    assert!(lines[6].starts_with("400,n,2.5,44,81-999,fire_hydrant"));
}

#[test]
fn metainfo_report() {
    let (config, result) = load_and_run();
    let dir = tempfile::tempdir().unwrap();
    let written = write_reports(&result, &config, dir.path()).unwrap();
    assert_eq!(written.len(), 3);

    let meta = std::fs::read_to_string(dir.path().join("hydrants_FR_SDIS_81.metainfo.csv")).unwrap();
    assert_eq!(
        meta,
        "file,origin,osm_date,official_non_merged,osm_non_merged,merged\n\
         \"hydrants_FR_SDIS_81\",\"https://www.data.gouv.fr/fr/datasets/hydrants-du-tarn/\",FIXME,2,2,3\n"
    );
}

#[test]
fn result_document_serializes() {
    let (_, result) = load_and_run();
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["meta"]["dataset"], "hydrants_FR_SDIS_81");
    assert_eq!(json["meta"]["mode"], "identifier");
    assert_eq!(json["summary"]["matched"], 3);
    assert_eq!(json["outcomes"][0]["bucket"], "matched");
    assert!(json.get("officials").is_none());
}

#[test]
fn on_disk_store_survives_reopen() {
    let config = load_config();
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("store.sqlite");
    {
        let mut session = Session::open(&db).unwrap();
        let csv = std::fs::read_to_string(fixtures_dir().join("pei_81.csv")).unwrap();
        session.import_csv(&config.source.table, &csv).unwrap();
        session.insert_map_features(&map_features()).unwrap();
    }
    let session = Session::open(&db).unwrap();
    let result = run(&session, &config).unwrap();
    assert_eq!(result.summary.matched, 3);
}
