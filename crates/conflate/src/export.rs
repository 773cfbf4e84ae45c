//! Tag-oriented CSV reports.
//!
//! Columns are the fixed head values, then the identifier tag, then the
//! mandatory filter tags, then every other tag by descending frequency. The
//! dialect is the one review tooling already consumes: only values containing
//! a comma are quoted, embedded quotes are backslash-escaped, line breaks are
//! dropped and trailing empty fields are trimmed.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::ConflateError;
use crate::model::{Attributes, ConflateResult, Location, MapItem, MatchOutcome, OfficialRecord};

/// Rows are pulled from their source this many at a time.
pub const BATCH_SIZE: usize = 1000;

pub const OFFICIAL_HEAD: [&str; 2] = ["lon", "lat"];
pub const BY_OSM_HEAD: [&str; 4] = ["osm_id", "osm_type", "lon", "lat"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExportRow {
    /// Values for the head columns; empty renders as an empty field.
    pub head: Vec<String>,
    pub tags: Attributes,
}

/// Column layout shared by every row of one report.
#[derive(Debug, Clone)]
pub struct CsvLayout {
    pub head: Vec<String>,
    pub identifier_key: String,
    pub mandatory_keys: Vec<String>,
}

impl CsvLayout {
    pub fn new(head: &[&str], identifier_key: &str, mandatory_keys: Vec<String>) -> Self {
        Self {
            head: head.iter().map(|h| h.to_string()).collect(),
            identifier_key: identifier_key.to_string(),
            mandatory_keys,
        }
    }

    /// Tag columns for `rows`, in report order.
    pub fn tag_columns(&self, rows: &[ExportRow]) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for key in std::iter::once(&self.identifier_key).chain(&self.mandatory_keys) {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }

        let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
        for row in rows {
            for key in row.tags.keys() {
                let next = counts.len();
                counts.entry(key.as_str()).or_insert((0, next)).0 += 1;
            }
        }
        let fixed: HashSet<&str> = columns.iter().map(String::as_str).collect();
        let mut rest: Vec<(&str, usize, usize)> = counts
            .into_iter()
            .filter(|(key, _)| !fixed.contains(key))
            .map(|(key, (count, first_seen))| (key, count, first_seen))
            .collect();
        rest.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        columns.extend(rest.into_iter().map(|(key, _, _)| key.to_string()));
        columns
    }
}

/// Quote a value holding a comma, escaping its quotes with a backslash, and
/// drop carriage returns and newlines.
pub fn escape_field(value: &str) -> String {
    let field = if value.contains(',') {
        format!("\"{}\"", value.replace('"', "\\\""))
    } else {
        value.to_string()
    };
    field.replace(['\r', '\n'], "")
}

/// One report line without its terminator.
pub fn render_line<'a>(fields: impl IntoIterator<Item = &'a str>) -> String {
    let line = fields.into_iter().map(escape_field).collect::<Vec<_>>().join(",");
    line.trim_end_matches(',').to_string()
}

/// Drain `rows` in batches, then write header and rows to `path`.
/// Returns the number of data lines written.
pub fn write_csv<I>(path: &Path, layout: &CsvLayout, rows: I) -> Result<usize, ConflateError>
where
    I: IntoIterator<Item = ExportRow>,
{
    let mut source = rows.into_iter();
    let mut buffered = Vec::new();
    loop {
        let batch: Vec<ExportRow> = source.by_ref().take(BATCH_SIZE).collect();
        if batch.is_empty() {
            break;
        }
        buffered.extend(batch);
    }

    let columns = layout.tag_columns(&buffered);
    let export_err = |e: std::io::Error| ConflateError::Export {
        path: path.display().to_string(),
        message: e.to_string(),
    };

    let file = File::create(path).map_err(export_err)?;
    let mut out = BufWriter::new(file);
    let header = render_line(layout.head.iter().chain(&columns).map(String::as_str));
    writeln!(out, "{header}").map_err(export_err)?;
    for row in &buffered {
        let tag_values = columns
            .iter()
            .map(|c| row.tags.get(c).map(String::as_str).unwrap_or(""));
        let line = render_line(row.head.iter().map(String::as_str).chain(tag_values));
        writeln!(out, "{line}").map_err(export_err)?;
    }
    out.flush().map_err(export_err)?;

    log::debug!("{}: {} rows, {} tag columns", path.display(), buffered.len(), columns.len());
    Ok(buffered.len())
}

// ---------------------------------------------------------------------------
// Report rows
// ---------------------------------------------------------------------------

fn coords(loc: &Location) -> [String; 2] {
    [loc.lon.to_string(), loc.lat.to_string()]
}

/// Rows of `<name>.csv`: every official record at its position.
pub fn official_rows(officials: &[OfficialRecord]) -> impl Iterator<Item = ExportRow> + '_ {
    officials.iter().map(|record| ExportRow {
        head: coords(&record.location).to_vec(),
        tags: record.tags.clone(),
    })
}

fn item_row(item: &MapItem) -> ExportRow {
    let [lon, lat] = coords(&item.location);
    ExportRow {
        head: vec![item.id.to_string(), item.kind.code().to_string(), lon, lat],
        tags: item.tags.clone(),
    }
}

fn unmapped_official_row(record: &OfficialRecord) -> ExportRow {
    let [lon, lat] = coords(&record.location);
    ExportRow {
        head: vec![String::new(), String::new(), lon, lat],
        tags: record.tags.clone(),
    }
}

/// Rows of `<name>.byOSM.csv`: matched map items, then official records not
/// merged, then map items not merged. Identical rows are kept once.
pub fn by_osm_rows(result: &ConflateResult) -> Vec<ExportRow> {
    let (officials, items) = (&result.officials, &result.map_items);
    let mut matched = Vec::new();
    let mut loose_officials = Vec::new();
    let mut loose_items = Vec::new();
    for outcome in &result.outcomes {
        match *outcome {
            MatchOutcome::Matched { map_item, .. } => matched.push(item_row(&items[map_item])),
            MatchOutcome::MissingFromMap { official } => {
                loose_officials.push(unmapped_official_row(&officials[official]))
            }
            MatchOutcome::MissingFromOfficial { map_item } => {
                loose_items.push(item_row(&items[map_item]))
            }
            MatchOutcome::PossibleMerge { map_item, official, .. } => {
                loose_officials.push(unmapped_official_row(&officials[official]));
                loose_items.push(item_row(&items[map_item]));
            }
        }
    }
    let mut seen = HashSet::new();
    matched
        .into_iter()
        .chain(loose_officials)
        .chain(loose_items)
        .filter(|row| seen.insert(row.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn row(head: &[&str], tags: &[(&str, &str)]) -> ExportRow {
        ExportRow {
            head: head.iter().map(|h| h.to_string()).collect(),
            tags: tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    fn layout() -> CsvLayout {
        CsvLayout::new(&OFFICIAL_HEAD, "ref", vec!["emergency".into()])
    }

    #[test]
    fn columns_follow_identifier_mandatory_then_frequency() {
        let rows = vec![
            row(&["1", "2"], &[("b", "x"), ("c", "x")]),
            row(&["1", "2"], &[("c", "y"), ("emergency", "z")]),
            row(&["1", "2"], &[("a", "y"), ("c", "z")]),
        ];
        // c: 3; a and b: 1 each, b seen first.
        assert_eq!(layout().tag_columns(&rows), vec!["ref", "emergency", "c", "b", "a"]);
    }

    #[test]
    fn identifier_listed_once_when_also_mandatory() {
        let layout = CsvLayout::new(&OFFICIAL_HEAD, "ref", vec!["amenity".into(), "ref".into()]);
        assert_eq!(layout.tag_columns(&[]), vec!["ref", "amenity"]);
    }

    #[test]
    fn escaping_rules() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\", ok"), "\"say \\\"hi\\\", ok\"");
        // Quotes alone are not quoted.
        assert_eq!(escape_field("6\" pipe"), "6\" pipe");
        assert_eq!(escape_field("two\r\nlines"), "twolines");
    }

    #[test]
    fn trailing_empty_fields_are_trimmed() {
        assert_eq!(render_line(["1", "2", "x", "", ""]), "1,2,x");
        assert_eq!(render_line(["1", "", "x"]), "1,,x");
    }

    #[test]
    fn writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hydrants.csv");
        let rows = vec![
            row(&["2.1", "43.9"], &[("ref", "1"), ("emergency", "fire_hydrant"), ("note", "a,b")]),
            row(&["2.2", "43.8"], &[("emergency", "fire_hydrant")]),
        ];
        let written = write_csv(&path, &layout(), rows).unwrap();
        assert_eq!(written, 2);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "lon,lat,ref,emergency,note\n2.1,43.9,1,fire_hydrant,\"a,b\"\n2.2,43.8,,fire_hydrant\n"
        );
    }

    #[test]
    fn more_rows_than_one_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("many.csv");
        let rows = (0..BATCH_SIZE * 2 + 5).map(|i| row(&["0", "0"], &[("ref", i.to_string().as_str())]));
        let written = write_csv(&path, &layout(), rows.collect::<Vec<_>>()).unwrap();
        assert_eq!(written, BATCH_SIZE * 2 + 5);
        let lines = std::fs::read_to_string(&path).unwrap().lines().count();
        assert_eq!(lines, BATCH_SIZE * 2 + 6);
    }

    #[test]
    fn unwritable_path_is_an_export_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("x.csv");
        let err = write_csv(&path, &layout(), Vec::new()).unwrap_err();
        assert!(matches!(err, ConflateError::Export { .. }), "{err}");
    }

    fn config_64() -> ProptestConfig {
        ProptestConfig {
            cases: std::env::var("PROPTEST_CASES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(64),
            failure_persistence: None,
            ..ProptestConfig::default()
        }
    }

    proptest! {
        #![proptest_config(config_64())]

        #[test]
        fn column_order_is_a_deterministic_permutation(
            tag_sets in prop::collection::vec(
                prop::collection::btree_map("[a-e]", "[xy]", 0..5),
                0..20,
            )
        ) {
            let rows: Vec<ExportRow> = tag_sets
                .into_iter()
                .map(|tags| ExportRow { head: vec!["0".into(), "0".into()], tags })
                .collect();
            let layout = layout();
            let columns = layout.tag_columns(&rows);
            prop_assert_eq!(&columns, &layout.tag_columns(&rows));
            prop_assert_eq!(&columns[..2], &["ref".to_string(), "emergency".to_string()][..]);

            let unique: HashSet<&String> = columns.iter().collect();
            prop_assert_eq!(unique.len(), columns.len());
            for r in &rows {
                for key in r.tags.keys() {
                    prop_assert!(columns.contains(key));
                }
            }

            // Frequencies are non-increasing after the fixed columns.
            let freq = |k: &String| rows.iter().filter(|r| r.tags.contains_key(k)).count();
            for pair in columns[2..].windows(2) {
                prop_assert!(freq(&pair[0]) >= freq(&pair[1]));
            }
        }
    }
}
