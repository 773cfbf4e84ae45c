//! Spatial store session.
//!
//! One [`Session`] is opened per run by the caller and passed explicitly to
//! every stage that reads from the store. The connection is released when the
//! session is dropped, whichever way the run ends.

use std::path::Path;
use std::rc::Rc;

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};

use crate::error::ConflateError;
use crate::geodesy::FeatureGeometry;
use crate::model::{Attributes, ItemKind, Location};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS map_feature (
    kind TEXT NOT NULL CHECK (kind IN ('n', 'w', 'r')),
    id INTEGER NOT NULL,
    geom TEXT,
    tags TEXT NOT NULL DEFAULT '{}',
    PRIMARY KEY (kind, id)
);
"#;

/// A raw row of the official source table, columns in table order.
#[derive(Debug, Clone)]
pub struct SourceRow {
    columns: Rc<[String]>,
    values: Vec<Option<String>>,
}

impl SourceRow {
    pub fn new(columns: Rc<[String]>, values: Vec<Option<String>>) -> Self {
        Self { columns, values }
    }

    /// Value of `column`; `None` when the column is unknown or NULL.
    pub fn get(&self, column: &str) -> Option<&str> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.values.get(idx)?.as_deref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.columns
            .iter()
            .zip(&self.values)
            .map(|(c, v)| (c.as_str(), v.as_deref()))
    }

    /// Every column stringified; NULL becomes the empty string.
    pub fn to_fields(&self) -> Attributes {
        self.iter()
            .map(|(c, v)| (c.to_string(), v.unwrap_or("").to_string()))
            .collect()
    }
}

/// A map feature as stored, before filtering and identifier splitting.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFeature {
    pub kind: ItemKind,
    pub id: i64,
    pub geometry: FeatureGeometry,
    pub tags: Attributes,
}

pub struct Session {
    conn: Connection,
}

impl Session {
    pub fn open(path: &Path) -> Result<Self, ConflateError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, ConflateError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, ConflateError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // -----------------------------------------------------------------------
    // Official source
    // -----------------------------------------------------------------------

    /// Replace `table` with the contents of a CSV document (all TEXT columns).
    /// Returns the number of imported rows.
    pub fn import_csv(&mut self, table: &str, csv_data: &str) -> Result<usize, ConflateError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(csv_data.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| ConflateError::Io(e.to_string()))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if headers.is_empty() || headers.iter().any(String::is_empty) {
            return Err(ConflateError::Io(format!("table '{table}': CSV header has empty column names")));
        }

        let columns_ddl = headers
            .iter()
            .map(|h| format!("{} TEXT", quote_ident(h)))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; headers.len()].join(", ");

        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {t}; CREATE TABLE {t} ({columns_ddl});",
            t = quote_ident(table)
        ))?;

        let mut count = 0;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} VALUES ({placeholders})",
                quote_ident(table)
            ))?;
            for record in reader.records() {
                let record = record.map_err(|e| ConflateError::Io(e.to_string()))?;
                let values: Vec<Option<&str>> =
                    (0..headers.len()).map(|i| record.get(i)).collect();
                stmt.execute(rusqlite::params_from_iter(values))?;
                count += 1;
            }
        }
        tx.commit()?;

        log::info!("imported {count} rows into '{table}'");
        Ok(count)
    }

    pub fn count_rows(&self, table: &str) -> Result<usize, ConflateError> {
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Stream the rows of `table` whose `x` and `y` columns are non-null and
    /// non-empty as text. Returns the number of rows handed to `f`.
    pub fn for_each_source_row<F>(
        &self,
        table: &str,
        x: &str,
        y: &str,
        mut f: F,
    ) -> Result<usize, ConflateError>
    where
        F: FnMut(SourceRow) -> Result<(), ConflateError>,
    {
        let existing = self.table_columns(table)?;
        for column in [x, y] {
            if !existing.iter().any(|c| c == column) {
                return Err(ConflateError::MissingColumn {
                    table: table.into(),
                    column: column.into(),
                });
            }
        }

        let (qx, qy) = (quote_ident(x), quote_ident(y));
        let sql = format!(
            "SELECT * FROM {} \
             WHERE {qx} IS NOT NULL AND {qy} IS NOT NULL \
             AND CAST({qx} AS TEXT) != '' AND CAST({qy} AS TEXT) != '' \
             ORDER BY rowid",
            quote_ident(table)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let columns: Rc<[String]> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>()
            .into();

        let mut rows = stmt.query([])?;
        let mut count = 0;
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                values.push(value_to_string(row.get_ref(i)?));
            }
            f(SourceRow::new(Rc::clone(&columns), values))?;
            count += 1;
        }
        Ok(count)
    }

    fn table_columns(&self, table: &str) -> Result<Vec<String>, ConflateError> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        if columns.is_empty() {
            return Err(ConflateError::Store(format!("no such table: {table}")));
        }
        Ok(columns)
    }

    // -----------------------------------------------------------------------
    // Map features
    // -----------------------------------------------------------------------

    pub fn insert_map_features(&mut self, features: &[RawFeature]) -> Result<(), ConflateError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO map_feature (kind, id, geom, tags) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for feature in features {
                let tags = serde_json::to_string(&feature.tags)
                    .map_err(|e| ConflateError::Store(e.to_string()))?;
                stmt.execute(params![
                    feature.kind.code(),
                    feature.id,
                    encode_geometry(&feature.geometry),
                    tags,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn count_map_features(&self) -> Result<usize, ConflateError> {
        let n: i64 = self.conn.query_row("SELECT COUNT(*) FROM map_feature", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Stream the features of the given kinds that carry a geometry, in
    /// insertion order. Returns the number of features handed to `f`.
    pub fn for_each_map_feature<F>(&self, kinds: &[ItemKind], mut f: F) -> Result<usize, ConflateError>
    where
        F: FnMut(RawFeature) -> Result<(), ConflateError>,
    {
        let mut stmt = self.conn.prepare(
            "SELECT kind, id, geom, tags FROM map_feature WHERE geom IS NOT NULL ORDER BY rowid",
        )?;
        let mut rows = stmt.query([])?;
        let mut count = 0;
        while let Some(row) = rows.next()? {
            let code: String = row.get(0)?;
            let kind = ItemKind::from_code(&code)
                .ok_or_else(|| ConflateError::Store(format!("unknown feature kind '{code}'")))?;
            if !kinds.contains(&kind) {
                continue;
            }
            let id: i64 = row.get(1)?;
            let geom: String = row.get(2)?;
            let tags: String = row.get(3)?;

            let geometry = decode_geometry(kind, &geom).map_err(|message| ConflateError::Geometry {
                kind: kind.code().into(),
                id,
                message,
            })?;
            let tags: Attributes = serde_json::from_str(&tags).map_err(|e| ConflateError::Geometry {
                kind: kind.code().into(),
                id,
                message: format!("tags: {e}"),
            })?;

            f(RawFeature { kind, id, geometry, tags })?;
            count += 1;
        }
        Ok(count)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn value_to_string(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

// ---------------------------------------------------------------------------
// Geometry encoding: [lon,lat] | [[lon,lat],..] | [[[lon,lat],..],..]
// ---------------------------------------------------------------------------

fn encode_geometry(geom: &FeatureGeometry) -> String {
    let pair = |l: &Location| [l.lon, l.lat];
    let value = match geom {
        FeatureGeometry::Point(l) => serde_json::json!(pair(l)),
        FeatureGeometry::Line(coords) => {
            serde_json::json!(coords.iter().map(pair).collect::<Vec<_>>())
        }
        FeatureGeometry::Members(members) => serde_json::json!(members
            .iter()
            .map(|m| m.iter().map(pair).collect::<Vec<_>>())
            .collect::<Vec<_>>()),
    };
    value.to_string()
}

fn decode_geometry(kind: ItemKind, text: &str) -> Result<FeatureGeometry, String> {
    let to_loc = |p: [f64; 2]| Location::new(p[0], p[1]);
    match kind {
        ItemKind::Node => {
            let p: [f64; 2] = serde_json::from_str(text).map_err(|e| e.to_string())?;
            Ok(FeatureGeometry::Point(to_loc(p)))
        }
        ItemKind::Way => {
            let coords: Vec<[f64; 2]> = serde_json::from_str(text).map_err(|e| e.to_string())?;
            Ok(FeatureGeometry::Line(coords.into_iter().map(to_loc).collect()))
        }
        ItemKind::Relation => {
            let members: Vec<Vec<[f64; 2]>> =
                serde_json::from_str(text).map_err(|e| e.to_string())?;
            Ok(FeatureGeometry::Members(
                members
                    .into_iter()
                    .map(|m| m.into_iter().map(to_loc).collect())
                    .collect(),
            ))
        }
    }
}
