use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::ConflateError;
use crate::geodesy::Crs;
use crate::model::ItemKind;

/// Sentinel accepted in place of an identifier column for geo-only datasets.
pub const NO_IDENTIFIER: &str = "none";

/// Date column of the run digest when the map extract date is unknown.
pub const PLACEHOLDER_OSM_DATE: &str = "FIXME";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfig {
    /// Display name; also the stem of every report file.
    pub name: String,
    /// Attribution / origin URL.
    #[serde(default)]
    pub url: String,
    /// Proximity tolerance in meters.
    pub conflation_distance: f64,
    #[serde(default = "default_osm_date")]
    pub osm_date: String,
    pub source: SourceConfig,
    pub map: MapConfig,
    #[serde(default)]
    pub tags: TagsConfig,
    /// Description template per language.
    #[serde(default)]
    pub text: BTreeMap<String, String>,
}

fn default_osm_date() -> String {
    PLACEHOLDER_OSM_DATE.into()
}

// ---------------------------------------------------------------------------
// Official source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Table of the spatial store holding the raw rows.
    pub table: String,
    /// CSV imported into `table` before the run, relative to the config file.
    #[serde(default)]
    pub file: Option<String>,
    pub x: String,
    pub y: String,
    #[serde(default = "default_srid")]
    pub srid: u32,
    /// Identifier column; absent or `"none"` selects geo-only matching.
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
    #[serde(default)]
    pub filter: Option<RowFilter>,
}

fn default_srid() -> u32 {
    4326
}

impl SourceConfig {
    pub fn identifier_column(&self) -> Option<&str> {
        self.reference
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case(NO_IDENTIFIER) && *c != "NULL")
    }

    pub fn crs(&self) -> Result<Crs, ConflateError> {
        Crs::from_srid(self.srid)
    }
}

/// Keep a source row only when `column` holds one of `values`.
#[derive(Debug, Clone, Deserialize)]
pub struct RowFilter {
    pub column: String,
    pub values: Vec<String>,
}

// ---------------------------------------------------------------------------
// Map features
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MapConfig {
    /// Tag carrying the identifier on map features.
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default = "default_kinds")]
    pub kinds: Vec<ItemKind>,
    /// Conjunctive predicate on feature tags; keys are mandatory export columns.
    #[serde(default)]
    pub tags: BTreeMap<String, TagCondition>,
}

fn default_kinds() -> Vec<ItemKind> {
    ItemKind::ALL.to_vec()
}

impl MapConfig {
    pub fn matches(&self, tags: &BTreeMap<String, String>) -> bool {
        self.tags
            .iter()
            .all(|(key, cond)| cond.matches(tags.get(key).map(String::as_str)))
    }

    pub fn mandatory_keys(&self) -> Vec<String> {
        self.tags.keys().cloned().collect()
    }
}

/// `key = true` (present), `key = "v"` (equals, `""` means present),
/// `key = ["a", "b"]` (one of). `key = false` requires absence.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TagCondition {
    Present(bool),
    Equals(String),
    OneOf(Vec<String>),
}

impl TagCondition {
    pub fn matches(&self, value: Option<&str>) -> bool {
        match (self, value) {
            (Self::Present(want), v) => v.is_some() == *want,
            (_, None) => false,
            (Self::Equals(expected), Some(v)) => expected.is_empty() || v == expected,
            (Self::OneOf(values), Some(v)) => values.iter().any(|x| x == v),
        }
    }
}

// ---------------------------------------------------------------------------
// Tag factory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagsConfig {
    #[serde(default)]
    pub default: BTreeMap<String, String>,
    #[serde(default)]
    pub mapping: BTreeMap<String, MappingSpec>,
}

/// Declarative form of a tag mapping entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MappingSpec {
    /// Copy a source column.
    Column(String),
    /// `{column}` placeholders filled from the row.
    Template { template: String },
    /// Translate a column value through a lookup table.
    Lookup {
        column: String,
        values: BTreeMap<String, String>,
        #[serde(default)]
        default: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl DatasetConfig {
    pub fn from_toml(input: &str) -> Result<Self, ConflateError> {
        let config: DatasetConfig =
            toml::from_str(input).map_err(|e| ConflateError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConflateError> {
        if self.name.trim().is_empty() {
            return Err(ConflateError::ConfigValidation("name must not be empty".into()));
        }
        if self.name.contains(['/', '\\']) {
            return Err(ConflateError::ConfigValidation(format!(
                "name '{}' is used as a file name and must not contain path separators",
                self.name
            )));
        }

        if !self.conflation_distance.is_finite() || self.conflation_distance <= 0.0 {
            return Err(ConflateError::ConfigValidation(format!(
                "conflation_distance must be a positive number of meters, got {}",
                self.conflation_distance
            )));
        }

        self.source.crs()?;

        check_identifier("source.table", &self.source.table)?;
        check_identifier("source.x", &self.source.x)?;
        check_identifier("source.y", &self.source.y)?;
        if let Some(col) = self.source.identifier_column() {
            check_identifier("source.ref", col)?;
        }

        if let Some(ref filter) = self.source.filter {
            check_identifier("source.filter.column", &filter.column)?;
            if filter.values.is_empty() {
                return Err(ConflateError::ConfigValidation(
                    "source.filter.values must list at least one value".into(),
                ));
            }
        }

        if self.map.reference.trim().is_empty() {
            return Err(ConflateError::ConfigValidation("map.ref must not be empty".into()));
        }
        if self.map.kinds.is_empty() {
            return Err(ConflateError::ConfigValidation(
                "map.kinds must list at least one of n, w, r".into(),
            ));
        }

        Ok(())
    }

    pub fn is_geo_only(&self) -> bool {
        self.source.identifier_column().is_none()
    }
}

/// Column and table names are spliced into SQL; keep them to `[A-Za-z0-9_]`.
fn check_identifier(field: &str, value: &str) -> Result<(), ConflateError> {
    let ok = !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(ConflateError::ConfigValidation(format!(
            "{field}: '{value}' is not a plain column/table name"
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
