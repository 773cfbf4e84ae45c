use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Ordered attribute mapping (tags or raw fields).
pub type Attributes = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// WGS84 position, degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Location {
    pub lon: f64,
    pub lat: f64,
}

impl Location {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

/// A geolocated row of the authoritative dataset, in canonical form.
#[derive(Debug, Clone, Serialize)]
pub struct OfficialRecord {
    /// Position in extraction order; last-resort tie-break.
    pub index: usize,
    pub identifier: Option<String>,
    pub tags: Attributes,
    pub fields: Attributes,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ItemKind {
    #[serde(rename = "n")]
    Node,
    #[serde(rename = "w")]
    Way,
    #[serde(rename = "r")]
    Relation,
}

impl ItemKind {
    pub const ALL: [ItemKind; 3] = [ItemKind::Node, ItemKind::Way, ItemKind::Relation];

    pub fn code(&self) -> &'static str {
        match self {
            Self::Node => "n",
            Self::Way => "w",
            Self::Relation => "r",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "n" => Some(Self::Node),
            "w" => Some(Self::Way),
            "r" => Some(Self::Relation),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Identity of a map feature, shared by all its identifier rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FeatureRef {
    pub kind: ItemKind,
    pub id: i64,
}

/// One row per (map feature, identifier value).
#[derive(Debug, Clone, Serialize)]
pub struct MapItem {
    pub index: usize,
    pub id: i64,
    pub kind: ItemKind,
    pub identifier: Option<String>,
    pub tags: Attributes,
    pub location: Location,
}

impl MapItem {
    pub fn feature(&self) -> FeatureRef {
        FeatureRef { kind: self.kind, id: self.id }
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// The dataset declares an identifier column.
    Identifier,
    /// Proximity only; stops after the missing-from-map report.
    GeoOnly,
}

impl std::fmt::Display for MatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identifier => write!(f, "identifier"),
            Self::GeoOnly => write!(f, "geo_only"),
        }
    }
}

/// Outcome for one record or record pair. Fields are indexes into the
/// official record and map item lists of the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "bucket", rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched { map_item: usize, official: usize },
    MissingFromMap { official: usize },
    MissingFromOfficial { map_item: usize },
    PossibleMerge { map_item: usize, official: usize, distance: f64 },
}

impl MatchOutcome {
    pub fn bucket(&self) -> Bucket {
        match self {
            Self::Matched { .. } => Bucket::Matched,
            Self::MissingFromMap { .. } => Bucket::MissingFromMap,
            Self::MissingFromOfficial { .. } => Bucket::MissingFromOfficial,
            Self::PossibleMerge { .. } => Bucket::PossibleMerge,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Matched,
    MissingFromMap,
    MissingFromOfficial,
    PossibleMerge,
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Matched => write!(f, "matched"),
            Self::MissingFromMap => write!(f, "missing_from_map"),
            Self::MissingFromOfficial => write!(f, "missing_from_official"),
            Self::PossibleMerge => write!(f, "possible_merge"),
        }
    }
}

// ---------------------------------------------------------------------------
// Review issues
// ---------------------------------------------------------------------------

/// Tag edit proposed to the reviewer: `+` adds, `~` overwrites.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fix {
    #[serde(rename = "+")]
    pub add: Attributes,
    #[serde(rename = "~", skip_serializing_if = "BTreeMap::is_empty")]
    pub modify: Attributes,
}

#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub bucket: Bucket,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subclass: Option<String>,
    /// Well-known text of the display position.
    pub geometry: String,
    pub text: BTreeMap<String, String>,
    pub fix: Option<Fix>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub official_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_item: Option<FeatureRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConflateSummary {
    pub total_outcomes: usize,
    pub matched: usize,
    pub missing_from_map: usize,
    pub missing_from_official: usize,
    pub possible_merges: usize,
    /// Official records not merged (missing from map or merge candidate).
    pub official_non_merged: usize,
    /// Map items not merged (missing from official or merge candidate).
    pub osm_non_merged: usize,
}

/// Data-quality exclusions and best-effort omissions seen during extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractStats {
    pub source_rows: usize,
    pub skipped_rows: usize,
    pub filtered_rows: usize,
    pub tag_failures: usize,
    pub duplicate_officials: usize,
    pub map_features: usize,
    pub map_items: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConflateMeta {
    pub dataset: String,
    pub url: String,
    pub mode: MatchMode,
    pub conflation_distance: f64,
    pub engine_version: String,
    pub run_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConflateResult {
    pub meta: ConflateMeta,
    pub summary: ConflateSummary,
    pub stats: ExtractStats,
    pub outcomes: Vec<MatchOutcome>,
    pub issues: Vec<Issue>,
    #[serde(skip)]
    pub officials: Vec<OfficialRecord>,
    #[serde(skip)]
    pub map_items: Vec<MapItem>,
}
