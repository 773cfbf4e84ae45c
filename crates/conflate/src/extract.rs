//! Projection of raw store rows into canonical records.

use crate::config::{DatasetConfig, MapConfig, MappingSpec, RowFilter, TagsConfig};
use crate::error::ConflateError;
use crate::geodesy::{representative_point, Crs};
use crate::model::{Attributes, ExtractStats, MapItem, OfficialRecord};
use crate::normalize::{normalize_identifier, split_identifiers};
use crate::store::{RawFeature, Session, SourceRow};
use crate::text::render_template;

// ---------------------------------------------------------------------------
// Tag factory
// ---------------------------------------------------------------------------

pub type ComputeFn = Box<dyn Fn(&SourceRow) -> Result<Option<String>, String>>;

/// One entry of the tag mapping: a source column, or a function of the row.
pub enum TagMapping {
    Literal(String),
    Computed(ComputeFn),
}

impl std::fmt::Debug for TagMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Literal(column) => f.debug_tuple("Literal").field(column).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl TagMapping {
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&SourceRow) -> Result<Option<String>, String> + 'static,
    {
        Self::Computed(Box::new(f))
    }

    pub fn from_spec(spec: &MappingSpec) -> Self {
        match spec.clone() {
            MappingSpec::Column(column) => Self::Literal(column),
            MappingSpec::Template { template } => Self::computed(move |row| {
                render_template(&template, |key| {
                    row.get(key).filter(|v| !v.is_empty()).map(str::to_string)
                })
                .map(Some)
                .map_err(|key| format!("column '{key}' is absent or empty"))
            }),
            MappingSpec::Lookup { column, values, default } => Self::computed(move |row| {
                let raw = row.get(&column).map(str::trim).unwrap_or("");
                match values.get(raw).or(default.as_ref()) {
                    Some(mapped) => Ok(Some(mapped.clone())),
                    None => Err(format!("no mapping for {column}='{raw}'")),
                }
            }),
        }
    }

    /// Value for this row; `Ok(None)` when there is nothing to set.
    fn evaluate(&self, row: &SourceRow) -> Result<Option<String>, String> {
        match self {
            Self::Literal(column) => Ok(row.get(column).filter(|v| !v.is_empty()).map(str::to_string)),
            Self::Computed(f) => f(row).map(|v| v.filter(|s| !s.is_empty())),
        }
    }
}

/// Default tags overridden by mapped values.
#[derive(Debug, Default)]
pub struct TagFactory {
    defaults: Attributes,
    mapping: Vec<(String, TagMapping)>,
}

impl TagFactory {
    pub fn new(defaults: Attributes) -> Self {
        Self { defaults, mapping: Vec::new() }
    }

    pub fn from_config(tags: &TagsConfig) -> Self {
        tags.mapping
            .iter()
            .fold(Self::new(tags.default.clone()), |factory, (tag, spec)| {
                factory.with_mapping(tag, TagMapping::from_spec(spec))
            })
    }

    pub fn with_mapping(mut self, tag: impl Into<String>, mapping: TagMapping) -> Self {
        self.mapping.push((tag.into(), mapping));
        self
    }

    /// Tags for one row plus the number of entries that failed to evaluate.
    /// A failed entry leaves the tag unset and never aborts the row.
    pub fn build(&self, row: &SourceRow) -> (Attributes, usize) {
        let mut tags = self.defaults.clone();
        let mut failures = 0;
        for (tag, mapping) in &self.mapping {
            match mapping.evaluate(row) {
                Ok(Some(value)) => {
                    tags.insert(tag.clone(), value);
                }
                Ok(None) => {}
                Err(reason) => {
                    failures += 1;
                    log::debug!("tag '{tag}' skipped: {reason}");
                }
            }
        }
        (tags, failures)
    }
}

// ---------------------------------------------------------------------------
// Official records
// ---------------------------------------------------------------------------

/// Why a streamed source row did not become an official record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusion {
    Filtered,
    BadCoordinate,
}

pub struct OfficialExtractor<'a> {
    identifier_column: Option<&'a str>,
    x: &'a str,
    y: &'a str,
    crs: Crs,
    filter: Option<&'a RowFilter>,
    factory: &'a TagFactory,
}

impl<'a> OfficialExtractor<'a> {
    pub fn new(config: &'a DatasetConfig, factory: &'a TagFactory) -> Result<Self, ConflateError> {
        Ok(Self {
            identifier_column: config.source.identifier_column(),
            x: &config.source.x,
            y: &config.source.y,
            crs: config.source.crs()?,
            filter: config.source.filter.as_ref(),
            factory,
        })
    }

    /// Canonical record for `row` and its tag-mapping failure count.
    pub fn project(&self, index: usize, row: &SourceRow) -> Result<(OfficialRecord, usize), Exclusion> {
        if let Some(filter) = self.filter {
            let value = row.get(&filter.column).unwrap_or("");
            if !filter.values.iter().any(|v| v == value) {
                return Err(Exclusion::Filtered);
            }
        }

        let x = parse_coordinate(row.get(self.x)).ok_or(Exclusion::BadCoordinate)?;
        let y = parse_coordinate(row.get(self.y)).ok_or(Exclusion::BadCoordinate)?;
        let location = self.crs.to_wgs84(x, y);
        if !location.lon.is_finite() || !location.lat.is_finite() {
            return Err(Exclusion::BadCoordinate);
        }

        let identifier = self
            .identifier_column
            .and_then(|col| normalize_identifier(row.get(col)));
        let (tags, failures) = self.factory.build(row);

        Ok((
            OfficialRecord {
                index,
                identifier,
                tags,
                fields: row.to_fields(),
                location,
            },
            failures,
        ))
    }
}

/// Coordinate text, accepting a decimal comma.
fn parse_coordinate(raw: Option<&str>) -> Option<f64> {
    let text = raw?.trim();
    if text.is_empty() {
        return None;
    }
    text.replace(',', ".").parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Read every usable row of the source table.
pub fn extract_official(
    session: &Session,
    config: &DatasetConfig,
    factory: &TagFactory,
    stats: &mut ExtractStats,
) -> Result<Vec<OfficialRecord>, ConflateError> {
    let extractor = OfficialExtractor::new(config, factory)?;
    let source = &config.source;

    let total = session.count_rows(&source.table)?;
    let mut records = Vec::new();
    let mut filtered = 0;
    let mut unparsable = 0;
    let mut tag_failures = 0;

    let streamed = session.for_each_source_row(&source.table, &source.x, &source.y, |row| {
        match extractor.project(records.len(), &row) {
            Ok((record, failures)) => {
                tag_failures += failures;
                records.push(record);
            }
            Err(Exclusion::Filtered) => filtered += 1,
            Err(Exclusion::BadCoordinate) => unparsable += 1,
        }
        Ok(())
    })?;

    stats.source_rows = total;
    stats.skipped_rows = total.saturating_sub(streamed) + unparsable;
    stats.filtered_rows = filtered;
    stats.tag_failures = tag_failures;

    if stats.skipped_rows > 0 {
        log::warn!(
            "{}: {} source row(s) without usable coordinates skipped",
            source.table,
            stats.skipped_rows
        );
    }
    if tag_failures > 0 {
        log::warn!("{}: {tag_failures} tag mapping evaluation(s) failed", source.table);
    }
    Ok(records)
}

// ---------------------------------------------------------------------------
// Map items
// ---------------------------------------------------------------------------

/// Items for one feature: one per identifier value, or a single item without
/// identifier. Empty when the feature fails the tag predicate or has no
/// representative point.
pub fn map_items_from_feature(feature: &RawFeature, map: &MapConfig, first_index: usize) -> Vec<MapItem> {
    if !map.matches(&feature.tags) {
        return Vec::new();
    }
    let Some(location) = representative_point(&feature.geometry) else {
        return Vec::new();
    };

    let identifiers = split_identifiers(feature.tags.get(&map.reference).map(String::as_str));
    let identifiers: Vec<Option<String>> = if identifiers.is_empty() {
        vec![None]
    } else {
        identifiers.into_iter().map(Some).collect()
    };

    identifiers
        .into_iter()
        .enumerate()
        .map(|(offset, identifier)| MapItem {
            index: first_index + offset,
            id: feature.id,
            kind: feature.kind,
            identifier,
            tags: feature.tags.clone(),
            location,
        })
        .collect()
}

pub fn extract_map_items(
    session: &Session,
    map: &MapConfig,
    stats: &mut ExtractStats,
) -> Result<Vec<MapItem>, ConflateError> {
    let mut items: Vec<MapItem> = Vec::new();
    let mut features = 0;
    session.for_each_map_feature(&map.kinds, |feature| {
        let produced = map_items_from_feature(&feature, map, items.len());
        if !produced.is_empty() {
            features += 1;
        }
        items.extend(produced);
        Ok(())
    })?;
    stats.map_features = features;
    stats.map_items = items.len();
    Ok(items)
}
