use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::geodesy::{wkt, wkt_fixed};
use crate::model::{
    Attributes, Bucket, Fix, Issue, Location, MapItem, MatchOutcome, OfficialRecord,
};
use crate::text::{AttrView, TextPolicy};

/// Decimals kept when hashing a position (about 1 cm).
pub const SUBCLASS_DECIMALS: usize = 7;

/// Stable key of a position: SHA-256 of its fixed-precision WKT, first 8
/// bytes read big-endian, as decimal.
pub fn subclass_key(location: &Location) -> String {
    let digest = Sha256::digest(wkt_fixed(location, SUBCLASS_DECIMALS).as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head).to_string()
}

/// Build one review issue per non-matched outcome, in outcome order.
pub fn build_issues(
    outcomes: &[MatchOutcome],
    officials: &[OfficialRecord],
    items: &[MapItem],
    text: &dyn TextPolicy,
) -> Vec<Issue> {
    outcomes
        .iter()
        .filter_map(|outcome| classify(outcome, officials, items, text))
        .collect()
}

/// The issue for a single outcome; `None` for matched pairs.
pub fn classify(
    outcome: &MatchOutcome,
    officials: &[OfficialRecord],
    items: &[MapItem],
    text: &dyn TextPolicy,
) -> Option<Issue> {
    match *outcome {
        MatchOutcome::Matched { .. } => None,

        MatchOutcome::MissingFromMap { official } => {
            let record = &officials[official];
            Some(Issue {
                bucket: Bucket::MissingFromMap,
                subclass: Some(subclass_key(&record.location)),
                geometry: wkt(&record.location),
                text: describe(text, record),
                fix: (!record.tags.is_empty()).then(|| Fix {
                    add: record.tags.clone(),
                    modify: Attributes::new(),
                }),
                official_ref: record.identifier.clone(),
                map_item: None,
                distance_m: None,
            })
        }

        MatchOutcome::MissingFromOfficial { map_item } => {
            let item = &items[map_item];
            Some(Issue {
                bucket: Bucket::MissingFromOfficial,
                subclass: None,
                geometry: wkt(&item.location),
                text: text.describe(AttrView::new(&item.tags), AttrView::new(&Attributes::new())),
                fix: None,
                official_ref: None,
                map_item: Some(item.feature()),
                distance_m: None,
            })
        }

        MatchOutcome::PossibleMerge { map_item, official, distance } => {
            let record = &officials[official];
            let item = &items[map_item];
            Some(Issue {
                bucket: Bucket::PossibleMerge,
                subclass: None,
                geometry: wkt(&item.location),
                text: describe(text, record),
                fix: Some(merge_fix(&record.tags, &item.tags)),
                official_ref: record.identifier.clone(),
                map_item: Some(item.feature()),
                distance_m: Some(distance),
            })
        }
    }
}

fn describe(text: &dyn TextPolicy, record: &OfficialRecord) -> BTreeMap<String, String> {
    text.describe(AttrView::new(&record.tags), AttrView::new(&record.fields))
}

/// Add the official tags to the existing item; an item that already cites a
/// `source` gets the official one instead.
fn merge_fix(official_tags: &Attributes, item_tags: &Attributes) -> Fix {
    let mut modify = Attributes::new();
    if item_tags.contains_key("source") {
        if let Some(source) = official_tags.get("source") {
            modify.insert("source".to_string(), source.clone());
        }
    }
    Fix { add: official_tags.clone(), modify }
}
