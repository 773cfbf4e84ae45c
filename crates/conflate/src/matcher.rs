use std::collections::{BTreeMap, HashMap, HashSet};

use crate::geodesy::{distance_m, wkt, ProximityIndex};
use crate::model::{FeatureRef, MapItem, MatchMode, MatchOutcome, OfficialRecord};

/// Fold official records sharing identifier and location text into the first
/// of them, so that a repeated source row joins only once. Records without an
/// identifier are never folded. Indexes are renumbered in order. Returns the
/// kept records and the number folded.
pub fn fold_duplicate_officials(records: Vec<OfficialRecord>) -> (Vec<OfficialRecord>, usize) {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let before = records.len();
    let mut kept: Vec<OfficialRecord> = records
        .into_iter()
        .filter(|r| match r.identifier {
            Some(ref id) => seen.insert((id.clone(), wkt(&r.location))),
            None => true,
        })
        .collect();
    for (i, record) in kept.iter_mut().enumerate() {
        record.index = i;
    }
    let folded = before - kept.len();
    (kept, folded)
}

/// Classify every official record and map item into exactly one outcome.
///
/// Outcomes are ordered by bucket (matched, possible merge, missing from map,
/// missing from official), then by official index, then by item index.
pub fn match_records(
    officials: &[OfficialRecord],
    items: &[MapItem],
    mode: MatchMode,
    conflation_distance: f64,
) -> Vec<MatchOutcome> {
    let mut outcomes = match mode {
        MatchMode::Identifier => match_by_identifier(officials, items, conflation_distance),
        MatchMode::GeoOnly => match_geo_only(officials, items, conflation_distance),
    };
    outcomes.sort_by_key(outcome_order);
    outcomes
}

fn outcome_order(outcome: &MatchOutcome) -> (u8, usize, usize) {
    match *outcome {
        MatchOutcome::Matched { official, map_item } => (0, official, map_item),
        MatchOutcome::PossibleMerge { official, map_item, .. } => (1, official, map_item),
        MatchOutcome::MissingFromMap { official } => (2, official, 0),
        MatchOutcome::MissingFromOfficial { map_item } => (3, map_item, 0),
    }
}

// ---------------------------------------------------------------------------
// Identifier mode
// ---------------------------------------------------------------------------

fn match_by_identifier(
    officials: &[OfficialRecord],
    items: &[MapItem],
    conflation_distance: f64,
) -> Vec<MatchOutcome> {
    let mut officials_by_id: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    let mut residual_officials = Vec::new();
    for (o, record) in officials.iter().enumerate() {
        match record.identifier.as_deref() {
            Some(id) => officials_by_id.entry(id).or_default().push(o),
            None => residual_officials.push(o),
        }
    }

    let mut items_by_id: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    let mut residual_items = Vec::new();
    for (i, item) in items.iter().enumerate() {
        match item.identifier.as_deref() {
            Some(id) if officials_by_id.contains_key(id) => {
                items_by_id.entry(id).or_default().push(i)
            }
            _ => residual_items.push(i),
        }
    }

    let mut outcomes = Vec::new();
    for (id, group_officials) in &officials_by_id {
        match items_by_id.get(id) {
            Some(group_items) => {
                outcomes.extend(pair_identifier_group(officials, items, group_officials, group_items))
            }
            None => residual_officials.extend(group_officials),
        }
    }
    residual_officials.sort_unstable();

    outcomes.extend(match_residuals(
        officials,
        items,
        &residual_officials,
        &residual_items,
        conflation_distance,
    ));
    outcomes
}

/// Pair the records of one identifier 1:1 by ascending distance. Records left
/// over on the larger side still match, with their nearest counterpart.
fn pair_identifier_group(
    officials: &[OfficialRecord],
    items: &[MapItem],
    group_officials: &[usize],
    group_items: &[usize],
) -> Vec<MatchOutcome> {
    let mut candidates: Vec<(f64, usize, usize)> = group_officials
        .iter()
        .flat_map(|&o| {
            group_items
                .iter()
                .map(move |&i| (distance_m(&officials[o].location, &items[i].location), o, i))
        })
        .collect();
    candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    let mut official_partner: HashMap<usize, usize> = HashMap::new();
    let mut item_partner: HashMap<usize, usize> = HashMap::new();
    let mut outcomes = Vec::new();
    for &(_, o, i) in &candidates {
        if official_partner.contains_key(&o) || item_partner.contains_key(&i) {
            continue;
        }
        official_partner.insert(o, i);
        item_partner.insert(i, o);
        outcomes.push(MatchOutcome::Matched { map_item: i, official: o });
    }

    // Candidates are sorted, so the first hit is the nearest counterpart.
    for &o in group_officials {
        if !official_partner.contains_key(&o) {
            if let Some(&(_, _, i)) = candidates.iter().find(|c| c.1 == o) {
                outcomes.push(MatchOutcome::Matched { map_item: i, official: o });
            }
        }
    }
    for &i in group_items {
        if !item_partner.contains_key(&i) {
            if let Some(&(_, o, _)) = candidates.iter().find(|c| c.2 == i) {
                outcomes.push(MatchOutcome::Matched { map_item: i, official: o });
            }
        }
    }
    outcomes
}

/// Proximity join between records that found no identifier partner.
fn match_residuals(
    officials: &[OfficialRecord],
    items: &[MapItem],
    residual_officials: &[usize],
    residual_items: &[usize],
    conflation_distance: f64,
) -> Vec<MatchOutcome> {
    let pairs = proximity_pairs(officials, items, residual_officials, residual_items, conflation_distance);

    let mut paired_officials = HashSet::new();
    let mut paired_items = HashSet::new();
    let mut outcomes = Vec::new();
    for pair in &pairs {
        paired_officials.insert(pair.official);
        paired_items.insert(pair.map_item);
        outcomes.push(MatchOutcome::PossibleMerge {
            map_item: pair.map_item,
            official: pair.official,
            distance: pair.distance,
        });
    }

    outcomes.extend(
        residual_officials
            .iter()
            .filter(|o| !paired_officials.contains(*o))
            .map(|&official| MatchOutcome::MissingFromMap { official }),
    );
    outcomes.extend(
        residual_items
            .iter()
            .filter(|i| !paired_items.contains(*i))
            .map(|&map_item| MatchOutcome::MissingFromOfficial { map_item }),
    );
    outcomes
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximityPair {
    pub official: usize,
    pub map_item: usize,
    pub distance: f64,
}

/// Closest-first pairing of officials and map features within tolerance.
///
/// Candidate pairs are reduced to one per (official, feature) at the minimum
/// distance, then accepted greedily by ascending distance (ties: official
/// index, then feature id) while neither side is already taken.
pub fn proximity_pairs(
    officials: &[OfficialRecord],
    items: &[MapItem],
    candidate_officials: &[usize],
    candidate_items: &[usize],
    conflation_distance: f64,
) -> Vec<ProximityPair> {
    if candidate_officials.is_empty() || candidate_items.is_empty() {
        return Vec::new();
    }
    let index = ProximityIndex::new(candidate_items.iter().map(|&i| items[i].location).collect());

    let mut best: HashMap<(usize, FeatureRef), ProximityPair> = HashMap::new();
    for &o in candidate_officials {
        for hit in index.within(&officials[o].location, conflation_distance) {
            let i = candidate_items[hit.slot];
            let candidate = ProximityPair { official: o, map_item: i, distance: hit.distance };
            best.entry((o, items[i].feature()))
                .and_modify(|kept| {
                    if (candidate.distance, candidate.map_item) < (kept.distance, kept.map_item) {
                        *kept = candidate;
                    }
                })
                .or_insert(candidate);
        }
    }

    let mut candidates: Vec<ProximityPair> = best.into_values().collect();
    candidates.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then(a.official.cmp(&b.official))
            .then(items[a.map_item].feature().cmp(&items[b.map_item].feature()))
            .then(a.map_item.cmp(&b.map_item))
    });

    let mut used_officials = HashSet::new();
    let mut used_features = HashSet::new();
    candidates
        .into_iter()
        .filter(|pair| {
            let feature = items[pair.map_item].feature();
            if used_officials.contains(&pair.official) || used_features.contains(&feature) {
                return false;
            }
            used_officials.insert(pair.official);
            used_features.insert(feature);
            true
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Geo-only mode
// ---------------------------------------------------------------------------

/// Officials near any map item are matched with the nearest one; the others
/// are missing from the map. Map items are not classified in this mode.
fn match_geo_only(
    officials: &[OfficialRecord],
    items: &[MapItem],
    conflation_distance: f64,
) -> Vec<MatchOutcome> {
    let index = ProximityIndex::new(items.iter().map(|i| i.location).collect());
    officials
        .iter()
        .enumerate()
        .map(|(o, record)| match index.nearest_within(&record.location, conflation_distance) {
            Some(hit) => MatchOutcome::Matched { map_item: hit.slot, official: o },
            None => MatchOutcome::MissingFromMap { official: o },
        })
        .collect()
}
