/// Separator used by multi-valued identifier tags (`ref=12;13`).
pub const IDENTIFIER_SEPARATOR: char = ';';

/// Split a raw identifier tag value into candidate identifiers.
///
/// Each part is trimmed and empty parts are dropped, so `" a; ;b "` yields
/// `["a", "b"]`. An absent or blank value yields no candidate.
pub fn split_identifiers(raw: Option<&str>) -> Vec<String> {
    match raw {
        None => Vec::new(),
        Some(value) => value
            .split(IDENTIFIER_SEPARATOR)
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
    }
}

/// Trim a single-valued identifier; blank becomes `None`.
pub fn normalize_identifier(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
