//! Human-readable issue descriptions.

use std::collections::BTreeMap;

use crate::model::Attributes;

/// Rendered in place of an attribute the record does not carry.
pub const NO_VALUE: &str = "no value";

/// Read-only attribute access where absent keys read as [`NO_VALUE`].
#[derive(Debug, Clone, Copy)]
pub struct AttrView<'a> {
    attrs: &'a Attributes,
}

impl<'a> AttrView<'a> {
    pub fn new(attrs: &'a Attributes) -> Self {
        Self { attrs }
    }

    pub fn get(&self, key: &str) -> &'a str {
        self.attrs.get(key).map(String::as_str).unwrap_or(NO_VALUE)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attrs.contains_key(key)
    }
}

/// Builds the per-language description of an issue from the official
/// record's tags and raw fields. Issues about a map item alone get the item's
/// tags and no fields.
pub trait TextPolicy {
    fn describe(&self, tags: AttrView<'_>, fields: AttrView<'_>) -> BTreeMap<String, String>;
}

impl<F> TextPolicy for F
where
    F: Fn(AttrView<'_>, AttrView<'_>) -> BTreeMap<String, String>,
{
    fn describe(&self, tags: AttrView<'_>, fields: AttrView<'_>) -> BTreeMap<String, String> {
        self(tags, fields)
    }
}

/// One template per language with `{tag:KEY}` and `{field:KEY}` placeholders.
/// Other braces are kept as written.
#[derive(Debug, Clone, Default)]
pub struct TemplateText {
    templates: BTreeMap<String, String>,
}

impl TemplateText {
    pub fn new(templates: BTreeMap<String, String>) -> Self {
        Self { templates }
    }
}

impl TextPolicy for TemplateText {
    fn describe(&self, tags: AttrView<'_>, fields: AttrView<'_>) -> BTreeMap<String, String> {
        self.templates
            .iter()
            .map(|(lang, template)| {
                let rendered = render_template(template, |key| {
                    if let Some(tag) = key.strip_prefix("tag:") {
                        Some(tags.get(tag).to_string())
                    } else if let Some(field) = key.strip_prefix("field:") {
                        Some(fields.get(field).to_string())
                    } else {
                        Some(format!("{{{key}}}"))
                    }
                });
                // The lookup above never declines a placeholder.
                (lang.clone(), rendered.unwrap_or_else(|_| template.clone()))
            })
            .collect()
    }
}

/// Replace every `{key}` with `lookup(key)`.
///
/// Returns the first key the lookup declined. An unterminated `{` is copied
/// verbatim.
pub fn render_template<F>(template: &str, mut lookup: F) -> Result<String, String>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match lookup(key) {
                    Some(value) => out.push_str(&value),
                    None => return Err(key.to_string()),
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}
