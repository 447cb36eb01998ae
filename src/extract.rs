//! Tag extraction — delimited `<name>value</name>` blocks in response text
//! become structured auxiliary output fields.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Reserved namespace prefix for tag-extracted output fields.
///
/// Input records must not contain keys in this family when tag extraction is
/// enabled; the pre-flight check fails the run otherwise.
pub const TAG_PREFIX: &str = "tag:";

/// Opening tag: `<name>` where `name` is a plain identifier.
static OPEN_TAG: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"<([A-Za-z_][A-Za-z0-9_]*)>").expect("open-tag pattern is valid")
});

/// Value of one extracted field: a single occurrence stays a string, repeated
/// occurrences become an ordered list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TagValue {
    /// The field name appeared exactly once
    Single(String),
    /// The field name appeared more than once; occurrences in text order
    Many(Vec<String>),
}

impl From<TagValue> for Value {
    fn from(tag: TagValue) -> Self {
        match tag {
            TagValue::Single(s) => Value::String(s),
            TagValue::Many(items) => Value::Array(items.into_iter().map(Value::String).collect()),
        }
    }
}

/// Extract all complete `<name>value</name>` blocks from `text`.
///
/// Returns a mapping from `tag:<name>` to the extracted value(s), keyed in
/// order of each name's first occurrence. Blocks are non-nested: after a
/// complete block, scanning resumes past its closing tag. An opening tag with
/// no matching close is literal text and contributes nothing. This function
/// never fails; unmatched input yields an empty map.
pub fn extract_tags(text: &str) -> Map<String, Value> {
    let mut occurrences: Vec<(String, Vec<String>)> = Vec::new();
    let mut pos = 0;

    while let Some(caps) = OPEN_TAG.captures_at(text, pos) {
        // Index 0 is the whole match, guaranteed by a successful capture
        let Some(whole) = caps.get(0) else { break };
        let Some(name) = caps.get(1) else { break };

        let close = format!("</{}>", name.as_str());
        let value_start = whole.end();

        match text[value_start..].find(&close) {
            Some(rel) => {
                let value = text[value_start..value_start + rel].to_string();
                match occurrences.iter_mut().find(|(n, _)| n == name.as_str()) {
                    Some((_, values)) => values.push(value),
                    None => occurrences.push((name.as_str().to_string(), vec![value])),
                }
                pos = value_start + rel + close.len();
            }
            // Unterminated block: skip the opening tag and keep scanning
            None => pos = whole.end(),
        }
    }

    occurrences
        .into_iter()
        .map(|(name, mut values)| {
            let tag = if values.len() == 1 {
                TagValue::Single(values.remove(0))
            } else {
                TagValue::Many(values)
            };
            (format!("{TAG_PREFIX}{name}"), Value::from(tag))
        })
        .collect()
}

/// Find the first key of `fields` inside the reserved `tag:` namespace.
///
/// Used by the pre-flight validation; any hit fails the run before a single
/// provider request is issued.
pub fn find_reserved_key(fields: &Map<String, Value>) -> Option<&str> {
    fields
        .keys()
        .map(String::as_str)
        .find(|key| key.starts_with(TAG_PREFIX))
}
