//! Ordered-strategy field extraction
//!
//! A field is described by a [`FieldSpec`]: a name, a value kind, and the
//! strategies to try in order. The first strategy that yields a value which
//! survives normalization wins; if none does the field is
//! [`Extraction::Missing`]. A miss is a value, not an error, so one missing
//! field never prevents extraction of its siblings.

use crate::extract::normalize::{clean_text, normalize_count, parse_timestamp};
use crate::model::PublishTime;
use crate::url::extract_bvid;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use std::fmt;

const INITIAL_STATE_MARKER: &str = "window.__INITIAL_STATE__";

/// Family of an extraction strategy, in order of preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StrategyKind {
    /// Direct typed lookup (a JSON key, a metadata tag)
    Structured,
    /// Alternate typed lookup seen under other page variants
    Secondary,
    /// Value injected by a page script
    ScriptDerived,
    /// Pattern match on human-readable text
    DisplayText,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        Self::Structured,
        Self::Secondary,
        Self::ScriptDerived,
        Self::DisplayText,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Secondary => "secondary",
            Self::ScriptDerived => "script",
            Self::DisplayText => "display-text",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a strategy looks for its raw value
#[derive(Debug, Clone, Copy)]
pub enum Locator {
    /// JSON pointer into a structured payload
    Pointer(&'static str),
    /// Attribute of the first element matching the selector
    Attr {
        selector: &'static str,
        attr: &'static str,
    },
    /// Text content of the first element matching the selector
    Text(&'static str),
    /// JSON pointer into the page's `window.__INITIAL_STATE__` object
    InitialState(&'static str),
    /// First regex match inside an attribute (or the text) of matching elements
    Pattern {
        selector: &'static str,
        attr: Option<&'static str>,
        pattern: &'static str,
    },
}

/// One way of obtaining a field
#[derive(Debug, Clone, Copy)]
pub struct Strategy {
    pub kind: StrategyKind,
    pub locator: Locator,
    /// Only accept timestamps that carry a time of day
    pub precise_only: bool,
}

impl Strategy {
    pub const fn new(kind: StrategyKind, locator: Locator) -> Self {
        Self {
            kind,
            locator,
            precise_only: false,
        }
    }

    pub const fn precise(mut self) -> Self {
        self.precise_only = true;
        self
    }
}

/// How raw values of a field are normalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Non-negative integer, magnitude suffixes expanded
    Count,
    /// Publish or creation time
    Timestamp,
    /// Free text, whitespace collapsed
    Text,
    /// A BV identifier found anywhere in the raw value
    BvId,
}

/// A named field with its ordered strategies
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub strategies: &'static [Strategy],
}

/// A normalized field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Count(u64),
    Time(PublishTime),
    Text(String),
}

/// Result of extracting one field
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Found { value: FieldValue, via: StrategyKind },
    Missing,
}

impl Extraction {
    pub fn value(&self) -> Option<&FieldValue> {
        match self {
            Self::Found { value, .. } => Some(value),
            Self::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

/// A raw response prepared for extraction
pub struct Source<'a> {
    json: Option<&'a Value>,
    html: Option<&'a Html>,
    initial_state: Option<Value>,
}

impl<'a> Source<'a> {
    /// Wraps a decoded JSON payload
    pub fn json(value: &'a Value) -> Self {
        Self {
            json: Some(value),
            html: None,
            initial_state: None,
        }
    }

    /// Wraps a parsed HTML document or fragment
    ///
    /// The page's `__INITIAL_STATE__` object is decoded once up front when
    /// present.
    pub fn html(document: &'a Html) -> Self {
        Self {
            json: None,
            html: Some(document),
            initial_state: initial_state(document),
        }
    }

    pub fn has_initial_state(&self) -> bool {
        self.initial_state.is_some()
    }
}

/// Decodes `window.__INITIAL_STATE__ = {...};(function(){...})()` from scripts
fn initial_state(document: &Html) -> Option<Value> {
    let selector = Selector::parse("script").ok()?;
    document.select(&selector).find_map(|script| {
        let text = script.text().collect::<String>();
        let start = text.find(INITIAL_STATE_MARKER)?;
        let rest = &text[start + INITIAL_STATE_MARKER.len()..];
        let rest = rest.trim_start().strip_prefix('=')?;
        // the object is followed by more script; take only the first value
        serde_json::Deserializer::from_str(rest)
            .into_iter::<Value>()
            .next()?
            .ok()
    })
}

/// Raw value produced by a locator, before normalization
enum Raw<'v> {
    Json(&'v Value),
    Text(String),
}

fn locate<'s>(locator: &Locator, source: &'s Source<'_>) -> Option<Raw<'s>> {
    match *locator {
        Locator::Pointer(pointer) => source
            .json?
            .pointer(pointer)
            .filter(|v| !v.is_null())
            .map(Raw::Json),
        Locator::InitialState(pointer) => source
            .initial_state
            .as_ref()?
            .pointer(pointer)
            .filter(|v| !v.is_null())
            .map(Raw::Json),
        Locator::Attr { selector, attr } => {
            let selector = Selector::parse(selector).ok()?;
            source
                .html?
                .select(&selector)
                .find_map(|el| el.value().attr(attr))
                .map(|v| Raw::Text(v.to_string()))
        }
        Locator::Text(selector) => {
            let selector = Selector::parse(selector).ok()?;
            source
                .html?
                .select(&selector)
                .map(|el| el.text().collect::<String>())
                .find(|t| !t.trim().is_empty())
                .map(Raw::Text)
        }
        Locator::Pattern {
            selector,
            attr,
            pattern,
        } => {
            let selector = Selector::parse(selector).ok()?;
            let regex = Regex::new(pattern).ok()?;
            source.html?.select(&selector).find_map(|el| {
                let haystack = match attr {
                    Some(attr) => el.value().attr(attr)?.to_string(),
                    None => el.text().collect::<String>(),
                };
                regex.find(&haystack).map(|m| Raw::Text(m.as_str().to_string()))
            })
        }
    }
}

fn normalize(raw: Raw<'_>, kind: FieldKind) -> Option<FieldValue> {
    match (kind, raw) {
        (FieldKind::Count, Raw::Json(Value::Number(n))) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(FieldValue::Count),
        (FieldKind::Count, Raw::Json(Value::String(s))) => normalize_count(s).map(FieldValue::Count),
        (FieldKind::Count, Raw::Text(s)) => normalize_count(&s).map(FieldValue::Count),

        (FieldKind::Timestamp, Raw::Json(Value::Number(n))) => n
            .as_i64()
            .filter(|secs| *secs > 0)
            .and_then(PublishTime::from_epoch)
            .map(FieldValue::Time),
        (FieldKind::Timestamp, Raw::Json(Value::String(s))) => {
            parse_timestamp(s).map(FieldValue::Time)
        }
        (FieldKind::Timestamp, Raw::Text(s)) => parse_timestamp(&s).map(FieldValue::Time),

        (FieldKind::Text, Raw::Json(Value::String(s))) => clean_text(s).map(FieldValue::Text),
        (FieldKind::Text, Raw::Json(Value::Number(n))) => Some(FieldValue::Text(n.to_string())),
        (FieldKind::Text, Raw::Text(s)) => clean_text(&s).map(FieldValue::Text),

        (FieldKind::BvId, Raw::Json(Value::String(s))) => extract_bvid(s).map(FieldValue::Text),
        (FieldKind::BvId, Raw::Text(s)) => extract_bvid(&s).map(FieldValue::Text),

        _ => None,
    }
}

/// Extracts one field, trying its strategies in order
pub fn extract(field: &FieldSpec, source: &Source<'_>) -> Extraction {
    for (position, strategy) in field.strategies.iter().enumerate() {
        let Some(value) = locate(&strategy.locator, source).and_then(|raw| normalize(raw, field.kind))
        else {
            continue;
        };
        if strategy.precise_only {
            if let FieldValue::Time(t) = &value {
                if !t.is_precise() {
                    continue;
                }
            }
        }
        if position > 0 {
            tracing::trace!("Field {} satisfied by fallback {}", field.name, strategy.kind);
        }
        return Extraction::Found {
            value,
            via: strategy.kind,
        };
    }
    Extraction::Missing
}

/// Extraction results for a set of fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    fields: Vec<(&'static str, Extraction)>,
}

impl Extracted {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .and_then(|(_, e)| e.value())
    }

    pub fn count(&self, name: &str) -> Option<u64> {
        match self.get(name)? {
            FieldValue::Count(n) => Some(*n),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<String> {
        match self.get(name)? {
            FieldValue::Text(s) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn time(&self, name: &str) -> Option<PublishTime> {
        match self.get(name)? {
            FieldValue::Time(t) => Some(*t),
            _ => None,
        }
    }

    /// Names of the fields no strategy could satisfy
    pub fn missing(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|(_, e)| e.is_missing())
            .map(|(n, _)| *n)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Extraction)> {
        self.fields.iter().map(|(n, e)| (*n, e))
    }
}

/// Extracts every field of `fields` from `source`
pub fn extract_all(fields: &[FieldSpec], source: &Source<'_>) -> Extracted {
    Extracted {
        fields: fields
            .iter()
            .map(|field| (field.name, extract(field, source)))
            .collect(),
    }
}
