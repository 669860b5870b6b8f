//! Record → human-readable text.
//!
//! Two shapes are handled:
//!
//! - **Records** (flat table rows): every non-excluded scalar field becomes a
//!   `"name: value"` entry followed by a blank line, in document order.
//! - **Page blocks** (database pages): the plain text of every `paragraph`
//!   block, spans concatenated, one paragraph per line.

use serde_json::{Map, Number, Value};
use std::collections::HashSet;

use crate::error::{CycleError, CycleResult};
use crate::sampler::PageRef;

/// Shown instead of an empty report.
pub const NO_CONTENT_PLACEHOLDER: &str = "no content available";
/// Shown when the entry carries no creation date.
pub const UNKNOWN_DATE_PLACEHOLDER: &str = "unknown date";

const DATE_LEN: usize = 10;

/// Field names left out of the report. Matching is exact and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionSet {
    names: HashSet<String>,
}

impl ExclusionSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

impl Default for ExclusionSet {
    fn default() -> Self {
        Self::new(["Created"])
    }
}

/// The two fixed tokens booleans are rendered as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BooleanTokens {
    pub yes: String,
    pub no: String,
}

impl Default for BooleanTokens {
    fn default() -> Self {
        Self {
            yes: "yes".to_string(),
            no: "no".to_string(),
        }
    }
}

/// Formatted text plus the creation date shown alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedReport {
    pub body: String,
    pub created: String,
}

impl ExtractedReport {
    /// Build a report, substituting placeholders for missing pieces.
    pub fn new(body: String, created: Option<String>) -> Self {
        let body = if body.is_empty() {
            tracing::warn!("entry has no text content");
            NO_CONTENT_PLACEHOLDER.to_string()
        } else {
            tracing::debug!(chars = body.chars().count(), preview = %preview(&body, 200), "text extracted");
            body
        };
        Self {
            body,
            created: created.unwrap_or_else(|| UNKNOWN_DATE_PLACEHOLDER.to_string()),
        }
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Render the scalar fields of a record as `"name: value\n\n"` entries.
///
/// Arrays, objects and nulls are skipped, as are fields whose text is empty.
pub fn extract_text(record: &Map<String, Value>, excluded: &ExclusionSet, tokens: &BooleanTokens) -> String {
    let mut out = String::new();
    for (name, value) in record {
        if excluded.contains(name) {
            continue;
        }
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => decimal_text(n),
            Value::Bool(true) => tokens.yes.clone(),
            Value::Bool(false) => tokens.no.clone(),
            Value::Null | Value::Array(_) | Value::Object(_) => continue,
        };
        if text.is_empty() {
            continue;
        }
        out.push_str(name);
        out.push_str(": ");
        out.push_str(&text);
        out.push_str("\n\n");
    }
    out
}

/// Integers as-is; floats in plain positional notation, never with an
/// exponent (`1e300` prints all its digits, `1.5e-7` as `0.00000015`).
fn decimal_text(n: &Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() => f.to_string(),
        _ => n.to_string(),
    }
}

/// First ten characters of a date-like string; shorter input passes through.
pub fn truncate_date(raw: &str) -> String {
    match raw.char_indices().nth(DATE_LEN) {
        Some((cut, _)) => raw[..cut].to_string(),
        None => raw.to_string(),
    }
}

/// Creation date of a record, if `field` holds a string.
pub fn record_date(record: &Map<String, Value>, field: &str) -> Option<String> {
    record.get(field).and_then(Value::as_str).map(truncate_date)
}

/// Report for a database page: its paragraph text and truncated creation
/// time.
pub fn page_report(page: &PageRef, text: String) -> ExtractedReport {
    ExtractedReport::new(text, page.created_time.as_deref().map(truncate_date))
}

/// Concatenate the plain text of all paragraph blocks of a block listing.
///
/// Each paragraph's spans are joined in order and followed by one newline.
/// Non-paragraph blocks are ignored.
pub fn extract_paragraphs(listing: &Value) -> CycleResult<String> {
    let blocks = listing
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| CycleError::Shape("block listing has no results array".to_string()))?;
    tracing::debug!(blocks = blocks.len(), "page blocks received");

    let mut out = String::new();
    for block in blocks {
        if block.get("type").and_then(Value::as_str) != Some("paragraph") {
            continue;
        }
        let spans = block
            .get("paragraph")
            .and_then(|p| p.get("rich_text"))
            .and_then(Value::as_array);
        for span in spans.into_iter().flatten() {
            if let Some(text) = span.get("plain_text").and_then(Value::as_str) {
                out.push_str(text);
            }
        }
        out.push('\n');
    }
    Ok(out)
}
