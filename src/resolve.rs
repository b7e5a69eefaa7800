//! Answer resolvers, one per instruction kind.

use crate::pdf::{DocumentParser, Table};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::{debug, warn};

// ========================= Secret =========================

static SECRET_KV_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)["']secret["']\s*:\s*["']([^"']+)["']"#).expect("valid regex")
});
static SECRET_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)secret[^A-Za-z0-9]*([A-Za-z0-9_\-]{3,})").expect("valid regex"));
static QUOTED_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["']([A-Za-z0-9_\-]{3,})["']"#).expect("valid regex"));
static BARE_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Za-z0-9]{4,})\b").expect("valid regex"));

/// Find the secret on a scraped page. Patterns are tried in order, first hit wins:
/// a `"secret": "..."` pair, the word "secret" followed by a token, any quoted
/// token of 3+ characters, any bare alphanumeric token of 4+ characters.
pub fn extract_secret(text: &str) -> Option<String> {
    [&*SECRET_KV_RE, &*SECRET_WORD_RE, &*QUOTED_TOKEN_RE, &*BARE_TOKEN_RE]
        .into_iter()
        .find_map(|re| re.captures(text))
        .map(|caps| caps[1].trim().to_string())
}

// ========================= JSON literal =========================

static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("valid regex"));

/// Parse the literal from a POST-JSON instruction. One retry with trailing commas
/// removed; anything still unparseable (or not an object) becomes `{}`.
pub fn parse_json_literal(raw: &str) -> Map<String, Value> {
    let parsed = serde_json::from_str::<Value>(raw).or_else(|_| {
        let cleaned = TRAILING_COMMA_RE.replace_all(raw, "$1");
        serde_json::from_str::<Value>(&cleaned)
    });
    match parsed {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(kind = %json_kind(&other), "JSON literal is not an object, using {{}}");
            Map::new()
        }
        Err(e) => {
            if !raw.trim().is_empty() {
                warn!(error = %e, "JSON literal unparseable, using {{}}");
            }
            Map::new()
        }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ========================= Numeric =========================

static SUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)sum[^\d\n]*([0-9,]+(?:\.[0-9]+)?)").expect("valid regex"));
static FIRST_INT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]{2,}[0-9,]*)").expect("valid regex"));

/// A number after the word "sum", else the first integer with two or more digits.
pub fn numeric_from_text(text: &str) -> Option<f64> {
    [&*SUM_RE, &*FIRST_INT_RE]
        .into_iter()
        .filter_map(|re| re.captures(text))
        .find_map(|caps| caps[1].replace(',', "").parse::<f64>().ok())
}

// ========================= PDF =========================

/// Sum the "value" column of a table (the last column if no header mentions it).
/// Cells that don't parse as numbers after stripping are skipped.
pub fn sum_value_column(table: &Table) -> Option<f64> {
    let (header, rows) = table.split_first()?;
    let headers: Vec<String> = header
        .iter()
        .map(|c| c.as_deref().unwrap_or("").trim().to_lowercase())
        .collect();
    let col = headers
        .iter()
        .position(|h| h.contains("value"))
        .or_else(|| headers.len().checked_sub(1))?;

    let sum = rows
        .iter()
        .filter_map(|row| row.get(col).cloned().flatten())
        .filter_map(|cell| {
            let cleaned: String = cell
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned.parse::<f64>().ok()
        })
        .sum();
    Some(sum)
}

/// Second page if there is one, else the first; first table on it; its value column.
pub fn pdf_sum(parser: &dyn DocumentParser, bytes: &[u8]) -> Option<f64> {
    let pages = match parser.page_tables(bytes) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "PDF parsing failed");
            return None;
        }
    };
    let page = pages.get(1).or_else(|| pages.first())?;
    let table = page.first()?;
    debug!(rows = table.len(), "summing PDF table");
    sum_value_column(table)
}
