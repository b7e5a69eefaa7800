use anyhow::{Context, Result};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId};
use regex::Regex;
use std::cmp::Ordering;
use std::sync::LazyLock;
use tracing::{debug, warn};

pub type Row = Vec<Option<String>>;
/// Header row first, then data rows.
pub type Table = Vec<Row>;

/// Document-parsing capability: the tables on each page, in page order.
pub trait DocumentParser: Send + Sync {
    fn page_tables(&self, bytes: &[u8]) -> Result<Vec<Vec<Table>>>;
}

/// Rebuilds tables from where lopdf says each string is drawn on the page.
/// Pages whose content stream can't be decoded fall back to plain extracted text.
#[derive(Clone, Copy, Debug, Default)]
pub struct LopdfParser;

impl DocumentParser for LopdfParser {
    fn page_tables(&self, bytes: &[u8]) -> Result<Vec<Vec<Table>>> {
        let doc = Document::load_mem(bytes).context("failed to load PDF")?;
        let pages = doc
            .get_pages()
            .into_iter()
            .map(|(page_no, page_id)| match positioned_rows(&doc, page_id) {
                Ok(rows) => {
                    debug!(page_no, rows = rows.len(), "laid out PDF page");
                    tables_from_rows(rows)
                }
                Err(e) => {
                    warn!(page_no, error = %e, "undecodable page content, using extracted text");
                    match doc.extract_text(&[page_no]) {
                        Ok(text) => tables_from_text(&text),
                        Err(e) => {
                            warn!(page_no, error = %e, "no text on PDF page");
                            Vec::new()
                        }
                    }
                }
            })
            .collect();
        Ok(pages)
    }
}

// ========================= Layout =========================

/// Strings closer than this vertically share a row.
const ROW_TOLERANCE: f32 = 2.0;
/// A `TJ` gap wider than this (thousandths of an em) separates cells.
const TJ_CELL_GAP: f32 = 250.0;

const IDENTITY: [f32; 6] = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// Text drawn at one origin on the page.
#[derive(Clone, Debug, PartialEq)]
struct Fragment {
    x: f32,
    y: f32,
    text: String,
}

fn positioned_rows(doc: &Document, page_id: ObjectId) -> Result<Vec<Vec<String>>> {
    let raw = doc.get_page_content(page_id).context("failed to read page content")?;
    let content = Content::decode(&raw).context("failed to decode page content")?;
    Ok(group_rows(fragments(&content.operations)))
}

/// Walk the text operators and record where every shown string starts.
/// Only the text line matrix is tracked; `cm` transforms are ignored.
fn fragments(ops: &[Operation]) -> Vec<Fragment> {
    let mut out: Vec<Fragment> = Vec::new();
    let mut line = IDENTITY;
    let mut leading = 0.0f32;

    for op in ops {
        let nums: Vec<f32> = op.operands.iter().filter_map(|o| o.as_float().ok()).collect();
        match op.operator.as_str() {
            "BT" => line = IDENTITY,
            "Td" if nums.len() == 2 => line = translate(line, nums[0], nums[1]),
            "TD" if nums.len() == 2 => {
                leading = -nums[1];
                line = translate(line, nums[0], nums[1]);
            }
            "Tm" if nums.len() == 6 => line = [nums[0], nums[1], nums[2], nums[3], nums[4], nums[5]],
            "TL" if nums.len() == 1 => leading = nums[0],
            "T*" => line = translate(line, 0.0, -leading),
            "Tj" | "TJ" | "'" | "\"" => {
                if matches!(op.operator.as_str(), "'" | "\"") {
                    line = translate(line, 0.0, -leading);
                }
                let text = shown_text(&op.operands);
                if text.trim().is_empty() {
                    continue;
                }
                let (x, y) = (line[4], line[5]);
                match out.last_mut() {
                    // Several show operators without a move in between continue one string.
                    Some(last) if (last.x - x).abs() < 0.01 && (last.y - y).abs() < 0.01 => {
                        last.text.push_str(&text)
                    }
                    _ => out.push(Fragment { x, y, text }),
                }
            }
            _ => {}
        }
    }
    out
}

/// Pre-multiply a translation into the text line matrix.
fn translate(m: [f32; 6], tx: f32, ty: f32) -> [f32; 6] {
    let [a, b, c, d, e, f] = m;
    [a, b, c, d, tx * a + ty * c + e, tx * b + ty * d + f]
}

fn shown_text(operands: &[Object]) -> String {
    let mut text = String::new();
    for operand in operands {
        match operand {
            Object::String(bytes, _) => text.push_str(&decode_pdf_string(bytes)),
            Object::Array(items) => {
                for item in items {
                    match item {
                        Object::String(bytes, _) => text.push_str(&decode_pdf_string(bytes)),
                        other => {
                            if other.as_float().is_ok_and(|gap| gap < -TJ_CELL_GAP) {
                                text.push_str("  ");
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
    text
}

/// UTF-16BE when it carries a byte-order mark, otherwise one byte per character.
fn decode_pdf_string(bytes: &[u8]) -> String {
    match bytes.strip_prefix(&[0xFE, 0xFF]) {
        Some(utf16) => {
            let units: Vec<u16> = utf16
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        None => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// Top-to-bottom rows, each left-to-right. Strings that themselves contain
/// column gaps are split into several cells.
fn group_rows(mut frags: Vec<Fragment>) -> Vec<Vec<String>> {
    frags.sort_by(|a, b| b.y.partial_cmp(&a.y).unwrap_or(Ordering::Equal));

    let mut rows: Vec<(f32, Vec<Fragment>)> = Vec::new();
    for frag in frags {
        match rows.last_mut() {
            Some((y, row)) if (*y - frag.y).abs() <= ROW_TOLERANCE => row.push(frag),
            _ => rows.push((frag.y, vec![frag])),
        }
    }

    rows.into_iter()
        .map(|(_, mut row)| {
            row.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(Ordering::Equal));
            row.iter().flat_map(|f| split_cells(&f.text)).collect()
        })
        .collect()
}

// ========================= Tables =========================

static CELL_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\t+|\s{2,}").expect("valid cell regex"));

/// Plain-text variant: one row per line, cells separated by tabs or by two or more spaces.
pub fn tables_from_text(text: &str) -> Vec<Table> {
    tables_from_rows(text.lines().map(split_cells).collect())
}

/// Runs of consecutive rows with two or more cells become tables. A row wider
/// than the header starts a new table; narrower rows are padded with empty cells.
pub fn tables_from_rows(rows: Vec<Vec<String>>) -> Vec<Table> {
    let mut tables = Vec::new();
    let mut current: Table = Vec::new();

    for cells in rows {
        if cells.len() < 2 {
            flush(&mut current, &mut tables);
            continue;
        }
        let width = current.first().map(Vec::len);
        if width.is_some_and(|w| cells.len() > w) {
            flush(&mut current, &mut tables);
        }
        let mut row: Row = cells.into_iter().map(Some).collect();
        if let Some(w) = current.first().map(Vec::len) {
            row.resize(w, None);
        }
        current.push(row);
    }
    flush(&mut current, &mut tables);
    tables
}

fn split_cells(line: &str) -> Vec<String> {
    CELL_SPLIT_RE
        .split(line.trim())
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn flush(current: &mut Table, tables: &mut Vec<Table>) {
    if current.len() >= 2 {
        tables.push(std::mem::take(current));
    } else {
        current.clear();
    }
}
