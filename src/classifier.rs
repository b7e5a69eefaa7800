//! Decides which instruction governs a quiz page.
//!
//! Matchers run top to bottom and the first hit wins:
//!
//! 1. `Scrape <path>` in the visible text
//! 2. `POST this JSON to <url>` in the visible text, plus the brace-balanced literal after it
//! 3. an anchor to a `.pdf` file in the HTML
//! 4. otherwise the numeric fallback, which answers straight from the page text
//!
//! [`classify`] is pure: the same page always yields the same [`InstructionMatch`].

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstructionMatch {
    ScrapeRedirect { path: String },
    PostJsonLiteral { submit_url: String, json_text: String },
    PdfFallback { pdf_link: String },
    NumericFallback,
    /// Nothing recognisable on the page at all.
    None,
}

impl InstructionMatch {
    pub fn kind(&self) -> &'static str {
        match self {
            InstructionMatch::ScrapeRedirect { .. } => "scrape",
            InstructionMatch::PostJsonLiteral { .. } => "post_json",
            InstructionMatch::PdfFallback { .. } => "pdf",
            InstructionMatch::NumericFallback => "numeric",
            InstructionMatch::None => "none",
        }
    }
}

static SCRAPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bScrape\s+([^\s(]+)").expect("valid scrape regex"));
static POST_JSON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)POST\s+this\s+JSON\s+to\s+(https?://\S+)").expect("valid post regex")
});
static PDF_HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)href=["']([^"']+\.pdf)["']"#).expect("valid pdf regex")
});
static SUBMIT_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://[\w.:/\-?=&%]+/submit[\w/\-?=&%]*").expect("valid submit regex")
});
static ANY_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[\w.:/\-?=&%]+").expect("valid url regex"));

pub fn classify(text: &str, html: &str, base_url: &str) -> InstructionMatch {
    let matchers: [fn(&str, &str, &str) -> Option<InstructionMatch>; 4] =
        [match_scrape, match_post_json, match_pdf, match_numeric];
    matchers
        .iter()
        .find_map(|m| m(text, html, base_url))
        .unwrap_or(InstructionMatch::None)
}

fn match_scrape(text: &str, _html: &str, _base: &str) -> Option<InstructionMatch> {
    let caps = SCRAPE_RE.captures(text)?;
    Some(InstructionMatch::ScrapeRedirect { path: caps[1].trim().to_string() })
}

fn match_post_json(text: &str, _html: &str, _base: &str) -> Option<InstructionMatch> {
    let caps = POST_JSON_RE.captures(text)?;
    let end = caps.get(0).map(|m| m.end()).unwrap_or(text.len());
    Some(InstructionMatch::PostJsonLiteral {
        submit_url: caps[1].trim().to_string(),
        json_text: balanced_object(&text[end..]).unwrap_or_default().to_string(),
    })
}

fn match_pdf(_text: &str, html: &str, base: &str) -> Option<InstructionMatch> {
    let caps = PDF_HREF_RE.captures(html)?;
    Some(InstructionMatch::PdfFallback { pdf_link: resolve(base, &caps[1]) })
}

fn match_numeric(text: &str, _html: &str, _base: &str) -> Option<InstructionMatch> {
    (!text.trim().is_empty()).then_some(InstructionMatch::NumericFallback)
}

/// Slice from the first `{` up to the brace that brings the depth back to zero.
pub fn balanced_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0usize;
    for (i, ch) in s[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// First absolute URL in the page that looks like a submit endpoint, else the first absolute URL.
pub fn find_submit_url(html: &str) -> Option<String> {
    SUBMIT_URL_RE
        .find(html)
        .or_else(|| ANY_URL_RE.find(html))
        .map(|m| m.as_str().to_string())
}

/// Resolve `link` against `base`; falls back to `link` untouched if `base` is unusable.
pub fn resolve(base: &str, link: &str) -> String {
    Url::parse(base)
        .and_then(|b| b.join(link))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| link.to_string())
}
