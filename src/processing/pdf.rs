//! PDF adapter (spec.md §4.2): extracts per-page text and injects markdown
//! header markers from font-size/weight metadata.
//!
//! spec.md §1 treats PDF parsing as an opaque `extract_pages(bytes) ->
//! ordered map<page_no, text>` capability, but §4.2 requires span-level font
//! metadata to drive header injection — so the capability is widened here to
//! carry per-span `(text, font_size, bold)` triples. Grounded in the
//! teacher's `lopdf_parser.rs`: same `Document::load_mem` + `Contents` +
//! `Stream::decode_content` + manual `Tj`/`TJ`/`ET` walk, extended to also
//! track `Tf` (font selection) so spans carry size and weight. Exact layout
//! parity with a PDF-native renderer (PyMuPDF, in the reference
//! implementation) is not required — this is best-effort span
//! reconstruction over content-stream operators.

use std::collections::{BTreeMap, HashMap};

use lopdf::{Dictionary, Document, Object};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::error::{RetrievalError, Result};

#[derive(Debug, Clone)]
struct Span {
    text: String,
    font_size: f32,
    bold: bool,
}

static HYPHEN_BREAK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\w)-\n(\w)").unwrap());
static MANY_NEWLINES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());
static MANY_SPACES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r" {3,}").unwrap());
static TF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/(\S+)\s+([\d.]+)\s+Tf").unwrap());

/// Extracts page text from PDF bytes, 1-based page numbers, with header
/// markers injected from font metadata. Pages whose trimmed text is empty
/// are dropped. Fails with `RetrievalError::Extraction` when the byte
/// stream cannot be opened or parsed.
pub fn extract_pages(bytes: &[u8]) -> Result<BTreeMap<usize, String>> {
    let doc = Document::load_mem(bytes)
        .map_err(|e| RetrievalError::extraction(format!("failed to open PDF: {e}")))?;

    let mut pages = BTreeMap::new();
    let page_ids: Vec<(u32, u16)> = doc.get_pages().values().cloned().collect();

    for (i, &page_id) in page_ids.iter().enumerate() {
        let page_number = i + 1;
        let spans = match extract_spans(&doc, page_id) {
            Ok(spans) => spans,
            Err(e) => {
                warn!(page_number, error = %e, "page extraction failed, skipping");
                continue;
            }
        };

        let mut text = spans.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join(" ");

        for header in headers_from_spans(&spans) {
            let level = if header.font_size > 16.0 { "##" } else { "###" };
            if let Some(pos) = text.find(header.text.as_str()) {
                let replacement = format!("\n{} {}\n", level, header.text);
                text.replace_range(pos..pos + header.text.len(), &replacement);
            }
        }

        text = MANY_NEWLINES_RE.replace_all(&text, "\n\n\n").to_string();
        text = MANY_SPACES_RE.replace_all(&text, "  ").to_string();
        text = HYPHEN_BREAK_RE.replace_all(&text, "$1$2").to_string();

        let trimmed = text.trim();
        if !trimmed.is_empty() {
            pages.insert(page_number, trimmed.to_string());
        }
    }

    Ok(pages)
}

fn headers_from_spans(spans: &[Span]) -> Vec<&Span> {
    spans
        .iter()
        .filter(|s| {
            let qualifies = s.font_size > 14.0 || (s.font_size > 12.0 && s.bold);
            qualifies && s.text.trim().chars().count() >= 3
        })
        .collect()
}

fn extract_spans(doc: &Document, page_id: (u32, u16)) -> Result<Vec<Span>> {
    let page = doc
        .get_object(page_id)
        .map_err(|e| RetrievalError::extraction(format!("failed to read page object: {e}")))?;
    let page_dict = page
        .as_dict()
        .map_err(|e| RetrievalError::extraction(format!("page is not a dict: {e}")))?;

    let fonts = page_fonts(doc, page_dict);

    let content_text = match page_dict.get(b"Contents") {
        Ok(contents) => content_stream_text(doc, contents)?,
        Err(_) => String::new(),
    };

    Ok(parse_spans(&content_text, &fonts))
}

fn content_stream_text(doc: &Document, contents: &Object) -> Result<String> {
    match contents {
        Object::Reference(id) => {
            let obj = doc
                .get_object(*id)
                .map_err(|e| RetrievalError::extraction(format!("dangling content ref: {e}")))?;
            content_stream_text(doc, &obj)
        }
        Object::Array(items) => {
            let mut text = String::new();
            for item in items {
                text.push_str(&content_stream_text(doc, item)?);
            }
            Ok(text)
        }
        Object::Stream(stream) => {
            let decoded = stream
                .decode_content()
                .map_err(|e| RetrievalError::extraction(format!("content stream decode failed: {e}")))?;
            let bytes = decoded
                .encode()
                .map_err(|e| RetrievalError::extraction(format!("content stream encode failed: {e}")))?;
            Ok(String::from_utf8_lossy(&bytes).to_string())
        }
        _ => Ok(String::new()),
    }
}

/// Resource-name -> bold lookup built from the page's `/Resources/Font` dict.
fn page_fonts(doc: &Document, page_dict: &Dictionary) -> HashMap<String, bool> {
    let mut fonts = HashMap::new();

    let Ok(resources) = page_dict.get(b"Resources") else {
        return fonts;
    };
    let resources = match resources {
        Object::Reference(id) => match doc.get_object(*id) {
            Ok(o) => o.clone(),
            Err(_) => return fonts,
        },
        other => other.clone(),
    };
    let Ok(resources_dict) = resources.as_dict() else {
        return fonts;
    };
    let Ok(font_obj) = resources_dict.get(b"Font") else {
        return fonts;
    };
    let font_obj = match font_obj {
        Object::Reference(id) => match doc.get_object(*id) {
            Ok(o) => o.clone(),
            Err(_) => return fonts,
        },
        other => other.clone(),
    };
    let Ok(font_dict) = font_obj.as_dict() else {
        return fonts;
    };

    for (name, value) in font_dict.iter() {
        let resolved = match value {
            Object::Reference(id) => doc.get_object(*id).ok().cloned(),
            other => Some(other.clone()),
        };
        let Some(resolved) = resolved else { continue };
        let Ok(dict) = resolved.as_dict() else { continue };
        let bold = dict
            .get(b"BaseFont")
            .ok()
            .and_then(|o| o.as_name().ok())
            .map(|n| String::from_utf8_lossy(n).to_lowercase().contains("bold"))
            .unwrap_or(false);
        fonts.insert(String::from_utf8_lossy(name).to_string(), bold);
    }

    fonts
}

/// Walks the decoded content-stream text tracking `Tf` (font + size) and
/// collecting `Tj`/`TJ` runs between `BT`/`ET` markers, mirroring the
/// teacher's `parse_content_stream` line scan.
fn parse_spans(content: &str, fonts: &HashMap<String, bool>) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut current = String::new();
    let mut font_size = 12.0_f32;
    let mut bold = false;

    for line in content.lines() {
        let line = line.trim();

        if let Some(caps) = TF_RE.captures(line) {
            let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            font_size = caps
                .get(2)
                .and_then(|m| m.as_str().parse::<f32>().ok())
                .unwrap_or(12.0);
            bold = fonts.get(name).copied().unwrap_or(false);
            continue;
        }

        if line.ends_with("Tj") {
            if let (Some(start), Some(end)) = (line.find('('), line.rfind(')')) {
                if end > start {
                    current.push_str(&unescape_pdf_string(&line[start + 1..end]));
                    current.push(' ');
                }
            }
        } else if line.ends_with("TJ") {
            if let (Some(start), Some(end)) = (line.find('['), line.rfind(']')) {
                if end > start {
                    let arr = &line[start + 1..end];
                    for part in arr.split(')').filter(|s| !s.is_empty()) {
                        if let Some(ts) = part.rfind('(') {
                            current.push_str(&unescape_pdf_string(&part[ts + 1..]));
                        }
                    }
                    current.push(' ');
                }
            }
        } else if line == "ET" {
            let text = current.trim().to_string();
            if !text.is_empty() {
                spans.push(Span { text, font_size, bold });
            }
            current.clear();
        }
    }

    let tail = current.trim().to_string();
    if !tail.is_empty() {
        spans.push(Span { text: tail, font_size, bold });
    }

    spans
}

fn unescape_pdf_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some('(') => out.push('('),
                Some(')') => out.push(')'),
                Some('\\') => out.push('\\'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_bytes_fail_with_extraction_error() {
        let err = extract_pages(b"not a pdf").unwrap_err();
        assert!(matches!(err, RetrievalError::Extraction(_)));
    }

    #[test]
    fn header_qualification_matches_size_and_weight_rule() {
        let spans = vec![
            Span { text: "Large Heading".into(), font_size: 15.0, bold: false },
            Span { text: "bold but small".into(), font_size: 13.0, bold: true },
            Span { text: "too small".into(), font_size: 12.0, bold: true },
            Span { text: "ab".into(), font_size: 20.0, bold: false },
        ];
        let headers = headers_from_spans(&spans);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].text, "Large Heading");
        assert_eq!(headers[1].text, "bold but small");
    }

    #[test]
    fn parses_tj_runs_between_bt_et() {
        let content = "BT\n/F1 18 Tf\n(Chapter One) Tj\nET\n";
        let fonts = HashMap::new();
        let spans = parse_spans(content, &fonts);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "Chapter One");
        assert_eq!(spans[0].font_size, 18.0);
    }
}
