//! Per-page text extraction for uploaded documents (PDF, DOCX, PPTX, plain
//! text).
//!
//! Callers supply bytes + content-type; this module returns plain UTF-8 text
//! split into pages. Page boundaries come from the format where the format has
//! them (PDF form feeds, PPTX slides); otherwise pages are estimated from a
//! fixed characters-per-page ratio so chunk citations still carry a usable
//! page number.

use std::io::Read;

/// MIME types accepted by the upload endpoint.
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TXT: &str = "text/plain";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

pub const ALLOWED_MIME_TYPES: [&str; 4] = [MIME_PDF, MIME_TXT, MIME_DOCX, MIME_PPTX];

/// Characters per page when the format carries no page markers.
const EST_CHARS_PER_PAGE: usize = 3000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb
/// protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extraction failure. Never panics; the ingest pipeline records the error on
/// the document and transitions it to `failed`.
#[derive(Debug)]
pub enum ExtractError {
    UnsupportedContentType(String),
    Pdf(String),
    Ooxml(String),
    Encoding(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedContentType(ct) => {
                write!(f, "unsupported content-type: {}", ct)
            }
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Ooxml(e) => write!(f, "OOXML extraction failed: {}", e),
            ExtractError::Encoding(e) => write!(f, "text decoding failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extracts text from uploaded bytes, one string per page. Pages are 1-based
/// from the caller's perspective (index 0 is page 1). Always returns at least
/// one page for valid input.
pub fn extract_pages(bytes: &[u8], content_type: &str) -> Result<Vec<String>, ExtractError> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_TXT => extract_plain(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_PPTX => extract_pptx(bytes),
        _ => Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let text =
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;

    // pdf-extract emits a form feed between pages. Some producers yield none;
    // fall back to estimated pages so citations still have a page number.
    if text.contains('\u{c}') {
        let pages: Vec<String> = text
            .split('\u{c}')
            .map(|p| p.trim().to_string())
            .collect();
        if pages.iter().any(|p| !p.is_empty()) {
            return Ok(pages);
        }
    }
    Ok(estimate_pages(&text))
}

fn extract_plain(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ExtractError::Encoding(e.to_string()))?
        .to_string();
    Ok(estimate_pages(&text))
}

/// Split unpaged text into estimated pages at paragraph boundaries near the
/// chars-per-page target.
fn estimate_pages(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.len() <= EST_CHARS_PER_PAGE {
        return vec![trimmed.to_string()];
    }

    let mut pages = Vec::new();
    let mut current = String::new();
    for para in trimmed.split("\n\n") {
        if !current.is_empty() && current.len() + 2 + para.len() > EST_CHARS_PER_PAGE {
            pages.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(para);
        // A single oversized paragraph gets hard-split at char boundaries.
        while current.len() > EST_CHARS_PER_PAGE {
            let mut split_at = EST_CHARS_PER_PAGE;
            while !current.is_char_boundary(split_at) {
                split_at -= 1;
            }
            let rest = current.split_off(split_at);
            pages.push(std::mem::take(&mut current));
            current = rest;
        }
    }
    if !current.is_empty() {
        pages.push(current);
    }
    if pages.is_empty() {
        pages.push(trimmed.to_string());
    }
    pages
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if archive.by_name("word/document.xml").is_err() {
        return Err(ExtractError::Ooxml(
            "word/document.xml not found".to_string(),
        ));
    }
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    let text = extract_text_elements(&doc_xml)?;
    Ok(estimate_pages(&text))
}

/// One slide per page, in slide order.
fn extract_pptx(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    if slide_names.is_empty() {
        return Err(ExtractError::Ooxml("no slides found".to_string()));
    }
    let mut pages = Vec::with_capacity(slide_names.len());
    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        pages.push(extract_text_elements(&xml)?);
    }
    Ok(pages)
}

/// Collect the contents of `<w:t>` / `<a:t>` text runs.
fn extract_text_elements(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        if !out.is_empty() {
                            out.push(' ');
                        }
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
