use crate::document::{Metadata, RawDocument};
use crate::error::LoadFailure;
use log::{debug, warn};
use lopdf::Document;
use std::fs;
use std::path::Path;

/// Read a PDF as one document per page with text.
///
/// Pages without extractable text are skipped. When no page yields text,
/// the whole file is retried with `pdf_extract` as a single document.
pub(crate) fn read_pdf(path: &Path, metadata: Metadata) -> Result<Vec<RawDocument>, LoadFailure> {
    if fs::metadata(path)?.len() == 0 {
        return Err(LoadFailure::Empty);
    }

    let pdf = Document::load(path).map_err(|e| LoadFailure::Pdf(e.to_string()))?;
    let pages = pdf.get_pages();
    let total_pages = pages.len();

    let mut documents = Vec::new();
    for page_number in pages.keys() {
        let text = match pdf.extract_text(&[*page_number]) {
            Ok(text) => normalize_whitespace(&text),
            Err(e) => {
                debug!("No text on page {} of {}: {}", page_number, path.display(), e);
                continue;
            }
        };
        if text.is_empty() {
            continue;
        }

        documents.push(RawDocument {
            content: text,
            metadata: metadata
                .clone()
                .with("page_number", *page_number)
                .with("total_pages", total_pages),
        });
    }

    if !documents.is_empty() {
        return Ok(documents);
    }

    warn!(
        "No per-page text found in {}, extracting the whole file",
        path.display()
    );
    let content = pdf_extract::extract_text(path)
        .map_err(|e| LoadFailure::Pdf(e.to_string()))
        .map(|text| normalize_whitespace(&text))?;

    if content.is_empty() {
        return Err(LoadFailure::Empty);
    }

    Ok(vec![RawDocument {
        content,
        metadata: metadata.with("total_pages", total_pages),
    }])
}

/// Normalize whitespace in text (remove multiple consecutive spaces, newlines, etc.)
fn normalize_whitespace(text: &str) -> String {
    let result = text.replace('\r', "");

    // Collapse runs of newlines to a single line break or a paragraph break
    let mut prev_char = ' ';
    let mut newline_count = 0;
    let mut normalized = String::with_capacity(result.len());

    for c in result.chars() {
        if c == '\n' {
            newline_count += 1;
        } else {
            if newline_count > 0 {
                if newline_count >= 2 {
                    normalized.push_str("\n\n");
                } else {
                    normalized.push('\n');
                }
                newline_count = 0;
            }

            // Don't add consecutive spaces
            if !(c == ' ' && prev_char == ' ') {
                normalized.push(c);
            }

            prev_char = c;
        }
    }

    normalized.trim().to_string()
}
