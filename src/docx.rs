//! Plain-text extraction from Word (`.docx`) files.
//!
//! A `.docx` file is a zip container; the body lives in `word/document.xml`.
//! Only run text, tabs and breaks are kept. Paragraphs are separated by a
//! blank line so the chunker can prefer paragraph boundaries.

use crate::document::{Metadata, RawDocument};
use crate::error::LoadFailure;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use zip::ZipArchive;

const BODY_PART: &str = "word/document.xml";

pub(crate) fn read_docx(path: &Path, metadata: Metadata) -> Result<Vec<RawDocument>, LoadFailure> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Err(LoadFailure::Empty);
    }

    let content = extract_docx_text(file)?;
    if content.trim().is_empty() {
        return Err(LoadFailure::Empty);
    }

    Ok(vec![RawDocument { content, metadata }])
}

/// Read the body part of a Word container and flatten it to text.
pub fn extract_docx_text<R: Read + Seek>(reader: R) -> Result<String, LoadFailure> {
    let mut archive = ZipArchive::new(reader)?;
    let mut part = archive.by_name(BODY_PART).map_err(|e| match e {
        zip::result::ZipError::FileNotFound => {
            LoadFailure::Docx(format!("missing {}", BODY_PART))
        }
        other => LoadFailure::Archive(other),
    })?;

    let mut xml = String::new();
    part.read_to_string(&mut xml)?;
    Ok(document_xml_to_text(&xml))
}

/// Walk WordprocessingML tags and collect the visible text.
fn document_xml_to_text(xml: &str) -> String {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut rest = xml;

    while let Some(open) = rest.find('<') {
        if in_text {
            current.push_str(&decode_entities(&rest[..open]));
        }

        let Some(close) = rest[open..].find('>') else {
            break;
        };
        let tag = &rest[open + 1..open + close];
        rest = &rest[open + close + 1..];

        let self_closing = tag.ends_with('/');
        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or("");

        match name {
            "w:t" if tag.starts_with('/') => in_text = false,
            "w:t" => in_text = !self_closing,
            "w:tab" => current.push('\t'),
            "w:br" | "w:cr" => current.push('\n'),
            "w:p" if tag.starts_with('/') || self_closing => {
                paragraphs.push(std::mem::take(&mut current));
            }
            _ => {}
        }
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }

    paragraphs
        .into_iter()
        .filter(|p| !p.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';') else {
            out.push_str(tail);
            return out;
        };

        let entity = &tail[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };

        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
