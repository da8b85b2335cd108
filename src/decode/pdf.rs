//! AcroForm field extraction for PDF documents.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};

use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::types::{FieldMap, FormDocument};

use super::{DecodeResult, FieldDecoder};

/// Nesting limit for the field tree and for reference chains.
const MAX_FIELD_DEPTH: usize = 32;

/// Reads interactive form fields (`/AcroForm /Fields`) from a PDF.
///
/// Field names are fully qualified (`parent.child`); values come from `/V`:
/// - text strings are decoded from UTF-16BE, UTF-8 or PDFDocEncoding
/// - names (checkbox / radio states) are rendered without the leading slash
/// - arrays (multi-select lists) are joined with `", "`
/// - a field without a value maps to the empty string
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfFormDecoder;

impl PdfFormDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl FieldDecoder for PdfFormDecoder {
    fn decode_document(&self, document: &FormDocument) -> DecodeResult {
        // The parser is third-party code; a panic on a malformed file is one more unreadable document.
        let parsed = panic::catch_unwind(AssertUnwindSafe(|| extract_form_fields(&document.bytes)));
        match parsed {
            Ok(Ok(fields)) => {
                debug!(
                    path = %document.path.display(),
                    fields = fields.len(),
                    "decoded form fields"
                );
                DecodeResult::from_fields(fields)
            }
            Ok(Err(err)) => DecodeResult::Unreadable(err),
            Err(_) => DecodeResult::Unreadable(PipelineError::Decode {
                message: "pdf parser panicked".to_string(),
            }),
        }
    }
}

/// Extract every terminal form field of the PDF in `bytes`, in document order.
///
/// A PDF without an `/AcroForm` yields an empty map.
pub fn extract_form_fields(bytes: &[u8]) -> PipelineResult<FieldMap> {
    let doc = Document::load_mem(bytes)?;
    let root = resolve(&doc, doc.trailer.get(b"Root")?)?.as_dict()?;

    let mut out = FieldMap::new();
    let Ok(acroform) = root.get(b"AcroForm") else {
        return Ok(out);
    };
    let acroform = resolve(&doc, acroform)?.as_dict()?;
    let Ok(fields) = acroform.get(b"Fields") else {
        return Ok(out);
    };

    let mut visited = HashSet::new();
    for field in resolve(&doc, fields)?.as_array()? {
        collect_field(&doc, field, None, None, 0, &mut visited, &mut out)?;
    }
    Ok(out)
}

fn collect_field<'a>(
    doc: &'a Document,
    object: &'a Object,
    parent_name: Option<&str>,
    inherited_value: Option<&'a Object>,
    depth: usize,
    visited: &mut HashSet<ObjectId>,
    out: &mut FieldMap,
) -> PipelineResult<()> {
    if depth > MAX_FIELD_DEPTH {
        return Err(PipelineError::Decode {
            message: format!("form field tree deeper than {MAX_FIELD_DEPTH} levels"),
        });
    }
    if let Object::Reference(id) = object {
        if !visited.insert(*id) {
            return Ok(());
        }
    }
    let Ok(dict) = resolve(doc, object)?.as_dict() else {
        return Ok(());
    };

    let partial = dict.get(b"T").ok().map(|t| object_to_text(doc, t));
    let name = match (parent_name, partial) {
        (Some(parent), Some(partial)) => Some(format!("{parent}.{partial}")),
        (None, Some(partial)) => Some(partial),
        (parent, None) => parent.map(str::to_string),
    };
    let value = dict.get(b"V").ok().or(inherited_value);

    let child_fields = child_fields(doc, dict)?;
    if !child_fields.is_empty() {
        for kid in child_fields {
            collect_field(doc, kid, name.as_deref(), value, depth + 1, visited, out)?;
        }
        return Ok(());
    }

    if let Some(name) = name {
        let value = value.map(|v| object_to_text(doc, v)).unwrap_or_default();
        out.insert(name, value);
    }
    Ok(())
}

/// Kids that are fields themselves; widget-only kids (no `/T`) belong to their parent.
fn child_fields<'a>(doc: &'a Document, dict: &'a Dictionary) -> PipelineResult<Vec<&'a Object>> {
    let Ok(kids) = dict.get(b"Kids") else {
        return Ok(Vec::new());
    };
    let Ok(kids) = resolve(doc, kids)?.as_array() else {
        return Ok(Vec::new());
    };

    let mut out = Vec::new();
    for kid in kids {
        let is_field = resolve(doc, kid)?
            .as_dict()
            .map(|d| d.has(b"T"))
            .unwrap_or(false);
        if is_field {
            out.push(kid);
        }
    }
    Ok(out)
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> PipelineResult<&'a Object> {
    let mut current = object;
    for _ in 0..MAX_FIELD_DEPTH {
        match current {
            Object::Reference(id) => current = doc.get_object(*id)?,
            other => return Ok(other),
        }
    }
    Err(PipelineError::Decode {
        message: "reference chain too long".to_string(),
    })
}

fn object_to_text(doc: &Document, object: &Object) -> String {
    let Ok(object) = resolve(doc, object) else {
        return String::new();
    };
    match object {
        Object::String(bytes, _) => decode_text_string(bytes),
        Object::Name(name) => String::from_utf8_lossy(name).into_owned(),
        Object::Integer(i) => i.to_string(),
        Object::Real(r) => r.to_string(),
        Object::Boolean(b) => b.to_string(),
        Object::Array(items) => items
            .iter()
            .map(|item| object_to_text(doc, item))
            .collect::<Vec<_>>()
            .join(", "),
        _ => String::new(),
    }
}

/// Decode a PDF text string (UTF-16BE or UTF-8 with BOM, otherwise PDFDocEncoding).
fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    // PDFDocEncoding matches Latin-1 for every printable character forms use in practice.
    bytes.iter().map(|&b| b as char).collect()
}
