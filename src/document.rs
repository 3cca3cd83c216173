// src/document.rs

use crate::payload;
use crate::record::CaptureFields;
use lopdf::{Dictionary, Document, ObjectId};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("could not read document: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported document type: {0}")]
    Unsupported(String),
    #[error("document is scanned / image-only, no text to read")]
    ScannedImage,
    #[error("failed to parse PDF: {0}")]
    Pdf(String),
}

/// What an uploaded factura file yielded.
#[derive(Debug)]
pub enum DocumentContent {
    Text(String),
    /// A photographed or scanned factura: the QR line is only pixels.
    ScannedImage,
    /// The PDF could not be opened at all.
    Error(String),
}

/// A PDF whose text layer has fewer visible characters than a single
/// payload line is handled like a scan.
const MIN_TEXT_CHARS: usize = 30;

/// Share of image-only pages from which a PDF is handled like a scan.
const SCANNED_PAGE_SHARE: f64 = 0.8;

/// Load an uploaded document by extension.
pub fn load_document(path: &Path) -> Result<DocumentContent, DocumentError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "txt" => Ok(DocumentContent::Text(fs::read_to_string(path)?)),
        "pdf" => Ok(extract_text_from_pdf(&fs::read(path)?)),
        _ => Err(DocumentError::Unsupported(path.display().to_string())),
    }
}

pub fn extract_text_from_pdf(pdf_bytes: &[u8]) -> DocumentContent {
    let doc = match Document::load_mem(pdf_bytes) {
        Ok(d) => d,
        Err(e) => return DocumentContent::Error(format!("Failed to parse PDF: {e}")),
    };

    if looks_like_scanned(&doc) {
        info!("Uploaded PDF has no text layer");
        return DocumentContent::ScannedImage;
    }

    match pdf_extract::extract_text_from_mem(pdf_bytes) {
        Ok(text) => {
            let visible = text.chars().filter(|c| !c.is_whitespace()).count();
            if visible < MIN_TEXT_CHARS {
                info!(chars = visible, "PDF text too short to hold a payload");
                DocumentContent::ScannedImage
            } else {
                info!(chars = visible, "PDF text extracted");
                DocumentContent::Text(text)
            }
        }
        Err(e) => {
            warn!(error = %e, "PDF text extraction failed");
            DocumentContent::ScannedImage
        }
    }
}

/// Non-empty sub-dictionary `key` of a page's resources.
fn has_resource(doc: &Document, resources: Option<&Dictionary>, key: &[u8]) -> bool {
    resources
        .and_then(|res| res.get(key).ok())
        .and_then(|x| doc.dereference(x).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok())
        .is_some_and(|d| !d.is_empty())
}

/// Draws images but has no font to draw text with.
fn is_image_only_page(doc: &Document, page_id: ObjectId) -> bool {
    let Ok(page) = doc.get_object(page_id).and_then(|o| o.as_dict()) else {
        return false;
    };
    let resources = page
        .get(b"Resources")
        .ok()
        .and_then(|r| doc.dereference(r).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok());

    has_resource(doc, resources, b"XObject") && !has_resource(doc, resources, b"Font")
}

fn looks_like_scanned(doc: &Document) -> bool {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return false;
    }

    let image_only = pages
        .values()
        .filter(|id| is_image_only_page(doc, **id))
        .count();
    let share = image_only as f64 / pages.len() as f64;
    info!(pages = pages.len(), image_only, "Checked PDF for a text layer");
    share >= SCANNED_PAGE_SHARE
}

/// Pull every QR payload line out of an uploaded document.
pub fn extract_payloads(path: &Path) -> Result<Vec<CaptureFields>, DocumentError> {
    let text = match load_document(path)? {
        DocumentContent::Text(text) => text,
        DocumentContent::ScannedImage => return Err(DocumentError::ScannedImage),
        DocumentContent::Error(e) => return Err(DocumentError::Pdf(e)),
    };

    let lines = payload::find_payload_lines(&text);
    if lines.is_empty() {
        warn!(path = %path.display(), "No QR payload found in document");
    } else {
        info!(path = %path.display(), payloads = lines.len(), "Payloads found in document");
    }
    Ok(lines.iter().map(|l| payload::parse(l)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{Object, Stream, dictionary};

    /// One A4 page drawing `operations` with the resources `resources` adds.
    fn one_page_pdf<F>(resources: F, operations: Vec<Operation>) -> Vec<u8>
    where
        F: FnOnce(&mut Document) -> Dictionary,
    {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let resources = resources(&mut doc);
        let resources_id = doc.add_object(resources);
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_garbage_bytes() {
        let result = extract_text_from_pdf(b"this is not a pdf");
        assert!(matches!(result, DocumentContent::Error(_)));
    }

    #[test]
    fn test_text_pdf_payloads() {
        let line = "20100066603|01|F001|00000001|118.00|2024-03-01|18.00";
        let bytes = one_page_pdf(
            |doc| {
                let font_id = doc.add_object(dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => "Courier",
                    "Encoding" => "WinAnsiEncoding",
                });
                dictionary! { "Font" => dictionary! { "F1" => font_id } }
            },
            vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 8.into()]),
                Operation::new("Td", vec![20.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(line)]),
                Operation::new("ET", vec![]),
            ],
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("factura.pdf");
        fs::write(&path, bytes).unwrap();

        let found = extract_payloads(&path).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get("ruc_emisor"), Some("20100066603"));
        assert_eq!(found[0].get("serie"), Some("F001"));
        assert_eq!(found[0].get("monto_igv"), Some("18.00"));
    }

    #[test]
    fn test_image_only_pdf_is_scanned() {
        let bytes = one_page_pdf(
            |doc| {
                let image = Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Image",
                        "Width" => 1,
                        "Height" => 1,
                        "ColorSpace" => "DeviceGray",
                        "BitsPerComponent" => 8,
                    },
                    vec![0],
                );
                let image_id = doc.add_object(image);
                dictionary! { "XObject" => dictionary! { "Im1" => image_id } }
            },
            vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![595.into(), 0.into(), 0.into(), 842.into(), 0.into(), 0.into()],
                ),
                Operation::new("Do", vec!["Im1".into()]),
                Operation::new("Q", vec![]),
            ],
        );

        assert!(matches!(
            extract_text_from_pdf(&bytes),
            DocumentContent::ScannedImage
        ));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foto.pdf");
        fs::write(&path, bytes).unwrap();
        assert!(matches!(
            extract_payloads(&path),
            Err(DocumentError::ScannedImage)
        ));
    }

    #[test]
    fn test_text_document_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facturas.TXT");
        fs::write(
            &path,
            "Lote de marzo\n20100066603|01|F001|00000001|118.00|2024-03-01\n\
             20600011111|03|B001|00000009|59.00|2024-03-02|9.00\nfin\n",
        )
        .unwrap();

        let found = extract_payloads(&path).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].get("serie"), Some("F001"));
        assert_eq!(found[1].get("monto_igv"), Some("9.00"));
        assert_eq!(found[1].get("codigo_hash"), Some(""));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        fs::write(&path, b"\x89PNG").unwrap();
        assert!(matches!(
            extract_payloads(&path),
            Err(DocumentError::Unsupported(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = extract_payloads(Path::new("/nonexistent/dir/x.txt")).unwrap_err();
        assert!(matches!(err, DocumentError::Io(_)));
    }

    #[test]
    fn test_broken_pdf_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"%PDF-1.4 nothing else").unwrap();
        assert!(matches!(extract_payloads(&path), Err(DocumentError::Pdf(_))));
    }
}
