// src/payload.rs

use crate::record::CaptureFields;
use crate::schema::FACTURA_SCHEMA;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

pub const PAYLOAD_DELIMITER: char = '|';

/// Minimum segments for a line of free text to be taken as a QR payload.
const MIN_PAYLOAD_SEGMENTS: usize = 4;

/// An 11-digit RUC at the start of a line, then the delimiter.
static RUC_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{11}\s*\|").expect("RUC line pattern is valid"));

/// Map a decoded QR string onto the payload fields by position.
///
/// Never fails: missing, empty or whitespace-only segments become empty
/// strings and anything past the last payload field is dropped.
pub fn parse(raw: &str) -> CaptureFields {
    let segments: Vec<&str> = raw.split(PAYLOAD_DELIMITER).collect();
    let mut fields = CaptureFields::new();

    for (i, def) in FACTURA_SCHEMA.payload_fields().enumerate() {
        let value = segments
            .get(i)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or_default();
        fields.set(def.column, value);
    }

    let (filled, total) = fields.coverage();
    let discarded = segments.len().saturating_sub(total);
    if filled < total || discarded > 0 {
        debug!(filled, total, discarded, "Payload degraded");
    }

    fields
}

/// Find lines of free text that look like a factura QR payload.
///
/// A candidate starts with an 11-digit RUC followed by the delimiter and
/// has at least a handful of segments. Used on text pulled from uploaded
/// documents.
pub fn find_payload_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| RUC_LINE.is_match(line))
        .filter(|line| line.split(PAYLOAD_DELIMITER).count() >= MIN_PAYLOAD_SEGMENTS)
        .map(str::to_string)
        .collect()
}
