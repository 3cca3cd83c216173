// src/export.rs

use crate::record::InvoiceRecord;
use indexmap::IndexMap;
use rust_xlsxwriter::{Workbook, XlsxError};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::info;

pub const SHEET_NAME: &str = "Facturas";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export io error: {0}")]
    Io(#[from] io::Error),
    #[error("spreadsheet error: {0}")]
    Xlsx(#[from] XlsxError),
    #[error("nothing to export: a tabular export needs at least one record for its header")]
    EmptyInput,
    #[error("record {row} has different keys than the header record")]
    HeterogeneousKeys { row: usize },
}

/// An ordered list of `(key, value)` pairs that can be written out.
pub trait ExportRow {
    fn entries(&self) -> Vec<(&str, &str)>;
}

impl ExportRow for InvoiceRecord {
    fn entries(&self) -> Vec<(&str, &str)> {
        self.iter().collect()
    }
}

impl ExportRow for IndexMap<String, String> {
    fn entries(&self) -> Vec<(&str, &str)> {
        self.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
    }
}

/// `key: value` pairs joined with `, `. Delimiters inside values are not escaped.
pub fn delimited_line<R: ExportRow + ?Sized>(record: &R) -> String {
    record
        .entries()
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Write one line per record. An empty slice produces an empty file.
pub fn export_delimited<R: ExportRow>(records: &[R], dest: &Path) -> Result<(), ExportError> {
    let mut body = String::new();
    for r in records {
        body.push_str(&delimited_line(r));
        body.push('\n');
    }
    write_atomic(dest, body.as_bytes())?;
    info!(path = %dest.display(), records = records.len(), "Delimited export written");
    Ok(())
}

/// Append a single record line, creating the file and its directory if needed.
pub fn append_delimited<R>(record: &R, dest: &Path) -> Result<(), ExportError>
where
    R: ExportRow + ?Sized,
{
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut f = OpenOptions::new().create(true).append(true).open(dest)?;
    writeln!(f, "{}", delimited_line(record))?;
    Ok(())
}

/// Header from the first record's keys, then one string row per record.
///
/// Every record must carry exactly the header's keys in the same order.
pub fn export_tabular<R: ExportRow>(records: &[R], dest: &Path) -> Result<(), ExportError> {
    let first = records.first().ok_or(ExportError::EmptyInput)?;
    let header: Vec<&str> = first.entries().into_iter().map(|(k, _)| k).collect();

    for (row, r) in records.iter().enumerate() {
        let keys: Vec<&str> = r.entries().into_iter().map(|(k, _)| k).collect();
        if keys != header {
            return Err(ExportError::HeterogeneousKeys { row });
        }
    }

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;

    for (col, name) in header.iter().enumerate() {
        sheet.write_string(0, col as u16, *name)?;
    }
    for (i, r) in records.iter().enumerate() {
        let row = (i + 1) as u32;
        for (col, (_, value)) in r.entries().into_iter().enumerate() {
            sheet.write_string(row, col as u16, value)?;
        }
    }

    let buf = workbook.save_to_buffer()?;
    write_atomic(dest, &buf)?;
    info!(
        path = %dest.display(),
        records = records.len(),
        columns = header.len(),
        "Tabular export written"
    );
    Ok(())
}

/// Write to a temp file beside `dest` and rename it into place.
fn write_atomic(dest: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}
