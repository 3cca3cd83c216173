//! Capture, store and export Peruvian factura data read from QR codes.
//!
//! A capture shell (camera UI, file picker, CLI) only needs five calls:
//! [`payload::parse`], [`InvoiceStore::insert`], [`InvoiceStore::fetch_all`],
//! [`export::export_delimited`] and [`export::export_tabular`].

pub mod capture;
pub mod config;
pub mod document;
pub mod export;
pub mod invoice_db;
pub mod payload;
pub mod record;
pub mod schema;

pub use invoice_db::{InvoiceStore, StoreError};
pub use record::{CaptureFields, InvoiceRecord, SystemFields, ValidationStatus};
pub use schema::FACTURA_SCHEMA;
