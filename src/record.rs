// src/record.rs

use crate::schema::{FACTURA_SCHEMA, FieldSource};
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("invalid validation status: {0}")]
    InvalidStatus(String),
}

/// The 14 fields carried by a factura QR code, in payload order.
///
/// This is what the capture form holds before the record is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CaptureFields {
    fields: IndexMap<&'static str, String>,
}

impl Default for CaptureFields {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureFields {
    pub fn new() -> Self {
        let fields = FACTURA_SCHEMA
            .payload_fields()
            .map(|f| (f.column, String::new()))
            .collect();
        Self { fields }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    /// Returns false when `column` is not a payload column.
    pub fn set(&mut self, column: &str, value: impl Into<String>) -> bool {
        match self.fields.get_mut(column) {
            Some(slot) => {
                *slot = value.into();
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.fields.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Columns that are still empty.
    pub fn missing(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|(_, v)| v.is_empty())
            .map(|(k, _)| *k)
            .collect()
    }

    /// How many fields were filled (out of the payload fields).
    pub fn coverage(&self) -> (usize, usize) {
        let total = self.fields.len();
        (total - self.missing().len(), total)
    }

    pub fn is_blank(&self) -> bool {
        self.fields.values().all(String::is_empty)
    }

    pub fn clear(&mut self) {
        for v in self.fields.values_mut() {
            v.clear();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationStatus {
    #[default]
    Pendiente,
    Validado,
    Rechazado,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pendiente => "PENDIENTE",
            Self::Validado => "VALIDADO",
            Self::Rechazado => "RECHAZADO",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationStatus {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDIENTE" => Ok(Self::Pendiente),
            "VALIDADO" => Ok(Self::Validado),
            "RECHAZADO" => Ok(Self::Rechazado),
            _ => Err(RecordError::InvalidStatus(s.to_string())),
        }
    }
}

/// Values the application supplies when a capture is registered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemFields {
    pub domicilio_emisor: String,
    pub domicilio_adquiriente: String,
    pub fecha_registro: String,
    pub estado_validacion: String,
}

impl SystemFields {
    /// Stamped with the current UTC time, status `PENDIENTE`.
    pub fn registered_now() -> Self {
        let now = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        Self {
            fecha_registro: now,
            estado_validacion: ValidationStatus::default().to_string(),
            ..Self::default()
        }
    }

    fn value_for(&self, column: &str) -> Option<&str> {
        match column {
            "domicilio_emisor" => Some(self.domicilio_emisor.as_str()),
            "domicilio_adquiriente" => Some(self.domicilio_adquiriente.as_str()),
            "fecha_registro" => Some(self.fecha_registro.as_str()),
            "estado_validacion" => Some(self.estado_validacion.as_str()),
            _ => None,
        }
    }
}

/// A stored factura: every schema column, always in schema order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct InvoiceRecord {
    fields: IndexMap<&'static str, String>,
}

impl InvoiceRecord {
    pub fn empty() -> Self {
        let fields = FACTURA_SCHEMA
            .columns()
            .map(|c| (c, String::new()))
            .collect();
        Self { fields }
    }

    pub fn from_capture(capture: &CaptureFields, system: &SystemFields) -> Self {
        let fields = FACTURA_SCHEMA
            .fields
            .iter()
            .map(|f| {
                let value = match f.source {
                    FieldSource::Payload => capture.get(f.column),
                    FieldSource::System => system.value_for(f.column),
                };
                (f.column, value.unwrap_or_default().to_string())
            })
            .collect();
        Self { fields }
    }

    /// Build from `(column, value)` pairs in any order.
    ///
    /// Every schema column must be present exactly once; extra names are rejected.
    pub fn from_columns<I, K, V>(pairs: I) -> Result<Self, RecordError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut seen: IndexMap<&'static str, Option<String>> =
            FACTURA_SCHEMA.columns().map(|c| (c, None)).collect();

        for (k, v) in pairs {
            let slot = seen
                .get_mut(k.as_ref())
                .ok_or_else(|| RecordError::UnknownColumn(k.as_ref().to_string()))?;
            *slot = Some(v.into());
        }

        let mut fields = IndexMap::with_capacity(seen.len());
        for (col, value) in seen {
            fields.insert(col, value.ok_or(RecordError::MissingColumn(col))?);
        }
        Ok(Self { fields })
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    pub fn set(&mut self, column: &str, value: impl Into<String>) -> Result<(), RecordError> {
        let slot = self
            .fields
            .get_mut(column)
            .ok_or_else(|| RecordError::UnknownColumn(column.to_string()))?;
        *slot = value.into();
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.fields.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn values(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields.values().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Same values keyed by display caption, for the "as shown" export.
    pub fn labelled(&self) -> IndexMap<String, String> {
        self.fields
            .iter()
            .map(|(col, v)| {
                let label = FACTURA_SCHEMA.label(col).unwrap_or(*col);
                (label.to_string(), v.clone())
            })
            .collect()
    }

    /// The payload part of this record, e.g. to re-populate a capture form.
    pub fn capture_fields(&self) -> CaptureFields {
        let mut capture = CaptureFields::new();
        for f in FACTURA_SCHEMA.payload_fields() {
            capture.set(f.column, self.get(f.column).unwrap_or_default());
        }
        capture
    }
}
