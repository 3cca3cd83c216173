// src/schema.rs

/// Where a column's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSource {
    /// Positional segment of the QR payload.
    Payload,
    /// Filled in by the application when the record is registered.
    System,
}

/// One column of the invoice table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub column: &'static str,
    pub label: &'static str,
    pub source: FieldSource,
}

const fn payload(column: &'static str, label: &'static str) -> FieldDef {
    FieldDef {
        column,
        label,
        source: FieldSource::Payload,
    }
}

const fn system(column: &'static str, label: &'static str) -> FieldDef {
    FieldDef {
        column,
        label,
        source: FieldSource::System,
    }
}

/// Ordered, versioned description of the invoice table.
///
/// Parsing, storage and export all take their column order from here.
/// Payload fields must come first and in QR position order.
#[derive(Debug)]
pub struct Schema {
    pub version: u32,
    pub table: &'static str,
    pub fields: &'static [FieldDef],
}

pub const FACTURA_SCHEMA: Schema = Schema {
    version: 1,
    table: "facturas",
    fields: &[
        payload("ruc_emisor", "RUC Emisor"),
        payload("tipo_comprobante", "Tipo Comprobante"),
        payload("serie", "Serie"),
        payload("numeracion", "Numeración"),
        payload("monto_total", "Monto Total"),
        payload("fecha_emision", "Fecha Emisión"),
        payload("monto_igv", "Monto IGV"),
        payload("ruc_adquiriente", "RUC Adquiriente"),
        payload("razon_social_emisor", "Razón Social Emisor"),
        payload("razon_social_adquiriente", "Razón Social Adquiriente"),
        payload("valor_venta_gravada", "Valor Venta Gravada"),
        payload("valor_venta_inafecta", "Valor Venta Inafecta"),
        payload("valor_venta_exonerada", "Valor Venta Exonerada"),
        payload("codigo_hash", "Código Hash"),
        system("domicilio_emisor", "Domicilio Emisor"),
        system("domicilio_adquiriente", "Domicilio Adquiriente"),
        system("fecha_registro", "Fecha Registro"),
        system("estado_validacion", "Estado Validación"),
    ],
};

impl Schema {
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.column)
    }

    pub fn payload_fields(&self) -> impl Iterator<Item = &'static FieldDef> + '_ {
        self.fields
            .iter()
            .filter(|f| f.source == FieldSource::Payload)
    }

    pub fn system_fields(&self) -> impl Iterator<Item = &'static FieldDef> + '_ {
        self.fields
            .iter()
            .filter(|f| f.source == FieldSource::System)
    }

    pub fn payload_len(&self) -> usize {
        self.payload_fields().count()
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.column == column)
    }

    pub fn field(&self, column: &str) -> Option<&'static FieldDef> {
        self.fields.iter().find(|f| f.column == column)
    }

    /// Display caption for a column, e.g. `ruc_emisor` -> `RUC Emisor`.
    pub fn label(&self, column: &str) -> Option<&'static str> {
        self.field(column).map(|f| f.label)
    }

    /// All columns are TEXT; there is no primary key (append-only table).
    pub fn create_table_sql(&self) -> String {
        let cols: Vec<String> = self.columns().map(|c| format!("{c} TEXT")).collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.table,
            cols.join(",\n    ")
        )
    }

    pub fn insert_sql(&self) -> String {
        let cols: Vec<&str> = self.columns().collect();
        let params: Vec<String> = (1..=cols.len()).map(|i| format!("?{i}")).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            cols.join(", "),
            params.join(", ")
        )
    }

    pub fn select_all_sql(&self) -> String {
        let cols: Vec<&str> = self.columns().collect();
        format!(
            "SELECT {} FROM {} ORDER BY rowid",
            cols.join(", "),
            self.table
        )
    }
}
