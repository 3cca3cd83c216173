// src/invoice_db.rs

use crate::record::{InvoiceRecord, RecordError};
use crate::schema::{FACTURA_SCHEMA, Schema};
use rusqlite::{Connection, params_from_iter};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("table {table} does not match schema v{version}: expected [{expected}], found [{found}]")]
    SchemaMismatch {
        table: &'static str,
        version: u32,
        expected: String,
        found: String,
    },
    #[error("stored row does not fit the schema: {0}")]
    Record(#[from] RecordError),
    #[error("store connection lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Summary figures for the statistics view.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_document_type: BTreeMap<String, usize>,
}

/// Append-only factura table on a single SQLite connection.
pub struct InvoiceStore {
    conn: Mutex<Connection>,
    schema: &'static Schema,
}

impl InvoiceStore {
    /// Open (or create) the store at `db_path`, creating parent directories.
    pub fn open<P: AsRef<Path>>(db_path: P) -> StoreResult<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        let store = Self::init(conn)?;
        info!(path = %db_path.display(), "Invoice store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        let schema = &FACTURA_SCHEMA;
        conn.execute(&schema.create_table_sql(), [])?;

        let found = Self::table_columns(&conn, schema.table)?;
        let expected: Vec<&str> = schema.columns().collect();
        if found != expected {
            return Err(StoreError::SchemaMismatch {
                table: schema.table,
                version: schema.version,
                expected: expected.join(", "),
                found: found.join(", "),
            });
        }

        let stored_version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if stored_version != schema.version {
            if stored_version != 0 {
                warn!(
                    from = stored_version,
                    to = schema.version,
                    "Schema version changed with identical columns"
                );
            }
            conn.pragma_update(None, "user_version", schema.version)?;
        }

        info!(
            table = schema.table,
            version = schema.version,
            "Database initialized successfully"
        );
        Ok(Self {
            conn: Mutex::new(conn),
            schema,
        })
    }

    fn table_columns(conn: &Connection, table: &str) -> StoreResult<Vec<String>> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let cols = stmt.query_map([], |row| row.get::<_, String>(1))?;
        Ok(cols.collect::<Result<_, _>>()?)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Append one row. Each call commits on its own.
    pub fn insert(&self, record: &InvoiceRecord) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(&self.schema.insert_sql(), params_from_iter(record.values()))?;
        let row = conn.last_insert_rowid();
        info!(
            row,
            ruc_emisor = record.get("ruc_emisor").unwrap_or_default(),
            serie = record.get("serie").unwrap_or_default(),
            numeracion = record.get("numeracion").unwrap_or_default(),
            "Factura stored"
        );
        Ok(())
    }

    /// Every row in insertion order, keyed by the statement's column names.
    pub fn fetch_all(&self) -> StoreResult<Vec<InvoiceRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&self.schema.select_all_sql())?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let rows = stmt.query_map([], |row| {
            let mut values = Vec::with_capacity(names.len());
            for i in 0..names.len() {
                let v: Option<String> = row.get(i)?;
                values.push(v.unwrap_or_default());
            }
            Ok(values)
        })?;

        let mut records = Vec::new();
        for values in rows {
            let values = values?;
            records.push(InvoiceRecord::from_columns(names.iter().zip(values))?);
        }
        Ok(records)
    }

    /// Get count of rows, grouped by validation status and document type
    pub fn counts(&self) -> StoreResult<StoreCounts> {
        let conn = self.conn()?;
        let table = self.schema.table;

        let total: usize = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })?;

        let by_status = Self::grouped(&conn, table, "estado_validacion")?;
        let by_document_type = Self::grouped(&conn, table, "tipo_comprobante")?;

        Ok(StoreCounts {
            total,
            by_status,
            by_document_type,
        })
    }

    fn grouped(
        conn: &Connection,
        table: &str,
        column: &str,
    ) -> StoreResult<BTreeMap<String, usize>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT COALESCE({column}, ''), COUNT(*) FROM {table} GROUP BY 1"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?))
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::parse;
    use crate::record::SystemFields;
    use std::sync::Arc;
    use std::thread;

    fn record(serie: &str, tipo: &str, status: &str) -> InvoiceRecord {
        let capture = parse(&format!(
            "20100066603|{tipo}|{serie}|0001|118.00|2024-05-01|18.00|20512345678|ACME SAC|CLIENTE|100.00|0.00|0.00|h4sh"
        ));
        let system = SystemFields {
            domicilio_emisor: "Jr. Union 1".into(),
            domicilio_adquiriente: String::new(),
            fecha_registro: "2024-05-02T09:30:00Z".into(),
            estado_validacion: status.into(),
        };
        InvoiceRecord::from_capture(&capture, &system)
    }

    #[test]
    fn test_insert_fetch_round_trip() {
        let db = InvoiceStore::open_in_memory().unwrap();
        let a = record("F001", "01", "PENDIENTE");
        let b = record("B002", "03", "VALIDADO");
        db.insert(&a).unwrap();
        db.insert(&b).unwrap();

        let all = db.fetch_all().unwrap();
        assert_eq!(all, vec![a, b]);
    }

    #[test]
    fn test_no_dedup() {
        let db = InvoiceStore::open_in_memory().unwrap();
        let a = record("F001", "01", "PENDIENTE");
        db.insert(&a).unwrap();
        db.insert(&a).unwrap();
        assert_eq!(db.fetch_all().unwrap().len(), 2);
    }

    #[test]
    fn test_empty_table() {
        let db = InvoiceStore::open_in_memory().unwrap();
        assert!(db.fetch_all().unwrap().is_empty());
        assert_eq!(db.counts().unwrap(), StoreCounts::default());
    }

    #[test]
    fn test_counts() {
        let db = InvoiceStore::open_in_memory().unwrap();
        db.insert(&record("F001", "01", "PENDIENTE")).unwrap();
        db.insert(&record("F002", "01", "VALIDADO")).unwrap();
        db.insert(&record("B001", "03", "PENDIENTE")).unwrap();

        let counts = db.counts().unwrap();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.by_status.get("PENDIENTE"), Some(&2));
        assert_eq!(counts.by_document_type.get("03"), Some(&1));
    }

    #[test]
    fn test_reopen_persists_and_stamps_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("facturas.db");
        {
            let db = InvoiceStore::open(&path).unwrap();
            db.insert(&record("F001", "01", "PENDIENTE")).unwrap();
        }
        let db = InvoiceStore::open(&path).unwrap();
        assert_eq!(db.fetch_all().unwrap().len(), 1);

        let conn = Connection::open(&path).unwrap();
        let v: u32 = conn
            .query_row("PRAGMA user_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(v, FACTURA_SCHEMA.version);
    }

    #[test]
    fn test_schema_mismatch_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(
                "CREATE TABLE facturas (ruc_emisor TEXT, serie TEXT)",
                [],
            )
            .unwrap();
        }
        let err = InvoiceStore::open(&path).err().unwrap();
        assert!(matches!(err, StoreError::SchemaMismatch { .. }));
        assert!(err.to_string().contains("found [ruc_emisor, serie]"));
    }

    #[test]
    fn test_null_columns_read_as_empty() {
        let db = InvoiceStore::open_in_memory().unwrap();
        db.conn()
            .unwrap()
            .execute("INSERT INTO facturas (ruc_emisor) VALUES ('20100066603')", [])
            .unwrap();
        let all = db.fetch_all().unwrap();
        assert_eq!(all[0].get("ruc_emisor"), Some("20100066603"));
        assert_eq!(all[0].get("serie"), Some(""));
    }

    #[test]
    fn test_shared_across_threads() {
        let db = Arc::new(InvoiceStore::open_in_memory().unwrap());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let db = Arc::clone(&db);
                thread::spawn(move || {
                    db.insert(&record(&format!("F00{i}"), "01", "PENDIENTE"))
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(db.fetch_all().unwrap().len(), 4);
    }
}
