use clap::{Parser, Subcommand, ValueEnum};
use factura_capture::capture::{LineSource, ScanSession, TextDecoder, run_ticks};
use factura_capture::config::Config;
use factura_capture::{
    CaptureFields, FACTURA_SCHEMA, InvoiceRecord, InvoiceStore, SystemFields, ValidationStatus,
    document, export, payload,
};
use std::io;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "factura-capture", about = "Capture, store and export facturas from QR payloads")]
struct Cli {
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show how a raw QR payload maps onto the form fields
    Parse { raw: String },
    /// Parse a payload and store it
    Add {
        raw: String,
        #[arg(long, default_value = "")]
        domicilio_emisor: String,
        #[arg(long, default_value = "")]
        domicilio_adquiriente: String,
        #[arg(long, default_value = "pendiente")]
        estado: ValidationStatus,
    },
    /// Store every payload found in a .txt or .pdf document
    Import { file: PathBuf },
    /// Read decoded QR lines from stdin (keyboard-wedge scanner) and store them
    Scan,
    /// List stored facturas
    List {
        #[arg(long)]
        json: bool,
    },
    /// Export all stored facturas
    Export {
        format: ExportFormat,
        #[arg(long)]
        out: Option<PathBuf>,
        /// Use display captions instead of column names as keys
        #[arg(long)]
        labels: bool,
    },
    /// Totals by status and document type
    Stats,
    /// Change one setting, e.g. `config set storage.db_path data/f.db`
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Txt,
    Xlsx,
}

fn register(
    db: &InvoiceStore,
    capture: &CaptureFields,
    system: SystemFields,
) -> Result<(), Box<dyn std::error::Error>> {
    let record = InvoiceRecord::from_capture(capture, &system);
    db.insert(&record)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    match cli.command {
        Command::Parse { raw } => {
            let fields = payload::parse(&raw);
            for (col, value) in fields.iter() {
                let label = FACTURA_SCHEMA.label(col).unwrap_or(col);
                println!("{label:<26} {value}");
            }
            let (filled, total) = fields.coverage();
            println!("({filled}/{total} fields)");
        }
        Command::Add {
            raw,
            domicilio_emisor,
            domicilio_adquiriente,
            estado,
        } => {
            let db = InvoiceStore::open(&cfg.storage.db_path)?;
            let system = SystemFields {
                domicilio_emisor,
                domicilio_adquiriente,
                estado_validacion: estado.to_string(),
                ..SystemFields::registered_now()
            };
            register(&db, &payload::parse(&raw), system)?;
        }
        Command::Import { file } => {
            let db = InvoiceStore::open(&cfg.storage.db_path)?;
            let found = document::extract_payloads(&file)?;
            for capture in &found {
                register(&db, capture, SystemFields::registered_now())?;
            }
            info!(file = %file.display(), stored = found.len(), "Import complete");
        }
        Command::Scan => {
            let db = InvoiceStore::open(&cfg.storage.db_path)?;
            let source = LineSource::new(io::stdin().lock());
            let mut session = ScanSession::new(source, TextDecoder)
                .with_max_frames_per_tick(cfg.scan.max_frames_per_tick);

            let mut failed = 0usize;
            let decoded = run_ticks(&mut session, cfg.scan.tick_interval(), |capture| {
                if let Err(e) = register(&db, &capture, SystemFields::registered_now()) {
                    warn!(error = %e, "Could not store scanned factura");
                    failed += 1;
                }
            })?;
            info!(decoded, failed, "Scan finished");
        }
        Command::List { json } => {
            let db = InvoiceStore::open(&cfg.storage.db_path)?;
            let records = db.fetch_all()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for r in &records {
                    println!("{}", export::delimited_line(r));
                }
            }
        }
        Command::Export { format, out, labels } => {
            let db = InvoiceStore::open(&cfg.storage.db_path)?;
            let records = db.fetch_all()?;
            let dest = out.unwrap_or_else(|| match format {
                ExportFormat::Txt => cfg.export.txt_path(),
                ExportFormat::Xlsx => cfg.export.xlsx_path(),
            });
            match (format, labels) {
                (ExportFormat::Txt, false) => export::export_delimited(&records, &dest)?,
                (ExportFormat::Xlsx, false) => export::export_tabular(&records, &dest)?,
                (ExportFormat::Txt, true) => {
                    let rows: Vec<_> = records.iter().map(InvoiceRecord::labelled).collect();
                    export::export_delimited(&rows, &dest)?
                }
                (ExportFormat::Xlsx, true) => {
                    let rows: Vec<_> = records.iter().map(InvoiceRecord::labelled).collect();
                    export::export_tabular(&rows, &dest)?
                }
            }
            println!("Exported {} facturas to {}", records.len(), dest.display());
        }
        Command::Stats => {
            let db = InvoiceStore::open(&cfg.storage.db_path)?;
            let counts = db.counts()?;
            info!(total = counts.total, "Database statistics");
            println!("Total: {}", counts.total);
            println!("By status:");
            for (status, n) in &counts.by_status {
                println!("  {status:<12} {n}");
            }
            println!("By document type:");
            for (tipo, n) in &counts.by_document_type {
                println!("  {tipo:<12} {n}");
            }
        }
        Command::Config {
            action: ConfigAction::Set { key, value },
        } => {
            Config::set_value(&cli.config, &key, &value)?;
            info!(key = %key, value = %value, "Config updated");
        }
    }

    Ok(())
}
