use anyhow::Result;
use rusqlite::Connection;
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use customs_ingest::{
    count_declarations, count_persisted, diagnose_file, setup_database, DeclarationLoader,
    LoadStatus, ReferenceKind,
};

const DEFAULT_DB: &str = "importaciones.db";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("import") if args.len() >= 3 => {
            let db_path = args.get(3).map(String::as_str).unwrap_or(DEFAULT_DB);
            run_import(&args[2], db_path)
        }
        Some("diagnose") if args.len() >= 3 => run_diagnose(&args[2]),
        _ => {
            eprintln!("Usage:");
            eprintln!("  customs-ingest import <file.csv> [db-path]");
            eprintln!("  customs-ingest diagnose <file.csv>");
            std::process::exit(1);
        }
    }
}

fn run_import(file: &str, db_path: &str) -> Result<()> {
    println!("📦 Customs declarations import");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!("\n🔧 Setting up database at {}...", db_path);
    let mut conn = Connection::open(db_path)?;
    setup_database(&conn)?;
    println!("✓ Database initialized with WAL mode");

    println!("\n📂 Loading {}...", file);
    let loader = DeclarationLoader::new();
    let report = loader.load_file(&mut conn, Path::new(file));

    if let Ok(json) = serde_json::to_string_pretty(&report) {
        tracing::debug!("load report: {}", json);
    }

    match report.status {
        LoadStatus::Success => {
            println!("✓ Load committed (load id {})", report.load_id);
        }
        LoadStatus::SourceMissing => {
            println!("⚠️  {} — nothing to load", report.message);
            return Ok(());
        }
        LoadStatus::Error => {
            println!("❌ Load failed: {}", report.message);
            return Ok(());
        }
    }

    if let Some(decode) = &report.decode {
        println!(
            "✓ Decoded with {} strategy ({} encoding)",
            decode.strategy.name(),
            decode.encoding.name()
        );
        if !decode.dropped.is_empty() {
            println!("⚠️  Dropped {} unparseable lines", decode.dropped.len());
        }
        if !decode.repaired.is_empty() {
            println!("⚠️  Repaired {} malformed lines", decode.repaired.len());
        }
    }

    println!("\n📊 Results");
    println!("✓ Rows read:          {}", report.rows_read);
    println!("✓ Records loaded:     {}", report.records_loaded);
    println!("✓ Duplicates skipped: {}", report.duplicates_skipped);
    for rejection in &report.rejections {
        println!(
            "⚠️  Rejected ({}): {} — first at {}",
            rejection.reason.label(),
            rejection.count,
            rejection.first_detail
        );
    }
    if report.numeric_defaults > 0 {
        println!(
            "⚠️  Numeric fields defaulted to 0.0: {}",
            report.numeric_defaults
        );
    }

    println!("\n🔍 Store totals");
    println!("✓ Declarations: {}", count_declarations(&conn)?);
    for kind in ReferenceKind::ALL {
        println!(
            "✓ {}: {}",
            kind.table(),
            count_persisted(&conn, kind)?
        );
    }

    Ok(())
}

fn run_diagnose(file: &str) -> Result<()> {
    println!("🔍 Diagnosing {}...", file);

    let diagnosis = diagnose_file(Path::new(file), b';')?;

    println!("\n📋 First bytes: {:?}", diagnosis.first_bytes);
    println!("📊 Total lines: {}", diagnosis.total_lines);

    println!("📊 Column distribution:");
    for (columns, count) in &diagnosis.column_histogram {
        println!("   {} columns → {} lines", columns, count);
    }
    if let Some(most_common) = diagnosis.most_common_columns {
        println!("📊 Most common column count: {}", most_common);
    }

    println!("\n📋 Sample:");
    for line in &diagnosis.sample {
        println!("   line {} ({} cols): {}", line.line, line.columns, line.preview);
    }

    Ok(())
}
