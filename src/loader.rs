// 🚚 Declaration Loader - Decode → resolve references → load facts
// One transaction per load: reference entities and declarations commit
// together or not at all. Row-level faults are counted, never raised.

use crate::db::{self, Declaration};
use crate::decoder::{DecodeReport, DecodedFile, RawRow, RowDecoder};
use crate::error::{IngestError, IngestResult};
use crate::normalize::{parse_date, parse_decimal};
use crate::references::{ReferenceKind, ReferenceResolver};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

// ============================================================================
// LOAD RESULT TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadStatus {
    Success,
    Error,
    /// The input file does not exist. Not an error: the caller decides
    /// whether to fall back to a sample path or do nothing.
    SourceMissing,
}

/// Pipeline progress. The report carries the state reached, so a failure
/// names the phase it died in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    NotStarted,
    Decoding,
    ResolvingReferences,
    LoadingFacts,
    Committed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    MissingRequiredField,
    BadDate,
    UnresolvedReference,
}

impl RejectReason {
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::MissingRequiredField => "missing required field",
            RejectReason::BadDate => "bad date",
            RejectReason::UnresolvedReference => "unresolved reference",
        }
    }
}

/// Per-reason rejection rollup: total count plus the first occurrence,
/// spelled out for humans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionSummary {
    pub reason: RejectReason,
    pub count: usize,
    pub first_line: usize,
    pub first_detail: String,
}

/// What a load did. Always returned, even on terminal failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadReport {
    pub load_id: Uuid,
    pub status: LoadStatus,
    pub state: PipelineState,
    pub rows_read: usize,
    pub records_loaded: usize,
    pub duplicates_skipped: usize,
    pub rejections: Vec<RejectionSummary>,
    /// Numeric fields that had content but would not parse and fell back
    /// to 0.0.
    pub numeric_defaults: usize,
    pub references_created: usize,
    pub decode: Option<DecodeReport>,
    pub message: String,
}

impl LoadReport {
    fn bare(load_id: Uuid, status: LoadStatus, state: PipelineState, message: String) -> Self {
        LoadReport {
            load_id,
            status,
            state,
            rows_read: 0,
            records_loaded: 0,
            duplicates_skipped: 0,
            rejections: Vec::new(),
            numeric_defaults: 0,
            references_created: 0,
            decode: None,
            message,
        }
    }

    pub fn rejected_rows(&self) -> usize {
        self.rejections.iter().map(|r| r.count).sum()
    }
}

/// Accumulates rejections, remembering the first occurrence per reason.
struct RejectionTally {
    summaries: Vec<RejectionSummary>,
}

impl RejectionTally {
    fn new() -> Self {
        RejectionTally {
            summaries: Vec::new(),
        }
    }

    fn reject(&mut self, reason: RejectReason, line: usize, detail: String) {
        warn!(line, reason = reason.label(), "{}", detail);
        match self.summaries.iter_mut().find(|s| s.reason == reason) {
            Some(summary) => summary.count += 1,
            None => self.summaries.push(RejectionSummary {
                reason,
                count: 1,
                first_line: line,
                first_detail: detail,
            }),
        }
    }

    fn total(&self) -> usize {
        self.summaries.iter().map(|s| s.count).sum()
    }
}

// ============================================================================
// DECLARATION LOADER
// ============================================================================

pub struct DeclarationLoader {
    decoder: RowDecoder,
}

impl Default for DeclarationLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DeclarationLoader {
    pub fn new() -> Self {
        DeclarationLoader {
            decoder: RowDecoder::new(),
        }
    }

    pub fn with_decoder(decoder: RowDecoder) -> Self {
        DeclarationLoader { decoder }
    }

    /// Load one declaration file into the store.
    ///
    /// Always returns a report; nothing escapes to the caller. A missing
    /// file reports `SourceMissing`, unreadable input and persistence
    /// failures report `Error` with the whole batch rolled back.
    pub fn load_file(&self, conn: &mut Connection, path: &Path) -> LoadReport {
        let load_id = Uuid::new_v4();
        info!(%load_id, path = %path.display(), "starting load");

        match self.run(conn, path, load_id) {
            Ok(report) => report,
            Err(IngestError::FileNotFound(p)) => {
                warn!(file = %p, "input file not found, nothing to load");
                LoadReport::bare(
                    load_id,
                    LoadStatus::SourceMissing,
                    PipelineState::NotStarted,
                    format!("file not found: {}", p),
                )
            }
            Err(err) => {
                warn!(%load_id, error = %err, "load failed");
                LoadReport::bare(
                    load_id,
                    LoadStatus::Error,
                    PipelineState::Failed,
                    err.to_string(),
                )
            }
        }
    }

    fn run(&self, conn: &mut Connection, path: &Path, load_id: Uuid) -> IngestResult<LoadReport> {
        // --- Decoding -------------------------------------------------------
        let decoded = self.decoder.decode_path(path)?;
        let rows_read = decoded.len();

        if decoded.is_empty() {
            // Empty or header-only input: a zero-row load is a valid no-op.
            let mut report = LoadReport::bare(
                load_id,
                LoadStatus::Success,
                PipelineState::Committed,
                "no data rows in input".to_string(),
            );
            report.decode = Some(decoded.report);
            return Ok(report);
        }

        // Master data cannot load without its five source columns.
        let missing: Vec<String> = ReferenceKind::ALL
            .iter()
            .filter(|kind| !decoded.has_column(kind.source_column()))
            .map(|kind| kind.source_column().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(IngestError::MissingColumns {
                missing,
                present: decoded.columns.clone(),
            });
        }

        let tx = conn.transaction()?;

        // --- ResolvingReferences: one pass over the whole file --------------
        let mut resolver = ReferenceResolver::new();
        resolver.load_existing(&tx)?;

        let mut references_created = 0;
        for kind in ReferenceKind::ALL {
            let keys: BTreeSet<&str> = decoded
                .rows
                .iter()
                .filter_map(|row| decoded.value(row, kind.source_column()))
                .filter(|value| !value.is_empty())
                .collect();
            references_created += resolver.ensure_all(&tx, kind, keys)?;
        }

        // --- LoadingFacts: per-row pass --------------------------------------
        let mut staged = db::existing_natural_keys(&tx)?;
        let mut tally = RejectionTally::new();
        let mut records_loaded = 0;
        let mut duplicates_skipped = 0;
        let mut numeric_defaults = 0;

        for row in &decoded.rows {
            let Some(declaration) =
                build_declaration(&decoded, row, &resolver, &mut tally, &mut numeric_defaults)
            else {
                continue;
            };

            // Natural-key check against persisted and staged records alike.
            if !staged.insert(declaration.natural_key_hash()) {
                duplicates_skipped += 1;
                continue;
            }

            db::insert_declaration(&tx, &declaration)?;
            records_loaded += 1;
        }

        // All or nothing: a commit failure rolls the whole batch back.
        tx.commit()?;

        let message = format!(
            "loaded {} declarations ({} duplicates skipped, {} rows rejected)",
            records_loaded,
            duplicates_skipped,
            tally.total()
        );
        info!(%load_id, records_loaded, duplicates_skipped, rejected = tally.total(), "load committed");

        Ok(LoadReport {
            load_id,
            status: LoadStatus::Success,
            state: PipelineState::Committed,
            rows_read,
            records_loaded,
            duplicates_skipped,
            rejections: tally.summaries,
            numeric_defaults,
            references_created,
            decode: Some(decoded.report.clone()),
            message,
        })
    }
}

/// Validate and normalize one raw row. `None` means the row was rejected and
/// tallied; numeric faults never reject, they default.
fn build_declaration(
    decoded: &DecodedFile,
    row: &RawRow,
    resolver: &ReferenceResolver,
    tally: &mut RejectionTally,
    numeric_defaults: &mut usize,
) -> Option<Declaration> {
    let mut ids = [0i64; 5];
    for (slot, kind) in ReferenceKind::ALL.iter().enumerate() {
        let value = decoded.value(row, kind.source_column()).unwrap_or("");
        if value.is_empty() {
            tally.reject(
                RejectReason::MissingRequiredField,
                row.line,
                format!("line {}: column '{}' is empty", row.line, kind.source_column()),
            );
            return None;
        }

        match resolver.lookup(*kind, value) {
            Some(id) => ids[slot] = id,
            None => {
                tally.reject(
                    RejectReason::UnresolvedReference,
                    row.line,
                    format!(
                        "line {}: no {} entity for '{}'",
                        row.line,
                        kind.table(),
                        value
                    ),
                );
                return None;
            }
        }
    }

    let raw_date = match decoded.value(row, "fecha_declaracion") {
        Some(value) => value,
        None => {
            tally.reject(
                RejectReason::MissingRequiredField,
                row.line,
                format!(
                    "line {}: column 'fecha_declaracion' not present",
                    row.line
                ),
            );
            return None;
        }
    };

    let fecha_declaracion = match parse_date(raw_date) {
        Some(date) => date,
        None => {
            tally.reject(
                RejectReason::BadDate,
                row.line,
                format!("line {}: unparseable date '{}'", row.line, raw_date),
            );
            return None;
        }
    };

    Some(Declaration {
        correlativo: decoded.value(row, "correlativo").unwrap_or("").to_string(),
        fecha_declaracion,
        tipo_cambio_dolar: numeric_value(decoded, row, "tipo_cambio_dolar", numeric_defaults),
        descripcion: decoded.value(row, "descripcion").unwrap_or("").to_string(),
        cantidad_fraccion: numeric_value(decoded, row, "cantidad_fraccion", numeric_defaults),
        tasa_dai: numeric_value(decoded, row, "tasa_dai", numeric_defaults),
        valor_dai: numeric_value(decoded, row, "valor_dai", numeric_defaults),
        // Source column is spelled "uds" even though the value is USD.
        valor_cif_usd: numeric_value(decoded, row, "valor_cif_uds", numeric_defaults),
        tasa_cif_cantidad_fraccion: numeric_value(
            decoded,
            row,
            "tasa_cif_cantidad_fraccion",
            numeric_defaults,
        ),
        aduana_id: ids[0],
        pais_id: ids[1],
        tipo_regimen_id: ids[2],
        unidad_medida_id: ids[3],
        codigo_sac_id: ids[4],
    })
}

fn numeric_value(
    decoded: &DecodedFile,
    row: &RawRow,
    column: &str,
    numeric_defaults: &mut usize,
) -> f64 {
    let raw = decoded.value(row, column).unwrap_or("");
    let field = parse_decimal(raw);
    if !field.valid && !raw.trim().is_empty() {
        *numeric_defaults += 1;
        warn!(line = row.line, column, value = raw, "unparseable number, using 0.0");
    }
    field.value
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_declarations, find_declaration, setup_database};
    use crate::decoder::DecodeStrategy;
    use crate::references::count_persisted;
    use chrono::NaiveDate;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "aduana;pais;tipo_regimen;tipo_unidad_medida;sac;correlativo;\
fecha_declaracion;tipo_cambio_dolar;descripcion;cantidad_fraccion;tasa_dai;valor_dai;\
valor_cif_uds;tasa_cif_cantidad_fraccion";

    fn data_row(correlativo: &str, fecha: &str, descripcion: &str) -> String {
        format!(
            "PuertoX;CountryY;Importacion;KG;1234;{};{};7,85;{};10;0.15;117.75;785.00;78.5",
            correlativo, fecha, descripcion
        )
    }

    fn write_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_single_row_creates_references_and_fact() {
        let mut conn = test_conn();
        let file = write_file(&format!(
            "{}\n{}\n",
            HEADER,
            data_row("COR001", "01/02/23", "widgets de acero")
        ));

        let report = DeclarationLoader::new().load_file(&mut conn, file.path());

        assert_eq!(report.status, LoadStatus::Success);
        assert_eq!(report.state, PipelineState::Committed);
        assert_eq!(report.records_loaded, 1);
        assert_eq!(report.rows_read, 1);
        assert_eq!(report.references_created, 5);

        for kind in ReferenceKind::ALL {
            assert_eq!(count_persisted(&conn, kind).unwrap(), 1);
        }
        assert_eq!(count_declarations(&conn).unwrap(), 1);

        // Retrievable by natural key, with the date and numerics normalized.
        let found = find_declaration(&conn, "COR001", 1, "widgets de acero")
            .unwrap()
            .expect("loaded row must be retrievable by natural key");
        assert_eq!(
            found.fecha_declaracion,
            NaiveDate::from_ymd_opt(2023, 2, 1).unwrap()
        );
        assert_eq!(found.tipo_cambio_dolar, 7.85);
        assert_eq!(found.valor_cif_usd, 785.0);
    }

    #[test]
    fn test_reload_is_idempotent() {
        let mut conn = test_conn();
        let file = write_file(&format!(
            "{}\n{}\n",
            HEADER,
            data_row("COR001", "01/02/23", "widgets de acero")
        ));
        let loader = DeclarationLoader::new();

        let first = loader.load_file(&mut conn, file.path());
        assert_eq!(first.records_loaded, 1);

        let second = loader.load_file(&mut conn, file.path());
        assert_eq!(second.status, LoadStatus::Success);
        assert_eq!(second.records_loaded, 0);
        assert_eq!(second.duplicates_skipped, 1);

        // No duplicate facts, no duplicate reference entities.
        assert_eq!(count_declarations(&conn).unwrap(), 1);
        for kind in ReferenceKind::ALL {
            assert_eq!(count_persisted(&conn, kind).unwrap(), 1);
        }
    }

    #[test]
    fn test_duplicate_within_single_file_is_skipped() {
        let mut conn = test_conn();
        let row = data_row("COR001", "01/02/23", "widgets de acero");
        let file = write_file(&format!("{}\n{}\n{}\n", HEADER, row, row));

        let report = DeclarationLoader::new().load_file(&mut conn, file.path());

        assert_eq!(report.rows_read, 2);
        assert_eq!(report.records_loaded, 1);
        assert_eq!(report.duplicates_skipped, 1);
        assert_eq!(report.rejected_rows(), 0);
    }

    #[test]
    fn test_missing_reference_column_aborts_load() {
        let mut conn = test_conn();
        // No `sac` column at all.
        let file = write_file(
            "aduana;pais;tipo_regimen;tipo_unidad_medida;correlativo;fecha_declaracion\n\
             PuertoX;CountryY;Importacion;KG;COR001;01/02/23\n",
        );

        let report = DeclarationLoader::new().load_file(&mut conn, file.path());

        assert_eq!(report.status, LoadStatus::Error);
        assert_eq!(report.state, PipelineState::Failed);
        assert!(report.message.contains("sac"));
        // The columns actually present are reported back.
        assert!(report.message.contains("aduana"));
        assert_eq!(count_declarations(&conn).unwrap(), 0);
        for kind in ReferenceKind::ALL {
            assert_eq!(count_persisted(&conn, kind).unwrap(), 0);
        }
    }

    #[test]
    fn test_bad_date_rejects_row_and_continues() {
        let mut conn = test_conn();
        let file = write_file(&format!(
            "{}\n{}\n{}\n",
            HEADER,
            data_row("COR001", "pronto", "widgets"),
            data_row("COR002", "15/03/49", "gears")
        ));

        let report = DeclarationLoader::new().load_file(&mut conn, file.path());

        assert_eq!(report.status, LoadStatus::Success);
        assert_eq!(report.records_loaded, 1);
        assert_eq!(report.rejected_rows(), 1);

        let rejection = &report.rejections[0];
        assert_eq!(rejection.reason, RejectReason::BadDate);
        assert_eq!(rejection.first_line, 2);
        assert!(rejection.first_detail.contains("pronto"));

        // Century pivot applied to the surviving row.
        let found = find_declaration(&conn, "COR002", 1, "gears").unwrap().unwrap();
        assert_eq!(
            found.fecha_declaracion,
            NaiveDate::from_ymd_opt(2049, 3, 15).unwrap()
        );
    }

    #[test]
    fn test_empty_reference_value_rejects_row() {
        let mut conn = test_conn();
        let file = write_file(&format!(
            "{}\nPuertoX;;Importacion;KG;1234;COR001;01/02/23;7,85;widgets;10;0.15;117.75;785.00;78.5\n",
            HEADER
        ));

        let report = DeclarationLoader::new().load_file(&mut conn, file.path());

        assert_eq!(report.records_loaded, 0);
        assert_eq!(report.rejected_rows(), 1);
        assert_eq!(report.rejections[0].reason, RejectReason::MissingRequiredField);
        assert!(report.rejections[0].first_detail.contains("pais"));
        // The other four reference values were still cataloged.
        assert_eq!(count_persisted(&conn, ReferenceKind::Pais).unwrap(), 0);
        assert_eq!(count_persisted(&conn, ReferenceKind::Aduana).unwrap(), 1);
    }

    #[test]
    fn test_overlong_row_is_repaired_and_loaded() {
        let mut conn = test_conn();
        // One extra delimiter: strict and lenient both drop the only data
        // row, so the line-repair pass carries the load.
        let file = write_file(&format!(
            "{}\n{};extra\n",
            HEADER,
            data_row("COR001", "01/02/23", "widgets")
        ));

        let report = DeclarationLoader::new().load_file(&mut conn, file.path());

        assert_eq!(report.status, LoadStatus::Success);
        assert_eq!(report.records_loaded, 1);
        let decode = report.decode.expect("decode report");
        assert_eq!(decode.strategy, DecodeStrategy::LineRepair);
        assert_eq!(decode.repaired, vec![2]);
        // The merged tail "78.5;extra" is not a number; it defaults to 0.0.
        assert_eq!(report.numeric_defaults, 1);
        let found = find_declaration(&conn, "COR001", 1, "widgets").unwrap().unwrap();
        assert_eq!(found.tasa_cif_cantidad_fraccion, 0.0);
    }

    #[test]
    fn test_missing_file_reports_source_missing() {
        let mut conn = test_conn();
        let report =
            DeclarationLoader::new().load_file(&mut conn, Path::new("no_such_input.csv"));

        assert_eq!(report.status, LoadStatus::SourceMissing);
        assert_eq!(report.state, PipelineState::NotStarted);
        assert_eq!(report.records_loaded, 0);
    }

    #[test]
    fn test_binary_file_is_terminal_error_with_no_commit() {
        let mut conn = test_conn();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0x00, 0xFF, 0x13, 0x00, 0x37]).unwrap();
        file.flush().unwrap();

        let report = DeclarationLoader::new().load_file(&mut conn, file.path());

        assert_eq!(report.status, LoadStatus::Error);
        assert_eq!(report.state, PipelineState::Failed);
        assert_eq!(report.records_loaded, 0);
        assert!(report.message.contains("could not read file"));
        assert_eq!(count_declarations(&conn).unwrap(), 0);
    }

    #[test]
    fn test_empty_file_loads_zero_rows() {
        let mut conn = test_conn();
        let file = write_file("");

        let report = DeclarationLoader::new().load_file(&mut conn, file.path());

        assert_eq!(report.status, LoadStatus::Success);
        assert_eq!(report.rows_read, 0);
        assert_eq!(report.records_loaded, 0);
    }

    #[test]
    fn test_header_only_file_loads_zero_rows() {
        let mut conn = test_conn();
        let file = write_file(&format!("{}\n", HEADER));

        let report = DeclarationLoader::new().load_file(&mut conn, file.path());

        assert_eq!(report.status, LoadStatus::Success);
        assert_eq!(report.records_loaded, 0);
        for kind in ReferenceKind::ALL {
            assert_eq!(count_persisted(&conn, kind).unwrap(), 0);
        }
    }

    #[test]
    fn test_mixed_file_counts_every_outcome() {
        let mut conn = test_conn();
        let good = data_row("COR001", "01/02/23", "widgets");
        let bad_date = data_row("COR002", "33/33/33", "gears");
        let file = write_file(&format!("{}\n{}\n{}\n{}\n", HEADER, good, bad_date, good));

        let report = DeclarationLoader::new().load_file(&mut conn, file.path());

        assert_eq!(report.rows_read, 3);
        assert_eq!(report.records_loaded, 1);
        assert_eq!(report.duplicates_skipped, 1);
        assert_eq!(report.rejected_rows(), 1);
        assert_eq!(count_declarations(&conn).unwrap(), 1);
    }

    #[test]
    fn test_report_serializes_to_json() {
        let mut conn = test_conn();
        let file = write_file(&format!(
            "{}\n{}\n",
            HEADER,
            data_row("COR001", "01/02/23", "widgets")
        ));

        let report = DeclarationLoader::new().load_file(&mut conn, file.path());
        let json = serde_json::to_string(&report).unwrap();

        assert!(json.contains("records_loaded"));
        assert!(json.contains("Committed"));
    }
}
