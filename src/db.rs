// 🗄️ Relational Store - SQLite schema + declaration persistence
// Five reference tables, one fact table. The natural-key hash column backs
// the duplicate check and is UNIQUE as a last line of defense.

use crate::error::IngestResult;
use crate::references::ReferenceKind;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

// ============================================================================
// FACT RECORD
// ============================================================================

/// One customs import declaration, fully resolved: dates parsed, numerics
/// normalized, reference values replaced by surrogate ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Declaration {
    pub correlativo: String,
    pub fecha_declaracion: NaiveDate,
    pub tipo_cambio_dolar: f64,
    pub descripcion: String,
    pub cantidad_fraccion: f64,
    pub tasa_dai: f64,
    pub valor_dai: f64,
    pub valor_cif_usd: f64,
    pub tasa_cif_cantidad_fraccion: f64,

    pub aduana_id: i64,
    pub pais_id: i64,
    pub tipo_regimen_id: i64,
    pub unidad_medida_id: i64,
    pub codigo_sac_id: i64,
}

impl Declaration {
    /// Hash of the record's natural key. The key is deliberately only
    /// `(correlativo, codigo_sac_id, descripcion)` — the source system
    /// treats rows as duplicates regardless of port or date.
    pub fn hash_natural_key(correlativo: &str, codigo_sac_id: i64, descripcion: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(correlativo.as_bytes());
        hasher.update([0u8]);
        hasher.update(codigo_sac_id.to_le_bytes());
        hasher.update([0u8]);
        hasher.update(descripcion.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn natural_key_hash(&self) -> String {
        Self::hash_natural_key(&self.correlativo, self.codigo_sac_id, &self.descripcion)
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> IngestResult<()> {
    // WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    for kind in ReferenceKind::ALL {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                {key} TEXT UNIQUE NOT NULL
            )",
            table = kind.table(),
            key = kind.key_column(),
        );
        conn.execute(&sql, [])?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS declaraciones_importacion (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            natural_key_hash TEXT UNIQUE NOT NULL,
            correlativo TEXT NOT NULL,
            fecha_declaracion TEXT NOT NULL,
            tipo_cambio_dolar REAL NOT NULL,
            descripcion TEXT NOT NULL,
            cantidad_fraccion REAL NOT NULL,
            tasa_dai REAL NOT NULL,
            valor_dai REAL NOT NULL,
            valor_cif_usd REAL NOT NULL,
            tasa_cif_cantidad_fraccion REAL NOT NULL,
            aduana_id INTEGER NOT NULL REFERENCES aduanas(id),
            pais_id INTEGER NOT NULL REFERENCES paises(id),
            tipo_regimen_id INTEGER NOT NULL REFERENCES tipos_regimen(id),
            unidad_medida_id INTEGER NOT NULL REFERENCES unidades_medida(id),
            codigo_sac_id INTEGER NOT NULL REFERENCES codigos_sac(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_declaraciones_correlativo
         ON declaraciones_importacion(correlativo)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_declaraciones_fecha
         ON declaraciones_importacion(fecha_declaracion)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// PERSISTENCE HELPERS
// ============================================================================

pub fn insert_declaration(conn: &Connection, declaration: &Declaration) -> IngestResult<()> {
    conn.execute(
        "INSERT INTO declaraciones_importacion (
            natural_key_hash, correlativo, fecha_declaracion, tipo_cambio_dolar,
            descripcion, cantidad_fraccion, tasa_dai, valor_dai, valor_cif_usd,
            tasa_cif_cantidad_fraccion,
            aduana_id, pais_id, tipo_regimen_id, unidad_medida_id, codigo_sac_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            declaration.natural_key_hash(),
            declaration.correlativo,
            declaration.fecha_declaracion.format("%Y-%m-%d").to_string(),
            declaration.tipo_cambio_dolar,
            declaration.descripcion,
            declaration.cantidad_fraccion,
            declaration.tasa_dai,
            declaration.valor_dai,
            declaration.valor_cif_usd,
            declaration.tasa_cif_cantidad_fraccion,
            declaration.aduana_id,
            declaration.pais_id,
            declaration.tipo_regimen_id,
            declaration.unidad_medida_id,
            declaration.codigo_sac_id,
        ],
    )?;
    Ok(())
}

/// Natural-key hashes of everything already persisted. The loader seeds its
/// staged-set with these so a re-run skips instead of re-inserting.
pub fn existing_natural_keys(conn: &Connection) -> IngestResult<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT natural_key_hash FROM declaraciones_importacion")?;
    let hashes = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(hashes)
}

pub fn count_declarations(conn: &Connection) -> IngestResult<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM declaraciones_importacion",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Fetch a declaration by its natural key.
pub fn find_declaration(
    conn: &Connection,
    correlativo: &str,
    codigo_sac_id: i64,
    descripcion: &str,
) -> IngestResult<Option<Declaration>> {
    let hash = Declaration::hash_natural_key(correlativo, codigo_sac_id, descripcion);

    let declaration = conn
        .query_row(
            "SELECT correlativo, fecha_declaracion, tipo_cambio_dolar, descripcion,
                    cantidad_fraccion, tasa_dai, valor_dai, valor_cif_usd,
                    tasa_cif_cantidad_fraccion,
                    aduana_id, pais_id, tipo_regimen_id, unidad_medida_id, codigo_sac_id
             FROM declaraciones_importacion
             WHERE natural_key_hash = ?1",
            params![hash],
            |row| {
                let fecha_text: String = row.get(1)?;
                let fecha_declaracion = NaiveDate::parse_from_str(&fecha_text, "%Y-%m-%d")
                    .map_err(|_| rusqlite::Error::InvalidQuery)?;

                Ok(Declaration {
                    correlativo: row.get(0)?,
                    fecha_declaracion,
                    tipo_cambio_dolar: row.get(2)?,
                    descripcion: row.get(3)?,
                    cantidad_fraccion: row.get(4)?,
                    tasa_dai: row.get(5)?,
                    valor_dai: row.get(6)?,
                    valor_cif_usd: row.get(7)?,
                    tasa_cif_cantidad_fraccion: row.get(8)?,
                    aduana_id: row.get(9)?,
                    pais_id: row.get(10)?,
                    tipo_regimen_id: row.get(11)?,
                    unidad_medida_id: row.get(12)?,
                    codigo_sac_id: row.get(13)?,
                })
            },
        )
        .optional()?;

    Ok(declaration)
}

// ============================================================================
// TESTS
// ============================================================================
