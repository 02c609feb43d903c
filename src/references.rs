// 🗂️ Reference Resolver - Dedup + upsert for the five lookup catalogs
// First sight of a natural key creates the entity; every later resolution,
// in this load or any later one, returns the same surrogate id.

use crate::error::IngestResult;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

// ============================================================================
// REFERENCE KINDS
// ============================================================================

/// The five reference catalogs a declaration points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceKind {
    /// Port of entry
    Aduana,
    /// Country of origin
    Pais,
    /// Import regime type
    TipoRegimen,
    /// Measurement unit
    UnidadMedida,
    /// Tariff code (SAC)
    CodigoSac,
}

impl ReferenceKind {
    pub const ALL: [ReferenceKind; 5] = [
        ReferenceKind::Aduana,
        ReferenceKind::Pais,
        ReferenceKind::TipoRegimen,
        ReferenceKind::UnidadMedida,
        ReferenceKind::CodigoSac,
    ];

    /// Column in the source file that carries this catalog's natural key.
    pub fn source_column(&self) -> &'static str {
        match self {
            ReferenceKind::Aduana => "aduana",
            ReferenceKind::Pais => "pais",
            ReferenceKind::TipoRegimen => "tipo_regimen",
            ReferenceKind::UnidadMedida => "tipo_unidad_medida",
            ReferenceKind::CodigoSac => "sac",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            ReferenceKind::Aduana => "aduanas",
            ReferenceKind::Pais => "paises",
            ReferenceKind::TipoRegimen => "tipos_regimen",
            ReferenceKind::UnidadMedida => "unidades_medida",
            ReferenceKind::CodigoSac => "codigos_sac",
        }
    }

    /// Natural-key column inside the catalog table.
    pub fn key_column(&self) -> &'static str {
        match self {
            ReferenceKind::CodigoSac => "codigo",
            _ => "nombre",
        }
    }
}

/// Rows currently persisted in one catalog. Useful for load summaries and
/// idempotency checks.
pub fn count_persisted(conn: &Connection, kind: ReferenceKind) -> IngestResult<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", kind.table());
    let count = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Natural key → surrogate id resolver with one cache per catalog.
///
/// All persistence goes through the caller's connection (normally an open
/// transaction), so creations commit or roll back with the rest of the load.
/// Lookup is exact-match on the key as received; no normalization happens at
/// this layer.
pub struct ReferenceResolver {
    caches: HashMap<ReferenceKind, HashMap<String, i64>>,
}

impl ReferenceResolver {
    pub fn new() -> Self {
        let mut caches = HashMap::new();
        for kind in ReferenceKind::ALL {
            caches.insert(kind, HashMap::new());
        }
        ReferenceResolver { caches }
    }

    /// Prime every cache from the already-persisted catalog rows.
    pub fn load_existing(&mut self, conn: &Connection) -> IngestResult<()> {
        for kind in ReferenceKind::ALL {
            let sql = format!("SELECT id, {} FROM {}", kind.key_column(), kind.table());
            let mut stmt = conn.prepare(&sql)?;
            let entries = stmt
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;

            let cache = self.caches.get_mut(&kind).expect("cache for every kind");
            for (id, key) in entries {
                cache.insert(key, id);
            }
        }
        Ok(())
    }

    /// Batch form: create whatever subset of `keys` is not yet known.
    /// Equivalent to resolving one key at a time. Returns how many new
    /// entities were created.
    pub fn ensure_all<'a, I>(
        &mut self,
        conn: &Connection,
        kind: ReferenceKind,
        keys: I,
    ) -> IngestResult<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut created = 0;
        for key in keys {
            if self.lookup(kind, key).is_none() {
                self.insert(conn, kind, key)?;
                created += 1;
            }
        }
        if created > 0 {
            debug!(catalog = kind.table(), created, "created reference entities");
        }
        Ok(created)
    }

    /// Resolve one key, creating the entity on first sight.
    pub fn resolve(&mut self, conn: &Connection, kind: ReferenceKind, key: &str) -> IngestResult<i64> {
        if let Some(id) = self.lookup(kind, key) {
            return Ok(id);
        }
        self.insert(conn, kind, key)
    }

    /// Cache-only lookup, used by the fact pass after the batch pass ran.
    pub fn lookup(&self, kind: ReferenceKind, key: &str) -> Option<i64> {
        self.caches.get(&kind).and_then(|cache| cache.get(key)).copied()
    }

    pub fn cached_count(&self, kind: ReferenceKind) -> usize {
        self.caches.get(&kind).map(|c| c.len()).unwrap_or(0)
    }

    fn insert(&mut self, conn: &Connection, kind: ReferenceKind, key: &str) -> IngestResult<i64> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES (?1)",
            kind.table(),
            kind.key_column()
        );
        conn.execute(&sql, params![key])?;
        let id = conn.last_insert_rowid();

        self.caches
            .get_mut(&kind)
            .expect("cache for every kind")
            .insert(key.to_string(), id);

        Ok(id)
    }
}

impl Default for ReferenceResolver {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let conn = test_conn();
        let mut resolver = ReferenceResolver::new();

        let first = resolver.resolve(&conn, ReferenceKind::Pais, "Honduras").unwrap();
        let second = resolver.resolve(&conn, ReferenceKind::Pais, "Honduras").unwrap();

        assert_eq!(first, second);
        assert_eq!(count_persisted(&conn, ReferenceKind::Pais).unwrap(), 1);
    }

    #[test]
    fn test_categories_are_independent() {
        let conn = test_conn();
        let mut resolver = ReferenceResolver::new();

        // The same string in two catalogs is two distinct entities.
        let as_country = resolver.resolve(&conn, ReferenceKind::Pais, "KG").unwrap();
        let as_unit = resolver
            .resolve(&conn, ReferenceKind::UnidadMedida, "KG")
            .unwrap();

        assert_eq!(count_persisted(&conn, ReferenceKind::Pais).unwrap(), 1);
        assert_eq!(count_persisted(&conn, ReferenceKind::UnidadMedida).unwrap(), 1);
        assert_eq!(resolver.lookup(ReferenceKind::Pais, "KG"), Some(as_country));
        assert_eq!(resolver.lookup(ReferenceKind::UnidadMedida, "KG"), Some(as_unit));
    }

    #[test]
    fn test_ensure_all_creates_only_missing() {
        let conn = test_conn();
        let mut resolver = ReferenceResolver::new();

        resolver.resolve(&conn, ReferenceKind::Aduana, "PuertoX").unwrap();

        let created = resolver
            .ensure_all(&conn, ReferenceKind::Aduana, ["PuertoX", "PuertoY", "PuertoZ"])
            .unwrap();

        assert_eq!(created, 2);
        assert_eq!(count_persisted(&conn, ReferenceKind::Aduana).unwrap(), 3);
    }

    #[test]
    fn test_load_existing_sees_prior_loads() {
        let conn = test_conn();

        {
            let mut first_load = ReferenceResolver::new();
            first_load
                .resolve(&conn, ReferenceKind::CodigoSac, "1234")
                .unwrap();
        }

        // A fresh resolver (a later load) must reuse the persisted id.
        let mut second_load = ReferenceResolver::new();
        second_load.load_existing(&conn).unwrap();

        assert_eq!(second_load.cached_count(ReferenceKind::CodigoSac), 1);
        let created = second_load
            .ensure_all(&conn, ReferenceKind::CodigoSac, ["1234"])
            .unwrap();
        assert_eq!(created, 0);
        assert_eq!(count_persisted(&conn, ReferenceKind::CodigoSac).unwrap(), 1);
    }

    #[test]
    fn test_lookup_is_exact_match() {
        let conn = test_conn();
        let mut resolver = ReferenceResolver::new();

        resolver.resolve(&conn, ReferenceKind::Pais, "Perú").unwrap();

        // Case and diacritics matter at this layer.
        assert!(resolver.lookup(ReferenceKind::Pais, "peru").is_none());
        assert!(resolver.lookup(ReferenceKind::Pais, "Peru").is_none());
        assert!(resolver.lookup(ReferenceKind::Pais, "Perú").is_some());
    }
}
