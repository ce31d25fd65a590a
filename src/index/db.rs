use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use super::schema::{drop_schema, init_schema};
use super::{
    File, Import, Project, Range, Reference, ReferenceType, Relationship, RelationshipType, Symbol,
    SymbolKind, Visibility,
};

/// Type alias for connection pool
pub type ConnectionPool = Pool<SqliteConnectionManager>;

pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

pub(crate) const SYMBOL_COLUMNS: &str = "s.id, s.file_id, f.relative_path, s.name, s.kind, s.signature,
    s.documentation, s.visibility, s.start_line, s.start_column, s.end_line, s.end_column,
    s.start_byte, s.end_byte, s.content_hash, s.status, s.priority, s.assigned_agent, s.metadata";

const REFERENCE_COLUMNS: &str = "r.id, r.source_symbol_id, r.target_symbol_name, r.target_symbol_id,
    r.qualifier, r.reference_type, r.file_path, r.line, r.column";

const RELATIONSHIP_COLUMNS: &str = "r.id, r.type, r.source_symbol, r.target_symbol,
    r.source_symbol_id, r.target_symbol_id, r.file_path, r.line, r.metadata";

const IMPORT_COLUMNS: &str = "i.id, i.file_path, i.import_path, i.alias, i.imported_names,
    i.is_wildcard, i.start_line, i.end_line";

pub(crate) const FILE_COLUMNS: &str = "id, project_id, path, relative_path, language, size,
    lines_of_code, hash, last_modified, last_indexed";

pub(crate) const PROJECT_COLUMNS: &str =
    "id, path, name, language_stats, created_at, last_indexed";

/// Database connection manager
///
/// Reads go through the pool directly. Writes are owned by
/// [`crate::indexer::writer::StoreWriter`], which holds one pooled connection
/// for its whole lifetime.
#[derive(Clone)]
pub struct IndexDatabase {
    pool: ConnectionPool,
    db_path: PathBuf,
}

impl IndexDatabase {
    /// Create or open a database
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        info!("Opening database at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let manager = SqliteConnectionManager::file(&db_path).with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.busy_timeout(Duration::from_secs(5))?;
            // WAL lets analysis reads proceed while the writer holds a transaction
            conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .context("Failed to create connection pool")?;

        {
            let conn = pool.get().context("Failed to get connection")?;
            init_schema(&conn).context("Failed to initialize schema")?;
        }

        Ok(Self { pool, db_path })
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<PooledConnection> {
        self.pool.get().context("Failed to get connection from pool")
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Drop and recreate every table
    pub fn reset(&self) -> Result<()> {
        let conn = self.get_conn()?;
        drop_schema(&conn)?;
        init_schema(&conn)?;
        Ok(())
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        let conn = self.get_conn()?;
        let project = conn
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
                [id],
                row_to_project,
            )
            .optional()?;
        Ok(project)
    }

    pub fn get_project_by_path(&self, path: &str) -> Result<Option<Project>> {
        let conn = self.get_conn()?;
        let project = conn
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE path = ?1"),
                [path],
                row_to_project,
            )
            .optional()?;
        Ok(project)
    }

    pub fn get_file(&self, project_id: i64, relative_path: &str) -> Result<Option<File>> {
        let conn = self.get_conn()?;
        let file = conn
            .query_row(
                &format!(
                    "SELECT {FILE_COLUMNS} FROM files WHERE project_id = ?1 AND relative_path = ?2"
                ),
                params![project_id, relative_path],
                row_to_file,
            )
            .optional()?;
        Ok(file)
    }

    pub fn list_files(&self, project_id: i64) -> Result<Vec<File>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE project_id = ?1 ORDER BY relative_path"
        ))?;
        let files = stmt
            .query_map([project_id], row_to_file)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(files)
    }

    /// relative_path -> content hash for every file of a project
    pub fn file_hashes(&self, project_id: i64) -> Result<HashMap<String, String>> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT relative_path, hash FROM files WHERE project_id = ?1")?;
        let hashes = stmt
            .query_map([project_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(hashes)
    }

    /// Get symbol by ID
    pub fn get_symbol(&self, id: i64) -> Result<Option<Symbol>> {
        let conn = self.get_conn()?;
        let symbol = conn
            .query_row(
                &format!(
                    "SELECT {SYMBOL_COLUMNS} FROM symbols s JOIN files f ON f.id = s.file_id
                     WHERE s.id = ?1"
                ),
                [id],
                row_to_symbol,
            )
            .optional()?;
        Ok(symbol)
    }

    /// Find symbols by name across every indexed file
    pub fn find_symbols_by_name(&self, name: &str) -> Result<Vec<Symbol>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SYMBOL_COLUMNS} FROM symbols s JOIN files f ON f.id = s.file_id
             WHERE s.name = ?1 ORDER BY f.relative_path, s.start_line"
        ))?;
        let symbols = stmt
            .query_map([name], row_to_symbol)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(symbols)
    }

    /// Find symbols by file, ordered by start line
    pub fn find_symbols_by_file(&self, relative_path: &str) -> Result<Vec<Symbol>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SYMBOL_COLUMNS} FROM symbols s JOIN files f ON f.id = s.file_id
             WHERE f.relative_path = ?1 ORDER BY s.start_line, s.id"
        ))?;
        let symbols = stmt
            .query_map([relative_path], row_to_symbol)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(symbols)
    }

    pub fn symbols_for_project(&self, project_id: i64) -> Result<Vec<Symbol>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SYMBOL_COLUMNS} FROM symbols s JOIN files f ON f.id = s.file_id
             WHERE f.project_id = ?1 ORDER BY f.relative_path, s.start_line"
        ))?;
        let symbols = stmt
            .query_map([project_id], row_to_symbol)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(symbols)
    }

    /// Relationships whose source is the given symbol.
    ///
    /// With an id, edges resolved to that id match, and unresolved edges fall
    /// back to the name. Without one the lookup is purely by name.
    pub fn relationships_from(&self, name: &str, id: Option<i64>) -> Result<Vec<Relationship>> {
        self.query_relationships("source", name, id)
    }

    /// Relationships whose target is the given symbol
    pub fn relationships_to(&self, name: &str, id: Option<i64>) -> Result<Vec<Relationship>> {
        self.query_relationships("target", name, id)
    }

    fn query_relationships(
        &self,
        side: &str,
        name: &str,
        id: Option<i64>,
    ) -> Result<Vec<Relationship>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM relationships r
             WHERE (?2 IS NOT NULL AND r.{side}_symbol_id = ?2)
                OR ((?2 IS NULL OR r.{side}_symbol_id IS NULL) AND r.{side}_symbol = ?1)
             ORDER BY r.file_path, r.line, r.id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let relationships = stmt
            .query_map(params![name, id], row_to_relationship)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(relationships)
    }

    pub fn relationships_for_project(&self, project_id: i64) -> Result<Vec<Relationship>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM relationships r JOIN files f ON f.id = r.file_id
             WHERE f.project_id = ?1 ORDER BY r.file_path, r.line, r.id"
        ))?;
        let relationships = stmt
            .query_map([project_id], row_to_relationship)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(relationships)
    }

    /// References that point at the given symbol, by id when resolved and by
    /// name otherwise
    pub fn references_to(&self, name: &str, id: Option<i64>) -> Result<Vec<Reference>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {REFERENCE_COLUMNS} FROM symbol_references r
             WHERE (?2 IS NOT NULL AND r.target_symbol_id = ?2)
                OR ((?2 IS NULL OR r.target_symbol_id IS NULL) AND r.target_symbol_name = ?1)
             ORDER BY r.file_path, r.line, r.column"
        ))?;
        let references = stmt
            .query_map(params![name, id], row_to_reference)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(references)
    }

    pub fn references_for_project(&self, project_id: i64) -> Result<Vec<Reference>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {REFERENCE_COLUMNS} FROM symbol_references r JOIN files f ON f.id = r.file_id
             WHERE f.project_id = ?1 ORDER BY r.file_path, r.line, r.column"
        ))?;
        let references = stmt
            .query_map([project_id], row_to_reference)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(references)
    }

    pub fn imports_for_project(&self, project_id: i64) -> Result<Vec<Import>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {IMPORT_COLUMNS} FROM imports i JOIN files f ON f.id = i.file_id
             WHERE f.project_id = ?1 ORDER BY i.file_path, i.start_line"
        ))?;
        let imports = stmt
            .query_map([project_id], row_to_import)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(imports)
    }

    /// Full-text search over symbol name, signature and documentation
    pub fn search_symbols(&self, query: &str, limit: usize) -> Result<Vec<Symbol>> {
        let match_expr = fts_query(query);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SYMBOL_COLUMNS} FROM symbols_fts
             JOIN symbols s ON s.id = symbols_fts.rowid
             JOIN files f ON f.id = s.file_id
             WHERE symbols_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2"
        ))?;
        let symbols = stmt
            .query_map(params![match_expr, limit as i64], row_to_symbol)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(symbols)
    }

    /// Get index statistics
    pub fn get_stats(&self) -> Result<IndexStats> {
        let conn = self.get_conn()?;
        let count = |table: &str| -> Result<usize> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;
            Ok(n as usize)
        };

        Ok(IndexStats {
            total_projects: count("projects")?,
            total_files: count("files")?,
            total_symbols: count("symbols")?,
            total_imports: count("imports")?,
            total_relationships: count("relationships")?,
            total_references: count("symbol_references")?,
        })
    }

    /// (label, count) rows from a GROUP BY over one column
    pub fn group_counts(&self, table: &str, column: &str) -> Result<Vec<(String, usize)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {column}, COUNT(*) AS count FROM {table} GROUP BY {column} ORDER BY count DESC"
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// Index statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_projects: usize,
    pub total_files: usize,
    pub total_symbols: usize,
    pub total_imports: usize,
    pub total_relationships: usize,
    pub total_references: usize,
}

/// Quote every term and allow prefix matches, so user input never reaches
/// the FTS5 query parser as syntax
fn fts_query(input: &str) -> String {
    input
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\"*"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn invalid(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unknown {what}: {value}").into(),
    )
}

fn json_column(raw: Option<String>) -> serde_json::Value {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_else(|| serde_json::json!({}))
}

pub(crate) fn row_to_project(row: &Row) -> rusqlite::Result<Project> {
    let stats: String = row.get(3)?;
    let language_stats: BTreeMap<String, usize> =
        serde_json::from_str(&stats).unwrap_or_default();

    Ok(Project {
        id: row.get(0)?,
        path: row.get(1)?,
        name: row.get(2)?,
        language_stats,
        created_at: row.get(4)?,
        last_indexed: row.get(5)?,
    })
}

pub(crate) fn row_to_file(row: &Row) -> rusqlite::Result<File> {
    Ok(File {
        id: row.get(0)?,
        project_id: row.get(1)?,
        path: row.get(2)?,
        relative_path: row.get(3)?,
        language: row.get(4)?,
        size: row.get::<_, i64>(5)? as u64,
        lines_of_code: row.get::<_, i64>(6)? as usize,
        hash: row.get(7)?,
        last_modified: row.get(8)?,
        last_indexed: row.get(9)?,
    })
}

/// Convert database row to Symbol (expects [`SYMBOL_COLUMNS`])
pub(crate) fn row_to_symbol(row: &Row) -> rusqlite::Result<Symbol> {
    let kind_str: String = row.get(4)?;
    let visibility_str: String = row.get(7)?;

    Ok(Symbol {
        id: row.get(0)?,
        file_id: row.get(1)?,
        file_path: row.get(2)?,
        name: row.get(3)?,
        kind: SymbolKind::parse(&kind_str).ok_or_else(|| invalid(4, "symbol kind", &kind_str))?,
        signature: row.get(5)?,
        documentation: row.get(6)?,
        visibility: Visibility::parse(&visibility_str)
            .ok_or_else(|| invalid(7, "visibility", &visibility_str))?,
        range: Range {
            start_line: row.get::<_, i64>(8)? as usize,
            start_column: row.get::<_, i64>(9)? as usize,
            end_line: row.get::<_, i64>(10)? as usize,
            end_column: row.get::<_, i64>(11)? as usize,
            start_byte: row.get::<_, i64>(12)? as usize,
            end_byte: row.get::<_, i64>(13)? as usize,
        },
        content_hash: row.get(14)?,
        status: row.get(15)?,
        priority: row.get(16)?,
        assigned_agent: row.get(17)?,
        metadata: json_column(row.get(18)?),
    })
}

fn row_to_reference(row: &Row) -> rusqlite::Result<Reference> {
    let type_str: String = row.get(5)?;

    Ok(Reference {
        id: row.get(0)?,
        source_symbol_id: row.get(1)?,
        target_symbol_name: row.get(2)?,
        target_symbol_id: row.get(3)?,
        qualifier: row.get(4)?,
        reference_type: ReferenceType::parse(&type_str)
            .ok_or_else(|| invalid(5, "reference type", &type_str))?,
        file_path: row.get(6)?,
        line: row.get::<_, i64>(7)? as usize,
        column: row.get::<_, i64>(8)? as usize,
    })
}

/// Convert database row to Relationship
fn row_to_relationship(row: &Row) -> rusqlite::Result<Relationship> {
    let type_str: String = row.get(1)?;

    Ok(Relationship {
        id: row.get(0)?,
        kind: RelationshipType::parse(&type_str)
            .ok_or_else(|| invalid(1, "relationship type", &type_str))?,
        source_symbol: row.get(2)?,
        target_symbol: row.get(3)?,
        source_symbol_id: row.get(4)?,
        target_symbol_id: row.get(5)?,
        file_path: row.get(6)?,
        line: row.get::<_, i64>(7)? as usize,
        metadata: json_column(row.get(8)?),
    })
}

fn row_to_import(row: &Row) -> rusqlite::Result<Import> {
    let names: String = row.get(4)?;

    Ok(Import {
        id: row.get(0)?,
        file_path: row.get(1)?,
        path: row.get(2)?,
        alias: row.get(3)?,
        imported_names: serde_json::from_str(&names).unwrap_or_default(),
        is_wildcard: row.get(5)?,
        start_line: row.get::<_, i64>(6)? as usize,
        end_line: row.get::<_, i64>(7)? as usize,
    })
}

/// Get current timestamp in seconds
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let _db = IndexDatabase::new(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_stats_on_empty_database() {
        let dir = tempdir().unwrap();
        let db = IndexDatabase::new(dir.path().join("test.db")).unwrap();

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.total_symbols, 0);
        assert_eq!(stats.total_files, 0);
        assert_eq!(stats.total_relationships, 0);
        assert_eq!(stats.total_references, 0);
    }

    #[test]
    fn test_fts_query_quotes_terms() {
        assert_eq!(fts_query("parse config"), "\"parse\"* \"config\"*");
        assert_eq!(fts_query("a-b"), "\"a\"* \"b\"*");
        assert_eq!(fts_query("  ()  "), "");
    }

    #[test]
    fn test_reset_clears_data() {
        let dir = tempdir().unwrap();
        let db = IndexDatabase::new(dir.path().join("test.db")).unwrap();

        {
            let conn = db.get_conn().unwrap();
            conn.execute(
                "INSERT INTO projects (path, name, created_at) VALUES ('/p', 'p', 0)",
                [],
            )
            .unwrap();
        }
        assert_eq!(db.get_stats().unwrap().total_projects, 1);

        db.reset().unwrap();
        assert_eq!(db.get_stats().unwrap().total_projects, 0);
    }
}
