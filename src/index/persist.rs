//! Write paths of the symbol store.
//!
//! Every function here takes the connection owned by the writer actor
//! ([`crate::indexer::writer::StoreWriter`]); nothing else writes to the
//! database. `persist_file` wraps one file in one transaction.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::db::{now, row_to_project, PROJECT_COLUMNS};
use super::{File, ParseResult, Project, Range, Symbol};

/// Counters for what a write actually touched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteStats {
    pub files_written: usize,
    pub symbols_inserted: usize,
    pub symbols_updated: usize,
    pub symbols_unchanged: usize,
    /// Unchanged content whose position in the file shifted
    pub symbols_moved: usize,
    pub symbols_removed: usize,
    pub imports_written: usize,
    pub relationships_written: usize,
    pub references_written: usize,
}

impl WriteStats {
    /// Rows inserted or rewritten in the symbols table
    pub fn symbols_written(&self) -> usize {
        self.symbols_inserted + self.symbols_updated
    }

    pub fn merge(&mut self, other: &WriteStats) {
        self.files_written += other.files_written;
        self.symbols_inserted += other.symbols_inserted;
        self.symbols_updated += other.symbols_updated;
        self.symbols_unchanged += other.symbols_unchanged;
        self.symbols_moved += other.symbols_moved;
        self.symbols_removed += other.symbols_removed;
        self.imports_written += other.imports_written;
        self.relationships_written += other.relationships_written;
        self.references_written += other.references_written;
    }
}

/// Workflow metadata carried on a symbol, never parsed from source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolWorkflow {
    pub status: Option<String>,
    pub priority: Option<i64>,
    pub assigned_agent: Option<String>,
}

/// Insert the project row if missing and return it
pub fn upsert_project(conn: &Connection, path: &str, name: &str) -> Result<Project> {
    conn.execute(
        "INSERT INTO projects (path, name, created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(path) DO UPDATE SET name = excluded.name",
        params![path, name, now()],
    )?;

    let project = conn.query_row(
        &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE path = ?1"),
        [path],
        row_to_project,
    )?;
    Ok(project)
}

/// Persist one parsed file inside its own transaction.
///
/// The file row is upserted on (project_id, relative_path). Symbols are
/// matched against the stored ones by (name, kind) in source order; a matched
/// symbol whose content hash is unchanged is not written at all.
pub fn persist_file(
    conn: &mut Connection,
    project_id: i64,
    file: &File,
    parsed: &ParseResult,
) -> Result<WriteStats> {
    let tx = conn.transaction()?;
    let mut stats = WriteStats {
        files_written: 1,
        ..Default::default()
    };

    let file_id = upsert_file(&tx, project_id, file)?;
    let local_ids = sync_symbols(&tx, file_id, &parsed.symbols, &mut stats)?;

    tx.execute("DELETE FROM imports WHERE file_id = ?1", [file_id])?;
    tx.execute("DELETE FROM relationships WHERE file_id = ?1", [file_id])?;
    tx.execute("DELETE FROM symbol_references WHERE file_id = ?1", [file_id])?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO imports (file_id, file_path, import_path, alias, imported_names,
                                  is_wildcard, start_line, end_line)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for import in &parsed.imports {
            stmt.execute(params![
                file_id,
                file.relative_path,
                import.path,
                import.alias,
                serde_json::to_string(&import.imported_names)?,
                import.is_wildcard,
                import.start_line as i64,
                import.end_line as i64,
            ])?;
            stats.imports_written += 1;
        }
    }

    let mut resolver = NameResolver::new(&tx, project_id, &local_ids);

    for rel in &parsed.relationships {
        let source_id = resolver.resolve(&rel.source_symbol)?;
        let target_id = resolver.resolve(&rel.target_symbol)?;
        tx.execute(
            "INSERT INTO relationships (file_id, type, source_symbol, target_symbol,
                                        source_symbol_id, target_symbol_id, file_path, line, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                file_id,
                rel.kind.as_str(),
                rel.source_symbol,
                rel.target_symbol,
                source_id,
                target_id,
                file.relative_path,
                rel.line as i64,
                rel.metadata.to_string(),
            ],
        )?;
        stats.relationships_written += 1;
    }

    for reference in &parsed.references {
        let source_id = reference
            .source_symbol
            .as_deref()
            .and_then(|name| local_ids.get(name).copied());
        let target_id = resolver.resolve(&reference.target_symbol_name)?;
        tx.execute(
            "INSERT INTO symbol_references (file_id, source_symbol_id, target_symbol_name,
                                            target_symbol_id, qualifier, reference_type,
                                            file_path, line, column)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                file_id,
                source_id,
                reference.target_symbol_name,
                target_id,
                reference.qualifier,
                reference.reference_type.as_str(),
                file.relative_path,
                reference.line as i64,
                reference.column as i64,
            ],
        )?;
        stats.references_written += 1;
    }

    tx.commit()?;

    debug!(
        "Persisted {}: {} inserted, {} updated, {} unchanged, {} removed",
        file.relative_path,
        stats.symbols_inserted,
        stats.symbols_updated,
        stats.symbols_unchanged,
        stats.symbols_removed
    );

    Ok(stats)
}

fn upsert_file(tx: &Transaction, project_id: i64, file: &File) -> Result<i64> {
    let file_id = tx.query_row(
        "INSERT INTO files (project_id, path, relative_path, language, size, lines_of_code,
                            hash, last_modified, last_indexed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(project_id, relative_path) DO UPDATE SET
            path = excluded.path,
            language = excluded.language,
            size = excluded.size,
            lines_of_code = excluded.lines_of_code,
            hash = excluded.hash,
            last_modified = excluded.last_modified,
            last_indexed = excluded.last_indexed
         RETURNING id",
        params![
            project_id,
            file.path,
            file.relative_path,
            file.language,
            file.size as i64,
            file.lines_of_code as i64,
            file.hash,
            file.last_modified,
            now(),
        ],
        |row| row.get(0),
    )?;
    Ok(file_id)
}

/// Reconcile stored symbols of a file with freshly parsed ones.
/// Returns name -> id for the file, first declaration wins.
fn sync_symbols(
    tx: &Transaction,
    file_id: i64,
    symbols: &[Symbol],
    stats: &mut WriteStats,
) -> Result<HashMap<String, i64>> {
    let mut existing: HashMap<(String, String), VecDeque<(i64, String, Range)>> = HashMap::new();
    {
        let mut stmt = tx.prepare(
            "SELECT id, name, kind, content_hash, start_line, start_column, end_line, end_column,
                    start_byte, end_byte
             FROM symbols WHERE file_id = ?1
             ORDER BY start_line, id",
        )?;
        let rows = stmt.query_map([file_id], |row| {
            let range = Range {
                start_line: row.get::<_, i64>(4)? as usize,
                start_column: row.get::<_, i64>(5)? as usize,
                end_line: row.get::<_, i64>(6)? as usize,
                end_column: row.get::<_, i64>(7)? as usize,
                start_byte: row.get::<_, i64>(8)? as usize,
                end_byte: row.get::<_, i64>(9)? as usize,
            };
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                range,
            ))
        })?;
        for row in rows {
            let (id, name, kind, hash, range) = row?;
            existing.entry((name, kind)).or_default().push_back((id, hash, range));
        }
    }

    let mut local_ids = HashMap::new();

    for symbol in symbols {
        let key = (symbol.name.clone(), symbol.kind.as_str().to_string());
        let matched = existing.get_mut(&key).and_then(|queue| queue.pop_front());

        let id = match matched {
            Some((id, hash, range)) if hash == symbol.content_hash => {
                if range == symbol.range {
                    stats.symbols_unchanged += 1;
                } else {
                    move_symbol(tx, id, &symbol.range)?;
                    stats.symbols_moved += 1;
                }
                id
            }
            Some((id, _, _)) => {
                update_symbol(tx, id, symbol)?;
                stats.symbols_updated += 1;
                id
            }
            None => {
                let id = insert_symbol(tx, file_id, symbol)?;
                stats.symbols_inserted += 1;
                id
            }
        };

        local_ids.entry(symbol.name.clone()).or_insert(id);
    }

    for (id, _, _) in existing.into_values().flatten() {
        tx.execute("DELETE FROM symbols WHERE id = ?1", [id])?;
        stats.symbols_removed += 1;
    }

    Ok(local_ids)
}

fn insert_symbol(tx: &Transaction, file_id: i64, symbol: &Symbol) -> Result<i64> {
    tx.execute(
        "INSERT INTO symbols (file_id, name, kind, signature, documentation, visibility,
                              start_line, start_column, end_line, end_column, start_byte, end_byte,
                              content_hash, status, priority, assigned_agent, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            file_id,
            symbol.name,
            symbol.kind.as_str(),
            symbol.signature,
            symbol.documentation,
            symbol.visibility.as_str(),
            symbol.range.start_line as i64,
            symbol.range.start_column as i64,
            symbol.range.end_line as i64,
            symbol.range.end_column as i64,
            symbol.range.start_byte as i64,
            symbol.range.end_byte as i64,
            symbol.content_hash,
            symbol.status,
            symbol.priority,
            symbol.assigned_agent,
            symbol.metadata.to_string(),
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

/// Shift a symbol whose content is unchanged to its new position
fn move_symbol(tx: &Transaction, id: i64, range: &Range) -> Result<()> {
    tx.execute(
        "UPDATE symbols SET start_line = ?2, start_column = ?3, end_line = ?4, end_column = ?5,
                start_byte = ?6, end_byte = ?7
         WHERE id = ?1",
        params![
            id,
            range.start_line as i64,
            range.start_column as i64,
            range.end_line as i64,
            range.end_column as i64,
            range.start_byte as i64,
            range.end_byte as i64,
        ],
    )?;
    Ok(())
}

/// Rewrite the parsed columns of a symbol; workflow columns are left alone
fn update_symbol(tx: &Transaction, id: i64, symbol: &Symbol) -> Result<()> {
    tx.execute(
        "UPDATE symbols SET signature = ?2, documentation = ?3, visibility = ?4,
                start_line = ?5, start_column = ?6, end_line = ?7, end_column = ?8,
                start_byte = ?9, end_byte = ?10, content_hash = ?11, metadata = ?12
         WHERE id = ?1",
        params![
            id,
            symbol.signature,
            symbol.documentation,
            symbol.visibility.as_str(),
            symbol.range.start_line as i64,
            symbol.range.start_column as i64,
            symbol.range.end_line as i64,
            symbol.range.end_column as i64,
            symbol.range.start_byte as i64,
            symbol.range.end_byte as i64,
            symbol.content_hash,
            symbol.metadata.to_string(),
        ],
    )?;
    Ok(())
}

/// Resolves edge endpoints to symbol ids: same-file declarations first, then a
/// project-wide name that maps to exactly one symbol. Ambiguous or unknown
/// names stay unresolved and fall back to name matching at query time.
struct NameResolver<'a> {
    tx: &'a Transaction<'a>,
    project_id: i64,
    local: &'a HashMap<String, i64>,
    cache: HashMap<String, Option<i64>>,
}

impl<'a> NameResolver<'a> {
    fn new(tx: &'a Transaction<'a>, project_id: i64, local: &'a HashMap<String, i64>) -> Self {
        Self {
            tx,
            project_id,
            local,
            cache: HashMap::new(),
        }
    }

    fn resolve(&mut self, name: &str) -> Result<Option<i64>> {
        if let Some(id) = self.local.get(name) {
            return Ok(Some(*id));
        }
        if let Some(cached) = self.cache.get(name) {
            return Ok(*cached);
        }
        let resolved = unique_symbol_id(self.tx, self.project_id, name)?;
        self.cache.insert(name.to_string(), resolved);
        Ok(resolved)
    }
}

fn unique_symbol_id(conn: &Connection, project_id: i64, name: &str) -> Result<Option<i64>> {
    let mut stmt = conn.prepare_cached(
        "SELECT s.id FROM symbols s JOIN files f ON f.id = s.file_id
         WHERE f.project_id = ?1 AND s.name = ?2 LIMIT 2",
    )?;
    let ids = stmt
        .query_map(params![project_id, name], |row| row.get::<_, i64>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(match ids.as_slice() {
        [id] => Some(*id),
        _ => None,
    })
}

/// Delete a file and, through cascades, everything it owns
pub fn remove_file(conn: &Connection, project_id: i64, relative_path: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM files WHERE project_id = ?1 AND relative_path = ?2",
        params![project_id, relative_path],
    )?;
    Ok(deleted > 0)
}

/// Delete every file of the project that is not in `keep`
pub fn prune_files(conn: &mut Connection, project_id: i64, keep: &HashSet<String>) -> Result<usize> {
    let tx = conn.transaction()?;
    let stale: Vec<String> = {
        let mut stmt = tx.prepare("SELECT relative_path FROM files WHERE project_id = ?1")?;
        let paths = stmt
            .query_map([project_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        paths.into_iter().filter(|p| !keep.contains(p)).collect()
    };

    for path in &stale {
        debug!("Pruning vanished file {}", path);
        tx.execute(
            "DELETE FROM files WHERE project_id = ?1 AND relative_path = ?2",
            params![project_id, path],
        )?;
    }
    tx.commit()?;

    Ok(stale.len())
}

/// Bring edge ids in line with the current symbol set. Ids pointing into
/// another file whose name is no longer unique are cleared, then every
/// unresolved id whose name now has exactly one definition is filled in.
/// The result does not depend on the order files were written in.
pub fn resolve_links(conn: &mut Connection, project_id: i64) -> Result<usize> {
    const NAME_COUNT: &str = "(SELECT COUNT(*) FROM symbols s JOIN files f ON f.id = s.file_id
          WHERE f.project_id = ?1 AND s.name = {col})";
    const UNIQUE_MATCH: &str = "(SELECT CASE WHEN COUNT(*) = 1 THEN MIN(s.id) END
          FROM symbols s JOIN files f ON f.id = s.file_id
          WHERE f.project_id = ?1 AND s.name = {col})";

    let tx = conn.transaction()?;
    let mut cleared = 0;
    let mut updated = 0;

    for (table, id_col, name_col) in [
        ("symbol_references", "target_symbol_id", "target_symbol_name"),
        ("relationships", "target_symbol_id", "target_symbol"),
        ("relationships", "source_symbol_id", "source_symbol"),
    ] {
        let column = format!("{table}.{name_col}");
        let count = NAME_COUNT.replace("{col}", &column);
        let lookup = UNIQUE_MATCH.replace("{col}", &column);

        // Same-file definitions always win, so only cross-file ids are cleared
        cleared += tx.execute(
            &format!(
                "UPDATE {table} SET {id_col} = NULL
                 WHERE {id_col} IS NOT NULL
                   AND file_id IN (SELECT id FROM files WHERE project_id = ?1)
                   AND (SELECT s.file_id FROM symbols s WHERE s.id = {table}.{id_col}) IS NOT {table}.file_id
                   AND {count} > 1"
            ),
            [project_id],
        )?;

        updated += tx.execute(
            &format!(
                "UPDATE {table} SET {id_col} = {lookup}
                 WHERE {id_col} IS NULL
                   AND file_id IN (SELECT id FROM files WHERE project_id = ?1)
                   AND {lookup} IS NOT NULL"
            ),
            [project_id],
        )?;
    }

    tx.commit()?;
    if cleared > 0 {
        debug!("Cleared {} links to names that are no longer unique", cleared);
    }
    Ok(updated)
}

/// Recompute language stats from the current file set and stamp last_indexed
pub fn refresh_project_stats(conn: &Connection, project_id: i64) -> Result<Project> {
    let mut stmt = conn.prepare(
        "SELECT language, COUNT(*) FROM files WHERE project_id = ?1 GROUP BY language",
    )?;
    let language_stats = stmt
        .query_map([project_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?
        .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;
    drop(stmt);

    conn.execute(
        "UPDATE projects SET language_stats = ?2, last_indexed = ?3 WHERE id = ?1",
        params![project_id, serde_json::to_string(&language_stats)?, now()],
    )?;

    let project = conn
        .query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
            [project_id],
            row_to_project,
        )
        .optional()?
        .with_context(|| format!("project {project_id} vanished during stats refresh"))?;
    Ok(project)
}

/// Set workflow metadata on a symbol; returns false when the id is unknown
pub fn update_symbol_workflow(conn: &Connection, symbol_id: i64, workflow: &SymbolWorkflow) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE symbols SET status = ?2, priority = ?3, assigned_agent = ?4 WHERE id = ?1",
        params![symbol_id, workflow.status, workflow.priority, workflow.assigned_agent],
    )?;
    Ok(changed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::db::IndexDatabase;
    use crate::index::{
        ExtractedReference, Range, ReferenceType, Relationship, RelationshipType, SymbolKind,
    };
    use tempfile::tempdir;

    fn file(project_id: i64, rel: &str, hash: &str) -> File {
        File {
            id: 0,
            project_id,
            path: format!("/proj/{rel}"),
            relative_path: rel.to_string(),
            language: "go".to_string(),
            size: 10,
            lines_of_code: 3,
            hash: hash.to_string(),
            last_modified: 0,
            last_indexed: 0,
        }
    }

    fn symbol(name: &str, hash: &str, start: usize, end: usize) -> Symbol {
        let mut s = Symbol::new(
            name,
            SymbolKind::Function,
            "a.go",
            Range {
                start_line: start,
                end_line: end,
                ..Default::default()
            },
        );
        s.content_hash = hash.to_string();
        s
    }

    fn setup() -> (tempfile::TempDir, IndexDatabase, Project) {
        let dir = tempdir().unwrap();
        let db = IndexDatabase::new(dir.path().join("test.db")).unwrap();
        let project = upsert_project(&db.get_conn().unwrap(), "/proj", "proj").unwrap();
        (dir, db, project)
    }

    #[test]
    fn test_persist_is_hash_gated() {
        let (_dir, db, project) = setup();
        let mut conn = db.get_conn().unwrap();

        let parsed = ParseResult {
            symbols: vec![symbol("Foo", "h1", 1, 3), symbol("Bar", "h2", 5, 7)],
            ..Default::default()
        };

        let first = persist_file(&mut conn, project.id, &file(project.id, "a.go", "f1"), &parsed).unwrap();
        assert_eq!(first.symbols_inserted, 2);
        assert_eq!(first.symbols_written(), 2);

        let second = persist_file(&mut conn, project.id, &file(project.id, "a.go", "f1"), &parsed).unwrap();
        assert_eq!(second.symbols_written(), 0);
        assert_eq!(second.symbols_unchanged, 2);

        let changed = ParseResult {
            symbols: vec![symbol("Foo", "h1-changed", 1, 4)],
            ..Default::default()
        };
        let third = persist_file(&mut conn, project.id, &file(project.id, "a.go", "f2"), &changed).unwrap();
        assert_eq!(third.symbols_updated, 1);
        assert_eq!(third.symbols_removed, 1);

        // Same file path never duplicates
        assert_eq!(db.list_files(project.id).unwrap().len(), 1);
        assert_eq!(db.find_symbols_by_file("a.go").unwrap().len(), 1);
    }

    #[test]
    fn test_workflow_survives_content_update() {
        let (_dir, db, project) = setup();
        let mut conn = db.get_conn().unwrap();

        let parsed = ParseResult {
            symbols: vec![symbol("Foo", "h1", 1, 3)],
            ..Default::default()
        };
        persist_file(&mut conn, project.id, &file(project.id, "a.go", "f1"), &parsed).unwrap();
        let id = db.find_symbols_by_name("Foo").unwrap()[0].id;

        let workflow = SymbolWorkflow {
            status: Some("in_progress".to_string()),
            priority: Some(2),
            assigned_agent: Some("agent-7".to_string()),
        };
        assert!(update_symbol_workflow(&conn, id, &workflow).unwrap());

        let changed = ParseResult {
            symbols: vec![symbol("Foo", "h9", 1, 3)],
            ..Default::default()
        };
        persist_file(&mut conn, project.id, &file(project.id, "a.go", "f2"), &changed).unwrap();

        let stored = db.get_symbol(id).unwrap().unwrap();
        assert_eq!(stored.content_hash, "h9");
        assert_eq!(stored.status.as_deref(), Some("in_progress"));
        assert_eq!(stored.assigned_agent.as_deref(), Some("agent-7"));
    }

    #[test]
    fn test_links_resolve_after_definition_arrives() {
        let (_dir, db, project) = setup();
        let mut conn = db.get_conn().unwrap();

        // Caller written before the callee's file exists
        let caller = ParseResult {
            symbols: vec![symbol("main", "m", 1, 5)],
            relationships: vec![Relationship::new(RelationshipType::Calls, "main", "Foo", "b.go", 2)],
            references: vec![ExtractedReference {
                source_symbol: Some("main".to_string()),
                target_symbol_name: "Foo".to_string(),
                qualifier: None,
                reference_type: ReferenceType::Call,
                line: 2,
                column: 5,
            }],
            ..Default::default()
        };
        persist_file(&mut conn, project.id, &file(project.id, "b.go", "fb"), &caller).unwrap();
        assert!(db.references_to("Foo", None).unwrap()[0].target_symbol_id.is_none());

        let callee = ParseResult {
            symbols: vec![symbol("Foo", "f", 1, 3)],
            ..Default::default()
        };
        persist_file(&mut conn, project.id, &file(project.id, "a.go", "fa"), &callee).unwrap();

        let resolved = resolve_links(&mut conn, project.id).unwrap();
        assert_eq!(resolved, 2);

        let foo = &db.find_symbols_by_name("Foo").unwrap()[0];
        let refs = db.references_to("Foo", Some(foo.id)).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].target_symbol_id, Some(foo.id));
        assert!(refs[0].source_symbol_id.is_some());
    }

    #[test]
    fn test_links_clear_when_name_becomes_ambiguous() {
        let (_dir, db, project) = setup();
        let mut conn = db.get_conn().unwrap();

        let callee = ParseResult {
            symbols: vec![symbol("Foo", "f", 1, 3)],
            ..Default::default()
        };
        persist_file(&mut conn, project.id, &file(project.id, "a.go", "fa"), &callee).unwrap();

        let caller = ParseResult {
            symbols: vec![symbol("main", "m", 1, 5)],
            relationships: vec![Relationship::new(RelationshipType::Calls, "main", "Foo", "b.go", 2)],
            references: vec![ExtractedReference {
                source_symbol: Some("main".to_string()),
                target_symbol_name: "Foo".to_string(),
                qualifier: None,
                reference_type: ReferenceType::Call,
                line: 2,
                column: 5,
            }],
            ..Default::default()
        };
        persist_file(&mut conn, project.id, &file(project.id, "b.go", "fb"), &caller).unwrap();
        assert!(db.references_to("Foo", None).unwrap()[0].target_symbol_id.is_some());

        persist_file(&mut conn, project.id, &file(project.id, "c.go", "fc"), &callee).unwrap();
        resolve_links(&mut conn, project.id).unwrap();

        let refs = db.references_to("Foo", None).unwrap();
        assert_eq!(refs.len(), 1);
        assert!(refs[0].target_symbol_id.is_none());
        let rels = db.relationships_from("main", None).unwrap();
        assert!(rels[0].target_symbol_id.is_none());
        // The caller's own id is a same-file definition and stays
        assert!(rels[0].source_symbol_id.is_some());

        // Back to one definition: the link comes back
        assert!(remove_file(&conn, project.id, "c.go").unwrap());
        assert_eq!(resolve_links(&mut conn, project.id).unwrap(), 2);
        assert!(db.references_to("Foo", None).unwrap()[0].target_symbol_id.is_some());
    }

    #[test]
    fn test_moved_symbol_updates_position_only() {
        let (_dir, db, project) = setup();
        let mut conn = db.get_conn().unwrap();

        let parsed = ParseResult {
            symbols: vec![symbol("Foo", "h1", 3, 5)],
            ..Default::default()
        };
        persist_file(&mut conn, project.id, &file(project.id, "a.go", "f1"), &parsed).unwrap();

        let shifted = ParseResult {
            symbols: vec![symbol("Foo", "h1", 6, 8)],
            ..Default::default()
        };
        let stats = persist_file(&mut conn, project.id, &file(project.id, "a.go", "f2"), &shifted).unwrap();
        assert_eq!(stats.symbols_written(), 0);
        assert_eq!(stats.symbols_moved, 1);
        assert_eq!(stats.symbols_unchanged, 0);

        let stored = &db.find_symbols_by_name("Foo").unwrap()[0];
        assert_eq!((stored.range.start_line, stored.range.end_line), (6, 8));
    }

    #[test]
    fn test_remove_and_prune_cascade() {
        let (_dir, db, project) = setup();
        let mut conn = db.get_conn().unwrap();

        let parsed = ParseResult {
            symbols: vec![symbol("Foo", "h1", 1, 3)],
            ..Default::default()
        };
        persist_file(&mut conn, project.id, &file(project.id, "a.go", "f1"), &parsed).unwrap();
        persist_file(&mut conn, project.id, &file(project.id, "b.go", "f2"), &parsed).unwrap();

        assert!(remove_file(&conn, project.id, "a.go").unwrap());
        assert!(!remove_file(&conn, project.id, "a.go").unwrap());

        let keep = HashSet::new();
        assert_eq!(prune_files(&mut conn, project.id, &keep).unwrap(), 1);
        assert_eq!(db.get_stats().unwrap().total_symbols, 0);
    }

    #[test]
    fn test_refresh_project_stats_recomputes() {
        let (_dir, db, project) = setup();
        let mut conn = db.get_conn().unwrap();

        let parsed = ParseResult::default();
        persist_file(&mut conn, project.id, &file(project.id, "a.go", "1"), &parsed).unwrap();
        persist_file(&mut conn, project.id, &file(project.id, "b.go", "2"), &parsed).unwrap();

        let refreshed = refresh_project_stats(&conn, project.id).unwrap();
        assert_eq!(refreshed.language_stats.get("go"), Some(&2));
        assert!(refreshed.last_indexed.is_some());
    }
}
