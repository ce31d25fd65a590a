use rusqlite::{Connection, Result};
use tracing::{debug, info};

/// SQLite schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    debug!("Current schema version: {}", current_version);

    if current_version < SCHEMA_VERSION {
        info!("Upgrading schema from v{} to v{}", current_version, SCHEMA_VERSION);
        apply_migrations(conn, current_version)?;
    }

    Ok(())
}

/// Apply migrations from current version to latest
fn apply_migrations(conn: &Connection, from_version: i32) -> Result<()> {
    for version in (from_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration v{}", version);
        match version {
            1 => create_v1_schema(conn)?,
            _ => unreachable!("Unknown schema version: {}", version),
        }

        conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    }

    Ok(())
}

/// Create v1 schema (initial schema)
fn create_v1_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            language_stats TEXT NOT NULL DEFAULT '{}',
            last_indexed INTEGER,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            path TEXT NOT NULL,
            relative_path TEXT NOT NULL,
            language TEXT NOT NULL,
            size INTEGER NOT NULL,
            lines_of_code INTEGER NOT NULL,
            hash TEXT NOT NULL,
            last_modified INTEGER NOT NULL,
            last_indexed INTEGER NOT NULL,
            UNIQUE(project_id, relative_path)
        );

        CREATE INDEX IF NOT EXISTS idx_files_relative_path ON files(relative_path);
        CREATE INDEX IF NOT EXISTS idx_files_language ON files(language);

        CREATE TABLE IF NOT EXISTS symbols (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            signature TEXT,
            documentation TEXT,
            visibility TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            start_column INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            end_column INTEGER NOT NULL,
            start_byte INTEGER NOT NULL,
            end_byte INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            status TEXT,
            priority INTEGER,
            assigned_agent TEXT,
            metadata TEXT NOT NULL DEFAULT '{}'
        );

        CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
        CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_id, start_line);
        CREATE INDEX IF NOT EXISTS idx_symbols_kind ON symbols(kind);

        CREATE TABLE IF NOT EXISTS imports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            file_path TEXT NOT NULL,
            import_path TEXT NOT NULL,
            alias TEXT,
            imported_names TEXT NOT NULL DEFAULT '[]',
            is_wildcard INTEGER NOT NULL DEFAULT 0,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_imports_file ON imports(file_id);

        CREATE TABLE IF NOT EXISTS relationships (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            type TEXT NOT NULL,
            source_symbol TEXT NOT NULL,
            target_symbol TEXT NOT NULL,
            source_symbol_id INTEGER REFERENCES symbols(id) ON DELETE SET NULL,
            target_symbol_id INTEGER REFERENCES symbols(id) ON DELETE SET NULL,
            file_path TEXT NOT NULL,
            line INTEGER NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}'
        );

        CREATE INDEX IF NOT EXISTS idx_relationships_source ON relationships(source_symbol, type);
        CREATE INDEX IF NOT EXISTS idx_relationships_target ON relationships(target_symbol, type);
        CREATE INDEX IF NOT EXISTS idx_relationships_source_id ON relationships(source_symbol_id);
        CREATE INDEX IF NOT EXISTS idx_relationships_target_id ON relationships(target_symbol_id);

        CREATE TABLE IF NOT EXISTS symbol_references (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            source_symbol_id INTEGER REFERENCES symbols(id) ON DELETE SET NULL,
            target_symbol_name TEXT NOT NULL,
            target_symbol_id INTEGER REFERENCES symbols(id) ON DELETE SET NULL,
            qualifier TEXT,
            reference_type TEXT NOT NULL,
            file_path TEXT NOT NULL,
            line INTEGER NOT NULL,
            column INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_references_target_name ON symbol_references(target_symbol_name);
        CREATE INDEX IF NOT EXISTS idx_references_target_id ON symbol_references(target_symbol_id);
        CREATE INDEX IF NOT EXISTS idx_references_file ON symbol_references(file_id);",
    )?;

    // External-content FTS table over symbols, kept in sync by triggers
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS symbols_fts USING fts5(
            name,
            signature,
            documentation,
            content='symbols',
            content_rowid='id'
        );

        CREATE TRIGGER IF NOT EXISTS symbols_fts_insert AFTER INSERT ON symbols
        BEGIN
            INSERT INTO symbols_fts(rowid, name, signature, documentation)
            VALUES (new.id, new.name, new.signature, new.documentation);
        END;

        CREATE TRIGGER IF NOT EXISTS symbols_fts_delete AFTER DELETE ON symbols
        BEGIN
            INSERT INTO symbols_fts(symbols_fts, rowid, name, signature, documentation)
            VALUES ('delete', old.id, old.name, old.signature, old.documentation);
        END;

        CREATE TRIGGER IF NOT EXISTS symbols_fts_update AFTER UPDATE ON symbols
        BEGIN
            INSERT INTO symbols_fts(symbols_fts, rowid, name, signature, documentation)
            VALUES ('delete', old.id, old.name, old.signature, old.documentation);
            INSERT INTO symbols_fts(rowid, name, signature, documentation)
            VALUES (new.id, new.name, new.signature, new.documentation);
        END;",
    )?;

    info!("v1 schema created successfully");

    Ok(())
}

/// Drop all tables (for rebuilding)
pub fn drop_schema(conn: &Connection) -> Result<()> {
    info!("Dropping all schema tables");

    conn.execute_batch(
        "DROP TRIGGER IF EXISTS symbols_fts_update;
         DROP TRIGGER IF EXISTS symbols_fts_delete;
         DROP TRIGGER IF EXISTS symbols_fts_insert;
         DROP TABLE IF EXISTS symbols_fts;
         DROP TABLE IF EXISTS symbol_references;
         DROP TABLE IF EXISTS relationships;
         DROP TABLE IF EXISTS imports;
         DROP TABLE IF EXISTS symbols;
         DROP TABLE IF EXISTS files;
         DROP TABLE IF EXISTS projects;
         DROP TABLE IF EXISTS schema_version;",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn table_names(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_init_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables = table_names(&conn);
        for expected in [
            "projects",
            "files",
            "symbols",
            "imports",
            "relationships",
            "symbol_references",
            "symbols_fts",
            "schema_version",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table {expected}");
        }
    }

    #[test]
    fn test_idempotent_init() {
        let conn = Connection::open_in_memory().unwrap();

        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let versions: i32 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[test]
    fn test_fts_follows_symbol_updates() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        conn.execute_batch(
            "INSERT INTO projects (path, name, created_at) VALUES ('/p', 'p', 0);
             INSERT INTO files (project_id, path, relative_path, language, size, lines_of_code, hash, last_modified, last_indexed)
                 VALUES (1, '/p/a.go', 'a.go', 'go', 1, 1, 'h', 0, 0);
             INSERT INTO symbols (file_id, name, kind, signature, visibility, start_line, start_column, end_line, end_column, start_byte, end_byte, content_hash)
                 VALUES (1, 'ParseConfig', 'function', 'func ParseConfig()', 'public', 1, 1, 2, 1, 0, 10, 'x');",
        )
        .unwrap();

        let hits = |term: &str| -> i64 {
            conn.query_row(
                "SELECT COUNT(*) FROM symbols_fts WHERE symbols_fts MATCH ?1",
                [term],
                |row| row.get(0),
            )
            .unwrap()
        };

        assert_eq!(hits("ParseConfig"), 1);

        conn.execute(
            "UPDATE symbols SET name = 'LoadConfig', signature = 'func LoadConfig()' WHERE id = 1",
            [],
        )
        .unwrap();
        assert_eq!(hits("ParseConfig"), 0);
        assert_eq!(hits("LoadConfig"), 1);

        conn.execute("DELETE FROM symbols WHERE id = 1", []).unwrap();
        assert_eq!(hits("LoadConfig"), 0);
    }

    #[test]
    fn test_drop_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        drop_schema(&conn).unwrap();

        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();

        assert_eq!(count, 0);
    }
}
