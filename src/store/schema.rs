//! Database schema for the SQLite store
//!
//! Records are stored as JSON documents; the columns beside `document` exist
//! for ownership scoping, filtering, ordering and version checks.

use rusqlite::Connection;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS workflows (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            scope TEXT,
            status TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            document TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_workflows_owner_status ON workflows(owner, status);
        CREATE INDEX IF NOT EXISTS idx_workflows_created ON workflows(created_at);

        CREATE TABLE IF NOT EXISTS executions (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            scope TEXT,
            status TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            document TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_executions_workflow ON executions(owner, scope);
        CREATE INDEX IF NOT EXISTS idx_executions_created ON executions(created_at);

        CREATE TABLE IF NOT EXISTS containers (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            scope TEXT,
            status TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            document TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_containers_owner ON containers(owner);

        CREATE TABLE IF NOT EXISTS integrations (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            scope TEXT,
            status TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            document TEXT NOT NULL,
            UNIQUE(owner, scope)
        );

        CREATE INDEX IF NOT EXISTS idx_integrations_owner ON integrations(owner);
        CREATE INDEX IF NOT EXISTS idx_integrations_status ON integrations(status);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert!(tables.contains(&"workflows".to_string()));
        assert!(tables.contains(&"executions".to_string()));
        assert!(tables.contains(&"containers".to_string()));
        assert!(tables.contains(&"integrations".to_string()));
    }

    #[test]
    fn test_init_schema_is_repeatable() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }
}
