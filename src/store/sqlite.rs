//! SQLite-backed store

use super::record::{Record, sort_key};
use super::schema::init_schema;
use super::{Page, Store, StoreError, WorkflowQuery};
use crate::model::{Execution, Integration, McpContainer, Workflow};
use async_trait::async_trait;
use rusqlite::types::ToSql;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params_from_iter};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Store backed by a single SQLite connection.
///
/// Statements are short and run inline; the connection mutex is never held
/// across an await point.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a database file
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // a panic mid-statement leaves nothing half-written in SQLite
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert<R: Record>(&self, record: &R) -> Result<(), StoreError> {
        let document = serde_json::to_string(record)?;
        let result = self.conn().execute(
            &format!(
                "INSERT INTO {} (id, owner, scope, status, version, created_at, document)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                R::TABLE
            ),
            (
                record.id(),
                record.owner(),
                record.scope(),
                record.status(),
                record.version() as i64,
                sort_key(record.created_at()),
                &document,
            ),
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::AlreadyExists(format!(
                    "{} {}",
                    singular::<R>(),
                    record.scope().unwrap_or(record.id())
                )))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn get<R: Record>(&self, owner: &str, id: &str) -> Result<R, StoreError> {
        let document: Option<String> = self
            .conn()
            .query_row(
                &format!(
                    "SELECT document FROM {} WHERE id = ?1 AND owner = ?2",
                    R::TABLE
                ),
                (id, owner),
                |row| row.get(0),
            )
            .optional()?;

        match document {
            Some(doc) => Ok(serde_json::from_str(&doc)?),
            None => Err(not_found::<R>(id)),
        }
    }

    fn update<R: Record>(&self, record: &R) -> Result<u64, StoreError> {
        let expected = record.version();
        let mut next = record.clone();
        next.set_version(expected + 1);
        let document = serde_json::to_string(&next)?;

        let conn = self.conn();
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET scope = ?1, status = ?2, version = ?3, document = ?4
                 WHERE id = ?5 AND owner = ?6 AND version = ?7",
                R::TABLE
            ),
            (
                record.scope(),
                record.status(),
                (expected + 1) as i64,
                &document,
                record.id(),
                record.owner(),
                expected as i64,
            ),
        )?;

        if changed == 0 {
            let actual: Option<i64> = conn
                .query_row(
                    &format!(
                        "SELECT version FROM {} WHERE id = ?1 AND owner = ?2",
                        R::TABLE
                    ),
                    (record.id(), record.owner()),
                    |row| row.get(0),
                )
                .optional()?;

            return Err(match actual {
                Some(actual) => StoreError::Conflict {
                    id: record.id().to_string(),
                    expected,
                    actual: actual as u64,
                },
                None => not_found::<R>(record.id()),
            });
        }

        Ok(expected + 1)
    }

    fn delete<R: Record>(&self, owner: &str, id: &str) -> Result<(), StoreError> {
        let changed = self.conn().execute(
            &format!("DELETE FROM {} WHERE id = ?1 AND owner = ?2", R::TABLE),
            (id, owner),
        )?;
        if changed == 0 {
            return Err(not_found::<R>(id));
        }
        Ok(())
    }

    /// Newest-first page of records matching `filter` (a WHERE clause over
    /// numbered placeholders bound from `params`)
    fn list<R: Record>(
        &self,
        filter: &str,
        params: &[Box<dyn ToSql>],
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<R>, usize), StoreError> {
        let conn = self.conn();

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE {}", R::TABLE, filter),
            params_from_iter(params.iter()),
            |row| row.get(0),
        )?;

        let limit = limit.min(i64::MAX as usize) as i64;
        let offset = offset.min(i64::MAX as usize) as i64;
        let limit_at = params.len() + 1;
        let offset_at = params.len() + 2;
        let mut bound: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        bound.push(&limit);
        bound.push(&offset);

        let mut stmt = conn.prepare(&format!(
            "SELECT document FROM {} WHERE {}
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?{} OFFSET ?{}",
            R::TABLE,
            filter,
            limit_at,
            offset_at
        ))?;

        let documents = stmt
            .query_map(bound.as_slice(), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let records = documents
            .iter()
            .map(|doc| serde_json::from_str(doc))
            .collect::<Result<Vec<R>, _>>()?;

        Ok((records, total as usize))
    }

    fn list_all<R: Record>(&self, owner: &str) -> Result<Vec<R>, StoreError> {
        let params: Vec<Box<dyn ToSql>> = vec![Box::new(owner.to_string())];
        let (records, _) = self.list::<R>("owner = ?1", &params, 0, usize::MAX)?;
        Ok(records)
    }
}

fn singular<R: Record>() -> &'static str {
    R::TABLE.trim_end_matches('s')
}

fn not_found<R: Record>(id: &str) -> StoreError {
    StoreError::NotFound(format!("{} {}", singular::<R>(), id))
}

/// LIKE pattern matching `term` anywhere, with wildcards in `term` escaped
fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        self.insert(workflow)
    }

    async fn get_workflow(&self, owner: &str, id: &str) -> Result<Workflow, StoreError> {
        self.get(owner, id)
    }

    async fn list_workflows(
        &self,
        owner: &str,
        query: &WorkflowQuery,
    ) -> Result<Page<Workflow>, StoreError> {
        let mut clauses = vec!["owner = ?1".to_string()];
        let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(owner.to_string())];

        if let Some(status) = query.status {
            params.push(Box::new(status.as_str()));
            clauses.push(format!("status = ?{}", params.len()));
        }

        if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
            params.push(Box::new(like_pattern(search.trim())));
            let n = params.len();
            clauses.push(format!(
                "(LOWER(json_extract(document, '$.name')) LIKE ?{n} ESCAPE '\\'
                  OR LOWER(json_extract(document, '$.description')) LIKE ?{n} ESCAPE '\\')"
            ));
        }

        let limit = query.limit.max(1);
        let (items, total) =
            self.list::<Workflow>(&clauses.join(" AND "), &params, query.offset(), limit)?;

        Ok(Page {
            items,
            page: query.page.max(1),
            limit,
            total,
        })
    }

    async fn update_workflow(&self, workflow: &Workflow) -> Result<u64, StoreError> {
        self.update(workflow)
    }

    async fn delete_workflow(&self, owner: &str, id: &str) -> Result<(), StoreError> {
        self.delete::<Workflow>(owner, id)
    }

    async fn insert_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        self.insert(execution)
    }

    async fn get_execution(&self, owner: &str, id: &str) -> Result<Execution, StoreError> {
        self.get(owner, id)
    }

    async fn update_execution(&self, execution: &Execution) -> Result<u64, StoreError> {
        self.update(execution)
    }

    async fn list_executions(
        &self,
        owner: &str,
        workflow_id: &str,
        page: usize,
        limit: usize,
    ) -> Result<Page<Execution>, StoreError> {
        let params: Vec<Box<dyn ToSql>> = vec![
            Box::new(owner.to_string()),
            Box::new(workflow_id.to_string()),
        ];
        let page = page.max(1);
        let limit = limit.max(1);
        let offset = (page - 1).saturating_mul(limit);
        let (items, total) =
            self.list::<Execution>("owner = ?1 AND scope = ?2", &params, offset, limit)?;

        Ok(Page {
            items,
            page,
            limit,
            total,
        })
    }

    async fn insert_container(&self, container: &McpContainer) -> Result<(), StoreError> {
        self.insert(container)
    }

    async fn get_container(&self, owner: &str, id: &str) -> Result<McpContainer, StoreError> {
        self.get(owner, id)
    }

    async fn list_containers(&self, owner: &str) -> Result<Vec<McpContainer>, StoreError> {
        self.list_all(owner)
    }

    async fn update_container(&self, container: &McpContainer) -> Result<u64, StoreError> {
        self.update(container)
    }

    async fn delete_container(&self, owner: &str, id: &str) -> Result<(), StoreError> {
        self.delete::<McpContainer>(owner, id)
    }

    async fn insert_integration(&self, integration: &Integration) -> Result<(), StoreError> {
        self.insert(integration)
    }

    async fn get_integration(&self, owner: &str, id: &str) -> Result<Integration, StoreError> {
        self.get(owner, id)
    }

    async fn find_integration(
        &self,
        owner: &str,
        service: &str,
    ) -> Result<Option<Integration>, StoreError> {
        let params: Vec<Box<dyn ToSql>> =
            vec![Box::new(owner.to_string()), Box::new(service.to_string())];
        let (mut items, _) =
            self.list::<Integration>("owner = ?1 AND scope = ?2", &params, 0, 1)?;
        Ok(items.pop())
    }

    async fn list_integrations(&self, owner: &str) -> Result<Vec<Integration>, StoreError> {
        self.list_all(owner)
    }

    async fn update_integration(&self, integration: &Integration) -> Result<u64, StoreError> {
        self.update(integration)
    }

    async fn delete_integration(&self, owner: &str, id: &str) -> Result<(), StoreError> {
        self.delete::<Integration>(owner, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContainerStatus, WorkflowStatus};

    fn workflow(owner: &str, name: &str) -> Workflow {
        let mut wf = Workflow::new(owner, name);
        wf.description = format!("{} description", name);
        wf
    }

    #[tokio::test]
    async fn test_insert_and_get_workflow() {
        let store = SqliteStore::open_in_memory().unwrap();
        let wf = workflow("alice", "Invoice sync");
        store.insert_workflow(&wf).await.unwrap();

        let loaded = store.get_workflow("alice", &wf.id).await.unwrap();
        assert_eq!(loaded, wf);
    }

    #[tokio::test]
    async fn test_get_is_owner_scoped() {
        let store = SqliteStore::open_in_memory().unwrap();
        let wf = workflow("alice", "Invoice sync");
        store.insert_workflow(&wf).await.unwrap();

        let err = store.get_workflow("bob", &wf.id).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(store.delete_workflow("bob", &wf.id).await.is_err());
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut wf = workflow("alice", "Invoice sync");
        store.insert_workflow(&wf).await.unwrap();

        wf.status = WorkflowStatus::Active;
        let version = store.update_workflow(&wf).await.unwrap();
        assert_eq!(version, 1);

        let loaded = store.get_workflow("alice", &wf.id).await.unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.status, WorkflowStatus::Active);
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = SqliteStore::open_in_memory().unwrap();
        let wf = workflow("alice", "Invoice sync");
        store.insert_workflow(&wf).await.unwrap();

        let first = wf.clone();
        let second = wf.clone();
        store.update_workflow(&first).await.unwrap();

        let err = store.update_workflow(&second).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let wf = workflow("alice", "Never stored");
        assert!(store.update_workflow(&wf).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let store = SqliteStore::open_in_memory().unwrap();
        for i in 0..5 {
            let mut wf = workflow("alice", &format!("Report {}", i));
            if i % 2 == 0 {
                wf.status = WorkflowStatus::Active;
            }
            store.insert_workflow(&wf).await.unwrap();
        }
        store
            .insert_workflow(&workflow("alice", "Slack digest"))
            .await
            .unwrap();
        store
            .insert_workflow(&workflow("bob", "Report 9"))
            .await
            .unwrap();

        let page = store
            .list_workflows(
                "alice",
                &WorkflowQuery {
                    limit: 2,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 6);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.pages(), 3);
        assert_eq!(page.items[0].name, "Slack digest");

        let active = store
            .list_workflows(
                "alice",
                &WorkflowQuery {
                    status: Some(WorkflowStatus::Active),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(active.total, 3);

        let search = store
            .list_workflows(
                "alice",
                &WorkflowQuery {
                    search: Some("SLACK".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(search.total, 1);
        assert_eq!(search.items[0].name, "Slack digest");
    }

    #[tokio::test]
    async fn test_search_escapes_wildcards() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_workflow(&workflow("alice", "100% uptime"))
            .await
            .unwrap();
        store
            .insert_workflow(&workflow("alice", "1000 users"))
            .await
            .unwrap();

        let page = store
            .list_workflows(
                "alice",
                &WorkflowQuery {
                    search: Some("100%".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].name, "100% uptime");
    }

    #[tokio::test]
    async fn test_executions_by_workflow() {
        let store = SqliteStore::open_in_memory().unwrap();
        for _ in 0..3 {
            let exec = Execution::start("wf-1", "alice", 2, serde_json::Value::Null);
            store.insert_execution(&exec).await.unwrap();
        }
        let other = Execution::start("wf-2", "alice", 2, serde_json::Value::Null);
        store.insert_execution(&other).await.unwrap();

        let page = store.list_executions("alice", "wf-1", 1, 10).await.unwrap();
        assert_eq!(page.total, 3);
        assert!(page.items.iter().all(|e| e.workflow_id == "wf-1"));
    }

    #[tokio::test]
    async fn test_container_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flowdeck.db");

        let mut container = McpContainer::new("alice", "files", "mcp/files:latest", 8080);
        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_container(&container).await.unwrap();
            container.status = ContainerStatus::Starting;
            store.update_container(&container).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let loaded = store.get_container("alice", &container.id).await.unwrap();
        assert_eq!(loaded.status, ContainerStatus::Starting);
        assert_eq!(loaded.version, 1);
        assert_eq!(store.list_containers("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_integration_service_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = Integration::new("alice", "slack", "Slack", "communication", "");
        let second = Integration::new("alice", "slack", "Slack", "communication", "");
        store.insert_integration(&first).await.unwrap();

        let err = store.insert_integration(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));

        let other_owner = Integration::new("bob", "slack", "Slack", "communication", "");
        store.insert_integration(&other_owner).await.unwrap();
        assert!(store.find_integration("alice", "slack").await.unwrap().is_some());
        assert!(store.find_integration("alice", "gmail").await.unwrap().is_none());
    }

    #[test]
    fn test_like_pattern() {
        assert_eq!(like_pattern("Slack"), "%slack%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}
