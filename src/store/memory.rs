//! In-process store used by tests and short-lived sessions

use super::record::Record;
use super::{Page, Store, StoreError, WorkflowQuery};
use crate::model::{Execution, Integration, McpContainer, Workflow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

struct Row<R> {
    /// Insertion order, breaks ties between equal timestamps
    seq: u64,
    record: R,
}

struct Table<R> {
    rows: RwLock<HashMap<String, Row<R>>>,
    next_seq: AtomicU64,
}

impl<R: Record> Table<R> {
    fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    async fn insert(&self, record: &R) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;

        if rows.contains_key(record.id()) {
            return Err(StoreError::AlreadyExists(format!(
                "{} {}",
                singular::<R>(),
                record.id()
            )));
        }
        if R::UNIQUE_SCOPE {
            if let Some(scope) = record.scope() {
                let taken = rows.values().any(|row| {
                    row.record.owner() == record.owner() && row.record.scope() == Some(scope)
                });
                if taken {
                    return Err(StoreError::AlreadyExists(format!(
                        "{} {}",
                        singular::<R>(),
                        scope
                    )));
                }
            }
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        rows.insert(
            record.id().to_string(),
            Row {
                seq,
                record: record.clone(),
            },
        );
        Ok(())
    }

    async fn get(&self, owner: &str, id: &str) -> Result<R, StoreError> {
        self.rows
            .read()
            .await
            .get(id)
            .filter(|row| row.record.owner() == owner)
            .map(|row| row.record.clone())
            .ok_or_else(|| not_found::<R>(id))
    }

    async fn update(&self, record: &R) -> Result<u64, StoreError> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(record.id())
            .filter(|row| row.record.owner() == record.owner())
            .ok_or_else(|| not_found::<R>(record.id()))?;

        let actual = row.record.version();
        if actual != record.version() {
            return Err(StoreError::Conflict {
                id: record.id().to_string(),
                expected: record.version(),
                actual,
            });
        }

        let mut next = record.clone();
        next.set_version(actual + 1);
        row.record = next;
        Ok(actual + 1)
    }

    async fn delete(&self, owner: &str, id: &str) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        match rows.get(id) {
            Some(row) if row.record.owner() == owner => {
                rows.remove(id);
                Ok(())
            }
            _ => Err(not_found::<R>(id)),
        }
    }

    /// Matching records, newest first
    async fn select(&self, filter: impl Fn(&R) -> bool) -> Vec<R> {
        let rows = self.rows.read().await;
        let mut matched: Vec<&Row<R>> = rows.values().filter(|row| filter(&row.record)).collect();
        matched.sort_by(|a, b| {
            b.record
                .created_at()
                .cmp(&a.record.created_at())
                .then(b.seq.cmp(&a.seq))
        });
        matched.into_iter().map(|row| row.record.clone()).collect()
    }
}

fn singular<R: Record>() -> &'static str {
    R::TABLE.trim_end_matches('s')
}

fn not_found<R: Record>(id: &str) -> StoreError {
    StoreError::NotFound(format!("{} {}", singular::<R>(), id))
}

fn paginate<T>(items: Vec<T>, page: usize, limit: usize) -> Page<T> {
    let page = page.max(1);
    let limit = limit.max(1);
    let total = items.len();
    let items = items
        .into_iter()
        .skip((page - 1).saturating_mul(limit))
        .take(limit)
        .collect();

    Page {
        items,
        page,
        limit,
        total,
    }
}

/// Store holding everything in process memory
pub struct MemoryStore {
    workflows: Table<Workflow>,
    executions: Table<Execution>,
    containers: Table<McpContainer>,
    integrations: Table<Integration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            workflows: Table::new(),
            executions: Table::new(),
            containers: Table::new(),
            integrations: Table::new(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        self.workflows.insert(workflow).await
    }

    async fn get_workflow(&self, owner: &str, id: &str) -> Result<Workflow, StoreError> {
        self.workflows.get(owner, id).await
    }

    async fn list_workflows(
        &self,
        owner: &str,
        query: &WorkflowQuery,
    ) -> Result<Page<Workflow>, StoreError> {
        let search = query
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let matched = self
            .workflows
            .select(|wf| {
                wf.owner == owner
                    && query.status.is_none_or(|status| wf.status == status)
                    && search.as_deref().is_none_or(|term| {
                        wf.name.to_lowercase().contains(term)
                            || wf.description.to_lowercase().contains(term)
                    })
            })
            .await;

        Ok(paginate(matched, query.page, query.limit))
    }

    async fn update_workflow(&self, workflow: &Workflow) -> Result<u64, StoreError> {
        self.workflows.update(workflow).await
    }

    async fn delete_workflow(&self, owner: &str, id: &str) -> Result<(), StoreError> {
        self.workflows.delete(owner, id).await
    }

    async fn insert_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        self.executions.insert(execution).await
    }

    async fn get_execution(&self, owner: &str, id: &str) -> Result<Execution, StoreError> {
        self.executions.get(owner, id).await
    }

    async fn update_execution(&self, execution: &Execution) -> Result<u64, StoreError> {
        self.executions.update(execution).await
    }

    async fn list_executions(
        &self,
        owner: &str,
        workflow_id: &str,
        page: usize,
        limit: usize,
    ) -> Result<Page<Execution>, StoreError> {
        let matched = self
            .executions
            .select(|e| e.owner == owner && e.workflow_id == workflow_id)
            .await;
        Ok(paginate(matched, page, limit))
    }

    async fn insert_container(&self, container: &McpContainer) -> Result<(), StoreError> {
        self.containers.insert(container).await
    }

    async fn get_container(&self, owner: &str, id: &str) -> Result<McpContainer, StoreError> {
        self.containers.get(owner, id).await
    }

    async fn list_containers(&self, owner: &str) -> Result<Vec<McpContainer>, StoreError> {
        Ok(self.containers.select(|c| c.owner == owner).await)
    }

    async fn update_container(&self, container: &McpContainer) -> Result<u64, StoreError> {
        self.containers.update(container).await
    }

    async fn delete_container(&self, owner: &str, id: &str) -> Result<(), StoreError> {
        self.containers.delete(owner, id).await
    }

    async fn insert_integration(&self, integration: &Integration) -> Result<(), StoreError> {
        self.integrations.insert(integration).await
    }

    async fn get_integration(&self, owner: &str, id: &str) -> Result<Integration, StoreError> {
        self.integrations.get(owner, id).await
    }

    async fn find_integration(
        &self,
        owner: &str,
        service: &str,
    ) -> Result<Option<Integration>, StoreError> {
        Ok(self
            .integrations
            .select(|i| i.owner == owner && i.service == service)
            .await
            .into_iter()
            .next())
    }

    async fn list_integrations(&self, owner: &str) -> Result<Vec<Integration>, StoreError> {
        Ok(self.integrations.select(|i| i.owner == owner).await)
    }

    async fn update_integration(&self, integration: &Integration) -> Result<u64, StoreError> {
        self.integrations.update(integration).await
    }

    async fn delete_integration(&self, owner: &str, id: &str) -> Result<(), StoreError> {
        self.integrations.delete(owner, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkflowStatus;

    #[tokio::test]
    async fn test_owner_scoping() {
        let store = MemoryStore::new();
        let wf = Workflow::new("alice", "Daily report");
        store.insert_workflow(&wf).await.unwrap();

        assert!(store.get_workflow("alice", &wf.id).await.is_ok());
        assert!(store.get_workflow("bob", &wf.id).await.unwrap_err().is_not_found());
        assert!(store.delete_workflow("bob", &wf.id).await.is_err());
        assert!(store.get_workflow("alice", &wf.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_version_check() {
        let store = MemoryStore::new();
        let mut wf = Workflow::new("alice", "Daily report");
        store.insert_workflow(&wf).await.unwrap();

        let stale = wf.clone();
        wf.status = WorkflowStatus::Active;
        assert_eq!(store.update_workflow(&wf).await.unwrap(), 1);

        let err = store.update_workflow(&stale).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(
            store.get_workflow("alice", &wf.id).await.unwrap().status,
            WorkflowStatus::Active
        );
    }

    #[tokio::test]
    async fn test_list_newest_first_with_search() {
        let store = MemoryStore::new();
        for name in ["Alpha sync", "Beta report", "Gamma sync"] {
            store
                .insert_workflow(&Workflow::new("alice", name))
                .await
                .unwrap();
        }

        let all = store
            .list_workflows("alice", &WorkflowQuery::all())
            .await
            .unwrap();
        let names: Vec<_> = all.items.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["Gamma sync", "Beta report", "Alpha sync"]);

        let synced = store
            .list_workflows(
                "alice",
                &WorkflowQuery {
                    search: Some("SYNC".into()),
                    limit: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(synced.total, 2);
        assert_eq!(synced.items.len(), 1);
        assert_eq!(synced.items[0].name, "Gamma sync");
    }

    #[tokio::test]
    async fn test_integration_unique_per_service() {
        let store = MemoryStore::new();
        let slack = Integration::new("alice", "slack", "Slack", "communication", "");
        store.insert_integration(&slack).await.unwrap();

        let again = Integration::new("alice", "slack", "Slack", "communication", "");
        assert!(matches!(
            store.insert_integration(&again).await,
            Err(StoreError::AlreadyExists(_))
        ));

        let found = store.find_integration("alice", "slack").await.unwrap();
        assert_eq!(found.map(|i| i.id), Some(slack.id));
    }

    #[test]
    fn test_paginate_past_end() {
        let page = paginate(vec![1, 2, 3], 5, 2);
        assert!(page.items.is_empty());
        assert_eq!(page.total, 3);
    }
}
