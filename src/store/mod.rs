//! Persistence for workflows, executions, containers and integrations
//!
//! The [`Store`] trait is the only way services touch persisted state.
//! Every record carries a `version`; `update_*` succeeds only when the stored
//! version still matches the one the caller read, and bumps it by one. That
//! gives read-modify-write callers a lost-update check on top of whatever
//! locking they do.

mod memory;
mod record;
mod schema;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::model::{Execution, Integration, McpContainer, Workflow, WorkflowStatus};
use async_trait::async_trait;
use thiserror::Error;

/// Error type for storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record was not found (or belongs to someone else)
    #[error("not found: {0}")]
    NotFound(String),

    /// A record with the same id, or the same owner and service, exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The record changed since it was read
    #[error("version conflict on {id}: expected {expected}, found {actual}")]
    Conflict {
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Filter and pagination for workflow listings
#[derive(Debug, Clone)]
pub struct WorkflowQuery {
    pub status: Option<WorkflowStatus>,
    /// Case-insensitive substring over name and description
    pub search: Option<String>,
    /// 1-based
    pub page: usize,
    pub limit: usize,
}

impl Default for WorkflowQuery {
    fn default() -> Self {
        Self {
            status: None,
            search: None,
            page: 1,
            limit: 10,
        }
    }
}

impl WorkflowQuery {
    /// Every workflow of the owner on a single page
    pub fn all() -> Self {
        Self {
            limit: usize::MAX,
            ..Default::default()
        }
    }

    pub(crate) fn offset(&self) -> usize {
        self.page.max(1).saturating_sub(1).saturating_mul(self.limit.max(1))
    }
}

/// One page of a listing, newest first
#[derive(Debug, Clone, serde::Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn pages(&self) -> usize {
        self.total.div_ceil(self.limit.max(1))
    }
}

/// Storage trait for all persisted records.
///
/// Reads and deletes are scoped by owner: a record owned by someone else is
/// reported as [`StoreError::NotFound`].
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_workflow(&self, workflow: &Workflow) -> Result<(), StoreError>;

    async fn get_workflow(&self, owner: &str, id: &str) -> Result<Workflow, StoreError>;

    async fn list_workflows(
        &self,
        owner: &str,
        query: &WorkflowQuery,
    ) -> Result<Page<Workflow>, StoreError>;

    /// Write back a workflow read earlier; returns the new version
    async fn update_workflow(&self, workflow: &Workflow) -> Result<u64, StoreError>;

    async fn delete_workflow(&self, owner: &str, id: &str) -> Result<(), StoreError>;

    async fn insert_execution(&self, execution: &Execution) -> Result<(), StoreError>;

    async fn get_execution(&self, owner: &str, id: &str) -> Result<Execution, StoreError>;

    async fn update_execution(&self, execution: &Execution) -> Result<u64, StoreError>;

    async fn list_executions(
        &self,
        owner: &str,
        workflow_id: &str,
        page: usize,
        limit: usize,
    ) -> Result<Page<Execution>, StoreError>;

    async fn insert_container(&self, container: &McpContainer) -> Result<(), StoreError>;

    async fn get_container(&self, owner: &str, id: &str) -> Result<McpContainer, StoreError>;

    async fn list_containers(&self, owner: &str) -> Result<Vec<McpContainer>, StoreError>;

    async fn update_container(&self, container: &McpContainer) -> Result<u64, StoreError>;

    async fn delete_container(&self, owner: &str, id: &str) -> Result<(), StoreError>;

    async fn insert_integration(&self, integration: &Integration) -> Result<(), StoreError>;

    async fn get_integration(&self, owner: &str, id: &str) -> Result<Integration, StoreError>;

    /// The owner's integration for a catalog service, if connected
    async fn find_integration(
        &self,
        owner: &str,
        service: &str,
    ) -> Result<Option<Integration>, StoreError>;

    async fn list_integrations(&self, owner: &str) -> Result<Vec<Integration>, StoreError>;

    async fn update_integration(&self, integration: &Integration) -> Result<u64, StoreError>;

    async fn delete_integration(&self, owner: &str, id: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_offset() {
        let q = WorkflowQuery {
            page: 3,
            limit: 10,
            ..Default::default()
        };
        assert_eq!(q.offset(), 20);
        assert_eq!(WorkflowQuery::default().offset(), 0);
        assert_eq!(WorkflowQuery::all().offset(), 0);

        let q = WorkflowQuery {
            page: 0,
            ..Default::default()
        };
        assert_eq!(q.offset(), 0);
    }

    #[test]
    fn test_page_count() {
        let page: Page<()> = Page {
            items: vec![],
            page: 1,
            limit: 10,
            total: 21,
        };
        assert_eq!(page.pages(), 3);

        let page: Page<()> = Page {
            items: vec![],
            page: 1,
            limit: usize::MAX,
            total: 5,
        };
        assert_eq!(page.pages(), 1);
    }
}
