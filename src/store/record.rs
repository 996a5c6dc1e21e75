//! Uniform view over persisted record types

use crate::model::{Execution, Integration, McpContainer, Workflow};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// What both store backends need to know about a record
pub(crate) trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const TABLE: &'static str;

    /// At most one record per owner and scope
    const UNIQUE_SCOPE: bool = false;

    fn id(&self) -> &str;
    fn owner(&self) -> &str;
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
    fn status(&self) -> &'static str;
    fn created_at(&self) -> DateTime<Utc>;

    /// Secondary lookup key: parent workflow for executions, service for
    /// integrations
    fn scope(&self) -> Option<&str> {
        None
    }
}

/// Fixed-width timestamp so the text column sorts chronologically
pub(crate) fn sort_key(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Record for Workflow {
    const TABLE: &'static str = "workflows";

    fn id(&self) -> &str {
        &self.id
    }
    fn owner(&self) -> &str {
        &self.owner
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
    fn status(&self) -> &'static str {
        self.status.as_str()
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Record for Execution {
    const TABLE: &'static str = "executions";

    fn id(&self) -> &str {
        &self.id
    }
    fn owner(&self) -> &str {
        &self.owner
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
    fn status(&self) -> &'static str {
        self.status.as_str()
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.started_at
    }
    fn scope(&self) -> Option<&str> {
        Some(&self.workflow_id)
    }
}

impl Record for McpContainer {
    const TABLE: &'static str = "containers";

    fn id(&self) -> &str {
        &self.id
    }
    fn owner(&self) -> &str {
        &self.owner
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
    fn status(&self) -> &'static str {
        self.status.as_str()
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Record for Integration {
    const TABLE: &'static str = "integrations";
    const UNIQUE_SCOPE: bool = true;

    fn id(&self) -> &str {
        &self.id
    }
    fn owner(&self) -> &str {
        &self.owner
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
    fn status(&self) -> &'static str {
        self.status.as_str()
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn scope(&self) -> Option<&str> {
        Some(&self.service)
    }
}
