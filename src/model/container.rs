//! MCP container records
//!
//! These records have no backing process; their status is driven by
//! [`crate::container::ContainerSupervisor`] with simulated delays.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Simulated container lifecycle state
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Restarting,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Stopped => "stopped",
            ContainerStatus::Starting => "starting",
            ContainerStatus::Running => "running",
            ContainerStatus::Stopping => "stopping",
            ContainerStatus::Restarting => "restarting",
        }
    }

    /// Whether a delayed completion is outstanding in this state
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            ContainerStatus::Starting | ContainerStatus::Stopping | ContainerStatus::Restarting
        )
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Health {
    pub status: HealthStatus,
    pub last_check: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Endpoint {
    pub name: String,
    pub url: String,
}

/// A simulated tool-serving container
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct McpContainer {
    pub id: String,
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub image: String,
    pub port: u16,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub status: ContainerStatus,

    /// Identifier assigned while running (`mcp_xxxxxxxx`)
    pub runtime_id: Option<String>,

    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub health: Health,

    /// When the current running period began
    pub started_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub version: u64,
}

impl McpContainer {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        image: impl Into<String>,
        port: u16,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner: owner.into(),
            name: name.into(),
            description: String::new(),
            image: image.into(),
            port,
            environment: BTreeMap::new(),
            capabilities: Vec::new(),
            status: ContainerStatus::Stopped,
            runtime_id: None,
            endpoints: Vec::new(),
            health: Health::default(),
            started_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Endpoints advertised while running
    pub fn default_endpoints(&self) -> Vec<Endpoint> {
        vec![
            Endpoint {
                name: "API".into(),
                url: format!("http://localhost:{}/api", self.port),
            },
            Endpoint {
                name: "Health".into(),
                url: format!("http://localhost:{}/health", self.port),
            },
        ]
    }

    /// Seconds since the container entered `running`
    pub fn uptime_secs(&self, now: DateTime<Utc>) -> u64 {
        self.started_at
            .map(|started| (now - started).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Partial update applied by `ContainerSupervisor::update`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub port: Option<u16>,
    pub environment: Option<BTreeMap<String, String>>,
    pub capabilities: Option<Vec<String>>,
}

impl ContainerPatch {
    pub fn apply(self, container: &mut McpContainer) {
        if let Some(name) = self.name {
            container.name = name;
        }
        if let Some(description) = self.description {
            container.description = description;
        }
        if let Some(image) = self.image {
            container.image = image;
        }
        if let Some(port) = self.port {
            container.port = port;
        }
        if let Some(environment) = self.environment {
            container.environment = environment;
        }
        if let Some(capabilities) = self.capabilities {
            container.capabilities = capabilities;
        }
    }
}

/// One canned log line
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_container_is_stopped() {
        let c = McpContainer::new("user-1", "files", "mcp/files:latest", 8080);
        assert_eq!(c.status, ContainerStatus::Stopped);
        assert!(c.runtime_id.is_none());
        assert!(c.endpoints.is_empty());
        assert_eq!(c.health.status, HealthStatus::Unknown);
    }

    #[test]
    fn test_default_endpoints_use_port() {
        let c = McpContainer::new("user-1", "files", "mcp/files:latest", 9000);
        let endpoints = c.default_endpoints();
        assert_eq!(endpoints[0].url, "http://localhost:9000/api");
        assert_eq!(endpoints[1].url, "http://localhost:9000/health");
    }

    #[test]
    fn test_patch_applies_only_given_fields() {
        let mut c = McpContainer::new("user-1", "files", "mcp/files:latest", 8080);
        ContainerPatch {
            port: Some(9100),
            capabilities: Some(vec!["read_file".into()]),
            ..Default::default()
        }
        .apply(&mut c);

        assert_eq!(c.port, 9100);
        assert_eq!(c.name, "files");
        assert_eq!(c.capabilities, vec!["read_file"]);
    }

    #[test]
    fn test_transitional_states() {
        assert!(ContainerStatus::Starting.is_transitional());
        assert!(ContainerStatus::Stopping.is_transitional());
        assert!(ContainerStatus::Restarting.is_transitional());
        assert!(!ContainerStatus::Running.is_transitional());
        assert!(!ContainerStatus::Stopped.is_transitional());
    }
}
