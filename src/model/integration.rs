//! Third-party service integrations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationStatus {
    Connected,
    Error,
    #[default]
    Disconnected,
}

impl IntegrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationStatus::Connected => "connected",
            IntegrationStatus::Error => "error",
            IntegrationStatus::Disconnected => "disconnected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "connected" => Some(Self::Connected),
            "error" => Some(Self::Error),
            "disconnected" => Some(Self::Disconnected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Error,
    InProgress,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Oauth,
    ApiKey,
    BasicAuth,
    Custom,
}

/// Opaque credential blob
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Credentials {
    pub kind: CredentialKind,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct UsageStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub last_call: Option<DateTime<Utc>>,
}

/// A connected third-party service
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Integration {
    pub id: String,
    pub owner: String,
    pub service: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub status: IntegrationStatus,
    pub credentials: Credentials,
    #[serde(default)]
    pub config: serde_json::Value,
    pub last_sync: Option<DateTime<Utc>>,
    pub sync_status: Option<SyncStatus>,
    pub sync_error: Option<String>,
    #[serde(default)]
    pub usage: UsageStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl Integration {
    /// A disconnected record for `service`; credentials are filled in on connect
    pub fn new(
        owner: impl Into<String>,
        service: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner: owner.into(),
            service: service.into(),
            name: name.into(),
            category: category.into(),
            description: description.into(),
            status: IntegrationStatus::Disconnected,
            credentials: Credentials {
                kind: CredentialKind::Custom,
                data: serde_json::Value::Null,
            },
            config: serde_json::Value::Object(Default::default()),
            last_sync: None,
            sync_status: None,
            sync_error: None,
            usage: UsageStats::default(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Count one call against the service
    pub fn record_call(&mut self, success: bool, error: Option<String>) {
        let now = Utc::now();
        self.usage.total_calls += 1;
        self.usage.last_call = Some(now);
        if success {
            self.usage.successful_calls += 1;
            self.status = IntegrationStatus::Connected;
            self.sync_status = Some(SyncStatus::Success);
            self.sync_error = None;
        } else {
            self.usage.failed_calls += 1;
            self.status = IntegrationStatus::Error;
            self.sync_status = Some(SyncStatus::Error);
            self.sync_error = error;
        }
        self.updated_at = now;
    }
}
