//! Third-party integrations: catalog, connections and usage counters
//!
//! Connections are records only. `test` simulates a round trip and counts it
//! as one successful call.

use crate::error::{Entity, FlowError};
use crate::events::{Event, EventKind, EventSink};
use crate::locks::KeyedLocks;
use crate::model::{Credentials, Integration, IntegrationStatus, SyncStatus};
use crate::principal::Principal;
use crate::store::Store;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// A service that can be connected
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: &'static str,
    pub name: &'static str,
    pub category: &'static str,
    pub description: &'static str,
}

const fn entry(
    id: &'static str,
    name: &'static str,
    category: &'static str,
    description: &'static str,
) -> CatalogEntry {
    CatalogEntry {
        id,
        name,
        category,
        description,
    }
}

pub const CATALOG: &[CatalogEntry] = &[
    entry("slack", "Slack", "Communication", "Team communication platform"),
    entry("discord", "Discord", "Communication", "Voice and text chat platform"),
    entry("mattermost", "Mattermost", "Communication", "Open source messaging platform"),
    entry("telegram", "Telegram", "Communication", "Messaging app"),
    entry("notion", "Notion", "Productivity", "All-in-one workspace"),
    entry("airtable", "Airtable", "Productivity", "Database and spreadsheet platform"),
    entry("clickup", "ClickUp", "Productivity", "Project management platform"),
    entry("trello", "Trello", "Productivity", "Visual project management"),
    entry("todoist", "Todoist", "Productivity", "Task management app"),
    entry("gmail", "Gmail", "Google", "Email service"),
    entry("google-calendar", "Google Calendar", "Google", "Calendar and scheduling"),
    entry("google-drive", "Google Drive", "Google", "Cloud storage"),
    entry("google-sheets", "Google Sheets", "Google", "Spreadsheet application"),
    entry("google-forms", "Google Forms", "Google", "Form builder"),
    entry("hubspot", "HubSpot", "CRM", "CRM and marketing platform"),
    entry("salesforce", "Salesforce", "CRM", "Customer relationship management"),
    entry("pipedrive", "Pipedrive", "CRM", "Sales CRM"),
    entry("stripe", "Stripe", "Finance", "Payment processing"),
    entry("invoice-ninja", "Invoice Ninja", "Finance", "Invoicing platform"),
    entry("mailchimp", "Mailchimp", "Marketing", "Email marketing platform"),
    entry("mailerlite", "MailerLite", "Marketing", "Email marketing service"),
    entry("github", "GitHub", "Development", "Code repository hosting"),
    entry("gitlab", "GitLab", "Development", "DevOps platform"),
    entry("dropbox", "Dropbox", "Storage", "Cloud storage"),
    entry("openai", "OpenAI", "AI", "AI and language models"),
    entry("deepl", "DeepL", "AI", "Translation service"),
    entry("webhooks", "Webhooks", "Other", "HTTP callbacks"),
    entry("http-request", "HTTP Request", "Other", "Make HTTP requests"),
    entry("delay", "Delay", "Other", "Add delays to workflows"),
    entry("filter", "Filter", "Other", "Filter data in workflows"),
    entry("formatter", "Formatter", "Other", "Format data"),
];

pub fn lookup(service: &str) -> Option<&'static CatalogEntry> {
    CATALOG.iter().find(|e| e.id == service)
}

/// Catalog entries in `category` whose name or description contains `search`
pub fn catalog(category: Option<&str>, search: Option<&str>) -> Vec<&'static CatalogEntry> {
    let needle = search.map(str::to_lowercase);
    CATALOG
        .iter()
        .filter(|e| category.is_none_or(|c| c == "all" || e.category == c))
        .filter(|e| {
            needle.as_deref().is_none_or(|n| {
                e.name.to_lowercase().contains(n) || e.description.to_lowercase().contains(n)
            })
        })
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectRequest {
    pub service: String,
    pub credentials: Credentials,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntegrationPatch {
    pub credentials: Option<Credentials>,
    pub config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct IntegrationFilter {
    pub status: Option<IntegrationStatus>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrationTestReport {
    pub success: bool,
    pub message: String,
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

pub struct IntegrationService {
    store: Arc<dyn Store>,
    events: Arc<dyn EventSink>,
    locks: KeyedLocks,
}

impl IntegrationService {
    pub fn new(store: Arc<dyn Store>, events: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            events,
            locks: KeyedLocks::new(),
        }
    }

    /// Connect a catalog service; one connection per service and owner
    pub async fn connect(
        &self,
        principal: &Principal,
        request: ConnectRequest,
    ) -> Result<Integration, FlowError> {
        let service = lookup(&request.service).ok_or_else(|| {
            FlowError::InvalidRequest(format!("unknown service '{}'", request.service))
        })?;

        // serialize connects of the same service for this owner
        let _guard = self
            .locks
            .lock(&format!("{}/{}", principal.id(), service.id))
            .await;

        if self
            .store
            .find_integration(principal.id(), service.id)
            .await?
            .is_some()
        {
            return Err(FlowError::AlreadyExists {
                entity: Entity::Integration,
                key: service.id.to_string(),
            });
        }

        let now = Utc::now();
        let mut integration = Integration::new(
            principal.id(),
            service.id,
            service.name,
            service.category,
            service.description,
        );
        integration.credentials = request.credentials;
        if let Some(config) = request.config {
            integration.config = config;
        }
        integration.status = IntegrationStatus::Connected;
        integration.last_sync = Some(now);
        integration.sync_status = Some(SyncStatus::Success);

        self.store.insert_integration(&integration).await?;

        tracing::info!(integration_id = %integration.id, service = service.id, "Connected integration");
        self.publish(
            EventKind::IntegrationConnected,
            &integration,
            json!({ "service": integration.service }),
        );
        Ok(integration)
    }

    pub async fn get(&self, principal: &Principal, id: &str) -> Result<Integration, FlowError> {
        Ok(self.store.get_integration(principal.id(), id).await?)
    }

    pub async fn list(
        &self,
        principal: &Principal,
        filter: &IntegrationFilter,
    ) -> Result<Vec<Integration>, FlowError> {
        let mut integrations = self.store.list_integrations(principal.id()).await?;
        integrations.retain(|i| {
            filter.status.is_none_or(|s| i.status == s)
                && filter.category.as_deref().is_none_or(|c| i.category == c)
        });
        Ok(integrations)
    }

    pub async fn update(
        &self,
        principal: &Principal,
        id: &str,
        patch: IntegrationPatch,
    ) -> Result<Integration, FlowError> {
        let _guard = self.locks.lock(id).await;
        let mut integration = self.store.get_integration(principal.id(), id).await?;

        if let Some(credentials) = patch.credentials {
            integration.credentials = credentials;
        }
        if let Some(config) = patch.config {
            integration.config = config;
        }
        integration.updated_at = Utc::now();
        integration.version = self.store.update_integration(&integration).await?;

        tracing::info!(integration_id = %id, "Updated integration");
        self.publish(
            EventKind::IntegrationUpdated,
            &integration,
            json!({ "service": integration.service, "status": integration.status }),
        );
        Ok(integration)
    }

    pub async fn delete(&self, principal: &Principal, id: &str) -> Result<(), FlowError> {
        let guard = self.locks.lock(id).await;
        let integration = self.store.get_integration(principal.id(), id).await?;
        self.store.delete_integration(principal.id(), id).await?;
        drop(guard);
        self.locks.forget(id);

        tracing::info!(integration_id = %id, service = %integration.service, "Deleted integration");
        self.publish(
            EventKind::IntegrationDeleted,
            &integration,
            json!({ "service": integration.service }),
        );
        Ok(())
    }

    /// Simulated round trip, counted as one successful call
    pub async fn test(
        &self,
        principal: &Principal,
        id: &str,
    ) -> Result<IntegrationTestReport, FlowError> {
        let response_time_ms = rand::rng().random_range(100..1100);
        self.record_call(principal, id, true, None).await?;
        tracing::debug!(integration_id = %id, response_time_ms, "Integration test passed");

        Ok(IntegrationTestReport {
            success: true,
            message: "Connection test successful".into(),
            response_time_ms,
            timestamp: Utc::now(),
        })
    }

    /// Count one call; a failed call puts the integration into `error`
    pub async fn record_call(
        &self,
        principal: &Principal,
        id: &str,
        success: bool,
        error: Option<String>,
    ) -> Result<Integration, FlowError> {
        let _guard = self.locks.lock(id).await;
        let mut integration = self.store.get_integration(principal.id(), id).await?;
        let before = integration.status;

        integration.record_call(success, error);
        integration.version = self.store.update_integration(&integration).await?;

        if integration.status != before {
            tracing::info!(
                integration_id = %id,
                from = before.as_str(),
                to = integration.status.as_str(),
                "Integration status changed"
            );
            self.publish(
                EventKind::IntegrationUpdated,
                &integration,
                json!({ "from": before, "to": integration.status }),
            );
        }
        Ok(integration)
    }

    fn publish(&self, kind: EventKind, integration: &Integration, payload: serde_json::Value) {
        self.events.publish(Event::new(
            kind,
            &integration.owner,
            &integration.id,
            payload,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;
    use crate::model::CredentialKind;
    use crate::store::MemoryStore;

    fn service() -> (IntegrationService, Arc<RecordingSink>) {
        let events = Arc::new(RecordingSink::default());
        (
            IntegrationService::new(Arc::new(MemoryStore::new()), events.clone()),
            events,
        )
    }

    fn request(service: &str) -> ConnectRequest {
        ConnectRequest {
            service: service.into(),
            credentials: Credentials {
                kind: CredentialKind::ApiKey,
                data: json!({ "token": "secret" }),
            },
            config: None,
        }
    }

    fn alice() -> Principal {
        Principal::new("alice")
    }

    #[test]
    fn test_catalog_filters() {
        assert_eq!(catalog(None, None).len(), CATALOG.len());
        assert_eq!(catalog(Some("all"), None).len(), CATALOG.len());

        let google = catalog(Some("Google"), None);
        assert_eq!(google.len(), 5);

        let storage: Vec<_> = catalog(None, Some("CLOUD STORAGE"))
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(storage, vec!["google-drive", "dropbox"]);

        assert!(lookup("slack").is_some());
        assert!(lookup("myspace").is_none());
    }

    #[tokio::test]
    async fn test_connect_fills_from_catalog() {
        let (service, events) = service();
        let integration = service.connect(&alice(), request("slack")).await.unwrap();

        assert_eq!(integration.name, "Slack");
        assert_eq!(integration.category, "Communication");
        assert_eq!(integration.status, IntegrationStatus::Connected);
        assert_eq!(integration.sync_status, Some(SyncStatus::Success));
        assert_eq!(events.kinds(), vec![EventKind::IntegrationConnected]);
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_and_duplicate() {
        let (service, _) = service();
        assert!(matches!(
            service.connect(&alice(), request("myspace")).await,
            Err(FlowError::InvalidRequest(_))
        ));

        service.connect(&alice(), request("github")).await.unwrap();
        assert!(matches!(
            service.connect(&alice(), request("github")).await,
            Err(FlowError::AlreadyExists {
                entity: Entity::Integration,
                ..
            })
        ));

        // another owner may connect the same service
        assert!(
            service
                .connect(&Principal::new("bob"), request("github"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_test_counts_a_call() {
        let (service, _) = service();
        let integration = service.connect(&alice(), request("notion")).await.unwrap();

        let report = service.test(&alice(), &integration.id).await.unwrap();
        assert!(report.success);
        assert!((100..1100).contains(&report.response_time_ms));

        let stored = service.get(&alice(), &integration.id).await.unwrap();
        assert_eq!(stored.usage.total_calls, 1);
        assert_eq!(stored.usage.successful_calls, 1);
        assert!(stored.usage.last_call.is_some());
    }

    #[tokio::test]
    async fn test_failed_call_sets_error_and_filters() {
        let (service, events) = service();
        let slack = service.connect(&alice(), request("slack")).await.unwrap();
        service.connect(&alice(), request("stripe")).await.unwrap();

        let failed = service
            .record_call(&alice(), &slack.id, false, Some("token revoked".into()))
            .await
            .unwrap();
        assert_eq!(failed.status, IntegrationStatus::Error);
        assert_eq!(events.kinds().last(), Some(&EventKind::IntegrationUpdated));

        let errored = service
            .list(&alice(), &IntegrationFilter {
                status: Some(IntegrationStatus::Error),
                category: None,
            })
            .await
            .unwrap();
        assert_eq!(errored.len(), 1);
        assert_eq!(errored[0].service, "slack");

        let finance = service
            .list(&alice(), &IntegrationFilter {
                status: None,
                category: Some("Finance".into()),
            })
            .await
            .unwrap();
        assert_eq!(finance.len(), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (service, events) = service();
        let integration = service.connect(&alice(), request("trello")).await.unwrap();

        let updated = service
            .update(&alice(), &integration.id, IntegrationPatch {
                config: Some(json!({ "board": "ops" })),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.config["board"], "ops");
        assert_eq!(updated.credentials.kind, CredentialKind::ApiKey);

        service.delete(&alice(), &integration.id).await.unwrap();
        assert!(service.get(&alice(), &integration.id).await.is_err());
        assert_eq!(
            events.kinds(),
            vec![
                EventKind::IntegrationConnected,
                EventKind::IntegrationUpdated,
                EventKind::IntegrationDeleted,
            ]
        );

        // the service can be connected again after deletion
        assert!(service.connect(&alice(), request("trello")).await.is_ok());
    }
}
