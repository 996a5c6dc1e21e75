//! Workflow and step records

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status label of a workflow record
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    #[default]
    Draft,
    Active,
    Paused,
    Error,
}

impl WorkflowStatus {
    pub const ALL: [WorkflowStatus; 4] = [
        WorkflowStatus::Draft,
        WorkflowStatus::Active,
        WorkflowStatus::Paused,
        WorkflowStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Draft => "draft",
            WorkflowStatus::Active => "active",
            WorkflowStatus::Paused => "paused",
            WorkflowStatus::Error => "error",
        }
    }

    /// Parse a status label; `None` for unknown labels
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step type - explicit, never inferred
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    /// External event that starts the workflow
    Trigger,
    /// Call into a service
    Action,
    /// Branch on a predicate
    Condition,
    /// Wait before continuing
    Delay,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Trigger => "trigger",
            StepType::Action => "action",
            StepType::Condition => "condition",
            StepType::Delay => "delay",
        }
    }
}

/// Canvas position of a step
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A single node in the workflow graph
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Step {
    /// Unique within the owning workflow
    pub id: String,

    #[serde(rename = "type")]
    pub step_type: StepType,

    /// Target service name (e.g. "slack")
    #[serde(default)]
    pub service: String,

    /// Action name on the service (e.g. "send_message")
    #[serde(default)]
    pub action: String,

    #[serde(default)]
    pub description: String,

    /// Free-form configuration object
    #[serde(default)]
    pub config: Option<serde_json::Value>,

    #[serde(default)]
    pub position: Position,

    /// Outgoing edges (ids of downstream steps)
    #[serde(default)]
    pub connections: Vec<String>,
}

impl Step {
    pub fn new(id: impl Into<String>, step_type: StepType) -> Self {
        Self {
            id: id.into(),
            step_type,
            service: String::new(),
            action: String::new(),
            description: String::new(),
            config: None,
            position: Position::default(),
            connections: Vec::new(),
        }
    }

    pub fn with_connections<I, S>(mut self, connections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.connections = connections.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Whether the step carries no usable configuration.
    ///
    /// Only a non-empty object, array or string counts as configured.
    pub fn has_empty_config(&self) -> bool {
        use serde_json::Value;

        match &self.config {
            None | Some(Value::Null | Value::Bool(_) | Value::Number(_)) => true,
            Some(Value::Object(map)) => map.is_empty(),
            Some(Value::Array(items)) => items.is_empty(),
            Some(Value::String(text)) => text.is_empty(),
        }
    }

    /// Human-readable label: description when present, else the id
    pub fn label(&self) -> &str {
        if self.description.trim().is_empty() {
            &self.id
        } else {
            &self.description
        }
    }
}

/// Error policy for a workflow run
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    #[default]
    Stop,
    Continue,
    Retry,
}

/// Run settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default)]
    pub on_error: OnError,

    #[serde(default = "default_notifications")]
    pub notifications: bool,
}

pub(crate) fn default_timeout() -> u64 {
    30
}

pub(crate) fn default_retries() -> u32 {
    3
}

fn default_notifications() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            retries: default_retries(),
            on_error: OnError::default(),
            notifications: default_notifications(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Cron,
    Interval,
    Webhook,
}

/// Schedule descriptor; stored, never driven
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Schedule {
    pub kind: ScheduleKind,
    pub value: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Schedule {
    /// Interval length for `interval` schedules written as `<n><s|m|h|d>`
    pub fn interval(&self) -> Option<Duration> {
        if self.kind != ScheduleKind::Interval {
            return None;
        }
        parse_interval(&self.value)
    }
}

/// Longest accepted interval
pub(crate) const MAX_INTERVAL_DAYS: i64 = 366 * 100;

pub(crate) fn parse_interval(value: &str) -> Option<Duration> {
    let value = value.trim();
    let split = value.find(|c: char| !c.is_ascii_digit())?;
    let (amount, unit) = value.split_at(split);
    let amount: i64 = amount.parse().ok()?;
    if amount <= 0 {
        return None;
    }
    let interval = match unit.trim() {
        "s" => Duration::try_seconds(amount),
        "m" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        _ => None,
    }?;
    (interval <= Duration::days(MAX_INTERVAL_DAYS)).then_some(interval)
}

/// Run counters
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ExecutionStats {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub average_run_time_ms: f64,
}

/// A workflow record
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Workflow {
    pub id: String,
    pub owner: String,
    pub name: String,
    pub description: String,

    /// Natural-language request the workflow was built from
    #[serde(default)]
    pub original_input: String,

    #[serde(default)]
    pub status: WorkflowStatus,

    #[serde(default)]
    pub steps: Vec<Step>,

    #[serde(default)]
    pub settings: Settings,

    pub schedule: Option<Schedule>,

    #[serde(default)]
    pub execution: ExecutionStats,

    /// Reason recorded by the last failure signal
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Optimistic concurrency token, bumped by every store update
    #[serde(default)]
    pub version: u64,
}

impl Workflow {
    /// Create a draft workflow owned by `owner`
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner: owner.into(),
            name: name.into(),
            description: String::new(),
            original_input: String::new(),
            status: WorkflowStatus::Draft,
            steps: Vec::new(),
            settings: Settings::default(),
            schedule: None,
            execution: ExecutionStats::default(),
            last_error: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn with_steps(mut self, steps: Vec<Step>) -> Self {
        self.steps = steps;
        self
    }

    pub fn get_step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_parse() {
        assert_eq!(WorkflowStatus::parse("Active"), Some(WorkflowStatus::Active));
        assert_eq!(WorkflowStatus::parse("draft"), Some(WorkflowStatus::Draft));
        assert_eq!(WorkflowStatus::parse("archived"), None);
    }

    #[test]
    fn test_step_empty_config() {
        assert!(Step::new("a", StepType::Action).has_empty_config());
        assert!(
            Step::new("a", StepType::Action)
                .with_config(json!({}))
                .has_empty_config()
        );
        assert!(
            Step::new("a", StepType::Action)
                .with_config(serde_json::Value::Null)
                .has_empty_config()
        );
        assert!(
            !Step::new("a", StepType::Action)
                .with_config(json!({"channel": "#ops"}))
                .has_empty_config()
        );
    }

    #[test]
    fn test_step_empty_config_non_object_values() {
        let configured = |value: serde_json::Value| {
            !Step::new("a", StepType::Action)
                .with_config(value)
                .has_empty_config()
        };
        assert!(!configured(json!([])));
        assert!(!configured(json!("")));
        assert!(!configured(json!(0)));
        assert!(!configured(json!(42)));
        assert!(!configured(json!(true)));
        assert!(configured(json!(["#ops"])));
        assert!(configured(json!("#ops")));
    }

    #[test]
    fn test_step_label() {
        let step = Step::new("a1", StepType::Action);
        assert_eq!(step.label(), "a1");
        let step = step.with_description("Post to Slack");
        assert_eq!(step.label(), "Post to Slack");
    }

    #[test]
    fn test_step_deserialize_defaults() {
        let step: Step = serde_json::from_value(json!({
            "id": "t1",
            "type": "trigger",
            "connections": ["a1"]
        }))
        .unwrap();
        assert_eq!(step.step_type, StepType::Trigger);
        assert_eq!(step.connections, vec!["a1"]);
        assert!(step.config.is_none());
        assert_eq!(step.position, Position::default());
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("30s"), Some(Duration::seconds(30)));
        assert_eq!(parse_interval("15m"), Some(Duration::minutes(15)));
        assert_eq!(parse_interval("2h"), Some(Duration::hours(2)));
        assert_eq!(parse_interval("1d"), Some(Duration::days(1)));
        assert_eq!(parse_interval("0m"), None);
        assert_eq!(parse_interval("m"), None);
        assert_eq!(parse_interval("10w"), None);
        assert_eq!(parse_interval("10"), None);
    }

    #[test]
    fn test_parse_interval_rejects_huge_amounts() {
        assert_eq!(parse_interval("999999999999999d"), None);
        assert_eq!(parse_interval("100000000d"), None);
        assert_eq!(parse_interval("99999999999999999999s"), None);
        assert_eq!(
            parse_interval(&format!("{}d", MAX_INTERVAL_DAYS)),
            Some(Duration::days(MAX_INTERVAL_DAYS))
        );
        assert_eq!(parse_interval(&format!("{}d", MAX_INTERVAL_DAYS + 1)), None);
    }

    #[test]
    fn test_schedule_interval_only_for_interval_kind() {
        let cron = Schedule {
            kind: ScheduleKind::Cron,
            value: "5m".into(),
            timezone: "UTC".into(),
        };
        assert!(cron.interval().is_none());

        let interval = Schedule {
            kind: ScheduleKind::Interval,
            ..cron
        };
        assert_eq!(interval.interval(), Some(Duration::minutes(5)));
    }

    #[test]
    fn test_new_workflow_is_draft() {
        let wf = Workflow::new("user-1", "Daily digest");
        assert_eq!(wf.status, WorkflowStatus::Draft);
        assert_eq!(wf.version, 0);
        assert_eq!(wf.settings, Settings::default());
        assert!(!wf.id.is_empty());
    }
}
