//! Step-graph validation
//!
//! Produces typed findings rather than failing fast, so a caller can show
//! every problem at once. Only `error` findings make a workflow invalid.

use super::graph::StepGraph;
use crate::model::{Step, StepType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a finding
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    Error,
    Warning,
    Info,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IssueKind::Error => "error",
            IssueKind::Warning => "warning",
            IssueKind::Info => "info",
        })
    }
}

/// One validator finding
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Issue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub message: String,
    /// Step the finding is about, `None` for workflow-wide findings
    pub step_id: Option<String>,
}

impl Issue {
    pub fn error(message: impl Into<String>, step_id: Option<&str>) -> Self {
        Self::new(IssueKind::Error, message, step_id)
    }

    pub fn warning(message: impl Into<String>, step_id: Option<&str>) -> Self {
        Self::new(IssueKind::Warning, message, step_id)
    }

    pub fn info(message: impl Into<String>, step_id: Option<&str>) -> Self {
        Self::new(IssueKind::Info, message, step_id)
    }

    fn new(kind: IssueKind, message: impl Into<String>, step_id: Option<&str>) -> Self {
        Self {
            kind,
            message: message.into(),
            step_id: step_id.map(str::to_owned),
        }
    }
}

/// Result of validating a step list
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.of_kind(IssueKind::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.of_kind(IssueKind::Warning)
    }

    pub fn infos(&self) -> impl Iterator<Item = &Issue> {
        self.of_kind(IssueKind::Info)
    }

    fn of_kind(&self, kind: IssueKind) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }
}

/// Validate a step list.
///
/// Checks run in a fixed order and findings keep that order:
/// 1. at least one trigger (error)
/// 2. at least one action (warning)
/// 3. every non-trigger step is referenced by another step (warning)
/// 4. every step carries configuration (info)
pub fn validate_steps(steps: &[Step]) -> ValidationReport {
    let mut issues = Vec::new();

    if !steps.iter().any(|s| s.step_type == StepType::Trigger) {
        issues.push(Issue::error(
            "Workflow must have at least one trigger",
            None,
        ));
    }

    if !steps.iter().any(|s| s.step_type == StepType::Action) {
        issues.push(Issue::warning(
            "Workflow should have at least one action",
            None,
        ));
    }

    let graph = StepGraph::new(steps);
    let referenced = graph.referenced_ids();
    for step in steps {
        if step.step_type != StepType::Trigger && !referenced.contains(step.id.as_str()) {
            issues.push(Issue::warning(
                format!(
                    "Step \"{}\" is not connected to any other step",
                    step.label()
                ),
                Some(&step.id),
            ));
        }
    }

    for step in steps {
        if step.has_empty_config() {
            issues.push(Issue::info(
                format!("Step \"{}\" may need additional configuration", step.label()),
                Some(&step.id),
            ));
        }
    }

    let valid = !issues.iter().any(|i| i.kind == IssueKind::Error);
    ValidationReport { valid, issues }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn configured(step: Step) -> Step {
        step.with_config(json!({"key": "value"}))
    }

    #[test]
    fn test_trigger_to_action_is_valid() {
        let steps = vec![
            configured(Step::new("t1", StepType::Trigger).with_connections(["a1"])),
            configured(Step::new("a1", StepType::Action)),
        ];
        let report = validate_steps(&steps);
        assert!(report.valid);
        assert_eq!(report.errors().count(), 0);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_empty_step_list() {
        let report = validate_steps(&[]);
        assert!(!report.valid);
        assert_eq!(
            report.issues,
            vec![
                Issue::error("Workflow must have at least one trigger", None),
                Issue::warning("Workflow should have at least one action", None),
            ]
        );
    }

    #[test]
    fn test_unreferenced_action_warns() {
        let steps = vec![
            configured(Step::new("t1", StepType::Trigger)),
            configured(Step::new("a1", StepType::Action)),
        ];
        let report = validate_steps(&steps);
        assert!(report.valid);
        let warnings: Vec<_> = report.warnings().collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].step_id.as_deref(), Some("a1"));
        assert!(warnings[0].message.contains("not connected"));
    }

    #[test]
    fn test_empty_config_is_info() {
        let steps = vec![
            configured(Step::new("t1", StepType::Trigger).with_connections(["a1"])),
            Step::new("a1", StepType::Action).with_config(json!({})),
        ];
        let report = validate_steps(&steps);
        assert!(report.valid);
        let infos: Vec<_> = report.infos().collect();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].step_id.as_deref(), Some("a1"));
    }

    #[test]
    fn test_empty_array_and_string_configs_are_info() {
        let steps = vec![
            Step::new("t1", StepType::Trigger)
                .with_connections(["a1", "a2"])
                .with_config(json!([])),
            Step::new("a1", StepType::Action).with_config(json!("")),
            Step::new("a2", StepType::Action).with_config(json!(["#ops"])),
        ];
        let report = validate_steps(&steps);
        assert!(report.valid);
        let ids: Vec<_> = report
            .infos()
            .map(|i| i.step_id.as_deref().unwrap_or_default())
            .collect();
        assert_eq!(ids, vec!["t1", "a1"]);
    }

    #[test]
    fn test_missing_config_is_info_for_each_step() {
        let steps = vec![
            Step::new("t1", StepType::Trigger).with_connections(["a1"]),
            Step::new("a1", StepType::Action),
        ];
        let report = validate_steps(&steps);
        let ids: Vec<_> = report
            .infos()
            .map(|i| i.step_id.as_deref().unwrap_or_default())
            .collect();
        assert_eq!(ids, vec!["t1", "a1"]);
    }

    #[test]
    fn test_single_trigger_is_valid() {
        let steps = vec![configured(Step::new("t1", StepType::Trigger))];
        let report = validate_steps(&steps);
        assert!(report.valid);
        assert_eq!(report.errors().count(), 0);
        // only the missing-action warning
        assert_eq!(report.warnings().count(), 1);
        assert_eq!(report.warnings().next().unwrap().step_id, None);
    }

    #[test]
    fn test_no_trigger_is_invalid() {
        let steps = vec![configured(Step::new("a1", StepType::Action))];
        let report = validate_steps(&steps);
        assert!(!report.valid);
        assert_eq!(report.errors().count(), 1);
    }

    #[test]
    fn test_self_reference_does_not_connect() {
        let steps = vec![
            configured(Step::new("t1", StepType::Trigger)),
            configured(Step::new("a1", StepType::Action).with_connections(["a1"])),
        ];
        let report = validate_steps(&steps);
        assert_eq!(report.warnings().count(), 1);
    }

    #[test]
    fn test_issue_order_follows_checks() {
        let steps = vec![
            Step::new("c1", StepType::Condition).with_description("Check amount"),
            Step::new("d1", StepType::Delay),
        ];
        let report = validate_steps(&steps);
        let kinds: Vec<_> = report.issues.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                IssueKind::Error,
                IssueKind::Warning,
                IssueKind::Warning,
                IssueKind::Warning,
                IssueKind::Info,
                IssueKind::Info,
            ]
        );
        assert_eq!(
            report.issues[2].message,
            "Step \"Check amount\" is not connected to any other step"
        );
        assert_eq!(report.issues[3].step_id.as_deref(), Some("d1"));
    }

    #[test]
    fn test_validation_is_idempotent() {
        let steps = vec![
            Step::new("t1", StepType::Trigger).with_connections(["a1"]),
            Step::new("a1", StepType::Action),
            Step::new("a2", StepType::Action).with_config(json!({})),
        ];
        assert_eq!(validate_steps(&steps), validate_steps(&steps));
    }

    #[test]
    fn test_report_serializes_with_type_field() {
        let report = validate_steps(&[]);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["valid"], json!(false));
        assert_eq!(value["issues"][0]["type"], json!("error"));
        assert_eq!(value["issues"][0]["step_id"], json!(null));
    }
}
