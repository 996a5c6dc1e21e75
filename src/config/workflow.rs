//! Workflow definition files

use crate::error::FlowError;
use crate::model::{
    MAX_INTERVAL_DAYS, OnError, Position, Schedule, ScheduleKind, Settings, Step, StepType,
    Workflow, parse_interval,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A step as written in a definition file
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StepDefinition {
    /// Generated as `step-<n>` when omitted
    pub id: Option<String>,

    #[serde(rename = "type")]
    pub step_type: StepType,

    #[serde(default)]
    pub service: String,

    #[serde(default)]
    pub action: String,

    #[serde(default)]
    pub description: String,

    pub config: Option<serde_json::Value>,

    pub position: Option<Position>,

    /// Ids of downstream steps
    #[serde(default)]
    pub connections: Vec<String>,
}

impl StepDefinition {
    pub fn new(step_type: StepType) -> Self {
        Self {
            id: None,
            step_type,
            service: String::new(),
            action: String::new(),
            description: String::new(),
            config: None,
            position: None,
            connections: Vec::new(),
        }
    }
}

impl From<Step> for StepDefinition {
    fn from(step: Step) -> Self {
        Self {
            id: Some(step.id),
            step_type: step.step_type,
            service: step.service,
            action: step.action,
            description: step.description,
            config: step.config,
            position: Some(step.position),
            connections: step.connections,
        }
    }
}

/// Run settings; unset fields fall back to the configured defaults
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsDefinition {
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
    pub on_error: Option<OnError>,
    pub notifications: Option<bool>,
}

impl SettingsDefinition {
    pub fn resolve(&self, defaults: &Settings) -> Settings {
        Settings {
            timeout: self.timeout.unwrap_or(defaults.timeout),
            retries: self.retries.unwrap_or(defaults.retries),
            on_error: self.on_error.unwrap_or(defaults.on_error),
            notifications: self.notifications.unwrap_or(defaults.notifications),
        }
    }
}

/// Full workflow definition, as loaded from TOML or JSON
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowDefinition {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Natural-language request the workflow was built from
    #[serde(default)]
    pub original_input: String,

    #[serde(default)]
    pub settings: SettingsDefinition,

    pub schedule: Option<Schedule>,

    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Steps with generated ids filled in
    pub fn build_steps(&self) -> Vec<Step> {
        let explicit: HashSet<&str> = self.steps.iter().filter_map(|s| s.id.as_deref()).collect();
        let mut generated = HashSet::new();

        self.steps
            .iter()
            .enumerate()
            .map(|(index, def)| {
                let id = match &def.id {
                    Some(id) => id.clone(),
                    None => {
                        let mut n = index + 1;
                        let mut candidate = format!("step-{}", n);
                        while explicit.contains(candidate.as_str()) || generated.contains(&candidate)
                        {
                            n += 1;
                            candidate = format!("step-{}", n);
                        }
                        generated.insert(candidate.clone());
                        candidate
                    }
                };

                Step {
                    id,
                    step_type: def.step_type,
                    service: def.service.clone(),
                    action: def.action.clone(),
                    description: def.description.clone(),
                    config: def.config.clone(),
                    position: def.position.unwrap_or_default(),
                    connections: def.connections.clone(),
                }
            })
            .collect()
    }

    /// Validate the definition's structure.
    ///
    /// Graph-level problems (missing trigger, unconnected steps) are not
    /// errors here; those are reported by the step validator.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("workflow name must not be empty".to_string());
        }

        let steps = self.build_steps();

        // Check for duplicate step ids
        let mut seen = HashSet::new();
        for step in &steps {
            if step.id.trim().is_empty() {
                errors.push("step id must not be empty".to_string());
            } else if !seen.insert(step.id.as_str()) {
                errors.push(format!("duplicate step id: {}", step.id));
            }
        }

        // Check connection targets
        for step in &steps {
            for target in &step.connections {
                if !seen.contains(target.as_str()) {
                    errors.push(format!(
                        "step '{}' connects to unknown step '{}'",
                        step.id, target
                    ));
                }
            }
        }

        if let Some(schedule) = &self.schedule {
            let next_run = parse_interval(&schedule.value)
                .and_then(|interval| Utc::now().checked_add_signed(interval));
            if schedule.kind == ScheduleKind::Interval && next_run.is_none() {
                errors.push(format!(
                    "schedule interval '{}' must look like <n><s|m|h|d> and span at most {} days",
                    schedule.value, MAX_INTERVAL_DAYS
                ));
            }
            if schedule.kind == ScheduleKind::Cron && schedule.value.split_whitespace().count() != 5
            {
                errors.push(format!(
                    "cron schedule '{}' must have five fields",
                    schedule.value
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Build a new draft workflow for `owner`
    pub fn into_workflow(self, owner: &str, defaults: &Settings) -> Result<Workflow, FlowError> {
        let mut workflow = Workflow::new(owner, self.name.clone());
        self.apply_to(&mut workflow, defaults)?;
        Ok(workflow)
    }

    /// Replace the editable fields of `workflow`; status and counters are kept
    pub fn apply_to(self, workflow: &mut Workflow, defaults: &Settings) -> Result<(), FlowError> {
        self.validate()
            .map_err(|errors| FlowError::InvalidDefinition { errors })?;

        workflow.steps = self.build_steps();
        workflow.settings = self.settings.resolve(defaults);
        workflow.name = self.name;
        workflow.description = self.description;
        workflow.original_input = self.original_input;
        workflow.schedule = self.schedule;
        Ok(())
    }
}

impl From<&Workflow> for WorkflowDefinition {
    fn from(workflow: &Workflow) -> Self {
        Self {
            name: workflow.name.clone(),
            description: workflow.description.clone(),
            original_input: workflow.original_input.clone(),
            settings: SettingsDefinition {
                timeout: Some(workflow.settings.timeout),
                retries: Some(workflow.settings.retries),
                on_error: Some(workflow.settings.on_error),
                notifications: Some(workflow.settings.notifications),
            },
            schedule: workflow.schedule.clone(),
            steps: workflow.steps.iter().cloned().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_from_toml() {
        let toml = r##"
            name = "New lead alert"
            description = "Post new CRM leads to Slack"

            [settings]
            timeout = 60

            [schedule]
            kind = "interval"
            value = "15m"

            [[steps]]
            id = "t1"
            type = "trigger"
            service = "hubspot"
            action = "new_contact"
            connections = ["a1"]

            [[steps]]
            id = "a1"
            type = "action"
            service = "slack"
            action = "send_message"
            config = { channel = "#sales" }
        "##;
        let def: WorkflowDefinition = toml::from_str(toml).unwrap();
        assert!(def.validate().is_ok());
        assert_eq!(def.steps.len(), 2);
        assert_eq!(def.schedule.as_ref().unwrap().timezone, "UTC");

        let steps = def.build_steps();
        assert_eq!(steps[0].connections, vec!["a1"]);
        assert_eq!(
            steps[1].config,
            Some(serde_json::json!({"channel": "#sales"}))
        );
    }

    #[test]
    fn test_definition_from_json() {
        let json = r#"{
            "name": "Webhook relay",
            "steps": [
                {"type": "trigger", "service": "webhook", "connections": ["step-2"]},
                {"type": "action", "service": "email"}
            ]
        }"#;
        let def: WorkflowDefinition = serde_json::from_str(json).unwrap();
        assert!(def.validate().is_ok());

        let ids: Vec<_> = def.build_steps().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["step-1", "step-2"]);
    }

    #[test]
    fn test_generated_ids_skip_explicit_ones() {
        let mut def = WorkflowDefinition::new("ids");
        let mut explicit = StepDefinition::new(StepType::Action);
        explicit.id = Some("step-1".into());
        def.steps = vec![StepDefinition::new(StepType::Trigger), explicit];

        let ids: Vec<_> = def.build_steps().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["step-2", "step-1"]);
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_structural_errors() {
        let mut def = WorkflowDefinition::new("broken");
        let mut a = StepDefinition::new(StepType::Trigger);
        a.id = Some("t1".into());
        a.connections = vec!["missing".into()];
        let mut b = StepDefinition::new(StepType::Action);
        b.id = Some("t1".into());
        def.steps = vec![a, b];
        def.schedule = Some(Schedule {
            kind: ScheduleKind::Interval,
            value: "often".into(),
            timezone: "UTC".into(),
        });

        let errors = def.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("duplicate step id: t1")));
        assert!(errors.iter().any(|e| e.contains("unknown step 'missing'")));
        assert!(errors.iter().any(|e| e.contains("often")));
    }

    #[test]
    fn test_oversized_interval_is_rejected() {
        for value in ["999999999999999d", "100000000d", "99999999999999999999s"] {
            let mut def = WorkflowDefinition::new("far future");
            def.schedule = Some(Schedule {
                kind: ScheduleKind::Interval,
                value: value.into(),
                timezone: "UTC".into(),
            });
            let errors = def.validate().unwrap_err();
            assert!(errors.iter().any(|e| e.contains(value)), "{value}");
        }

        let mut def = WorkflowDefinition::new("yearly");
        def.schedule = Some(Schedule {
            kind: ScheduleKind::Interval,
            value: "365d".into(),
            timezone: "UTC".into(),
        });
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_graph_problems_are_not_definition_errors() {
        // no trigger, no action: the step validator reports these instead
        let def = WorkflowDefinition::new("empty");
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_settings_fall_back_to_defaults() {
        let defaults = Settings {
            timeout: 45,
            ..Settings::default()
        };
        let def = SettingsDefinition {
            retries: Some(5),
            ..Default::default()
        };
        let settings = def.resolve(&defaults);
        assert_eq!(settings.timeout, 45);
        assert_eq!(settings.retries, 5);
        assert!(settings.notifications);
    }

    #[test]
    fn test_apply_to_keeps_status() {
        let mut wf = Workflow::new("alice", "old");
        wf.status = crate::model::WorkflowStatus::Paused;

        WorkflowDefinition::new("renamed")
            .apply_to(&mut wf, &Settings::default())
            .unwrap();
        assert_eq!(wf.name, "renamed");
        assert_eq!(wf.status, crate::model::WorkflowStatus::Paused);
    }

    #[test]
    fn test_invalid_definition_is_rejected() {
        let def = WorkflowDefinition::new("  ");
        let err = def
            .into_workflow("alice", &Settings::default())
            .unwrap_err();
        assert!(matches!(err, FlowError::InvalidDefinition { .. }));
    }
}
