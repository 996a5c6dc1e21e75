//! CLI command implementations

use super::output::{OutputEvent, OutputHandler};
use crate::cancel::{CancellationToken, with_cancellation};
use crate::config::{FlowdeckConfig, WorkflowDefinition, load_definition};
use crate::container::{ContainerSpec, ContainerSupervisor, PendingTransition, TransitionOutcome};
use crate::events::EventSink;
use crate::integration::{self, ConnectRequest, IntegrationFilter, IntegrationService};
use crate::model::{
    ContainerPatch, Credentials, Execution, ExecutionOutcome, Integration, IntegrationStatus,
    McpContainer, Workflow, WorkflowStatus,
};
use crate::principal::Principal;
use crate::store::{Store, WorkflowQuery};
use crate::workflow::{ValidationReport, WorkflowService, validate_steps};
use anyhow::{Context as _, Result, anyhow};
use clap::Subcommand;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Exit code when a transition was interrupted
const EXIT_CANCELLED: i32 = 130;

#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Create a draft workflow from a definition file
    Create { file: PathBuf },

    /// List workflows, newest first
    List {
        #[arg(long)]
        status: Option<String>,
        /// Case-insensitive match on name or description
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    Show { id: String },

    /// Replace a workflow's definition; status is kept
    Update { id: String, file: PathBuf },

    Delete { id: String },

    /// Activate a draft or paused workflow
    Start { id: String },

    Pause { id: String },

    /// Put a workflow into error
    Fail {
        id: String,
        #[arg(long)]
        reason: String,
    },

    /// Return an errored workflow to draft
    Reset { id: String },

    /// Run the step-graph validator on a stored workflow
    Check { id: String },

    /// Record a manual run
    Execute {
        id: String,
        /// Run input as JSON
        #[arg(long)]
        input: Option<String>,
    },

    /// Finish a running execution
    Complete {
        execution_id: String,
        /// Mark the run failed with this error
        #[arg(long)]
        failed: Option<String>,
        #[arg(long)]
        duration_ms: Option<u64>,
    },

    /// Cancel a running execution
    Cancel { execution_id: String },

    Executions {
        id: String,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Counts by status and run totals
    Stats,
}

#[derive(Subcommand)]
pub enum ContainerCommand {
    Create {
        name: String,
        #[arg(long)]
        image: String,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long, default_value = "")]
        description: String,
        /// KEY=VALUE, repeatable
        #[arg(long = "env", value_parser = parse_key_val)]
        env: Vec<(String, String)>,
        /// Repeatable
        #[arg(long = "capability")]
        capabilities: Vec<String>,
    },

    List,

    Show { id: String },

    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        image: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        description: Option<String>,
    },

    /// Start and wait until running (Ctrl-C rolls back)
    Start { id: String },

    Stop { id: String },

    Restart { id: String },

    Delete { id: String },

    Logs {
        id: String,
        #[arg(long, default_value_t = 100)]
        lines: usize,
    },

    /// Simulated connection test
    Test { id: String },

    /// Simulated command execution
    Exec {
        id: String,
        command: String,
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },

    Capabilities { id: String },
}

#[derive(Subcommand)]
pub enum IntegrationCommand {
    /// Services that can be connected
    Catalog {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        search: Option<String>,
    },

    Connect {
        service: String,
        /// oauth, api_key, basic_auth or custom
        #[arg(long, default_value = "api_key")]
        kind: String,
        /// Credential data as JSON
        #[arg(long, default_value = "{}")]
        credentials: String,
        /// Service config as JSON
        #[arg(long)]
        config: Option<String>,
    },

    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },

    Test { id: String },

    Delete { id: String },
}

/// Services wired to one store and event sink, acting for one principal
pub struct Context {
    pub principal: Principal,
    pub workflows: WorkflowService,
    pub containers: ContainerSupervisor,
    pub integrations: IntegrationService,
}

impl Context {
    pub fn new(
        principal: Principal,
        store: Arc<dyn Store>,
        events: Arc<dyn EventSink>,
        config: &FlowdeckConfig,
    ) -> Self {
        Self {
            principal,
            workflows: WorkflowService::new(store.clone(), events.clone())
                .with_defaults(config.defaults.clone()),
            containers: ContainerSupervisor::new(
                store.clone(),
                events.clone(),
                config.containers.clone(),
            ),
            integrations: IntegrationService::new(store, events),
        }
    }
}

/// Validate a definition file: structure first, then the step graph
pub fn validate_definition(path: &Path, handler: &dyn OutputHandler) -> Result<i32> {
    let definition = load_definition(path)?;

    if let Err(errors) = definition.validate() {
        handler.emit(OutputEvent::Info {
            message: format!(
                "✗ Workflow '{}' has {} definition error(s):",
                definition.name,
                errors.len()
            ),
        });
        for err in &errors {
            handler.emit(OutputEvent::Info {
                message: format!("  - {}", err),
            });
        }
        handler.record(
            serde_json::json!({ "valid": false, "errors": errors }),
            "",
        );
        return Ok(1);
    }

    let report = validate_steps(&definition.build_steps());
    emit_report(&definition.name, definition.steps.len(), &report, handler);
    handler.record(to_value(&report)?, "");
    Ok(if report.valid { 0 } else { 1 })
}

pub async fn run_workflow(
    ctx: &Context,
    command: WorkflowCommand,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    let workflows = &ctx.workflows;
    let p = &ctx.principal;

    match command {
        WorkflowCommand::Create { file } => {
            let workflow = workflows.create(p, read_definition(&file)?).await?;
            record_workflow(&workflow, handler)?;
        }
        WorkflowCommand::List {
            status,
            search,
            page,
            limit,
        } => {
            let status = status
                .map(|s| WorkflowStatus::parse(&s).ok_or_else(|| anyhow!("unknown status '{}'", s)))
                .transpose()?;
            let query = WorkflowQuery {
                status,
                search,
                page,
                limit,
            };
            let page = workflows.list(p, &query).await?;
            let mut summary: Vec<String> = page.items.iter().map(workflow_line).collect();
            summary.push(format!(
                "page {}/{} ({} total)",
                page.page,
                page.pages().max(1),
                page.total
            ));
            handler.record(to_value(&page)?, &summary.join("\n"));
        }
        WorkflowCommand::Show { id } => {
            let workflow = workflows.get(p, &id).await?;
            record_workflow(&workflow, handler)?;
        }
        WorkflowCommand::Update { id, file } => {
            let workflow = workflows.update(p, &id, read_definition(&file)?).await?;
            record_workflow(&workflow, handler)?;
        }
        WorkflowCommand::Delete { id } => {
            workflows.delete(p, &id).await?;
            handler.record(serde_json::json!({ "deleted": id }), &format!("deleted {}", id));
        }
        WorkflowCommand::Start { id } => match workflows.start(p, &id).await {
            Ok(workflow) => record_workflow(&workflow, handler)?,
            Err(crate::error::FlowError::ValidationFailed { issues }) => {
                let report = ValidationReport {
                    valid: false,
                    issues,
                };
                emit_report(&id, 0, &report, handler);
                handler.record(to_value(&report)?, "");
                return Ok(1);
            }
            Err(err) => return Err(err.into()),
        },
        WorkflowCommand::Pause { id } => {
            record_workflow(&workflows.pause(p, &id).await?, handler)?;
        }
        WorkflowCommand::Fail { id, reason } => {
            record_workflow(&workflows.fail(p, &id, &reason).await?, handler)?;
        }
        WorkflowCommand::Reset { id } => {
            record_workflow(&workflows.reset(p, &id).await?, handler)?;
        }
        WorkflowCommand::Check { id } => {
            let workflow = workflows.get(p, &id).await?;
            let report = workflows.validate(p, &id).await?;
            emit_report(&workflow.name, workflow.steps.len(), &report, handler);
            handler.record(to_value(&report)?, "");
            return Ok(if report.valid { 0 } else { 1 });
        }
        WorkflowCommand::Execute { id, input } => {
            let input = match input {
                Some(raw) => serde_json::from_str(&raw).context("parsing --input as JSON")?,
                None => serde_json::Value::Object(Default::default()),
            };
            let execution = workflows.execute(p, &id, input).await?;
            record_execution(&execution, handler)?;
        }
        WorkflowCommand::Complete {
            execution_id,
            failed,
            duration_ms,
        } => {
            let outcome = match failed {
                Some(error) => ExecutionOutcome::failure(error),
                None => ExecutionOutcome::Success,
            };
            let execution = workflows
                .complete_execution(p, &execution_id, outcome, duration_ms)
                .await?;
            record_execution(&execution, handler)?;
        }
        WorkflowCommand::Cancel { execution_id } => {
            let execution = workflows.cancel_execution(p, &execution_id).await?;
            record_execution(&execution, handler)?;
        }
        WorkflowCommand::Executions { id, page, limit } => {
            let page = workflows.executions(p, &id, page, limit).await?;
            let summary: Vec<String> = page.items.iter().map(execution_line).collect();
            handler.record(to_value(&page)?, &summary.join("\n"));
        }
        WorkflowCommand::Stats => {
            let stats = workflows.stats(p).await?;
            let summary = format!(
                "{} workflows ({} draft, {} active, {} paused, {} error)\n{} runs, {} ok, {} failed ({:.0}% success)",
                stats.total,
                stats.draft,
                stats.active,
                stats.paused,
                stats.error,
                stats.total_runs,
                stats.successful_runs,
                stats.failed_runs,
                stats.success_rate() * 100.0
            );
            handler.record(to_value(&stats)?, &summary);
        }
    }

    Ok(0)
}

pub async fn run_container(
    ctx: &Context,
    command: ContainerCommand,
    token: &CancellationToken,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    let containers = &ctx.containers;
    let p = &ctx.principal;

    match command {
        ContainerCommand::Create {
            name,
            image,
            port,
            description,
            env,
            capabilities,
        } => {
            let spec = ContainerSpec {
                name,
                description,
                image,
                port,
                environment: env.into_iter().collect::<BTreeMap<_, _>>(),
                capabilities,
            };
            let container = containers.create(p, spec).await?;
            record_container(&container, handler)?;
        }
        ContainerCommand::List => {
            let list = containers.list(p).await?;
            let summary: Vec<String> = list.iter().map(container_line).collect();
            handler.record(to_value(&list)?, &summary.join("\n"));
        }
        ContainerCommand::Show { id } => {
            record_container(&containers.get(p, &id).await?, handler)?;
        }
        ContainerCommand::Update {
            id,
            name,
            image,
            port,
            description,
        } => {
            let patch = ContainerPatch {
                name,
                image,
                port,
                description,
                ..Default::default()
            };
            record_container(&containers.update(p, &id, patch).await?, handler)?;
        }
        ContainerCommand::Start { id } => {
            let pending = containers.start(p, &id).await?;
            return await_transition(pending, token, handler).await;
        }
        ContainerCommand::Stop { id } => {
            let pending = containers.stop(p, &id).await?;
            return await_transition(pending, token, handler).await;
        }
        ContainerCommand::Restart { id } => {
            let pending = containers.restart(p, &id).await?;
            return await_transition(pending, token, handler).await;
        }
        ContainerCommand::Delete { id } => {
            containers.delete(p, &id).await?;
            handler.record(serde_json::json!({ "deleted": id }), &format!("deleted {}", id));
        }
        ContainerCommand::Logs { id, lines } => {
            let logs = containers.logs(p, &id, lines).await?;
            let summary: Vec<String> = logs
                .iter()
                .map(|l| format!("{} [{}] {}", l.timestamp.to_rfc3339(), l.level, l.message))
                .collect();
            handler.record(to_value(&logs)?, &summary.join("\n"));
        }
        ContainerCommand::Test { id } => {
            let report = containers.test(p, &id).await?;
            let summary = format!("{} ({}ms)", report.message, report.response_time_ms);
            handler.record(to_value(&report)?, &summary);
        }
        ContainerCommand::Exec { id, command, args } => {
            let result = containers.execute(p, &id, &command, args).await?;
            let summary = format!("{}\nexit {}", result.stdout, result.exit_code);
            handler.record(to_value(&result)?, &summary);
        }
        ContainerCommand::Capabilities { id } => {
            let caps = containers.capabilities(p, &id).await?;
            let mut summary = vec![format!("status: {}", caps.status)];
            summary.extend(caps.capabilities.iter().map(|c| format!("  {}", c)));
            summary.extend(caps.endpoints.iter().map(|e| format!("  {} {}", e.name, e.url)));
            handler.record(to_value(&caps)?, &summary.join("\n"));
        }
    }

    Ok(0)
}

pub async fn run_integration(
    ctx: &Context,
    command: IntegrationCommand,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    let integrations = &ctx.integrations;
    let p = &ctx.principal;

    match command {
        IntegrationCommand::Catalog { category, search } => {
            let entries = integration::catalog(category.as_deref(), search.as_deref());
            let summary: Vec<String> = entries
                .iter()
                .map(|e| format!("{:<16} {:<14} {}", e.id, e.category, e.description))
                .collect();
            handler.record(to_value(&entries)?, &summary.join("\n"));
        }
        IntegrationCommand::Connect {
            service,
            kind,
            credentials,
            config,
        } => {
            let credentials = Credentials {
                kind: serde_json::from_value(serde_json::Value::String(kind.clone()))
                    .map_err(|_| anyhow!("unknown credential kind '{}'", kind))?,
                data: serde_json::from_str(&credentials).context("parsing --credentials")?,
            };
            let config = config
                .map(|raw| serde_json::from_str(&raw).context("parsing --config"))
                .transpose()?;
            let integration = integrations
                .connect(p, ConnectRequest {
                    service,
                    credentials,
                    config,
                })
                .await?;
            handler.record(to_value(&integration)?, &integration_line(&integration));
        }
        IntegrationCommand::List { status, category } => {
            let status = status
                .map(|s| {
                    IntegrationStatus::parse(&s).ok_or_else(|| anyhow!("unknown status '{}'", s))
                })
                .transpose()?;
            let list = integrations
                .list(p, &IntegrationFilter { status, category })
                .await?;
            let summary: Vec<String> = list.iter().map(integration_line).collect();
            handler.record(to_value(&list)?, &summary.join("\n"));
        }
        IntegrationCommand::Test { id } => {
            let report = integrations.test(p, &id).await?;
            let summary = format!("{} ({}ms)", report.message, report.response_time_ms);
            handler.record(to_value(&report)?, &summary);
        }
        IntegrationCommand::Delete { id } => {
            integrations.delete(p, &id).await?;
            handler.record(serde_json::json!({ "deleted": id }), &format!("deleted {}", id));
        }
    }

    Ok(0)
}

/// Wait for a container transition; cancelling `token` rolls it back
async fn await_transition(
    pending: PendingTransition,
    token: &CancellationToken,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    let container_id = pending.container_id().to_string();
    handler.emit(OutputEvent::TransitionStarted {
        container: container_id.clone(),
        action: pending.action().verb().to_string(),
        status: pending.container().status.to_string(),
    });

    let started = Instant::now();
    let outcome = match with_cancellation(token, pending.wait()).await {
        Some(outcome) => outcome,
        None => {
            pending.cancel();
            pending.wait().await
        }
    };

    match outcome {
        TransitionOutcome::Completed(container) => {
            handler.emit(OutputEvent::TransitionSettled {
                container: container_id,
                status: container.status.to_string(),
                duration_ms: started.elapsed().as_millis() as u64,
            });
            record_container(&container, handler)?;
            Ok(0)
        }
        TransitionOutcome::Cancelled(container) => {
            handler.emit(OutputEvent::TransitionCancelled {
                container: container_id,
                status: container.status.to_string(),
            });
            record_container(&container, handler)?;
            Ok(EXIT_CANCELLED)
        }
        TransitionOutcome::Failed(error) => {
            handler.emit(OutputEvent::TransitionFailed {
                container: container_id,
                error,
            });
            Ok(1)
        }
    }
}

fn read_definition(path: &Path) -> Result<WorkflowDefinition> {
    load_definition(path).with_context(|| format!("loading workflow definition {}", path.display()))
}

fn emit_report(name: &str, steps: usize, report: &ValidationReport, handler: &dyn OutputHandler) {
    let errors = report.errors().count();
    let message = if report.valid {
        format!("✓ Workflow '{}' is valid ({} steps)", name, steps)
    } else {
        format!("✗ Workflow '{}' has {} error(s):", name, errors)
    };
    handler.emit(OutputEvent::Info { message });

    for issue in &report.issues {
        handler.emit(OutputEvent::Issue {
            kind: issue.kind.to_string(),
            message: issue.message.clone(),
            step_id: issue.step_id.clone(),
        });
    }
}

fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).context("serializing result")
}

fn record_workflow(workflow: &Workflow, handler: &dyn OutputHandler) -> Result<()> {
    handler.record(to_value(workflow)?, &workflow_line(workflow));
    Ok(())
}

fn record_execution(execution: &Execution, handler: &dyn OutputHandler) -> Result<()> {
    handler.record(to_value(execution)?, &execution_line(execution));
    Ok(())
}

fn record_container(container: &McpContainer, handler: &dyn OutputHandler) -> Result<()> {
    handler.record(to_value(container)?, &container_line(container));
    Ok(())
}

fn workflow_line(w: &Workflow) -> String {
    format!("{}  {:<7}  {}", w.id, w.status, w.name)
}

fn execution_line(e: &Execution) -> String {
    match &e.error {
        Some(error) => format!("{}  {:<9}  {}", e.id, e.status, error),
        None => format!("{}  {}", e.id, e.status),
    }
}

fn container_line(c: &McpContainer) -> String {
    format!("{}  {:<10}  {}  {}:{}", c.id, c.status, c.name, c.image, c.port)
}

fn integration_line(i: &Integration) -> String {
    format!("{}  {:<12}  {}", i.id, i.status.as_str(), i.name)
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))
}
