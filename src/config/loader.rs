//! Configuration loading with multi-layer merge

use super::WorkflowDefinition;
use crate::model::Settings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level flowdeck configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FlowdeckConfig {
    /// Settings given to workflows that don't set their own
    #[serde(default)]
    pub defaults: Settings,

    #[serde(default)]
    pub containers: ContainerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub events: EventsConfig,
}

/// Simulated container timings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerConfig {
    /// Delay between `starting` and `running`
    #[serde(default = "default_start_delay_ms")]
    pub start_delay_ms: u64,

    /// Delay between `restarting` and `running`
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    /// Delay between `stopping` and `stopped`
    #[serde(default)]
    pub stop_delay_ms: u64,

    #[serde(default = "default_port")]
    pub default_port: u16,

    /// Number of canned log lines kept per container
    #[serde(default = "default_log_lines")]
    pub log_lines: usize,
}

fn default_start_delay_ms() -> u64 {
    2000
}

fn default_restart_delay_ms() -> u64 {
    3000
}

fn default_port() -> u16 {
    8080
}

fn default_log_lines() -> usize {
    100
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            start_delay_ms: default_start_delay_ms(),
            restart_delay_ms: default_restart_delay_ms(),
            stop_delay_ms: 0,
            default_port: default_port(),
            log_lines: default_log_lines(),
        }
    }
}

impl ContainerConfig {
    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn stop_delay(&self) -> Duration {
        Duration::from_millis(self.stop_delay_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Database file; `~` is expanded
    pub path: Option<String>,
}

impl StorageConfig {
    /// Configured database path, or `<data_dir>/flowdeck/flowdeck.db`
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(PathBuf::from(shellexpand::tilde(path).as_ref())),
            None => {
                let data_dir = dirs::data_dir()
                    .ok_or_else(|| anyhow::anyhow!("could not determine data directory"))?;
                Ok(data_dir.join("flowdeck").join("flowdeck.db"))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EventsConfig {
    /// Broadcast channel capacity
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Also write every event to the log
    #[serde(default = "default_log_events")]
    pub log: bool,
}

fn default_capacity() -> usize {
    256
}

fn default_log_events() -> bool {
    true
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            log: default_log_events(),
        }
    }
}

impl FlowdeckConfig {
    /// Load configuration from the standard hierarchy
    ///
    /// Load order (later overrides earlier):
    /// 1. Built-in defaults
    /// 2. ~/.config/flowdeck/config.toml
    /// 3. .flowdeck/config.toml (project)
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        // Load user config
        if let Some(user_config_path) = Self::user_config_path() {
            if user_config_path.exists() {
                let user_config = Self::load_file(&user_config_path)
                    .with_context(|| format!("loading {}", user_config_path.display()))?;
                config.merge(user_config);
            }
        }

        // Load project config
        let project_config_path = project_dir
            .map(|p| p.join(".flowdeck/config.toml"))
            .unwrap_or_else(|| PathBuf::from(".flowdeck/config.toml"));

        if project_config_path.exists() {
            let project_config = Self::load_file(&project_config_path)
                .with_context(|| format!("loading {}", project_config_path.display()))?;
            config.merge(project_config);
        }

        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Get the user config path (~/.config/flowdeck/config.toml)
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("flowdeck/config.toml"))
    }

    /// Merge another config into this one (other takes precedence where it
    /// differs from the built-in default)
    pub fn merge(&mut self, other: Self) {
        let settings = Settings::default();
        if other.defaults.timeout != settings.timeout {
            self.defaults.timeout = other.defaults.timeout;
        }
        if other.defaults.retries != settings.retries {
            self.defaults.retries = other.defaults.retries;
        }
        if other.defaults.on_error != settings.on_error {
            self.defaults.on_error = other.defaults.on_error;
        }
        if other.defaults.notifications != settings.notifications {
            self.defaults.notifications = other.defaults.notifications;
        }

        let containers = ContainerConfig::default();
        if other.containers.start_delay_ms != containers.start_delay_ms {
            self.containers.start_delay_ms = other.containers.start_delay_ms;
        }
        if other.containers.restart_delay_ms != containers.restart_delay_ms {
            self.containers.restart_delay_ms = other.containers.restart_delay_ms;
        }
        if other.containers.stop_delay_ms != containers.stop_delay_ms {
            self.containers.stop_delay_ms = other.containers.stop_delay_ms;
        }
        if other.containers.default_port != containers.default_port {
            self.containers.default_port = other.containers.default_port;
        }
        if other.containers.log_lines != containers.log_lines {
            self.containers.log_lines = other.containers.log_lines;
        }

        if other.storage.path.is_some() {
            self.storage.path = other.storage.path;
        }

        let events = EventsConfig::default();
        if other.events.capacity != events.capacity {
            self.events.capacity = other.events.capacity;
        }
        if other.events.log != events.log {
            self.events.log = other.events.log;
        }
    }
}

/// Load a workflow definition, as TOML or JSON by extension
pub fn load_definition(path: &Path) -> Result<WorkflowDefinition> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let definition: WorkflowDefinition = if is_json {
        serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?
    } else {
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?
    };

    Ok(definition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OnError;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = FlowdeckConfig::default();
        assert_eq!(config.defaults.timeout, 30);
        assert_eq!(config.defaults.retries, 3);
        assert_eq!(config.containers.start_delay(), Duration::from_secs(2));
        assert_eq!(config.containers.restart_delay(), Duration::from_secs(3));
        assert_eq!(config.containers.stop_delay(), Duration::ZERO);
        assert_eq!(config.events.capacity, 256);
    }

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
            [defaults]
            timeout = 60
            on_error = "continue"

            [containers]
            start_delay_ms = 10

            [storage]
            path = "/tmp/flowdeck-test.db"
        "#
        )
        .unwrap();

        let config = FlowdeckConfig::load_file(&config_path).unwrap();
        assert_eq!(config.defaults.timeout, 60);
        assert_eq!(config.defaults.on_error, OnError::Continue);
        assert_eq!(config.defaults.retries, 3);
        assert_eq!(config.containers.start_delay_ms, 10);
        assert_eq!(config.containers.restart_delay_ms, 3000);
        assert_eq!(
            config.storage.database_path().unwrap(),
            PathBuf::from("/tmp/flowdeck-test.db")
        );
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result: Result<FlowdeckConfig, _> = toml::from_str(
            r#"
            [containers]
            start_delay = 10
        "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_config_merge() {
        let mut base = FlowdeckConfig::default();
        base.defaults.timeout = 45;
        base.storage.path = Some("/var/lib/flowdeck.db".into());

        let mut project = FlowdeckConfig::default();
        project.containers.start_delay_ms = 5;
        project.events.log = false;

        base.merge(project);

        // Untouched fields keep the earlier layer's values
        assert_eq!(base.defaults.timeout, 45);
        assert_eq!(base.storage.path.as_deref(), Some("/var/lib/flowdeck.db"));

        // Overridden fields take the later layer's values
        assert_eq!(base.containers.start_delay_ms, 5);
        assert!(!base.events.log);
    }

    #[test]
    fn test_tilde_expansion() {
        let storage = StorageConfig {
            path: Some("~/flowdeck.db".into()),
        };
        let path = storage.database_path().unwrap();
        assert!(!path.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_load_definition_by_extension() {
        let dir = TempDir::new().unwrap();

        let toml_path = dir.path().join("lead.toml");
        std::fs::write(
            &toml_path,
            r#"
            name = "Lead alert"
            [[steps]]
            id = "t1"
            type = "trigger"
        "#,
        )
        .unwrap();

        let json_path = dir.path().join("lead.json");
        std::fs::write(
            &json_path,
            r#"{"name": "Lead alert", "steps": [{"id": "t1", "type": "trigger"}]}"#,
        )
        .unwrap();

        for path in [toml_path, json_path] {
            let def = load_definition(&path).unwrap();
            assert_eq!(def.name, "Lead alert");
            assert_eq!(def.steps.len(), 1);
        }
    }
}
