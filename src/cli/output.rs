//! Output handlers for CLI commands
//!
//! Supports console (pretty), JSON, and quiet output modes.

use serde::{Deserialize, Serialize};
use std::io::{self, Write};

/// Output mode for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Console,
    Json,
    Quiet,
}

impl OutputMode {
    /// Pick the mode from the global flags; `--json` wins over `--quiet`
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if json {
            Self::Json
        } else if quiet {
            Self::Quiet
        } else {
            Self::Console
        }
    }
}

/// Progress reported while a command runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputEvent {
    TransitionStarted {
        container: String,
        action: String,
        status: String,
    },
    TransitionSettled {
        container: String,
        status: String,
        duration_ms: u64,
    },
    TransitionCancelled {
        container: String,
        status: String,
    },
    TransitionFailed {
        container: String,
        error: String,
    },
    Issue {
        kind: String,
        message: String,
        step_id: Option<String>,
    },
    Info {
        message: String,
    },
    Debug {
        message: String,
    },
}

/// Output handler trait
pub trait OutputHandler: Send + Sync {
    /// Report progress
    fn emit(&self, event: OutputEvent);

    /// Write the command's result: `value` for machines, `summary` for people
    fn record(&self, value: serde_json::Value, summary: &str);
}

/// Console output handler
pub struct ConsoleHandler {
    debug: bool,
}

impl ConsoleHandler {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    fn format_duration(ms: u64) -> String {
        if ms < 1000 {
            format!("{}ms", ms)
        } else {
            format!("{:.1}s", ms as f64 / 1000.0)
        }
    }

    fn marker(kind: &str) -> &'static str {
        match kind {
            "error" => "✗",
            "warning" => "!",
            _ => "·",
        }
    }
}

impl OutputHandler for ConsoleHandler {
    fn emit(&self, event: OutputEvent) {
        match event {
            OutputEvent::TransitionStarted {
                container,
                action,
                status,
            } => {
                eprint!("{} {} ({})... ", action, container, status);
                let _ = io::stderr().flush();
            }
            OutputEvent::TransitionSettled {
                status,
                duration_ms,
                ..
            } => {
                eprintln!("✓ {} ({})", status, Self::format_duration(duration_ms));
            }
            OutputEvent::TransitionCancelled { status, .. } => {
                eprintln!("✗ cancelled, back to {}", status);
            }
            OutputEvent::TransitionFailed { error, .. } => {
                eprintln!("✗ {}", error);
            }
            OutputEvent::Issue {
                kind,
                message,
                step_id,
            } => match step_id {
                Some(step) => eprintln!("  {} [{}] {} ({})", Self::marker(&kind), kind, message, step),
                None => eprintln!("  {} [{}] {}", Self::marker(&kind), kind, message),
            },
            OutputEvent::Info { message } => {
                eprintln!("{}", message);
            }
            OutputEvent::Debug { message } => {
                if self.debug {
                    eprintln!("[debug] {}", message);
                }
            }
        }
    }

    fn record(&self, _value: serde_json::Value, summary: &str) {
        if !summary.is_empty() {
            println!("{}", summary);
        }
    }
}

/// JSON output handler
pub struct JsonHandler {
    pretty: bool,
}

impl JsonHandler {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn print_json<T: Serialize>(&self, value: &T) {
        let json = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };

        if let Ok(s) = json {
            println!("{}", s);
        }
    }
}

impl OutputHandler for JsonHandler {
    fn emit(&self, event: OutputEvent) {
        // progress goes to stderr so stdout stays one JSON document
        if let Ok(s) = serde_json::to_string(&event) {
            eprintln!("{}", s);
        }
    }

    fn record(&self, value: serde_json::Value, _summary: &str) {
        self.print_json(&value);
    }
}

/// Quiet handler: results only, no progress
pub struct QuietHandler;

impl OutputHandler for QuietHandler {
    fn emit(&self, _event: OutputEvent) {}

    fn record(&self, _value: serde_json::Value, summary: &str) {
        if !summary.is_empty() {
            println!("{}", summary);
        }
    }
}

/// Create an output handler based on mode
pub fn create_handler(mode: OutputMode, debug: bool) -> Box<dyn OutputHandler> {
    match mode {
        OutputMode::Console => Box::new(ConsoleHandler::new(debug)),
        OutputMode::Json => Box::new(JsonHandler::new(true)),
        OutputMode::Quiet => Box::new(QuietHandler),
    }
}
