//! Match Plugins
//!
//! Optional hooks wrapped around a whole match. A plugin is entered before
//! the first player is contacted and exited once the match is over, whether
//! it finished or failed.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

use crate::network::coordinator::{HostError, MatchSummary};

/// Plugin lookup errors.
#[derive(Debug, Error)]
pub enum PluginError {
    /// No plugin with this name.
    #[error("Unknown plugin: {0}")]
    Unknown(String),

    /// Plugin arguments were rejected.
    #[error("Plugin {name}: {reason}")]
    BadArgs {
        /// Plugin name.
        name: &'static str,
        /// What was wrong.
        reason: String,
    },
}

/// Scoped hooks around a match run.
pub trait MatchPlugin: Send {
    /// Name used on the command line.
    fn name(&self) -> &'static str;

    /// Called before the match starts. An error aborts the run.
    fn enter(&mut self) -> anyhow::Result<()>;

    /// Called after the match, with its outcome.
    fn exit(&mut self, outcome: Result<&MatchSummary, &HostError>);
}

/// Run `f` inside `plugin`'s enter/exit scope.
///
/// `exit` is called whenever `enter` succeeded, before `f`'s result is
/// returned.
pub fn run_with_plugin<F>(plugin: Option<&mut dyn MatchPlugin>, f: F) -> anyhow::Result<MatchSummary>
where
    F: FnOnce() -> Result<MatchSummary, HostError>,
{
    let Some(plugin) = plugin else {
        return Ok(f()?);
    };

    plugin.enter()?;
    let outcome = f();
    plugin.exit(outcome.as_ref());
    Ok(outcome?)
}

/// Resolve a plugin by name with its free-form argument string.
pub fn by_name(name: &str, args: &str) -> Result<Box<dyn MatchPlugin>, PluginError> {
    match name {
        "stopwatch" => Ok(Box::new(Stopwatch::new(args))),
        "summary" => Ok(Box::new(SummaryFile::new(args)?)),
        other => Err(PluginError::Unknown(other.to_string())),
    }
}

// ============================================================================
// Stopwatch
// ============================================================================

/// Logs how long the match took and how it ended.
#[derive(Debug, Default)]
pub struct Stopwatch {
    label: String,
    started: Option<Instant>,
    elapsed: Option<Duration>,
}

impl Stopwatch {
    /// Create a stopwatch; `label` prefixes its log lines when not empty.
    pub fn new(label: &str) -> Self {
        Self { label: label.trim().to_string(), ..Self::default() }
    }

    /// Duration of the last match, once exited.
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    fn prefix(&self) -> String {
        if self.label.is_empty() {
            String::new()
        } else {
            format!("[{}] ", self.label)
        }
    }
}

impl MatchPlugin for Stopwatch {
    fn name(&self) -> &'static str {
        "stopwatch"
    }

    fn enter(&mut self) -> anyhow::Result<()> {
        self.started = Some(Instant::now());
        self.elapsed = None;
        Ok(())
    }

    fn exit(&mut self, outcome: Result<&MatchSummary, &HostError>) {
        let elapsed = self.started.take().map(|t| t.elapsed()).unwrap_or_default();
        self.elapsed = Some(elapsed);
        match outcome {
            Ok(summary) => info!(
                "{}Match took {:.3}s over {} turns",
                self.prefix(),
                elapsed.as_secs_f64(),
                summary.turns
            ),
            Err(e) => warn!("{}Match failed after {:.3}s: {}", self.prefix(), elapsed.as_secs_f64(), e),
        }
    }
}

// ============================================================================
// Summary file
// ============================================================================

/// Writes the match summary as JSON to a file.
#[derive(Debug)]
pub struct SummaryFile {
    path: PathBuf,
}

impl SummaryFile {
    /// `args` is the destination path.
    pub fn new(args: &str) -> Result<Self, PluginError> {
        let path = args.trim();
        if path.is_empty() {
            return Err(PluginError::BadArgs {
                name: "summary",
                reason: "expected a destination path".to_string(),
            });
        }
        Ok(Self { path: PathBuf::from(path) })
    }
}

impl MatchPlugin for SummaryFile {
    fn name(&self) -> &'static str {
        "summary"
    }

    fn enter(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn exit(&mut self, outcome: Result<&MatchSummary, &HostError>) {
        let Ok(summary) = outcome else {
            return;
        };
        let written = serde_json::to_string_pretty(summary)
            .map_err(anyhow::Error::from)
            .and_then(|json| fs::write(&self.path, json).map_err(anyhow::Error::from));
        if let Err(e) = written {
            warn!("Cannot write summary to {}: {}", self.path.display(), e);
        }
    }
}
