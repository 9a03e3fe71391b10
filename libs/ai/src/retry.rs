//! Bounded error-analysis retry loop.
//!
//! Given a failed command and its stderr, tries to produce a working
//! command: cheap local heuristics first, then the translator's
//! `analyze_error`, re-executing each candidate until it succeeds, the
//! attempt budget runs out, or the analysis declares the failure
//! unfixable. Every candidate passes the dangerous-command screen before
//! it is dispatched; a screened command ends the loop with a blocked
//! status and is never executed.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::capability::{AiError, TranslationContext, Translator};
use crate::safety::dangerous_reason;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// What executing one candidate produced. The caller adapts its session's
/// command result into this.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub stderr: String,
}

impl ExecOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Progress notifications, one UI row per event.
#[derive(Debug, Clone)]
pub enum RetryEvent {
    AttemptStarted { attempt: u32, command: String },
    HeuristicApplied { attempt: u32, description: String },
    AnalysisRequested { attempt: u32 },
    CommandBlocked { command: String, reason: String },
    AttemptFailed { attempt: u32, exit_code: i32 },
}

/// Terminal outcome of the loop.
#[derive(Debug, Clone)]
pub enum RetryStatus {
    /// A candidate exited 0.
    Fixed { command: String, attempts: u32 },
    /// Attempt budget exhausted without success.
    Exhausted { attempts: u32 },
    /// The analysis said the failure cannot be fixed by changing the command.
    NotFixable { required_action: Option<String> },
    /// A candidate matched the danger screen; nothing was dispatched.
    Blocked {
        command: String,
        reason: String,
        is_dangerous: bool,
    },
}

pub struct ErrorRetryLoop<'a> {
    translator: &'a dyn Translator,
    max_attempts: u32,
    events: Option<mpsc::UnboundedSender<RetryEvent>>,
}

impl<'a> ErrorRetryLoop<'a> {
    pub fn new(translator: &'a dyn Translator, max_attempts: u32) -> Self {
        Self {
            translator,
            max_attempts,
            events: None,
        }
    }

    /// Attach a progress channel; each event renders as its own system
    /// message row rather than a new command block.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<RetryEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: RetryEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Run the loop. `execute` dispatches one candidate command and returns
    /// its outcome; it is called at most `max_attempts` times.
    pub async fn run<F, Fut>(
        &self,
        command: &str,
        stderr: &str,
        context: Option<&TranslationContext>,
        mut execute: F,
    ) -> Result<RetryStatus, AiError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = ExecOutcome>,
    {
        let mut last_command = command.to_string();
        let mut last_stderr = stderr.to_string();
        let mut attempts = 0u32;

        while attempts < self.max_attempts {
            let attempt = attempts + 1;

            let candidate = match heuristic_fix(&last_command, &last_stderr) {
                Some((fixed, description)) => {
                    debug!(attempt, %fixed, description, "applying local heuristic fix");
                    self.emit(RetryEvent::HeuristicApplied {
                        attempt,
                        description: description.to_string(),
                    });
                    fixed
                }
                None => {
                    self.emit(RetryEvent::AnalysisRequested { attempt });
                    let analysis = self
                        .translator
                        .analyze_error(&last_command, &last_stderr, context)
                        .await?;

                    if !analysis.is_fixable {
                        return Ok(RetryStatus::NotFixable {
                            required_action: analysis.required_action,
                        });
                    }
                    match analysis.fixed_command {
                        Some(fixed) if !fixed.trim().is_empty() && fixed != last_command => fixed,
                        _ => {
                            debug!(attempt, "analysis produced no new command, stopping");
                            return Ok(RetryStatus::Exhausted { attempts });
                        }
                    }
                }
            };

            if let Some(reason) = dangerous_reason(&candidate) {
                warn!(command = %candidate, reason, "retry candidate blocked by danger screen");
                self.emit(RetryEvent::CommandBlocked {
                    command: candidate.clone(),
                    reason: reason.to_string(),
                });
                return Ok(RetryStatus::Blocked {
                    command: candidate,
                    reason: reason.to_string(),
                    is_dangerous: true,
                });
            }

            self.emit(RetryEvent::AttemptStarted {
                attempt,
                command: candidate.clone(),
            });

            let outcome = execute(candidate.clone()).await;
            attempts = attempt;

            if outcome.succeeded() {
                return Ok(RetryStatus::Fixed {
                    command: candidate,
                    attempts,
                });
            }

            self.emit(RetryEvent::AttemptFailed {
                attempt,
                exit_code: outcome.exit_code,
            });
            last_command = candidate;
            last_stderr = outcome.stderr;
        }

        Ok(RetryStatus::Exhausted { attempts })
    }
}

/// Binaries commonly invoked by a name that differs from how they are
/// installed. Used for "command not found" fixes without a model call.
const INSTALL_NAMES: &[(&str, &str)] = &[
    ("python", "python3"),
    ("pip", "pip3"),
    ("vi", "vim"),
    ("netcat", "nc"),
    ("ifconfig", "ip addr"),
];

/// Cheap fixes for the two most common failure shapes.
fn heuristic_fix(command: &str, stderr: &str) -> Option<(String, &'static str)> {
    let lower = stderr.to_lowercase();

    if lower.contains("permission denied") && !command.trim_start().starts_with("sudo ") {
        return Some((format!("sudo {command}"), "retrying with sudo"));
    }

    if lower.contains("command not found") || lower.contains("not recognized as") {
        let first = command.split_whitespace().next()?;
        let replacement = INSTALL_NAMES
            .iter()
            .find(|(name, _)| *name == first)
            .map(|(_, standard)| *standard)?;
        let rest = command.strip_prefix(first).unwrap_or("");
        return Some((
            format!("{replacement}{rest}"),
            "substituting the standard install name",
        ));
    }

    None
}
