//! Request and response records for the translator capability.

use serde::{Deserialize, Serialize};

/// Coarse risk classification attached to a translated command.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Safe,
    Low,
    Medium,
    High,
}

/// Result of translating natural language into a shell command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandTranslation {
    /// The shell command to run.
    pub command: String,

    /// Short explanation of what the command does.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,

    /// Model confidence in `[0.0, 1.0]`.
    pub confidence: f32,

    /// Caution text the UI should surface before execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,

    /// Other commands that would also satisfy the request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<String>,

    #[serde(default)]
    pub requires_sudo: bool,

    #[serde(default)]
    pub is_dangerous: bool,

    #[serde(default)]
    pub risk_level: RiskLevel,

    /// Free-form tag like "file-management" or "networking".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Human-readable runtime estimate ("instant", "~1 min").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_duration: Option<String>,
}

impl CommandTranslation {
    /// Minimal translation with everything optional left empty.
    pub fn plain(command: impl Into<String>, confidence: f32) -> Self {
        Self {
            command: command.into(),
            explanation: None,
            confidence,
            warning: None,
            alternatives: Vec::new(),
            requires_sudo: false,
            is_dangerous: false,
            risk_level: RiskLevel::Safe,
            category: None,
            estimated_duration: None,
        }
    }
}

/// Result of asking the model why a command failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    /// Corrected command, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_command: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_cause: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution: Option<String>,

    pub is_fixable: bool,

    /// Manual step the user must take when the error is not fixable by a
    /// command change (install a package, log in, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_action: Option<String>,
}

impl ErrorAnalysis {
    pub fn not_fixable(cause: impl Into<String>) -> Self {
        Self {
            fixed_command: None,
            error_cause: Some(cause.into()),
            solution: None,
            is_fixable: false,
            required_action: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_serializes_without_empty_fields() {
        let translation = CommandTranslation::plain("ls -la", 0.97);
        let json = serde_json::to_string(&translation).unwrap();
        assert!(json.contains("\"command\":\"ls -la\""));
        assert!(!json.contains("warning"));
        assert!(!json.contains("alternatives"));
    }

    #[test]
    fn risk_levels_are_ordered() {
        assert!(RiskLevel::Safe < RiskLevel::Low);
        assert!(RiskLevel::Medium < RiskLevel::High);
    }

    #[test]
    fn analysis_deserializes_with_missing_optionals() {
        let json = r#"{ "is_fixable": true, "fixed_command": "git pull --rebase" }"#;
        let analysis: ErrorAnalysis = serde_json::from_str(json).unwrap();
        assert!(analysis.is_fixable);
        assert_eq!(analysis.fixed_command.as_deref(), Some("git pull --rebase"));
        assert!(analysis.solution.is_none());
    }
}
