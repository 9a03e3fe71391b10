//! The command block: one atomic record of user input, the generated
//! command, its streamed output, and its final status.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use termweave_ai::RiskLevel;

/// A block shared between the manager, the output batcher, and the view.
/// The batcher only ever holds a `Weak` to it.
pub type SharedBlock = Arc<Mutex<CommandBlock>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Pending,
    Generating,
    Confirming,
    Executing,
    Success,
    Failed,
    Cancelled,
}

impl BlockStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BlockStatus::Success | BlockStatus::Failed | BlockStatus::Cancelled
        )
    }

    /// Position in the forward-only pipeline; terminal states share the end.
    fn rank(&self) -> u8 {
        match self {
            BlockStatus::Pending => 0,
            BlockStatus::Generating => 1,
            BlockStatus::Confirming => 2,
            BlockStatus::Executing => 3,
            BlockStatus::Success | BlockStatus::Failed | BlockStatus::Cancelled => 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandBlock {
    /// Monotonic per session.
    pub id: u64,
    pub user_input: String,
    pub generated_command: String,
    pub explanation: Option<String>,
    pub output: String,
    pub error: String,
    status: BlockStatus,
    pub exit_code: Option<i32>,
    pub duration: Option<Duration>,
    /// Working directory at the moment of dispatch.
    pub working_directory: String,
    pub is_from_cache: bool,
    pub cache_similarity: Option<f32>,
    pub risk_level: RiskLevel,
    pub confidence: Option<f32>,
    pub category: Option<String>,
    pub warning: Option<String>,
    pub alternatives: Vec<String>,
    pub is_dangerous: bool,
    pub created_at: DateTime<Utc>,
    /// Bumped on every mutation so an incremental renderer knows what to
    /// repaint without diffing fields.
    revision: u64,
}

impl CommandBlock {
    pub fn new(id: u64, user_input: impl Into<String>, working_directory: impl Into<String>) -> Self {
        Self {
            id,
            user_input: user_input.into(),
            generated_command: String::new(),
            explanation: None,
            output: String::new(),
            error: String::new(),
            status: BlockStatus::Pending,
            exit_code: None,
            duration: None,
            working_directory: working_directory.into(),
            is_from_cache: false,
            cache_similarity: None,
            risk_level: RiskLevel::Safe,
            confidence: None,
            category: None,
            warning: None,
            alternatives: Vec::new(),
            is_dangerous: false,
            created_at: Utc::now(),
            revision: 0,
        }
    }

    pub fn shared(self) -> SharedBlock {
        Arc::new(Mutex::new(self))
    }

    pub fn status(&self) -> BlockStatus {
        self.status
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Advance the status. Transitions are monotonic: moving backwards is
    /// refused, and a terminal status is never rewritten. `Cancelled` is
    /// reachable from any non-terminal state. Returns whether the
    /// transition was applied.
    pub fn try_set_status(&mut self, next: BlockStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        if next == BlockStatus::Cancelled {
            self.status = BlockStatus::Cancelled;
            self.touch();
            return true;
        }
        if next.rank() <= self.status.rank() && next != self.status {
            return false;
        }
        if next == self.status {
            return true;
        }
        self.status = next;
        self.touch();
        true
    }

    pub fn append_output(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.output.push_str(text);
        self.touch();
    }

    pub fn append_error(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.error.push_str(text);
        self.touch();
    }

    /// Record the final result of execution.
    pub fn mark_finished(&mut self, exit_code: i32, duration: Duration) {
        self.exit_code = Some(exit_code);
        self.duration = Some(duration);
        let terminal = if exit_code == 0 {
            BlockStatus::Success
        } else {
            BlockStatus::Failed
        };
        self.try_set_status(terminal);
        self.touch();
    }

    /// Attach what the translator produced for this block.
    pub fn apply_translation(&mut self, translation: &termweave_ai::CommandTranslation) {
        self.generated_command = translation.command.clone();
        self.explanation = translation.explanation.clone();
        self.confidence = Some(translation.confidence);
        self.risk_level = translation.risk_level;
        self.category = translation.category.clone();
        self.warning = translation.warning.clone();
        self.alternatives = translation.alternatives.clone();
        self.is_dangerous = translation.is_dangerous;
        self.touch();
    }

    pub fn duration_text(&self) -> String {
        match self.duration {
            None => String::new(),
            Some(d) if d.as_secs() >= 60 => {
                format!("{}m {}s", d.as_secs() / 60, d.as_secs() % 60)
            }
            Some(d) if d.as_secs() >= 1 => format!("{:.1}s", d.as_secs_f64()),
            Some(d) => format!("{}ms", d.as_millis()),
        }
    }

    fn touch(&mut self) {
        self.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_advances_through_the_pipeline() {
        let mut block = CommandBlock::new(1, "list files", "/home/u");
        assert_eq!(block.status(), BlockStatus::Pending);
        assert!(block.try_set_status(BlockStatus::Generating));
        assert!(block.try_set_status(BlockStatus::Confirming));
        assert!(block.try_set_status(BlockStatus::Executing));
        assert!(block.try_set_status(BlockStatus::Success));
        assert!(block.status().is_terminal());
    }

    #[test]
    fn stages_can_be_skipped_but_not_rewound() {
        let mut block = CommandBlock::new(1, "x", "/");
        // A direct command skips generation and confirmation.
        assert!(block.try_set_status(BlockStatus::Executing));
        assert!(!block.try_set_status(BlockStatus::Generating));
        assert_eq!(block.status(), BlockStatus::Executing);
    }

    #[test]
    fn terminal_status_is_never_overwritten() {
        let mut block = CommandBlock::new(1, "x", "/");
        block.try_set_status(BlockStatus::Executing);
        block.mark_finished(0, Duration::from_millis(120));
        assert_eq!(block.status(), BlockStatus::Success);

        assert!(!block.try_set_status(BlockStatus::Failed));
        assert!(!block.try_set_status(BlockStatus::Cancelled));
        assert!(!block.try_set_status(BlockStatus::Executing));
        assert_eq!(block.status(), BlockStatus::Success);
    }

    #[test]
    fn cancel_is_reachable_from_confirming() {
        let mut block = CommandBlock::new(1, "x", "/");
        block.try_set_status(BlockStatus::Generating);
        block.try_set_status(BlockStatus::Confirming);
        assert!(block.try_set_status(BlockStatus::Cancelled));
        assert_eq!(block.status(), BlockStatus::Cancelled);
        // And it is terminal.
        assert!(!block.try_set_status(BlockStatus::Executing));
    }

    #[test]
    fn nonzero_exit_marks_failed() {
        let mut block = CommandBlock::new(1, "x", "/");
        block.try_set_status(BlockStatus::Executing);
        block.mark_finished(2, Duration::from_secs(1));
        assert_eq!(block.status(), BlockStatus::Failed);
        assert_eq!(block.exit_code, Some(2));
    }

    #[test]
    fn revision_bumps_on_every_mutation() {
        let mut block = CommandBlock::new(1, "x", "/");
        let r0 = block.revision();
        block.append_output("chunk ");
        let r1 = block.revision();
        assert!(r1 > r0);
        block.append_output("two");
        assert!(block.revision() > r1);
        assert_eq!(block.output, "chunk two");
        // Empty appends are not mutations.
        let r2 = block.revision();
        block.append_output("");
        assert_eq!(block.revision(), r2);
    }

    #[test]
    fn duration_text_scales_units() {
        let mut block = CommandBlock::new(1, "x", "/");
        assert_eq!(block.duration_text(), "");
        block.duration = Some(Duration::from_millis(250));
        assert_eq!(block.duration_text(), "250ms");
        block.duration = Some(Duration::from_millis(2500));
        assert_eq!(block.duration_text(), "2.5s");
        block.duration = Some(Duration::from_secs(95));
        assert_eq!(block.duration_text(), "1m 35s");
    }
}
