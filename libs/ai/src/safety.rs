//! Dangerous-command screen.
//!
//! Applied to every AI-produced command (and every retry candidate) before
//! it is written to a session. This is not a sandbox; it catches the small
//! set of patterns where a single keystroke of confirmation fatigue would
//! destroy data. Matching is on the lowercased, whitespace-trimmed command.

/// `(substring_pattern, reason)` pairs. First match wins.
const DENYLIST: &[(&str, &str)] = &[
    (
        "rm -rf /",
        "recursive forced removal from the filesystem root",
    ),
    (
        "rm -rf /*",
        "recursive forced removal of all root children",
    ),
    ("rm -rf ~", "recursive forced removal of the home directory"),
    (":(){ :|:& };:", "fork bomb, exhausts system resources"),
    (":(){:|:&};:", "fork bomb, exhausts system resources"),
    ("dd if=/dev/zero of=/dev/", "zero-fill of a block device"),
    ("dd if=/dev/random of=/dev/", "overwrite of a block device"),
    ("mkfs", "creates a filesystem, wiping the target device"),
    ("> /dev/sda", "direct write to a block device"),
    ("> /dev/nvme", "direct write to a block device"),
    ("chmod -r 777 /", "world-writable permissions from root"),
    ("chmod 777 /", "world-writable permissions on root"),
    ("format c:", "formats the system drive"),
    (
        "del /f /s /q c:\\",
        "forced recursive deletion of the system drive",
    ),
];

/// Returns the block reason when `command` matches the denylist,
/// `None` when it is allowed to proceed.
pub fn dangerous_reason(command: &str) -> Option<&'static str> {
    let lower = command.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }
    DENYLIST
        .iter()
        .find(|(pattern, _)| lower.contains(pattern))
        .map(|(_, reason)| *reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rm_rf_root_is_blocked() {
        assert!(dangerous_reason("rm -rf /").is_some());
        assert!(dangerous_reason("sudo rm -rf / --no-preserve-root").is_some());
    }

    #[test]
    fn fork_bomb_is_blocked() {
        assert!(dangerous_reason(":(){ :|:& };:").is_some());
    }

    #[test]
    fn dd_zero_fill_is_blocked() {
        assert!(dangerous_reason("dd if=/dev/zero of=/dev/sda bs=1M").is_some());
    }

    #[test]
    fn mkfs_is_blocked() {
        assert!(dangerous_reason("mkfs.ext4 /dev/sda1").is_some());
    }

    #[test]
    fn windows_format_is_blocked() {
        assert!(dangerous_reason("FORMAT C: /y").is_some());
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(dangerous_reason("RM -RF /").is_some());
    }

    #[test]
    fn ordinary_commands_pass() {
        assert!(dangerous_reason("ls -la").is_none());
        assert!(dangerous_reason("rm -rf ./build").is_none());
        assert!(dangerous_reason("git status").is_none());
        assert!(dangerous_reason("dd if=image.iso of=backup.iso").is_none());
        assert!(dangerous_reason("").is_none());
    }
}
