use rand::Rng;
use rand::distr::Alphanumeric;

/// Short lowercase alphanumeric id, used for session and marker identities.
pub fn generate_simple_id(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

const MAX_OUTPUT_LENGTH: usize = 4000;

/// Truncate long command output from the middle, keeping head and tail.
pub fn truncate_output(output: &str) -> String {
    if output.len() <= MAX_OUTPUT_LENGTH {
        return output.to_string();
    }

    let offset = MAX_OUTPUT_LENGTH / 2;
    let start = output
        .char_indices()
        .nth(offset)
        .map(|(i, _)| i)
        .unwrap_or(output.len());
    let end = output
        .char_indices()
        .rev()
        .nth(offset)
        .map(|(i, _)| i)
        .unwrap_or(0);

    format!(
        "{}\n...truncated...\n{}",
        output.get(..start).unwrap_or(""),
        output.get(end..).unwrap_or("")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_lowercase() {
        let a = generate_simple_id(8);
        let b = generate_simple_id(8);
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
        assert_eq!(a, a.to_lowercase());
    }

    #[test]
    fn short_output_is_untouched() {
        assert_eq!(truncate_output("hello"), "hello");
    }

    #[test]
    fn long_output_keeps_head_and_tail() {
        let long = "x".repeat(10_000);
        let truncated = truncate_output(&long);
        assert!(truncated.len() < long.len());
        assert!(truncated.contains("...truncated..."));
    }
}
