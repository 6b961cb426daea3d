//! Small filesystem and string helpers shared across modules.

use anyhow::{Context, Result};
use std::path::Path;

/// Create `dir` (and its parents) if it does not already exist.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }
    Ok(())
}

/// Assign a short random id, used for request ids and execution record ids
/// where a full UUID would be noisy in logs.
pub fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Truncate `s` to at most `max_len` bytes on a char boundary, appending a
/// marker if truncation occurred. Used to cap stored command output.
pub fn truncate_output(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n...[truncated]", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_dir_creates_nested_path() {
        let base = std::env::temp_dir().join(format!("forgehook-test-{}", short_id()));
        let nested = base.join("a").join("b");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
        std::fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn short_id_is_twelve_hex_chars() {
        let id = short_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn truncate_output_leaves_short_strings_untouched() {
        assert_eq!(truncate_output("short", 100), "short");
    }

    #[test]
    fn truncate_output_marks_long_strings() {
        let long = "x".repeat(200);
        let truncated = truncate_output(&long, 50);
        assert!(truncated.len() < long.len());
        assert!(truncated.ends_with("...[truncated]"));
    }
}
