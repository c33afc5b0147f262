//! Text normalization applied before chunking.
//!
//! Manual text extracted from PDFs arrives with NUL bytes, stray control
//! characters, and ragged whitespace. Chunking assumes this pass has already
//! run; the pipeline performs it exactly once per document.

/// Strip control characters and collapse whitespace runs to single spaces.
///
/// Keeps every printable character (including non-ASCII); tabs, newlines,
/// and other whitespace all collapse into one space. The result is trimmed.
pub fn normalize_text(raw: &str) -> String {
    let mut normalized = String::with_capacity(raw.len());
    let mut pending_space = false;

    for ch in raw.chars() {
        if ch == '\0' || (ch.is_control() && !ch.is_whitespace()) {
            continue;
        }
        if ch.is_whitespace() {
            pending_space = !normalized.is_empty();
            continue;
        }
        if pending_space {
            normalized.push(' ');
            pending_space = false;
        }
        normalized.push(ch);
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_nul_and_control_characters() {
        let raw = "alarm\u{0}\u{1} code\u{7f} 17";
        assert_eq!(normalize_text(raw), "alarm code 17");
    }

    #[test]
    fn collapses_whitespace_runs() {
        let raw = "  defrost\t\tcycle \n\n  complete  ";
        assert_eq!(normalize_text(raw), "defrost cycle complete");
    }

    #[test]
    fn preserves_non_ascii_text() {
        assert_eq!(normalize_text("température  réglée"), "température réglée");
    }

    #[test]
    fn empty_and_whitespace_only_become_empty() {
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text(" \t\n "), "");
    }
}
