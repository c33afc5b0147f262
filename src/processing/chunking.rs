//! Fixed-window chunking with offset bookkeeping.
//!
//! Splits normalized manual text into overlapping windows of a fixed
//! character size. The window start advances by `window_size - overlap` each
//! step, the final window ends exactly at the end of the text, and windows
//! whose trimmed content is too short to carry retrievable signal are
//! dropped. Offsets are character offsets into the normalized text.
//!
//! The crate default policy is 800-character windows with a 150-character
//! overlap; both are explicit per-call parameters.

use super::types::ChunkingError;

/// Trimmed windows shorter than this carry no retrievable signal.
const MIN_WINDOW_CONTENT: usize = 5;

/// Chunks grouped per estimated page, matching the original coarse grouping.
const CHUNKS_PER_PAGE: usize = 3;

/// One overlapping window of normalized document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    /// Windowed substring of the normalized text.
    pub text: String,
    /// Character offset of the window start.
    pub start_offset: usize,
    /// Character offset one past the window end.
    pub end_offset: usize,
}

/// Split normalized text into overlapping fixed-size windows.
///
/// Preconditions: `overlap < window_size` and the text has already been
/// normalized (see [`super::normalize::normalize_text`]). Windows are
/// produced in strictly increasing `start_offset` order; the union of their
/// offset ranges covers the whole text and the last window ends exactly at
/// the text's character length. Pure function, safe to call concurrently.
pub fn split_text(
    text: &str,
    window_size: usize,
    overlap: usize,
) -> Result<Vec<Window>, ChunkingError> {
    if window_size == 0 || overlap >= window_size {
        return Err(ChunkingError::InvalidWindow {
            window_size,
            overlap,
        });
    }

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    if len == 0 {
        return Ok(Vec::new());
    }

    let step = window_size - overlap;
    let mut windows = Vec::with_capacity(len / step + 1);
    let mut start = 0;

    loop {
        let end = (start + window_size).min(len);
        let window_text: String = chars[start..end].iter().collect();
        if window_text.trim().chars().count() >= MIN_WINDOW_CONTENT {
            windows.push(Window {
                text: window_text,
                start_offset: start,
                end_offset: end,
            });
        }
        if end == len {
            break;
        }
        start += step;
    }

    Ok(windows)
}

/// Deterministic chunk identifier for a document and sequence index.
///
/// Re-running ingestion for the same document yields the same identifiers,
/// which is what makes the idempotency pre-check and upsert-as-replace work.
pub fn chunk_id(document_id: &str, sequence_index: usize) -> String {
    format!("{document_id}:{sequence_index:04}")
}

/// Coarse page estimate for a chunk, derived from its sequence index.
pub fn page_estimate(sequence_index: usize) -> usize {
    sequence_index / CHUNKS_PER_PAGE + 1
}

/// The chunk ids ingestion of this text would produce, without embedding.
///
/// Used by the idempotency pre-check: ids derive from the document id and
/// window positions alone, so a cheap chunking pass is enough.
pub fn expected_chunk_ids(
    document_id: &str,
    normalized_text: &str,
    window_size: usize,
    overlap: usize,
) -> Result<Vec<String>, ChunkingError> {
    let windows = split_text(normalized_text, window_size, overlap)?;
    Ok((0..windows.len())
        .map(|index| chunk_id(document_id, index))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_window_parameters() {
        assert!(matches!(
            split_text("text", 0, 0),
            Err(ChunkingError::InvalidWindow { .. })
        ));
        assert!(matches!(
            split_text("text", 100, 100),
            Err(ChunkingError::InvalidWindow { .. })
        ));
        assert!(matches!(
            split_text("text", 100, 150),
            Err(ChunkingError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn empty_text_produces_no_windows() {
        assert!(split_text("", 800, 150).unwrap().is_empty());
    }

    #[test]
    fn windows_step_by_window_minus_overlap() {
        // 2,000 characters with 800/150 must land at exactly these offsets.
        let text = "a".repeat(2000);
        let windows = split_text(&text, 800, 150).unwrap();
        let offsets: Vec<(usize, usize)> = windows
            .iter()
            .map(|w| (w.start_offset, w.end_offset))
            .collect();
        assert_eq!(offsets, vec![(0, 800), (650, 1450), (1300, 2000)]);
    }

    #[test]
    fn windows_cover_text_without_gaps() {
        let text = "b".repeat(3137);
        let windows = split_text(&text, 500, 120).unwrap();

        assert_eq!(windows.last().unwrap().end_offset, 3137);
        let mut covered_until = 0;
        for window in &windows {
            assert!(window.start_offset <= covered_until);
            assert!(window.end_offset > covered_until);
            covered_until = window.end_offset;
        }
        assert_eq!(covered_until, 3137);
    }

    #[test]
    fn start_offsets_strictly_increase() {
        let text = "c".repeat(5000);
        let windows = split_text(&text, 800, 150).unwrap();
        for pair in windows.windows(2) {
            assert!(pair[0].start_offset < pair[1].start_offset);
        }
    }

    #[test]
    fn short_final_window_is_kept_when_meaningful() {
        let text = "d".repeat(810);
        let windows = split_text(&text, 800, 150).unwrap();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[1].start_offset, 650);
        assert_eq!(windows[1].end_offset, 810);
    }

    #[test]
    fn near_empty_windows_are_dropped() {
        // Final window holds only two non-space characters after trimming.
        let mut text = "e".repeat(650);
        text.push_str(&" ".repeat(798));
        text.push_str("xy");
        let windows = split_text(&text, 800, 150).unwrap();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].end_offset, 800);
    }

    #[test]
    fn offsets_are_character_offsets() {
        let text = "é".repeat(900);
        let windows = split_text(&text, 800, 150).unwrap();
        assert_eq!(windows[0].end_offset, 800);
        assert_eq!(windows[0].text.chars().count(), 800);
        assert_eq!(windows.last().unwrap().end_offset, 900);
    }

    #[test]
    fn chunk_ids_are_deterministic_and_padded() {
        assert_eq!(chunk_id("manual-7", 3), "manual-7:0003");
        assert_eq!(chunk_id("manual-7", 3), chunk_id("manual-7", 3));
    }

    #[test]
    fn page_estimate_groups_chunks() {
        assert_eq!(page_estimate(0), 1);
        assert_eq!(page_estimate(2), 1);
        assert_eq!(page_estimate(3), 2);
    }

    #[test]
    fn expected_ids_match_produced_windows() {
        let text = "f".repeat(2000);
        let ids = expected_chunk_ids("manual-7", &text, 800, 150).unwrap();
        assert_eq!(
            ids,
            vec!["manual-7:0000", "manual-7:0001", "manual-7:0002"]
        );
    }
}
