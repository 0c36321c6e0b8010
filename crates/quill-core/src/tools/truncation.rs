//! Output truncation for tool results.
//!
//! Dual-limit truncation (lines and bytes) keeping either the head or the
//! tail. Shell output keeps the tail (recent output matters most); file
//! reads keep the head.

#[derive(Clone, Copy)]
enum Keep {
    Head,
    Tail,
}

/// Result of a truncation operation
pub struct TruncationResult {
    pub text: String,
    pub was_truncated: bool,
    pub lines_shown: usize,
    pub lines_total: usize,
    pub bytes_shown: usize,
    pub bytes_total: usize,
}

impl TruncationResult {
    /// Format a truncation notice for appending to output
    pub fn notice(&self) -> Option<String> {
        if !self.was_truncated {
            return None;
        }
        Some(format!(
            "\n[Output truncated: showed {} of {} lines ({}/{} bytes)]",
            self.lines_shown, self.lines_total, self.bytes_shown, self.bytes_total,
        ))
    }
}

/// Keep the last N lines/bytes.
pub fn truncate_tail(text: &str, max_lines: usize, max_bytes: usize) -> TruncationResult {
    truncate(text, max_lines, max_bytes, Keep::Tail)
}

/// Keep the first N lines/bytes.
pub fn truncate_head(text: &str, max_lines: usize, max_bytes: usize) -> TruncationResult {
    truncate(text, max_lines, max_bytes, Keep::Head)
}

fn truncate(text: &str, max_lines: usize, max_bytes: usize, keep: Keep) -> TruncationResult {
    let bytes_total = text.len();
    let lines: Vec<&str> = text.lines().collect();
    let lines_total = lines.len();

    if lines_total <= max_lines && bytes_total <= max_bytes {
        return TruncationResult {
            text: text.to_string(),
            was_truncated: false,
            lines_shown: lines_total,
            lines_total,
            bytes_shown: bytes_total,
            bytes_total,
        };
    }

    let line_limited = if lines_total > max_lines {
        match keep {
            Keep::Head => &lines[..max_lines],
            Keep::Tail => &lines[lines_total - max_lines..],
        }
    } else {
        &lines[..]
    };

    let joined = line_limited.join("\n");
    let (final_text, lines_shown) = if joined.len() > max_bytes {
        // Trim to the byte limit, aligned to a line boundary.
        let trimmed = match keep {
            Keep::Head => {
                let cutoff = joined[..max_bytes].rfind('\n').unwrap_or(max_bytes);
                &joined[..cutoff]
            }
            Keep::Tail => {
                let skip = joined.len() - max_bytes;
                let start = joined[skip..]
                    .find('\n')
                    .map(|pos| skip + pos + 1)
                    .unwrap_or(skip);
                &joined[start..]
            }
        };
        (trimmed.to_string(), trimmed.lines().count())
    } else {
        (joined, line_limited.len())
    };

    let bytes_shown = final_text.len();
    TruncationResult {
        text: final_text,
        was_truncated: true,
        lines_shown,
        lines_total,
        bytes_shown,
        bytes_total,
    }
}
