//! Output truncation that keeps head and tail with an elision marker,
//! never splitting a UTF-8 character.

/// Truncate `s` to roughly `max_bytes`, retaining the start and end with a
/// marker in between. Strings within budget come back unchanged.
pub fn truncate_head_tail(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let head_budget = max_bytes / 2;
    let tail_budget = max_bytes - head_budget;

    let head_end = floor_char_boundary(s, head_budget);
    let tail_start = ceil_char_boundary(s, s.len() - tail_budget);
    let elided = tail_start - head_end;

    format!(
        "{}\n[... output truncated: {} bytes elided ...]\n{}",
        &s[..head_end],
        elided,
        &s[tail_start..]
    )
}

/// Largest index at or below `index` that falls on a char boundary. Safe to
/// slice with.
pub(crate) fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while index < s.len() && !s.is_char_boundary(index) {
        index += 1;
    }
    index
}
