//! Best-effort removal of text a model repeats from the end of the prompt.

/// Shortest run treated as a repeat. Shorter matches are usually coincidence.
const MIN_OVERLAP_CHARS: usize = 5;
const MAX_OVERLAP_CHARS: usize = 20;

/// Drop the longest prefix of `continuation` (5 to 20 chars) that repeats the
/// end of `existing`.
pub fn trim_repeated_overlap(existing: &str, continuation: &str) -> String {
    let existing = existing.trim_end();
    let tail: Vec<char> = existing.chars().rev().take(MAX_OVERLAP_CHARS).collect();
    let head: Vec<char> = continuation.trim_start().chars().take(MAX_OVERLAP_CHARS).collect();

    let longest = tail.len().min(head.len());
    for len in (MIN_OVERLAP_CHARS..=longest).rev() {
        let tail_matches = tail[..len].iter().rev().eq(head[..len].iter());
        if tail_matches {
            let rest: String = continuation.trim_start().chars().skip(len).collect();
            return rest.trim_start().to_string();
        }
    }
    continuation.to_string()
}
