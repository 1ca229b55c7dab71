//! Small text-processing helpers shared by the Archivist (clean/chunk stages),
//! the Mentor Context Assembler (keyword extraction), and the Feedback
//! Processor (pattern-signature keywords).

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "this", "that", "these", "those", "and", "or", "but", "for", "with",
    "from", "into", "onto", "about", "over", "under", "again", "further", "then", "once",
    "here", "there", "when", "where", "why", "how", "all", "any", "both", "each", "few",
    "more", "most", "other", "some", "such", "only", "own", "same", "than", "too", "very",
    "just", "your", "yours", "you", "she", "her", "hers", "his", "him", "they", "them",
    "their", "what", "which", "who", "whom", "will", "would", "should", "could", "have",
    "has", "had", "having", "been", "being", "were", "was", "are", "is", "be", "not",
];

/// Normalize whitespace and strip common boilerplate.
/// Collapses runs of whitespace, trims lines, and drops lines that are
/// entirely boilerplate markers (quote/signature separators).
pub fn clean_text(raw: &str) -> String {
    raw.lines()
        .map(|line| line.trim())
        .filter(|line| !is_boilerplate_line(line))
        .collect::<Vec<_>>()
        .join("\n")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_boilerplate_line(line: &str) -> bool {
    if line.is_empty() {
        return true;
    }
    let stripped: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    !stripped.is_empty() && stripped.chars().all(|c| matches!(c, '-' | '_' | '=' | '*'))
}

/// Stopword-filtered tokens of length > 3, lowercased, in first-seen order,
/// deduplicated.
pub fn extract_keywords(text: &str, max: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut keywords = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if keywords.len() >= max {
            break;
        }
        let word = raw.to_lowercase();
        if word.len() <= 3 || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        if seen.insert(word.clone()) {
            keywords.push(word);
        }
    }
    keywords
}

/// Splits `text` into chunks of at most `size` characters with `overlap`
/// characters of trailing context repeated at the start of the next chunk
///. Splits on char boundaries, never mid-UTF8-codepoint.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    if chars.len() <= size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    let step = size.saturating_sub(overlap).max(1);
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Fraction of `a` that also appears in `b`, used for DismissedPattern
/// overlap checks.
pub fn overlap_ratio<T: PartialEq>(a: &[T], b: &[T]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let matched = a.iter().filter(|x| b.contains(x)).count();
    matched as f64 / a.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_collapses_whitespace_and_drops_separators() {
        let raw = "Hello   world\n---\n\nFoo    bar  ";
        assert_eq!(clean_text(raw), "Hello world Foo bar");
    }

    #[test]
    fn extract_keywords_drops_stopwords_and_short_tokens() {
        let keywords = extract_keywords("I was Executive Director at the org", 10);
        assert!(keywords.contains(&"executive".to_string()));
        assert!(keywords.contains(&"director".to_string()));
        assert!(!keywords.contains(&"was".to_string()));
        assert!(!keywords.contains(&"the".to_string()));
    }

    #[test]
    fn chunk_text_overlaps_consecutive_chunks() {
        let text = "a".repeat(250);
        let chunks = chunk_text(&text, 100, 20);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].len(), 100);
    }

    #[test]
    fn chunk_text_short_text_is_single_chunk() {
        let chunks = chunk_text("short", 1000, 100);
        assert_eq!(chunks, vec!["short".to_string()]);
    }

    #[test]
    fn overlap_ratio_counts_shared_elements() {
        let a = vec!["x", "y", "z"];
        let b = vec!["y", "z", "w"];
        assert!((overlap_ratio(&a, &b) - 2.0 / 3.0).abs() < 1e-9);
    }
}
