//! Character-level edit similarity.

/// Similarity in [0, 1] from the Levenshtein distance over chars.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let distance = levenshtein(&a, &b);
    let max_len = a.len().max(b.len());
    1.0 - distance as f64 / max_len as f64
}

/// Levenshtein distance using two rows.
fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr: Vec<usize> = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_is_one() {
        assert_eq!(similarity("loose", "loose"), 1.0);
        assert_eq!(similarity("", ""), 1.0);
    }

    #[test]
    fn test_single_edit() {
        assert!((similarity("loose", "lose") - 0.8).abs() < 1e-9);
        assert_eq!(similarity("abc", ""), 0.0);
    }

    #[test]
    fn test_counts_chars_not_bytes() {
        // one substitution over three Hangul syllables
        assert!((similarity("풀어줘", "풀어요") - (2.0 / 3.0)).abs() < 1e-9);
    }
}
