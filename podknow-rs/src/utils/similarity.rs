//! String similarity for entity matching.

/// Normalized Levenshtein similarity in `[0, 1]` between two already
/// normalized entity values.
pub fn string_similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_similarity() {
        assert_eq!(string_similarity("openai", "openai"), 1.0);
        // One edit across eleven characters.
        assert!(string_similarity("sam altmann", "sam altman") > 0.85);
        assert!(string_similarity("google", "microsoft") < 0.5);
        assert_eq!(string_similarity("", ""), 1.0);
    }
}
