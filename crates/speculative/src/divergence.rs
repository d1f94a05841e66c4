/// How far `current` has drifted from `baseline`, from 0.0 to 1.0.
///
/// Positional character equality over the shorter string: a prefix or
/// extension of the baseline scores 0.0. Insertions near the start shift
/// every later position and score high even for small edits.
// TODO: replace with an edit-distance ratio once there is labelled transcript
// data to re-tune `divergence_threshold` against.
pub fn divergence(baseline: &str, current: &str) -> f32 {
    let a: Vec<char> = baseline.chars().collect();
    let b: Vec<char> = current.chars().collect();
    let shorter = a.len().min(b.len());
    if shorter == 0 {
        return if a.is_empty() { 0.0 } else { 1.0 };
    }
    let matches = a.iter().zip(&b).filter(|(x, y)| x == y).count();
    1.0 - matches as f32 / shorter as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_extension_is_zero() {
        assert_eq!(divergence("What is the", "What is the capital of France"), 0.0);
    }

    #[test]
    fn test_unrelated_text_is_high() {
        assert!(divergence("Tell me about dogs", "Actually, play music") > 0.3);
    }

    #[test]
    fn test_identical_is_zero() {
        assert_eq!(divergence("same text", "same text"), 0.0);
    }

    #[test]
    fn test_empty_sides() {
        assert_eq!(divergence("", "anything"), 0.0);
        assert_eq!(divergence("something", ""), 1.0);
        assert_eq!(divergence("", ""), 0.0);
    }

    #[test]
    fn test_leading_insertion_scores_high() {
        // Known weakness of positional comparison.
        assert!(divergence("book a table", "so book a table") > 0.3);
    }
}
