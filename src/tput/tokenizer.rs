//! Text to words.

const DELIMITERS: &[char] = &[',', '.', '!', '?', ':', ';', '(', ')'];

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || DELIMITERS.contains(&c)
}

/// Lowercased words of `text`. Tokens without an alphabetic character are dropped.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(is_delimiter)
        .filter(|token| token.chars().any(char::is_alphabetic))
        .map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(text: &str) -> Vec<String> {
        tokenize(text).collect()
    }

    #[test]
    fn test_splits_on_punctuation() {
        assert_eq!(
            words("Hello, world! (Yes)...\tno?"),
            vec!["hello", "world", "yes", "no"]
        );
    }

    #[test]
    fn test_drops_non_alphabetic() {
        assert_eq!(words("42 - 7 b2b ---"), vec!["b2b"]);
        assert!(words("  ,;  ").is_empty());
    }

    #[test]
    fn test_unicode_lowercase() {
        assert_eq!(words("Ärger ÜBER"), vec!["ärger", "über"]);
    }
}
