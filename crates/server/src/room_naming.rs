//! Post-processing for gateway-produced room titles.

/// Normalize a raw title: collapse whitespace, strip wrapping quotes,
/// cap at 12 words. Returns None when nothing usable remains.
pub fn title_from_summary(raw: &str) -> Option<String> {
    let trimmed = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '\u{201c}' || c == '\u{201d}');

    let words: Vec<&str> = trimmed.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }

    let capped = if words.len() > 12 {
        words[..12].join(" ")
    } else {
        words.join(" ")
    };
    Some(capped)
}

#[cfg(test)]
mod tests {
    use super::title_from_summary;

    #[test]
    fn strips_quotes_and_collapses_whitespace() {
        assert_eq!(
            title_from_summary("  \"Planning   a   weekend trip\"  ").as_deref(),
            Some("Planning a weekend trip")
        );
    }

    #[test]
    fn caps_at_twelve_words() {
        let raw = "one two three four five six seven eight nine ten eleven twelve thirteen";
        let title = title_from_summary(raw).unwrap();
        assert_eq!(title.split_whitespace().count(), 12);
        assert!(!title.contains("thirteen"));
    }

    #[test]
    fn rejects_empty_titles() {
        assert!(title_from_summary("   ").is_none());
        assert!(title_from_summary("\"\"").is_none());
    }
}
