use once_cell::sync::Lazy;

static HASHTAG_RE: Lazy<regex::Regex> = Lazy::new(|| {
    regex::Regex::new(r"#([\p{L}\p{N}\p{P}]+)(?:\s|$)").expect("valid hashtag regex")
});

/// Labels written as `#label` and terminated by whitespace or end of text.
/// Deduplicated, in first-seen order.
pub fn extract_hashtags(text: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for captures in HASHTAG_RE.captures_iter(text) {
        let Some(label) = captures.get(1) else {
            continue;
        };
        let label = label.as_str();
        if !tags.iter().any(|existing| existing == label) {
            tags.push(label.to_string());
        }
    }
    tags
}
