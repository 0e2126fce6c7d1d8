//! Base URL candidates for locating a session on a web server.

use reqwest::Url;

/// Expand what the user typed into URLs worth probing, in order: as given,
/// then with `https://`, `http://`, `https://www.` and `http://www.`.
/// Candidates that are not valid http(s) URLs are dropped.
pub fn candidate_base_urls(input: &str) -> Vec<String> {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Vec::new();
    }
    let host = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"))
        .unwrap_or(trimmed);

    let raw = [
        trimmed.to_string(),
        format!("https://{host}"),
        format!("http://{host}"),
        format!("https://www.{host}"),
        format!("http://www.{host}"),
    ];

    let mut candidates: Vec<String> = Vec::with_capacity(raw.len());
    for candidate in raw {
        if is_http_url(&candidate) && !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    candidates
}

/// Configured hosts first, then the expansions of every user-supplied URL.
pub fn all_candidates(configured: &[String], supplied: &[String]) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    let configured = configured
        .iter()
        .map(|h| h.trim().trim_end_matches('/').to_string())
        .filter(|h| is_http_url(h));
    let expanded = supplied.iter().flat_map(|s| candidate_base_urls(s));
    for candidate in configured.chain(expanded) {
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    candidates
}

fn is_http_url(candidate: &str) -> bool {
    match Url::parse(candidate) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.has_host(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_host_expansion() {
        assert_eq!(
            candidate_base_urls("example.com/"),
            vec![
                "https://example.com",
                "http://example.com",
                "https://www.example.com",
                "http://www.example.com",
            ]
        );
    }

    #[test]
    fn test_scheme_is_tried_as_given_first() {
        let candidates = candidate_base_urls(" http://example.com/app ");
        assert_eq!(candidates[0], "http://example.com/app");
        assert_eq!(candidates[1], "https://example.com/app");
        assert_eq!(candidates.len(), 4);
    }

    #[test]
    fn test_configured_hosts_come_first() {
        let candidates = all_candidates(
            &["http://127.0.0.1:8080/".to_string(), "not a url".to_string()],
            &["example.com".to_string()],
        );
        assert_eq!(candidates[0], "http://127.0.0.1:8080");
        assert_eq!(candidates[1], "https://example.com");
        assert_eq!(candidates.len(), 5);
        assert!(candidate_base_urls("   ").is_empty());
    }
}
