//! URL utilities for consistent URL handling
//!
//! This module provides utilities for normalizing URLs to prevent issues
//! with trailing slashes when constructing API endpoints.

/// Normalize a base URL by removing trailing slashes
///
/// # Examples
///
/// ```
/// use causerie::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("https://api.example.com/v1"), "https://api.example.com/v1");
/// assert_eq!(normalize_base_url("https://api.example.com/v1/"), "https://api.example.com/v1");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Construct the streaming endpoint URL for a model
///
/// # Examples
///
/// ```
/// use causerie::utils::url::stream_generate_url;
///
/// assert_eq!(
///     stream_generate_url("https://generativelanguage.googleapis.com/v1beta", "gemini-2.5-flash"),
///     "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:streamGenerateContent?alt=sse"
/// );
/// ```
pub fn stream_generate_url(base_url: &str, model: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    format!("{normalized_base}/models/{model}:streamGenerateContent?alt=sse")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("https://api.example.com/v1"),
            "https://api.example.com/v1"
        );
        assert_eq!(
            normalize_base_url("https://api.example.com/v1///"),
            "https://api.example.com/v1"
        );
        assert_eq!(normalize_base_url(""), "");
    }

    #[test]
    fn test_stream_generate_url() {
        assert_eq!(
            stream_generate_url("https://example.invalid/v1beta/", "m1"),
            "https://example.invalid/v1beta/models/m1:streamGenerateContent?alt=sse"
        );
    }
}
