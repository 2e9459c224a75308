//! URL utilities for consistent URL handling
//!
//! This module provides the URL manipulation the proxy needs when mapping
//! origin manifests into its own namespace: base directories, joins,
//! cache-busting tokens and credential obfuscation for logs.

use url::Url;

/// Name of the cache-busting query parameter appended to rewritten references
pub const CACHE_TOKEN_PARAM: &str = "v";

/// URL utilities for consistent URL handling
pub struct UrlUtils;

impl UrlUtils {
    /// Directory portion of an origin manifest URL, always ending in `/`.
    ///
    /// The query string and fragment are dropped:
    ///
    /// ```rust
    /// use hls_proxy::utils::url::UrlUtils;
    ///
    /// assert_eq!(
    ///     UrlUtils::base_directory("http://o/hls/live.m3u8?token=1").unwrap(),
    ///     "http://o/hls/"
    /// );
    /// ```
    pub fn base_directory(manifest_url: &str) -> Result<String, url::ParseError> {
        let mut url = Url::parse(manifest_url)?;
        let dir = match url.path().rfind('/') {
            Some(idx) => url.path()[..=idx].to_string(),
            None => "/".to_string(),
        };
        url.set_path(&dir);
        url.set_query(None);
        url.set_fragment(None);
        Ok(url.to_string())
    }

    /// Join a base URL with a path segment
    ///
    /// This function safely joins URLs, handling trailing slashes and proper encoding.
    pub fn join(base: &str, path: &str) -> Result<String, url::ParseError> {
        let base_url = Url::parse(base)?;
        let joined = base_url.join(path)?;
        Ok(joined.to_string())
    }

    /// Whether a reference already carries a scheme we can fetch
    pub fn is_absolute_http(reference: &str) -> bool {
        let lower = reference.get(..8).unwrap_or(reference).to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }

    /// Reference with its query string and fragment removed
    pub fn strip_query(reference: &str) -> &str {
        let end = reference.find(['?', '#']).unwrap_or(reference.len());
        &reference[..end]
    }

    /// Set the cache-busting parameter on a reference, replacing any existing one.
    ///
    /// Other query parameters are kept in order, so applying this twice yields
    /// a single token.
    pub fn with_cache_token(reference: &str, token: &str) -> String {
        let (path, query) = match reference.split_once('?') {
            Some((path, query)) => (path, query),
            None => (reference, ""),
        };

        let mut params: Vec<&str> = query
            .split('&')
            .filter(|p| !p.is_empty())
            .filter(|p| p.split('=').next() != Some(CACHE_TOKEN_PARAM))
            .collect();
        let token_param = format!("{CACHE_TOKEN_PARAM}={token}");
        params.push(&token_param);

        format!("{path}?{}", params.join("&"))
    }

    /// Obfuscate credentials in URLs for safe logging
    pub fn obfuscate_credentials(url: &str) -> String {
        use regex::Regex;

        let mut obfuscated = url.to_string();

        // Handle URL auth (user:pass@host)
        if let Ok(parsed) = Url::parse(url)
            && (!parsed.username().is_empty() || parsed.password().is_some())
        {
            let mut new_url = parsed.clone();
            let _ = new_url.set_username("****");
            let _ = new_url.set_password(Some("****"));
            obfuscated = new_url.to_string();
        }

        let sensitive_params = ["username", "password", "user", "pass", "pwd", "token"];

        for param in &sensitive_params {
            let pattern = format!(r"(?i)([?&]{}=)[^&]*", regex::escape(param));
            if let Ok(re) = Regex::new(&pattern) {
                obfuscated = re.replace_all(&obfuscated, "${1}****").to_string();
            }
        }

        obfuscated
    }
}
