use crate::UrlError;
use url::Url;

/// Query parameters that never change what a server returns
const STRIPPED_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "jsessionid",
    "phpsessid",
    "sid",
    "aspsessionid",
];

/// Parses a string into a fetchable http(s) URI
///
/// The fragment is dropped; everything else is kept as written, because the
/// crawler fetches exactly what was linked.
///
/// # Arguments
///
/// * `uri` - The URI string to parse
///
/// # Returns
///
/// * `Ok(Url)` - Parsed URI with the fragment removed
/// * `Err(UrlError)` - Malformed URI, unsupported scheme or missing host
pub fn parse_http_uri(uri: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(uri.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;
    check_http(&url)?;
    url.set_fragment(None);
    Ok(url)
}

/// Resolves a (possibly relative) link against a base URI
///
/// Returns `Ok(None)` for links the crawler never follows (`javascript:`,
/// `mailto:`, `tel:`, `data:`, bare fragments), `Err` for links that look
/// followable but cannot be resolved into an http(s) URI.
pub fn resolve_link(base: &Url, href: &str) -> Result<Option<Url>, UrlError> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return Ok(None);
    }

    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return Ok(None);
    }

    let mut url = base
        .join(href)
        .map_err(|e| UrlError::Parse(format!("{} ({})", href, e)))?;
    check_http(&url)?;
    url.set_fragment(None);
    Ok(Some(url))
}

/// Computes the canonical key used to decide whether two URIs are the same
///
/// # Canonicalization Steps
///
/// 1. Lowercase the host and strip a leading `www.` / `wwwN.`
/// 2. Drop user info and default ports
/// 3. Remove dot segments, repeated slashes and a trailing slash
/// 4. Remove the fragment
/// 5. Remove tracking and session-id query parameters, sort the rest
///
/// # Examples
///
/// ```
/// use crawl_controller::uri::canonicalize;
/// use url::Url;
///
/// let url = Url::parse("http://WWW.Example.com/a/../b/?utm_source=x").unwrap();
/// assert_eq!(canonicalize(&url), "http://example.com/b");
/// ```
pub fn canonicalize(url: &Url) -> String {
    let host = url
        .host_str()
        .map(|h| strip_www(&h.to_lowercase()).to_string())
        .unwrap_or_default();

    let mut key = format!("{}://{}", url.scheme(), host);
    if let Some(port) = url.port() {
        key.push(':');
        key.push_str(&port.to_string());
    }
    key.push_str(&normalize_path(url.path()));

    if url.query().is_some() {
        let params = filter_and_sort_query_params(url);
        if !params.is_empty() {
            let query = params
                .iter()
                .map(|(k, v)| {
                    if v.is_empty() {
                        k.clone()
                    } else {
                        format!("{}={}", k, v)
                    }
                })
                .collect::<Vec<_>>()
                .join("&");
            key.push('?');
            key.push_str(&query);
        }
    }

    key
}

fn check_http(url: &Url) -> Result<(), UrlError> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "only http and https are crawled, got: {}",
            url.scheme()
        )));
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(UrlError::MissingHost),
    }
}

/// Strips `www.` and numbered variants like `www2.`
fn strip_www(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix("www") {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if let Some(stripped) = rest[digits..].strip_prefix('.') {
            if stripped.contains('.') {
                return stripped;
            }
        }
    }
    host
}

fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_stripped_param(key))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    params.sort();
    params
}

fn is_stripped_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    STRIPPED_PARAMS.contains(&key.as_str()) || key.starts_with("utm_")
}
