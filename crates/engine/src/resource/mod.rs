// ABOUTME: Credentialed page fetching for direct extraction.
// ABOUTME: Passes configured headers and cookies through, enforces a size cap, and decodes charsets.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::RefreshError;

/// Maximum allowed content length (10 MB).
pub const MAX_CONTENT_LENGTH: usize = 10 * 1024 * 1024;

const OP: &str = "Fetch";

/// Options for fetching a page.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Extra request headers, e.g. a `Cookie` header carried over from the
    /// user's browser session.
    pub headers: HashMap<String, String>,
}

/// Result of a successful fetch.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status: u16,
    pub url: String,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl FetchResult {
    /// Decodes the body, using the content-type charset when present and
    /// detection otherwise.
    pub fn text(&self) -> String {
        decode_body(&self.body, self.content_type.as_deref())
    }
}

fn decode_body(body: &[u8], content_type: Option<&str>) -> String {
    if let Some(charset) = content_type.and_then(extract_charset) {
        if let Some(encoding) = encoding_rs::Encoding::for_label(charset.as_bytes()) {
            let (decoded, _, _) = encoding.decode(body);
            return decoded.into_owned();
        }
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(body, true);
    let encoding = detector.guess(None, true);
    let (decoded, _, _) = encoding.decode(body);
    decoded.into_owned()
}

fn extract_charset(content_type: &str) -> Option<String> {
    content_type
        .to_lowercase()
        .split(';')
        .find_map(|part| {
            part.trim()
                .strip_prefix("charset=")
                .map(|c| c.trim_matches('"').trim_matches('\'').to_string())
        })
}

fn fetch_error(url: &str, e: reqwest::Error, what: &str) -> RefreshError {
    if e.is_timeout() {
        RefreshError::timeout(url, OP, Some(anyhow::anyhow!("{}: {}", what, e)))
    } else {
        RefreshError::fetch(url, OP, Some(anyhow::anyhow!("{}: {}", what, e)))
    }
}

/// Fetches a page. Any non-2xx status is an error.
pub async fn fetch(
    client: &reqwest::Client,
    url: &str,
    opts: &FetchOptions,
) -> Result<FetchResult, RefreshError> {
    if url.is_empty() {
        return Err(RefreshError::invalid_url(url, OP, None));
    }
    let parsed = url::Url::parse(url).map_err(|e| {
        RefreshError::invalid_url(url, OP, Some(anyhow::anyhow!("invalid URL: {}", e)))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(RefreshError::invalid_url(
            url,
            OP,
            Some(anyhow::anyhow!("scheme must be http or https")),
        ));
    }

    let mut request = client.get(parsed);
    for (key, value) in &opts.headers {
        request = request.header(key, value);
    }

    let response = request
        .send()
        .await
        .map_err(|e| fetch_error(url, e, "request failed"))?;

    if let Some(len) = response.content_length() {
        if len as usize > MAX_CONTENT_LENGTH {
            return Err(RefreshError::fetch(
                url,
                OP,
                Some(anyhow::anyhow!("content too large")),
            ));
        }
    }

    let status = response.status().as_u16();
    let final_url = response.url().to_string();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_lowercase());

    if !response.status().is_success() {
        return Err(RefreshError::fetch(
            url,
            OP,
            Some(anyhow::anyhow!("HTTP status {}", status)),
        ));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| fetch_error(url, e, "failed to read body"))?;
    if body.len() > MAX_CONTENT_LENGTH {
        return Err(RefreshError::fetch(
            url,
            OP,
            Some(anyhow::anyhow!("content too large")),
        ));
    }

    Ok(FetchResult {
        status,
        url: url.to_string(),
        final_url,
        content_type,
        body,
    })
}
