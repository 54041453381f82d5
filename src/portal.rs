//! Portal login/logout requests and success classification
//!
//! The gateway exchange is fully described by `PortalConfig`: URL, method,
//! form fields, headers and success keywords all come from configuration, so
//! this module knows nothing about any particular campus gateway.

use crate::config::PortalConfig;
use crate::netcheck::read_limited;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (campusnet)";
const LOGIN_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RESPONSE_BODY: usize = 8192;

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("portal: login_url is empty")]
    EmptyLoginUrl,

    #[error("portal request timed out")]
    Timeout(#[source] reqwest::Error),

    #[error("portal request failed: {0}")]
    Network(#[source] reqwest::Error),
}

fn classify(e: reqwest::Error) -> PortalError {
    if e.is_timeout() {
        PortalError::Timeout(e)
    } else {
        PortalError::Network(e)
    }
}

pub struct PortalClient {
    client: reqwest::Client,
}

impl PortalClient {
    pub fn new() -> anyhow::Result<Self> {
        // Some gateways hand out a session cookie on login and expect it back
        // on logout.
        let client = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self { client })
    }

    /// Submit the login form described by `cfg` and return up to 8 KiB of the
    /// response body. The body is returned whether or not it indicates
    /// success; classification is `is_login_success`'s job.
    pub async fn login(&self, cfg: &PortalConfig) -> Result<String, PortalError> {
        if cfg.login_url.is_empty() {
            return Err(PortalError::EmptyLoginUrl);
        }

        let encoded = encode_form(&cfg.form);
        let is_post = cfg.method.eq_ignore_ascii_case("POST");

        let mut headers = default_headers();
        if is_post {
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            );
        }
        overlay_headers(&mut headers, &cfg.headers);

        let request = if is_post {
            self.client.post(&cfg.login_url).body(encoded)
        } else {
            self.client.get(append_query(&cfg.login_url, &encoded))
        };

        let resp = request
            .headers(headers)
            .timeout(LOGIN_TIMEOUT)
            .send()
            .await
            .map_err(classify)?;

        read_limited(resp, MAX_RESPONSE_BODY).await.map_err(classify)
    }

    /// Call the logout endpoint. An empty `logout_form` means logout is not
    /// configured for this gateway; that is a no-op, not an error.
    pub async fn logout(&self, cfg: &PortalConfig) -> Result<String, PortalError> {
        if cfg.logout_form.is_empty() {
            return Ok(String::new());
        }

        let url = append_query(&cfg.login_url, &encode_form(&cfg.logout_form));
        let mut headers = default_headers();
        overlay_headers(&mut headers, &cfg.headers);

        let resp = self
            .client
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(classify)?;

        read_limited(resp, MAX_RESPONSE_BODY).await.map_err(classify)
    }
}

/// Did the gateway accept the login? With no keywords configured the gateway
/// is trusted; otherwise any non-empty keyword found as a literal substring
/// (case-sensitive) counts as success.
pub fn is_login_success(body: &str, cfg: &PortalConfig) -> bool {
    if cfg.success_keywords.is_empty() {
        return true;
    }
    cfg.success_keywords
        .iter()
        .any(|kw| !kw.is_empty() && body.contains(kw.as_str()))
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
    headers
}

/// Apply configured headers on top of the defaults; configured values win.
/// Malformed names or values are skipped with a warning rather than failing
/// the whole request.
fn overlay_headers(headers: &mut HeaderMap, extra: &HashMap<String, String>) {
    for (name, value) in extra {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!("Skipping invalid header: {}", name),
        }
    }
}

/// Percent-encode form fields as `k=v&k=v`
fn encode_form(form: &HashMap<String, String>) -> String {
    form.iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Append an encoded query to a URL, respecting any query it already has
fn append_query(url: &str, encoded: &str) -> String {
    if encoded.is_empty() {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, separator, encoded)
}

/// One-shot fake gateway for exercising real request construction in tests:
/// accepts a single connection, captures the raw request, answers 200 with a
/// canned body.
#[cfg(test)]
pub(crate) mod testutil {
    pub(crate) async fn spawn_gateway(
        body: impl Into<String>,
    ) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let body: String = body.into();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 2048];

            // Read the head, then any Content-Length worth of body
            let header_end = loop {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                if let Some(pos) = find_header_end(&raw) {
                    break pos;
                }
                assert!(n > 0, "connection closed before headers completed");
            };
            let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
            let content_length = head
                .lines()
                .find_map(|l| {
                    l.to_ascii_lowercase()
                        .strip_prefix("content-length:")
                        .map(str::trim)
                        .map(String::from)
                })
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0);
            while raw.len() < header_end + 4 + content_length {
                let n = socket.read(&mut buf).await.unwrap();
                assert!(n > 0, "connection closed before body completed");
                raw.extend_from_slice(&buf[..n]);
            }

            let payload = body.as_bytes();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                payload.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.write_all(payload).await.unwrap();
            socket.shutdown().await.unwrap();

            String::from_utf8_lossy(&raw).to_string()
        });

        (format!("http://{}", addr), handle)
    }

    fn find_header_end(raw: &[u8]) -> Option<usize> {
        raw.windows(4).position(|w| w == b"\r\n\r\n")
    }
}
