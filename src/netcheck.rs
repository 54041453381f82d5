//! Internet connectivity detection
//!
//! A captive portal intercepts plain HTTP and answers with its own login
//! page, so "the request succeeded" proves nothing. Both checks here pin the
//! expected answer: the NCSI HTTP endpoint must echo its exact canned body,
//! and the NCSI hostname must resolve to its exact well-known address.
//! The probe always uses these fixed endpoints; the configured portal URL
//! plays no part in the online/offline decision.

use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

const NCSI_HTTP_URL: &str = "http://www.msftconnecttest.com/connecttest.txt";
const NCSI_HTTP_BODY: &str = "Microsoft Connect Test";
const NCSI_DNS_HOST: &str = "dns.msftncsi.com";
const NCSI_DNS_ADDR: Ipv4Addr = Ipv4Addr::new(131, 107, 255, 255);

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const MAX_PROBE_BODY: usize = 256;

/// Answers "does this machine really reach the internet right now?"
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// NCSI-style connectivity probe: HTTP content check plus DNS pin
pub struct Probe {
    client: reqwest::Client,
}

impl Probe {
    pub fn new() -> anyhow::Result<Self> {
        // Proxies are disabled so a misbehaving local proxy cannot forge
        // a success response.
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(PROBE_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    /// HTTP leg: expect 200 and the exact NCSI body (first 256 bytes,
    /// surrounding whitespace ignored)
    async fn http_check(&self) -> bool {
        let resp = match self.client.get(NCSI_HTTP_URL).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::debug!("NCSI HTTP probe failed: {}", e);
                return false;
            }
        };

        if resp.status() != reqwest::StatusCode::OK {
            tracing::debug!("NCSI HTTP probe: unexpected status {}", resp.status());
            return false;
        }

        let body = match read_limited(resp, MAX_PROBE_BODY).await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!("NCSI HTTP probe: body read failed: {}", e);
                return false;
            }
        };

        body.trim() == NCSI_HTTP_BODY
    }

    /// DNS leg: the NCSI hostname must resolve to its pinned address
    async fn dns_check(&self) -> bool {
        let lookup = tokio::net::lookup_host((NCSI_DNS_HOST, 80));
        let addrs = match tokio::time::timeout(PROBE_TIMEOUT, lookup).await {
            Ok(Ok(addrs)) => addrs,
            Ok(Err(e)) => {
                tracing::debug!("NCSI DNS probe failed: {}", e);
                return false;
            }
            Err(_) => {
                tracing::debug!("NCSI DNS probe timed out");
                return false;
            }
        };

        for addr in addrs {
            if addr.ip() == IpAddr::V4(NCSI_DNS_ADDR) {
                return true;
            }
        }
        false
    }
}

#[async_trait]
impl Connectivity for Probe {
    async fn is_online(&self) -> bool {
        // No retries here; retry policy lives in the controller.
        let http_ok = self.http_check().await;
        let dns_ok = self.dns_check().await;
        tracing::debug!("Probe result: http={} dns={}", http_ok, dns_ok);
        http_ok && dns_ok
    }
}

/// Read at most `limit` bytes of a response body and decode lossily
pub(crate) async fn read_limited(
    mut resp: reqwest::Response,
    limit: usize,
) -> reqwest::Result<String> {
    let mut body = Vec::with_capacity(limit.min(1024));
    while let Some(chunk) = resp.chunk().await? {
        let remaining = limit - body.len();
        if remaining == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::testutil::spawn_gateway;

    #[tokio::test]
    async fn read_limited_caps_body_length() {
        let (base, _captured) = spawn_gateway("x".repeat(1000)).await;
        let resp = reqwest::get(format!("{}/", base)).await.unwrap();
        let body = read_limited(resp, MAX_PROBE_BODY).await.unwrap();
        assert_eq!(body.len(), MAX_PROBE_BODY);
    }

    #[tokio::test]
    async fn probe_body_match_survives_padding_past_the_cap() {
        // The expected literal sits inside the first 256 bytes; truncation
        // then trimming must still yield an exact match
        let padded = format!("{}{}", NCSI_HTTP_BODY, " ".repeat(500));
        let (base, _captured) = spawn_gateway(padded).await;
        let resp = reqwest::get(format!("{}/", base)).await.unwrap();
        let body = read_limited(resp, MAX_PROBE_BODY).await.unwrap();
        assert_eq!(body.len(), MAX_PROBE_BODY);
        assert_eq!(body.trim(), NCSI_HTTP_BODY);
    }
}
