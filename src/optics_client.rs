use std::time::Duration;

use failsafe::backoff::Exponential;
use failsafe::failure_policy::ConsecutiveFailures;
use failsafe::futures::CircuitBreaker;
use failsafe::{backoff, failure_policy, Config, StateMachine};
use serde_json::{json, Value};

use crate::errors::AppError;

type ProxyBreaker = StateMachine<ConsecutiveFailures<Exponential>, ()>;

/// Failure detail for one proxy request, kept verbatim for the snapshot.
#[derive(Debug, Clone)]
pub struct ProxyError {
    /// HTTP status when the proxy answered; absent on transport errors and
    /// breaker rejections.
    pub status: Option<u16>,
    /// Upstream body or error text.
    pub body: String,
}

/// Client for the upstream PON diagnostics proxy.
///
/// One POST per OLT, carrying the target device address and the full slot
/// and port sets. A circuit breaker shared across cycles fails fast once the
/// proxy has misbehaved repeatedly; a rejection surfaces as an ordinary
/// per-OLT failure.
#[derive(Clone)]
pub struct PonProxyClient {
    client: reqwest::Client,
    proxy_url: String,
    device_ip: String,
    breaker: ProxyBreaker,
}

impl PonProxyClient {
    /// Creates a new `PonProxyClient`.
    ///
    /// # Arguments
    ///
    /// * `proxy_url` - The PON proxy endpoint.
    /// * `device_ip` - The device address forwarded in every request body.
    pub fn new(proxy_url: String, device_ip: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            proxy_url,
            device_ip,
            breaker: build_breaker(),
        })
    }

    /// Fetches the optics rows for one OLT.
    ///
    /// A 2xx response whose body is a JSON array yields its rows. A 2xx body
    /// that is valid JSON but not an array counts as a success with zero
    /// rows. Everything else is a [`ProxyError`].
    pub async fn fetch_olt(
        &self,
        olt: &str,
        slots: &[String],
        ports: &[i64],
    ) -> Result<Vec<Value>, ProxyError> {
        match self.breaker.call(self.request_once(olt, slots, ports)).await {
            Ok(rows) => Ok(rows),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => {
                tracing::warn!("PON proxy circuit open; rejecting request for OLT {}", olt);
                Err(ProxyError {
                    status: None,
                    body: "PON proxy circuit open; request rejected".to_string(),
                })
            }
        }
    }

    async fn request_once(
        &self,
        olt: &str,
        slots: &[String],
        ports: &[i64],
    ) -> Result<Vec<Value>, ProxyError> {
        let body = json!({
            "ip": self.device_ip,
            "olt": olt,
            "slot": slots,
            "port": ports,
            "insecure": true,
        });

        tracing::debug!(
            "Requesting optics for OLT {} ({} slot(s), {} port(s))",
            olt,
            slots.len(),
            ports.len()
        );

        let response = self
            .client
            .post(&self.proxy_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProxyError {
                status: None,
                body: format!("PON proxy request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::warn!(
                "PON proxy returned {} for OLT {}: {}",
                status,
                olt,
                error_text
            );
            return Err(ProxyError {
                status: Some(status.as_u16()),
                body: error_text,
            });
        }

        let payload: Value = response.json().await.map_err(|e| ProxyError {
            status: None,
            body: format!("Failed to parse PON proxy response: {}", e),
        })?;

        match payload {
            Value::Array(rows) => Ok(rows),
            other => {
                tracing::debug!(
                    "PON proxy returned a non-array payload for OLT {}: {}",
                    olt,
                    other
                );
                Ok(Vec::new())
            }
        }
    }
}

/// Breaker over the proxy: five consecutive failures open it, with
/// exponential backoff from 10s to 60s before recovery probes.
fn build_breaker() -> ProxyBreaker {
    let backoff_strategy = backoff::exponential(Duration::from_secs(10), Duration::from_secs(60));
    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);
    Config::new().failure_policy(failure_policy).build()
}
