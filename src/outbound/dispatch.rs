//! Resilient outbound dispatch
//!
//! One [`Dispatcher::dispatch`] call drives the whole retry loop: select an
//! endpoint, send, classify the response. A 429 carries authoritative reset
//! timing and rotates identity before retrying; a transport failure is
//! endpoint-agnostic and backs off exponentially instead. Any other status is
//! handed back unmodified, success or failure.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::header::HeaderMap;
use http::StatusCode;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::{GatewayError, Result};
use crate::outbound::headers::default_dispatch_headers;
use crate::outbound::pool::{ProxyEndpoint, ProxyPool};

/// Header carrying the upstream's rate-limit reset hint, in epoch seconds
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset-requests";

/// Dispatch retry/backoff configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Total attempts before giving up
    pub max_attempts: u32,
    /// Wait after a 429 with no usable reset hint
    pub default_rate_limit_wait: Duration,
    /// Floor for the reset-hint-derived wait
    pub min_rate_limit_wait: Duration,
    /// Outbound connection timeout
    pub connect_timeout: Duration,
    /// Per-read inactivity timeout (a total timeout would cut long streams)
    pub read_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            default_rate_limit_wait: Duration::from_millis(5000),
            min_rate_limit_wait: Duration::from_millis(2000),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(120),
        }
    }
}

/// Sends one request through one endpoint
///
/// Seam between the retry loop and the wire so tests can script responses.
#[async_trait]
pub trait OutboundTransport: Send + Sync {
    async fn send(
        &self,
        endpoint: &ProxyEndpoint,
        target: &Url,
        payload: &Value,
        headers: &HeaderMap,
    ) -> Result<reqwest::Response>;
}

/// Production transport: pins the target hostname to the endpoint address
///
/// The endpoint's port goes into the URL (DNS overrides carry no port) and the
/// hostname resolves to the endpoint address, so TLS still sees the real host
/// while the bytes flow through the selected edge.
pub struct ResolvedTransport {
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl ResolvedTransport {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }
}

#[async_trait]
impl OutboundTransport for ResolvedTransport {
    async fn send(
        &self,
        endpoint: &ProxyEndpoint,
        target: &Url,
        payload: &Value,
        headers: &HeaderMap,
    ) -> Result<reqwest::Response> {
        let ip: IpAddr = endpoint.address.parse().map_err(|_| {
            GatewayError::TransportFailure(format!(
                "endpoint address is not an IP: {}",
                endpoint.address
            ))
        })?;

        let host = target
            .host_str()
            .ok_or_else(|| GatewayError::TransportFailure("target URL has no host".into()))?
            .to_string();

        let mut url = target.clone();
        url.set_port(Some(endpoint.port))
            .map_err(|_| GatewayError::TransportFailure("target URL rejects a port".into()))?;

        let client = reqwest::Client::builder()
            .resolve(&host, SocketAddr::new(ip, endpoint.port))
            .connect_timeout(self.connect_timeout)
            .read_timeout(self.read_timeout)
            .default_headers(default_dispatch_headers())
            .build()
            .map_err(|e| GatewayError::TransportFailure(e.to_string()))?;

        client
            .post(url)
            .headers(headers.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| GatewayError::TransportFailure(e.to_string()))
    }
}

/// Retry loop around pool selection and the outbound transport
pub struct Dispatcher {
    pool: Arc<ProxyPool>,
    transport: Arc<dyn OutboundTransport>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(pool: Arc<ProxyPool>, config: DispatchConfig) -> Self {
        let transport = Arc::new(ResolvedTransport::new(
            config.connect_timeout,
            config.read_timeout,
        ));
        Self::with_transport(pool, transport, config)
    }

    pub fn with_transport(
        pool: Arc<ProxyPool>,
        transport: Arc<dyn OutboundTransport>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            pool,
            transport,
            config,
        }
    }

    /// Issue an outbound call, retrying through the pool on rate limiting
    /// and transport failure.
    ///
    /// Returns the first non-429 response unmodified. Fails fast with
    /// [`GatewayError::NoProxyAvailable`] on an empty pool; there is nothing
    /// to rotate to, so that case is never retried.
    #[instrument(skip(self, target, payload, headers), fields(url = %target))]
    pub async fn dispatch(
        &self,
        target: &Url,
        payload: &Value,
        headers: &HeaderMap,
    ) -> Result<reqwest::Response> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = String::from("no attempts made");

        for attempt in 0..max_attempts {
            let endpoint = self.pool.select().ok_or(GatewayError::NoProxyAvailable)?;

            debug!(
                "Dispatch attempt {}/{} through {}",
                attempt + 1,
                max_attempts,
                endpoint
            );

            match self.transport.send(&endpoint, target, payload, headers).await {
                Ok(response) => {
                    if response.status() != StatusCode::TOO_MANY_REQUESTS {
                        debug!("Upstream answered {} via {}", response.status(), endpoint);
                        return Ok(response);
                    }

                    last_error = String::from("upstream rate limited");

                    if attempt + 1 < max_attempts {
                        let wait = self.rate_limit_wait(response.headers());
                        warn!(
                            "Rate limited via {} (attempt {}/{}), waiting {:?} then rotating",
                            endpoint,
                            attempt + 1,
                            max_attempts,
                            wait
                        );
                        tokio::time::sleep(wait).await;
                        // The next iteration re-selects, rotating away from
                        // the limited endpoint. A single-endpoint pool
                        // degrades to pure backoff here.
                    }
                }
                Err(e) => {
                    warn!(
                        "Dispatch attempt {}/{} through {} failed: {}",
                        attempt + 1,
                        max_attempts,
                        endpoint,
                        e
                    );
                    last_error = e.to_string();

                    if attempt + 1 < max_attempts {
                        let backoff = Duration::from_secs(2u64.pow(attempt));
                        debug!("Backing off {:?} before retry", backoff);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        Err(GatewayError::RetriesExhausted {
            attempts: max_attempts,
            last: last_error,
        })
    }

    /// Wait duration after a 429: reset hint (epoch seconds) minus now,
    /// floored, or the fixed default when the hint is absent or unparseable.
    fn rate_limit_wait(&self, headers: &HeaderMap) -> Duration {
        headers
            .get(RATE_LIMIT_RESET_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(|reset_secs| {
                let wait_ms = reset_secs
                    .saturating_mul(1000)
                    .saturating_sub(chrono::Utc::now().timestamp_millis())
                    .max(self.config.min_rate_limit_wait.as_millis() as i64);
                Duration::from_millis(wait_ms as u64)
            })
            .unwrap_or(self.config.default_rate_limit_wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::source::tests::ScriptedSource;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    enum Step {
        Respond {
            status: u16,
            headers: Vec<(&'static str, String)>,
        },
        Fail(&'static str),
    }

    struct ScriptedTransport {
        script: Mutex<VecDeque<Step>>,
        used_endpoints: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Step>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                used_endpoints: Mutex::new(Vec::new()),
            }
        }

        fn remaining(&self) -> usize {
            self.script.lock().unwrap().len()
        }

        fn used(&self) -> Vec<String> {
            self.used_endpoints.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OutboundTransport for ScriptedTransport {
        async fn send(
            &self,
            endpoint: &ProxyEndpoint,
            _target: &Url,
            _payload: &Value,
            _headers: &HeaderMap,
        ) -> Result<reqwest::Response> {
            self.used_endpoints.lock().unwrap().push(endpoint.to_string());
            let step = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .expect("transport called more times than scripted");

            match step {
                Step::Respond { status, headers } => {
                    let mut builder = http::Response::builder().status(status);
                    for (name, value) in headers {
                        builder = builder.header(name, value);
                    }
                    let response = builder.body("").unwrap();
                    Ok(reqwest::Response::from(response))
                }
                Step::Fail(message) => Err(GatewayError::TransportFailure(message.to_string())),
            }
        }
    }

    fn target() -> Url {
        Url::parse("https://upstream.example/api/inference/chat").unwrap()
    }

    async fn dispatcher_with(
        addresses: &[&str],
        script: Vec<Step>,
    ) -> (Dispatcher, Arc<ScriptedTransport>) {
        let source = Arc::new(ScriptedSource::with_addresses(addresses));
        let pool = Arc::new(ProxyPool::new(source, vec![443]));
        pool.refresh().await.unwrap();
        let transport = Arc::new(ScriptedTransport::new(script));
        let dispatcher =
            Dispatcher::with_transport(pool, transport.clone(), DispatchConfig::default());
        (dispatcher, transport)
    }

    #[tokio::test]
    async fn test_empty_pool_fails_immediately() {
        let (dispatcher, transport) = dispatcher_with(&[], vec![]).await;
        let result = dispatcher
            .dispatch(&target(), &serde_json::json!({}), &HeaderMap::new())
            .await;
        assert!(matches!(result, Err(GatewayError::NoProxyAvailable)));
        assert!(transport.used().is_empty());
    }

    #[tokio::test]
    async fn test_success_returned_unmodified() {
        let (dispatcher, transport) = dispatcher_with(
            &["1.1.1.1"],
            vec![Step::Respond {
                status: 200,
                headers: vec![],
            }],
        )
        .await;

        let response = dispatcher
            .dispatch(&target(), &serde_json::json!({}), &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(transport.remaining(), 0);
    }

    #[tokio::test]
    async fn test_non_429_error_status_not_retried() {
        let (dispatcher, transport) = dispatcher_with(
            &["1.1.1.1"],
            vec![
                Step::Respond {
                    status: 500,
                    headers: vec![],
                },
                Step::Respond {
                    status: 200,
                    headers: vec![],
                },
            ],
        )
        .await;

        let response = dispatcher
            .dispatch(&target(), &serde_json::json!({}), &HeaderMap::new())
            .await
            .unwrap();
        // The 500 comes back as-is; the scripted 200 must never be consumed
        assert_eq!(response.status(), 500);
        assert_eq!(transport.remaining(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_and_rotates() {
        let reset = (chrono::Utc::now().timestamp() + 3).to_string();
        let (dispatcher, transport) = dispatcher_with(
            &["1.1.1.1", "2.2.2.2"],
            vec![
                Step::Respond {
                    status: 429,
                    headers: vec![(RATE_LIMIT_RESET_HEADER, reset.clone())],
                },
                Step::Respond {
                    status: 429,
                    headers: vec![(RATE_LIMIT_RESET_HEADER, reset)],
                },
                Step::Respond {
                    status: 200,
                    headers: vec![],
                },
            ],
        )
        .await;

        let started = Instant::now();
        let response = dispatcher
            .dispatch(&target(), &serde_json::json!({}), &HeaderMap::new())
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        // Two waits, each at least the 2s floor
        assert!(started.elapsed() >= Duration::from_secs(4));

        // Each 429 forced a rotation to the other endpoint
        let used = transport.used();
        assert_eq!(used.len(), 3);
        assert_ne!(used[0], used[1]);
        assert_ne!(used[1], used[2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_default_wait_without_hint() {
        let (dispatcher, _) = dispatcher_with(
            &["1.1.1.1"],
            vec![
                Step::Respond {
                    status: 429,
                    headers: vec![],
                },
                Step::Respond {
                    status: 200,
                    headers: vec![],
                },
            ],
        )
        .await;

        let started = Instant::now();
        let response = dispatcher
            .dispatch(&target(), &serde_json::json!({}), &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_hint_in_past_uses_floor() {
        let reset = (chrono::Utc::now().timestamp() - 30).to_string();
        let (dispatcher, _) = dispatcher_with(
            &["1.1.1.1"],
            vec![
                Step::Respond {
                    status: 429,
                    headers: vec![(RATE_LIMIT_RESET_HEADER, reset)],
                },
                Step::Respond {
                    status: 200,
                    headers: vec![],
                },
            ],
        )
        .await;

        let started = Instant::now();
        dispatcher
            .dispatch(&target(), &serde_json::json!({}), &HeaderMap::new())
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failures_exhaust_with_backoff() {
        let (dispatcher, transport) = dispatcher_with(
            &["1.1.1.1"],
            vec![
                Step::Fail("connect refused"),
                Step::Fail("connect refused"),
                Step::Fail("connect refused"),
            ],
        )
        .await;

        let started = Instant::now();
        let result = dispatcher
            .dispatch(&target(), &serde_json::json!({}), &HeaderMap::new())
            .await;

        match result {
            Err(GatewayError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(last.contains("connect refused"));
            }
            other => panic!("expected RetriesExhausted, got {:?}", other.map(|r| r.status())),
        }

        assert_eq!(transport.used().len(), 3);
        // Backoffs of 1s then 2s between the three attempts
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
