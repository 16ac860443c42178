//! Failover client for the mirrored API.
//!
//! A logical request walks the tiers produced by [`pick_order`]: the user's
//! override alone, else the sticky-best mirror alone, then a concurrent race
//! across the first few pool members, then a race across the rest. Each
//! attempt is bounded by its own timeout; only exhausting every tier fails
//! the call.

use crate::netease::endpoints::{Endpoint, EndpointPool, TierKind, normalize_endpoint, pick_order};
use crate::netease::error::{ApiError, SUCCESS_CODE};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

/// Fetches one URL and decodes the body as JSON.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_json(&self, url: &str) -> Result<Value, ApiError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ApiError::Config(format!("build reqwest client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_json(&self, url: &str) -> Result<Value, ApiError> {
        let v = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        Ok(v)
    }
}

/// Tuning knobs; none of the values matter for correctness.
#[derive(Debug, Clone)]
pub struct FailoverSettings {
    /// How many pool members race in the first automatic tier.
    pub race_size: usize,
    pub override_timeout: Duration,
    pub sticky_timeout: Duration,
    pub race_timeout: Duration,
}

impl Default for FailoverSettings {
    fn default() -> Self {
        Self {
            race_size: 6,
            override_timeout: Duration::from_secs(8),
            sticky_timeout: Duration::from_secs(5),
            race_timeout: Duration::from_secs(12),
        }
    }
}

/// Which mirror to prefer. Owned per client; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionState {
    pub sticky_best: Option<Endpoint>,
    pub user_override: Option<Endpoint>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    pool: EndpointPool,
    settings: FailoverSettings,
    // Held only for a read or a write, never across an await.
    state: Mutex<SelectionState>,
}

#[derive(Clone)]
pub struct FailoverClient {
    inner: Arc<Inner>,
}

impl FailoverClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        pool: EndpointPool,
        settings: FailoverSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                pool,
                settings,
                state: Mutex::new(SelectionState::default()),
            }),
        }
    }

    pub fn pool(&self) -> &EndpointPool {
        &self.inner.pool
    }

    pub fn selection(&self) -> SelectionState {
        self.state().clone()
    }

    /// Pin (or with `None`, unpin) a mirror that is tried first on every request.
    pub fn set_api_source(&self, url: Option<&str>) {
        let url = url.map(normalize_endpoint).filter(|u| !u.is_empty());
        tracing::info!(source = ?url, "api source override changed");
        self.state().user_override = url;
    }

    /// The override if one is set, otherwise the mirror that last answered.
    pub fn current_api_source(&self) -> Option<Endpoint> {
        let s = self.state();
        s.user_override.clone().or_else(|| s.sticky_best.clone())
    }

    /// Issue `path` (relative, query string allowed) against the mirrors.
    pub async fn request(&self, path: &str) -> Result<Value, ApiError> {
        let path = with_cache_buster(path, crate::storage::now_unix_ms());
        let snapshot = self.selection();
        let tiers = pick_order(
            snapshot.user_override.as_deref(),
            snapshot.sticky_best.as_deref(),
            &self.inner.pool,
            self.inner.settings.race_size,
        );

        let settings = &self.inner.settings;
        let mut failures = 0;

        for tier in tiers {
            match tier.kind {
                TierKind::Override | TierKind::Sticky => {
                    let Some(endpoint) = tier.endpoints.into_iter().next() else {
                        continue;
                    };
                    let timeout = if tier.kind == TierKind::Override {
                        settings.override_timeout
                    } else {
                        settings.sticky_timeout
                    };
                    match attempt(self.inner.transport.as_ref(), &endpoint, &path, timeout).await {
                        Ok(v) => return Ok(v),
                        Err(e) => {
                            failures += 1;
                            tracing::debug!(endpoint = %endpoint, kind = ?tier.kind, error = %e, "preferred endpoint failed");
                            if tier.kind == TierKind::Sticky {
                                self.forget_sticky(&endpoint);
                            }
                        }
                    }
                }
                TierKind::Race | TierKind::Remainder => {
                    match self.race(tier.endpoints, &path, settings.race_timeout).await {
                        Ok((endpoint, v)) => {
                            self.promote(endpoint);
                            return Ok(v);
                        }
                        Err(n) => {
                            failures += n;
                            tracing::debug!(kind = ?tier.kind, failed = n, "tier exhausted");
                        }
                    }
                }
            }
        }

        tracing::warn!(path = %path, attempts = failures, "every endpoint failed");
        Err(ApiError::Unreachable { attempts: failures })
    }

    /// Launch one task per endpoint and take the first success.
    ///
    /// Losers are left running under their own timeout; their results land in
    /// a channel nobody reads any more. Returns the failure count when nobody
    /// succeeds.
    async fn race(
        &self,
        endpoints: Vec<Endpoint>,
        path: &str,
        timeout: Duration,
    ) -> Result<(Endpoint, Value), usize> {
        let n = endpoints.len();
        let (tx, mut rx) = mpsc::channel(n.max(1));

        for endpoint in endpoints {
            let tx = tx.clone();
            let transport = Arc::clone(&self.inner.transport);
            let path = path.to_string();
            tokio::spawn(async move {
                let res = attempt(transport.as_ref(), &endpoint, &path, timeout).await;
                let _ = tx.send((endpoint, res)).await;
            });
        }
        drop(tx);

        let mut failed = 0;
        while let Some((endpoint, res)) = rx.recv().await {
            match res {
                Ok(v) => return Ok((endpoint, v)),
                Err(e) => {
                    failed += 1;
                    tracing::debug!(endpoint = %endpoint, error = %e, "race attempt failed");
                    if failed == n {
                        break;
                    }
                }
            }
        }
        Err(failed)
    }

    fn promote(&self, endpoint: Endpoint) {
        let mut s = self.state();
        if s.user_override.is_none() {
            tracing::debug!(endpoint = %endpoint, "sticky endpoint updated");
            s.sticky_best = Some(endpoint);
        }
    }

    fn forget_sticky(&self, endpoint: &str) {
        let mut s = self.state();
        if s.user_override.is_none() && s.sticky_best.as_deref() == Some(endpoint) {
            s.sticky_best = None;
        }
    }

    fn state(&self) -> MutexGuard<'_, SelectionState> {
        self.inner.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

async fn attempt(
    transport: &dyn Transport,
    base: &str,
    path: &str,
    timeout: Duration,
) -> Result<Value, ApiError> {
    let url = format!("{base}{path}");
    let body = tokio::time::timeout(timeout, transport.get_json(&url))
        .await
        .map_err(|_| ApiError::Timeout(timeout))??;
    check_status(body)
}

/// A 200 transport status is not enough: mirrors wrap upstream errors in a
/// 200 response with a different `code`.
pub fn check_status(body: Value) -> Result<Value, ApiError> {
    let code = match body.get("code") {
        None | Some(Value::Null) => return Ok(body),
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        Some(_) => None,
    };
    match code {
        Some(SUCCESS_CODE) => Ok(body),
        Some(code) => Err(ApiError::Upstream { code }),
        None => Err(ApiError::Decode("non-numeric status code".into())),
    }
}

/// Append a `timestamp` parameter so intermediaries cannot serve a stale body.
pub fn with_cache_buster(path: &str, now_ms: i64) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    let sep = if path.contains('?') { '&' } else { '?' };
    format!("{path}{sep}timestamp={now_ms}")
}
