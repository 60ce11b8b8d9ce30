//! Ranked external vote-data sources with fallback.
//!
//! Subscan is the primary provider, Polkassembly the fallback. Each
//! provider's raw JSON is normalized into [`VoteEvent`] rows at this
//! boundary; malformed rows are dropped individually, provider failures
//! are logged and absorbed. Callers always get a plain `Vec<VoteEvent>` —
//! "no new votes" and "all providers down" are deliberately
//! indistinguishable here, the pass summary carries the failure count
//! instead.

pub mod polkassembly;
pub mod subscan;

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::types::{Network, VoteEvent};

/// What one fetch produced. `provider_errors` counts providers that
/// failed outright — surfaced in the pass summary so a full outage is
/// visible to operators even though it delivers nothing to users.
#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
    pub votes: Vec<VoteEvent>,
    pub provider_errors: u32,
}

/// Source of recent votes for one (network, referendum) pair.
///
/// Implementations never error out: a failed fetch is an empty batch
/// with a non-zero error count.
pub trait VoteSource: Send + Sync {
    fn fetch_recent_votes(
        &self,
        network: Network,
        ref_id: i64,
    ) -> impl Future<Output = SourceBatch> + Send;
}

impl<S: VoteSource + ?Sized> VoteSource for std::sync::Arc<S> {
    fn fetch_recent_votes(
        &self,
        network: Network,
        ref_id: i64,
    ) -> impl Future<Output = SourceBatch> + Send {
        (**self).fetch_recent_votes(network, ref_id)
    }
}

/// Provider base-URL overrides (tests/proxies). `None` means the
/// provider's own per-network host.
#[derive(Debug, Clone, Default)]
pub struct SourceEndpoints {
    pub subscan_url: Option<String>,
    pub polkassembly_url: Option<String>,
}

/// HTTP-backed source: Subscan first, Polkassembly on error or empty.
pub struct HttpVoteSource {
    client: reqwest::Client,
    subscan_api_key: Option<String>,
    endpoints: SourceEndpoints,
}

impl HttpVoteSource {
    pub fn new(timeout: Duration, subscan_api_key: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            subscan_api_key,
            endpoints: SourceEndpoints::default(),
        })
    }

    pub fn with_endpoints(mut self, endpoints: SourceEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }
}

impl VoteSource for HttpVoteSource {
    async fn fetch_recent_votes(&self, network: Network, ref_id: i64) -> SourceBatch {
        let mut provider_errors = 0;

        match subscan::fetch(
            &self.client,
            self.endpoints.subscan_url.as_deref(),
            network,
            ref_id,
            self.subscan_api_key.as_deref(),
        )
        .await
        {
            Ok(votes) if !votes.is_empty() => {
                debug!(network = %network, ref_id, votes = votes.len(), "subscan votes");
                return SourceBatch {
                    votes,
                    provider_errors,
                };
            }
            Ok(_) => {}
            Err(e) => {
                warn!(network = %network, ref_id, error = %e, "subscan fetch failed");
                provider_errors += 1;
            }
        }

        match polkassembly::fetch(
            &self.client,
            self.endpoints.polkassembly_url.as_deref(),
            network,
            ref_id,
        )
        .await
        {
            Ok(votes) => {
                if !votes.is_empty() {
                    debug!(network = %network, ref_id, votes = votes.len(), "polkassembly votes");
                }
                SourceBatch {
                    votes,
                    provider_errors,
                }
            }
            Err(e) => {
                warn!(network = %network, ref_id, error = %e, "polkassembly fetch failed");
                provider_errors += 1;
                SourceBatch {
                    votes: Vec::new(),
                    provider_errors,
                }
            }
        }
    }
}

/// First non-empty string found under any of `keys`, walking dotted paths
/// (`"account.address"` looks inside the nested object).
pub(crate) fn first_string(row: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        let mut node = row;
        for part in key.split('.') {
            node = node.get(part)?;
        }
        if let Some(s) = node.as_str() {
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
    }
    None
}

/// First field under any of `keys` that yields a timestamp: an integer, a
/// numeric string, or an RFC 3339 date string.
pub(crate) fn first_timestamp(row: &Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        let Some(node) = row.get(key) else {
            continue;
        };
        if let Some(n) = node.as_i64() {
            if n > 0 {
                return Some(n);
            }
        }
        if let Some(s) = node.as_str() {
            if let Ok(n) = s.parse::<i64>() {
                if n > 0 {
                    return Some(n);
                }
            }
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp());
            }
        }
    }
    None
}

/// Raw amount under any of `keys`, kept as a string of minor units.
pub(crate) fn first_amount(row: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        let Some(node) = row.get(key) else {
            continue;
        };
        match node {
            Value::String(s) if !s.is_empty() => return Some(s.clone()),
            Value::Number(n) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

/// Raw conviction descriptor: a string or a bare number.
pub(crate) fn first_conviction(row: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        let Some(node) = row.get(key) else {
            continue;
        };
        match node {
            Value::String(s) if !s.is_empty() => return Some(s.clone()),
            Value::Number(n) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_string_priority_and_nesting() {
        let row = json!({
            "address": "",
            "account": { "address": "nested-addr" },
            "voter": "flat-addr",
        });
        // empty strings are skipped, nested paths resolve
        assert_eq!(
            first_string(&row, &["address", "account.address", "voter"]),
            Some("nested-addr".to_string())
        );
        assert_eq!(first_string(&row, &["missing", "also_missing"]), None);
    }

    #[test]
    fn test_first_timestamp_shapes() {
        let row = json!({
            "block_timestamp": 1_700_000_000,
            "created_at": "2023-11-14T22:13:20Z",
            "time": "1700000000",
        });
        assert_eq!(first_timestamp(&row, &["block_timestamp"]), Some(1_700_000_000));
        assert_eq!(first_timestamp(&row, &["time"]), Some(1_700_000_000));
        assert_eq!(first_timestamp(&row, &["created_at"]), Some(1_700_000_000));
        assert_eq!(first_timestamp(&row, &["nope"]), None);
    }

    #[tokio::test]
    async fn test_subscan_failure_falls_back_to_polkassembly() {
        use axum::http::StatusCode;
        use axum::routing::post;
        use axum::{Json, Router};

        // Subscan errors out, Polkassembly has two valid votes.
        let app = Router::new()
            .route(
                "/api/scan/referenda/votes",
                post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
            )
            .route(
                "/api/v1/votes/history",
                post(|| async {
                    Json(json!({
                        "data": [
                            { "decision": "aye", "address": "a1", "timestamp": 100 },
                            { "decision": "nay", "address": "a2", "timestamp": 200 }
                        ]
                    }))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let source = HttpVoteSource::new(Duration::from_secs(5), Some("test-key".to_string()))
            .unwrap()
            .with_endpoints(SourceEndpoints {
                subscan_url: Some(base.clone()),
                polkassembly_url: Some(base),
            });

        let batch = source.fetch_recent_votes(Network::Polkadot, 42).await;
        assert_eq!(batch.provider_errors, 1);
        assert_eq!(batch.votes.len(), 2);
        assert_eq!(batch.votes[0].address, "a1");
        assert_eq!(batch.votes[1].address, "a2");
    }

    #[test]
    fn test_first_amount_string_or_number() {
        let row = json!({ "votes": 5, "amount": "123400000000" });
        assert_eq!(
            first_amount(&row, &["amount", "votes"]),
            Some("123400000000".to_string())
        );
        assert_eq!(first_amount(&row, &["votes"]), Some("5".to_string()));
    }
}
