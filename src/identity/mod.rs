//! On-chain identity display names, cached for 7 days.
//!
//! Cosmetic only: a failed lookup just means the message shows the raw
//! address. Resolution order: manual override table, then the cache
//! (stale after 7 days, negative results cached too), then the Subscan
//! account endpoint across the main and people-chain hosts.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::store::Store;
use crate::types::now_secs;

pub const IDENTITY_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Identity pallets migrated to the people chains, so both the legacy
/// and people hosts are worth asking.
const SUBSCAN_HOSTS: [&str; 4] = [
    "https://polkadot.api.subscan.io",
    "https://kusama.api.subscan.io",
    "https://people-polkadot.api.subscan.io",
    "https://people-kusama.api.subscan.io",
];

pub struct IdentityResolver {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl IdentityResolver {
    pub fn new(timeout: Duration, api_key: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, api_key })
    }

    /// Resolve a display name for an address, or None when it has no
    /// registered identity. Store errors degrade to None; this path must
    /// never fail a delivery.
    pub async fn resolve(&self, store: &Store, addr: &str) -> Option<String> {
        match store.identity_override(addr) {
            Ok(Some(display)) => return Some(display),
            Ok(None) => {}
            Err(e) => warn!(addr, error = %e, "identity override lookup failed"),
        }

        let now = now_secs();
        match store.cached_identity(addr) {
            Ok(Some(entry)) if now - entry.ts_sec < IDENTITY_TTL_SECS => return entry.display,
            Ok(_) => {}
            Err(e) => warn!(addr, error = %e, "identity cache lookup failed"),
        }

        let fresh = self.fetch_display(addr).await;
        if let Err(e) = store.put_cached_identity(addr, fresh.as_deref(), now) {
            warn!(addr, error = %e, "identity cache write failed");
        }
        fresh
    }

    async fn fetch_display(&self, addr: &str) -> Option<String> {
        let api_key = self.api_key.as_deref()?;
        for host in SUBSCAN_HOSTS {
            match self.fetch_from_host(host, api_key, addr).await {
                Some(resolved) => {
                    debug!(addr, host, display = %resolved, "identity resolved");
                    return Some(resolved);
                }
                None => continue,
            }
        }
        None
    }

    async fn fetch_from_host(&self, host: &str, api_key: &str, addr: &str) -> Option<String> {
        let resp = self
            .client
            .post(format!("{host}/api/scan/account"))
            .header("X-API-Key", api_key)
            .json(&json!({ "address": addr }))
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let payload: Value = resp.json().await.ok()?;
        extract_display(&payload)
    }
}

/// Pull a display name out of a Subscan account response; the field has
/// moved around between API versions.
fn extract_display(payload: &Value) -> Option<String> {
    let data = payload.get("data")?;
    let candidates = [
        data.pointer("/identity/display"),
        data.pointer("/account/identity/display"),
        data.pointer("/display"),
        data.pointer("/account/display"),
        data.pointer("/account_display"),
    ];
    for candidate in candidates.into_iter().flatten() {
        if let Some(s) = candidate.as_str() {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}
