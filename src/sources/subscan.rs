//! Subscan referenda-votes provider (primary source).
//!
//! POST /api/scan/referenda/votes with an API key. Rows arrive under
//! `data.list`; a row without a recognizable direction, address, or
//! timestamp is dropped — Subscan timestamps are authoritative, so a
//! missing one makes the vote unusable for watermark comparison.

use anyhow::{bail, Result};
use serde_json::{json, Value};

use super::{first_amount, first_conviction, first_string, first_timestamp};
use crate::types::{Network, VoteDirection, VoteEvent};

fn host(network: Network) -> &'static str {
    match network {
        Network::Polkadot => "https://polkadot.api.subscan.io",
        Network::Kusama => "https://kusama.api.subscan.io",
    }
}

pub async fn fetch(
    client: &reqwest::Client,
    base_url: Option<&str>,
    network: Network,
    ref_id: i64,
    api_key: Option<&str>,
) -> Result<Vec<VoteEvent>> {
    let Some(api_key) = api_key else {
        // no key configured: this provider yields nothing, fallback takes over
        return Ok(Vec::new());
    };

    let base = base_url.unwrap_or_else(|| host(network));
    let resp = client
        .post(format!("{base}/api/scan/referenda/votes"))
        .header("X-API-Key", api_key)
        .json(&json!({
            "referendum_index": ref_id,
            "page": 0,
            "row": 50,
            "order": "desc",
        }))
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        bail!("subscan {network} {status}: {body}");
    }

    let payload: Value = resp.json().await?;
    Ok(normalize_payload(&payload))
}

/// Extract vote rows from a raw Subscan response body.
pub fn normalize_payload(payload: &Value) -> Vec<VoteEvent> {
    let rows = payload
        .pointer("/data/list")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    rows.iter().filter_map(normalize_row).collect()
}

fn normalize_row(row: &Value) -> Option<VoteEvent> {
    let status = first_string(row, &["status"])?;
    let direction = VoteDirection::from_status(&status)?;
    let address = first_string(row, &["account.address", "address"])?;
    let timestamp = first_timestamp(row, &["voting_time", "block_timestamp", "time"])?;
    let amount = first_amount(row, &["amount", "votes"]).unwrap_or_else(|| "0".to_string());
    let conviction = first_conviction(row, &["conviction"]);
    let delegate = first_string(row, &["delegate_account.address", "delegate"]);

    Some(VoteEvent {
        direction,
        address,
        delegate,
        amount,
        conviction,
        timestamp,
    })
}
