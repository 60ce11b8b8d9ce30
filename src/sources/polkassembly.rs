//! Polkassembly votes-history provider (fallback source).
//!
//! POST /api/v1/votes/history with an `x-network` header. Field names are
//! less stable than Subscan's, so extraction tries several spellings per
//! field. Unlike Subscan, a row with no timestamp at all is stamped with
//! the current wall clock rather than dropped.

use anyhow::{bail, Result};
use serde_json::{json, Value};

use super::{first_amount, first_conviction, first_string, first_timestamp};
use crate::types::{now_secs, Network, VoteDirection, VoteEvent};

fn host(network: Network) -> &'static str {
    match network {
        Network::Polkadot => "https://polkadot.polkassembly.io",
        Network::Kusama => "https://kusama.polkassembly.io",
    }
}

fn network_header(network: Network) -> &'static str {
    match network {
        Network::Polkadot => "polkadot",
        Network::Kusama => "kusama",
    }
}

pub async fn fetch(
    client: &reqwest::Client,
    base_url: Option<&str>,
    network: Network,
    ref_id: i64,
) -> Result<Vec<VoteEvent>> {
    let base = base_url.unwrap_or_else(|| host(network));
    let resp = client
        .post(format!("{base}/api/v1/votes/history"))
        .header("x-network", network_header(network))
        .json(&json!({
            "postId": ref_id,
            "voteType": "referendum",
        }))
        .send()
        .await?;

    if !resp.status().is_success() {
        bail!("polkassembly {network} {}", resp.status());
    }

    let payload: Value = resp.json().await?;
    Ok(normalize_payload(&payload, now_secs()))
}

/// Extract vote rows from a raw Polkassembly response body. `now` stamps
/// rows that carry no timestamp of their own.
pub fn normalize_payload(payload: &Value, now: i64) -> Vec<VoteEvent> {
    let rows = payload
        .get("data")
        .or_else(|| payload.get("votes"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    rows.iter().filter_map(|row| normalize_row(row, now)).collect()
}

fn normalize_row(row: &Value, now: i64) -> Option<VoteEvent> {
    let decision = first_string(row, &["decision", "vote"])?;
    let direction = VoteDirection::from_status(&decision)?;
    let address = first_string(row, &["address", "voter", "account"])?;
    let timestamp = first_timestamp(
        row,
        &["created_at", "timestamp", "block_time", "blockTimestamp"],
    )
    .unwrap_or(now);
    let amount = first_amount(row, &["balance", "amount", "votedBalance", "vote_balance"])
        .unwrap_or_else(|| "0".to_string());
    let conviction = first_conviction(row, &["conviction", "lockPeriod", "voteConviction"]);
    let delegate = first_string(row, &["delegatedTo", "proxyAddress"]);

    Some(VoteEvent {
        direction,
        address,
        delegate,
        amount,
        conviction,
        timestamp,
    })
}
