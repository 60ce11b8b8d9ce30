//! Core domain types shared across the notifier.
//!
//! Everything downstream of the source aggregator works with these
//! strongly-typed values; untyped provider payloads never leave
//! `crate::sources`.

use serde::{Deserialize, Serialize};

/// A supported governance network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    #[serde(rename = "dot")]
    Polkadot,
    #[serde(rename = "ksm")]
    Kusama,
}

impl Network {
    /// Short code used in storage, commands, and logs.
    pub fn code(self) -> &'static str {
        match self {
            Network::Polkadot => "dot",
            Network::Kusama => "ksm",
        }
    }

    /// Parse a user- or storage-facing chain name. Accepts the short code
    /// and the full network name, case-insensitive.
    pub fn parse(s: &str) -> Option<Network> {
        match s.to_ascii_lowercase().as_str() {
            "dot" | "polkadot" => Some(Network::Polkadot),
            "ksm" | "kusama" => Some(Network::Kusama),
            _ => None,
        }
    }

    /// Ticker used when rendering token amounts.
    pub fn token_symbol(self) -> &'static str {
        match self {
            Network::Polkadot => "DOT",
            Network::Kusama => "KSM",
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// How a vote was cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteDirection {
    Aye,
    Nay,
    Abstain,
}

impl VoteDirection {
    /// Classify a provider status string. Providers disagree on exact
    /// vocabulary ("ayes", "Aye", "abstain") so this is a case-insensitive
    /// substring match.
    pub fn from_status(raw: &str) -> Option<VoteDirection> {
        let s = raw.to_ascii_lowercase();
        if s.contains("aye") {
            Some(VoteDirection::Aye)
        } else if s.contains("nay") {
            Some(VoteDirection::Nay)
        } else if s.contains("abstain") {
            Some(VoteDirection::Abstain)
        } else {
            None
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            VoteDirection::Aye => "\u{1F7E2}",
            VoteDirection::Nay => "\u{1F534}",
            VoteDirection::Abstain => "\u{1F7E1}",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            VoteDirection::Aye => "AYE",
            VoteDirection::Nay => "NAY",
            VoteDirection::Abstain => "ABSTAIN",
        }
    }
}

/// A single observed vote on a referendum. Transient: fetched, filtered
/// against the watermark, formatted, delivered — never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteEvent {
    pub direction: VoteDirection,
    /// On-chain account the vote was recorded under.
    pub address: String,
    /// Set when the vote was cast via delegation; display resolution
    /// prefers this address over `address`.
    pub delegate: Option<String>,
    /// Raw token amount in minor units (plancks), decimal digits only.
    /// Kept as a string: values routinely exceed 53-bit float precision.
    pub amount: String,
    /// Raw conviction descriptor as the provider reported it
    /// (e.g. "Locked1x", "3", None).
    pub conviction: Option<String>,
    /// Event time. May still be in milliseconds as fetched; the engine
    /// runs it through [`normalize_timestamp_secs`] before comparing.
    pub timestamp: i64,
}

impl VoteEvent {
    /// Address whose identity should be shown: the delegate when the vote
    /// was delegated, otherwise the voting account itself.
    pub fn display_address(&self) -> &str {
        self.delegate.as_deref().unwrap_or(&self.address)
    }
}

/// Anything above this is assumed to be a millisecond epoch. 2e10 seconds
/// is year ~2603, so no realistic second-epoch value crosses it.
const MILLIS_THRESHOLD: i64 = 20_000_000_000;

/// Collapse a raw provider timestamp to epoch seconds. Providers mix
/// second and millisecond epochs; millisecond values are floor-divided.
pub fn normalize_timestamp_secs(raw: i64) -> i64 {
    if raw > MILLIS_THRESHOLD {
        raw / 1000
    } else {
        raw
    }
}

/// Current wall-clock time as epoch seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parse() {
        assert_eq!(Network::parse("dot"), Some(Network::Polkadot));
        assert_eq!(Network::parse("Polkadot"), Some(Network::Polkadot));
        assert_eq!(Network::parse("KSM"), Some(Network::Kusama));
        assert_eq!(Network::parse("kusama"), Some(Network::Kusama));
        assert_eq!(Network::parse("eth"), None);
    }

    #[test]
    fn test_direction_from_status() {
        assert_eq!(VoteDirection::from_status("Ayes"), Some(VoteDirection::Aye));
        assert_eq!(VoteDirection::from_status("nay"), Some(VoteDirection::Nay));
        assert_eq!(
            VoteDirection::from_status("SplitAbstain"),
            Some(VoteDirection::Abstain)
        );
        assert_eq!(VoteDirection::from_status("delegated"), None);
        assert_eq!(VoteDirection::from_status(""), None);
    }

    #[test]
    fn test_timestamp_normalization() {
        // seconds pass through untouched
        assert_eq!(normalize_timestamp_secs(1_700_000_000), 1_700_000_000);
        // milliseconds are floor-divided
        assert_eq!(normalize_timestamp_secs(1_700_000_000_000), 1_700_000_000);
        assert_eq!(normalize_timestamp_secs(1_700_000_000_999), 1_700_000_000);
        assert_eq!(normalize_timestamp_secs(0), 0);
    }

    #[test]
    fn test_display_address_prefers_delegate() {
        let mut v = VoteEvent {
            direction: VoteDirection::Aye,
            address: "proxy".to_string(),
            delegate: None,
            amount: "0".to_string(),
            conviction: None,
            timestamp: 0,
        };
        assert_eq!(v.display_address(), "proxy");
        v.delegate = Some("human".to_string());
        assert_eq!(v.display_address(), "human");
    }
}
