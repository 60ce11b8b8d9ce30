//! Vote message rendering.
//!
//! Pure functions from a [`VoteEvent`] to the HTML message pushed to
//! chats. All arithmetic is exact decimal via `rust_decimal` — raw
//! amounts are minor-unit integers that overflow f64 long before they
//! overflow a 96-bit decimal mantissa (Decimal holds ~7.9e28, about a
//! billion times the DOT issuance in plancks).

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;

use crate::types::{normalize_timestamp_secs, Network, VoteEvent};

/// Minor units per token: 10 decimal places for both DOT and KSM display.
const TOKEN_DECIMALS: u32 = 10;

/// Conviction lock multiplier as an exact rational. Denominator is 1 or
/// 10, so applying it to a decimal amount never rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conviction {
    num: u32,
    den: u32,
}

impl Conviction {
    /// Parse a provider conviction descriptor.
    ///
    /// Absent / "0" / "none" / "0.1x" → ×0.1. "Locked3x", "3x", or bare
    /// 1–6 → ×N. Anything else falls back to ×1.
    pub fn parse(raw: Option<&str>) -> Conviction {
        let Some(raw) = raw else {
            return Conviction { num: 1, den: 10 };
        };
        let s = raw.trim().to_ascii_lowercase();
        if s.is_empty() || s == "0" || s == "none" || s == "0.1x" {
            return Conviction { num: 1, den: 10 };
        }
        let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
        match digits.parse::<u32>() {
            Ok(0) => Conviction { num: 1, den: 10 },
            Ok(n @ 1..=6) => Conviction { num: n, den: 1 },
            _ => Conviction { num: 1, den: 1 },
        }
    }

    /// Display label: "0.1x" through "6x".
    pub fn label(self) -> &'static str {
        match (self.num, self.den) {
            (1, 10) => "0.1x",
            (2, 1) => "2x",
            (3, 1) => "3x",
            (4, 1) => "4x",
            (5, 1) => "5x",
            (6, 1) => "6x",
            _ => "1x",
        }
    }

    /// Apply the multiplier to an exact amount.
    pub fn apply(self, amount: Decimal) -> Decimal {
        (amount * Decimal::from(self.num) / Decimal::from(self.den)).normalize()
    }
}

/// Parse a raw minor-unit amount string into an exact major-unit decimal.
/// Non-digit characters are stripped first (providers sometimes wrap
/// numbers in formatting). Unparseable input yields zero.
pub fn parse_minor_units(raw: &str) -> Decimal {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Decimal::ZERO;
    }
    match Decimal::from_str_exact(&digits) {
        Ok(d) => (d / Decimal::from(10u64.pow(TOKEN_DECIMALS))).normalize(),
        Err(_) => Decimal::ZERO,
    }
}

/// Render a decimal without trailing fractional zeros.
pub fn display_amount(d: Decimal) -> String {
    d.normalize().to_string()
}

/// Escape the HTML-special characters Telegram's HTML parse mode treats
/// as markup.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Abbreviate a long address: first 6 chars, ellipsis, last 6.
pub fn short_addr(s: &str) -> String {
    if s.is_empty() {
        return "unknown".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 12 {
        let head: String = chars[..6].iter().collect();
        let tail: String = chars[chars.len() - 6..].iter().collect();
        format!("{head}\u{2026}{tail}")
    } else {
        s.to_string()
    }
}

/// `YYYY-MM-DD HH:MM:SS` in UTC.
pub fn format_ts_utc(secs: i64) -> String {
    match Utc.timestamp_opt(secs, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => String::new(),
    }
}

/// Render one vote as a Telegram HTML message. `display` is the resolved
/// identity for the vote's display address (delegate when delegated),
/// falling back to the abbreviated raw address.
pub fn format_vote(
    ref_id: i64,
    network: Network,
    vote: &VoteEvent,
    display: Option<&str>,
) -> String {
    let amount = parse_minor_units(&vote.amount);
    let conviction = Conviction::parse(vote.conviction.as_deref());
    let power = conviction.apply(amount);
    let token = network.token_symbol();

    let who = match display {
        Some(name) => format!("\u{1F464} {}", escape_html(name)),
        None => format!(
            "\u{1F464} <code>{}</code>",
            escape_html(&short_addr(vote.display_address()))
        ),
    };

    let mut text = format!(
        "{} <b>{}</b>\n{}\n\u{1F3F7} <i>Ref:</i> #{} ({})\n\u{1F4B0} <i>Amount:</i> <b>{} {}</b>\n\u{2696} <i>Power:</i> <b>{} {}</b> \u{2022} <i>{}</i>",
        vote.direction.emoji(),
        vote.direction.label(),
        who,
        ref_id,
        network.code(),
        display_amount(amount),
        token,
        display_amount(power),
        token,
        conviction.label(),
    );

    let ts = normalize_timestamp_secs(vote.timestamp);
    if ts > 0 {
        text.push_str(&format!("\n\u{1F552} <i>{} UTC</i>", format_ts_utc(ts)));
    }
    text
}
