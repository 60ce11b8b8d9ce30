//! Telegram command handling: the only writer of subscriptions.
//!
//! `/watch` is the one place a watermark is touched outside the notifier:
//! it resets the pair's watermark to "now" so votes cast before the
//! subscription are never replayed into the chat.

use anyhow::Result;
use serde::Deserialize;
use tracing::warn;

use crate::format::escape_html;
use crate::store::Store;
use crate::telegram::MessageSink;
use crate::types::{now_secs, Network};

/// Minimal slice of a Telegram update: we only care about text messages
/// and channel posts.
#[derive(Debug, Deserialize)]
pub struct Update {
    pub message: Option<Incoming>,
    pub channel_post: Option<Incoming>,
}

#[derive(Debug, Deserialize)]
pub struct Incoming {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

impl Update {
    fn incoming(&self) -> Option<&Incoming> {
        self.message.as_ref().or(self.channel_post.as_ref())
    }
}

pub const HELP_TEXT: &str = "\u{1F44B} <b>Referendum Alert \u{2014} OpenGov vote notifier</b>\n\n\
<b>Commands</b>\n\
/watch <i>&lt;id&gt;</i> [dot|ksm] \u{2014} start watching (default dot)\n\
/watchdot <i>&lt;id&gt;</i> \u{2014} start watching on Polkadot\n\
/watchksm <i>&lt;id&gt;</i> \u{2014} start watching on Kusama\n\
/unwatch <i>&lt;id&gt;</i> [dot|ksm] \u{2014} stop watching (no chain = both)\n\
/list \u{2014} list what you watch (with chain)\n\
/clear \u{2014} unsubscribe all (both chains)\n\
/id \u{2014} show this chat id\n\
/help \u{2014} show this message\n\n\
<i>Chain:</i> <code>dot</code> = Polkadot, <code>ksm</code> = Kusama.\n\
Examples: <code>/watch 1759</code>, <code>/watch 321 ksm</code>, <code>/watch ksm:321</code>";

const WATCH_USAGE: &str =
    "Usage: <code>/watch &lt;id&gt; [dot|ksm]</code> \u{2014} e.g. <code>/watch 1759</code> or <code>/watch ksm:321</code>";
const UNWATCH_USAGE: &str = "Usage: <code>/unwatch &lt;id&gt; [dot|ksm]</code>";

/// Keep only digits, so "#1759" and "1759," both parse.
fn clean_id(raw: &str) -> Option<i64> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.parse::<i64>() {
        Ok(id) if id > 0 => Some(id),
        _ => None,
    }
}

/// Parse `/watch` arguments: `<id>`, `<id> <chain>`, or `<chain>:<id>`.
/// Chain defaults to Polkadot.
pub fn parse_watch_args(raw: &str) -> Option<(i64, Network)> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Some((prefix, suffix)) = s.split_once(':') {
        let network = Network::parse(prefix.trim())?;
        let suffix = suffix.trim();
        // "ksm:321 junk" is a malformed command, not a watch for 321
        if suffix.contains(char::is_whitespace) {
            return None;
        }
        let id = clean_id(suffix)?;
        return Some((id, network));
    }
    let mut parts = s.split_whitespace();
    let id = clean_id(parts.next()?)?;
    let network = parts
        .next()
        .and_then(Network::parse)
        .unwrap_or(Network::Polkadot);
    Some((id, network))
}

/// Parse `/unwatch` arguments: `<id>` (both chains) or `<id> <chain>`.
pub fn parse_unwatch_args(raw: &str) -> Option<(i64, Option<Network>)> {
    let mut parts = raw.trim().split_whitespace();
    let id = clean_id(parts.next()?)?;
    let network = parts.next().and_then(Network::parse);
    Some((id, network))
}

/// Handle one webhook update. Command errors are reported back into the
/// chat; errors while even that fails are only logged.
pub async fn handle_update<T: MessageSink>(store: &Store, sink: &T, update: &Update) {
    let Some(incoming) = update.incoming() else {
        return;
    };
    let Some(text) = incoming.text.as_deref() else {
        return;
    };
    let chat_id = incoming.chat.id.to_string();
    if text.trim().is_empty() {
        return;
    }

    if let Err(e) = dispatch(store, sink, &chat_id, text.trim()).await {
        warn!(chat = %chat_id, error = %e, "command failed");
        let reply = format!("\u{26A0} Error: {}", escape_html(&e.to_string()));
        if let Err(e) = sink.send(&chat_id, &reply).await {
            warn!(chat = %chat_id, error = %e, "failed to report command error");
        }
    }
}

async fn dispatch<T: MessageSink>(
    store: &Store,
    sink: &T,
    chat_id: &str,
    text: &str,
) -> Result<()> {
    let (raw_cmd, arg) = match text.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (text, ""),
    };
    // strip "@botname" so commands work in groups
    let cmd = raw_cmd
        .split('@')
        .next()
        .unwrap_or(raw_cmd)
        .to_ascii_lowercase();

    match cmd.as_str() {
        "/start" | "/help" | "/commands" => sink.send(chat_id, HELP_TEXT).await,
        "/id" => {
            sink.send(chat_id, &format!("This chat id: <code>{chat_id}</code>"))
                .await
        }
        "/watch" | "/watchdot" | "/watchksm" => {
            let parsed = match cmd.as_str() {
                "/watchdot" => clean_id(arg).map(|id| (id, Network::Polkadot)),
                "/watchksm" => clean_id(arg).map(|id| (id, Network::Kusama)),
                _ => parse_watch_args(arg),
            };
            let Some((id, network)) = parsed else {
                return sink.send(chat_id, WATCH_USAGE).await;
            };
            store.add_subscription(chat_id, id, network)?;
            // start from "now": votes cast before subscribing are not replayed
            store.set_watermark(id, network, now_secs())?;
            sink.send(
                chat_id,
                &format!("\u{2705} Watching #{id} ({})", network.code()),
            )
            .await
        }
        "/unwatch" => {
            let Some((id, network)) = parse_unwatch_args(arg) else {
                return sink.send(chat_id, UNWATCH_USAGE).await;
            };
            store.remove_subscription(chat_id, id, network)?;
            let reply = match network {
                Some(network) => format!("\u{1F5D1} Unwatched #{id} ({})", network.code()),
                None => format!("\u{1F5D1} Unwatched #{id} (dot &amp; ksm)"),
            };
            sink.send(chat_id, &reply).await
        }
        "/list" => {
            let subs = store.list_subscriptions_for_chat(chat_id)?;
            let reply = if subs.is_empty() {
                "You aren't watching any referenda yet. Use <code>/watch &lt;id&gt; [dot|ksm]</code>."
                    .to_string()
            } else {
                let items: Vec<String> = subs
                    .iter()
                    .map(|(id, network)| format!("#{id} ({})", network.code()))
                    .collect();
                format!("\u{1F440} Watching: {}", items.join(", "))
            };
            sink.send(chat_id, &reply).await
        }
        "/clear" => {
            store.clear_chat(chat_id)?;
            sink.send(
                chat_id,
                "\u{1F9F9} Cleared all subscriptions for this chat (dot &amp; ksm).",
            )
            .await
        }
        c if c.starts_with('/') => {
            let reply = format!(
                "\u{1F916} Unknown command: <code>{}</code>\n\n{}",
                escape_html(raw_cmd),
                HELP_TEXT
            );
            sink.send(chat_id, &reply).await
        }
        _ => Ok(()),
    }
}
