//! The notification engine.
//!
//! One pass enumerates every (referendum, network) pair with at least one
//! subscriber, fetches candidate votes, filters them against the stored
//! watermark, delivers the fresh ones in ascending timestamp order to all
//! subscriber chats, and only then advances the watermark to the newest
//! delivered timestamp.
//!
//! The watermark moves to the newest *vote* timestamp rather than the
//! wall clock: a lagging provider or skewed clock must not open a gap the
//! watermark has already passed. A failure between delivery and the
//! watermark write re-delivers next pass (at-least-once); a delivery
//! failure for one chat never blocks the others or the advance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::format::format_vote;
use crate::identity::IdentityResolver;
use crate::sources::VoteSource;
use crate::store::{Store, SubscriptionTarget};
use crate::telegram::MessageSink;
use crate::types::{normalize_timestamp_secs, VoteEvent};

/// Outcome of one notification pass, logged by the scheduler and returned
/// as JSON by the manual trigger route. `source_errors` is the operator's
/// outage signal: providers failing look like "no new votes" to users.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassSummary {
    /// A pass was already in flight; nothing was done.
    pub already_running: bool,
    pub targets: usize,
    pub targets_processed: usize,
    /// Targets abandoned by a store or delivery-path error.
    pub targets_skipped: usize,
    /// Distinct votes that reached at least one chat.
    pub votes_delivered: usize,
    pub sends_ok: usize,
    pub sends_failed: usize,
    pub source_errors: u32,
    pub deadline_reached: bool,
}

#[derive(Debug, Default)]
struct TargetStats {
    votes: usize,
    sends_ok: usize,
    sends_failed: usize,
    source_errors: u32,
}

pub struct Notifier<S, T> {
    store: Arc<Store>,
    source: S,
    sink: T,
    identity: Option<IdentityResolver>,
    pass_deadline: Duration,
    running: AtomicBool,
}

impl<S: VoteSource, T: MessageSink> Notifier<S, T> {
    pub fn new(
        store: Arc<Store>,
        source: S,
        sink: T,
        identity: Option<IdentityResolver>,
        pass_deadline: Duration,
    ) -> Self {
        Self {
            store,
            source,
            sink,
            identity,
            pass_deadline,
            running: AtomicBool::new(false),
        }
    }

    /// Run one notification pass. Non-reentrant: an overlapping call
    /// returns immediately with `already_running` set.
    pub async fn run_pass(&self) -> PassSummary {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("pass already running, skipping");
            return PassSummary {
                already_running: true,
                ..PassSummary::default()
            };
        }
        let summary = self.run_pass_inner().await;
        self.running.store(false, Ordering::SeqCst);
        summary
    }

    async fn run_pass_inner(&self) -> PassSummary {
        let mut summary = PassSummary::default();

        let targets = match self.store.list_subscription_targets() {
            Ok(targets) => targets,
            Err(e) => {
                error!(error = %e, "failed to list subscription targets");
                return summary;
            }
        };
        summary.targets = targets.len();
        if targets.is_empty() {
            return summary;
        }

        let deadline = Instant::now() + self.pass_deadline;
        for target in &targets {
            if Instant::now() >= deadline {
                warn!(
                    remaining = targets.len() - summary.targets_processed,
                    "pass deadline reached, deferring remaining targets"
                );
                summary.deadline_reached = true;
                break;
            }

            // Partial-failure isolation: one bad target never stops the rest.
            match self.process_target(target).await {
                Ok(stats) => {
                    summary.targets_processed += 1;
                    summary.votes_delivered += stats.votes;
                    summary.sends_ok += stats.sends_ok;
                    summary.sends_failed += stats.sends_failed;
                    summary.source_errors += stats.source_errors;
                }
                Err(e) => {
                    summary.targets_skipped += 1;
                    warn!(
                        ref_id = target.ref_id,
                        network = %target.network,
                        error = %e,
                        "target skipped this pass"
                    );
                }
            }
        }

        if summary.votes_delivered > 0 || summary.sends_failed > 0 || summary.source_errors > 0 {
            info!(
                targets = summary.targets,
                votes = summary.votes_delivered,
                sends_ok = summary.sends_ok,
                sends_failed = summary.sends_failed,
                source_errors = summary.source_errors,
                "notification pass complete"
            );
        }
        summary
    }

    async fn process_target(&self, target: &SubscriptionTarget) -> Result<TargetStats> {
        let mut stats = TargetStats::default();

        let last = self.store.get_watermark(target.ref_id, target.network)?;
        let batch = self
            .source
            .fetch_recent_votes(target.network, target.ref_id)
            .await;
        stats.source_errors = batch.provider_errors;

        let mut fresh: Vec<VoteEvent> = batch
            .votes
            .into_iter()
            .map(|mut v| {
                v.timestamp = normalize_timestamp_secs(v.timestamp);
                v
            })
            .collect();
        fresh.sort_by_key(|v| v.timestamp);
        // strict: a vote exactly at the watermark was already delivered
        fresh.retain(|v| v.timestamp > last);

        if fresh.is_empty() {
            return Ok(stats);
        }

        for vote in &fresh {
            let display = match &self.identity {
                Some(resolver) => resolver.resolve(&self.store, vote.display_address()).await,
                None => None,
            };
            let text = format_vote(target.ref_id, target.network, vote, display.as_deref());
            let text = text.as_str();

            let results = join_all(target.chats.iter().map(|chat| async move {
                (chat, self.sink.send(chat, text).await)
            }))
            .await;

            let mut reached = 0;
            for (chat, result) in results {
                match result {
                    Ok(()) => {
                        stats.sends_ok += 1;
                        reached += 1;
                    }
                    Err(e) => {
                        stats.sends_failed += 1;
                        warn!(
                            chat = chat.as_str(),
                            ref_id = target.ref_id,
                            network = %target.network,
                            error = %e,
                            "delivery failed for chat"
                        );
                    }
                }
            }
            // a vote no chat accepted is a send failure, not a delivery
            if reached > 0 {
                stats.votes += 1;
            }
        }

        if let Some(newest) = fresh.last() {
            self.store
                .set_watermark(target.ref_id, target.network, newest.timestamp)?;
            debug!(
                ref_id = target.ref_id,
                network = %target.network,
                watermark = newest.timestamp,
                votes = fresh.len(),
                "watermark advanced"
            );
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceBatch;
    use crate::types::{Network, VoteDirection};
    use std::collections::HashSet;
    use std::sync::Mutex;

    const T0: i64 = 1_700_000_000;

    fn vote_at(ts: i64, addr: &str) -> VoteEvent {
        VoteEvent {
            direction: VoteDirection::Aye,
            address: addr.to_string(),
            delegate: None,
            amount: "123400000000".to_string(),
            conviction: Some("Locked1x".to_string()),
            timestamp: ts,
        }
    }

    struct StubSource {
        batch: SourceBatch,
    }

    impl VoteSource for StubSource {
        async fn fetch_recent_votes(&self, _network: Network, _ref_id: i64) -> SourceBatch {
            self.batch.clone()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, String)>>,
        fail_chats: HashSet<String>,
    }

    impl RecordingSink {
        fn failing(chats: &[&str]) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail_chats: chats.iter().map(|s| s.to_string()).collect(),
            }
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl MessageSink for RecordingSink {
        async fn send(&self, chat_id: &str, text: &str) -> Result<()> {
            if self.fail_chats.contains(chat_id) {
                anyhow::bail!("chat blocked the bot");
            }
            self.sent
                .lock()
                .unwrap()
                .push((chat_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    fn notifier(
        store: Arc<Store>,
        votes: Vec<VoteEvent>,
        sink: Arc<RecordingSink>,
    ) -> Notifier<StubSource, Arc<RecordingSink>> {
        Notifier::new(
            store,
            StubSource {
                batch: SourceBatch {
                    votes,
                    provider_errors: 0,
                },
            },
            sink,
            None,
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn test_empty_subscriptions_is_a_noop() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let sink = Arc::new(RecordingSink::default());
        let n = notifier(store, vec![vote_at(T0, "a")], sink.clone());

        let summary = n.run_pass().await;
        assert_eq!(summary.targets, 0);
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_at_t0_delivers_only_newer_votes_in_order() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.add_subscription("chat1", 42, Network::Polkadot).unwrap();
        store.set_watermark(42, Network::Polkadot, T0).unwrap();

        // unsorted on purpose: one before subscribe, two after
        let votes = vec![
            vote_at(T0 + 20, "late"),
            vote_at(T0 - 10, "historic"),
            vote_at(T0 + 5, "early"),
        ];
        let sink = Arc::new(RecordingSink::default());
        let n = notifier(store.clone(), votes, sink.clone());

        let summary = n.run_pass().await;
        assert_eq!(summary.votes_delivered, 2);
        assert_eq!(summary.sends_ok, 2);

        let sent = sink.sent();
        assert_eq!(sent.len(), 2);
        // ascending timestamp order: T0+5 before T0+20
        assert!(sent[0].1.contains("early"));
        assert!(sent[1].1.contains("late"));
        assert_eq!(store.get_watermark(42, Network::Polkadot).unwrap(), T0 + 20);
    }

    #[tokio::test]
    async fn test_votes_at_or_below_watermark_do_not_move_it() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.add_subscription("chat1", 42, Network::Polkadot).unwrap();
        store.set_watermark(42, Network::Polkadot, T0).unwrap();

        // one exactly at the watermark, one below
        let votes = vec![vote_at(T0, "at"), vote_at(T0 - 100, "below")];
        let sink = Arc::new(RecordingSink::default());
        let n = notifier(store.clone(), votes, sink.clone());

        let summary = n.run_pass().await;
        assert_eq!(summary.votes_delivered, 0);
        assert!(sink.sent().is_empty());
        assert_eq!(store.get_watermark(42, Network::Polkadot).unwrap(), T0);
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.add_subscription("chat1", 42, Network::Polkadot).unwrap();

        let votes = vec![vote_at(T0 + 1, "a"), vote_at(T0 + 2, "b")];
        let sink = Arc::new(RecordingSink::default());
        let n = notifier(store.clone(), votes, sink.clone());

        let first = n.run_pass().await;
        assert_eq!(first.votes_delivered, 2);
        assert_eq!(sink.sent().len(), 2);

        // same external votes, no subscription changes: nothing new
        let second = n.run_pass().await;
        assert_eq!(second.votes_delivered, 0);
        assert_eq!(sink.sent().len(), 2);
        assert_eq!(store.get_watermark(42, Network::Polkadot).unwrap(), T0 + 2);
    }

    #[tokio::test]
    async fn test_failed_chat_does_not_block_others_or_watermark() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.add_subscription("chatA", 7, Network::Kusama).unwrap();
        store.add_subscription("chatB", 7, Network::Kusama).unwrap();

        let votes = vec![vote_at(T0 + 1, "voter")];
        let sink = Arc::new(RecordingSink::failing(&["chatB"]));
        let n = notifier(store.clone(), votes, sink.clone());

        let summary = n.run_pass().await;
        assert_eq!(summary.sends_ok, 1);
        assert_eq!(summary.sends_failed, 1);
        assert_eq!(summary.targets_skipped, 0);

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "chatA");
        assert_eq!(store.get_watermark(7, Network::Kusama).unwrap(), T0 + 1);
    }

    #[tokio::test]
    async fn test_vote_rejected_by_every_chat_is_not_counted_delivered() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.add_subscription("chatA", 3, Network::Polkadot).unwrap();

        let votes = vec![vote_at(T0 + 1, "v")];
        let sink = Arc::new(RecordingSink::failing(&["chatA"]));
        let n = notifier(store.clone(), votes, sink.clone());

        let summary = n.run_pass().await;
        assert_eq!(summary.votes_delivered, 0);
        assert_eq!(summary.sends_ok, 0);
        assert_eq!(summary.sends_failed, 1);
        // dispatch was attempted: the watermark still advances
        assert_eq!(store.get_watermark(3, Network::Polkadot).unwrap(), T0 + 1);
    }

    #[tokio::test]
    async fn test_millisecond_timestamps_are_normalized_before_comparison() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.add_subscription("chat1", 9, Network::Polkadot).unwrap();
        store.set_watermark(9, Network::Polkadot, T0).unwrap();

        // provider reports milliseconds; normalizes to T0+30
        let votes = vec![vote_at((T0 + 30) * 1000, "ms-voter")];
        let sink = Arc::new(RecordingSink::default());
        let n = notifier(store.clone(), votes, sink.clone());

        let summary = n.run_pass().await;
        assert_eq!(summary.votes_delivered, 1);
        assert_eq!(store.get_watermark(9, Network::Polkadot).unwrap(), T0 + 30);
    }

    #[tokio::test]
    async fn test_independent_watermarks_per_network() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.add_subscription("chat1", 42, Network::Polkadot).unwrap();
        store.add_subscription("chat1", 42, Network::Kusama).unwrap();
        store.set_watermark(42, Network::Polkadot, T0 + 100).unwrap();
        // kusama watermark stays 0: everything is fresh there

        let votes = vec![vote_at(T0 + 50, "v")];
        let sink = Arc::new(RecordingSink::default());
        let n = notifier(store.clone(), votes, sink.clone());

        let summary = n.run_pass().await;
        // dot target filtered everything out; ksm target delivered
        assert_eq!(summary.votes_delivered, 1);
        assert_eq!(store.get_watermark(42, Network::Polkadot).unwrap(), T0 + 100);
        assert_eq!(store.get_watermark(42, Network::Kusama).unwrap(), T0 + 50);
    }

    #[tokio::test]
    async fn test_source_errors_surface_in_summary() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.add_subscription("chat1", 1, Network::Polkadot).unwrap();

        let sink = Arc::new(RecordingSink::default());
        let n = Notifier::new(
            store,
            StubSource {
                batch: SourceBatch {
                    votes: Vec::new(),
                    provider_errors: 2,
                },
            },
            sink,
            None,
            Duration::from_secs(30),
        );

        let summary = n.run_pass().await;
        assert_eq!(summary.source_errors, 2);
        assert_eq!(summary.votes_delivered, 0);
    }

    #[tokio::test]
    async fn test_zero_deadline_starts_no_targets() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.add_subscription("chat1", 1, Network::Polkadot).unwrap();

        let sink = Arc::new(RecordingSink::default());
        let n = Notifier::new(
            store,
            StubSource {
                batch: SourceBatch {
                    votes: vec![vote_at(T0, "v")],
                    provider_errors: 0,
                },
            },
            sink.clone(),
            None,
            Duration::ZERO,
        );

        let summary = n.run_pass().await;
        assert!(summary.deadline_reached);
        assert_eq!(summary.targets_processed, 0);
        assert!(sink.sent().is_empty());
    }
}
