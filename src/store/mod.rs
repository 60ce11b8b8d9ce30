//! SQLite-backed state store for subscriptions, watermarks, and the
//! identity display-name cache.
//!
//! Data model:
//!   subscriptions(chat_id, ref_id, network)   → who watches what
//!   watermarks(ref_id, network) → since_sec    delivered-through boundary
//!   identities(addr) → display, ts_sec         7-day TTL cache (negative too)
//!   identity_overrides(addr) → display         manual pins, never expire
//!
//! The notifier is the only writer of `watermarks` during a pass; the
//! command handler also resets a watermark to "now" at subscribe time
//! (last-write-wins on that race, per design).

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

use crate::types::Network;

/// One distinct (referendum, network) pair with its subscriber chats.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionTarget {
    pub ref_id: i64,
    pub network: Network,
    pub chats: Vec<String>,
}

/// A single subscription row, used by listings and the debug dump.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SubscriptionRow {
    pub chat_id: String,
    pub ref_id: i64,
    pub network: Network,
}

/// Cached identity lookup result. `display` is None when the lookup found
/// no identity — cached anyway so we do not hammer the API for nameless
/// addresses.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityEntry {
    pub display: Option<String>,
    pub ts_sec: i64,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if necessary) the database at `path` and run the
    /// idempotent schema init.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        init_schema(&conn)?;
        info!(path = %path.display(), "store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("store lock poisoned: {e}"))?;
        f(&conn)
    }

    // -- Subscriptions --

    pub fn add_subscription(&self, chat_id: &str, ref_id: i64, network: Network) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO subscriptions(chat_id, ref_id, network) VALUES(?1, ?2, ?3)",
                params![chat_id, ref_id, network.code()],
            )?;
            Ok(())
        })
    }

    /// Remove one subscription. `network = None` removes the referendum on
    /// both networks. Returns the number of rows removed.
    pub fn remove_subscription(
        &self,
        chat_id: &str,
        ref_id: i64,
        network: Option<Network>,
    ) -> Result<usize> {
        self.with_conn(|conn| {
            let n = match network {
                Some(network) => conn.execute(
                    "DELETE FROM subscriptions WHERE chat_id=?1 AND ref_id=?2 AND network=?3",
                    params![chat_id, ref_id, network.code()],
                )?,
                None => conn.execute(
                    "DELETE FROM subscriptions WHERE chat_id=?1 AND ref_id=?2",
                    params![chat_id, ref_id],
                )?,
            };
            Ok(n)
        })
    }

    /// Drop every subscription a chat holds, on both networks.
    pub fn clear_chat(&self, chat_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM subscriptions WHERE chat_id=?1",
                params![chat_id],
            )?;
            Ok(n)
        })
    }

    pub fn list_subscriptions_for_chat(&self, chat_id: &str) -> Result<Vec<(i64, Network)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT ref_id, network FROM subscriptions WHERE chat_id=?1 ORDER BY network, ref_id",
            )?;
            let rows = stmt.query_map(params![chat_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (ref_id, code) = row?;
                if let Some(network) = Network::parse(&code) {
                    out.push((ref_id, network));
                }
            }
            Ok(out)
        })
    }

    /// One entry per distinct (ref_id, network) that has at least one
    /// subscriber. Chat order within a target carries no meaning.
    pub fn list_subscription_targets(&self) -> Result<Vec<SubscriptionTarget>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT ref_id, network, chat_id FROM subscriptions")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            let mut grouped: BTreeMap<(i64, &'static str), SubscriptionTarget> = BTreeMap::new();
            for row in rows {
                let (ref_id, code, chat_id) = row?;
                let Some(network) = Network::parse(&code) else {
                    continue;
                };
                grouped
                    .entry((ref_id, network.code()))
                    .or_insert_with(|| SubscriptionTarget {
                        ref_id,
                        network,
                        chats: Vec::new(),
                    })
                    .chats
                    .push(chat_id);
            }
            Ok(grouped.into_values().collect())
        })
    }

    /// Full subscription dump for the admin debug route.
    pub fn dump_subscriptions(&self) -> Result<Vec<SubscriptionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT chat_id, ref_id, network FROM subscriptions ORDER BY chat_id, network, ref_id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (chat_id, ref_id, code) = row?;
                if let Some(network) = Network::parse(&code) {
                    out.push(SubscriptionRow {
                        chat_id,
                        ref_id,
                        network,
                    });
                }
            }
            Ok(out)
        })
    }

    // -- Watermarks --

    /// The delivered-through timestamp for a target, 0 when never set.
    pub fn get_watermark(&self, ref_id: i64, network: Network) -> Result<i64> {
        self.with_conn(|conn| {
            let since: Option<i64> = conn
                .query_row(
                    "SELECT since_sec FROM watermarks WHERE ref_id=?1 AND network=?2",
                    params![ref_id, network.code()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(since.unwrap_or(0))
        })
    }

    /// Unconditional upsert. Callers are responsible for only moving the
    /// value forward; the notifier always passes ts ≥ the stored value.
    pub fn set_watermark(&self, ref_id: i64, network: Network, since_sec: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO watermarks(ref_id, network, since_sec) VALUES(?1, ?2, ?3)
                 ON CONFLICT(ref_id, network) DO UPDATE SET since_sec=excluded.since_sec",
                params![ref_id, network.code(), since_sec],
            )?;
            Ok(())
        })
    }

    // -- Identity cache --

    pub fn cached_identity(&self, addr: &str) -> Result<Option<IdentityEntry>> {
        self.with_conn(|conn| {
            let entry = conn
                .query_row(
                    "SELECT display, ts_sec FROM identities WHERE addr=?1",
                    params![addr],
                    |row| {
                        Ok(IdentityEntry {
                            display: row.get(0)?,
                            ts_sec: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            Ok(entry)
        })
    }

    pub fn put_cached_identity(
        &self,
        addr: &str,
        display: Option<&str>,
        ts_sec: i64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO identities(addr, display, ts_sec) VALUES(?1, ?2, ?3)
                 ON CONFLICT(addr) DO UPDATE SET display=excluded.display, ts_sec=excluded.ts_sec",
                params![addr, display, ts_sec],
            )?;
            Ok(())
        })
    }

    /// Purge one cached identity (admin/debug escape hatch).
    pub fn delete_cached_identity(&self, addr: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM identities WHERE addr=?1", params![addr])?;
            Ok(())
        })
    }

    pub fn identity_override(&self, addr: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let display = conn
                .query_row(
                    "SELECT display FROM identity_overrides WHERE addr=?1",
                    params![addr],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(display)
        })
    }

    pub fn set_identity_override(&self, addr: &str, display: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO identity_overrides(addr, display) VALUES(?1, ?2)
                 ON CONFLICT(addr) DO UPDATE SET display=excluded.display",
                params![addr, display],
            )?;
            Ok(())
        })
    }
}

/// Idempotent schema init, run once at open. `CREATE TABLE IF NOT EXISTS`
/// makes re-opens no-ops.
fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS subscriptions (
            chat_id TEXT    NOT NULL,
            ref_id  INTEGER NOT NULL,
            network TEXT    NOT NULL CHECK (network IN ('dot','ksm')),
            PRIMARY KEY (chat_id, ref_id, network)
        );

        CREATE TABLE IF NOT EXISTS watermarks (
            ref_id    INTEGER NOT NULL,
            network   TEXT    NOT NULL CHECK (network IN ('dot','ksm')),
            since_sec INTEGER NOT NULL,
            PRIMARY KEY (ref_id, network)
        );

        CREATE TABLE IF NOT EXISTS identities (
            addr    TEXT PRIMARY KEY,
            display TEXT,
            ts_sec  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS identity_overrides (
            addr    TEXT PRIMARY KEY,
            display TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open_in_memory().expect("in-memory store")
    }

    #[test]
    fn test_subscription_identity_key_is_triple() {
        let s = store();
        s.add_subscription("chat1", 42, Network::Polkadot).unwrap();
        // same chat + ref on the other network is a distinct subscription
        s.add_subscription("chat1", 42, Network::Kusama).unwrap();
        // duplicate insert is ignored
        s.add_subscription("chat1", 42, Network::Polkadot).unwrap();

        let subs = s.list_subscriptions_for_chat("chat1").unwrap();
        assert_eq!(
            subs,
            vec![(42, Network::Polkadot), (42, Network::Kusama)]
        );
    }

    #[test]
    fn test_remove_single_network_and_both() {
        let s = store();
        s.add_subscription("chat1", 7, Network::Polkadot).unwrap();
        s.add_subscription("chat1", 7, Network::Kusama).unwrap();

        assert_eq!(
            s.remove_subscription("chat1", 7, Some(Network::Kusama)).unwrap(),
            1
        );
        assert_eq!(
            s.list_subscriptions_for_chat("chat1").unwrap(),
            vec![(7, Network::Polkadot)]
        );

        s.add_subscription("chat1", 7, Network::Kusama).unwrap();
        assert_eq!(s.remove_subscription("chat1", 7, None).unwrap(), 2);
        assert!(s.list_subscriptions_for_chat("chat1").unwrap().is_empty());
    }

    #[test]
    fn test_clear_chat_leaves_other_chats() {
        let s = store();
        s.add_subscription("chat1", 1, Network::Polkadot).unwrap();
        s.add_subscription("chat1", 2, Network::Polkadot).unwrap();
        s.add_subscription("chat2", 1, Network::Polkadot).unwrap();

        assert_eq!(s.clear_chat("chat1").unwrap(), 2);
        assert!(s.list_subscriptions_for_chat("chat1").unwrap().is_empty());
        assert_eq!(s.list_subscriptions_for_chat("chat2").unwrap().len(), 1);
    }

    #[test]
    fn test_targets_group_chats_per_pair() {
        let s = store();
        s.add_subscription("chat1", 42, Network::Polkadot).unwrap();
        s.add_subscription("chat2", 42, Network::Polkadot).unwrap();
        s.add_subscription("chat1", 42, Network::Kusama).unwrap();

        let mut targets = s.list_subscription_targets().unwrap();
        targets.sort_by_key(|t| (t.ref_id, t.network.code()));
        assert_eq!(targets.len(), 2);

        let dot = targets
            .iter()
            .find(|t| t.network == Network::Polkadot)
            .unwrap();
        let mut chats = dot.chats.clone();
        chats.sort();
        assert_eq!(chats, vec!["chat1", "chat2"]);

        let ksm = targets
            .iter()
            .find(|t| t.network == Network::Kusama)
            .unwrap();
        assert_eq!(ksm.chats, vec!["chat1"]);
    }

    #[test]
    fn test_watermark_defaults_to_zero_and_upserts() {
        let s = store();
        assert_eq!(s.get_watermark(42, Network::Polkadot).unwrap(), 0);

        s.set_watermark(42, Network::Polkadot, 1_700_000_000).unwrap();
        assert_eq!(
            s.get_watermark(42, Network::Polkadot).unwrap(),
            1_700_000_000
        );
        // same ref on the other network is keyed independently
        assert_eq!(s.get_watermark(42, Network::Kusama).unwrap(), 0);

        s.set_watermark(42, Network::Polkadot, 1_700_000_020).unwrap();
        assert_eq!(
            s.get_watermark(42, Network::Polkadot).unwrap(),
            1_700_000_020
        );
    }

    #[test]
    fn test_identity_cache_roundtrip_and_negative_result() {
        let s = store();
        assert_eq!(s.cached_identity("addr1").unwrap(), None);

        s.put_cached_identity("addr1", Some("Alice"), 100).unwrap();
        let entry = s.cached_identity("addr1").unwrap().unwrap();
        assert_eq!(entry.display.as_deref(), Some("Alice"));
        assert_eq!(entry.ts_sec, 100);

        // negative result is cached too
        s.put_cached_identity("addr2", None, 200).unwrap();
        let entry = s.cached_identity("addr2").unwrap().unwrap();
        assert_eq!(entry.display, None);

        s.delete_cached_identity("addr1").unwrap();
        assert_eq!(s.cached_identity("addr1").unwrap(), None);
    }

    #[test]
    fn test_identity_override() {
        let s = store();
        assert_eq!(s.identity_override("addr1").unwrap(), None);
        s.set_identity_override("addr1", "Validator One").unwrap();
        assert_eq!(
            s.identity_override("addr1").unwrap().as_deref(),
            Some("Validator One")
        );
        s.set_identity_override("addr1", "Renamed").unwrap();
        assert_eq!(
            s.identity_override("addr1").unwrap().as_deref(),
            Some("Renamed")
        );
    }

    #[test]
    fn test_schema_init_is_idempotent_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refalert.db");
        {
            let s = Store::open(&path).unwrap();
            s.add_subscription("chat1", 1, Network::Polkadot).unwrap();
            s.set_watermark(1, Network::Polkadot, 123).unwrap();
        }
        let s = Store::open(&path).unwrap();
        assert_eq!(s.get_watermark(1, Network::Polkadot).unwrap(), 123);
        assert_eq!(s.list_subscription_targets().unwrap().len(), 1);
    }
}
