//! SQLite storage backend.
//!
//! Lightweight persistence without external services. `rusqlite::Connection`
//! is not `Sync`, so all SQLite I/O runs on a dedicated blocking worker
//! thread; repository methods ship closures to it over an async channel and
//! await the result. Entities are stored as JSON documents beside the key
//! columns queries filter on, and every compound write runs inside an
//! explicit SQL transaction.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::model::{
    CarapaceRevision, Circle, Claw, Endorsement, ExecutionResult, FriendModel, Friendship,
    FriendshipStatus, Heartbeat, InboxEntry, Message, Pearl, Poll, Reaction, Reflex,
    ReflexExecution, RelationshipStrength, Shareability, ThreadContribution, TrustScore,
    WorkThread,
};
use crate::reflex::builtins::names::ROUTE_PEARL_BY_INTEREST;
use crate::trust::composite_score;

use super::traits::*;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS claws (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS friendships (
    id TEXT PRIMARY KEY,
    requester TEXT NOT NULL,
    accepter TEXT NOT NULL,
    status TEXT NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_friendships_pair ON friendships(requester, accepter);
CREATE TABLE IF NOT EXISTS strengths (
    from_claw TEXT NOT NULL,
    to_claw TEXT NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (from_claw, to_claw)
);
CREATE TABLE IF NOT EXISTS trust_scores (
    from_claw TEXT NOT NULL,
    to_claw TEXT NOT NULL,
    domain TEXT NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (from_claw, to_claw, domain)
);
CREATE TABLE IF NOT EXISTS pearls (
    id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    shareability TEXT NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pearls_owner ON pearls(owner);
CREATE TABLE IF NOT EXISTS endorsements (
    pearl_id TEXT NOT NULL,
    endorser TEXT NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (pearl_id, endorser)
);
CREATE TABLE IF NOT EXISTS pearl_shares (
    pearl_id TEXT NOT NULL,
    to_claw TEXT NOT NULL,
    shared_at TEXT NOT NULL,
    PRIMARY KEY (pearl_id, to_claw)
);
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    thread_id TEXT,
    created_at TEXT NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id);
CREATE TABLE IF NOT EXISTS message_recipients (
    message_id TEXT NOT NULL,
    recipient TEXT NOT NULL,
    PRIMARY KEY (message_id, recipient)
);
CREATE TABLE IF NOT EXISTS inbox_entries (
    id TEXT PRIMARY KEY,
    recipient TEXT NOT NULL,
    message_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    read INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE (recipient, seq)
);
CREATE INDEX IF NOT EXISTS idx_inbox_recipient ON inbox_entries(recipient);
CREATE TABLE IF NOT EXISTS inbox_seqs (
    recipient TEXT PRIMARY KEY,
    next_seq INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS reactions (
    message_id TEXT NOT NULL,
    claw_id TEXT NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (message_id, claw_id)
);
CREATE TABLE IF NOT EXISTS polls (
    id TEXT PRIMARY KEY,
    closes_at TEXT NOT NULL,
    closing_notified INTEGER NOT NULL DEFAULT 0,
    closed INTEGER NOT NULL DEFAULT 0,
    data TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS reflexes (
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    enabled INTEGER NOT NULL,
    trigger_layer INTEGER NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (owner, name)
);
CREATE TABLE IF NOT EXISTS reflex_executions (
    id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    reflex_name TEXT NOT NULL,
    result TEXT NOT NULL,
    batch_id TEXT,
    target_claw TEXT,
    created_at TEXT NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_executions_owner ON reflex_executions(owner, created_at);
CREATE INDEX IF NOT EXISTS idx_executions_batch ON reflex_executions(batch_id);
CREATE TABLE IF NOT EXISTS heartbeats (
    id TEXT PRIMARY KEY,
    from_claw TEXT NOT NULL,
    to_claw TEXT NOT NULL,
    created_at TEXT NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_heartbeats_to ON heartbeats(to_claw, created_at);
CREATE TABLE IF NOT EXISTS friend_models (
    observer TEXT NOT NULL,
    friend TEXT NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (observer, friend)
);
CREATE TABLE IF NOT EXISTS work_threads (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS thread_contributions (
    id TEXT PRIMARY KEY,
    thread_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_contributions_thread ON thread_contributions(thread_id);
CREATE TABLE IF NOT EXISTS circles (
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (owner, name)
);
CREATE TABLE IF NOT EXISTS carapace_revisions (
    id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    created_at TEXT NOT NULL,
    data TEXT NOT NULL
);
";

fn encode<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(Into::into)
}

fn decode<T: DeserializeOwned>(raw: String) -> Result<T> {
    serde_json::from_str(&raw).map_err(Into::into)
}

/// Fixed-width millisecond timestamps sort lexically in temporal order.
fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// SQLite-backed store implementing every repository trait.
pub struct SqliteStore {
    tx: mpsc::Sender<DbTask>,
}

impl SqliteStore {
    /// Open a store at `path`, or fully in memory when `None`.
    pub async fn open(path: Option<PathBuf>) -> Result<Arc<Self>> {
        let (tx, mut rx) = mpsc::channel::<DbTask>(128);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        tokio::task::spawn_blocking(move || {
            let opened = match path {
                Some(ref p) => Connection::open(p),
                None => {
                    warn!("sqlite store running in memory, data is lost on restart");
                    Connection::open_in_memory()
                }
            };
            let mut conn = match opened {
                Ok(conn) => conn,
                Err(err) => {
                    let _ = ready_tx.send(Err(CoreError::Storage(err.to_string())));
                    return;
                }
            };
            let init = conn
                .execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
                .and_then(|()| conn.execute_batch(SCHEMA));
            if let Err(err) = init {
                let _ = ready_tx.send(Err(CoreError::Storage(err.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            while let Some(task) = rx.blocking_recv() {
                task(&mut conn);
            }
        });

        ready_rx
            .await
            .map_err(|_| CoreError::Storage("sqlite worker failed to start".into()))??;
        Ok(Arc::new(Self { tx }))
    }

    /// A [`Storage`] handle whose every repository is this store.
    pub fn into_storage(self: Arc<Self>) -> Storage {
        Storage {
            claws: self.clone(),
            friendships: self.clone(),
            strengths: self.clone(),
            trust: self.clone(),
            pearls: self.clone(),
            messages: self.clone(),
            reactions: self.clone(),
            polls: self.clone(),
            reflexes: self.clone(),
            executions: self.clone(),
            heartbeats: self.clone(),
            friend_models: self.clone(),
            threads: self.clone(),
            circles: self.clone(),
            carapace: self,
        }
    }

    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Box::new(move |conn| {
                let _ = tx.send(f(conn));
            }))
            .await
            .map_err(|_| CoreError::Storage("sqlite worker unavailable".into()))?;
        rx.await.map_err(|_| CoreError::Storage("sqlite worker dropped request".into()))?
    }
}

fn accepted_pair_exists(conn: &Connection, a: &str, b: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM friendships
         WHERE status = 'accepted'
           AND ((requester = ?1 AND accepter = ?2) OR (requester = ?2 AND accepter = ?1))",
        params![a, b],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn friends_of(conn: &Connection, claw: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT requester, accepter FROM friendships WHERE status = 'accepted'
           AND (requester = ?1 OR accepter = ?1)",
    )?;
    let mut friends: Vec<String> = stmt
        .query_map(params![claw], |row| {
            let requester: String = row.get(0)?;
            let accepter: String = row.get(1)?;
            Ok(if requester == claw { accepter } else { requester })
        })?
        .collect::<std::result::Result<_, _>>()?;
    friends.sort();
    friends.dedup();
    Ok(friends)
}

#[async_trait]
impl ClawRepository for SqliteStore {
    async fn insert(&self, claw: Claw) -> Result<()> {
        self.call(move |conn| {
            let data = encode(&claw)?;
            let changed = conn.execute(
                "INSERT OR IGNORE INTO claws (id, data) VALUES (?1, ?2)",
                params![claw.id, data],
            )?;
            if changed == 0 {
                return Err(CoreError::Duplicate(format!("claw {}", claw.id)));
            }
            Ok(())
        })
        .await
    }

    async fn find(&self, id: &str) -> Result<Option<Claw>> {
        let id = id.to_string();
        self.call(move |conn| {
            conn.query_row("SELECT data FROM claws WHERE id = ?1", params![id], |row| {
                row.get::<_, String>(0)
            })
            .optional()?
            .map(decode)
            .transpose()
        })
        .await
    }

    async fn update(&self, claw: Claw) -> Result<()> {
        self.call(move |conn| {
            let data = encode(&claw)?;
            let changed = conn.execute(
                "UPDATE claws SET data = ?2 WHERE id = ?1",
                params![claw.id, data],
            )?;
            if changed == 0 {
                return Err(CoreError::NotFound(format!("claw {}", claw.id)));
            }
            Ok(())
        })
        .await
    }

    async fn update_last_seen(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let id = id.to_string();
        self.call(move |conn| {
            let raw: Option<String> = conn
                .query_row("SELECT data FROM claws WHERE id = ?1", params![id], |row| row.get(0))
                .optional()?;
            let mut claw: Claw =
                decode(raw.ok_or_else(|| CoreError::NotFound(format!("claw {id}")))?)?;
            claw.last_seen_at = at;
            conn.execute(
                "UPDATE claws SET data = ?2 WHERE id = ?1",
                params![id, encode(&claw)?],
            )?;
            Ok(())
        })
        .await
    }

    async fn search_by_tag(&self, tag: &str) -> Result<Vec<Claw>> {
        let tag = tag.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare("SELECT data FROM claws ORDER BY id")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut found = Vec::new();
            for raw in rows {
                let claw: Claw = decode(raw?)?;
                if claw.discoverable && claw.tags.contains(&tag) {
                    found.push(claw);
                }
            }
            Ok(found)
        })
        .await
    }
}

#[async_trait]
impl FriendshipRepository for SqliteStore {
    async fn insert(&self, friendship: Friendship) -> Result<()> {
        self.call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO friendships (id, requester, accepter, status, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    friendship.id,
                    friendship.requester_id,
                    friendship.accepter_id,
                    status_str(friendship.status),
                    encode(&friendship)?,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn update(&self, friendship: Friendship) -> Result<()> {
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE friendships SET requester = ?2, accepter = ?3, status = ?4, data = ?5
                 WHERE id = ?1",
                params![
                    friendship.id,
                    friendship.requester_id,
                    friendship.accepter_id,
                    status_str(friendship.status),
                    encode(&friendship)?,
                ],
            )?;
            if changed == 0 {
                return Err(CoreError::NotFound(format!("friendship {}", friendship.id)));
            }
            Ok(())
        })
        .await
    }

    async fn find(&self, id: &str) -> Result<Option<Friendship>> {
        let id = id.to_string();
        self.call(move |conn| {
            conn.query_row("SELECT data FROM friendships WHERE id = ?1", params![id], |row| {
                row.get::<_, String>(0)
            })
            .optional()?
            .map(decode)
            .transpose()
        })
        .await
    }

    async fn find_by_pair(&self, a: &str, b: &str) -> Result<Option<Friendship>> {
        let (a, b) = (a.to_string(), b.to_string());
        self.call(move |conn| {
            conn.query_row(
                "SELECT data FROM friendships
                 WHERE status != 'rejected'
                   AND ((requester = ?1 AND accepter = ?2) OR (requester = ?2 AND accepter = ?1))
                 LIMIT 1",
                params![a, b],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(decode)
            .transpose()
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.call(move |conn| {
            conn.execute("DELETE FROM friendships WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    async fn are_friends(&self, a: &str, b: &str) -> Result<bool> {
        let (a, b) = (a.to_string(), b.to_string());
        self.call(move |conn| accepted_pair_exists(conn, &a, &b)).await
    }

    async fn list_friends(&self, claw: &str) -> Result<Vec<String>> {
        let claw = claw.to_string();
        self.call(move |conn| friends_of(conn, &claw)).await
    }

    async fn mutual_friends(&self, a: &str, b: &str) -> Result<Vec<String>> {
        let (a, b) = (a.to_string(), b.to_string());
        self.call(move |conn| {
            let of_a = friends_of(conn, &a)?;
            let of_b = friends_of(conn, &b)?;
            Ok(of_a.into_iter().filter(|f| of_b.contains(f)).collect())
        })
        .await
    }
}

fn status_str(status: FriendshipStatus) -> &'static str {
    match status {
        FriendshipStatus::Pending => "pending",
        FriendshipStatus::Accepted => "accepted",
        FriendshipStatus::Rejected => "rejected",
        FriendshipStatus::Blocked => "blocked",
    }
}

#[async_trait]
impl StrengthRepository for SqliteStore {
    async fn get(&self, from: &str, to: &str) -> Result<Option<RelationshipStrength>> {
        let (from, to) = (from.to_string(), to.to_string());
        self.call(move |conn| {
            conn.query_row(
                "SELECT data FROM strengths WHERE from_claw = ?1 AND to_claw = ?2",
                params![from, to],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(decode)
            .transpose()
        })
        .await
    }

    async fn upsert(&self, row: RelationshipStrength) -> Result<()> {
        self.call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO strengths (from_claw, to_claw, data) VALUES (?1, ?2, ?3)",
                params![row.from_claw, row.to_claw, encode(&row)?],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_pair(&self, a: &str, b: &str) -> Result<()> {
        let (a, b) = (a.to_string(), b.to_string());
        self.call(move |conn| {
            conn.execute(
                "DELETE FROM strengths
                 WHERE (from_claw = ?1 AND to_claw = ?2) OR (from_claw = ?2 AND to_claw = ?1)",
                params![a, b],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_from(&self, from: &str) -> Result<Vec<RelationshipStrength>> {
        let from = from.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT data FROM strengths WHERE from_claw = ?1 ORDER BY to_claw",
            )?;
            let rows = stmt.query_map(params![from], |row| row.get::<_, String>(0))?;
            rows.map(|raw| decode(raw?)).collect()
        })
        .await
    }
}

#[async_trait]
impl TrustRepository for SqliteStore {
    async fn get(&self, from: &str, to: &str, domain: &str) -> Result<Option<TrustScore>> {
        let (from, to, domain) = (from.to_string(), to.to_string(), domain.to_string());
        self.call(move |conn| {
            conn.query_row(
                "SELECT data FROM trust_scores
                 WHERE from_claw = ?1 AND to_claw = ?2 AND domain = ?3",
                params![from, to, domain],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(decode)
            .transpose()
        })
        .await
    }

    async fn upsert(&self, score: TrustScore) -> Result<()> {
        self.call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO trust_scores (from_claw, to_claw, domain, data)
                 VALUES (?1, ?2, ?3, ?4)",
                params![score.from_claw, score.to_claw, score.domain, encode(&score)?],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_pair(&self, from: &str, to: &str) -> Result<Vec<TrustScore>> {
        let (from, to) = (from.to_string(), to.to_string());
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT data FROM trust_scores
                 WHERE from_claw = ?1 AND to_claw = ?2 ORDER BY domain",
            )?;
            let rows = stmt.query_map(params![from, to], |row| row.get::<_, String>(0))?;
            rows.map(|raw| decode(raw?)).collect()
        })
        .await
    }

    async fn delete_pair(&self, a: &str, b: &str) -> Result<()> {
        let (a, b) = (a.to_string(), b.to_string());
        self.call(move |conn| {
            conn.execute(
                "DELETE FROM trust_scores
                 WHERE (from_claw = ?1 AND to_claw = ?2) OR (from_claw = ?2 AND to_claw = ?1)",
                params![a, b],
            )?;
            Ok(())
        })
        .await
    }

    async fn decay_q(&self, factor: f64, now: DateTime<Utc>) -> Result<u64> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let mut touched = 0u64;
            {
                let mut stmt =
                    tx.prepare("SELECT from_claw, to_claw, domain, data FROM trust_scores")?;
                let rows: Vec<(String, String, String, String)> = stmt
                    .query_map([], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    })?
                    .collect::<std::result::Result<_, _>>()?;
                for (from, to, domain, raw) in rows {
                    let mut score: TrustScore = decode(raw)?;
                    score.q = (score.q * factor).clamp(0.0, 1.0);
                    score.composite = composite_score(score.q, score.h, score.n, score.w);
                    score.updated_at = now;
                    tx.execute(
                        "UPDATE trust_scores SET data = ?4
                         WHERE from_claw = ?1 AND to_claw = ?2 AND domain = ?3",
                        params![from, to, domain, encode(&score)?],
                    )?;
                    touched += 1;
                }
            }
            tx.commit()?;
            Ok(touched)
        })
        .await
    }
}

#[async_trait]
impl PearlRepository for SqliteStore {
    async fn insert(&self, pearl: Pearl) -> Result<()> {
        self.call(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO pearls (id, owner, shareability, data)
                 VALUES (?1, ?2, ?3, ?4)",
                params![pearl.id, pearl.owner_id, shareability_str(pearl.shareability), encode(&pearl)?],
            )?;
            if changed == 0 {
                return Err(CoreError::Duplicate(format!("pearl {}", pearl.id)));
            }
            Ok(())
        })
        .await
    }

    async fn find(&self, id: &str) -> Result<Option<Pearl>> {
        let id = id.to_string();
        self.call(move |conn| {
            conn.query_row("SELECT data FROM pearls WHERE id = ?1", params![id], |row| {
                row.get::<_, String>(0)
            })
            .optional()?
            .map(decode)
            .transpose()
        })
        .await
    }

    async fn update(&self, pearl: Pearl) -> Result<()> {
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE pearls SET owner = ?2, shareability = ?3, data = ?4 WHERE id = ?1",
                params![pearl.id, pearl.owner_id, shareability_str(pearl.shareability), encode(&pearl)?],
            )?;
            if changed == 0 {
                return Err(CoreError::NotFound(format!("pearl {}", pearl.id)));
            }
            Ok(())
        })
        .await
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Pearl>> {
        let owner = owner.to_string();
        self.call(move |conn| {
            let mut stmt =
                conn.prepare("SELECT data FROM pearls WHERE owner = ?1 ORDER BY id")?;
            let rows = stmt.query_map(params![owner], |row| row.get::<_, String>(0))?;
            rows.map(|raw| decode(raw?)).collect()
        })
        .await
    }

    async fn list_shareable(&self, owner: &str) -> Result<Vec<Pearl>> {
        let owner = owner.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT data FROM pearls WHERE owner = ?1 AND shareability != 'private' ORDER BY id",
            )?;
            let rows = stmt.query_map(params![owner], |row| row.get::<_, String>(0))?;
            rows.map(|raw| decode(raw?)).collect()
        })
        .await
    }

    async fn record_share(&self, pearl_id: &str, to_claw: &str, at: DateTime<Utc>) -> Result<()> {
        let (pearl_id, to_claw) = (pearl_id.to_string(), to_claw.to_string());
        self.call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO pearl_shares (pearl_id, to_claw, shared_at)
                 VALUES (?1, ?2, ?3)",
                params![pearl_id, to_claw, ts(&at)],
            )?;
            Ok(())
        })
        .await
    }

    async fn was_shared_with(&self, pearl_id: &str, to_claw: &str) -> Result<bool> {
        let (pearl_id, to_claw) = (pearl_id.to_string(), to_claw.to_string());
        self.call(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM pearl_shares WHERE pearl_id = ?1 AND to_claw = ?2",
                params![pearl_id, to_claw],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    async fn upsert_endorsement(&self, endorsement: Endorsement) -> Result<()> {
        self.call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO endorsements (pearl_id, endorser, data)
                 VALUES (?1, ?2, ?3)",
                params![endorsement.pearl_id, endorsement.endorser_id, encode(&endorsement)?],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_endorsements(&self, pearl_id: &str) -> Result<Vec<Endorsement>> {
        let pearl_id = pearl_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT data FROM endorsements WHERE pearl_id = ?1 ORDER BY endorser",
            )?;
            let rows = stmt.query_map(params![pearl_id], |row| row.get::<_, String>(0))?;
            rows.map(|raw| decode(raw?)).collect()
        })
        .await
    }

    async fn record_citation(&self, pearl_id: &str) -> Result<u32> {
        let pearl_id = pearl_id.to_string();
        self.call(move |conn| {
            let raw: Option<String> = conn
                .query_row("SELECT data FROM pearls WHERE id = ?1", params![pearl_id], |row| {
                    row.get(0)
                })
                .optional()?;
            let mut pearl: Pearl =
                decode(raw.ok_or_else(|| CoreError::NotFound(format!("pearl {pearl_id}")))?)?;
            pearl.citations += 1;
            conn.execute(
                "UPDATE pearls SET data = ?2 WHERE id = ?1",
                params![pearl_id, encode(&pearl)?],
            )?;
            Ok(pearl.citations)
        })
        .await
    }
}

fn shareability_str(shareability: Shareability) -> &'static str {
    match shareability {
        Shareability::Private => "private",
        Shareability::FriendsOnly => "friends_only",
        Shareability::Public => "public",
    }
}

#[async_trait]
impl MessageRepository for SqliteStore {
    async fn insert_with_recipients(
        &self,
        message: Message,
        recipients: &[String],
    ) -> Result<Vec<InboxEntry>> {
        let recipients = recipients.to_vec();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, thread_id, created_at, data) VALUES (?1, ?2, ?3, ?4)",
                params![message.id, message.thread_id, ts(&message.created_at), encode(&message)?],
            )?;
            let mut entries = Vec::with_capacity(recipients.len());
            for recipient in &recipients {
                tx.execute(
                    "INSERT INTO message_recipients (message_id, recipient) VALUES (?1, ?2)",
                    params![message.id, recipient],
                )?;
                tx.execute(
                    "INSERT INTO inbox_seqs (recipient, next_seq) VALUES (?1, 1)
                     ON CONFLICT(recipient) DO UPDATE SET next_seq = next_seq + 1",
                    params![recipient],
                )?;
                let seq: i64 = tx.query_row(
                    "SELECT next_seq FROM inbox_seqs WHERE recipient = ?1",
                    params![recipient],
                    |row| row.get(0),
                )?;
                let entry = InboxEntry {
                    id: Uuid::new_v4().to_string(),
                    recipient_id: recipient.clone(),
                    message_id: message.id.clone(),
                    seq: seq as u64,
                    read: false,
                    created_at: message.created_at,
                };
                tx.execute(
                    "INSERT INTO inbox_entries (id, recipient, message_id, seq, read, created_at)
                     VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                    params![entry.id, entry.recipient_id, entry.message_id, seq, ts(&entry.created_at)],
                )?;
                entries.push(entry);
            }
            tx.commit()?;
            Ok(entries)
        })
        .await
    }

    async fn find(&self, id: &str) -> Result<Option<Message>> {
        let id = id.to_string();
        self.call(move |conn| {
            conn.query_row("SELECT data FROM messages WHERE id = ?1", params![id], |row| {
                row.get::<_, String>(0)
            })
            .optional()?
            .map(decode)
            .transpose()
        })
        .await
    }

    async fn find_thread(&self, root_id: &str) -> Result<Vec<Message>> {
        let root_id = root_id.to_string();
        self.call(move |conn| {
            let raw: Option<String> = conn
                .query_row("SELECT data FROM messages WHERE id = ?1", params![root_id], |row| {
                    row.get(0)
                })
                .optional()?;
            let Some(raw) = raw else { return Ok(Vec::new()) };
            let root: Message = decode(raw)?;
            let thread_key = root.thread_id.clone().unwrap_or_else(|| root.id.clone());
            let mut stmt = conn.prepare(
                "SELECT data FROM messages
                 WHERE thread_id = ?1 AND id != ?2
                 ORDER BY created_at, id",
            )?;
            let rows = stmt.query_map(params![thread_key, root.id], |row| {
                row.get::<_, String>(0)
            })?;
            let mut thread = vec![root];
            for raw in rows {
                thread.push(decode(raw?)?);
            }
            Ok(thread)
        })
        .await
    }

    async fn is_recipient(&self, message_id: &str, claw: &str) -> Result<bool> {
        let (message_id, claw) = (message_id.to_string(), claw.to_string());
        self.call(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM message_recipients WHERE message_id = ?1 AND recipient = ?2",
                params![message_id, claw],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    async fn recipients(&self, message_id: &str) -> Result<Vec<String>> {
        let message_id = message_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT recipient FROM message_recipients WHERE message_id = ?1 ORDER BY recipient",
            )?;
            let rows = stmt.query_map(params![message_id], |row| row.get::<_, String>(0))?;
            rows.collect::<std::result::Result<_, _>>().map_err(Into::into)
        })
        .await
    }

    async fn update(&self, message: Message) -> Result<()> {
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE messages SET thread_id = ?2, data = ?3 WHERE id = ?1",
                params![message.id, message.thread_id, encode(&message)?],
            )?;
            if changed == 0 {
                return Err(CoreError::NotFound(format!("message {}", message.id)));
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, message_id: &str) -> Result<()> {
        let message_id = message_id.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM messages WHERE id = ?1", params![message_id])?;
            tx.execute("DELETE FROM message_recipients WHERE message_id = ?1", params![message_id])?;
            tx.execute("DELETE FROM inbox_entries WHERE message_id = ?1", params![message_id])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn find_inbox_entry(
        &self,
        recipient: &str,
        message_id: &str,
    ) -> Result<Option<InboxEntry>> {
        let (recipient, message_id) = (recipient.to_string(), message_id.to_string());
        self.call(move |conn| {
            conn.query_row(
                "SELECT id, recipient, message_id, seq, read, created_at FROM inbox_entries
                 WHERE recipient = ?1 AND message_id = ?2",
                params![recipient, message_id],
                inbox_entry_from_row,
            )
            .optional()
            .map_err(Into::into)
        })
        .await
    }

    async fn list_inbox(&self, recipient: &str, limit: usize) -> Result<Vec<InboxEntry>> {
        let recipient = recipient.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, recipient, message_id, seq, read, created_at FROM inbox_entries
                 WHERE recipient = ?1 ORDER BY seq DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![recipient, limit as i64], inbox_entry_from_row)?;
            rows.collect::<std::result::Result<_, _>>().map_err(Into::into)
        })
        .await
    }

    async fn mark_read(&self, recipient: &str, message_id: &str) -> Result<()> {
        let (recipient, message_id) = (recipient.to_string(), message_id.to_string());
        self.call(move |conn| {
            conn.execute(
                "UPDATE inbox_entries SET read = 1 WHERE recipient = ?1 AND message_id = ?2",
                params![recipient, message_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn count_unread(&self, recipient: &str) -> Result<u64> {
        let recipient = recipient.to_string();
        self.call(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM inbox_entries WHERE recipient = ?1 AND read = 0",
                params![recipient],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }
}

fn inbox_entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InboxEntry> {
    let created_at: String = row.get(5)?;
    Ok(InboxEntry {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        message_id: row.get(2)?,
        seq: row.get::<_, i64>(3)? as u64,
        read: row.get::<_, i64>(4)? != 0,
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
    })
}

#[async_trait]
impl ReactionRepository for SqliteStore {
    async fn upsert(&self, reaction: Reaction) -> Result<()> {
        self.call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO reactions (message_id, claw_id, data) VALUES (?1, ?2, ?3)",
                params![reaction.message_id, reaction.claw_id, encode(&reaction)?],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_for_message(&self, message_id: &str) -> Result<Vec<Reaction>> {
        let message_id = message_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT data FROM reactions WHERE message_id = ?1 ORDER BY claw_id",
            )?;
            let rows = stmt.query_map(params![message_id], |row| row.get::<_, String>(0))?;
            rows.map(|raw| decode(raw?)).collect()
        })
        .await
    }
}

#[async_trait]
impl PollRepository for SqliteStore {
    async fn insert(&self, poll: Poll) -> Result<()> {
        self.call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO polls (id, closes_at, closing_notified, closed, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    poll.id,
                    ts(&poll.closes_at),
                    poll.closing_notified as i64,
                    poll.closed as i64,
                    encode(&poll)?,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn find(&self, id: &str) -> Result<Option<Poll>> {
        let id = id.to_string();
        self.call(move |conn| {
            conn.query_row("SELECT data FROM polls WHERE id = ?1", params![id], |row| {
                row.get::<_, String>(0)
            })
            .optional()?
            .map(decode)
            .transpose()
        })
        .await
    }

    async fn update(&self, poll: Poll) -> Result<()> {
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE polls SET closes_at = ?2, closing_notified = ?3, closed = ?4, data = ?5
                 WHERE id = ?1",
                params![
                    poll.id,
                    ts(&poll.closes_at),
                    poll.closing_notified as i64,
                    poll.closed as i64,
                    encode(&poll)?,
                ],
            )?;
            if changed == 0 {
                return Err(CoreError::NotFound(format!("poll {}", poll.id)));
            }
            Ok(())
        })
        .await
    }

    async fn list_closing_before(&self, deadline: DateTime<Utc>) -> Result<Vec<Poll>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT data FROM polls
                 WHERE closed = 0 AND closing_notified = 0 AND closes_at <= ?1
                 ORDER BY closes_at",
            )?;
            let rows = stmt.query_map(params![ts(&deadline)], |row| row.get::<_, String>(0))?;
            rows.map(|raw| decode(raw?)).collect()
        })
        .await
    }
}

#[async_trait]
impl ReflexRepository for SqliteStore {
    async fn upsert(&self, reflex: Reflex) -> Result<()> {
        self.call(move |conn| upsert_reflex(conn, reflex)).await
    }

    async fn upsert_many(&self, reflexes: Vec<Reflex>) -> Result<()> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            for reflex in reflexes {
                upsert_reflex(&tx, reflex)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn find_by_name(&self, owner: &str, name: &str) -> Result<Option<Reflex>> {
        let (owner, name) = (owner.to_string(), name.to_string());
        self.call(move |conn| {
            conn.query_row(
                "SELECT data FROM reflexes WHERE owner = ?1 AND name = ?2",
                params![owner, name],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(decode)
            .transpose()
        })
        .await
    }

    async fn list(&self, owner: &str) -> Result<Vec<Reflex>> {
        let owner = owner.to_string();
        self.call(move |conn| {
            let mut stmt =
                conn.prepare("SELECT data FROM reflexes WHERE owner = ?1 ORDER BY name")?;
            let rows = stmt.query_map(params![owner], |row| row.get::<_, String>(0))?;
            rows.map(|raw| decode(raw?)).collect()
        })
        .await
    }

    async fn find_enabled(&self, owner: &str, layer: Option<u8>) -> Result<Vec<Reflex>> {
        let owner = owner.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT data FROM reflexes
                 WHERE owner = ?1 AND enabled = 1
                   AND (?2 IS NULL OR trigger_layer = ?2)
                 ORDER BY name",
            )?;
            let rows = stmt.query_map(params![owner, layer.map(i64::from)], |row| {
                row.get::<_, String>(0)
            })?;
            rows.map(|raw| decode(raw?)).collect()
        })
        .await
    }

    async fn set_enabled(&self, owner: &str, name: &str, enabled: bool) -> Result<()> {
        let (owner, name) = (owner.to_string(), name.to_string());
        self.call(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT data FROM reflexes WHERE owner = ?1 AND name = ?2",
                    params![owner, name],
                    |row| row.get(0),
                )
                .optional()?;
            let mut reflex: Reflex =
                decode(raw.ok_or_else(|| CoreError::NotFound(format!("reflex {name}")))?)?;
            reflex.enabled = enabled;
            conn.execute(
                "UPDATE reflexes SET enabled = ?3, data = ?4 WHERE owner = ?1 AND name = ?2",
                params![owner, name, enabled as i64, encode(&reflex)?],
            )?;
            Ok(())
        })
        .await
    }

    async fn owners_with_enabled(&self) -> Result<Vec<String>> {
        self.call(move |conn| {
            let mut stmt = conn
                .prepare("SELECT DISTINCT owner FROM reflexes WHERE enabled = 1 ORDER BY owner")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<std::result::Result<_, _>>().map_err(Into::into)
        })
        .await
    }
}

fn upsert_reflex(conn: &Connection, reflex: Reflex) -> Result<()> {
    // The stored id survives re-upserts so audit rows stay linked.
    let existing: Option<String> = conn
        .query_row(
            "SELECT data FROM reflexes WHERE owner = ?1 AND name = ?2",
            params![reflex.owner_id, reflex.name],
            |row| row.get(0),
        )
        .optional()?;
    let mut reflex = reflex;
    if let Some(raw) = existing {
        let stored: Reflex = decode(raw)?;
        reflex.id = stored.id;
    }
    conn.execute(
        "INSERT OR REPLACE INTO reflexes (owner, name, enabled, trigger_layer, data)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            reflex.owner_id,
            reflex.name,
            reflex.enabled as i64,
            i64::from(reflex.trigger_layer),
            encode(&reflex)?,
        ],
    )?;
    Ok(())
}

#[async_trait]
impl ExecutionRepository for SqliteStore {
    async fn insert(&self, execution: ReflexExecution) -> Result<()> {
        self.call(move |conn| {
            let target = execution
                .details
                .get("targetClawId")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            conn.execute(
                "INSERT INTO reflex_executions
                 (id, owner, reflex_name, result, batch_id, target_claw, created_at, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    execution.id,
                    execution.owner_id,
                    execution.reflex_name,
                    execution.result.as_str(),
                    execution.batch_id,
                    target,
                    ts(&execution.created_at),
                    encode(&execution)?,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn find_recent(
        &self,
        owner: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ReflexExecution>> {
        let owner = owner.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT data FROM reflex_executions
                 WHERE owner = ?1 AND created_at >= ?2 ORDER BY created_at",
            )?;
            let rows = stmt.query_map(params![owner, ts(&since)], |row| row.get::<_, String>(0))?;
            rows.map(|raw| decode(raw?)).collect()
        })
        .await
    }

    async fn find_by_result(
        &self,
        owner: &str,
        result: ExecutionResult,
        since: DateTime<Utc>,
    ) -> Result<Vec<ReflexExecution>> {
        let owner = owner.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT data FROM reflex_executions
                 WHERE owner = ?1 AND result = ?2 AND created_at >= ?3 ORDER BY created_at",
            )?;
            let rows = stmt.query_map(params![owner, result.as_str(), ts(&since)], |row| {
                row.get::<_, String>(0)
            })?;
            rows.map(|raw| decode(raw?)).collect()
        })
        .await
    }

    async fn count_routing_dispatches(
        &self,
        owner: &str,
        target: &str,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        let (owner, target) = (owner.to_string(), target.to_string());
        self.call(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM reflex_executions
                 WHERE owner = ?1 AND reflex_name = ?2 AND target_claw = ?3
                   AND result IN ('dispatched_to_l1', 'l1_acknowledged')
                   AND created_at >= ?4",
                params![owner, ROUTE_PEARL_BY_INTEREST, target, ts(&since)],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    async fn mark_batch(
        &self,
        batch_id: &str,
        from: ExecutionResult,
        to: ExecutionResult,
    ) -> Result<u64> {
        let batch_id = batch_id.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let mut changed = 0u64;
            {
                let mut stmt = tx.prepare(
                    "SELECT id, data FROM reflex_executions WHERE batch_id = ?1 AND result = ?2",
                )?;
                let rows: Vec<(String, String)> = stmt
                    .query_map(params![batch_id, from.as_str()], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?
                    .collect::<std::result::Result<_, _>>()?;
                for (id, raw) in rows {
                    let mut execution: ReflexExecution = decode(raw)?;
                    execution.result = to;
                    tx.execute(
                        "UPDATE reflex_executions SET result = ?2, data = ?3 WHERE id = ?1",
                        params![id, to.as_str(), encode(&execution)?],
                    )?;
                    changed += 1;
                }
            }
            tx.commit()?;
            Ok(changed)
        })
        .await
    }
}

#[async_trait]
impl HeartbeatRepository for SqliteStore {
    async fn insert(&self, heartbeat: Heartbeat) -> Result<()> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO heartbeats (id, from_claw, to_claw, created_at, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    heartbeat.id,
                    heartbeat.from_claw,
                    heartbeat.to_claw,
                    ts(&heartbeat.created_at),
                    encode(&heartbeat)?,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_received(&self, to: &str, since: DateTime<Utc>) -> Result<Vec<Heartbeat>> {
        let to = to.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT data FROM heartbeats
                 WHERE to_claw = ?1 AND created_at >= ?2 ORDER BY created_at",
            )?;
            let rows = stmt.query_map(params![to, ts(&since)], |row| row.get::<_, String>(0))?;
            rows.map(|raw| decode(raw?)).collect()
        })
        .await
    }

    async fn latest_from(&self, from: &str, to: &str) -> Result<Option<Heartbeat>> {
        let (from, to) = (from.to_string(), to.to_string());
        self.call(move |conn| {
            conn.query_row(
                "SELECT data FROM heartbeats
                 WHERE from_claw = ?1 AND to_claw = ?2
                 ORDER BY created_at DESC LIMIT 1",
                params![from, to],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(decode)
            .transpose()
        })
        .await
    }
}

#[async_trait]
impl FriendModelRepository for SqliteStore {
    async fn get(&self, observer: &str, friend: &str) -> Result<Option<FriendModel>> {
        let (observer, friend) = (observer.to_string(), friend.to_string());
        self.call(move |conn| {
            conn.query_row(
                "SELECT data FROM friend_models WHERE observer = ?1 AND friend = ?2",
                params![observer, friend],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(decode)
            .transpose()
        })
        .await
    }

    async fn upsert(&self, model: FriendModel) -> Result<()> {
        self.call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO friend_models (observer, friend, data) VALUES (?1, ?2, ?3)",
                params![model.observer_id, model.friend_id, encode(&model)?],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ThreadRepository for SqliteStore {
    async fn insert(&self, thread: WorkThread) -> Result<()> {
        self.call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO work_threads (id, data) VALUES (?1, ?2)",
                params![thread.id, encode(&thread)?],
            )?;
            Ok(())
        })
        .await
    }

    async fn find(&self, id: &str) -> Result<Option<WorkThread>> {
        let id = id.to_string();
        self.call(move |conn| {
            conn.query_row("SELECT data FROM work_threads WHERE id = ?1", params![id], |row| {
                row.get::<_, String>(0)
            })
            .optional()?
            .map(decode)
            .transpose()
        })
        .await
    }

    async fn update(&self, thread: WorkThread) -> Result<()> {
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE work_threads SET data = ?2 WHERE id = ?1",
                params![thread.id, encode(&thread)?],
            )?;
            if changed == 0 {
                return Err(CoreError::NotFound(format!("thread {}", thread.id)));
            }
            Ok(())
        })
        .await
    }

    async fn insert_contribution(&self, contribution: ThreadContribution) -> Result<()> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO thread_contributions (id, thread_id, created_at, data)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    contribution.id,
                    contribution.thread_id,
                    ts(&contribution.created_at),
                    encode(&contribution)?,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_contributions(&self, thread_id: &str) -> Result<Vec<ThreadContribution>> {
        let thread_id = thread_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT data FROM thread_contributions WHERE thread_id = ?1 ORDER BY created_at",
            )?;
            let rows = stmt.query_map(params![thread_id], |row| row.get::<_, String>(0))?;
            rows.map(|raw| decode(raw?)).collect()
        })
        .await
    }
}

#[async_trait]
impl CircleRepository for SqliteStore {
    async fn insert(&self, circle: Circle) -> Result<()> {
        self.call(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO circles (owner, name, data) VALUES (?1, ?2, ?3)",
                params![circle.owner_id, circle.name, encode(&circle)?],
            )?;
            if changed == 0 {
                return Err(CoreError::DuplicateName(format!("circle {}", circle.name)));
            }
            Ok(())
        })
        .await
    }

    async fn find(&self, owner: &str, name: &str) -> Result<Option<Circle>> {
        let (owner, name) = (owner.to_string(), name.to_string());
        self.call(move |conn| {
            conn.query_row(
                "SELECT data FROM circles WHERE owner = ?1 AND name = ?2",
                params![owner, name],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(decode)
            .transpose()
        })
        .await
    }

    async fn update(&self, circle: Circle) -> Result<()> {
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE circles SET data = ?3 WHERE owner = ?1 AND name = ?2",
                params![circle.owner_id, circle.name, encode(&circle)?],
            )?;
            if changed == 0 {
                return Err(CoreError::NotFound(format!("circle {}", circle.name)));
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, owner: &str, name: &str) -> Result<()> {
        let (owner, name) = (owner.to_string(), name.to_string());
        self.call(move |conn| {
            conn.execute(
                "DELETE FROM circles WHERE owner = ?1 AND name = ?2",
                params![owner, name],
            )?;
            Ok(())
        })
        .await
    }

    async fn list(&self, owner: &str) -> Result<Vec<Circle>> {
        let owner = owner.to_string();
        self.call(move |conn| {
            let mut stmt =
                conn.prepare("SELECT data FROM circles WHERE owner = ?1 ORDER BY name")?;
            let rows = stmt.query_map(params![owner], |row| row.get::<_, String>(0))?;
            rows.map(|raw| decode(raw?)).collect()
        })
        .await
    }
}

#[async_trait]
impl CarapaceRepository for SqliteStore {
    async fn insert(&self, revision: CarapaceRevision) -> Result<()> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO carapace_revisions (id, owner, created_at, data)
                 VALUES (?1, ?2, ?3, ?4)",
                params![revision.id, revision.owner_id, ts(&revision.created_at), encode(&revision)?],
            )?;
            Ok(())
        })
        .await
    }

    async fn latest(&self, owner: &str) -> Result<Option<CarapaceRevision>> {
        let owner = owner.to_string();
        self.call(move |conn| {
            conn.query_row(
                "SELECT data FROM carapace_revisions
                 WHERE owner = ?1 ORDER BY created_at DESC LIMIT 1",
                params![owner],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(decode)
            .transpose()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Visibility;

    async fn store() -> Arc<SqliteStore> {
        SqliteStore::open(None).await.unwrap()
    }

    fn message(id: &str, sender: &str) -> Message {
        Message {
            id: id.to_string(),
            from_claw_id: sender.to_string(),
            blocks: vec![serde_json::json!({"type": "text", "text": "hi"})],
            visibility: Visibility::Public,
            circles: vec![],
            content_warning: None,
            reply_to_id: None,
            thread_id: None,
            edited: false,
            created_at: Utc::now(),
            edited_at: None,
        }
    }

    #[tokio::test]
    async fn sequences_survive_across_messages() {
        let store = store().await;
        let bob = vec!["bob".to_string()];
        let entries =
            store.insert_with_recipients(message("aaa", "alice"), &bob).await.unwrap();
        assert_eq!(entries[0].seq, 1);
        let entries =
            store.insert_with_recipients(message("bbb", "alice"), &bob).await.unwrap();
        assert_eq!(entries[0].seq, 2);
    }

    #[tokio::test]
    async fn duplicate_claw_insert_fails() {
        let store = store().await;
        let claw = Claw {
            id: "c1".into(),
            public_key: "00".into(),
            display_name: "Alice".into(),
            bio: String::new(),
            tags: Default::default(),
            status: crate::model::ClawStatus::Active,
            discoverable: true,
            last_seen_at: Utc::now(),
            created_at: Utc::now(),
        };
        ClawRepository::insert(&*store, claw.clone()).await.unwrap();
        let err = ClawRepository::insert(&*store, claw).await.unwrap_err();
        assert_eq!(err.kind(), "DUPLICATE");
    }

    #[tokio::test]
    async fn trust_decay_recomputes_composites() {
        let store = store().await;
        let score = TrustScore {
            from_claw: "a".into(),
            to_claw: "b".into(),
            domain: "_overall".into(),
            q: 1.0,
            h: None,
            n: 1.0,
            w: 1.0,
            composite: 1.0,
            updated_at: Utc::now(),
        };
        TrustRepository::upsert(&*store, score).await.unwrap();
        let touched = store.decay_q(0.5, Utc::now()).await.unwrap();
        assert_eq!(touched, 1);
        let stored = TrustRepository::get(&*store, "a", "b", "_overall").await.unwrap().unwrap();
        assert!((stored.q - 0.5).abs() < 1e-12);
        assert!((stored.composite - composite_score(0.5, None, 1.0, 1.0)).abs() < 1e-12);
    }
}
