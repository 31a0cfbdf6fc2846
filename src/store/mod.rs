mod index_list;

pub use index_list::int_keyed;

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::{Map, Value, json};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::{Mutex, MutexGuard, broadcast};

use crate::AppResult;

/// Key-path-addressed JSON tree over sqlite, in the shape of a hosted
/// realtime database: point reads and writes on slash-separated paths,
/// plus snapshot subscriptions that re-deliver the whole value of a path
/// after every write touching it, an ancestor, or a descendant.
///
/// Only leaves are stored; `set` flattens nested values, `get` reassembles
/// them. Setting `Null` removes the subtree.
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
    watchers: Arc<StdMutex<Vec<Watcher>>>,
    appends: Arc<Mutex<()>>,
}

struct Watcher {
    path: String,
    tx: broadcast::Sender<Value>,
}

pub struct Subscription {
    db: Db,
    path: String,
    initial: Option<Value>,
    rx: broadcast::Receiver<Value>,
}

impl Db {
    pub async fn connect(url: &str) -> AppResult<Db> {
        // a `:memory:` database exists per connection, so it must not be pooled
        let max = if url.contains(":memory:") { 1 } else { 16 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max)
            .connect(url)
            .await?;
        let db = Db {
            pool,
            watchers: Arc::new(StdMutex::new(Vec::new())),
            appends: Arc::new(Mutex::new(())),
        };
        db.migrate().await?;
        Ok(db)
    }

    pub async fn in_memory() -> AppResult<Db> {
        Db::connect("sqlite::memory:").await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> AppResult<()> {
        sqlx::query("CREATE TABLE IF NOT EXISTS nodes (path TEXT PRIMARY KEY, value TEXT NOT NULL)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE TABLE IF NOT EXISTS accounts (email TEXT PRIMARY KEY, uid TEXT NOT NULL, salt TEXT NOT NULL, pass_hash TEXT NOT NULL)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE TABLE IF NOT EXISTS blobs (path TEXT PRIMARY KEY, content_type TEXT NOT NULL, data BLOB NOT NULL)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(&self, path: &str) -> AppResult<Value> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT path,value FROM nodes WHERE path=? OR path LIKE ? ESCAPE '\\'")
                .bind(path)
                .bind(subtree_pattern(path))
                .fetch_all(&self.pool)
                .await?;

        let mut root = Value::Null;
        for (p, raw) in rows {
            let leaf: Value = serde_json::from_str(&raw)?;
            if p == path {
                root = leaf;
            } else {
                insert_at(&mut root, &p[path.len() + 1..], leaf);
            }
        }
        Ok(root)
    }

    pub async fn set(&self, path: &str, value: &Value) -> AppResult<()> {
        let mut leaves = Vec::new();
        flatten(path, value, &mut leaves);

        let mut tx = self.pool.begin().await?;
        // a scalar ancestor would shadow the new leaves
        for ancestor in ancestors(path) {
            sqlx::query("DELETE FROM nodes WHERE path=?")
                .bind(ancestor)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM nodes WHERE path=? OR path LIKE ? ESCAPE '\\'")
            .bind(path)
            .bind(subtree_pattern(path))
            .execute(&mut *tx)
            .await?;
        for (p, v) in &leaves {
            sqlx::query("INSERT INTO nodes (path,value) VALUES (?,?)")
                .bind(p)
                .bind(serde_json::to_string(v)?)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        self.notify(path).await
    }

    pub async fn remove(&self, path: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM nodes WHERE path=? OR path LIKE ? ESCAPE '\\'")
            .bind(path)
            .bind(subtree_pattern(path))
            .execute(&self.pool)
            .await?;
        self.notify(path).await
    }

    /// Number of direct children under `path` (the `.size` of a snapshot).
    pub async fn child_count(&self, path: &str) -> AppResult<usize> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT path FROM nodes WHERE path LIKE ? ESCAPE '\\'")
            .bind(subtree_pattern(path))
            .fetch_all(&self.pool)
            .await?;
        let heads: HashSet<&str> = rows
            .iter()
            .map(|(p,)| p[path.len() + 1..].split('/').next().unwrap_or(""))
            .collect();
        Ok(heads.len())
    }

    /// Claims the next message index of a room: reads `messageCounter`,
    /// falling back to counting existing messages when the counter leaf was
    /// never written, and advances the counter before releasing the append
    /// lock. Two concurrent posters can no longer claim the same slot.
    pub async fn allocate_index(&self, room_path: &str) -> AppResult<u64> {
        let _guard = self.appends.lock().await;
        let counter_path = format!("{room_path}/messageCounter");
        let idx = match self.get(&counter_path).await? {
            Value::Null => self.child_count(&format!("{room_path}/messages")).await? as u64,
            v => v.as_u64().ok_or(format!("bad messageCounter at {room_path}: {v}"))?,
        };
        self.set(&counter_path, &json!(idx + 1)).await?;
        Ok(idx)
    }

    /// Serialises multi-write appends (membership joins) against
    /// `allocate_index` and each other.
    pub async fn append_guard(&self) -> MutexGuard<'_, ()> {
        self.appends.lock().await
    }

    pub async fn subscribe(&self, path: &str) -> AppResult<Subscription> {
        let tx = {
            let mut watchers = self.watchers.lock().unwrap();
            match watchers.iter().find(|w| w.path == path) {
                Some(w) => w.tx.clone(),
                None => {
                    let (tx, _) = broadcast::channel(64);
                    watchers.push(Watcher { path: path.to_owned(), tx: tx.clone() });
                    tx
                }
            }
        };
        let rx = tx.subscribe();
        let initial = self.get(path).await?;
        Ok(Subscription {
            db: self.clone(),
            path: path.to_owned(),
            initial: Some(initial),
            rx,
        })
    }

    async fn notify(&self, path: &str) -> AppResult<()> {
        let targets: Vec<(String, broadcast::Sender<Value>)> = {
            let mut watchers = self.watchers.lock().unwrap();
            watchers.retain(|w| w.tx.receiver_count() > 0);
            watchers
                .iter()
                .filter(|w| related(&w.path, path))
                .map(|w| (w.path.clone(), w.tx.clone()))
                .collect()
        };
        for (p, tx) in targets {
            let snapshot = self.get(&p).await?;
            let _ = tx.send(snapshot);
        }
        Ok(())
    }
}

impl Subscription {
    /// The current snapshot on the first call, then one full snapshot per
    /// write under the subscribed path. `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<Value> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }
        match self.rx.recv().await {
            Ok(snapshot) => Some(snapshot),
            // snapshots are absolute, so a lagged receiver just re-reads
            Err(broadcast::error::RecvError::Lagged(_)) => self.db.get(&self.path).await.ok(),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

/// LIKE pattern matching every row strictly below `path`, with wildcard
/// characters in the path itself escaped.
pub(crate) fn subtree_pattern(path: &str) -> String {
    let escaped = path
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("{escaped}/%")
}

fn related(a: &str, b: &str) -> bool {
    a == b
        || a.len() > b.len() && a.as_bytes()[b.len()] == b'/' && a.starts_with(b)
        || b.len() > a.len() && b.as_bytes()[a.len()] == b'/' && b.starts_with(a)
}

fn ancestors(path: &str) -> Vec<&str> {
    path.char_indices()
        .filter(|&(_, c)| c == '/')
        .map(|(i, _)| &path[..i])
        .collect()
}

fn insert_at(root: &mut Value, rel: &str, leaf: Value) {
    let mut node = root;
    for seg in rel.split('/') {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = node
            .as_object_mut()
            .unwrap()
            .entry(seg.to_owned())
            .or_insert(Value::Null);
    }
    *node = leaf;
}

fn flatten(path: &str, value: &Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, child) in map {
                flatten(&format!("{path}/{key}"), child, out);
            }
        }
        Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                flatten(&format!("{path}/{idx}"), child, out);
            }
        }
        scalar => out.push((path.to_owned(), scalar.clone())),
    }
}
