//! Persistent Store (§6)
//!
//! `StoreFact`/`StoreLink` plus predicate/category iteration, used only at
//! boot (hydration of Persistent-category facts) and shutdown (persistence
//! of non-ephemeral, non-derived predicates — P9). SQLite opened in WAL
//! mode with idempotent `CREATE TABLE IF NOT EXISTS` migrations, one row
//! per stored item, JSON payload columns for the structured parts. Rather
//! than an append-only, versioned snapshot table for a single aggregate,
//! the store here keeps one row per fact/link keyed by fingerprint, since
//! facts are independently addressable rather than one blob.

use crate::error::{Result, WardenError};
use crate::schema::PredicateCategory;
use crate::term::{Fact, Term};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// A directed, weighted relation between two entities, with optional
/// metadata — the `StoreLink(a, rel, b, weight, meta)` primitive named
/// alongside `StoreFact` for associative (non-predicate) storage.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredLink {
    pub from: String,
    pub relation: String,
    pub to: String,
    pub weight: f64,
    pub meta: Option<String>,
}

fn category_tag(category: PredicateCategory) -> &'static str {
    match category {
        PredicateCategory::Persistent => "persistent",
        PredicateCategory::Ephemeral => "ephemeral",
        PredicateCategory::Derived => "derived",
    }
}

fn category_from_tag(tag: &str) -> PredicateCategory {
    match tag {
        "ephemeral" => PredicateCategory::Ephemeral,
        "derived" => PredicateCategory::Derived,
        _ => PredicateCategory::Persistent,
    }
}

/// Durable storage for facts and links, consulted only at session
/// boundaries: hydration on boot, persistence on shutdown.
pub trait PersistentStore: Send + Sync {
    fn store_fact(&self, fact: &Fact, category: PredicateCategory, weight: f64) -> Result<()>;
    fn store_link(&self, link: &StoredLink) -> Result<()>;
    fn facts_by_predicate(&self, predicate: &str) -> Result<Vec<Fact>>;
    fn facts_by_category(&self, category: PredicateCategory) -> Result<Vec<Fact>>;
    fn links_from(&self, from: &str) -> Result<Vec<StoredLink>>;

    /// Everything stored under `Persistent` — the full boot hydration set.
    fn hydrate_persistent(&self) -> Result<Vec<Fact>> {
        self.facts_by_category(PredicateCategory::Persistent)
    }
}

/// `rusqlite`-backed store, WAL mode, one row per fact keyed by fingerprint
/// so repeated `store_fact` calls for the same fact are idempotent inserts.
pub struct SqliteFactStore {
    conn: Mutex<Connection>,
}

impl SqliteFactStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| WardenError::Store(format!("opening '{}': {e}", path.display())))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| WardenError::Store(format!("configuring WAL pragmas: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory store, used by tests and by ephemeral-only sessions that
    /// never hydrate from or persist to disk.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| WardenError::Store(format!("opening in-memory db: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS facts (
                fingerprint TEXT PRIMARY KEY,
                predicate   TEXT NOT NULL,
                args_json   TEXT NOT NULL,
                category    TEXT NOT NULL,
                weight      REAL NOT NULL DEFAULT 1.0
            );
            CREATE INDEX IF NOT EXISTS idx_facts_predicate ON facts(predicate);
            CREATE INDEX IF NOT EXISTS idx_facts_category ON facts(category);

            CREATE TABLE IF NOT EXISTS links (
                id       INTEGER PRIMARY KEY AUTOINCREMENT,
                from_id  TEXT NOT NULL,
                relation TEXT NOT NULL,
                to_id    TEXT NOT NULL,
                weight   REAL NOT NULL DEFAULT 1.0,
                meta     TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_links_from ON links(from_id);
            ",
        )
        .map_err(|e| WardenError::Store(format!("migrating schema: {e}")))?;
        Ok(())
    }

    fn row_to_fact(predicate: String, args_json: String) -> Result<Fact> {
        let args: Vec<Term> = serde_json::from_str(&args_json)?;
        Ok(Fact::new(predicate, args))
    }
}

impl PersistentStore for SqliteFactStore {
    fn store_fact(&self, fact: &Fact, category: PredicateCategory, weight: f64) -> Result<()> {
        let args_json = serde_json::to_string(&fact.args)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO facts (fingerprint, predicate, args_json, category, weight)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(fingerprint) DO UPDATE SET
                category = excluded.category,
                weight = excluded.weight",
            params![
                fact.fingerprint(),
                fact.predicate,
                args_json,
                category_tag(category),
                weight
            ],
        )
        .map_err(|e| WardenError::Store(format!("storing fact: {e}")))?;
        Ok(())
    }

    fn store_link(&self, link: &StoredLink) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO links (from_id, relation, to_id, weight, meta)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![link.from, link.relation, link.to, link.weight, link.meta],
        )
        .map_err(|e| WardenError::Store(format!("storing link: {e}")))?;
        Ok(())
    }

    fn facts_by_predicate(&self, predicate: &str) -> Result<Vec<Fact>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT predicate, args_json FROM facts WHERE predicate = ?1")
            .map_err(|e| WardenError::Store(format!("preparing query: {e}")))?;
        let rows = stmt
            .query_map(params![predicate], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| WardenError::Store(format!("querying facts by predicate: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            let (predicate, args_json) =
                row.map_err(|e| WardenError::Store(format!("reading row: {e}")))?;
            out.push(Self::row_to_fact(predicate, args_json)?);
        }
        Ok(out)
    }

    fn facts_by_category(&self, category: PredicateCategory) -> Result<Vec<Fact>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT predicate, args_json FROM facts WHERE category = ?1")
            .map_err(|e| WardenError::Store(format!("preparing query: {e}")))?;
        let rows = stmt
            .query_map(params![category_tag(category)], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| WardenError::Store(format!("querying facts by category: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            let (predicate, args_json) =
                row.map_err(|e| WardenError::Store(format!("reading row: {e}")))?;
            out.push(Self::row_to_fact(predicate, args_json)?);
        }
        Ok(out)
    }

    fn links_from(&self, from: &str) -> Result<Vec<StoredLink>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT from_id, relation, to_id, weight, meta FROM links WHERE from_id = ?1")
            .map_err(|e| WardenError::Store(format!("preparing query: {e}")))?;
        let rows = stmt
            .query_map(params![from], |row| {
                Ok(StoredLink {
                    from: row.get(0)?,
                    relation: row.get(1)?,
                    to: row.get(2)?,
                    weight: row.get(3)?,
                    meta: row.get(4)?,
                })
            })
            .map_err(|e| WardenError::Store(format!("querying links: {e}")))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| WardenError::Store(format!("reading link rows: {e}")))
    }
}

/// Persist every fact in `facts` whose category is not Ephemeral or Derived
/// (shutdown persistence, per §3: only Persistent-category facts survive a
/// session boundary).
pub fn persist_shutdown_snapshot(
    store: &dyn PersistentStore,
    facts: &[(Fact, PredicateCategory)],
) -> Result<usize> {
    let mut saved = 0;
    for (fact, category) in facts {
        if *category == PredicateCategory::Persistent {
            store.store_fact(fact, *category, 1.0)?;
            saved += 1;
        }
    }
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_tag_roundtrip() {
        for cat in [
            PredicateCategory::Persistent,
            PredicateCategory::Ephemeral,
            PredicateCategory::Derived,
        ] {
            assert_eq!(category_from_tag(category_tag(cat)), cat);
        }
    }

    #[test]
    fn test_store_and_fetch_by_predicate() {
        let store = SqliteFactStore::open_in_memory().unwrap();
        let fact = Fact::new("task_status", vec![Term::name("t1"), Term::name("completed")]);
        store
            .store_fact(&fact, PredicateCategory::Persistent, 1.0)
            .unwrap();

        let fetched = store.facts_by_predicate("task_status").unwrap();
        assert_eq!(fetched, vec![fact]);
    }

    #[test]
    fn test_store_fact_idempotent_on_fingerprint() {
        let store = SqliteFactStore::open_in_memory().unwrap();
        let fact = Fact::new("unique", vec![Term::name("singleton")]);
        store
            .store_fact(&fact, PredicateCategory::Persistent, 1.0)
            .unwrap();
        store
            .store_fact(&fact, PredicateCategory::Persistent, 2.0)
            .unwrap();

        let fetched = store.facts_by_predicate("unique").unwrap();
        assert_eq!(fetched.len(), 1);
    }

    #[test]
    fn test_hydrate_persistent_excludes_ephemeral() {
        let store = SqliteFactStore::open_in_memory().unwrap();
        store
            .store_fact(
                &Fact::new("task_status", vec![Term::name("t1")]),
                PredicateCategory::Persistent,
                1.0,
            )
            .unwrap();
        store
            .store_fact(
                &Fact::new("session_flag", vec![Term::name("s1")]),
                PredicateCategory::Ephemeral,
                1.0,
            )
            .unwrap();

        let hydrated = store.hydrate_persistent().unwrap();
        assert_eq!(hydrated.len(), 1);
        assert_eq!(hydrated[0].predicate, "task_status");
    }

    #[test]
    fn test_store_and_fetch_link() {
        let store = SqliteFactStore::open_in_memory().unwrap();
        let link = StoredLink {
            from: "t1".to_string(),
            relation: "blocks".to_string(),
            to: "t2".to_string(),
            weight: 0.8,
            meta: Some("manual".to_string()),
        };
        store.store_link(&link).unwrap();

        let fetched = store.links_from("t1").unwrap();
        assert_eq!(fetched, vec![link]);
    }

    #[test]
    fn test_persist_shutdown_snapshot_skips_non_persistent() {
        let store = SqliteFactStore::open_in_memory().unwrap();
        let facts = vec![
            (
                Fact::new("task_status", vec![Term::name("t1")]),
                PredicateCategory::Persistent,
            ),
            (
                Fact::new("permitted", vec![Term::name("a1")]),
                PredicateCategory::Derived,
            ),
            (
                Fact::new("session_flag", vec![Term::name("s1")]),
                PredicateCategory::Ephemeral,
            ),
        ];

        let saved = persist_shutdown_snapshot(&store, &facts).unwrap();
        assert_eq!(saved, 1);
        assert_eq!(store.hydrate_persistent().unwrap().len(), 1);
    }
}
