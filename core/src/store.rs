//! SQLite-backed history of clipboard captures.
//!
//! Every read and write goes through one connection behind a mutex, so
//! queries and mutations are serialized at this boundary. After each
//! mutation the active query is re-run and published to subscribers.

use log::{debug, warn};
use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{
    Connection as SqliteConnection, ErrorCode, OptionalExtension, Row, named_params, params,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::{Config, DEFAULT_MAX_DISPLAYED_ITEMS, effective_limit};
use crate::error::StoreError;
use crate::fingerprint::{Fingerprint, FingerprintIndex, is_valid_prefix};
use crate::item::{CopiedItem, NewItem, now_millis};

pub type Result<T> = std::result::Result<T, StoreError>;

const ZSTD_LEVEL: i32 = 3;

const ITEM_COLUMNS: &str = "id, content_type, raw_bytes, compressed, raw_string, display_name, \
     binary_size, fingerprint, update_date, favorite, memo";

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub compress_threshold: usize,
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for StoreOptions {
    fn from(config: &Config) -> Self {
        Self {
            compress_threshold: config.compress_threshold,
            busy_timeout: config.store_timeout(),
        }
    }
}

/// Filters for a history listing. All filters combine with AND.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub text: Option<String>,
    pub only_favorite: bool,
    pub only_memoed: bool,
    pub limit: usize,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DISPLAYED_ITEMS)
    }
}

impl HistoryQuery {
    pub fn new(limit: usize) -> Self {
        Self {
            text: None,
            only_favorite: false,
            only_memoed: false,
            limit: effective_limit(limit),
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn only_favorite(mut self, only: bool) -> Self {
        self.only_favorite = only;
        self
    }

    pub fn only_memoed(mut self, only: bool) -> Self {
        self.only_memoed = only;
        self
    }

    /// Lower-cased search needle, `None` when the text filter is off.
    fn needle(&self) -> Option<String> {
        self.text
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
    }
}

/// Result set published to subscribers.
#[derive(Debug, Clone, Default)]
pub struct HistorySnapshot {
    pub generation: u64,
    pub query: HistoryQuery,
    pub items: Arc<Vec<CopiedItem>>,
}

struct Inner {
    db: SqliteConnection,
    generation: u64,
    active: HistoryQuery,
}

pub struct ContentStore {
    inner: Mutex<Inner>,
    index: FingerprintIndex,
    options: StoreOptions,
    snapshots: watch::Sender<HistorySnapshot>,
}

impl ContentStore {
    pub fn open(path: &Path, options: StoreOptions) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let open_err = |source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        };
        let db = SqliteConnection::open(path).map_err(open_err)?;
        Self::init_db(&db, options).map_err(open_err)?;
        Self::with_connection(db, options)
    }

    pub fn open_in_memory(options: StoreOptions) -> Result<Self> {
        let db = SqliteConnection::open_in_memory()?;
        Self::init_db(&db, options)?;
        Self::with_connection(db, options)
    }

    fn with_connection(db: SqliteConnection, options: StoreOptions) -> Result<Self> {
        let (snapshots, _) = watch::channel(HistorySnapshot::default());
        let store = Self {
            inner: Mutex::new(Inner {
                db,
                generation: 0,
                active: HistoryQuery::default(),
            }),
            index: FingerprintIndex::default(),
            options,
            snapshots,
        };
        store.publish(&store.inner.lock());
        Ok(store)
    }

    fn init_db(db: &SqliteConnection, options: StoreOptions) -> rusqlite::Result<()> {
        db.busy_timeout(options.busy_timeout)?;

        // journal_mode returns a row, so it cannot go through execute_batch
        db.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        db.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;",
        )?;

        // raw_string holds TEXT, or a zstd BLOB once it outgrows the threshold
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY,
                fingerprint TEXT NOT NULL UNIQUE,
                content_type TEXT NOT NULL,
                raw_bytes BLOB NOT NULL,
                compressed INTEGER NOT NULL DEFAULT 0,
                raw_string,
                display_name TEXT NOT NULL,
                binary_size INTEGER NOT NULL,
                update_date INTEGER NOT NULL,
                favorite INTEGER NOT NULL DEFAULT 0,
                memo TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_items_update_date ON items(update_date DESC);",
        )?;

        db.create_scalar_function(
            "ci_contains",
            2,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let needle = ctx.get::<String>(1)?;
                let matched = match ctx.get_raw(0) {
                    ValueRef::Text(text) => contains_lowercase(text, &needle),
                    ValueRef::Blob(blob) => zstd::decode_all(blob)
                        .map(|text| contains_lowercase(&text, &needle))
                        .unwrap_or(false),
                    _ => false,
                };
                Ok(matched)
            },
        )?;

        Ok(())
    }

    pub fn subscribe(&self) -> watch::Receiver<HistorySnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn insert(&self, item: NewItem) -> Result<CopiedItem> {
        let inner = self.inner.lock();
        let stored = self.insert_locked(&inner.db, item)?;
        self.publish(&inner);
        Ok(stored)
    }

    /// Touches the item carrying `item`'s fingerprint, or inserts `item`
    /// when there is none, in one critical section. Returns the stored item
    /// and whether it was inserted.
    pub fn record(&self, item: NewItem) -> Result<(CopiedItem, bool)> {
        let inner = self.inner.lock();

        let recorded = match self.find_locked(&inner.db, &item.fingerprint)? {
            Some(existing) => (touch_locked(&inner.db, existing.id)?, false),
            None => match self.insert_locked(&inner.db, item) {
                Ok(inserted) => (inserted, true),
                // another connection stored the same payload in between
                Err(StoreError::DuplicateFingerprint(fp)) => {
                    let existing = self
                        .find_locked(&inner.db, &fp)?
                        .ok_or_else(|| StoreError::DuplicateFingerprint(fp.clone()))?;
                    (touch_locked(&inner.db, existing.id)?, false)
                }
                Err(e) => return Err(e),
            },
        };

        self.publish(&inner);
        Ok(recorded)
    }

    fn insert_locked(&self, db: &SqliteConnection, item: NewItem) -> Result<CopiedItem> {
        let stamp = next_stamp(db)?;
        let binary_size = item.binary_size();
        let threshold = self.options.compress_threshold;
        let compressed = item.raw_bytes.len() > threshold;
        let stored_bytes = if compressed {
            zstd::encode_all(item.raw_bytes.as_slice(), ZSTD_LEVEL)?
        } else {
            item.raw_bytes.clone()
        };
        let stored_string = match &item.raw_string {
            Some(s) if s.len() > threshold => {
                Value::Blob(zstd::encode_all(s.as_bytes(), ZSTD_LEVEL)?)
            }
            Some(s) => Value::Text(s.clone()),
            None => Value::Null,
        };

        let result = db.execute(
            "INSERT INTO items (fingerprint, content_type, raw_bytes, compressed, raw_string,
                                display_name, binary_size, update_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                item.fingerprint.as_str(),
                item.content_type,
                stored_bytes,
                compressed,
                stored_string,
                item.display_name,
                binary_size as i64,
                stamp
            ],
        );
        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                return Err(StoreError::DuplicateFingerprint(item.fingerprint));
            }
            Err(e) => return Err(e.into()),
        }

        let id = db.last_insert_rowid();
        self.index.remember(item.fingerprint.clone(), id);
        debug!("stored item {} ({})", id, item.fingerprint.short());

        Ok(CopiedItem {
            id,
            content_type: item.content_type,
            raw_bytes: item.raw_bytes,
            raw_string: item.raw_string,
            display_name: item.display_name,
            binary_size,
            fingerprint: item.fingerprint,
            update_date: stamp,
            favorite: false,
            memo: None,
        })
    }

    pub fn get(&self, id: i64) -> Result<Option<CopiedItem>> {
        let inner = self.inner.lock();
        get_locked(&inner.db, id)
    }

    pub fn find_by_fingerprint(&self, fp: &Fingerprint) -> Result<Option<CopiedItem>> {
        let inner = self.inner.lock();
        self.find_locked(&inner.db, fp)
    }

    // check the index first, then the unique column
    fn find_locked(&self, db: &SqliteConnection, fp: &Fingerprint) -> Result<Option<CopiedItem>> {
        if let Some(id) = self.index.get(fp) {
            match get_locked(db, id)? {
                Some(item) if &item.fingerprint == fp => return Ok(Some(item)),
                // deleted or replaced through another connection
                _ => self.index.forget(fp),
            }
        }

        let item = db
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE fingerprint = ?1"),
                params![fp.as_str()],
                read_row,
            )
            .optional()?
            .map(decode)
            .transpose()?;

        if let Some(item) = &item {
            self.index.remember(item.fingerprint.clone(), item.id);
        }
        Ok(item)
    }

    pub fn contains(&self, fp: &Fingerprint) -> Result<bool> {
        if self.index.contains(fp) {
            return Ok(true);
        }
        let inner = self.inner.lock();
        let exists = inner
            .db
            .query_row(
                "SELECT 1 FROM items WHERE fingerprint = ?1",
                params![fp.as_str()],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        Ok(exists)
    }

    /// Resolves a user-typed hex prefix to exactly one item.
    pub fn find_by_fingerprint_prefix(&self, prefix: &str) -> Result<Option<CopiedItem>> {
        let prefix = prefix.to_ascii_lowercase();
        if !is_valid_prefix(&prefix) {
            return Err(StoreError::InvalidPrefix(prefix));
        }

        let inner = self.inner.lock();
        let mut stmt = inner.db.prepare_cached(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE fingerprint LIKE ?1 || '%'
             ORDER BY update_date DESC LIMIT 2"
        ))?;
        let rows = stmt
            .query_map(params![prefix], read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        match rows.len() {
            0 => Ok(None),
            1 => rows.into_iter().next().map(decode).transpose(),
            _ => Err(StoreError::AmbiguousPrefix(prefix)),
        }
    }

    pub fn query(&self, query: &HistoryQuery) -> Result<Vec<CopiedItem>> {
        let inner = self.inner.lock();
        query_locked(&inner.db, query)
    }

    /// Makes `query` the active one and publishes its result, unless a
    /// newer generation was already requested.
    pub fn request(&self, generation: u64, query: HistoryQuery) -> Result<HistorySnapshot> {
        let mut inner = self.inner.lock();
        if generation < inner.generation {
            debug!(
                "ignoring stale query generation {} (active {})",
                generation, inner.generation
            );
            return Ok(self.snapshot());
        }

        let items = query_locked(&inner.db, &query)?;
        inner.generation = generation;
        inner.active = query.clone();
        let snapshot = HistorySnapshot {
            generation,
            query,
            items: Arc::new(items),
        };
        self.snapshots.send_replace(snapshot.clone());
        Ok(snapshot)
    }

    /// Bumps recency to a fresh stamp, strictly newer than any stored one.
    pub fn touch(&self, id: i64) -> Result<CopiedItem> {
        let inner = self.inner.lock();
        let item = touch_locked(&inner.db, id)?;
        self.publish(&inner);
        Ok(item)
    }

    /// Persists `favorite`, `memo` and `update_date`. A stored update date
    /// is never moved backwards.
    pub fn update(&self, item: &CopiedItem) -> Result<()> {
        let inner = self.inner.lock();
        let changed = inner.db.execute(
            "UPDATE items
             SET favorite = ?1, memo = ?2, update_date = MAX(update_date, ?3)
             WHERE id = ?4",
            params![item.favorite, item.memo, item.update_date, item.id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(item.id));
        }

        self.publish(&inner);
        Ok(())
    }

    /// Flips the favorite flag in place, leaving every other column alone.
    pub fn toggle_favorite(&self, id: i64) -> Result<CopiedItem> {
        self.update_column(id, "UPDATE items SET favorite = NOT favorite WHERE id = ?1", params![id])
    }

    /// Sets or (with `None`) removes the memo, leaving every other column alone.
    pub fn set_memo(&self, id: i64, memo: Option<&str>) -> Result<CopiedItem> {
        self.update_column(id, "UPDATE items SET memo = ?2 WHERE id = ?1", params![id, memo])
    }

    fn update_column(
        &self,
        id: i64,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<CopiedItem> {
        let inner = self.inner.lock();
        if inner.db.execute(sql, params)? == 0 {
            return Err(StoreError::NotFound(id));
        }
        let item = get_locked(&inner.db, id)?.ok_or(StoreError::NotFound(id))?;
        self.publish(&inner);
        Ok(item)
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        let inner = self.inner.lock();
        let fingerprint: Option<String> = inner
            .db
            .query_row(
                "DELETE FROM items WHERE id = ?1 RETURNING fingerprint",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(fingerprint) = fingerprint else {
            return Err(StoreError::NotFound(id));
        };
        self.index.forget(&Fingerprint::from_hex(fingerprint));
        self.publish(&inner);
        Ok(())
    }

    /// Removes every item that is not a favorite in one transaction.
    pub fn delete_all_except_favorites(&self) -> Result<usize> {
        let mut inner = self.inner.lock();
        let tx = inner.db.transaction()?;
        let removed = tx.execute("DELETE FROM items WHERE favorite = 0", [])?;
        tx.commit()?;

        self.index.clear();
        debug!("cleared {} items", removed);
        self.publish(&inner);
        Ok(removed)
    }

    pub fn count(&self) -> Result<usize> {
        let inner = self.inner.lock();
        let count: i64 = inner
            .db
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // runs under the caller's lock so subscribers see mutations in order
    fn publish(&self, inner: &Inner) {
        match query_locked(&inner.db, &inner.active) {
            Ok(items) => {
                self.snapshots.send_replace(HistorySnapshot {
                    generation: inner.generation,
                    query: inner.active.clone(),
                    items: Arc::new(items),
                });
            }
            Err(e) => warn!("failed to refresh history snapshot: {}", e),
        }
    }
}

fn contains_lowercase(text: &[u8], needle: &str) -> bool {
    String::from_utf8_lossy(text).to_lowercase().contains(needle)
}

fn next_stamp(db: &SqliteConnection) -> Result<i64> {
    let latest: Option<i64> = db.query_row("SELECT MAX(update_date) FROM items", [], |row| {
        row.get(0)
    })?;
    let now = now_millis();
    Ok(match latest {
        Some(latest) if latest >= now => latest + 1,
        _ => now,
    })
}

fn touch_locked(db: &SqliteConnection, id: i64) -> Result<CopiedItem> {
    let stamp = next_stamp(db)?;
    let changed = db.execute(
        "UPDATE items SET update_date = ?1 WHERE id = ?2",
        params![stamp, id],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(id));
    }
    get_locked(db, id)?.ok_or(StoreError::NotFound(id))
}

fn get_locked(db: &SqliteConnection, id: i64) -> Result<Option<CopiedItem>> {
    db.query_row(
        &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"),
        params![id],
        read_row,
    )
    .optional()?
    .map(decode)
    .transpose()
}

fn query_locked(db: &SqliteConnection, query: &HistoryQuery) -> Result<Vec<CopiedItem>> {
    let mut stmt = db.prepare_cached(&format!(
        "SELECT {ITEM_COLUMNS} FROM items
         WHERE (:text IS NULL
                OR ci_contains(content_type, :text)
                OR ci_contains(raw_string, :text)
                OR ci_contains(display_name, :text)
                OR ci_contains(memo, :text))
           AND (:only_favorite = 0 OR favorite = 1)
           AND (:only_memoed = 0 OR (memo IS NOT NULL AND memo != ''))
         ORDER BY update_date DESC, id DESC
         LIMIT :limit"
    ))?;

    let rows = stmt
        .query_map(
            named_params! {
                ":text": query.needle(),
                ":only_favorite": query.only_favorite,
                ":only_memoed": query.only_memoed,
                ":limit": query.limit as i64,
            },
            read_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter().map(decode).collect()
}

enum StoredString {
    Plain(String),
    Compressed(Vec<u8>),
}

// Row as stored; payload and string may still be compressed.
struct StoredRow {
    item: CopiedItem,
    compressed: bool,
    raw_string: Option<StoredString>,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<StoredRow> {
    let fingerprint: String = row.get(7)?;
    let binary_size: i64 = row.get(6)?;
    let raw_string = match row.get_ref(4)? {
        ValueRef::Blob(blob) => Some(StoredString::Compressed(blob.to_vec())),
        ValueRef::Null => None,
        _ => Some(StoredString::Plain(row.get(4)?)),
    };
    Ok(StoredRow {
        item: CopiedItem {
            id: row.get(0)?,
            content_type: row.get(1)?,
            raw_bytes: row.get(2)?,
            raw_string: None,
            display_name: row.get(5)?,
            binary_size: binary_size.max(0) as u64,
            fingerprint: Fingerprint::from_hex(fingerprint),
            update_date: row.get(8)?,
            favorite: row.get(9)?,
            memo: row.get(10)?,
        },
        compressed: row.get(3)?,
        raw_string,
    })
}

fn decode(row: StoredRow) -> Result<CopiedItem> {
    let mut item = row.item;
    let corrupt = |id: i64, reason: String| StoreError::Corrupt { id, reason };

    if row.compressed {
        item.raw_bytes = zstd::decode_all(item.raw_bytes.as_slice())
            .map_err(|e| corrupt(item.id, e.to_string()))?;
    }
    item.raw_string = match row.raw_string {
        Some(StoredString::Plain(s)) => Some(s),
        Some(StoredString::Compressed(blob)) => {
            let bytes =
                zstd::decode_all(blob.as_slice()).map_err(|e| corrupt(item.id, e.to_string()))?;
            Some(String::from_utf8(bytes).map_err(|e| corrupt(item.id, e.to_string()))?)
        }
        None => None,
    };
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;
    use crate::item::PLAIN_TEXT_TYPE;
    use tempfile::TempDir;

    fn store() -> ContentStore {
        ContentStore::open_in_memory(StoreOptions::default()).unwrap()
    }

    fn text(s: &str) -> NewItem {
        NewItem::capture(
            PLAIN_TEXT_TYPE.to_string(),
            s.as_bytes().to_vec(),
            Some(s.to_string()),
            fingerprint(s.as_bytes()),
            100,
        )
    }

    fn names(items: &[CopiedItem]) -> Vec<&str> {
        items.iter().map(|i| i.display_name.as_str()).collect()
    }

    #[test]
    fn test_insert_and_find_by_fingerprint() {
        let store = store();
        let inserted = store.insert(text("hello")).unwrap();

        let found = store.find_by_fingerprint(&fingerprint(b"hello")).unwrap().unwrap();
        assert_eq!(found, inserted);
        assert_eq!(found.binary_size, 5);
        assert!(store.contains(&fingerprint(b"hello")).unwrap());
        assert!(store.find_by_fingerprint(&fingerprint(b"nope")).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_fingerprint_is_rejected() {
        let store = store();
        store.insert(text("hello")).unwrap();

        let err = store.insert(text("hello")).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateFingerprint(_)));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_query_orders_by_recency() {
        let store = store();
        let a = store.insert(text("a")).unwrap();
        store.insert(text("b")).unwrap();
        store.insert(text("c")).unwrap();

        let all = store.query(&HistoryQuery::default()).unwrap();
        assert_eq!(names(&all), vec!["c", "b", "a"]);
        assert!(all.windows(2).all(|w| w[0].update_date > w[1].update_date));

        store.touch(a.id).unwrap();
        let all = store.query(&HistoryQuery::default()).unwrap();
        assert_eq!(names(&all), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let store = store();
        let item = store.insert(text("a")).unwrap();
        let touched = store.touch(item.id).unwrap();
        assert!(touched.update_date > item.update_date);

        let mut stale = touched.clone();
        stale.update_date = 0;
        stale.favorite = true;
        store.update(&stale).unwrap();

        let reloaded = store.get(item.id).unwrap().unwrap();
        assert_eq!(reloaded.update_date, touched.update_date);
        assert!(reloaded.favorite);
    }

    #[test]
    fn test_text_filter_matches_any_field_case_insensitively() {
        let store = store();
        store.insert(text("Foo bar")).unwrap();
        let mut memoed = store.insert(text("plain")).unwrap();
        memoed.memo = Some("contains FOO".to_string());
        store.update(&memoed).unwrap();
        store.insert(text("unrelated")).unwrap();
        store.insert(text("ÜBER")).unwrap();

        let found = store.query(&HistoryQuery::default().text("foo")).unwrap();
        assert_eq!(names(&found), vec!["plain", "Foo bar"]);

        let by_type = store.query(&HistoryQuery::default().text("UTF8-PLAIN")).unwrap();
        assert_eq!(by_type.len(), 4);

        let unicode = store.query(&HistoryQuery::default().text("über")).unwrap();
        assert_eq!(names(&unicode), vec!["ÜBER"]);

        let empty = store.query(&HistoryQuery::default().text("")).unwrap();
        assert_eq!(empty.len(), 4);

        // a space is an ordinary needle
        let spaced = store.query(&HistoryQuery::default().text(" ")).unwrap();
        assert_eq!(names(&spaced), vec!["plain", "Foo bar"]);
    }

    #[test]
    fn test_filters_combine_with_and() {
        let store = store();
        let mut fav_foo = store.insert(text("foo one")).unwrap();
        fav_foo.favorite = true;
        store.update(&fav_foo).unwrap();
        store.insert(text("foo two")).unwrap();
        let mut fav_bar = store.insert(text("bar")).unwrap();
        fav_bar.favorite = true;
        fav_bar.memo = Some("note".to_string());
        store.update(&fav_bar).unwrap();

        let found = store
            .query(&HistoryQuery::default().text("foo").only_favorite(true))
            .unwrap();
        assert_eq!(names(&found), vec!["foo one"]);

        let memoed = store
            .query(&HistoryQuery::default().only_memoed(true).only_favorite(true))
            .unwrap();
        assert_eq!(names(&memoed), vec!["bar"]);

        let none = store
            .query(&HistoryQuery::default().text("foo").only_memoed(true))
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_limit_truncates() {
        let store = store();
        for s in ["a", "b", "c"] {
            store.insert(text(s)).unwrap();
        }
        let top = store.query(&HistoryQuery::new(2)).unwrap();
        assert_eq!(names(&top), vec!["c", "b"]);
    }

    #[test]
    fn test_delete_all_except_favorites() {
        let store = store();
        let mut keep = store.insert(text("keep")).unwrap();
        keep.favorite = true;
        store.update(&keep).unwrap();
        store.insert(text("drop1")).unwrap();
        store.insert(text("drop2")).unwrap();

        let removed = store.delete_all_except_favorites().unwrap();
        assert_eq!(removed, 2);

        let left = store.query(&HistoryQuery::default()).unwrap();
        assert_eq!(names(&left), vec!["keep"]);
        assert!(left.iter().all(|i| i.favorite));
        assert!(!store.contains(&fingerprint(b"drop1")).unwrap());
    }

    #[test]
    fn test_delete_reports_missing_items() {
        let store = store();
        let item = store.insert(text("a")).unwrap();

        store.delete(item.id).unwrap();
        assert!(store.find_by_fingerprint(&item.fingerprint).unwrap().is_none());
        assert!(matches!(store.delete(item.id), Err(StoreError::NotFound(_))));
        assert!(matches!(store.touch(item.id), Err(StoreError::NotFound(_))));
        assert!(matches!(store.update(&item), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_large_payloads_are_compressed_transparently() {
        let store = ContentStore::open_in_memory(StoreOptions {
            compress_threshold: 16,
            busy_timeout: Duration::from_millis(100),
        })
        .unwrap();
        let payload = "x".repeat(4096);
        let inserted = store.insert(text(&payload)).unwrap();

        let stored_len: i64 = store
            .inner
            .lock()
            .db
            .query_row("SELECT length(raw_bytes) FROM items WHERE id = ?1", [inserted.id], |r| {
                r.get(0)
            })
            .unwrap();
        assert!(stored_len < 4096);

        let loaded = store.get(inserted.id).unwrap().unwrap();
        assert_eq!(loaded.raw_bytes, payload.as_bytes());
        assert_eq!(loaded.binary_size, 4096);
    }

    #[test]
    fn test_large_strings_are_compressed_and_searchable() {
        let store = ContentStore::open_in_memory(StoreOptions {
            compress_threshold: 16,
            busy_timeout: Duration::from_millis(100),
        })
        .unwrap();
        let payload = format!("{}needle at the end", "y".repeat(4096));
        let inserted = store.insert(text(&payload)).unwrap();

        let (kind, stored_len): (String, i64) = store
            .inner
            .lock()
            .db
            .query_row(
                "SELECT typeof(raw_string), length(raw_string) FROM items WHERE id = ?1",
                [inserted.id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(kind, "blob");
        assert!((stored_len as usize) < payload.len());

        let loaded = store.get(inserted.id).unwrap().unwrap();
        assert_eq!(loaded.raw_string.as_deref(), Some(payload.as_str()));

        let found = store.query(&HistoryQuery::default().text("NEEDLE AT")).unwrap();
        assert_eq!(found.len(), 1);
        assert!(store.query(&HistoryQuery::default().text("absent")).unwrap().is_empty());
    }

    #[test]
    fn test_record_touches_or_inserts() {
        let store = store();
        let (first, inserted) = store.record(text("hello")).unwrap();
        assert!(inserted);

        let (again, inserted) = store.record(text("hello")).unwrap();
        assert!(!inserted);
        assert_eq!(again.id, first.id);
        assert!(again.update_date > first.update_date);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_record_after_delete_through_another_connection() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("history.db");
        let daemon = ContentStore::open(&path, StoreOptions::default()).unwrap();
        let cli = ContentStore::open(&path, StoreOptions::default()).unwrap();

        let (item, _) = daemon.record(text("again")).unwrap();
        // the daemon's index still maps the fingerprint to the deleted row
        cli.delete(item.id).unwrap();

        let (recorded, inserted) = daemon.record(text("again")).unwrap();
        assert!(inserted);
        assert_eq!(recorded.display_name, "again");
        assert_eq!(daemon.count().unwrap(), 1);
        assert_eq!(cli.count().unwrap(), 1);
    }

    #[test]
    fn test_favorite_and_memo_updates_do_not_clobber_each_other() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("history.db");
        let first = ContentStore::open(&path, StoreOptions::default()).unwrap();
        let second = ContentStore::open(&path, StoreOptions::default()).unwrap();
        let item = first.insert(text("shared")).unwrap();

        first.set_memo(item.id, Some("from the cli")).unwrap();
        let toggled = second.toggle_favorite(item.id).unwrap();
        assert!(toggled.favorite);
        assert_eq!(toggled.memo.as_deref(), Some("from the cli"));

        let cleared = first.set_memo(item.id, None).unwrap();
        assert!(cleared.favorite);
        assert_eq!(cleared.memo, None);
        assert!(!second.toggle_favorite(item.id).unwrap().favorite);

        assert!(matches!(first.toggle_favorite(999), Err(StoreError::NotFound(999))));
        assert!(matches!(first.set_memo(999, None), Err(StoreError::NotFound(999))));
    }

    #[test]
    fn test_prefix_lookup() {
        let store = store();
        let item = store.insert(text("hello")).unwrap();

        let found = store
            .find_by_fingerprint_prefix(&item.fingerprint.short().to_uppercase())
            .unwrap()
            .unwrap();
        assert_eq!(found.id, item.id);
        assert!(matches!(
            store.find_by_fingerprint_prefix("zz%"),
            Err(StoreError::InvalidPrefix(_))
        ));
    }

    #[test]
    fn test_subscribers_see_mutations_for_active_query() {
        let store = store();
        let mut rx = store.subscribe();

        store.request(1, HistoryQuery::new(1)).unwrap();
        assert!(rx.has_changed().unwrap());
        let _ = rx.borrow_and_update();

        store.insert(text("hello")).unwrap();
        store.insert(text("world")).unwrap();
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.generation, 1);
        assert_eq!(names(&snapshot.items), vec!["world"]);
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let store = store();
        store.insert(text("foo")).unwrap();
        store.insert(text("bar")).unwrap();

        store.request(5, HistoryQuery::default().text("foo")).unwrap();
        store.request(4, HistoryQuery::default().text("bar")).unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.generation, 5);
        assert_eq!(names(&snapshot.items), vec!["foo"]);
    }

    #[test]
    fn test_reopen_keeps_items() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("history.db");
        {
            let store = ContentStore::open(&path, StoreOptions::default()).unwrap();
            let mut item = store.insert(text("persisted")).unwrap();
            item.memo = Some("memo".to_string());
            store.update(&item).unwrap();
        }

        let store = ContentStore::open(&path, StoreOptions::default()).unwrap();
        let items = store.query(&HistoryQuery::default()).unwrap();
        assert_eq!(names(&items), vec!["persisted"]);
        assert_eq!(items[0].memo.as_deref(), Some("memo"));
    }

    #[test]
    fn test_open_fails_on_corrupt_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("history.db");
        std::fs::write(&path, b"this is definitely not a sqlite database file").unwrap();

        let err = ContentStore::open(&path, StoreOptions::default()).err().unwrap();
        assert!(matches!(err, StoreError::Open { .. }));
    }
}
