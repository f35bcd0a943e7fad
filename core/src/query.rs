//! Debounced translation of UI filter state into store queries.

use log::warn;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

use crate::config::{Config, effective_limit};
use crate::store::{ContentStore, HistoryQuery};

#[derive(Debug, Clone, Copy)]
pub struct QuerySettings {
    pub search_debounce: Duration,
    pub count_debounce: Duration,
    pub max_items: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for QuerySettings {
    fn from(config: &Config) -> Self {
        Self {
            search_debounce: config.search_debounce(),
            count_debounce: config.count_debounce(),
            max_items: config.displayed_items(),
        }
    }
}

#[derive(Debug)]
enum Input {
    SearchText(String),
    OnlyFavorite(bool),
    OnlyMemoed(bool),
    MaxItems(usize),
}

/// Sends filter changes to a running engine. Dropping every handle stops it.
#[derive(Clone)]
pub struct QueryHandle {
    tx: mpsc::UnboundedSender<Input>,
}

impl QueryHandle {
    pub fn set_search_text(&self, text: impl Into<String>) {
        self.send(Input::SearchText(text.into()));
    }

    pub fn set_only_favorite(&self, only: bool) {
        self.send(Input::OnlyFavorite(only));
    }

    pub fn set_only_memoed(&self, only: bool) {
        self.send(Input::OnlyMemoed(only));
    }

    pub fn set_max_items(&self, max_items: usize) {
        self.send(Input::MaxItems(max_items));
    }

    fn send(&self, input: Input) {
        if self.tx.send(input).is_err() {
            warn!("query engine is no longer running");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Filters {
    search_text: String,
    only_favorite: bool,
    only_memoed: bool,
    max_items: usize,
}

impl Filters {
    fn to_query(&self) -> HistoryQuery {
        let query = HistoryQuery::new(self.max_items)
            .only_favorite(self.only_favorite)
            .only_memoed(self.only_memoed);
        if self.search_text.is_empty() {
            query
        } else {
            query.text(self.search_text.clone())
        }
    }
}

pub struct QueryEngine {
    store: Arc<ContentStore>,
    settings: QuerySettings,
    // values the issued query is built from
    committed: Filters,
    pending_text: Option<(String, Instant)>,
    pending_max_items: Option<(usize, Instant)>,
    generation: u64,
}

impl QueryEngine {
    pub fn new(store: Arc<ContentStore>, settings: QuerySettings) -> Self {
        let committed = Filters {
            search_text: String::new(),
            only_favorite: false,
            only_memoed: false,
            max_items: effective_limit(settings.max_items),
        };
        Self {
            store,
            settings,
            committed,
            pending_text: None,
            pending_max_items: None,
            generation: 0,
        }
    }

    pub fn spawn(store: Arc<ContentStore>, settings: QuerySettings) -> (QueryHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Self::new(store, settings);
        let task = tokio::spawn(engine.run(rx));
        (QueryHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Input>) {
        self.issue();

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                input = rx.recv() => match input {
                    Some(input) => {
                        if self.accept(input, Instant::now()) {
                            self.issue();
                        }
                    }
                    None => break,
                },
                _ = wait_for(deadline) => {
                    if self.commit_due(Instant::now()) {
                        self.issue();
                    }
                }
            }
        }
    }

    /// Returns whether the committed filters changed right away.
    fn accept(&mut self, input: Input, now: Instant) -> bool {
        match input {
            Input::SearchText(text) => {
                self.pending_text = Some((text, now + self.settings.search_debounce));
                false
            }
            Input::MaxItems(max_items) => {
                self.pending_max_items = Some((
                    effective_limit(max_items),
                    now + self.settings.count_debounce,
                ));
                false
            }
            Input::OnlyFavorite(only) => {
                let changed = self.committed.only_favorite != only;
                self.committed.only_favorite = only;
                changed
            }
            Input::OnlyMemoed(only) => {
                let changed = self.committed.only_memoed != only;
                self.committed.only_memoed = only;
                changed
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        let text = self.pending_text.as_ref().map(|(_, at)| *at);
        let count = self.pending_max_items.as_ref().map(|(_, at)| *at);
        match (text, count) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Moves every pending value whose deadline passed into the committed set.
    fn commit_due(&mut self, now: Instant) -> bool {
        let before = self.committed.clone();
        if self.pending_text.as_ref().is_some_and(|(_, at)| *at <= now) {
            if let Some((text, _)) = self.pending_text.take() {
                self.committed.search_text = text;
            }
        }
        if self.pending_max_items.as_ref().is_some_and(|(_, at)| *at <= now) {
            if let Some((max_items, _)) = self.pending_max_items.take() {
                self.committed.max_items = max_items;
            }
        }
        self.committed != before
    }

    fn issue(&mut self) {
        self.generation += 1;
        if let Err(e) = self.store.request(self.generation, self.committed.to_query()) {
            warn!("History query failed: {}", e);
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;
    use crate::item::{NewItem, PLAIN_TEXT_TYPE};
    use crate::store::{HistorySnapshot, StoreOptions};
    use tokio::sync::watch;

    fn store_with(texts: &[&str]) -> Arc<ContentStore> {
        let store = ContentStore::open_in_memory(StoreOptions::default()).unwrap();
        for t in texts {
            store
                .insert(NewItem::capture(
                    PLAIN_TEXT_TYPE.to_string(),
                    t.as_bytes().to_vec(),
                    Some(t.to_string()),
                    fingerprint(t.as_bytes()),
                    100,
                ))
                .unwrap();
        }
        Arc::new(store)
    }

    fn names(snapshot: &HistorySnapshot) -> Vec<String> {
        snapshot.items.iter().map(|i| i.display_name.clone()).collect()
    }

    async fn settle(rx: &mut watch::Receiver<HistorySnapshot>, millis: u64) -> HistorySnapshot {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        rx.borrow_and_update().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_query_uses_defaults() {
        let store = store_with(&["a", "b"]);
        let mut rx = store.subscribe();
        let (_handle, _task) = QueryEngine::spawn(store.clone(), QuerySettings::default());

        let snapshot = settle(&mut rx, 1).await;
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.query, HistoryQuery::new(100));
        assert_eq!(names(&snapshot), vec!["b", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_text_is_debounced() {
        let store = store_with(&["hello", "world"]);
        let mut rx = store.subscribe();
        let (handle, _task) = QueryEngine::spawn(store.clone(), QuerySettings::default());
        settle(&mut rx, 1).await;

        handle.set_search_text("w");
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.set_search_text("wo");
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.set_search_text("wor");

        // 200ms after the last keystroke nothing was issued yet
        let snapshot = settle(&mut rx, 200).await;
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.query.text, None);

        let snapshot = settle(&mut rx, 150).await;
        assert_eq!(snapshot.generation, 2);
        assert_eq!(snapshot.query.text.as_deref(), Some("wor"));
        assert_eq!(names(&snapshot), vec!["world"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggles_apply_immediately_with_latest_values() {
        let store = store_with(&["foo", "bar"]);
        let mut fav = store.find_by_fingerprint(&fingerprint(b"foo")).unwrap().unwrap();
        fav.favorite = true;
        store.update(&fav).unwrap();

        let mut rx = store.subscribe();
        let (handle, _task) = QueryEngine::spawn(store.clone(), QuerySettings::default());
        settle(&mut rx, 1).await;

        handle.set_search_text("ba");
        handle.set_only_favorite(true);
        let snapshot = settle(&mut rx, 10).await;
        assert!(snapshot.query.only_favorite);
        assert_eq!(snapshot.query.text, None);
        assert_eq!(names(&snapshot), vec!["foo"]);

        // the debounced text joins the favorite filter once it fires
        let snapshot = settle(&mut rx, 400).await;
        assert_eq!(snapshot.query.text.as_deref(), Some("ba"));
        assert!(snapshot.items.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_items_uses_longer_debounce() {
        let store = store_with(&["a", "b", "c"]);
        let mut rx = store.subscribe();
        let (handle, _task) = QueryEngine::spawn(store.clone(), QuerySettings::default());
        settle(&mut rx, 1).await;

        handle.set_max_items(1);
        let snapshot = settle(&mut rx, 400).await;
        assert_eq!(snapshot.query.limit, 100);

        let snapshot = settle(&mut rx, 200).await;
        assert_eq!(snapshot.query.limit, 1);
        assert_eq!(names(&snapshot), vec!["c"]);

        handle.set_max_items(0);
        let snapshot = settle(&mut rx, 600).await;
        assert_eq!(snapshot.query.limit, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_changes_refresh_active_query() {
        let store = store_with(&["a"]);
        let mut rx = store.subscribe();
        let (handle, _task) = QueryEngine::spawn(store.clone(), QuerySettings::default());
        handle.set_max_items(1);
        settle(&mut rx, 600).await;

        store
            .insert(NewItem::capture(
                PLAIN_TEXT_TYPE.to_string(),
                b"b".to_vec(),
                Some("b".to_string()),
                fingerprint(b"b"),
                100,
            ))
            .unwrap();

        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(names(&snapshot), vec!["b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_stops_when_handles_drop() {
        let store = store_with(&[]);
        let (handle, task) = QueryEngine::spawn(store, QuerySettings::default());
        drop(handle);
        task.await.unwrap();
    }

    #[test]
    fn test_only_empty_search_disables_text_filter() {
        let mut filters = Filters {
            search_text: String::new(),
            only_favorite: true,
            only_memoed: false,
            max_items: 5,
        };
        assert_eq!(filters.to_query(), HistoryQuery::new(5).only_favorite(true));

        filters.search_text = " ".to_string();
        assert_eq!(
            filters.to_query(),
            HistoryQuery::new(5).only_favorite(true).text(" ")
        );
    }
}
