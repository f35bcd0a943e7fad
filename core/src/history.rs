use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::StoreError;
use crate::item::CopiedItem;
use crate::pasteboard::Pasteboard;
use crate::query::{QueryEngine, QueryHandle, QuerySettings};
use crate::store::{ContentStore, StoreOptions};
use crate::watcher::{ClipboardWatcher, WatcherSettings};
use crate::writer::ClipboardWriter;

/// The capture engine wired together, plus the actions a user can take on
/// stored items.
pub struct CopyHistory {
    config: Config,
    store: Arc<ContentStore>,
    watcher: Arc<ClipboardWatcher>,
    writer: ClipboardWriter,
}

impl CopyHistory {
    /// Opens the store under `config.data_dir`. Failing here is fatal for
    /// the application.
    pub fn open(config: Config, pasteboard: Arc<dyn Pasteboard>) -> Result<Self> {
        let store = ContentStore::open(&config.db_path(), StoreOptions::from(&config))
            .context("Failed to open clipboard history")?;
        Ok(Self::new(config, Arc::new(store), pasteboard))
    }

    pub fn new(config: Config, store: Arc<ContentStore>, pasteboard: Arc<dyn Pasteboard>) -> Self {
        let watcher = Arc::new(ClipboardWatcher::new(
            pasteboard.clone(),
            store.clone(),
            WatcherSettings::from(&config),
        ));
        let writer = ClipboardWriter::new(pasteboard);

        Self {
            config,
            store,
            watcher,
            writer,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    pub fn watcher(&self) -> &Arc<ClipboardWatcher> {
        &self.watcher
    }

    pub fn spawn_watcher(&self) -> JoinHandle<()> {
        tokio::spawn(self.watcher.clone().run())
    }

    pub fn spawn_query_engine(&self) -> (QueryHandle, JoinHandle<()>) {
        QueryEngine::spawn(self.store.clone(), QuerySettings::from(&self.config))
    }

    fn item(&self, id: i64) -> Result<CopiedItem, StoreError> {
        self.store.get(id)?.ok_or(StoreError::NotFound(id))
    }

    pub fn resolve(&self, prefix: &str) -> Result<CopiedItem> {
        self.store
            .find_by_fingerprint_prefix(prefix)?
            .with_context(|| format!("No item matches #{}", prefix))
    }

    /// Puts the item back on the clipboard and moves it to the top.
    pub fn select(&self, id: i64) -> Result<CopiedItem> {
        let item = self.item(id)?;
        self.writer.apply(&item)?;
        Ok(self.store.touch(item.id)?)
    }

    pub fn toggle_favorite(&self, id: i64) -> Result<CopiedItem> {
        Ok(self.store.toggle_favorite(id)?)
    }

    /// An empty memo removes the annotation.
    pub fn save_memo(&self, id: i64, memo: &str) -> Result<CopiedItem> {
        let memo = memo.trim();
        Ok(self.store.set_memo(id, (!memo.is_empty()).then_some(memo))?)
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        Ok(self.store.delete(id)?)
    }

    /// Deletes everything except favorites; returns how many items went.
    pub fn clear_all(&self) -> Result<usize> {
        Ok(self.store.delete_all_except_favorites()?)
    }
}
