use log::{debug, error, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use zeroize::Zeroize;

use crate::config::Config;
use crate::error::StoreError;
use crate::fingerprint::fingerprint;
use crate::item::NewItem;
use crate::pasteboard::Pasteboard;
use crate::store::ContentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick is still running.
    Busy,
    Unchanged,
    /// The clipboard changed but offered nothing readable.
    Empty,
    /// Password-manager content; deliberately not captured.
    Excluded,
    TooLarge,
    Touched(i64),
    Inserted(i64),
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub poll_interval: Duration,
    pub tick_timeout: Duration,
    pub display_name_length: usize,
    pub excluded_type_markers: Vec<String>,
    pub max_item_bytes: usize,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for WatcherSettings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            tick_timeout: config.store_timeout(),
            display_name_length: config.display_name_length,
            excluded_type_markers: config.excluded_type_markers.clone(),
            max_item_bytes: config.max_item_bytes,
        }
    }
}

/// Polls the clipboard change counter and records new captures.
pub struct ClipboardWatcher {
    pasteboard: Arc<dyn Pasteboard>,
    store: Arc<ContentStore>,
    settings: WatcherSettings,
    last_change_count: Mutex<Option<u64>>,
    in_flight: AtomicBool,
}

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ClipboardWatcher {
    pub fn new(
        pasteboard: Arc<dyn Pasteboard>,
        store: Arc<ContentStore>,
        settings: WatcherSettings,
    ) -> Self {
        Self {
            pasteboard,
            store,
            settings,
            last_change_count: Mutex::new(None),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn last_change_count(&self) -> Option<u64> {
        *self.last_change_count.lock()
    }

    pub fn tick(&self) -> Result<TickOutcome, StoreError> {
        let Some(_guard) = InFlight::enter(&self.in_flight) else {
            return Ok(TickOutcome::Busy);
        };

        let change_count = self.pasteboard.change_count();
        {
            let mut last = self.last_change_count.lock();
            if *last == Some(change_count) {
                return Ok(TickOutcome::Unchanged);
            }
            // recorded before capturing so a failed capture is not retried
            *last = Some(change_count);
        }

        let types = self.pasteboard.types();
        let Some((content_type, mut data)) = types
            .iter()
            .find_map(|ty| self.pasteboard.data(ty).map(|data| (ty.clone(), data)))
        else {
            return Ok(TickOutcome::Empty);
        };

        if self.is_excluded(&types) {
            data.zeroize();
            return Ok(TickOutcome::Excluded);
        }

        if data.len() > self.settings.max_item_bytes {
            debug!("skipping {} byte clipboard payload", data.len());
            return Ok(TickOutcome::TooLarge);
        }

        let fp = fingerprint(&data);
        let new_item = NewItem::capture(
            content_type,
            data,
            self.pasteboard.string(),
            fp,
            self.settings.display_name_length,
        );
        let (item, inserted) = self.store.record(new_item)?;
        Ok(if inserted {
            TickOutcome::Inserted(item.id)
        } else {
            TickOutcome::Touched(item.id)
        })
    }

    fn is_excluded(&self, types: &[String]) -> bool {
        types.iter().any(|ty| {
            self.settings
                .excluded_type_markers
                .iter()
                .any(|marker| ty.contains(marker.as_str()))
        })
    }

    /// Ticks forever. A failing or slow tick is logged and never stops the loop.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let watcher = Arc::clone(&self);
            let task = tokio::task::spawn_blocking(move || watcher.tick());
            match tokio::time::timeout(self.settings.tick_timeout, task).await {
                Ok(Ok(Ok(outcome))) => {
                    if outcome != TickOutcome::Unchanged {
                        debug!("clipboard tick: {:?}", outcome);
                    }
                }
                Ok(Ok(Err(e))) => warn!("Capture failed: {}", e),
                Ok(Err(e)) => error!("Capture task panicked: {}", e),
                Err(_) => warn!(
                    "Capture still running after {:?}; later ticks skip until it finishes",
                    self.settings.tick_timeout
                ),
            }
        }
    }
}
