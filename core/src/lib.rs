//! Clipboard history: captures clipboard changes into a deduplicated,
//! searchable store and puts past items back on the clipboard.

pub mod browse;
pub mod config;
pub mod daemon;
pub mod error;
pub mod fingerprint;
pub mod history;
pub mod item;
pub mod pasteboard;
pub mod query;
pub mod store;
pub mod watcher;
pub mod writer;

pub use config::Config;
pub use error::{ClipboardError, StoreError};
pub use fingerprint::{Fingerprint, FingerprintIndex, fingerprint};
pub use history::CopyHistory;
pub use item::{CopiedItem, ContentKind, NewItem};
pub use pasteboard::{MemoryPasteboard, Pasteboard, PasteboardContents, SystemPasteboard};
pub use query::{QueryEngine, QueryHandle, QuerySettings};
pub use store::{ContentStore, HistoryQuery, HistorySnapshot, StoreOptions};
pub use watcher::{ClipboardWatcher, TickOutcome, WatcherSettings};
pub use writer::ClipboardWriter;
