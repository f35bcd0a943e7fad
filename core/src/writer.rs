use log::debug;
use std::sync::Arc;

use crate::error::ClipboardError;
use crate::item::CopiedItem;
use crate::pasteboard::{Pasteboard, PasteboardContents};

/// Puts stored items back on the clipboard.
#[derive(Clone)]
pub struct ClipboardWriter {
    pasteboard: Arc<dyn Pasteboard>,
}

impl ClipboardWriter {
    pub fn new(pasteboard: Arc<dyn Pasteboard>) -> Self {
        Self { pasteboard }
    }

    /// Writes the raw payload under its original type, plus the plain-text
    /// rendering when the item has one. Touching recency is up to the caller.
    pub fn apply(&self, item: &CopiedItem) -> Result<(), ClipboardError> {
        let mut contents =
            PasteboardContents::default().with_data(item.content_type.clone(), item.raw_bytes.clone());
        if let Some(raw_string) = &item.raw_string {
            contents = contents.with_string(raw_string.clone());
        }

        self.pasteboard.write(contents)?;
        debug!("applied item {} ({})", item.id, item.fingerprint.short());
        Ok(())
    }
}
