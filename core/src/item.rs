use serde::Serialize;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

use crate::fingerprint::Fingerprint;

pub const PLAIN_TEXT_TYPE: &str = "public.utf8-plain-text";
pub const PNG_TYPE: &str = "public.png";
pub const NO_NAME: &str = "No Name";

/// One captured clipboard payload as persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopiedItem {
    pub id: i64,
    pub content_type: String,
    #[serde(skip)]
    pub raw_bytes: Vec<u8>,
    pub raw_string: Option<String>,
    pub display_name: String,
    pub binary_size: u64,
    pub fingerprint: Fingerprint,
    /// Unix milliseconds of the creation or latest touch.
    pub update_date: i64,
    pub favorite: bool,
    pub memo: Option<String>,
}

impl CopiedItem {
    pub fn has_memo(&self) -> bool {
        self.memo.as_deref().is_some_and(|m| !m.is_empty())
    }

    pub fn kind(&self) -> ContentKind {
        ContentKind::of(&self.content_type)
    }

    pub fn binary_size_string(&self) -> String {
        format_binary_size(self.binary_size)
    }

    /// Local path when the item is a `file://` URL.
    pub fn file_path(&self) -> Option<PathBuf> {
        if self.kind() != ContentKind::FileUrl {
            return None;
        }
        let text = std::str::from_utf8(&self.raw_bytes).ok()?;
        let first = text.lines().map(str::trim).find(|l| !l.is_empty())?;
        Url::parse(first).ok()?.to_file_path().ok()
    }
}

/// A capture that has not been stored yet.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub content_type: String,
    pub raw_bytes: Vec<u8>,
    pub raw_string: Option<String>,
    pub display_name: String,
    pub fingerprint: Fingerprint,
}

impl NewItem {
    pub fn capture(
        content_type: String,
        raw_bytes: Vec<u8>,
        raw_string: Option<String>,
        fingerprint: Fingerprint,
        display_name_length: usize,
    ) -> Self {
        let raw_string = raw_string.map(|s| s.trim().to_string());
        let display_name = match &raw_string {
            Some(s) => s.chars().take(display_name_length).collect(),
            None => NO_NAME.to_string(),
        };

        Self {
            content_type,
            raw_bytes,
            raw_string,
            display_name,
            fingerprint,
        }
    }

    pub fn binary_size(&self) -> u64 {
        self.raw_bytes.len() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    PlainText,
    RichText,
    Html,
    FileUrl,
    Image,
    Other,
}

impl ContentKind {
    pub fn of(content_type: &str) -> Self {
        let ty = content_type.to_ascii_lowercase();
        if ty.contains("rtf") {
            Self::RichText
        } else if ty.contains("html") {
            Self::Html
        } else if ty.contains("file-url") || ty == "text/uri-list" {
            Self::FileUrl
        } else if ty.contains("png")
            || ty.contains("tiff")
            || ty.contains("jpeg")
            || ty.starts_with("image/")
        {
            Self::Image
        } else if ty.contains("plain-text")
            || ty.starts_with("text/plain")
            || matches!(ty.as_str(), "public.text" | "utf8_string" | "string" | "text")
        {
            Self::PlainText
        } else {
            Self::Other
        }
    }
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

pub fn format_binary_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "-".to_string();
    }
    if bytes < 1024 {
        return format!("{} bytes", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

pub fn format_time_ago(now_ms: i64, timestamp_ms: i64) -> String {
    let ago_secs = (now_ms.saturating_sub(timestamp_ms) / 1000).max(0);

    if ago_secs < 60 {
        format!("{}s", ago_secs)
    } else if ago_secs < 3600 {
        format!("{}m", ago_secs / 60)
    } else if ago_secs < 86400 {
        format!("{}h", ago_secs / 3600)
    } else {
        format!("{}d", ago_secs / 86400)
    }
}

pub fn truncate_to_fit(text: &str, max_chars: usize) -> String {
    let text = text.replace(['\n', '\t'], " ");

    if text.chars().count() <= max_chars {
        text
    } else {
        let kept: String = text.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}
