use clipboard_rs::{Clipboard, ClipboardContent, ClipboardContext, ContentFormat};
use log::debug;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use zeroize::Zeroize;

use crate::error::ClipboardError;
use crate::item::{ContentKind, PLAIN_TEXT_TYPE};

/// Access to the system clipboard ("pasteboard").
pub trait Pasteboard: Send + Sync {
    /// Increases every time the clipboard contents change, whoever changed them.
    fn change_count(&self) -> u64;

    /// Type identifiers of the current item, most preferred first.
    fn types(&self) -> Vec<String>;

    fn data(&self, content_type: &str) -> Option<Vec<u8>>;

    /// Plain-text rendering of the current item, if any.
    fn string(&self) -> Option<String>;

    /// Replaces the clipboard contents in one step.
    fn write(&self, contents: PasteboardContents) -> Result<(), ClipboardError>;
}

/// Representations written together as one clipboard item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasteboardContents {
    pub representations: Vec<(String, Vec<u8>)>,
    pub string: Option<String>,
}

impl PasteboardContents {
    pub fn with_data(mut self, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        self.representations.push((content_type.into(), data));
        self
    }

    pub fn with_string(mut self, string: impl Into<String>) -> Self {
        self.string = Some(string.into());
        self
    }

    pub fn text(text: &str) -> Self {
        Self::default()
            .with_data(PLAIN_TEXT_TYPE, text.as_bytes().to_vec())
            .with_string(text)
    }

    /// Type tags declared for these contents; plain text is appended when a
    /// string is present and no representation already claims it.
    pub fn declared_types(&self) -> Vec<String> {
        let mut types: Vec<String> = Vec::with_capacity(self.representations.len() + 1);
        for (ty, _) in &self.representations {
            if !types.contains(ty) {
                types.push(ty.clone());
            }
        }
        if self.string.is_some() && !types.iter().any(|t| t == PLAIN_TEXT_TYPE) {
            types.push(PLAIN_TEXT_TYPE.to_string());
        }
        types
    }
}

#[derive(Default)]
struct MemoryState {
    change_count: u64,
    types: Vec<String>,
    data: BTreeMap<String, Vec<u8>>,
    string: Option<String>,
}

/// In-process clipboard with a real change counter.
#[derive(Default)]
pub struct MemoryPasteboard {
    state: Mutex<MemoryState>,
}

impl MemoryPasteboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a copy made by another application.
    pub fn copy_text(&self, text: &str) {
        self.replace(PasteboardContents::text(text));
    }

    /// Like `write`, but for callers that cannot fail.
    pub fn replace(&self, contents: PasteboardContents) {
        let mut state = self.state.lock();
        state.types = contents.declared_types();
        state.data = contents.representations.into_iter().collect();
        state.string = contents.string;
        state.change_count += 1;
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.types.clear();
        state.data.clear();
        state.string = None;
        state.change_count += 1;
    }
}

impl Pasteboard for MemoryPasteboard {
    fn change_count(&self) -> u64 {
        self.state.lock().change_count
    }

    fn types(&self) -> Vec<String> {
        self.state.lock().types.clone()
    }

    fn data(&self, content_type: &str) -> Option<Vec<u8>> {
        let state = self.state.lock();
        if let Some(data) = state.data.get(content_type) {
            return Some(data.clone());
        }
        if content_type == PLAIN_TEXT_TYPE {
            return state.string.as_ref().map(|s| s.as_bytes().to_vec());
        }
        None
    }

    fn string(&self) -> Option<String> {
        let state = self.state.lock();
        state.string.clone().or_else(|| {
            state
                .data
                .get(PLAIN_TEXT_TYPE)
                .and_then(|d| String::from_utf8(d.clone()).ok())
        })
    }

    fn write(&self, contents: PasteboardContents) -> Result<(), ClipboardError> {
        self.replace(contents);
        Ok(())
    }
}

// X11 selection bookkeeping targets; they never carry clipboard content.
const META_TARGETS: &[&str] = &[
    "TARGETS",
    "TIMESTAMP",
    "MULTIPLE",
    "SAVE_TARGETS",
    "DELETE",
    "INSERT_PROPERTY",
    "INSERT_SELECTION",
];

/// What the last sample of the system clipboard held.
#[derive(Default)]
struct Observed {
    types: Vec<String>,
    first: Option<(String, Vec<u8>)>,
    string: Option<String>,
}

impl Observed {
    fn digest(&self) -> Option<blake3::Hash> {
        if self.types.is_empty() && self.string.is_none() {
            return None;
        }
        let mut hasher = blake3::Hasher::new();
        for ty in &self.types {
            hasher.update(ty.as_bytes());
            hasher.update(&[0]);
        }
        if let Some((ty, data)) = &self.first {
            hasher.update(ty.as_bytes());
            hasher.update(data);
        }
        if let Some(string) = &self.string {
            hasher.update(string.as_bytes());
        }
        Some(hasher.finalize())
    }

    fn wipe(&mut self) {
        if let Some((_, data)) = &mut self.first {
            data.zeroize();
        }
        if let Some(string) = &mut self.string {
            string.zeroize();
        }
    }
}

fn content_types(formats: Vec<String>) -> Vec<String> {
    let mut types: Vec<String> = Vec::with_capacity(formats.len());
    for format in formats {
        if !META_TARGETS.contains(&format.as_str()) && !types.contains(&format) {
            types.push(format);
        }
    }
    types
}

struct SystemState {
    ctx: ClipboardContext,
    observed: Observed,
    digest: Option<blake3::Hash>,
    change_count: u64,
}

/// System clipboard through `clipboard-rs`.
///
/// Types are the platform's own format names (UTIs on macOS, MIME types and
/// atoms on X11), so markers such as a password manager's private type are
/// visible to the watcher. There is no portable change counter, so one is
/// derived: every call to `change_count` samples the clipboard and advances
/// the counter when the content digest differs from the previous sample.
pub struct SystemPasteboard {
    state: Mutex<SystemState>,
}

impl SystemPasteboard {
    pub fn new() -> Result<Self, ClipboardError> {
        let ctx = ClipboardContext::new().map_err(|e| ClipboardError::Access(e.to_string()))?;
        Ok(Self {
            state: Mutex::new(SystemState {
                ctx,
                observed: Observed::default(),
                digest: None,
                change_count: 0,
            }),
        })
    }

    // an unlistable clipboard samples as empty, so nothing gets captured
    fn sample(ctx: &ClipboardContext) -> Observed {
        let types = match ctx.available_formats() {
            Ok(formats) => content_types(formats),
            Err(e) => {
                debug!("cannot list clipboard formats: {}", e);
                return Observed::default();
            }
        };
        let first = types.iter().find_map(|ty| {
            ctx.get_buffer(ty)
                .ok()
                .filter(|data| !data.is_empty())
                .map(|data| (ty.clone(), data))
        });
        let string = if ctx.has(ContentFormat::Text) {
            ctx.get_text().ok()
        } else {
            None
        };

        Observed {
            types,
            first,
            string,
        }
    }
}

impl Pasteboard for SystemPasteboard {
    fn change_count(&self) -> u64 {
        let mut state = self.state.lock();
        let observed = Self::sample(&state.ctx);
        let digest = observed.digest();
        if digest != state.digest {
            state.observed.wipe();
            state.observed = observed;
            state.digest = digest;
            state.change_count += 1;
        }
        state.change_count
    }

    fn types(&self) -> Vec<String> {
        self.state.lock().observed.types.clone()
    }

    fn data(&self, content_type: &str) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let observed = &state.observed;
        if let Some((ty, data)) = &observed.first {
            if ty == content_type {
                return Some(data.clone());
            }
        }
        if !observed.types.iter().any(|ty| ty == content_type) {
            return None;
        }
        match state.ctx.get_buffer(content_type) {
            Ok(data) if !data.is_empty() => Some(data),
            _ if ContentKind::of(content_type) == ContentKind::PlainText => {
                observed.string.as_ref().map(|s| s.as_bytes().to_vec())
            }
            _ => None,
        }
    }

    fn string(&self) -> Option<String> {
        self.state.lock().observed.string.clone()
    }

    fn write(&self, contents: PasteboardContents) -> Result<(), ClipboardError> {
        let clipboard_contents = write_plan(&contents)?
            .into_iter()
            .map(|op| match op {
                WriteOp::Text(text) => ClipboardContent::Text(text),
                WriteOp::Raw(ty, data) => ClipboardContent::Other(ty, data),
            })
            .collect();

        self.state
            .lock()
            .ctx
            .set(clipboard_contents)
            .map_err(|e| ClipboardError::Write(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WriteOp {
    Text(String),
    Raw(String, Vec<u8>),
}

/// Orders the writes for one clipboard item. A plain-text representation
/// is written from its own bytes; the string only fills in when there is
/// no plain-text representation at all.
fn write_plan(contents: &PasteboardContents) -> Result<Vec<WriteOp>, ClipboardError> {
    let mut plan = Vec::with_capacity(contents.representations.len() + 1);
    let mut has_text = false;

    for (ty, data) in &contents.representations {
        if ContentKind::of(ty) == ContentKind::PlainText {
            if has_text {
                continue;
            }
            has_text = true;
            if let Ok(text) = std::str::from_utf8(data) {
                plan.push(WriteOp::Text(text.to_string()));
                continue;
            }
        }
        plan.push(WriteOp::Raw(ty.clone(), data.clone()));
    }

    if !has_text {
        if let Some(string) = &contents.string {
            plan.push(WriteOp::Text(string.clone()));
        }
    }

    if plan.is_empty() {
        return Err(ClipboardError::Unsupported("empty clipboard item".to_string()));
    }
    Ok(plan)
}
