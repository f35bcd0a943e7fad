//! Line-oriented history browser on stdin/stdout.

use anyhow::{Context, Result};
use log::warn;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::history::CopyHistory;
use crate::item::{CopiedItem, format_time_ago, now_millis, truncate_to_fit};
use crate::query::QueryHandle;
use crate::store::HistorySnapshot;

const LINE_WIDTH: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowseCommand {
    Search(String),
    ToggleFavorites,
    ToggleMemoed,
    Limit(usize),
    /// Row numbers are 1-based, as printed.
    Pick(usize),
    Star(usize),
    Note(usize, String),
    Remove(usize),
    Clear,
    Help,
    Quit,
}

impl BrowseCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let Some(rest) = line.strip_prefix(':') else {
            return Ok(Self::Search(line.to_string()));
        };

        let (name, args) = rest.split_once(' ').unwrap_or((rest, ""));
        let args = args.trim();
        let row = || -> Result<usize> {
            let digits = args.split_whitespace().next().unwrap_or_default();
            let n: usize = digits
                .parse()
                .with_context(|| format!("Expected a row number, got {:?}", digits))?;
            anyhow::ensure!(n > 0, "Rows are numbered from 1");
            Ok(n)
        };

        Ok(match name {
            "fav" => Self::ToggleFavorites,
            "memo" => Self::ToggleMemoed,
            "limit" => Self::Limit(
                args.parse()
                    .with_context(|| format!("Expected a count, got {:?}", args))?,
            ),
            "pick" => Self::Pick(row()?),
            "star" => Self::Star(row()?),
            "note" => {
                let n = row()?;
                let text = args.split_once(' ').map(|(_, t)| t).unwrap_or_default();
                Self::Note(n, text.to_string())
            }
            "rm" => Self::Remove(row()?),
            "clear" => Self::Clear,
            "help" | "h" => Self::Help,
            "q" | "quit" => Self::Quit,
            other => anyhow::bail!("Unknown command :{}", other),
        })
    }
}

const HELP: &str = "\
type to search, empty line clears the search
:fav            toggle favorites only
:memo           toggle memoed only
:limit N        show at most N items (0 = default)
:pick N         copy row N back to the clipboard
:star N         toggle favorite on row N
:note N TEXT    set the memo of row N (empty clears)
:rm N           delete row N
:clear          delete everything except favorites
:q              quit";

pub struct Browser {
    history: Arc<CopyHistory>,
    handle: QueryHandle,
    only_favorite: bool,
    only_memoed: bool,
    rows: Arc<Vec<CopiedItem>>,
}

impl Browser {
    pub fn new(history: Arc<CopyHistory>, handle: QueryHandle) -> Self {
        Self {
            history,
            handle,
            only_favorite: false,
            only_memoed: false,
            rows: Arc::new(Vec::new()),
        }
    }

    /// Reads commands until `:q` or end of input, redrawing on every snapshot.
    pub async fn run(mut self) -> Result<()> {
        let mut snapshots = self.history.store().subscribe();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("{}", HELP);

        loop {
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    self.show(&snapshot);
                }
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };
                    match BrowseCommand::parse(&line) {
                        Ok(BrowseCommand::Quit) => break,
                        Ok(cmd) => {
                            if let Err(e) = self.execute(cmd) {
                                warn!("{:#}", e);
                            }
                        }
                        Err(e) => println!("{:#}", e),
                    }
                }
            }
        }
        Ok(())
    }

    pub fn execute(&mut self, cmd: BrowseCommand) -> Result<()> {
        match cmd {
            BrowseCommand::Search(text) => self.handle.set_search_text(text),
            BrowseCommand::ToggleFavorites => {
                self.only_favorite = !self.only_favorite;
                self.handle.set_only_favorite(self.only_favorite);
            }
            BrowseCommand::ToggleMemoed => {
                self.only_memoed = !self.only_memoed;
                self.handle.set_only_memoed(self.only_memoed);
            }
            BrowseCommand::Limit(n) => self.handle.set_max_items(n),
            BrowseCommand::Pick(n) => {
                let item = self.history.select(self.row(n)?)?;
                println!("Copied {}", item.display_name);
            }
            BrowseCommand::Star(n) => {
                self.history.toggle_favorite(self.row(n)?)?;
            }
            BrowseCommand::Note(n, text) => {
                self.history.save_memo(self.row(n)?, &text)?;
            }
            BrowseCommand::Remove(n) => self.history.delete(self.row(n)?)?,
            BrowseCommand::Clear => {
                let removed = self.history.clear_all()?;
                println!("Removed {} items", removed);
            }
            BrowseCommand::Help => println!("{}", HELP),
            BrowseCommand::Quit => {}
        }
        Ok(())
    }

    fn row(&self, n: usize) -> Result<i64> {
        self.rows
            .get(n.wrapping_sub(1))
            .map(|item| item.id)
            .with_context(|| format!("No row {}", n))
    }

    fn show(&mut self, snapshot: &HistorySnapshot) {
        self.rows = snapshot.items.clone();
        let now = now_millis();
        println!();
        if self.rows.is_empty() {
            println!("(no items)");
        }
        for (i, item) in self.rows.iter().enumerate() {
            println!("{}", render_row(i + 1, item, now));
        }
    }
}

pub fn render_row(n: usize, item: &CopiedItem, now_ms: i64) -> String {
    let star = if item.favorite { "*" } else { " " };
    let mut line = format!(
        "{:>3}{} {:>4} {} [{}] #{}",
        n,
        star,
        format_time_ago(now_ms, item.update_date),
        truncate_to_fit(&item.display_name, LINE_WIDTH),
        item.binary_size_string(),
        item.fingerprint.short()
    );
    if let Some(memo) = item.memo.as_deref().filter(|m| !m.is_empty()) {
        line.push_str(&format!(" ({})", truncate_to_fit(memo, 30)));
    }
    line
}
