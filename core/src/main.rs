use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use copyhistory::browse::{Browser, render_row};
use copyhistory::daemon::{self, Command, Daemon};
use copyhistory::item::now_millis;
use copyhistory::{Config, ContentStore, CopyHistory, HistoryQuery, StoreOptions, SystemPasteboard};
use log::{debug, info};
use std::sync::Arc;
use tokio::signal;

#[derive(Parser)]
#[command(name = "copyhistory")]
#[command(version)]
#[command(about = "clipboard history with search, favorites and memos")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the clipboard and serve commands
    Daemon {
        /// Also browse the history interactively on stdin
        #[arg(long)]
        browse: bool,
    },
    /// Print the history, newest first
    List {
        #[arg(long)]
        search: Option<String>,
        /// Only favorites
        #[arg(long)]
        favorites: bool,
        /// Only items with a memo
        #[arg(long)]
        memoed: bool,
        /// Maximum number of items (0 = configured default)
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Put an item back on the clipboard
    Apply {
        /// Fingerprint prefix as printed by `list`
        prefix: String,
    },
    /// Toggle the favorite flag of an item
    Favorite { prefix: String },
    /// Set or clear (no text) the memo of an item
    Memo {
        prefix: String,
        #[arg(trailing_var_arg = true)]
        text: Vec<String>,
    },
    /// Delete items by fingerprint prefix
    Delete {
        #[arg(required = true)]
        prefixes: Vec<String>,
    },
    /// Delete everything except favorites
    Clear,
    /// Stop the running daemon
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = Config::load().context("Failed to load configuration")?;

    match cli.command {
        Commands::Daemon { browse } => {
            let pasteboard = Arc::new(SystemPasteboard::new()?);
            let history = Arc::new(CopyHistory::open(config, pasteboard)?);

            let browser = browse.then(|| {
                let (handle, _engine) = history.spawn_query_engine();
                Browser::new(history.clone(), handle)
            });
            let daemon = Daemon::new(history);

            tokio::select! {
                result = daemon.run() => {
                    if let Err(e) = result {
                        eprintln!("Daemon error: {:#}", e);
                        std::process::exit(1);
                    }
                }
                result = run_browser(browser) => result?,
                _ = signal::ctrl_c() => {
                    println!("\nShutting down...");
                }
            }
            // the socket outlives an interrupted daemon
            #[cfg(unix)]
            let _ = std::fs::remove_file(daemon::socket_path());
        }
        Commands::List {
            search,
            favorites,
            memoed,
            limit,
            json,
        } => {
            let store = open_store(&config)?;
            let mut query = HistoryQuery::new(limit.unwrap_or(config.max_displayed_items))
                .only_favorite(favorites)
                .only_memoed(memoed);
            if let Some(text) = search {
                query = query.text(text);
            }

            let items = store.query(&query)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                let now = now_millis();
                for (i, item) in items.iter().enumerate() {
                    println!("{}", render_row(i + 1, item, now));
                }
            }
        }
        Commands::Apply { prefix } => match daemon::send_command(&Command::Apply(prefix.clone())).await {
            Ok(()) => {}
            Err(e) => {
                debug!("daemon unavailable ({:#}), applying in-process", e);
                let pasteboard = Arc::new(SystemPasteboard::new()?);
                let history = CopyHistory::open(config, pasteboard)?;
                let item = history.resolve(&prefix)?;
                let item = history.select(item.id)?;
                println!("Copied {}", item.display_name);
            }
        },
        Commands::Favorite { prefix } => {
            let history = offline_history(config)?;
            let item = history.resolve(&prefix)?;
            let item = history.toggle_favorite(item.id)?;
            println!(
                "#{} {}",
                item.fingerprint.short(),
                if item.favorite { "is a favorite" } else { "is no longer a favorite" }
            );
        }
        Commands::Memo { prefix, text } => {
            let history = offline_history(config)?;
            let item = history.resolve(&prefix)?;
            let item = history.save_memo(item.id, &text.join(" "))?;
            match item.memo {
                Some(memo) => println!("#{} memo: {}", item.fingerprint.short(), memo),
                None => println!("#{} memo cleared", item.fingerprint.short()),
            }
        }
        Commands::Delete { prefixes } => {
            let history = offline_history(config)?;
            for prefix in &prefixes {
                let item = history.resolve(prefix)?;
                history.delete(item.id)?;
            }
            println!("Deleted {} items", prefixes.len());
        }
        Commands::Clear => {
            let history = offline_history(config)?;
            let removed = history.clear_all()?;
            println!("Clipboard history cleared ({} items removed)", removed);
        }
        Commands::Stop => {
            daemon::send_command(&Command::Exit).await?;
            info!("Stop requested");
        }
    }

    Ok(())
}

async fn run_browser(browser: Option<Browser>) -> Result<()> {
    match browser {
        Some(browser) => browser.run().await,
        None => std::future::pending().await,
    }
}

fn open_store(config: &Config) -> Result<Arc<ContentStore>> {
    let store = ContentStore::open(&config.db_path(), StoreOptions::from(config))
        .context("Failed to open clipboard history")?;
    Ok(Arc::new(store))
}

/// History actions that never touch the system clipboard.
fn offline_history(config: Config) -> Result<CopyHistory> {
    let store = open_store(&config)?;
    let pasteboard = Arc::new(copyhistory::MemoryPasteboard::new());
    Ok(CopyHistory::new(config, store, pasteboard))
}
