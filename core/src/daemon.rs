use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::history::CopyHistory;

const MAX_IPC_MESSAGE_SIZE: usize = 4096;
const IPC_MAGIC: &[u8] = b"CPHS\x00\x01";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Re-apply the item whose fingerprint starts with the prefix.
    Apply(String),
    Delete(Vec<String>),
    Clear,
    Exit,
}

impl Command {
    pub fn parse(message: &str) -> Option<Self> {
        let message = message.trim();
        if let Some(prefix) = message.strip_prefix("APPLY:") {
            Some(Self::Apply(prefix.trim().to_string()))
        } else if let Some(list) = message.strip_prefix("DELETE:") {
            let prefixes = list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            Some(Self::Delete(prefixes))
        } else if message == "CLEAR" {
            Some(Self::Clear)
        } else if message == "EXIT" {
            Some(Self::Exit)
        } else {
            None
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let body = match self {
            Self::Apply(prefix) => format!("APPLY:{}", prefix),
            Self::Delete(prefixes) => format!("DELETE:{}", prefixes.join(",")),
            Self::Clear => "CLEAR".to_string(),
            Self::Exit => "EXIT".to_string(),
        };
        let mut msg = Vec::with_capacity(IPC_MAGIC.len() + body.len());
        msg.extend_from_slice(IPC_MAGIC);
        msg.extend_from_slice(body.as_bytes());
        msg
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        let body = buf.strip_prefix(IPC_MAGIC)?;
        Self::parse(std::str::from_utf8(body).ok()?)
    }
}

pub fn socket_path() -> PathBuf {
    std::env::temp_dir().join("copyhistory.sock")
}

pub struct Daemon {
    history: Arc<CopyHistory>,
    sock_path: PathBuf,
}

impl Daemon {
    pub fn new(history: Arc<CopyHistory>) -> Self {
        Self {
            history,
            sock_path: socket_path(),
        }
    }

    pub fn with_socket_path(mut self, sock_path: PathBuf) -> Self {
        self.sock_path = sock_path;
        self
    }

    /// Runs the watcher and serves commands until `Exit` arrives.
    pub async fn run(self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(10);

        let sock_path = self.sock_path.clone();
        let ipc_handle = tokio::spawn(async move {
            if let Err(e) = ipc_server(tx, sock_path).await {
                warn!("IPC server stopped: {:#}", e);
            }
        });
        let watcher_handle = self.history.spawn_watcher();
        info!(
            "Watching clipboard every {:?}",
            self.history.config().poll_interval()
        );

        while let Some(cmd) = rx.recv().await {
            debug!("received {:?}", cmd);
            if cmd == Command::Exit {
                break;
            }
            if let Err(e) = self.handle(cmd) {
                warn!("Command failed: {:#}", e);
            }
        }

        watcher_handle.abort();
        ipc_handle.abort();
        #[cfg(unix)]
        let _ = std::fs::remove_file(&self.sock_path);

        Ok(())
    }

    fn handle(&self, cmd: Command) -> Result<()> {
        match cmd {
            Command::Apply(prefix) => {
                let item = self.history.resolve(&prefix)?;
                self.history.select(item.id)?;
            }
            Command::Delete(prefixes) => {
                for prefix in prefixes {
                    let item = self.history.resolve(&prefix)?;
                    self.history.delete(item.id)?;
                }
            }
            Command::Clear => {
                let removed = self.history.clear_all()?;
                info!("Cleared {} items", removed);
            }
            Command::Exit => {}
        }
        Ok(())
    }
}

#[cfg(unix)]
async fn ipc_server(tx: mpsc::Sender<Command>, sock_path: PathBuf) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;

    let _ = std::fs::remove_file(&sock_path);
    let listener = UnixListener::bind(&sock_path)
        .with_context(|| format!("Failed to bind {}", sock_path.display()))?;
    std::fs::set_permissions(&sock_path, std::fs::Permissions::from_mode(0o700))?;

    loop {
        let (mut stream, _addr) = listener.accept().await?;

        // only the owning user may drive the daemon
        #[cfg(target_os = "linux")]
        {
            match stream.peer_cred() {
                Ok(cred) => {
                    let current_uid = unsafe { libc::getuid() };
                    if cred.uid() != current_uid {
                        continue;
                    }
                }
                Err(_) => continue,
            }
        }

        let tx = tx.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_IPC_MESSAGE_SIZE];
            match stream.read(&mut buf).await {
                Ok(n) => match Command::decode(&buf[..n]) {
                    Some(cmd) => {
                        let _ = tx.send(cmd).await;
                    }
                    None => debug!("ignoring malformed IPC message"),
                },
                Err(e) => debug!("IPC read failed: {}", e),
            }
        });
    }
}

#[cfg(not(unix))]
async fn ipc_server(_tx: mpsc::Sender<Command>, _sock_path: PathBuf) -> Result<()> {
    anyhow::bail!("IPC is only supported on unix")
}

pub async fn send_command(cmd: &Command) -> Result<()> {
    send_command_to(&socket_path(), cmd).await
}

#[cfg(unix)]
pub async fn send_command_to(sock_path: &std::path::Path, cmd: &Command) -> Result<()> {
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixStream;
    use tokio::time::timeout;

    let mut stream = timeout(Duration::from_secs(2), UnixStream::connect(sock_path))
        .await
        .context("Connection timeout")?
        .context("Failed to connect to daemon")?;

    stream.write_all(&cmd.encode()).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(not(unix))]
pub async fn send_command_to(_sock_path: &std::path::Path, _cmd: &Command) -> Result<()> {
    anyhow::bail!("IPC is only supported on unix")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pasteboard::{MemoryPasteboard, Pasteboard};
    use crate::store::{ContentStore, StoreOptions};
    use crate::watcher::TickOutcome;
    use std::time::Duration;

    #[test]
    fn test_command_wire_format() {
        let cmd = Command::Delete(vec!["abcd1234".to_string(), "ef01".to_string()]);
        let encoded = cmd.encode();
        assert!(encoded.starts_with(IPC_MAGIC));
        assert_eq!(Command::decode(&encoded), Some(cmd));

        assert_eq!(Command::parse(" CLEAR\n"), Some(Command::Clear));
        assert_eq!(Command::parse("APPLY: abcd "), Some(Command::Apply("abcd".to_string())));
        assert_eq!(Command::parse("DELETE:"), Some(Command::Delete(Vec::new())));
        assert_eq!(Command::parse("NOPE"), None);
        assert_eq!(Command::decode(b"CLEAR"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_daemon_applies_over_socket() {
        let temp = tempfile::TempDir::new().unwrap();
        let sock_path = temp.path().join("test.sock");
        let pasteboard = Arc::new(MemoryPasteboard::new());
        let store = Arc::new(ContentStore::open_in_memory(StoreOptions::default()).unwrap());
        let history = Arc::new(CopyHistory::new(
            Config::default(),
            store.clone(),
            pasteboard.clone(),
        ));

        pasteboard.copy_text("hello");
        let TickOutcome::Inserted(id) = history.watcher().tick().unwrap() else {
            panic!("expected insert");
        };
        pasteboard.copy_text("world");
        history.watcher().tick().unwrap();
        let hello = store.get(id).unwrap().unwrap();

        let daemon = Daemon::new(history.clone()).with_socket_path(sock_path.clone());
        let running = tokio::spawn(daemon.run());

        while !sock_path.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        send_command_to(&sock_path, &Command::Apply(hello.fingerprint.short().to_string()))
            .await
            .unwrap();
        while pasteboard.string().as_deref() != Some("hello") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        send_command_to(&sock_path, &Command::Exit).await.unwrap();
        running.await.unwrap().unwrap();
        assert!(!sock_path.exists());
    }
}
