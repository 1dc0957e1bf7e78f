//! The host's bounded command queue, carried as line-delimited JSON over the
//! monitor child's stdin instead of a Python `multiprocessing.Queue` — OS
//! processes don't share address space, so the three command tuples
//! (`stop`, `settings`, `filter`/`save`) travel over a pipe.

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Stop,
    Settings { value: Value },
    /// Cavity monitor only.
    Filter { value: bool },
    /// Error monitor only.
    Save { value: String },
}

pub fn spawn_stdin_reader() -> mpsc::Receiver<Command> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Command>(&line) {
                        Ok(cmd) => {
                            if tx.send(cmd).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("malformed stdin command: {e}"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("stdin read error: {e}");
                    break;
                }
            }
        }
    });
    rx
}
