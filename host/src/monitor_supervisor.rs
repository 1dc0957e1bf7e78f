//! Spawns `stcl-monitor` as an independent OS process and supervises it:
//! commands go in over stdin as line-delimited JSON, liveness is read back
//! from `Child::try_wait` plus the `"stopped"` sentinel line the monitor
//! prints to stdout right before it exits. This carries the reference
//! implementation's bounded-queue/shared-flag contract over a pipe, since a
//! spawned OS process doesn't share an address space with the host.

use std::process::Stdio;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

pub struct MonitorHandle {
    child: Child,
    stdin_tx: mpsc::Sender<String>,
    stopped_rx: mpsc::Receiver<()>,
}

impl MonitorHandle {
    pub async fn spawn_cavity(binary: &str, node_addr: &str, filter: bool) -> anyhow::Result<Self> {
        let mut args = vec!["cavity".to_string(), "--node".to_string(), node_addr.to_string()];
        if filter {
            args.push("--filter".to_string());
        }
        Self::spawn(binary, args).await
    }

    pub async fn spawn_error(binary: &str, node_addr: &str, t_min_ms: f64) -> anyhow::Result<Self> {
        let args = vec![
            "error".to_string(),
            "--node".to_string(),
            node_addr.to_string(),
            "--t-min".to_string(),
            t_min_ms.to_string(),
        ];
        Self::spawn(binary, args).await
    }

    async fn spawn(binary: &str, args: Vec<String>) -> anyhow::Result<Self> {
        let mut child = Command::new(binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let mut stdin = child.stdin.take().expect("piped");
        let stdout = child.stdout.take().expect("piped");

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(16);
        tokio::spawn(async move {
            while let Some(line) = stdin_rx.recv().await {
                if stdin.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let (stopped_tx, stopped_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim() == "stopped" {
                    let _ = stopped_tx.send(()).await;
                    break;
                }
            }
        });

        Ok(Self { child, stdin_tx, stopped_rx })
    }

    pub async fn send_settings(&self, value: Value) -> anyhow::Result<()> {
        let line = serde_json::to_string(&serde_json::json!({ "cmd": "settings", "value": value }))?;
        self.stdin_tx.send(line).await.map_err(|_| anyhow::anyhow!("monitor stdin closed"))
    }

    pub async fn send_filter(&self, value: bool) -> anyhow::Result<()> {
        let line = serde_json::to_string(&serde_json::json!({ "cmd": "filter", "value": value }))?;
        self.stdin_tx.send(line).await.map_err(|_| anyhow::anyhow!("monitor stdin closed"))
    }

    pub async fn send_save(&self, path: &str) -> anyhow::Result<()> {
        let line = serde_json::to_string(&serde_json::json!({ "cmd": "save", "value": path }))?;
        self.stdin_tx.send(line).await.map_err(|_| anyhow::anyhow!("monitor stdin closed"))
    }

    /// Ask the monitor to stop and wait (bounded) for its sentinel line or
    /// process exit, whichever comes first.
    pub async fn stop(&mut self) -> anyhow::Result<()> {
        let line = serde_json::to_string(&serde_json::json!({ "cmd": "stop" }))?;
        let _ = self.stdin_tx.send(line).await;

        tokio::select! {
            _ = self.stopped_rx.recv() => {}
            _ = self.child.wait() => {}
            _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => {
                let _ = self.child.start_kill();
            }
        }
        Ok(())
    }

    /// `true` if the child has already exited.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}
