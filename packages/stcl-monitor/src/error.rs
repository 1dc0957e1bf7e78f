//! Polls a node's error snapshot at a minimum cadence and keeps a running
//! history per laser; `save` dumps it to a JSON error-log file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::warn;

use crate::client::NodeClient;
use crate::commands::{spawn_stdin_reader, Command};

pub struct ErrorMonitor {
    client: NodeClient,
    t_min_ms: f64,
    history: HashMap<String, Vec<f64>>,
    times_ms: Vec<f64>,
    default_save_path: Option<PathBuf>,
}

impl ErrorMonitor {
    pub fn new(addr: String, t_min_ms: f64, default_save_path: Option<PathBuf>) -> Self {
        Self {
            client: NodeClient::new(addr),
            t_min_ms,
            history: HashMap::new(),
            times_ms: Vec::new(),
            default_save_path,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut commands = spawn_stdin_reader();
        let mut tick = tokio::time::interval(Duration::from_millis(self.t_min_ms.max(1.0) as u64));
        let started = tokio::time::Instant::now();

        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    match cmd {
                        Some(Command::Stop) | None => {
                            if let Some(path) = self.default_save_path.clone() {
                                if let Err(e) = self.save(&path) {
                                    warn!("final save failed: {e}");
                                }
                            }
                            println!("stopped");
                            return Ok(());
                        }
                        Some(Command::Settings { value }) => {
                            if let Err(e) = self.client.call("update_settings", value).await {
                                warn!("forwarding settings update failed: {e}");
                            }
                        }
                        Some(Command::Save { value }) => {
                            if let Err(e) = self.save(std::path::Path::new(&value)) {
                                warn!("save failed: {e}");
                            }
                        }
                        Some(Command::Filter { .. }) => {
                            warn!("error monitor does not support filter; ignoring");
                        }
                    }
                }
                _ = tick.tick() => {
                    self.times_ms.push(started.elapsed().as_secs_f64() * 1000.0);
                    self.poll_once().await;
                }
            }
        }
    }

    async fn poll_once(&mut self) {
        match self.client.call("acquire_errs", Value::Null).await {
            Ok(Value::String(s)) if s == "skipped" => self.push_all(f64::NAN),
            Ok(Value::Object(map)) => {
                for (laser, v) in &map {
                    let e = v.as_f64().unwrap_or(f64::NAN);
                    self.history.entry(laser.clone()).or_default().push(e);
                }
            }
            Ok(other) => warn!("unexpected acquire_errs reply: {other}"),
            Err(e) => warn!("acquire_errs failed: {e}"),
        }
    }

    fn push_all(&mut self, value: f64) {
        for series in self.history.values_mut() {
            series.push(value);
        }
    }

    fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let mut out = json!({ "times": self.times_ms });
        if let Value::Object(map) = &mut out {
            for (laser, series) in &self.history {
                map.insert(laser.clone(), json!(series));
            }
        }
        std::fs::write(path, serde_json::to_vec_pretty(&out)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_writes_times_and_per_laser_series() {
        let dir = std::env::temp_dir().join(format!("stcl-error-monitor-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("errs.json");

        let mut monitor = ErrorMonitor::new("127.0.0.1:5000".to_string(), 10.0, None);
        monitor.times_ms = vec![0.0, 10.0, 20.0];
        monitor.history.insert("Master".to_string(), vec![0.1, 0.2, f64::NAN]);

        monitor.save(&path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["times"].as_array().unwrap().len(), 3);
        assert!(parsed["Master"].is_array());

        std::fs::remove_dir_all(&dir).ok();
    }
}
