//! Polls a node's channel-0 trace and emits the same trace-plus-annotation
//! data a plotting front end would consume, as structured `tracing` events
//! and an optional JSON-lines sink. Rendering itself is out of scope.

use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::client::NodeClient;
use crate::commands::{spawn_stdin_reader, Command};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct CavityMonitor {
    client: NodeClient,
    filter: bool,
    sink: Option<std::fs::File>,
}

impl CavityMonitor {
    pub fn new(addr: String, filter: bool, json_out: Option<PathBuf>) -> anyhow::Result<Self> {
        let sink = json_out.map(std::fs::File::create).transpose()?;
        Ok(Self { client: NodeClient::new(addr), filter, sink })
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut commands = spawn_stdin_reader();
        let mut tick = tokio::time::interval(POLL_INTERVAL);

        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    match cmd {
                        Some(Command::Stop) | None => {
                            println!("stopped");
                            return Ok(());
                        }
                        Some(Command::Filter { value }) => self.filter = value,
                        Some(Command::Settings { value }) => {
                            if let Err(e) = self.client.call("update_settings", value).await {
                                warn!("forwarding settings update failed: {e}");
                            }
                        }
                        Some(Command::Save { .. }) => {
                            warn!("cavity monitor does not support save; ignoring");
                        }
                    }
                }
                _ = tick.tick() => self.poll_once().await,
            }
        }
    }

    async fn poll_once(&mut self) {
        match self.client.call("acquire_ch", json!("0")).await {
            Ok(value) => self.emit(&value),
            Err(e) => warn!("acquire_ch failed: {e}"),
        }
    }

    fn emit(&mut self, value: &Value) {
        let Some(arr) = value.as_array().filter(|a| a.len() == 2) else {
            warn!("unexpected acquire_ch reply shape");
            return;
        };
        let duration = arr[0].as_f64().unwrap_or(0.0);
        let mut samples: Vec<f64> = arr[1]
            .as_array()
            .map(|a| a.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();
        if self.filter {
            samples = sg_smooth_quadratic(&samples);
        }
        let peak = samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        info!(duration_ms = duration, samples = samples.len(), peak, "cavity trace");
        if let Some(f) = &mut self.sink {
            let line = json!({ "duration_ms": duration, "samples": samples, "filtered": self.filter });
            if let Err(e) = writeln!(f, "{line}") {
                warn!("json sink write failed: {e}");
            }
        }
    }
}

/// Fixed quadratic Savitzky-Golay smoothing, window 5, order 2. Samples
/// within two points of either edge are passed through unsmoothed.
fn sg_smooth_quadratic(y: &[f64]) -> Vec<f64> {
    const KERNEL: [f64; 5] = [-3.0 / 35.0, 12.0 / 35.0, 17.0 / 35.0, 12.0 / 35.0, -3.0 / 35.0];
    if y.len() < 5 {
        return y.to_vec();
    }
    let mut out = y.to_vec();
    for i in 2..y.len() - 2 {
        out[i] = (0..5).map(|k| KERNEL[k] * y[i + k - 2]).sum();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoothing_preserves_a_constant_signal() {
        let y = vec![2.0; 20];
        let smoothed = sg_smooth_quadratic(&y);
        assert!(smoothed.iter().all(|&v| (v - 2.0).abs() < 1e-12));
    }

    #[test]
    fn short_traces_pass_through_unchanged() {
        let y = vec![1.0, 2.0, 3.0];
        assert_eq!(sg_smooth_quadratic(&y), y);
    }
}
