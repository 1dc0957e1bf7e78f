//! Host-level commands: thin orchestration over a node's connection, the
//! topology registry, and persisted settings. Each function is what a
//! `stcl-host` subcommand calls after argument parsing.

use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::{info, warn};

use stcl_types::constants::MAX_ACQUIRE_BATCH;
use stcl_types::model::NodeSettings;

use crate::connection::NodeConnection;
use crate::monitor_supervisor::MonitorHandle;
use crate::settings::{self, SettingsStore};
use crate::topology::Topology;

pub struct Host {
    pub topology: Topology,
    pub settings: SettingsStore,
    pub monitor_binary: String,
    connections: HashMap<String, NodeConnection>,
    monitors: HashMap<String, MonitorHandle>,
}

impl Host {
    pub fn new(topology: Topology, settings: SettingsStore, monitor_binary: String) -> Self {
        Self { topology, settings, monitor_binary, connections: HashMap::new(), monitors: HashMap::new() }
    }

    fn connection(&mut self, label: &str) -> anyhow::Result<&mut NodeConnection> {
        if !self.connections.contains_key(label) {
            let node = self
                .topology
                .get(label)
                .ok_or_else(|| anyhow::anyhow!("unknown node '{label}'"))?;
            self.connections.insert(label.to_string(), NodeConnection::for_node(node));
        }
        Ok(self.connections.get_mut(label).unwrap())
    }

    pub async fn start_scan(&mut self, label: &str) -> anyhow::Result<Value> {
        self.connection(label)?.call("start_lock", Value::Null).await
    }

    pub async fn start_lock(&mut self, label: &str) -> anyhow::Result<Value> {
        self.connection(label)?.call("start_lock", Value::Null).await
    }

    pub async fn stop_loop(&mut self, label: &str) -> anyhow::Result<Value> {
        let result = self.connection(label)?.call("stop", Value::Null).await?;
        if let Some(conn) = self.connections.get_mut(label) {
            conn.close_loop();
        }
        Ok(result)
    }

    pub async fn acquire(&mut self, label: &str) -> anyhow::Result<Value> {
        self.connection(label)?.call("acquire", Value::Null).await
    }

    /// Chunks a request for `n` traces into batches of at most
    /// `MAX_ACQUIRE_BATCH`, concatenating the per-batch arrays.
    pub async fn acquire_ch_n(&mut self, label: &str, ch: usize, n: usize) -> anyhow::Result<Vec<Value>> {
        let mut out = Vec::with_capacity(n);
        let mut remaining = n;
        while remaining > 0 {
            let batch = remaining.min(MAX_ACQUIRE_BATCH);
            let value = format!("{ch}|{batch}");
            let reply = self.connection(label)?.call("acquire_ch_n", json!(value)).await?;
            match reply.as_array() {
                Some(arr) => out.extend(arr.iter().cloned()),
                None => warn!("acquire_ch_n returned a non-array reply for {label}"),
            }
            remaining -= batch;
        }
        Ok(out)
    }

    pub async fn show_current(&mut self, label: &str) -> anyhow::Result<Value> {
        self.connection(label)?.call("show_current", Value::Null).await
    }

    pub async fn update_setting(&mut self, label: &str, new: NodeSettings) -> anyhow::Result<Value> {
        settings::validate_settings(&new)?;
        self.settings.save(label, &new)?;
        // A node's wire contract is sample indices, not milliseconds; a scan
        // node's own `dec` governs its own settings, a lock/monitor node's
        // settings are governed by the cavity's master.
        let dec = match &new {
            NodeSettings::Scan { master } => master.dec,
            _ => self.node_dec(label)?,
        };
        let wire_settings = stcl_types::convert::settings_to_wire(&new, dec);
        let value = serde_json::to_value(&wire_settings)?;
        let result = self.connection(label)?.call_loop("update_settings", value).await?;
        info!("pushed updated settings to {label}");
        Ok(result)
    }

    /// Changing a scan node's `dec` moves the sample grid under every range
    /// and lockpoint on every node sharing that cavity; rescale and
    /// re-persist each of them by `c = new_dec / old_dec`, then push the new
    /// `dec` and rescaled settings out to each.
    pub async fn set_dec(&mut self, label: &str, new_dec: u32) -> anyhow::Result<Value> {
        let master_label = self
            .topology
            .find_master(label)
            .map(|n| n.label.clone())
            .ok_or_else(|| anyhow::anyhow!("unknown node '{label}'"))?;

        let old_dec = match self.settings.load(&master_label)? {
            NodeSettings::Scan { master } => master.dec,
            _ => return self.connection(label)?.call("set_dec", json!(new_dec)).await,
        };
        if old_dec == new_dec {
            return self.connection(label)?.call("set_dec", json!(new_dec)).await;
        }
        let factor = new_dec as f64 / old_dec as f64;

        let member_labels: Vec<String> =
            self.topology.find_slaves(&master_label).into_iter().map(|n| n.label.clone()).collect();

        let mut last_result = Value::Null;
        for member_label in &member_labels {
            let mut member_settings = self.settings.load(member_label)?;
            settings::rescale_settings(&mut member_settings, factor);
            if let NodeSettings::Scan { master } = &mut member_settings {
                master.dec = new_dec;
            }
            self.settings.save(member_label, &member_settings)?;

            self.connection(member_label)?.call("set_dec", json!(new_dec)).await?;
            let wire_settings = stcl_types::convert::settings_to_wire(&member_settings, new_dec);
            let value = serde_json::to_value(&wire_settings)?;
            last_result = self.connection(member_label)?.call_loop("update_settings", value).await?;
        }
        Ok(last_result)
    }

    /// The `dec` governing `label`'s cavity: its own if it is a scan node,
    /// else its master's, read from the persisted settings store.
    fn node_dec(&self, label: &str) -> anyhow::Result<u32> {
        let master_label = self
            .topology
            .find_master(label)
            .map(|n| n.label.clone())
            .ok_or_else(|| anyhow::anyhow!("no master found for node '{label}'"))?;
        match self.settings.load(&master_label)? {
            NodeSettings::Scan { master } => Ok(master.dec),
            _ => anyhow::bail!("master node '{master_label}' is not a scan node"),
        }
    }

    pub async fn start_monitor(&mut self, label: &str, filter: bool) -> anyhow::Result<()> {
        let node = self.topology.get(label).ok_or_else(|| anyhow::anyhow!("unknown node '{label}'"))?;
        let addr = format!("{}:{}", node.addr, node.primary_port);
        let handle = MonitorHandle::spawn_cavity(&self.monitor_binary, &addr, filter).await?;
        self.monitors.insert(format!("{label}:cavity"), handle);
        Ok(())
    }

    pub async fn start_error_monitor(&mut self, label: &str, t_min_ms: f64) -> anyhow::Result<()> {
        let node = self.topology.get(label).ok_or_else(|| anyhow::anyhow!("unknown node '{label}'"))?;
        let addr = format!("{}:{}", node.addr, node.primary_port);
        let handle = MonitorHandle::spawn_error(&self.monitor_binary, &addr, t_min_ms).await?;
        self.monitors.insert(format!("{label}:error"), handle);
        Ok(())
    }

    /// Shutdown order: monitors, then loop nodes (slaves before masters,
    /// since slaves are triggered by their master), then the connections
    /// themselves.
    pub async fn close(&mut self) -> anyhow::Result<()> {
        for (key, handle) in self.monitors.iter_mut() {
            if let Err(e) = handle.stop().await {
                warn!("stopping monitor {key} failed: {e}");
            }
        }
        self.monitors.clear();

        let scan_labels: Vec<String> = self
            .topology
            .labels()
            .filter(|l| matches!(self.topology.get(l).map(|n| n.settings.role()), Some(stcl_types::model::NodeRole::Scan)))
            .map(str::to_string)
            .collect();

        for master_label in scan_labels {
            let ordered_labels: Vec<String> =
                self.topology.find_slaves(&master_label).into_iter().map(|n| n.label.clone()).collect();
            for label in ordered_labels {
                if let Err(e) = self.stop_loop(&label).await {
                    warn!("stopping loop on {label} failed: {e}");
                }
            }
        }

        self.connections.clear();
        Ok(())
    }
}
