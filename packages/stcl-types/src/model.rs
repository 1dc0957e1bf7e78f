//! Persisted and wire-transmitted data model: trace shape, per-laser
//! configuration, and per-node settings.
//!
//! Runtime-only fields (measured position, captured height, sign, PID
//! integrator state) live on the node process and are never part of the
//! JSON a host persists or sends — they reset at every `start_lock`.

use serde::{Deserialize, Serialize};

/// One acquired trace: a time axis (ms) and one or two channels of samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub times_ms: Vec<f64>,
    pub channels: Vec<Vec<f64>>,
}

impl Trace {
    pub fn single(times_ms: Vec<f64>, samples: Vec<f64>) -> Self {
        Self { times_ms, channels: vec![samples] }
    }
}

/// A contiguous search sub-range on the time axis, in milliseconds.
pub type Range = [f64; 2];

/// The node role a process was started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Generates the ramp and sync trigger for its cavity.
    Scan,
    /// Locks one or two lasers, triggered externally.
    Lock,
    /// Acquires like `Lock` but never drives outputs.
    Monitor,
    /// Externally driven cavity; no network surface.
    ExtScan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakFinderKind {
    Maximum,
    SgMaximum,
    SgDeriv,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakFinderConfig {
    pub name: PeakFinderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deriv: Option<usize>,
}

impl Default for PeakFinderConfig {
    fn default() -> Self {
        Self { name: PeakFinderKind::Maximum, window_size: None, order: None, deriv: None }
    }
}

impl PeakFinderConfig {
    /// Fills in the reference implementation's defaults for whichever
    /// algorithm is selected, clamping `window_size` to a sane floor.
    pub fn with_defaults(mut self) -> Self {
        match self.name {
            PeakFinderKind::Maximum => {}
            PeakFinderKind::SgMaximum => {
                self.window_size = Some(self.window_size.unwrap_or(21).max(5));
                self.order = Some(self.order.unwrap_or(2));
                self.deriv = Some(0);
            }
            PeakFinderKind::SgDeriv => {
                self.window_size = Some(self.window_size.unwrap_or(21).max(5));
                self.order = Some(self.order.unwrap_or(1).max(1));
                self.deriv = Some(1);
            }
        }
        self
    }
}

/// PID configuration and, for a node-held instance, its persisted
/// integrator value (preserved across settings updates, reset at
/// `start_lock`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PidConfig {
    pub p: f64,
    pub i: f64,
    pub d: f64,
    #[serde(default)]
    pub i_val: f64,
    pub limit: [f64; 2],
}

/// A slave laser's persisted configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaveConfig {
    pub range: Range,
    pub lockpoint: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub pid: PidConfig,
    #[serde(default)]
    pub peak_finder: PeakFinderConfig,
}

fn default_true() -> bool {
    true
}

/// The master laser's persisted configuration, held by a `scan` node. Two
/// sub-ranges are searched per scan; the lockpoint lies in the second.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    pub range: [Range; 2],
    pub lockpoint: f64,
    pub pid: PidConfig,
    #[serde(default)]
    pub peak_finder: PeakFinderConfig,
    pub dec: u32,
}

/// Settings owned by one node, keyed by its role.
/// The master's ranges and lockpoint, replicated onto a `lock`/`monitor`
/// node so its own acquired trace can locate the two reference peaks
/// locally (needed for FSR and outlier checks) without a network round
/// trip to the scan node on every step. Carries no PID: only the scan node
/// drives the master's own output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MasterReference {
    pub range: [Range; 2],
    pub lockpoint: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum NodeSettings {
    Scan {
        #[serde(rename = "Master")]
        master: MasterConfig,
    },
    Lock {
        #[serde(rename = "Master")]
        master: MasterReference,
        #[serde(rename = "Slave1", default, skip_serializing_if = "Option::is_none")]
        slave1: Option<SlaveConfig>,
        #[serde(rename = "Slave2", default, skip_serializing_if = "Option::is_none")]
        slave2: Option<SlaveConfig>,
    },
    Monitor {
        #[serde(rename = "Master")]
        master: MasterReference,
        #[serde(rename = "Slave1", default, skip_serializing_if = "Option::is_none")]
        slave1: Option<SlaveConfig>,
        #[serde(rename = "Slave2", default, skip_serializing_if = "Option::is_none")]
        slave2: Option<SlaveConfig>,
    },
    ExtScan,
}

impl NodeSettings {
    pub fn role(&self) -> NodeRole {
        match self {
            NodeSettings::Scan { .. } => NodeRole::Scan,
            NodeSettings::Lock { .. } => NodeRole::Lock,
            NodeSettings::Monitor { .. } => NodeRole::Monitor,
            NodeSettings::ExtScan => NodeRole::ExtScan,
        }
    }
}

/// Describes a node as the host knows it: label, network address, and its
/// last-known settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub label: String,
    pub addr: String,
    pub primary_port: u16,
    pub settings: NodeSettings,
    /// Label of the `scan` node supplying this node's cavity. `None` for a
    /// scan node itself (it is its own master) and for `ext_scan`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_label: Option<String>,
}

impl NodeDescriptor {
    pub fn loop_port(&self) -> u16 {
        self.primary_port + crate::constants::LOOP_PORT_OFFSET
    }
}
