//! Node registry keyed by label, loaded from a topology file describing each
//! node's address, role, last-known settings, and (for non-scan nodes) which
//! scan node's cavity it shares.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use stcl_types::model::{NodeDescriptor, NodeRole};

#[derive(Debug, Serialize, Deserialize)]
pub struct TopologyFile {
    pub nodes: Vec<NodeDescriptor>,
}

pub struct Topology {
    nodes: HashMap<String, NodeDescriptor>,
}

impl Topology {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: TopologyFile = serde_json::from_str(&raw)?;
        let nodes = file.nodes.into_iter().map(|n| (n.label.clone(), n)).collect();
        Ok(Self { nodes })
    }

    pub fn get(&self, label: &str) -> Option<&NodeDescriptor> {
        self.nodes.get(label)
    }

    pub fn get_mut(&mut self, label: &str) -> Option<&mut NodeDescriptor> {
        self.nodes.get_mut(label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// The scanning node supplying `label`'s cavity. `label` itself if it is
    /// already a scan node.
    pub fn find_master(&self, label: &str) -> Option<&NodeDescriptor> {
        let node = self.nodes.get(label)?;
        match node.settings.role() {
            NodeRole::Scan => Some(node),
            _ => {
                let master_label = node.master_label.as_deref()?;
                self.nodes.get(master_label)
            }
        }
    }

    /// All non-scan nodes sharing `master_label`'s cavity, plus the master
    /// itself as the last element — the order the reference shutdown
    /// sequence relies on (slaves first, master last).
    pub fn find_slaves(&self, master_label: &str) -> Vec<&NodeDescriptor> {
        let mut slaves: Vec<&NodeDescriptor> = self
            .nodes
            .values()
            .filter(|n| n.master_label.as_deref() == Some(master_label))
            .collect();
        slaves.sort_by(|a, b| a.label.cmp(&b.label));
        if let Some(master) = self.nodes.get(master_label) {
            slaves.push(master);
        }
        slaves
    }

    /// A monitor-role node sharing the same cavity as `label`.
    pub fn find_monitor(&self, label: &str) -> Option<&NodeDescriptor> {
        let master_label = self.find_master(label)?.label.clone();
        self.nodes.values().find(|n| {
            n.settings.role() == NodeRole::Monitor && n.master_label.as_deref() == Some(master_label.as_str())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stcl_types::model::{MasterConfig, MasterReference, NodeSettings, PeakFinderConfig, PidConfig};

    fn scan_node(label: &str) -> NodeDescriptor {
        NodeDescriptor {
            label: label.to_string(),
            addr: "127.0.0.1".to_string(),
            primary_port: 5000,
            settings: NodeSettings::Scan {
                master: MasterConfig {
                    range: [[0.0, 0.08], [0.09, 0.12]],
                    lockpoint: 0.1,
                    pid: PidConfig { p: 0.0, i: 0.0, d: 0.0, i_val: 0.0, limit: [-1.0, 1.0] },
                    peak_finder: PeakFinderConfig::default(),
                    dec: 16,
                },
            },
            master_label: None,
        }
    }

    fn lock_node(label: &str, master_label: &str) -> NodeDescriptor {
        NodeDescriptor {
            label: label.to_string(),
            addr: "127.0.0.1".to_string(),
            primary_port: 5001,
            settings: NodeSettings::Lock {
                master: MasterReference { range: [[0.0, 0.08], [0.09, 0.12]], lockpoint: 0.1 },
                slave1: None,
                slave2: None,
            },
            master_label: Some(master_label.to_string()),
        }
    }

    #[test]
    fn find_slaves_lists_slaves_then_master_last() {
        let mut nodes = HashMap::new();
        nodes.insert("scan-a".to_string(), scan_node("scan-a"));
        nodes.insert("lock-a".to_string(), lock_node("lock-a", "scan-a"));
        nodes.insert("lock-b".to_string(), lock_node("lock-b", "scan-a"));
        let topo = Topology { nodes };

        let slaves = topo.find_slaves("scan-a");
        assert_eq!(slaves.len(), 3);
        assert_eq!(slaves.last().unwrap().label, "scan-a");
    }

    #[test]
    fn find_master_of_a_lock_node_resolves_through_master_label() {
        let mut nodes = HashMap::new();
        nodes.insert("scan-a".to_string(), scan_node("scan-a"));
        nodes.insert("lock-a".to_string(), lock_node("lock-a", "scan-a"));
        let topo = Topology { nodes };

        let master = topo.find_master("lock-a").unwrap();
        assert_eq!(master.label, "scan-a");
    }
}
