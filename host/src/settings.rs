//! Per-node settings persistence. One JSON file per node label under the
//! settings directory; `Default.json` seeds a fresh label. Validates a
//! settings object before it is ever written to disk or shipped to a node.

use std::path::{Path, PathBuf};

use stcl_types::model::{MasterConfig, MasterReference, NodeSettings, SlaveConfig};
use stcl_types::validate::{self, ValidationError};

pub struct SettingsStore {
    dir: PathBuf,
}

impl SettingsStore {
    /// Resolves the settings directory: an explicit override, else
    /// `STCL_SETTINGS_DIR`, else `dirs::config_dir()/stcl`.
    pub fn resolve(explicit: Option<PathBuf>) -> anyhow::Result<Self> {
        let dir = explicit
            .or_else(|| std::env::var_os("STCL_SETTINGS_DIR").map(PathBuf::from))
            .or_else(|| dirs::config_dir().map(|d| d.join("stcl")))
            .ok_or_else(|| anyhow::anyhow!("could not resolve a settings directory"))?;
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, label: &str) -> PathBuf {
        self.dir.join(format!("{label}.json"))
    }

    pub fn load(&self, label: &str) -> anyhow::Result<NodeSettings> {
        let path = self.path_for(label);
        let path = if path.exists() { path } else { self.dir.join("Default.json") };
        let raw = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, label: &str, settings: &NodeSettings) -> anyhow::Result<()> {
        validate_settings(settings)?;
        let raw = serde_json::to_vec_pretty(settings)?;
        std::fs::write(self.path_for(label), raw)?;
        Ok(())
    }
}

/// Range ordering within `[0, duration]`, lockpoint inside its range, PID
/// limits ordered within `[-1, 1]`, `dec` a power of two in `[1, 512]`.
pub fn validate_settings(settings: &NodeSettings) -> Result<(), ValidationError> {
    match settings {
        NodeSettings::Scan { master } => validate::check_master(master),
        NodeSettings::Lock { master, slave1, slave2 } | NodeSettings::Monitor { master, slave1, slave2 } => {
            // `MasterReference` carries no `dec`; the sharpest bound the host
            // can check without a round trip is ordering within the widest
            // possible window.
            validate::check_master_range(master.range, stcl_types::constants::MAX_DEC)?;
            validate::check_lockpoint(master.lockpoint, master.range[1])?;
            for slave in [slave1, slave2].into_iter().flatten() {
                validate::check_slave(slave, stcl_types::constants::MAX_DEC)?;
            }
            Ok(())
        }
        NodeSettings::ExtScan => Ok(()),
    }
}

/// When a scan node's `dec` changes by factor `c`, every range and lockpoint
/// on every node sharing that cavity must scale by the same factor — the
/// sample grid moved under them.
pub fn rescale_master(master: &mut MasterConfig, factor: f64) {
    for range in master.range.iter_mut() {
        range[0] *= factor;
        range[1] *= factor;
    }
    master.lockpoint *= factor;
}

pub fn rescale_slave(slave: &mut SlaveConfig, factor: f64) {
    slave.range[0] *= factor;
    slave.range[1] *= factor;
    slave.lockpoint *= factor;
}

pub fn rescale_master_reference(master: &mut MasterReference, factor: f64) {
    for range in master.range.iter_mut() {
        range[0] *= factor;
        range[1] *= factor;
    }
    master.lockpoint *= factor;
}

/// Rescale every range/lockpoint in `settings` in place by `factor`,
/// regardless of role.
pub fn rescale_settings(settings: &mut NodeSettings, factor: f64) {
    match settings {
        NodeSettings::Scan { master } => rescale_master(master, factor),
        NodeSettings::Lock { master, slave1, slave2 } | NodeSettings::Monitor { master, slave1, slave2 } => {
            rescale_master_reference(master, factor);
            for slave in [slave1, slave2].into_iter().flatten() {
                rescale_slave(slave, factor);
            }
        }
        NodeSettings::ExtScan => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stcl_types::model::{PeakFinderConfig, PidConfig};

    fn master() -> MasterConfig {
        MasterConfig {
            range: [[0.0, 0.08], [0.09, 0.12]],
            lockpoint: 0.1,
            pid: PidConfig { p: 0.1, i: 0.01, d: 0.0, i_val: 0.0, limit: [-1.0, 1.0] },
            peak_finder: PeakFinderConfig::default(),
            dec: 16,
        }
    }

    #[test]
    fn valid_scan_settings_pass() {
        assert!(validate_settings(&NodeSettings::Scan { master: master() }).is_ok());
    }

    #[test]
    fn rescale_scales_range_and_lockpoint_together() {
        let mut m = master();
        rescale_master(&mut m, 2.0);
        assert_eq!(m.range[0], [0.0, 0.16]);
        assert_eq!(m.lockpoint, 0.2);
    }

    #[test]
    fn rescale_settings_covers_lock_master_and_slaves() {
        let mut settings = NodeSettings::Lock {
            master: MasterReference { range: [[0.0, 0.08], [0.09, 0.12]], lockpoint: 0.1 },
            slave1: Some(SlaveConfig {
                range: [0.0, 0.05],
                lockpoint: 0.02,
                enabled: true,
                pid: PidConfig { p: 0.1, i: 0.01, d: 0.0, i_val: 0.0, limit: [-1.0, 1.0] },
                peak_finder: PeakFinderConfig::default(),
            }),
            slave2: None,
        };
        rescale_settings(&mut settings, 0.5);
        let NodeSettings::Lock { master, slave1, .. } = &settings else { panic!("expected Lock") };
        assert_eq!(master.range[0], [0.0, 0.04]);
        assert_eq!(master.lockpoint, 0.05);
        assert_eq!(slave1.as_ref().unwrap().lockpoint, 0.01);
    }
}
