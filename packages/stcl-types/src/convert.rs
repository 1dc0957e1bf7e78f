//! Conversions between the millisecond time axis used by hosts and operators
//! and the sample index axis used on the wire and inside the node.

use crate::constants::{N_SAMPLES, SAMPLE_PERIOD_NS};
use crate::model::{MasterConfig, MasterReference, NodeSettings, Range, SlaveConfig};

/// Scan duration in milliseconds for a given decimation factor.
pub fn duration_ms(dec: u32) -> f64 {
    N_SAMPLES as f64 * (SAMPLE_PERIOD_NS as f64 * 1e-6) * dec as f64
}

/// Convert a time-axis value in milliseconds to the nearest sample index,
/// clamped to `[0, N_SAMPLES]`.
pub fn ms2index(ms: f64, dec: u32) -> usize {
    let step = SAMPLE_PERIOD_NS as f64 * 1e-6 * dec as f64;
    let idx = (ms / step).round();
    idx.clamp(0.0, N_SAMPLES as f64) as usize
}

/// Convert a sample index to its time-axis value in milliseconds.
pub fn index2ms(i: usize, dec: u32) -> f64 {
    let step = SAMPLE_PERIOD_NS as f64 * 1e-6 * dec as f64;
    i as f64 * step
}

fn range_to_index(range: Range, dec: u32) -> Range {
    [ms2index(range[0], dec) as f64, ms2index(range[1], dec) as f64]
}

fn range_to_ms(range: Range, dec: u32) -> Range {
    [index2ms(range[0] as usize, dec), index2ms(range[1] as usize, dec)]
}

fn slave_to_index(s: &SlaveConfig, dec: u32) -> SlaveConfig {
    SlaveConfig {
        range: range_to_index(s.range, dec),
        lockpoint: ms2index(s.lockpoint, dec) as f64,
        enabled: s.enabled,
        pid: s.pid,
        peak_finder: s.peak_finder.clone(),
    }
}

fn slave_to_ms(s: &SlaveConfig, dec: u32) -> SlaveConfig {
    SlaveConfig {
        range: range_to_ms(s.range, dec),
        lockpoint: index2ms(s.lockpoint as usize, dec),
        enabled: s.enabled,
        pid: s.pid,
        peak_finder: s.peak_finder.clone(),
    }
}

/// Convert every range/lockpoint in `settings` from the millisecond axis to
/// sample indices for transmission, at the cavity's current `dec`.
pub fn settings_to_wire(settings: &NodeSettings, dec: u32) -> NodeSettings {
    match settings {
        NodeSettings::Scan { master } => NodeSettings::Scan {
            master: MasterConfig {
                range: [range_to_index(master.range[0], dec), range_to_index(master.range[1], dec)],
                lockpoint: ms2index(master.lockpoint, dec) as f64,
                pid: master.pid,
                peak_finder: master.peak_finder.clone(),
                dec: master.dec,
            },
        },
        NodeSettings::Lock { master, slave1, slave2 } => NodeSettings::Lock {
            master: MasterReference {
                range: [range_to_index(master.range[0], dec), range_to_index(master.range[1], dec)],
                lockpoint: ms2index(master.lockpoint, dec) as f64,
            },
            slave1: slave1.as_ref().map(|s| slave_to_index(s, dec)),
            slave2: slave2.as_ref().map(|s| slave_to_index(s, dec)),
        },
        NodeSettings::Monitor { master, slave1, slave2 } => NodeSettings::Monitor {
            master: MasterReference {
                range: [range_to_index(master.range[0], dec), range_to_index(master.range[1], dec)],
                lockpoint: ms2index(master.lockpoint, dec) as f64,
            },
            slave1: slave1.as_ref().map(|s| slave_to_index(s, dec)),
            slave2: slave2.as_ref().map(|s| slave_to_index(s, dec)),
        },
        NodeSettings::ExtScan => NodeSettings::ExtScan,
    }
}

/// Inverse of `settings_to_wire`: convert sample indices back to the
/// millisecond axis the engine and peak finders operate on.
pub fn settings_from_wire(settings: &NodeSettings, dec: u32) -> NodeSettings {
    match settings {
        NodeSettings::Scan { master } => NodeSettings::Scan {
            master: MasterConfig {
                range: [range_to_ms(master.range[0], dec), range_to_ms(master.range[1], dec)],
                lockpoint: index2ms(master.lockpoint as usize, dec),
                pid: master.pid,
                peak_finder: master.peak_finder.clone(),
                dec: master.dec,
            },
        },
        NodeSettings::Lock { master, slave1, slave2 } => NodeSettings::Lock {
            master: MasterReference {
                range: [range_to_ms(master.range[0], dec), range_to_ms(master.range[1], dec)],
                lockpoint: index2ms(master.lockpoint as usize, dec),
            },
            slave1: slave1.as_ref().map(|s| slave_to_ms(s, dec)),
            slave2: slave2.as_ref().map(|s| slave_to_ms(s, dec)),
        },
        NodeSettings::Monitor { master, slave1, slave2 } => NodeSettings::Monitor {
            master: MasterReference {
                range: [range_to_ms(master.range[0], dec), range_to_ms(master.range[1], dec)],
                lockpoint: index2ms(master.lockpoint as usize, dec),
            },
            slave1: slave1.as_ref().map(|s| slave_to_ms(s, dec)),
            slave2: slave2.as_ref().map(|s| slave_to_ms(s, dec)),
        },
        NodeSettings::ExtScan => NodeSettings::ExtScan,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_matches_reference_formula() {
        // dec=1: 2^14 * 8ns = 131072ns = 0.131072ms
        assert!((duration_ms(1) - 0.131072).abs() < 1e-9);
    }

    #[test]
    fn round_trip_endpoints() {
        for dec in [1u32, 2, 4, 16, 64, 512] {
            assert_eq!(ms2index(0.0, dec), 0);
            assert_eq!(ms2index(duration_ms(dec), dec), N_SAMPLES);
        }
    }

    #[test]
    fn round_trip_within_one_sample() {
        let dec = 16;
        let step = index2ms(1, dec) - index2ms(0, dec);
        for i in 0..N_SAMPLES {
            let ms = index2ms(i, dec);
            let back = ms2index(ms, dec);
            assert!((back as i64 - i as i64).unsigned_abs() <= 1);
            let _ = step;
        }
    }

    fn slave(lockpoint: f64) -> SlaveConfig {
        SlaveConfig {
            range: [0.0, 0.05],
            lockpoint,
            enabled: true,
            pid: crate::model::PidConfig { p: 0.1, i: 0.01, d: 0.0, i_val: 0.0, limit: [-1.0, 1.0] },
            peak_finder: crate::model::PeakFinderConfig::default(),
        }
    }

    #[test]
    fn settings_to_wire_and_back_round_trips_a_lock_node() {
        let dec = 16;
        let settings = NodeSettings::Lock {
            master: MasterReference { range: [[0.0, 0.08], [0.09, 0.12]], lockpoint: 0.1 },
            slave1: Some(slave(0.02)),
            slave2: None,
        };
        let wire = settings_to_wire(&settings, dec);
        let NodeSettings::Lock { master, slave1, .. } = &wire else { panic!("expected Lock") };
        assert!(master.range[0][1] > 1.0, "wire range should be a sample index, not ms");
        assert_eq!(master.range[0][1], ms2index(0.08, dec) as f64);
        assert_eq!(slave1.as_ref().unwrap().lockpoint, ms2index(0.02, dec) as f64);

        let back = settings_from_wire(&wire, dec);
        let NodeSettings::Lock { master, slave1, .. } = &back else { panic!("expected Lock") };
        assert!((master.lockpoint - 0.1).abs() < 1e-6);
        assert!((slave1.as_ref().unwrap().lockpoint - 0.02).abs() < 1e-6);
    }
}
