//! The control loop: acquire a trace, locate peaks, normalize errors by the
//! cavity's free spectral range, advance PIDs, and emit output offsets.
//!
//! A `scan` node's engine owns the master laser's own PID and drives output
//! channel 1 with the ramp offset. A `lock` node's engine drives up to two
//! slave PIDs on outputs 0 and 1. A `monitor` node runs the same peak/error
//! computation as `lock` but never writes an output. Every role replicates
//! the master's ranges/lockpoint locally (`MasterReference`) so it can find
//! the two reference peaks in its own acquired trace without asking the scan
//! node for them on every step.

use std::collections::HashMap;
use std::time::Instant;

use stcl_types::constants::{
    DEFAULT_BORDER_GUARD_MS, DEFAULT_OUTLIER_THRESHOLD_MS, FSR_REF_AVERAGES, HEIGHT_FRACTION,
    SIGN_CHECK_ITERS, SIGN_CHECK_THRESHOLD,
};
use stcl_types::model::{
    MasterConfig, MasterReference, NodeRole, NodeSettings, PeakFinderConfig, SlaveConfig,
};
use thiserror::Error;

use crate::acquisition::Acquisition;
use crate::peak_finders::find_peak;
use crate::pid::Pid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaserId {
    Master,
    Slave1,
    Slave2,
}

#[derive(Debug, Error)]
pub enum LockEngineError {
    #[error("lockpoint out of range for {0:?}")]
    LockpointOutOfRange(LaserId),
    #[error("role {0:?} cannot start a lock loop")]
    WrongRole(NodeRole),
}

struct SlaveRuntime {
    config: SlaveConfig,
    pid: Pid,
    sign: f64,
    position: Option<f64>,
    height: Option<f64>,
    last_position: Option<f64>,
    output_ch: usize,
}

impl SlaveRuntime {
    fn new(config: SlaveConfig, output_ch: usize) -> Self {
        let pid = Pid::new(config.pid);
        Self { config, pid, sign: 1.0, position: None, height: None, last_position: None, output_ch }
    }
}

/// Per-laser error for one step. `None` means the laser was disabled, its
/// acquisition was skipped, or its measurement was rejected as an outlier.
pub struct StepOutcome {
    pub skipped: bool,
    pub errors: HashMap<LaserId, f64>,
}

pub struct LockEngine<A: Acquisition> {
    role: NodeRole,
    acquisition: A,
    master_full: Option<MasterConfig>,
    master_pid: Option<Pid>,
    master_ref: MasterReference,
    master_peak_finder: PeakFinderConfig,
    slave1: Option<SlaveRuntime>,
    slave2: Option<SlaveRuntime>,
    master_position: [Option<f64>; 2],
    master_height: [Option<f64>; 2],
    last_master_position: Option<f64>,
    last_errors: HashMap<LaserId, f64>,
    fsr_ref: Option<f64>,
    current_fsr: Option<f64>,
    running: bool,
    start_instant: Instant,
    outlier_threshold_ms: f64,
    border_guard_ms: f64,
}

impl<A: Acquisition> LockEngine<A> {
    pub fn new(acquisition: A, settings: NodeSettings) -> Self {
        let role = settings.role();
        let (master_full, master_pid, master_ref, master_peak_finder, slave1, slave2) =
            match settings {
                NodeSettings::Scan { master } => {
                    let pid = Pid::new(master.pid);
                    let master_ref = MasterReference { range: master.range, lockpoint: master.lockpoint };
                    let pf = master.peak_finder.clone();
                    (Some(master), Some(pid), master_ref, pf, None, None)
                }
                NodeSettings::Lock { master, slave1, slave2 } | NodeSettings::Monitor { master, slave1, slave2 } => (
                    None,
                    None,
                    master,
                    PeakFinderConfig::default(),
                    slave1.map(|c| SlaveRuntime::new(c, 0)),
                    slave2.map(|c| SlaveRuntime::new(c, 1)),
                ),
                NodeSettings::ExtScan => (
                    None,
                    None,
                    MasterReference { range: [[0.0, 1.0], [1.0, 2.0]], lockpoint: 1.5 },
                    PeakFinderConfig::default(),
                    None,
                    None,
                ),
            };

        Self {
            role,
            acquisition,
            master_full,
            master_pid,
            master_ref,
            master_peak_finder,
            slave1,
            slave2,
            master_position: [None, None],
            master_height: [None, None],
            last_master_position: None,
            last_errors: HashMap::new(),
            fsr_ref: None,
            current_fsr: None,
            running: false,
            start_instant: Instant::now(),
            outlier_threshold_ms: DEFAULT_OUTLIER_THRESHOLD_MS,
            border_guard_ms: DEFAULT_BORDER_GUARD_MS,
        }
    }

    pub fn set_thresholds(&mut self, outlier_threshold_ms: f64, border_guard_ms: f64) {
        self.outlier_threshold_ms = outlier_threshold_ms;
        self.border_guard_ms = border_guard_ms;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Merge new settings into the running configuration. A PID that already
    /// exists keeps its `I_val`; gains and limits are replaced. Disabling a
    /// slave zeroes its output in the same call.
    pub fn update_settings(&mut self, settings: NodeSettings) {
        match settings {
            NodeSettings::Scan { master } => {
                if let Some(pid) = &mut self.master_pid {
                    pid.reconfigure(master.pid);
                } else {
                    self.master_pid = Some(Pid::new(master.pid));
                }
                self.master_ref = MasterReference { range: master.range, lockpoint: master.lockpoint };
                self.master_peak_finder = master.peak_finder.clone();
                self.master_full = Some(master);
            }
            NodeSettings::Lock { master, slave1, slave2 } | NodeSettings::Monitor { master, slave1, slave2 } => {
                self.master_ref = master;
                self.merge_slave(0, slave1);
                self.merge_slave(1, slave2);
            }
            NodeSettings::ExtScan => {}
        }
    }

    fn merge_slave(&mut self, idx: usize, new: Option<SlaveConfig>) {
        let slot = if idx == 0 { &mut self.slave1 } else { &mut self.slave2 };
        match (slot.as_mut(), new) {
            (_, None) => {
                if let Some(existing) = slot.take() {
                    self.acquisition.write_output(existing.output_ch, 0.0);
                }
            }
            (Some(existing), Some(cfg)) => {
                if !cfg.enabled {
                    self.acquisition.write_output(existing.output_ch, 0.0);
                }
                existing.pid.reconfigure(cfg.pid);
                existing.config = cfg;
            }
            (None, Some(cfg)) => {
                *slot = Some(SlaveRuntime::new(cfg, idx));
            }
        }
    }

    /// Replace one laser's peak-finder configuration in place.
    pub fn set_peak_finder(&mut self, laser: LaserId, config: PeakFinderConfig) {
        match laser {
            LaserId::Master => self.master_peak_finder = config,
            LaserId::Slave1 => {
                if let Some(s) = &mut self.slave1 {
                    s.config.peak_finder = config;
                }
            }
            LaserId::Slave2 => {
                if let Some(s) = &mut self.slave2 {
                    s.config.peak_finder = config;
                }
            }
        }
    }

    pub fn disable(&mut self, laser: LaserId) {
        match laser {
            LaserId::Master => {
                self.acquisition.write_output(1, 0.0);
            }
            LaserId::Slave1 => {
                if let Some(s) = &mut self.slave1 {
                    s.config.enabled = false;
                    self.acquisition.write_output(s.output_ch, 0.0);
                }
            }
            LaserId::Slave2 => {
                if let Some(s) = &mut self.slave2 {
                    s.config.enabled = false;
                    self.acquisition.write_output(s.output_ch, 0.0);
                }
            }
        }
    }

    /// Each configured lockpoint must sit strictly inside its range; the
    /// master uses its second sub-range.
    pub fn check_lockpoints(&self) -> bool {
        let master_ok = self.master_ref.lockpoint > self.master_ref.range[1][0]
            && self.master_ref.lockpoint < self.master_ref.range[1][1];
        let slave_ok = |s: &Option<SlaveRuntime>| {
            s.as_ref().map_or(true, |s| {
                s.config.lockpoint > s.config.range[0] && s.config.lockpoint < s.config.range[1]
            })
        };
        master_ok && slave_ok(&self.slave1) && slave_ok(&self.slave2)
    }

    /// A peak below `HEIGHT_FRACTION` of its captured reference height is
    /// treated as missing.
    pub fn check_height(&self, laser: LaserId, height: f64) -> bool {
        let reference = match laser {
            LaserId::Master => self.master_height[1],
            LaserId::Slave1 => self.slave1.as_ref().and_then(|s| s.height),
            LaserId::Slave2 => self.slave2.as_ref().and_then(|s| s.height),
        };
        reference.map_or(true, |r| height >= HEIGHT_FRACTION * r)
    }

    /// A peak within `border_guard_ms` of either border of its search range
    /// is considered unreliable.
    pub fn check_positions(&self, position: f64, range: [f64; 2]) -> bool {
        position - range[0] >= self.border_guard_ms && range[1] - position >= self.border_guard_ms
    }

    fn master_ranges(&self) -> [[f64; 2]; 2] {
        self.master_ref.range
    }

    /// Acquire once, locate the master's two peaks and every enabled
    /// slave's peak in the same trace. Returns `false` if acquisition was
    /// skipped.
    async fn acquire_and_locate(&mut self) -> bool {
        let trace = match self.acquisition.acquire().await {
            Some(t) => t,
            None => return false,
        };
        let ch0 = &trace.channels[0];
        let ranges = self.master_ranges();
        let p0 = find_peak(&trace.times_ms, ch0, ranges[0], &self.master_peak_finder);
        let p1 = find_peak(&trace.times_ms, ch0, ranges[1], &self.master_peak_finder);
        let (p0, p1) = match (p0, p1) {
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };
        self.master_position = [Some(p0.0), Some(p1.0)];
        self.master_height = [Some(p0.1), Some(p1.1)];
        self.current_fsr = Some((p1.0 - p0.0).abs());

        for slot in [&mut self.slave1, &mut self.slave2] {
            if let Some(slave) = slot {
                if slave.config.enabled {
                    if let Some((pos, height)) =
                        find_peak(&trace.times_ms, ch0, slave.config.range, &slave.config.peak_finder)
                    {
                        slave.position = Some(pos);
                        slave.height = Some(height);
                    }
                }
            }
        }
        true
    }

    fn now_s(&self) -> f64 {
        self.start_instant.elapsed().as_secs_f64()
    }

    /// Run one iteration of the control loop.
    pub async fn step(&mut self) -> StepOutcome {
        if let Some(slave) = &mut self.slave1 {
            slave.pid.on = self.acquisition.read_gpio(0);
        }
        if let Some(slave) = &mut self.slave2 {
            slave.pid.on = self.acquisition.read_gpio(1);
        }

        if !self.acquire_and_locate().await {
            return StepOutcome { skipped: true, errors: HashMap::new() };
        }

        let t = self.now_s();
        let master_pos = self.master_position[1].unwrap();
        let fsr = self.current_fsr.unwrap_or(1.0);
        let fsr_ref = self.fsr_ref.unwrap_or(fsr);
        let mut errors = HashMap::new();

        if self.master_pid.is_some() {
            let accept = self
                .last_master_position
                .map_or(true, |prev| (master_pos - prev).abs() < self.outlier_threshold_ms);
            self.last_master_position = Some(master_pos);
            if accept {
                let err = (master_pos - self.master_ref.lockpoint) / fsr;
                let pid = self.master_pid.as_mut().unwrap();
                let mv = pid.update(err, t);
                if self.role == NodeRole::Scan {
                    self.acquisition.write_output(1, mv);
                }
                errors.insert(LaserId::Master, err);
            }
        }

        for (id, slot) in [(LaserId::Slave1, &mut self.slave1), (LaserId::Slave2, &mut self.slave2)] {
            if let Some(slave) = slot {
                if !slave.config.enabled {
                    continue;
                }
                let Some(pos) = slave.position else { continue };
                let rel = pos - master_pos;
                let accept = slave
                    .last_position
                    .map_or(true, |prev| (rel - prev).abs() < self.outlier_threshold_ms);
                slave.last_position = Some(rel);
                if !accept {
                    continue;
                }
                let err = rel / fsr - (slave.config.lockpoint - self.master_ref.lockpoint) / fsr_ref;
                let mv = slave.pid.update(err * slave.sign, t);
                if self.role == NodeRole::Lock {
                    self.acquisition.write_output(slave.output_ch, mv);
                }
                errors.insert(id, err);
            }
        }

        self.last_errors = errors.clone();
        StepOutcome { skipped: false, errors }
    }

    /// Reset outputs and PIDs, measure `FSR_ref` over several scans, capture
    /// reference heights, then run the automatic sign check. Refuses to
    /// start if any configured lockpoint is out of range.
    pub async fn start(&mut self) -> Result<(), LockEngineError> {
        if !self.check_lockpoints() {
            return Err(LockEngineError::LockpointOutOfRange(LaserId::Master));
        }

        self.acquisition.write_output(0, 0.0);
        self.acquisition.write_output(1, 0.0);
        if let Some(pid) = &mut self.master_pid {
            pid.reset();
        }
        if let Some(s) = &mut self.slave1 {
            s.pid.reset();
            s.sign = 1.0;
            s.last_position = None;
        }
        if let Some(s) = &mut self.slave2 {
            s.pid.reset();
            s.sign = 1.0;
            s.last_position = None;
        }
        self.last_master_position = None;

        let mut fsr_samples = Vec::with_capacity(FSR_REF_AVERAGES);
        for _ in 0..FSR_REF_AVERAGES {
            if self.acquire_and_locate().await {
                if let Some(fsr) = self.current_fsr {
                    fsr_samples.push(fsr);
                }
            }
        }
        let fsr_ref = if fsr_samples.is_empty() {
            1.0
        } else {
            fsr_samples.iter().sum::<f64>() / fsr_samples.len() as f64
        };
        self.fsr_ref = Some(fsr_ref);
        // `master_height`/each slave's `height` already hold the values from
        // the last averaging acquisition above; that is the captured
        // reference height used by `check_height` for the rest of the loop.

        self.check_sign().await;
        self.running = true;
        Ok(())
    }

    /// Run `SIGN_CHECK_ITERS` steps and flip each non-master laser's sign if
    /// its error magnitude grew over the window rather than shrank.
    async fn check_sign(&mut self) {
        let initial = self.step().await.errors;
        for _ in 1..SIGN_CHECK_ITERS {
            self.step().await;
        }
        let final_errors = self.last_errors.clone();

        for (id, slot) in [(LaserId::Slave1, &mut self.slave1), (LaserId::Slave2, &mut self.slave2)] {
            if let Some(slave) = slot {
                if let (Some(&e0), Some(&e1)) = (initial.get(&id), final_errors.get(&id)) {
                    if e1.abs() - e0.abs() >= SIGN_CHECK_THRESHOLD {
                        slave.sign = -slave.sign;
                    }
                }
            }
        }
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// Snapshot the live configuration back into a `NodeSettings`, for the
    /// `show_current` action and for re-persisting after a merge.
    pub fn current_settings(&self) -> NodeSettings {
        match self.role {
            NodeRole::Scan => NodeSettings::Scan {
                master: self.master_full.clone().expect("scan role always carries a master config"),
            },
            NodeRole::Lock => NodeSettings::Lock {
                master: self.master_ref,
                slave1: self.slave1.as_ref().map(|s| s.config.clone()),
                slave2: self.slave2.as_ref().map(|s| s.config.clone()),
            },
            NodeRole::Monitor => NodeSettings::Monitor {
                master: self.master_ref,
                slave1: self.slave1.as_ref().map(|s| s.config.clone()),
                slave2: self.slave2.as_ref().map(|s| s.config.clone()),
            },
            NodeRole::ExtScan => NodeSettings::ExtScan,
        }
    }

    /// One step's errors keyed by the laser's settings-file name, for the
    /// `acquire_errs` action.
    pub async fn acquire_errs(&mut self) -> Option<HashMap<String, f64>> {
        let outcome = self.step().await;
        if outcome.skipped {
            return None;
        }
        Some(outcome.errors.into_iter().map(|(id, e)| (laser_label(id).to_string(), e)).collect())
    }

    pub async fn acquire(&mut self) -> Option<stcl_types::model::Trace> {
        self.acquisition.acquire().await
    }

    pub async fn acquire_ch(&mut self, ch: usize) -> Option<(f64, Vec<f64>)> {
        self.acquisition.acquire_ch(ch).await
    }

    pub async fn acquire_ch_n(&mut self, ch: usize, n: usize) -> Vec<Option<(f64, Vec<f64>)>> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.acquisition.acquire_ch(ch).await);
        }
        out
    }

    /// One acquisition, peaks located per range; a failed range yields
    /// `None` at its position without aborting the rest of the batch.
    pub async fn acquire_peaks_ch(&mut self, ch: usize, ranges: &[[f64; 2]]) -> Option<Vec<Option<f64>>> {
        let (duration, samples) = self.acquisition.acquire_ch(ch).await?;
        let times: Vec<f64> = (0..samples.len())
            .map(|i| i as f64 * duration / (samples.len() as f64 - 1.0).max(1.0))
            .collect();
        let finder = PeakFinderConfig::default();
        Some(
            ranges
                .iter()
                .map(|&r| find_peak(&times, &samples, r, &finder).map(|(t, _)| t))
                .collect(),
        )
    }

    pub fn set_dec(&mut self, dec: u32) {
        self.acquisition.set_dec(dec);
    }

    pub fn dec(&self) -> u32 {
        self.acquisition.dec()
    }
}

fn laser_label(id: LaserId) -> &'static str {
    match id {
        LaserId::Master => "Master",
        LaserId::Slave1 => "Slave1",
        LaserId::Slave2 => "Slave2",
    }
}
