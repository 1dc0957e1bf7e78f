//! Discrete-time PID with output-only clamping (no integrator anti-windup),
//! matching the reference controller's behavior exactly.

use stcl_types::model::PidConfig;

#[derive(Debug, Clone)]
pub struct Pid {
    pub p: f64,
    pub i: f64,
    pub d: f64,
    pub limit: [f64; 2],
    i_val: f64,
    start_i_val: f64,
    e_prev: Option<f64>,
    t_prev: Option<f64>,
    mv: f64,
    pub on: bool,
}

impl Pid {
    pub fn new(cfg: PidConfig) -> Self {
        Self {
            p: cfg.p,
            i: cfg.i,
            d: cfg.d,
            limit: cfg.limit,
            i_val: cfg.i_val,
            start_i_val: cfg.i_val,
            e_prev: None,
            t_prev: None,
            mv: cfg.i_val,
            on: true,
        }
    }

    /// Apply a new configuration, preserving the current integrator value
    /// (the reference implementation keeps `I_val` across a gain/limit
    /// update so a running loop doesn't bump).
    pub fn reconfigure(&mut self, cfg: PidConfig) {
        self.p = cfg.p;
        self.i = cfg.i;
        self.d = cfg.d;
        self.limit = cfg.limit;
    }

    /// Advance the controller with a new `(error, timestamp_s)` sample and
    /// return the manipulated variable. The first call for a fresh
    /// controller (or the first call after `reset`) only records the sample
    /// and returns the previous `mv` unchanged — there is no prior `dt` to
    /// integrate over.
    pub fn update(&mut self, e: f64, t: f64) -> f64 {
        if !self.on {
            self.e_prev = Some(e);
            self.t_prev = Some(t);
            return self.mv;
        }
        match (self.e_prev, self.t_prev) {
            (Some(e_prev), Some(t_prev)) => {
                let dt = t - t_prev;
                self.i_val += self.i * e * dt;
                let d_term = if dt != 0.0 { self.d * (e - e_prev) / dt } else { 0.0 };
                let mv = self.p * e + self.i_val + d_term;
                self.mv = mv.clamp(self.limit[0], self.limit[1]);
                self.e_prev = Some(e);
                self.t_prev = Some(t);
                self.mv
            }
            _ => {
                self.e_prev = Some(e);
                self.t_prev = Some(t);
                self.mv
            }
        }
    }

    pub fn mv(&self) -> f64 {
        self.mv
    }

    pub fn i_val(&self) -> f64 {
        self.i_val
    }

    /// Restore the integrator and output to their creation-time value and
    /// forget the previous sample, so the next `update` is treated as fresh.
    pub fn reset(&mut self) {
        self.i_val = self.start_i_val;
        self.mv = self.start_i_val;
        self.e_prev = None;
        self.t_prev = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(limit: [f64; 2]) -> PidConfig {
        PidConfig { p: 0.1, i: 0.01, d: 0.0, i_val: 0.0, limit }
    }

    #[test]
    fn first_update_is_a_no_op_recording_only() {
        let mut pid = Pid::new(cfg([-1.0, 1.0]));
        let mv = pid.update(2.0, 0.0);
        assert_eq!(mv, 0.0);
        assert_eq!(pid.i_val(), 0.0);
    }

    #[test]
    fn step_response_matches_reference_example() {
        let mut pid = Pid::new(cfg([-0.15, 0.15]));
        pid.update(2.0, 0.0);
        let mv = pid.update(2.0, 1.0);
        // unclamped would be 0.1*2 + 0.01*2*1 = 0.22, clamped to the limit
        assert!((mv - 0.15).abs() < 1e-12);
    }

    #[test]
    fn mv_always_within_limit() {
        let mut pid = Pid::new(cfg([-0.2, 0.2]));
        pid.update(100.0, 0.0);
        for k in 1..50 {
            let mv = pid.update(100.0, k as f64);
            assert!(mv >= -0.2 - 1e-12 && mv <= 0.2 + 1e-12);
        }
    }

    #[test]
    fn determinism_given_identical_sequence() {
        let seq = [(1.0, 0.0), (1.5, 1.0), (0.5, 2.0), (-0.3, 3.0)];
        let run = || {
            let mut pid = Pid::new(cfg([-1.0, 1.0]));
            seq.iter().map(|&(e, t)| pid.update(e, t)).collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn off_suspends_integration_but_keeps_last_mv() {
        let mut pid = Pid::new(cfg([-1.0, 1.0]));
        pid.update(1.0, 0.0);
        let mv1 = pid.update(1.0, 1.0);
        pid.on = false;
        let mv2 = pid.update(5.0, 2.0);
        assert_eq!(mv1, mv2);
        assert_eq!(pid.i_val(), pid.i_val());
    }

    #[test]
    fn gated_off_sample_is_still_recorded_so_resume_dt_is_one_step() {
        let mut pid = Pid::new(cfg([-1.0, 1.0]));
        pid.update(1.0, 0.0);
        pid.update(1.0, 1.0);
        pid.on = false;
        pid.update(1.0, 2.0);
        pid.update(1.0, 3.0);
        pid.update(1.0, 9.0);
        pid.on = true;
        let i_val_before = pid.i_val();
        pid.update(1.0, 10.0);
        // dt spans one step (9.0 -> 10.0), not the whole gated interval.
        assert!((pid.i_val() - (i_val_before + 0.01 * 1.0 * 1.0)).abs() < 1e-12);
    }

    #[test]
    fn reset_restores_creation_time_i_val() {
        let mut pid = Pid::new(PidConfig { p: 0.1, i: 0.01, d: 0.0, i_val: 0.3, limit: [-1.0, 1.0] });
        pid.update(1.0, 0.0);
        pid.update(1.0, 1.0);
        assert_ne!(pid.i_val(), 0.3);
        pid.reset();
        assert_eq!(pid.i_val(), 0.3);
        assert_eq!(pid.mv(), 0.3);
    }
}
