//! Settings validation shared between the host (before sending an update)
//! and the node (defense against a misbehaving or out-of-sync caller).

use thiserror::Error;

use crate::convert::duration_ms;
use crate::model::{MasterConfig, PidConfig, Range, SlaveConfig};

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("range {range:?} is not strictly ordered and within [0, {duration}]")]
    RangeOutOfOrder { range: Vec<f64>, duration: f64 },
    #[error("lockpoint {lockpoint} does not lie within range {range:?}")]
    LockpointOutOfRange { lockpoint: f64, range: Range },
    #[error("PID limit [{lo}, {hi}] is not ordered or exceeds +/-1")]
    PidLimitInvalid { lo: f64, hi: f64 },
    #[error("decimation {dec} is not a power of two in [1, {max}]")]
    DecNotPowerOfTwo { dec: u32, max: u32 },
}

/// A slave's range is a single ordered pair within `[0, duration(dec)]`.
pub fn check_range(range: Range, dec: u32) -> Result<(), ValidationError> {
    let duration = duration_ms(dec);
    let [a, b] = range;
    if !(0.0 <= a && a < b && b <= duration) {
        return Err(ValidationError::RangeOutOfOrder { range: vec![a, b], duration });
    }
    Ok(())
}

/// The master's ranges are two ordered pairs, themselves ordered relative to
/// each other, within `[0, duration(dec)]`.
pub fn check_master_range(ranges: [Range; 2], dec: u32) -> Result<(), ValidationError> {
    let duration = duration_ms(dec);
    let flat = [0.0, ranges[0][0], ranges[0][1], ranges[1][0], ranges[1][1], duration];
    let mut sorted = flat;
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    if flat != sorted || ranges[0][0] >= ranges[0][1] || ranges[1][0] >= ranges[1][1] {
        return Err(ValidationError::RangeOutOfOrder { range: flat.to_vec(), duration });
    }
    Ok(())
}

pub fn check_lockpoint(lockpoint: f64, range: Range) -> Result<(), ValidationError> {
    if lockpoint > range[0] && lockpoint < range[1] {
        Ok(())
    } else {
        Err(ValidationError::LockpointOutOfRange { lockpoint, range })
    }
}

pub fn check_dec(dec: u32, max: u32) -> Result<(), ValidationError> {
    if dec == 0 || dec > max || (dec & (dec - 1)) != 0 {
        return Err(ValidationError::DecNotPowerOfTwo { dec, max });
    }
    Ok(())
}

pub fn check_pid(pid: &PidConfig) -> Result<(), ValidationError> {
    let [lo, hi] = pid.limit;
    if lo > hi || lo.abs() > 1.0 || hi.abs() > 1.0 {
        return Err(ValidationError::PidLimitInvalid { lo, hi });
    }
    Ok(())
}

pub fn check_slave(slave: &SlaveConfig, dec: u32) -> Result<(), ValidationError> {
    check_range(slave.range, dec)?;
    check_lockpoint(slave.lockpoint, slave.range)?;
    check_pid(&slave.pid)?;
    Ok(())
}

pub fn check_master(master: &MasterConfig) -> Result<(), ValidationError> {
    check_dec(master.dec, crate::constants::MAX_DEC)?;
    check_master_range(master.range, master.dec)?;
    check_lockpoint(master.lockpoint, master.range[1])?;
    check_pid(&master.pid)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PidConfig;

    fn pid(limit: [f64; 2]) -> PidConfig {
        PidConfig { p: 0.1, i: 0.01, d: 0.0, i_val: 0.0, limit }
    }

    #[test]
    fn valid_slave_range_accepted() {
        assert!(check_range([1.0, 2.0], 16).is_ok());
    }

    #[test]
    fn inverted_range_rejected() {
        assert!(check_range([2.0, 1.0], 16).is_err());
    }

    #[test]
    fn range_beyond_duration_rejected() {
        let dur = duration_ms(1);
        assert!(check_range([0.0, dur + 1.0], 1).is_err());
    }

    #[test]
    fn lockpoint_must_be_strictly_inside() {
        assert!(check_lockpoint(1.5, [1.0, 2.0]).is_ok());
        assert!(check_lockpoint(1.0, [1.0, 2.0]).is_err());
        assert!(check_lockpoint(2.0, [1.0, 2.0]).is_err());
    }

    #[test]
    fn dec_must_be_power_of_two_in_range() {
        assert!(check_dec(1, 512).is_ok());
        assert!(check_dec(512, 512).is_ok());
        assert!(check_dec(3, 512).is_err());
        assert!(check_dec(1024, 512).is_err());
        assert!(check_dec(0, 512).is_err());
    }

    #[test]
    fn pid_limit_ordering_and_bound_enforced() {
        assert!(check_pid(&pid([-0.15, 0.15])).is_ok());
        assert!(check_pid(&pid([0.15, -0.15])).is_err());
        assert!(check_pid(&pid([-1.5, 1.5])).is_err());
    }
}
