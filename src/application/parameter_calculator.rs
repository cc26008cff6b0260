// Parameter calculator - the ten per-shot alarm parameters derived from a trajectory
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::parameters::{ALARM_PARAMETERS_NUM, AlarmParameters, ParameterId};
use crate::domain::trajectory::{Trajectory, TrajectorySample};
use crate::infrastructure::config::{MachineSettings, PartSettings};

/// Slow-shot variation rate reported when the ratio is undefined.
pub const SS_VAR_RATE_SATURATED: f64 = 100.0;
const SS_VAR_RATE_SCALE: f64 = 50.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalcError {
    #[error("position phase is empty")]
    EmptyPositionPhase,
    #[error("time phase is empty")]
    EmptyTimePhase,
    #[error("no sample meets the fast-shot position and velocity thresholds")]
    NoFastShot,
    #[error("no slow-shot samples precede the start of fast shot")]
    NoSlowShot,
    #[error("head pressure never reached {target} MPa")]
    TargetPressureNotReached { target: f64 },
    #[error("time phase has no samples past the first {skip}")]
    PeakWindowEmpty { skip: usize },
}

/// Parameters of one shot plus the steps that could not be derived.
#[derive(Debug, Clone, PartialEq)]
pub struct Calculation {
    pub parameters: AlarmParameters,
    pub failures: Vec<(ParameterId, CalcError)>,
}

#[derive(Debug, Clone)]
pub struct ParameterCalculator {
    part: PartSettings,
    machine: MachineSettings,
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn first_where(samples: &[TrajectorySample], pred: impl Fn(&TrajectorySample) -> bool) -> Option<usize> {
    samples.iter().position(pred)
}

impl ParameterCalculator {
    pub fn new(part: PartSettings, machine: MachineSettings) -> Self {
        Self { part, machine }
    }

    /// Derives every parameter in calculation order. Only an empty position
    /// phase fails the whole shot; any other failing step is stored as NaN.
    pub fn calculate(
        &self,
        trajectory: &Trajectory,
        t0: DateTime<Utc>,
        previous_t0: Option<DateTime<Utc>>,
    ) -> Result<Calculation, CalcError> {
        let p = &trajectory.position;
        let t = &trajectory.time;
        let last = p.last().ok_or(CalcError::EmptyPositionPhase)?;

        let csfs_idx = self.fast_shot_start(p);
        let csfs = p[csfs_idx].pos;

        let steps: [(ParameterId, Result<f64, CalcError>); ALARM_PARAMETERS_NUM] = [
            (ParameterId::FillTime, Ok(self.fill_time(p, last))),
            (ParameterId::SsVelAvg, self.ss_vel_avg(p, csfs_idx)),
            (ParameterId::FsVelAvg, self.fs_vel_avg(p)),
            (ParameterId::BiscuitSize, Ok(self.biscuit_size(trajectory))),
            (ParameterId::IntensSqueezeDist, self.intens_squeeze_dist(t, last)),
            (ParameterId::IntensRiseTime, self.intens_rise_time(t)),
            (ParameterId::Csfs, Ok(csfs)),
            (ParameterId::CycleTime, Ok(self.cycle_time(t0, previous_t0))),
            (ParameterId::PeakIntensPress, self.peak_intens_press(t)),
            (ParameterId::SsVarRate, Ok(self.ss_var_rate(p, csfs))),
        ];

        let mut values = [f64::NAN; ALARM_PARAMETERS_NUM];
        let mut failures = Vec::new();
        for (id, step) in steps {
            match step {
                Ok(v) => values[id.index()] = v,
                Err(e) => {
                    tracing::warn!(shot = trajectory.shot, parameter = %id, error = %e, "parameter not derived");
                    failures.push((id, e));
                }
            }
        }

        Ok(Calculation {
            parameters: AlarmParameters::from_values(trajectory.shot, values),
            failures,
        })
    }

    /// Time from P2 (`p3 - plunger_p2_p3`) to the end of the position phase.
    /// Position is assumed non-decreasing.
    fn fill_time(&self, p: &[TrajectorySample], last: &TrajectorySample) -> f64 {
        let p2 = last.pos - self.part.plunger_p2_p3_mm;
        let idx = p.partition_point(|s| s.pos < p2).min(p.len() - 1);
        last.t - p[idx].t
    }

    fn is_fast_shot(&self, s: &TrajectorySample) -> bool {
        s.pos > self.part.csfs_min_pos_mm && s.vel > self.part.csfs_min_vel_mm_s
    }

    /// First fast-shot sample. Without one the shot start counts as the
    /// fast-shot start, so csfs is the first position and the slow-shot
    /// average has no samples.
    fn fast_shot_start(&self, p: &[TrajectorySample]) -> usize {
        first_where(p, |s| self.is_fast_shot(s)).unwrap_or_else(|| {
            tracing::debug!("no sample meets the fast-shot thresholds, csfs at first sample");
            0
        })
    }

    fn ss_vel_avg(&self, p: &[TrajectorySample], csfs_idx: usize) -> Result<f64, CalcError> {
        mean(p[..csfs_idx].iter().map(|s| s.vel)).ok_or(CalcError::NoSlowShot)
    }

    fn fs_vel_avg(&self, p: &[TrajectorySample]) -> Result<f64, CalcError> {
        mean(p.iter().filter(|s| self.is_fast_shot(s)).map(|s| s.vel)).ok_or(CalcError::NoFastShot)
    }

    fn biscuit_size(&self, trajectory: &Trajectory) -> f64 {
        self.part.total_stroke_mm - trajectory.max_position().unwrap_or(f64::NAN)
    }

    fn intens_squeeze_dist(&self, t: &[TrajectorySample], last: &TrajectorySample) -> Result<f64, CalcError> {
        let max = t.iter().map(|s| s.pos).reduce(f64::max).ok_or(CalcError::EmptyTimePhase)?;
        Ok(max - last.pos)
    }

    fn intens_rise_time(&self, t: &[TrajectorySample]) -> Result<f64, CalcError> {
        if t.is_empty() {
            return Err(CalcError::EmptyTimePhase);
        }
        let target = self.part.intens_target_mpa;
        first_where(t, |s| s.press_head >= target)
            .map(|i| t[i].t)
            .ok_or(CalcError::TargetPressureNotReached { target })
    }

    fn cycle_time(&self, t0: DateTime<Utc>, previous_t0: Option<DateTime<Utc>>) -> f64 {
        match previous_t0 {
            Some(prev) => (t0 - prev).num_microseconds().map_or(f64::NAN, |us| us as f64 / 1.0e6),
            None => self.part.cycle_time_default_s,
        }
    }

    /// Head pressure at the metal-pressure peak, skipping the leading
    /// transient samples.
    fn peak_intens_press(&self, t: &[TrajectorySample]) -> Result<f64, CalcError> {
        let skip = self.part.intens_peak_skip;
        let m = &self.machine;
        let metal = |s: &TrajectorySample| {
            (s.press_head * m.head_area_mm2 - s.press_rod * m.rod_area_mm2) / m.plunger_area_mm2
        };

        let mut peak: Option<(f64, &TrajectorySample)> = None;
        for s in t.iter().skip(skip) {
            let mp = metal(s);
            // first maximum wins
            if peak.is_none_or(|(best, _)| mp > best) {
                peak = Some((mp, s));
            }
        }

        peak.map(|(_, s)| s.press_head)
            .ok_or(CalcError::PeakWindowEmpty { skip })
    }

    fn ss_var_rate(&self, p: &[TrajectorySample], csfs: f64) -> f64 {
        let part = &self.part;

        let ss_vel = mean(
            p.iter()
                .filter(|s| s.pos >= part.ss_var_start_pos_user_mm && s.pos <= part.ss_var_end_pos_user_mm)
                .map(|s| s.vel),
        )
        .unwrap_or(f64::NAN);

        let start_pos = part.ss_var_start_pos_init_mm + part.ss_var_start_pos_bias_mm;
        let p0 = first_where(p, |s| s.pos > start_pos && s.vel > part.ss_var_start_pos_gain * ss_vel)
            .unwrap_or(0);
        let end_pos = csfs - part.ss_var_end_pos_bias_mm;
        let p1 = first_where(p, |s| !(s.pos <= end_pos)).unwrap_or(0);

        let window = p.get(p0..p1).unwrap_or_default();
        let max = window.iter().map(|s| s.vel).reduce(f64::max);
        let min = window.iter().map(|s| s.vel).reduce(f64::min);

        let rate = match (max, min) {
            (Some(max), Some(min)) => SS_VAR_RATE_SCALE * (max - min) / ss_vel,
            _ => f64::NAN,
        };

        if rate.is_finite() { rate } else { SS_VAR_RATE_SATURATED }
    }
}
