// Shot converter - raw board samples to engineering-unit trajectories
use thiserror::Error;

use crate::domain::protocol::{Phase, RawSample};
use crate::domain::trajectory::{Trajectory, TrajectorySample};
use crate::infrastructure::config::{AdChannelConfig, AdMode, ChannelSettings, MachineSettings};

/// Velocity-counter clock of the position/velocity unit, Hz.
pub const PVU_CLOCK: f64 = 100.0e6 / 3.0;
pub const QUAD_COUNTS_PER_SEC: f64 = PVU_CLOCK / 2.0;

/// Leading samples of each phase that are firmware start-index artifacts.
pub const ARTIFACT_SAMPLES: usize = 2;

/// Quadrature x4 decoding.
const QUADRATURE_EDGES: f64 = 4.0;

#[derive(Debug, Error, PartialEq)]
pub enum ConvertError {
    #[error("no usable {} samples after dropping the first {}", .0.tag(), ARTIFACT_SAMPLES)]
    EmptyPhase(Phase),
}

/// Drops the leading artifact samples of one phase.
pub fn trim(samples: &[RawSample]) -> &[RawSample] {
    samples.get(ARTIFACT_SAMPLES..).unwrap_or_default()
}

/// A/D counts to engineering units for one calibrated channel.
pub fn ad_calc(raw: u16, channel: &AdChannelConfig) -> f64 {
    let gain = (channel.eu_max - channel.eu_min) / channel.resolution;
    match channel.mode {
        AdMode::Unsigned => gain * f64::from(raw) + channel.eu_min,
        AdMode::Signed => gain * f64::from(raw as i16) + (channel.eu_min + channel.eu_max) / 2.0,
    }
}

#[derive(Debug, Clone)]
pub struct ShotConverter {
    rod_pitch_mm: f64,
    press_head: AdChannelConfig,
    press_rod: AdChannelConfig,
}

impl ShotConverter {
    pub fn new(machine: &MachineSettings, channels: &ChannelSettings) -> Self {
        Self {
            rod_pitch_mm: machine.rod_pitch_mm,
            press_head: channels.press_head.clone(),
            press_rod: channels.press_rod.clone(),
        }
    }

    /// Converts both phases of one shot. Artifact samples are dropped here,
    /// so callers pass the samples exactly as reassembled.
    pub fn convert(
        &self,
        shot: u32,
        position: &[RawSample],
        time: &[RawSample],
    ) -> Result<Trajectory, ConvertError> {
        let position = trim(position);
        let time = trim(time);

        let last_p = position
            .last()
            .ok_or(ConvertError::EmptyPhase(Phase::Position))?;

        let p = self.convert_position(position);
        let t = self.convert_time(time, last_p.one_ms_timer);
        Ok(Trajectory::new(shot, p, t))
    }

    pub fn position_mm(&self, raw: i32) -> f64 {
        f64::from(raw) * self.rod_pitch_mm / QUADRATURE_EDGES
    }

    fn pressures(&self, sample: &RawSample) -> (f64, f64) {
        (
            ad_calc(sample.analog[self.press_head.channel], &self.press_head),
            ad_calc(sample.analog[self.press_rod.channel], &self.press_rod),
        )
    }

    fn convert_position(&self, samples: &[RawSample]) -> Vec<TrajectorySample> {
        let mut out = Vec::with_capacity(samples.len());
        let mut prev: Option<&RawSample> = None;

        for s in samples {
            let pos = self.position_mm(s.position);
            let vel = match prev {
                Some(p) => {
                    let counts = s.vel_count[0].wrapping_sub(p.vel_count[0]);
                    if counts == 0 {
                        0.0
                    } else {
                        (pos - self.position_mm(p.position)) * QUAD_COUNTS_PER_SEC / f64::from(counts)
                    }
                }
                None => 0.0,
            };
            let (head, rod) = self.pressures(s);
            out.push(TrajectorySample::new(f64::from(s.one_ms_timer), pos, vel, head, rod));
            prev = Some(s);
        }

        out
    }

    fn convert_time(&self, samples: &[RawSample], t_base: u32) -> Vec<TrajectorySample> {
        samples
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let t = if i == 0 {
                    0.0
                } else {
                    f64::from(s.one_ms_timer) - f64::from(t_base)
                };
                let (head, rod) = self.pressures(s);
                TrajectorySample::new(t, self.position_mm(s.position), 0.0, head, rod)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(timer: u32, position: i32, vel_count: u32, head: u16) -> RawSample {
        RawSample {
            analog: [head, 100, 0, 0, 0, 0, 0, 0],
            vel_count: [vel_count, 0, 0, 0],
            one_ms_timer: timer,
            position,
            ..Default::default()
        }
    }

    fn converter() -> ShotConverter {
        let machine = MachineSettings {
            rod_pitch_mm: 4.0,
            ..Default::default()
        };
        let mut channels = ChannelSettings::default();
        channels.press_head.eu_min = 0.0;
        channels.press_head.eu_max = 100.0;
        channels.press_head.resolution = 1000.0;
        channels.press_rod = channels.press_head.clone();
        channels.press_rod.channel = 1;
        ShotConverter::new(&machine, &channels)
    }

    #[test]
    fn test_artifacts_trimmed_exactly_once() {
        let c = converter();
        let raw: Vec<RawSample> = (0..6).map(|i| sample(i, i as i32 * 10, i * 100, 0)).collect();

        let once = c.convert(1, &raw, &[]).unwrap();
        assert_eq!(once.position.len(), 4);
        assert_eq!(once.position[0].pos, 20.0);

        // already-trimmed input loses two more samples
        let twice = c.convert(1, trim(&raw), &[]).unwrap();
        assert_eq!(twice.position.len(), 2);
        assert_ne!(once, twice);
    }

    #[test]
    fn test_position_and_velocity() {
        let c = converter();
        let raw = vec![
            sample(0, 0, 0, 0),
            sample(1, 0, 0, 0),
            sample(10, 4, 1000, 0),
            sample(11, 8, 1000 + QUAD_COUNTS_PER_SEC as u32 / 1000, 0),
            sample(12, 8, 1000 + QUAD_COUNTS_PER_SEC as u32 / 1000, 0),
        ];
        let tr = c.convert(2, &raw, &[]).unwrap();
        // pitch 4 mm, quadrature x4: one count per mm
        assert_eq!(tr.position[0].pos, 4.0);
        assert_eq!(tr.position[0].vel, 0.0);
        // 4 mm in 1 ms worth of counts
        assert!((tr.position[1].vel - 4000.0).abs() < 1.0);
        // no counter movement
        assert_eq!(tr.position[2].vel, 0.0);
        assert_eq!(tr.position[0].t, 10.0);
    }

    #[test]
    fn test_velocity_counter_wraps() {
        let c = converter();
        let raw = vec![
            sample(0, 0, 0, 0),
            sample(0, 0, 0, 0),
            sample(1, 0, u32::MAX - 9, 0),
            sample(2, 4, 10, 0),
        ];
        let tr = c.convert(3, &raw, &[]).unwrap();
        assert!((tr.position[1].vel - 4.0 * QUAD_COUNTS_PER_SEC / 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_time_phase_rebased_to_position_end() {
        let c = converter();
        let p: Vec<RawSample> = (0..4).map(|i| sample(100 + i, i as i32, i * 10, 0)).collect();
        let t = vec![
            sample(0, 0, 0, 0),
            sample(0, 0, 0, 0),
            sample(104, 3, 0, 500),
            sample(105, 4, 0, 500),
            sample(110, 5, 0, 1000),
        ];
        let tr = c.convert(4, &p, &t).unwrap();
        assert_eq!(tr.time.len(), 3);
        assert_eq!(tr.time[0].t, 0.0);
        assert_eq!(tr.time[1].t, 2.0);
        assert_eq!(tr.time[2].t, 7.0);
        assert!(tr.time.iter().all(|s| s.vel == 0.0));
        assert_eq!(tr.time[2].press_head, 100.0);
        assert_eq!(tr.time[0].press_rod, 10.0);
    }

    #[test]
    fn test_empty_position_phase() {
        let c = converter();
        let raw = vec![sample(0, 0, 0, 0), sample(1, 0, 0, 0)];
        assert_eq!(
            c.convert(5, &raw, &raw),
            Err(ConvertError::EmptyPhase(Phase::Position))
        );
    }

    #[test]
    fn test_ad_calc_modes() {
        let unsigned = AdChannelConfig {
            eu_min: 10.0,
            eu_max: 20.0,
            resolution: 100.0,
            ..Default::default()
        };
        assert_eq!(ad_calc(0, &unsigned), 10.0);
        assert_eq!(ad_calc(50, &unsigned), 15.0);

        let signed = AdChannelConfig {
            mode: AdMode::Signed,
            eu_min: -10.0,
            eu_max: 10.0,
            resolution: 65535.0,
            ..Default::default()
        };
        assert_eq!(ad_calc(0, &signed), 0.0);
        assert!(ad_calc(0xFFFF, &signed) < 0.0);
    }
}
