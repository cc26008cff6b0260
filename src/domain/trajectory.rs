// Trajectory domain models - converted shot samples in engineering units
use serde::Serialize;

/// One converted sample: time (ms), position (mm), velocity (mm/s),
/// head and rod pressure (MPa).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrajectorySample {
    pub t: f64,
    pub pos: f64,
    pub vel: f64,
    pub press_head: f64,
    pub press_rod: f64,
}

impl TrajectorySample {
    pub fn new(t: f64, pos: f64, vel: f64, press_head: f64, press_rod: f64) -> Self {
        Self {
            t,
            pos,
            vel,
            press_head,
            press_rod,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory {
    pub shot: u32,
    pub position: Vec<TrajectorySample>,
    pub time: Vec<TrajectorySample>,
}

impl Trajectory {
    pub fn new(shot: u32, position: Vec<TrajectorySample>, time: Vec<TrajectorySample>) -> Self {
        Self {
            shot,
            position,
            time,
        }
    }

    /// Largest position across both phases.
    pub fn max_position(&self) -> Option<f64> {
        self.position
            .iter()
            .chain(self.time.iter())
            .map(|s| s.pos)
            .reduce(f64::max)
    }

    pub fn len(&self) -> usize {
        self.position.len() + self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
