// Alarm domain models - limits, states and bin classification
use serde::{Deserialize, Serialize};

use super::parameters::ParameterId;

/// Padding that keeps the bin edges strictly ordered when limits touch.
pub const RESOLUTION: f64 = 1.0e-4;
pub const RESOLUTION_H: f64 = RESOLUTION / 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    None,
    WarnLow,
    WarnHigh,
    AlarmLow,
    AlarmHigh,
    Unknown,
}

impl AlarmState {
    pub fn color(self) -> &'static str {
        match self {
            AlarmState::None => "#31A354",
            AlarmState::WarnLow | AlarmState::WarnHigh => "#FD8D3C",
            AlarmState::AlarmLow | AlarmState::AlarmHigh => "#DE2D26",
            AlarmState::Unknown => "#BDBDBD",
        }
    }

    pub fn is_alarm(self) -> bool {
        matches!(self, AlarmState::AlarmLow | AlarmState::AlarmHigh)
    }
}

/// Digital-output wire assignment per limit; 0 means no wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Wires {
    #[serde(default)]
    pub warn_low: u8,
    #[serde(default)]
    pub warn_high: u8,
    #[serde(default)]
    pub alarm_low: u8,
    #[serde(default)]
    pub alarm_high: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub target: f64,
    pub warn_low: f64,
    pub warn_high: f64,
    pub alarm_low: f64,
    pub alarm_high: f64,
    #[serde(default)]
    pub wires: Wires,
}

impl Limits {
    pub const WARN_FRACTION: f64 = 0.10;
    pub const ALARM_FRACTION: f64 = 0.20;

    /// Warn at ±10 %, alarm at ±20 % of the target.
    pub fn around(target: f64) -> Self {
        Self {
            target,
            warn_low: target * (1.0 - Self::WARN_FRACTION),
            warn_high: target * (1.0 + Self::WARN_FRACTION),
            alarm_low: target * (1.0 - Self::ALARM_FRACTION),
            alarm_high: target * (1.0 + Self::ALARM_FRACTION),
            wires: Wires::default(),
        }
    }

    pub fn default_for(id: ParameterId) -> Self {
        Self::around(id.default_target())
    }

    /// `alarm_low <= warn_low <= target <= warn_high <= alarm_high`
    pub fn is_ordered(&self) -> bool {
        self.alarm_low <= self.warn_low
            && self.warn_low <= self.target
            && self.target <= self.warn_high
            && self.warn_high <= self.alarm_high
    }

    /// Scales every threshold, used when switching unit systems.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            target: self.target * factor,
            warn_low: self.warn_low * factor,
            warn_high: self.warn_high * factor,
            alarm_low: self.alarm_low * factor,
            alarm_high: self.alarm_high * factor,
            wires: self.wires,
        }
    }

    /// Inner bin edges, right-closed: `(-inf, e0] (e0, e1] (e1, e2] (e2, e3] (e3, inf]`.
    pub fn edges(&self) -> [f64; 4] {
        [
            self.alarm_low - RESOLUTION,
            self.warn_low - RESOLUTION_H,
            self.warn_high + RESOLUTION_H,
            self.alarm_high + RESOLUTION,
        ]
    }

    pub fn classify(&self, value: f64) -> AlarmState {
        if value.is_nan() || value == f64::NEG_INFINITY {
            return AlarmState::Unknown;
        }

        let [e0, e1, e2, e3] = self.edges();
        if value <= e0 {
            AlarmState::AlarmLow
        } else if value <= e1 {
            AlarmState::WarnLow
        } else if value <= e2 {
            AlarmState::None
        } else if value <= e3 {
            AlarmState::WarnHigh
        } else {
            AlarmState::AlarmHigh
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Limits {
        Limits {
            target: 10.0,
            warn_low: 9.0,
            warn_high: 11.0,
            alarm_low: 8.0,
            alarm_high: 12.0,
            wires: Wires::default(),
        }
    }

    #[test]
    fn test_warn_low_band_edges() {
        let l = limits();
        assert!(l.alarm_low - RESOLUTION < 8.5 && 8.5 <= l.warn_low - RESOLUTION_H);
        assert_eq!(l.classify(8.5), AlarmState::WarnLow);
        assert_eq!(l.classify(9.0 - RESOLUTION_H), AlarmState::WarnLow);
        assert_eq!(l.classify(9.0), AlarmState::None);
    }

    #[test]
    fn test_limits_themselves_fall_inside_their_band() {
        let l = limits();
        assert_eq!(l.classify(8.0), AlarmState::WarnLow);
        assert_eq!(l.classify(11.0), AlarmState::None);
        assert_eq!(l.classify(12.0), AlarmState::WarnHigh);
        assert_eq!(l.classify(12.01), AlarmState::AlarmHigh);
        assert_eq!(l.classify(7.9), AlarmState::AlarmLow);
    }

    #[test]
    fn test_decreasing_value_never_skips_alarm_low() {
        let l = limits();
        let mut value = 13.0;
        let mut reached_alarm = false;
        while value > 5.0 {
            let state = l.classify(value);
            if reached_alarm {
                assert_eq!(state, AlarmState::AlarmLow);
            }
            if value < l.alarm_low - RESOLUTION {
                assert_eq!(state, AlarmState::AlarmLow);
                reached_alarm = true;
            }
            value -= 0.01;
        }
        assert!(reached_alarm);
    }

    #[test]
    fn test_adjacent_limits_keep_distinct_bins() {
        let l = Limits {
            target: 5.0,
            warn_low: 5.0,
            warn_high: 5.0,
            alarm_low: 5.0,
            alarm_high: 5.0,
            wires: Wires::default(),
        };
        assert_eq!(l.classify(5.0), AlarmState::None);
        assert_eq!(l.classify(5.0 - 0.7 * RESOLUTION), AlarmState::WarnLow);
        assert_eq!(l.classify(5.0 + 0.7 * RESOLUTION), AlarmState::WarnHigh);
    }

    #[test]
    fn test_nan_and_infinities() {
        let l = limits();
        assert_eq!(l.classify(f64::NAN), AlarmState::Unknown);
        assert_eq!(l.classify(f64::NEG_INFINITY), AlarmState::Unknown);
        assert_eq!(l.classify(f64::INFINITY), AlarmState::AlarmHigh);
    }

    #[test]
    fn test_default_limits_are_ordered() {
        for id in ParameterId::ALL {
            assert!(Limits::default_for(id).is_ordered(), "{id}");
        }
        let mut bad = limits();
        bad.warn_low = 7.0;
        assert!(!bad.is_ordered());
    }
}
