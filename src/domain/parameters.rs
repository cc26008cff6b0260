// Alarm parameter domain models
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MM_TO_IN: f64 = 1.0 / 25.4;
pub const MPA_TO_PSI: f64 = 145.037_738_007_22;

pub const ALARM_PARAMETERS_NUM: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    #[default]
    Si,
    /// British gravitational (in, psi)
    Bg,
}

impl FromStr for UnitSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "si" => Ok(UnitSystem::Si),
            "bg" => Ok(UnitSystem::Bg),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterId {
    FillTime,
    SsVelAvg,
    FsVelAvg,
    BiscuitSize,
    IntensSqueezeDist,
    IntensRiseTime,
    Csfs,
    CycleTime,
    PeakIntensPress,
    SsVarRate,
}

enum Dimension {
    Time,
    Velocity,
    Length,
    Pressure,
    Ratio,
}

impl ParameterId {
    /// Calculation and display order.
    pub const ALL: [ParameterId; ALARM_PARAMETERS_NUM] = [
        ParameterId::FillTime,
        ParameterId::SsVelAvg,
        ParameterId::FsVelAvg,
        ParameterId::BiscuitSize,
        ParameterId::IntensSqueezeDist,
        ParameterId::IntensRiseTime,
        ParameterId::Csfs,
        ParameterId::CycleTime,
        ParameterId::PeakIntensPress,
        ParameterId::SsVarRate,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            ParameterId::FillTime => "fill_time",
            ParameterId::SsVelAvg => "ss_vel_avg",
            ParameterId::FsVelAvg => "fs_vel_avg",
            ParameterId::BiscuitSize => "biscuit_size",
            ParameterId::IntensSqueezeDist => "intens_squeeze_dist",
            ParameterId::IntensRiseTime => "intens_rise_time",
            ParameterId::Csfs => "csfs",
            ParameterId::CycleTime => "cycle_time",
            ParameterId::PeakIntensPress => "peak_intens_press",
            ParameterId::SsVarRate => "ss_var_rate",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ParameterId::FillTime => "Fill Time",
            ParameterId::SsVelAvg => "Average Slow Shot Velocity",
            ParameterId::FsVelAvg => "Average Fast Shot Velocity",
            ParameterId::BiscuitSize => "Biscuit Size",
            ParameterId::IntensSqueezeDist => "Intensification Squeeze Distance",
            ParameterId::IntensRiseTime => "Intensification Rise Time",
            ParameterId::Csfs => "Calculated Start of Fast Shot",
            ParameterId::CycleTime => "Cycle Time",
            ParameterId::PeakIntensPress => "Peak Intensification Pressure",
            ParameterId::SsVarRate => "Slow Shot Variation Rate",
        }
    }

    fn dimension(self) -> Dimension {
        match self {
            ParameterId::FillTime | ParameterId::IntensRiseTime | ParameterId::CycleTime => {
                Dimension::Time
            }
            ParameterId::SsVelAvg | ParameterId::FsVelAvg => Dimension::Velocity,
            ParameterId::BiscuitSize | ParameterId::IntensSqueezeDist | ParameterId::Csfs => {
                Dimension::Length
            }
            ParameterId::PeakIntensPress => Dimension::Pressure,
            ParameterId::SsVarRate => Dimension::Ratio,
        }
    }

    pub fn unit(self, units: UnitSystem) -> &'static str {
        match (self.dimension(), units) {
            (Dimension::Time, _) if self == ParameterId::CycleTime => "s",
            (Dimension::Time, _) => "ms",
            (Dimension::Velocity, UnitSystem::Si) => "mm/s",
            (Dimension::Velocity, UnitSystem::Bg) => "in/s",
            (Dimension::Length, UnitSystem::Si) => "mm",
            (Dimension::Length, UnitSystem::Bg) => "in",
            (Dimension::Pressure, UnitSystem::Si) => "MPa",
            (Dimension::Pressure, UnitSystem::Bg) => "psi",
            (Dimension::Ratio, _) => "",
        }
    }

    /// Factor taking an SI value into `units`.
    pub fn conversion(self, units: UnitSystem) -> f64 {
        match (self.dimension(), units) {
            (_, UnitSystem::Si) => 1.0,
            (Dimension::Velocity | Dimension::Length, UnitSystem::Bg) => MM_TO_IN,
            (Dimension::Pressure, UnitSystem::Bg) => MPA_TO_PSI,
            (Dimension::Time | Dimension::Ratio, UnitSystem::Bg) => 1.0,
        }
    }

    /// Default in-range target, SI units.
    pub fn default_target(self) -> f64 {
        match self {
            ParameterId::FillTime => 25.0,
            ParameterId::SsVelAvg => 400.0,
            ParameterId::FsVelAvg => 4500.0,
            ParameterId::BiscuitSize => 28.0,
            ParameterId::IntensSqueezeDist => 28.0,
            ParameterId::IntensRiseTime => 225.0,
            ParameterId::Csfs => 444.5,
            ParameterId::CycleTime => 15.0,
            ParameterId::PeakIntensPress => 27.58,
            ParameterId::SsVarRate => 5.0,
        }
    }
}

impl fmt::Display for ParameterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ParameterId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ParameterId::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// The ten derived parameters of one shot, SI units. A parameter whose
/// derivation failed holds NaN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AlarmParameters {
    pub shot: u32,
    pub fill_time: f64,
    pub ss_vel_avg: f64,
    pub fs_vel_avg: f64,
    pub biscuit_size: f64,
    pub intens_squeeze_dist: f64,
    pub intens_rise_time: f64,
    pub csfs: f64,
    pub cycle_time: f64,
    pub peak_intens_press: f64,
    pub ss_var_rate: f64,
}

impl AlarmParameters {
    pub fn from_values(shot: u32, v: [f64; ALARM_PARAMETERS_NUM]) -> Self {
        Self {
            shot,
            fill_time: v[0],
            ss_vel_avg: v[1],
            fs_vel_avg: v[2],
            biscuit_size: v[3],
            intens_squeeze_dist: v[4],
            intens_rise_time: v[5],
            csfs: v[6],
            cycle_time: v[7],
            peak_intens_press: v[8],
            ss_var_rate: v[9],
        }
    }

    pub fn values(&self) -> [f64; ALARM_PARAMETERS_NUM] {
        [
            self.fill_time,
            self.ss_vel_avg,
            self.fs_vel_avg,
            self.biscuit_size,
            self.intens_squeeze_dist,
            self.intens_rise_time,
            self.csfs,
            self.cycle_time,
            self.peak_intens_press,
            self.ss_var_rate,
        ]
    }

    pub fn get(&self, id: ParameterId) -> f64 {
        self.values()[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_order_matches_values() {
        let row = AlarmParameters::from_values(7, [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        for id in ParameterId::ALL {
            assert_eq!(row.get(id), id.index() as f64);
        }
        assert_eq!(row.csfs, 6.0);
    }

    #[test]
    fn test_parameter_names_parse() {
        assert_eq!("intens_rise_time".parse(), Ok(ParameterId::IntensRiseTime));
        assert!("bogus".parse::<ParameterId>().is_err());
    }

    #[test]
    fn test_unit_conversions() {
        assert_eq!(ParameterId::BiscuitSize.conversion(UnitSystem::Bg), MM_TO_IN);
        assert_eq!(ParameterId::PeakIntensPress.unit(UnitSystem::Bg), "psi");
        assert_eq!(ParameterId::CycleTime.unit(UnitSystem::Si), "s");
        assert_eq!(ParameterId::FillTime.conversion(UnitSystem::Bg), 1.0);
        assert_eq!("BG".parse(), Ok(UnitSystem::Bg));
        assert!("imperial".parse::<UnitSystem>().is_err());
    }
}
