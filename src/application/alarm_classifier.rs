// Alarm classifier - limits table, per-shot bin lookup and the rolling state window
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, RwLock};
use thiserror::Error;

use crate::domain::alarm::{AlarmState, Limits};
use crate::domain::parameters::{ALARM_PARAMETERS_NUM, AlarmParameters, ParameterId, UnitSystem};
use crate::infrastructure::config::{AlarmSettings, LimitsConfig};

#[derive(Debug, Error, PartialEq)]
pub enum LimitsError {
    #[error("unknown alarm parameter '{0}'")]
    UnknownParameter(String),
    #[error("unknown unit system '{0}'")]
    UnknownUnitSystem(String),
    #[error("limits for {0} are not ordered alarm_low <= warn_low <= target <= warn_high <= alarm_high")]
    OutOfOrder(ParameterId),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterState {
    pub parameter: ParameterId,
    /// Value in the unit system active when classified.
    pub value: f64,
    pub state: AlarmState,
    pub color: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShotClassification {
    pub shot: u32,
    pub unit_system: UnitSystem,
    pub states: Vec<ParameterState>,
    #[serde(skip)]
    source: AlarmParameters,
}

impl ShotClassification {
    pub fn state(&self, id: ParameterId) -> AlarmState {
        self.states[id.index()].state
    }

    pub fn has_alarm(&self) -> bool {
        self.states.iter().any(|s| s.state.is_alarm())
    }

    /// One line per parameter in an alarm band, lows before highs.
    pub fn notification_lines(&self) -> Vec<String> {
        let states = &self.states;
        [
            (AlarmState::AlarmLow, "low alarm"),
            (AlarmState::AlarmHigh, "high alarm"),
        ]
        .into_iter()
        .flat_map(move |(wanted, label)| {
            states
                .iter()
                .filter(move |s| s.state == wanted)
                .map(move |s| format!("<{}>: {}", s.parameter.description(), label))
        })
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterLimits {
    pub parameter: ParameterId,
    pub description: &'static str,
    pub unit: &'static str,
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimitsSnapshot {
    pub unit_system: UnitSystem,
    pub parameters: Vec<ParameterLimits>,
}

/// Limits held in the active unit system.
#[derive(Debug, Clone)]
struct LimitsTable {
    units: UnitSystem,
    limits: [Limits; ALARM_PARAMETERS_NUM],
}

impl LimitsTable {
    fn defaults(units: UnitSystem) -> Self {
        Self {
            units,
            limits: ParameterId::ALL.map(|id| Limits::default_for(id).scaled(id.conversion(units))),
        }
    }

    fn classify(&self, row: &AlarmParameters) -> ShotClassification {
        let states = ParameterId::ALL
            .into_iter()
            .map(|id| {
                let value = row.get(id) * id.conversion(self.units);
                let state = self.limits[id.index()].classify(value);
                ParameterState {
                    parameter: id,
                    value,
                    state,
                    color: state.color(),
                }
            })
            .collect();

        ShotClassification {
            shot: row.shot,
            unit_system: self.units,
            states,
            source: *row,
        }
    }
}

pub struct AlarmClassifier {
    table: RwLock<LimitsTable>,
    window: Mutex<VecDeque<ShotClassification>>,
    window_shots: usize,
}

impl AlarmClassifier {
    pub fn new(settings: &AlarmSettings) -> Self {
        Self {
            table: RwLock::new(LimitsTable::defaults(settings.unit_system)),
            window: Mutex::new(VecDeque::with_capacity(settings.window_shots)),
            window_shots: settings.window_shots,
        }
    }

    /// Builds the classifier and applies operator limits from file. Bad
    /// entries are logged and skipped.
    pub fn with_limits(settings: &AlarmSettings, file: &LimitsConfig) -> Self {
        let classifier = Self::new(settings);
        for (name, limits) in &file.limits {
            if let Err(e) = classifier.apply_by_name(name, *limits) {
                tracing::warn!(parameter = %name, error = %e, "configured limits ignored");
            }
        }
        classifier
    }

    pub fn unit_system(&self) -> UnitSystem {
        self.read_table().units
    }

    /// Replaces the limits of one parameter. Out-of-order limits are
    /// rejected and the current limits stay in force.
    pub fn apply(&self, id: ParameterId, limits: Limits) -> Result<(), LimitsError> {
        if !limits.is_ordered() {
            tracing::warn!(parameter = %id, ?limits, "rejecting out-of-order limits");
            return Err(LimitsError::OutOfOrder(id));
        }

        self.write_table().limits[id.index()] = limits;
        tracing::info!(parameter = %id, ?limits, "limits applied");
        self.reclassify_window();
        Ok(())
    }

    pub fn apply_by_name(&self, name: &str, limits: Limits) -> Result<(), LimitsError> {
        let id = name.parse::<ParameterId>().map_err(|name| {
            tracing::warn!(parameter = %name, "unknown alarm parameter");
            LimitsError::UnknownParameter(name)
        })?;
        self.apply(id, limits)
    }

    /// Switches the display unit system, rescaling every limit.
    pub fn set_unit_system(&self, name: &str) -> Result<(), LimitsError> {
        let units = name.parse::<UnitSystem>().map_err(|name| {
            tracing::warn!(unit_system = %name, "unknown unit system");
            LimitsError::UnknownUnitSystem(name)
        })?;

        {
            let mut table = self.write_table();
            if table.units == units {
                return Ok(());
            }
            let from = table.units;
            for id in ParameterId::ALL {
                let factor = id.conversion(units) / id.conversion(from);
                table.limits[id.index()] = table.limits[id.index()].scaled(factor);
            }
            table.units = units;
        }

        tracing::info!(?units, "unit system changed");
        self.reclassify_window();
        Ok(())
    }

    pub fn limits(&self) -> LimitsSnapshot {
        let table = self.read_table();
        LimitsSnapshot {
            unit_system: table.units,
            parameters: ParameterId::ALL
                .into_iter()
                .map(|id| ParameterLimits {
                    parameter: id,
                    description: id.description(),
                    unit: id.unit(table.units),
                    limits: table.limits[id.index()],
                })
                .collect(),
        }
    }

    pub fn classify(&self, row: &AlarmParameters) -> ShotClassification {
        self.read_table().classify(row)
    }

    /// Classifies the newest shot and pushes it into the rolling window.
    pub fn record(&self, row: &AlarmParameters) -> ShotClassification {
        // lock order: window, then table
        let mut window = self.lock_window();
        let classification = self.read_table().classify(row);
        window.push_back(classification.clone());
        while window.len() > self.window_shots {
            window.pop_front();
        }

        classification
    }

    /// Oldest first.
    pub fn window(&self) -> Vec<ShotClassification> {
        self.lock_window().iter().cloned().collect()
    }

    fn reclassify_window(&self) {
        let mut window = self.lock_window();
        let table = self.read_table().clone();
        for entry in window.iter_mut() {
            *entry = table.classify(&entry.source);
        }
    }

    // A poisoned lock still holds a consistent table; keep serving it.
    fn read_table(&self) -> std::sync::RwLockReadGuard<'_, LimitsTable> {
        self.table.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_table(&self) -> std::sync::RwLockWriteGuard<'_, LimitsTable> {
        self.table.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_window(&self) -> std::sync::MutexGuard<'_, VecDeque<ShotClassification>> {
        self.window.lock().unwrap_or_else(|e| e.into_inner())
    }
}
