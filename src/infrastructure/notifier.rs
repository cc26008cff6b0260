// Log-backed notification and observer adapters
use crate::application::alarm_classifier::ShotClassification;
use crate::application::shot_repository::{AlarmNotifier, CommandObserver, ShotListener};
use crate::domain::parameters::{AlarmParameters, ParameterId, UnitSystem};
use crate::domain::shot::CompletedShot;
use async_trait::async_trait;

/// Emits alarm lines to the log in place of e-mail/SMS delivery.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl AlarmNotifier for LogNotifier {
    async fn push(&self, lines: &[String]) -> anyhow::Result<()> {
        for line in lines {
            tracing::warn!(alert = %line, "alarm");
        }
        Ok(())
    }
}

/// Debug summary of every calculated shot.
#[derive(Debug, Default)]
pub struct ShotSummaryLog;

pub fn summary_lines(parameters: &AlarmParameters, units: UnitSystem) -> Vec<String> {
    ParameterId::ALL
        .into_iter()
        .map(|id| {
            let value = parameters.get(id) * id.conversion(units);
            format!("{:<34}{:>10.2} {}", id.description(), value, id.unit(units))
                .trim_end()
                .to_string()
        })
        .collect()
}

impl ShotListener for ShotSummaryLog {
    fn shot_completed(&self, shot: &CompletedShot) {
        tracing::info!(
            shot = shot.meta.shot,
            samples = shot.trajectory.len(),
            events = shot.events.len(),
            "shot completed"
        );
    }

    fn parameters_updated(&self, parameters: &AlarmParameters, classification: &ShotClassification) {
        if !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }
        for line in summary_lines(parameters, classification.unit_system) {
            tracing::debug!(shot = parameters.shot, "{}", line);
        }
    }
}

#[derive(Debug, Default)]
pub struct CommandLog;

impl CommandObserver for CommandLog {
    fn command_sent(&self, command: &str) {
        tracing::info!(bytes = command.len(), command = command.trim_end(), "send data");
    }
}
