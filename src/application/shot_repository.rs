// Collaborator traits for shot persistence, alarm notification and pipeline observers
use crate::application::alarm_classifier::ShotClassification;
use crate::domain::parameters::AlarmParameters;
use crate::domain::shot::CompletedShot;
use async_trait::async_trait;

#[async_trait]
pub trait ShotRepository: Send + Sync {
    /// Highest shot number already stored, used to continue numbering
    async fn last_shot_number(&self) -> anyhow::Result<Option<u32>>;

    /// Append one processed shot (metadata, trajectory, events, parameters)
    async fn save_shot(&self, shot: &CompletedShot) -> anyhow::Result<()>;
}

/// Receives the free-text alarm lines of a shot that landed in an alarm band.
#[async_trait]
pub trait AlarmNotifier: Send + Sync {
    async fn push(&self, lines: &[String]) -> anyhow::Result<()>;
}

/// Observer of pipeline output.
pub trait ShotListener: Send + Sync {
    fn shot_completed(&self, shot: &CompletedShot);

    fn parameters_updated(&self, parameters: &AlarmParameters, classification: &ShotClassification);
}

/// Observer of every command written to the board.
pub trait CommandObserver: Send + Sync {
    fn command_sent(&self, command: &str);
}

/// Repository used when no persistence backend is configured.
#[derive(Debug, Default)]
pub struct DiscardingRepository;

#[async_trait]
impl ShotRepository for DiscardingRepository {
    async fn last_shot_number(&self) -> anyhow::Result<Option<u32>> {
        Ok(None)
    }

    async fn save_shot(&self, shot: &CompletedShot) -> anyhow::Result<()> {
        tracing::debug!(shot = shot.meta.shot, "no repository configured, shot not persisted");
        Ok(())
    }
}
