// Monitor service - socket reader loop, heartbeat task and per-shot processing
use crate::application::alarm_classifier::AlarmClassifier;
use crate::application::monitor_session::{MonitorSession, SessionAction};
use crate::application::parameter_calculator::ParameterCalculator;
use crate::application::shot_converter::ShotConverter;
use crate::application::shot_repository::{AlarmNotifier, ShotListener, ShotRepository};
use crate::domain::protocol::{ConnectionState, Message};
use crate::domain::shot::{CompletedShot, SealedShot};
use crate::infrastructure::config::BoardSettings;
use crate::infrastructure::transport::{BoardClient, BoardLink, Heartbeat};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

const SHOT_QUEUE_LEN: usize = 16;

pub struct MonitorService {
    session: Arc<MonitorSession>,
    converter: ShotConverter,
    calculator: ParameterCalculator,
    classifier: Arc<AlarmClassifier>,
    repository: Arc<dyn ShotRepository>,
    notifier: Arc<dyn AlarmNotifier>,
    listeners: Vec<Arc<dyn ShotListener>>,
}

impl MonitorService {
    pub fn new(
        session: Arc<MonitorSession>,
        converter: ShotConverter,
        calculator: ParameterCalculator,
        classifier: Arc<AlarmClassifier>,
        repository: Arc<dyn ShotRepository>,
        notifier: Arc<dyn AlarmNotifier>,
        listeners: Vec<Arc<dyn ShotListener>>,
    ) -> Self {
        Self {
            session,
            converter,
            calculator,
            classifier,
            repository,
            notifier,
            listeners,
        }
    }

    /// Converts, calculates, classifies, persists and notifies one shot.
    /// A shot that cannot be converted or calculated is skipped.
    pub async fn process_shot(&self, sealed: SealedShot) -> Option<CompletedShot> {
        let SealedShot {
            meta,
            position,
            time,
            events,
        } = sealed;
        let shot = meta.shot;

        let trajectory = match self.converter.convert(shot, &position, &time) {
            Ok(trajectory) => trajectory,
            Err(e) => {
                tracing::error!(shot, error = %e, "shot conversion failed, shot skipped");
                return None;
            }
        };

        let previous_t0 = self.session.previous_t0(shot);
        let calculation = match self.calculator.calculate(&trajectory, meta.t0, previous_t0) {
            Ok(calculation) => calculation,
            Err(e) => {
                tracing::error!(shot, error = %e, "parameter calculation failed, shot skipped");
                return None;
            }
        };

        let parameters = calculation.parameters;
        let classification = self.classifier.record(&parameters);
        let completed = CompletedShot {
            meta,
            trajectory,
            events,
            parameters,
        };

        self.session.record_completed(completed.clone());
        for listener in &self.listeners {
            listener.shot_completed(&completed);
            listener.parameters_updated(&parameters, &classification);
        }

        if let Err(e) = self.repository.save_shot(&completed).await {
            tracing::error!(shot, error = ?e, "failed to persist shot");
        }

        if classification.has_alarm() {
            let lines = classification.notification_lines();
            if let Err(e) = self.notifier.push(&lines).await {
                tracing::error!(shot, error = ?e, "failed to push alarm notification");
            }
        }

        Some(completed)
    }

    async fn process_loop(self: Arc<Self>, mut rx: mpsc::Receiver<SealedShot>) {
        while let Some(sealed) = rx.recv().await {
            self.process_shot(sealed).await;
        }
    }

    async fn dispatch(&self, message: Message, link: &BoardLink, shots: &mpsc::Sender<SealedShot>) {
        for action in self.session.handle_message(message, Utc::now()) {
            match action {
                SessionAction::Send(command) => {
                    if let Err(e) = link.send(&command).await {
                        tracing::warn!(error = %e, "command not sent");
                    }
                }
                SessionAction::ShotSealed(sealed) => {
                    if shots.send(sealed).await.is_err() {
                        tracing::error!("shot processing task stopped");
                    }
                }
            }
        }
    }

    /// Heartbeat for one connection; aborted when that connection ends.
    fn spawn_heartbeat(
        link: Arc<BoardLink>,
        settings: &BoardSettings,
        reset: Arc<Notify>,
    ) -> JoinHandle<()> {
        let period = Duration::from_millis(settings.heartbeat_period_ms);
        let miss_limit = settings.heartbeat_miss_limit;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if matches!(
                    link.state(),
                    ConnectionState::NotConnected | ConnectionState::NotMonitored
                ) {
                    continue;
                }
                if link.heartbeat(period, miss_limit).await == Heartbeat::ResetRequested {
                    reset.notify_one();
                    break;
                }
            }
        })
    }

    /// Runs the board connection for the lifetime of the process. Losing the
    /// board never ends the loop; it reconnects once per heartbeat period.
    pub async fn run(self: Arc<Self>, mut client: BoardClient, settings: BoardSettings) {
        let link = client.link();
        let (tx, rx) = mpsc::channel(SHOT_QUEUE_LEN);

        tokio::spawn(self.clone().process_loop(rx));

        let reconnect_delay = Duration::from_millis(settings.heartbeat_period_ms);
        let mut connected = false;
        loop {
            if !connected {
                if let Err(e) = client.connect().await {
                    tracing::error!(error = %e, "board connection down");
                    tokio::time::sleep(reconnect_delay).await;
                    continue;
                }
            }

            let reset = Arc::new(Notify::new());
            let heartbeat = Self::spawn_heartbeat(link.clone(), &settings, reset.clone());

            for command in MonitorSession::handshake_commands() {
                if let Err(e) = link.send(&command).await {
                    tracing::warn!(error = %e, "handshake command not sent");
                }
            }

            loop {
                tokio::select! {
                    received = client.receive() => match received {
                        Ok(message) => self.dispatch(message, &link, &tx).await,
                        Err(e) => {
                            tracing::warn!(error = %e, "receive failed, resetting connection");
                            break;
                        }
                    },
                    _ = reset.notified() => {
                        tracing::warn!("heartbeat requested a connection reset");
                        break;
                    }
                }
            }

            heartbeat.abort();
            self.session.connection_reset();
            connected = match client.reset().await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(error = %e, "board connection down");
                    tokio::time::sleep(reconnect_delay).await;
                    false
                }
            };
        }
    }
}
