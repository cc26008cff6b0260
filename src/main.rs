// Main entry point - Dependency injection and server setup
mod domain;
mod application;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};
use anyhow::Context;
use axum::{routing::{get, post}, Router};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::alarm_classifier::AlarmClassifier;
use crate::application::monitor_service::MonitorService;
use crate::application::monitor_session::{MonitorSession, SessionSettings};
use crate::application::parameter_calculator::ParameterCalculator;
use crate::application::shot_converter::ShotConverter;
use crate::application::shot_repository::{
    CommandObserver, DiscardingRepository, ShotListener, ShotRepository,
};
use crate::infrastructure::config::{load_limits_config, load_monitor_config};
use crate::infrastructure::influx_repository::InfluxRepository;
use crate::infrastructure::notifier::{CommandLog, LogNotifier, ShotSummaryLog};
use crate::infrastructure::transport::BoardClient;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    apply_limits, board_status, get_limits, get_shot, health_check, latest_shot, list_alarms,
    list_parameters, set_unit_system,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = load_monitor_config()?;
    let limits = load_limits_config()?;

    // Create repository (infrastructure layer)
    let repository: Arc<dyn ShotRepository> = match config.influx.clone() {
        Some(influx) => Arc::new(InfluxRepository::new(influx)),
        None => {
            tracing::info!("no influx configured, shots are not persisted");
            Arc::new(DiscardingRepository)
        }
    };

    let last_shot = match repository.last_shot_number().await {
        Ok(last) => last.unwrap_or(0),
        Err(e) => {
            tracing::error!(error = %e, "could not read last shot number, starting at 0");
            0
        }
    };
    tracing::info!(last_shot, "resuming shot numbering");

    // Create services (application layer)
    let session = Arc::new(MonitorSession::new(
        SessionSettings {
            input_bitmask: config.board.input_bitmask,
            history_shots: config.alarm.history_shots,
        },
        last_shot,
    ));
    let classifier = Arc::new(AlarmClassifier::with_limits(&config.alarm, &limits));
    let converter = ShotConverter::new(&config.machine, &config.channels);
    let calculator = ParameterCalculator::new(config.part.clone(), config.machine.clone());
    let listeners: Vec<Arc<dyn ShotListener>> = vec![Arc::new(ShotSummaryLog)];

    let service = Arc::new(MonitorService::new(
        session.clone(),
        converter,
        calculator,
        classifier.clone(),
        repository,
        Arc::new(LogNotifier),
        listeners,
    ));

    let observer: Arc<dyn CommandObserver> = Arc::new(CommandLog);
    let client = BoardClient::new(config.board.clone(), Some(observer));
    let link = client.link();
    tokio::spawn(service.run(client, config.board.clone()));

    // Create application state
    let state = Arc::new(AppState {
        session,
        classifier,
        link,
    });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/board", get(board_status))
        .route("/shots/latest", get(latest_shot))
        .route("/shots/:shot", get(get_shot))
        .route("/parameters", get(list_parameters))
        .route("/alarms", get(list_alarms))
        .route("/limits", get(get_limits))
        .route("/limits/:parameter", post(apply_limits))
        .route("/units/:system", post(set_unit_system))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid server.bind {}", config.server.bind))?;
    tracing::info!(%addr, board = %config.board.host, "starting fastrak monitor");

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router).await?;

    Ok(())
}
