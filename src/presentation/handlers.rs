// HTTP request handlers
use crate::application::alarm_classifier::LimitsError;
use crate::application::monitor_session::BoardInfo;
use crate::domain::alarm::Limits;
use crate::domain::board_event::BoardEvent;
use crate::domain::protocol::{BinType, ConnectionState};
use crate::presentation::app_state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
pub struct RealtimeSummary {
    pub kind: BinType,
    pub t: DateTime<Utc>,
    pub len: usize,
}

#[derive(Serialize)]
pub struct BoardStatus {
    pub state: ConnectionState,
    pub missed_heartbeats: u32,
    pub last_shot: u32,
    pub info: BoardInfo,
    pub realtime: Vec<RealtimeSummary>,
    pub recent_events: Vec<(DateTime<Utc>, BoardEvent)>,
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn limits_error(e: LimitsError) -> Response {
    let status = match e {
        LimitsError::UnknownParameter(_) | LimitsError::UnknownUnitSystem(_) => StatusCode::NOT_FOUND,
        LimitsError::OutOfOrder(_) => StatusCode::UNPROCESSABLE_ENTITY,
    };
    error_response(status, e.to_string())
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Link state and what the board has reported about itself
pub async fn board_status(State(state): State<Arc<AppState>>) -> Json<BoardStatus> {
    let realtime = state
        .session
        .realtime()
        .into_iter()
        .map(|f| RealtimeSummary {
            kind: f.kind,
            t: f.t,
            len: f.data.len(),
        })
        .collect();

    Json(BoardStatus {
        state: state.link.state(),
        missed_heartbeats: state.link.missed_heartbeats(),
        last_shot: state.session.last_shot_number(),
        info: state.session.board_info(),
        realtime,
        recent_events: state.session.recent_events(),
    })
}

pub async fn latest_shot(State(state): State<Arc<AppState>>) -> Response {
    match state.session.latest_shot() {
        Some(shot) => Json(shot).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "no shot completed yet".to_string()),
    }
}

pub async fn get_shot(Path(shot): Path<u32>, State(state): State<Arc<AppState>>) -> Response {
    match state.session.shot(shot) {
        Some(shot) => Json(shot).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("shot {} not in history", shot)),
    }
}

/// Parameter rows of the retained shots, oldest first
pub async fn list_parameters(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.session.parameters())
}

/// Rolling alarm-state window
pub async fn list_alarms(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.classifier.window())
}

pub async fn get_limits(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.classifier.limits())
}

/// Operator apply of one parameter's limits
pub async fn apply_limits(
    Path(parameter): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(limits): Json<Limits>,
) -> Response {
    match state.classifier.apply_by_name(&parameter, limits) {
        Ok(()) => Json(state.classifier.limits()).into_response(),
        Err(e) => limits_error(e),
    }
}

pub async fn set_unit_system(
    Path(system): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.classifier.set_unit_system(&system) {
        Ok(()) => Json(state.classifier.limits()).into_response(),
        Err(e) => limits_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::alarm_classifier::AlarmClassifier;
    use crate::application::monitor_session::{MonitorSession, SessionSettings};
    use crate::domain::alarm::Wires;
    use crate::domain::parameters::UnitSystem;
    use crate::infrastructure::config::{AlarmSettings, BoardSettings};
    use crate::infrastructure::transport::BoardClient;

    fn state() -> Arc<AppState> {
        Arc::new(AppState {
            session: Arc::new(MonitorSession::new(
                SessionSettings {
                    input_bitmask: 0,
                    history_shots: 10,
                },
                7,
            )),
            classifier: Arc::new(AlarmClassifier::new(&AlarmSettings::default())),
            link: BoardClient::new(BoardSettings::default(), None).link(),
        })
    }

    fn limits(alarm_low: f64, warn_low: f64, target: f64, warn_high: f64, alarm_high: f64) -> Limits {
        Limits {
            target,
            warn_low,
            warn_high,
            alarm_low,
            alarm_high,
            wires: Wires::default(),
        }
    }

    #[tokio::test]
    async fn test_apply_limits_statuses() {
        let s = state();
        let ok = apply_limits(
            Path("fill_time".to_string()),
            State(s.clone()),
            Json(limits(10.0, 20.0, 30.0, 40.0, 50.0)),
        )
        .await;
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(s.classifier.limits().parameters[0].limits.target, 30.0);

        let unknown = apply_limits(
            Path("nope".to_string()),
            State(s.clone()),
            Json(limits(10.0, 20.0, 30.0, 40.0, 50.0)),
        )
        .await;
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let unordered = apply_limits(
            Path("fill_time".to_string()),
            State(s.clone()),
            Json(limits(50.0, 20.0, 30.0, 40.0, 10.0)),
        )
        .await;
        assert_eq!(unordered.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(s.classifier.limits().parameters[0].limits.alarm_low, 10.0);
    }

    #[tokio::test]
    async fn test_unit_system_switch() {
        let s = state();
        let resp = set_unit_system(Path("bg".to_string()), State(s.clone())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(s.classifier.unit_system(), UnitSystem::Bg);

        let resp = set_unit_system(Path("furlongs".to_string()), State(s.clone())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_snapshots_before_first_shot() {
        let s = state();
        assert_eq!(latest_shot(State(s.clone())).await.status(), StatusCode::NOT_FOUND);
        assert_eq!(get_shot(Path(3), State(s.clone())).await.status(), StatusCode::NOT_FOUND);

        let Json(status) = board_status(State(s)).await;
        assert_eq!(status.state, ConnectionState::NotConnected);
        assert_eq!(status.last_shot, 7);
        assert!(status.realtime.is_empty());
        assert!(status.recent_events.is_empty());
    }
}
