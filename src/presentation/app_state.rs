// Application state for HTTP handlers
use crate::application::alarm_classifier::AlarmClassifier;
use crate::application::monitor_session::MonitorSession;
use crate::infrastructure::transport::BoardLink;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<MonitorSession>,
    pub classifier: Arc<AlarmClassifier>,
    pub link: Arc<BoardLink>,
}
