// Shot records - metadata, events and the completed-shot handoff
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::board_event::BoardEvent;
use super::parameters::AlarmParameters;
use super::protocol::RawSample;
use super::trajectory::Trajectory;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShotMeta {
    pub shot: u32,
    /// Shot start, back-dated from `t1` by the final one-ms timer value.
    pub t0: DateTime<Utc>,
    /// Arrival of the first position dataset.
    pub t1: DateTime<Utc>,
    pub num_p: usize,
    pub num_t: usize,
    /// Size of the board-computed parameters payload that sealed the shot.
    pub param_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShotEvent {
    pub shot: u32,
    pub t: DateTime<Utc>,
    pub event: BoardEvent,
}

/// Raw samples of one shot, handed off by the session when the parameters
/// dataset arrives.
#[derive(Debug, Clone)]
pub struct SealedShot {
    pub meta: ShotMeta,
    pub position: Vec<RawSample>,
    pub time: Vec<RawSample>,
    pub events: Vec<ShotEvent>,
}

/// Durable record of one processed shot.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedShot {
    pub meta: ShotMeta,
    pub trajectory: Trajectory,
    pub events: Vec<ShotEvent>,
    pub parameters: AlarmParameters,
}
