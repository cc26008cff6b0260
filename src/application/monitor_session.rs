// Monitor session - per-board shot, metadata and event state behind three locks
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::application::reassembler::{PacketOrder, Reassembler};
use crate::domain::board_event::BoardEvent;
use crate::domain::parameters::AlarmParameters;
use crate::domain::protocol::{
    AsyncHeader, BinType, Command, ECHO_RESPONSE_PREFIX, Message, RawSample,
};
use crate::domain::shot::{CompletedShot, SealedShot, ShotEvent, ShotMeta};

/// Work the session hands back to the service after a message.
#[derive(Debug, Clone)]
pub enum SessionAction {
    Send(Command),
    ShotSealed(SealedShot),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardVersion {
    pub version: u8,
    pub sub_version: u8,
    pub label: String,
}

/// What the board has reported about itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BoardInfo {
    pub timer_frequency: Option<u32>,
    pub version: Option<BoardVersion>,
    /// Outer `None` until the board answers; inner `None` means no file.
    pub control_file_date: Option<Option<u32>>,
    pub upload_copy_date: Option<Option<u32>>,
    pub input_bits: Option<u32>,
    pub position_at_impact: Option<f64>,
    pub at_home: bool,
    pub last_analog: Option<String>,
    pub last_fault: Option<String>,
    pub input_mask_sent: bool,
}

impl BoardInfo {
    fn handshake_complete(&self) -> bool {
        self.version.is_some() && self.control_file_date.is_some() && self.upload_copy_date.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeFrame {
    pub kind: BinType,
    pub t: DateTime<Utc>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub input_bitmask: u32,
    pub history_shots: usize,
}

#[derive(Debug)]
struct PendingShot {
    shot: u32,
    t1: DateTime<Utc>,
    incomplete: bool,
}

#[derive(Debug, Default)]
struct MetaState {
    last_shot: u32,
    current: Option<PendingShot>,
    history: VecDeque<ShotMeta>,
    board: BoardInfo,
}

#[derive(Debug, Default)]
struct ShotState {
    reassembler: Reassembler,
    position: Vec<RawSample>,
    time: Vec<RawSample>,
    completed: VecDeque<CompletedShot>,
    op_status: Option<RealtimeFrame>,
    oscilloscope: Option<RealtimeFrame>,
}

impl ShotState {
    fn clear_buffers(&mut self) {
        self.position.clear();
        self.time.clear();
    }
}

#[derive(Debug, Default)]
struct EventState {
    pending: Vec<(DateTime<Utc>, BoardEvent)>,
    recent: VecDeque<(DateTime<Utc>, BoardEvent)>,
}

/// State of one monitored board. The three locks are never held across an
/// await and are always taken in shot, meta, events order.
pub struct MonitorSession {
    settings: SessionSettings,
    meta: Mutex<MetaState>,
    shot: Mutex<ShotState>,
    events: Mutex<EventState>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, cap: usize) {
    queue.push_back(item);
    while queue.len() > cap {
        queue.pop_front();
    }
}

impl MonitorSession {
    pub fn new(settings: SessionSettings, last_shot: u32) -> Self {
        Self {
            settings,
            meta: Mutex::new(MetaState {
                last_shot,
                ..Default::default()
            }),
            shot: Mutex::new(ShotState::default()),
            events: Mutex::new(EventState::default()),
        }
    }

    /// Queries sent once a connection is established.
    pub fn handshake_commands() -> [Command; 4] {
        [
            Command::GetTimerFrequency,
            Command::GetVersion,
            Command::GetControlFileDate,
            Command::GetUploadCopyDate,
        ]
    }

    pub fn handle_message(&self, message: Message, now: DateTime<Utc>) -> Vec<SessionAction> {
        match message {
            Message::Response(data) => self.handle_response(&data, now),
            Message::Async { header, payload } => self.handle_async(&header, payload, now),
        }
    }

    fn handle_response(&self, data: &[u8], now: DateTime<Utc>) -> Vec<SessionAction> {
        let text = Message::response_text(data);
        if text.is_empty() {
            return Vec::new();
        }
        if text.as_bytes()[0] == ECHO_RESPONSE_PREFIX {
            tracing::debug!("echo response");
            return Vec::new();
        }
        self.handle_event(BoardEvent::parse(&text), now)
    }

    fn handle_async(&self, header: &AsyncHeader, payload: Bytes, now: DateTime<Utc>) -> Vec<SessionAction> {
        let Some(kind) = header.kind() else {
            tracing::warn!(bin_type = header.bin_type, "unknown async dataset type");
            return Vec::new();
        };

        match kind {
            BinType::ConnectionLost => {
                tracing::warn!("board reported a lost connection");
                self.abandon_transfers();
                Vec::new()
            }
            BinType::Text => {
                let text = Message::response_text(&payload);
                self.handle_event(BoardEvent::parse(&text), now)
            }
            BinType::IoChange => match BoardEvent::from_io_change(&payload) {
                Some(event) => self.handle_event(event, now),
                None => {
                    tracing::warn!(len = payload.len(), "short io-change payload");
                    Vec::new()
                }
            },
            BinType::SingleAnalog | BinType::BlockAnalog => {
                let text = Message::response_text(&payload);
                self.handle_event(BoardEvent::AnalogResponse(text), now)
            }
            _ => self.handle_dataset(kind, header, &payload, now),
        }
    }

    fn handle_dataset(
        &self,
        kind: BinType,
        header: &AsyncHeader,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Vec<SessionAction> {
        let mut shot = lock(&self.shot);
        let assembled = shot.reassembler.push(kind, header, payload);

        let shot_kind = matches!(
            kind,
            BinType::PositionSamples | BinType::TimeSamples | BinType::Parameters
        );

        if kind == BinType::PositionSamples && assembled.order == PacketOrder::First {
            self.begin_shot(&mut shot, now);
        }
        if shot_kind && matches!(assembled.order, PacketOrder::Gap { .. }) {
            self.mark_incomplete();
        }

        let Some(data) = assembled.complete else {
            return Vec::new();
        };

        match kind {
            BinType::PositionSamples | BinType::TimeSamples => {
                match RawSample::decode_all(&data) {
                    Ok(samples) => {
                        tracing::debug!(?kind, samples = samples.len(), "sample dataset complete");
                        if kind == BinType::PositionSamples {
                            shot.position.extend(samples);
                        } else {
                            shot.time.extend(samples);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(?kind, error = %e, "undecodable sample dataset");
                        self.mark_incomplete();
                    }
                }
                Vec::new()
            }
            BinType::Parameters => self.seal_shot(&mut shot, data.len()),
            BinType::OpStatus | BinType::Oscilloscope => {
                let frame = RealtimeFrame {
                    kind,
                    t: now,
                    data: data.to_vec(),
                };
                if kind == BinType::OpStatus {
                    shot.op_status = Some(frame);
                } else {
                    shot.oscilloscope = Some(frame);
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn begin_shot(&self, shot: &mut ShotState, now: DateTime<Utc>) {
        let mut meta = lock(&self.meta);
        if let Some(pending) = &meta.current {
            // a restarted position transfer with nothing buffered keeps its shot
            if !pending.incomplete && shot.position.is_empty() {
                return;
            }
            tracing::warn!(
                shot = pending.shot,
                incomplete = pending.incomplete,
                "unsealed shot discarded"
            );
            shot.clear_buffers();
        }

        meta.last_shot += 1;
        let shot_number = meta.last_shot;
        meta.current = Some(PendingShot {
            shot: shot_number,
            t1: now,
            incomplete: false,
        });
        tracing::info!(shot = shot_number, "shot started");
    }

    fn mark_incomplete(&self) {
        if let Some(pending) = lock(&self.meta).current.as_mut() {
            pending.incomplete = true;
        }
    }

    fn seal_shot(&self, shot: &mut ShotState, param_bytes: usize) -> Vec<SessionAction> {
        let position = std::mem::take(&mut shot.position);
        let time = std::mem::take(&mut shot.time);

        let mut meta = lock(&self.meta);
        let Some(pending) = meta.current.take() else {
            tracing::warn!("parameters dataset without a shot in progress");
            return Vec::new();
        };
        if pending.incomplete {
            tracing::warn!(shot = pending.shot, "incomplete shot discarded");
            return Vec::new();
        }

        let elapsed_ms = time
            .last()
            .or(position.last())
            .map_or(0, |s| s.one_ms_timer);
        let shot_meta = ShotMeta {
            shot: pending.shot,
            t0: pending.t1 - Duration::milliseconds(i64::from(elapsed_ms)),
            t1: pending.t1,
            num_p: position.len(),
            num_t: time.len(),
            param_bytes,
        };
        push_bounded(&mut meta.history, shot_meta.clone(), self.settings.history_shots);
        drop(meta);

        let events = std::mem::take(&mut lock(&self.events).pending)
            .into_iter()
            .map(|(t, event)| ShotEvent {
                shot: shot_meta.shot,
                t,
                event,
            })
            .collect();

        tracing::info!(
            shot = shot_meta.shot,
            num_p = shot_meta.num_p,
            num_t = shot_meta.num_t,
            "shot acquired"
        );

        vec![SessionAction::ShotSealed(SealedShot {
            meta: shot_meta,
            position,
            time,
            events,
        })]
    }

    fn handle_event(&self, event: BoardEvent, now: DateTime<Utc>) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        {
            let mut meta = lock(&self.meta);
            let board = &mut meta.board;
            match &event {
                BoardEvent::CycleStart => tracing::info!("cycle start"),
                BoardEvent::CycleTimeout => tracing::warn!("cycle timeout"),
                BoardEvent::TimerFrequency(hz) => board.timer_frequency = Some(*hz),
                BoardEvent::InputBits(bits) => board.input_bits = Some(*bits),
                BoardEvent::AtHome => board.at_home = true,
                BoardEvent::PositionAtImpact(counts) => board.position_at_impact = Some(*counts),
                BoardEvent::Version {
                    version,
                    sub_version,
                    label,
                } => {
                    tracing::info!(version, sub_version, %label, "board version");
                    board.version = Some(BoardVersion {
                        version: *version,
                        sub_version: *sub_version,
                        label: label.clone(),
                    });
                }
                BoardEvent::ControlFileDate(date) => board.control_file_date = Some(*date),
                BoardEvent::UploadCopyDate(date) => board.upload_copy_date = Some(*date),
                BoardEvent::AnalogResponse(text) => board.last_analog = Some(text.clone()),
                BoardEvent::FatalOrWarning { fatal, text } => {
                    if *fatal {
                        tracing::error!(%text, "board fatal error");
                    } else {
                        tracing::warn!(%text, "board warning");
                    }
                    board.last_fault = Some(text.clone());
                }
                BoardEvent::Other(text) => tracing::debug!(%text, "board message"),
            }

            if !board.input_mask_sent && board.handshake_complete() {
                board.input_mask_sent = true;
                actions.push(SessionAction::Send(Command::SetInputBitmask(self.settings.input_bitmask)));
                actions.push(SessionAction::Send(Command::GetInputBits));
            }
        }

        let mut events = lock(&self.events);
        events.pending.push((now, event.clone()));
        push_bounded(&mut events.recent, (now, event), self.settings.history_shots);

        actions
    }

    fn abandon_transfers(&self) {
        let mut shot = lock(&self.shot);
        shot.reassembler.reset();
        shot.clear_buffers();
        if let Some(pending) = lock(&self.meta).current.take() {
            tracing::warn!(shot = pending.shot, "in-flight shot abandoned");
        }
    }

    /// Called after the connection dropped: partial transfers are discarded
    /// and the handshake runs again on the next connection.
    pub fn connection_reset(&self) {
        self.abandon_transfers();
        lock(&self.meta).board = BoardInfo::default();
    }

    /// Start time of the shot before `shot`, when still in history.
    pub fn previous_t0(&self, shot: u32) -> Option<DateTime<Utc>> {
        let prev = shot.checked_sub(1)?;
        lock(&self.meta)
            .history
            .iter()
            .rev()
            .find(|m| m.shot == prev)
            .map(|m| m.t0)
    }

    pub fn record_completed(&self, completed: CompletedShot) {
        let mut shot = lock(&self.shot);
        push_bounded(&mut shot.completed, completed, self.settings.history_shots);
    }

    pub fn board_info(&self) -> BoardInfo {
        lock(&self.meta).board.clone()
    }

    pub fn last_shot_number(&self) -> u32 {
        lock(&self.meta).last_shot
    }

    pub fn latest_shot(&self) -> Option<CompletedShot> {
        lock(&self.shot).completed.back().cloned()
    }

    pub fn shot(&self, number: u32) -> Option<CompletedShot> {
        lock(&self.shot)
            .completed
            .iter()
            .find(|s| s.meta.shot == number)
            .cloned()
    }

    pub fn parameters(&self) -> Vec<AlarmParameters> {
        lock(&self.shot).completed.iter().map(|s| s.parameters).collect()
    }

    pub fn realtime(&self) -> Vec<RealtimeFrame> {
        let shot = lock(&self.shot);
        shot.op_status.iter().chain(shot.oscilloscope.iter()).cloned().collect()
    }

    pub fn recent_events(&self) -> Vec<(DateTime<Utc>, BoardEvent)> {
        lock(&self.events).recent.iter().cloned().collect()
    }
}
