// FasTrak3 wire protocol - framing constants, async header, raw samples, commands
use bytes::{Buf, BufMut, Bytes};
use serde::Serialize;
use thiserror::Error;

pub const FRAME_LEN: usize = 1;
pub const RESPONSE_LEN: usize = 256;
pub const ASYNC_HEADER_LEN: usize = 12;
/// Largest async transfer (header plus payload) the board emits.
pub const RECV_BUFFER_LEN: usize = 1350;
pub const ASYNC_DATA_LEN: usize = RECV_BUFFER_LEN - ASYNC_HEADER_LEN;

pub const ASYNC_BIT: u8 = 1 << 7;
pub const FIRST_PACKET_NUMBER: u16 = 1;

pub const RAW_SAMPLE_LEN: usize = 56;
pub const ANALOG_CHANNELS: usize = 8;
pub const OP_STATUS_DATA_LEN: usize = 100;
pub const OSCILLOSCOPE_DATA_LEN: usize = 16000;

pub const ECHO_RESPONSE_PREFIX: u8 = b'*';

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("async header needs {len} bytes, got {0}", len = ASYNC_HEADER_LEN)]
    ShortHeader(usize),
    #[error("sample buffer of {0} bytes is not a whole number of {len}-byte samples", len = RAW_SAMPLE_LEN)]
    TrailingSampleBytes(usize),
}

/// Returns true when the framing byte announces an asynchronous message.
pub fn is_async(frame: u8) -> bool {
    frame & ASYNC_BIT != 0
}

/// Clears the async marker, leaving the framing byte proper.
pub fn unset_async(frame: u8) -> u8 {
    frame & !ASYNC_BIT
}

/// Dataset kind carried in `AsyncHeader::bin_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BinType {
    PositionSamples = 0,
    TimeSamples = 1,
    Parameters = 2,
    Oscilloscope = 3,
    OpStatus = 4,
    Text = 5,
    IoChange = 6,
    SingleAnalog = 7,
    BlockAnalog = 8,
    ConnectionLost = 100,
}

impl BinType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(BinType::PositionSamples),
            1 => Some(BinType::TimeSamples),
            2 => Some(BinType::Parameters),
            3 => Some(BinType::Oscilloscope),
            4 => Some(BinType::OpStatus),
            5 => Some(BinType::Text),
            6 => Some(BinType::IoChange),
            7 => Some(BinType::SingleAnalog),
            8 => Some(BinType::BlockAnalog),
            100 => Some(BinType::ConnectionLost),
            _ => None,
        }
    }

    /// Kinds that travel as multi-packet binary transfers.
    pub fn is_reassembled(self) -> bool {
        matches!(
            self,
            BinType::PositionSamples
                | BinType::TimeSamples
                | BinType::Parameters
                | BinType::Oscilloscope
                | BinType::OpStatus
        )
    }
}

/// Link state as seen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    NotConnected,
    Connecting,
    Connected,
    /// Connected but deliberately not monitored; heartbeat results are ignored.
    NotMonitored,
}

impl ConnectionState {
    /// State after an echo response arrives.
    pub fn on_echo(self) -> Self {
        match self {
            ConnectionState::Connected | ConnectionState::NotMonitored => self,
            _ => ConnectionState::Connected,
        }
    }
}

/// Fixed 12-byte little-endian header preceding every async payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AsyncHeader {
    pub bin_id: u8,
    pub bin_type: u8,
    pub flags: u16,
    pub dataset_num: u16,
    pub packet_num: u16,
    pub num_packets: u16,
    pub num_bytes: u16,
}

impl AsyncHeader {
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < ASYNC_HEADER_LEN {
            return Err(ProtocolError::ShortHeader(data.len()));
        }

        let mut buf = &data[..ASYNC_HEADER_LEN];
        Ok(Self {
            bin_id: buf.get_u8(),
            bin_type: buf.get_u8(),
            flags: buf.get_u16_le(),
            dataset_num: buf.get_u16_le(),
            packet_num: buf.get_u16_le(),
            num_packets: buf.get_u16_le(),
            num_bytes: buf.get_u16_le(),
        })
    }

    pub fn encode(&self) -> [u8; ASYNC_HEADER_LEN] {
        let mut out = [0u8; ASYNC_HEADER_LEN];
        let mut buf = &mut out[..];
        buf.put_u8(self.bin_id);
        buf.put_u8(self.bin_type);
        buf.put_u16_le(self.flags);
        buf.put_u16_le(self.dataset_num);
        buf.put_u16_le(self.packet_num);
        buf.put_u16_le(self.num_packets);
        buf.put_u16_le(self.num_bytes);
        out
    }

    pub fn kind(&self) -> Option<BinType> {
        BinType::from_u8(self.bin_type)
    }
}

/// Sampling cadence of a raw sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    /// Position-triggered
    #[serde(rename = "P")]
    Position,
    /// Time-triggered
    #[serde(rename = "T")]
    Time,
}

impl Phase {
    pub fn tag(self) -> char {
        match self {
            Phase::Position => 'P',
            Phase::Time => 'T',
        }
    }
}

/// One hardware sampling record as laid out by the controller firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawSample {
    pub analog: [u16; ANALOG_CHANNELS],
    pub vel_count: [u32; 4],
    pub isw1: u32,
    pub isw4: u32,
    pub osw1: u32,
    pub one_ms_timer: u32,
    pub position: i32,
    pub sample_num: u32,
}

impl RawSample {
    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() != RAW_SAMPLE_LEN {
            return Err(ProtocolError::TrailingSampleBytes(buf.len()));
        }

        let mut analog = [0u16; ANALOG_CHANNELS];
        for ch in analog.iter_mut() {
            *ch = buf.get_u16_le();
        }
        let mut vel_count = [0u32; 4];
        for q in vel_count.iter_mut() {
            *q = buf.get_u32_le();
        }

        Ok(Self {
            analog,
            vel_count,
            isw1: buf.get_u32_le(),
            isw4: buf.get_u32_le(),
            osw1: buf.get_u32_le(),
            one_ms_timer: buf.get_u32_le(),
            position: buf.get_i32_le(),
            sample_num: buf.get_u32_le(),
        })
    }

    /// Decodes a concatenated sample stream; the length must be a whole
    /// multiple of the record size.
    pub fn decode_all(data: &[u8]) -> Result<Vec<Self>, ProtocolError> {
        if data.len() % RAW_SAMPLE_LEN != 0 {
            return Err(ProtocolError::TrailingSampleBytes(data.len()));
        }
        data.chunks_exact(RAW_SAMPLE_LEN).map(Self::decode).collect()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RAW_SAMPLE_LEN);
        for ch in self.analog {
            buf.put_u16_le(ch);
        }
        for q in self.vel_count {
            buf.put_u32_le(q);
        }
        buf.put_u32_le(self.isw1);
        buf.put_u32_le(self.isw4);
        buf.put_u32_le(self.osw1);
        buf.put_u32_le(self.one_ms_timer);
        buf.put_i32_le(self.position);
        buf.put_u32_le(self.sample_num);
        buf
    }
}

/// A complete logical message read off the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Fixed-size synchronous response buffer, framing byte included.
    Response(Bytes),
    Async { header: AsyncHeader, payload: Bytes },
}

impl Message {
    /// Text of a synchronous response with padding stripped.
    pub fn response_text(data: &[u8]) -> String {
        String::from_utf8_lossy(data)
            .trim_end_matches(['\0', '\r', '\n', ' '])
            .to_string()
    }
}

/// ASCII commands understood by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    GetVersion,
    GetControlFileDate,
    GetUploadCopyDate,
    GetTimerFrequency,
    GetInputBits,
    GetAllAnalog,
    SetInputBitmask(u32),
    PositionAtImpact(bool),
    Echo,
    Raw(String),
}

impl Command {
    pub fn to_wire(&self) -> String {
        match self {
            Command::GetVersion => "OV\r".to_string(),
            Command::GetControlFileDate => "V447\r".to_string(),
            Command::GetUploadCopyDate => "V448\r".to_string(),
            Command::GetTimerFrequency => "V301\r".to_string(),
            Command::GetInputBits => "OI1\r".to_string(),
            Command::GetAllAnalog => "OAA\r".to_string(),
            Command::SetInputBitmask(mask) => format!("V427=H{:x}\r", mask),
            Command::PositionAtImpact(true) => "OC13=1\r".to_string(),
            Command::PositionAtImpact(false) => "OC13=0\r".to_string(),
            Command::Echo => "*\r".to_string(),
            Command::Raw(s) => s.clone(),
        }
    }
}
