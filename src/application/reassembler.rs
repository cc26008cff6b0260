// Packet reassembler - multi-packet async payloads accumulated per dataset kind
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;

use crate::domain::protocol::{
    AsyncHeader, BinType, FIRST_PACKET_NUMBER, OP_STATUS_DATA_LEN, OSCILLOSCOPE_DATA_LEN,
};

/// Where an arriving packet sits relative to the dataset being assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOrder {
    /// Packet 1; (re)starts the dataset.
    First,
    InOrder,
    Duplicate,
    /// Packets were skipped; the dataset can no longer complete.
    Gap { expected: u16 },
    /// Arrived outside any live dataset, or behind the last accepted packet.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assembled {
    pub order: PacketOrder,
    /// Set when this packet completed its dataset.
    pub complete: Option<Bytes>,
}

#[derive(Debug, Default)]
struct Assembly {
    expected_len: usize,
    buf: BytesMut,
    last_packet: u16,
    poisoned: bool,
}

impl Assembly {
    fn is_live(&self) -> bool {
        self.last_packet >= FIRST_PACKET_NUMBER && !self.poisoned
    }

    fn restart(&mut self, expected_len: usize) {
        self.expected_len = expected_len;
        self.buf.clear();
        self.buf.reserve(expected_len);
        self.last_packet = FIRST_PACKET_NUMBER;
        self.poisoned = false;
    }

    fn append(&mut self, header: &AsyncHeader, payload: &[u8]) {
        let remaining = self.expected_len.saturating_sub(self.buf.len());
        let n = (header.num_bytes as usize).min(remaining).min(payload.len());
        self.buf.extend_from_slice(&payload[..n]);
    }

    fn take(&mut self) -> Bytes {
        self.last_packet = 0;
        self.expected_len = 0;
        self.buf.split().freeze()
    }
}

/// One in-flight assembly per reassembled dataset kind.
#[derive(Debug, Default)]
pub struct Reassembler {
    assemblies: HashMap<BinType, Assembly>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total payload length announced by the first packet of a dataset.
    pub fn expected_len(kind: BinType, header: &AsyncHeader) -> usize {
        match kind {
            BinType::OpStatus => OP_STATUS_DATA_LEN,
            BinType::Oscilloscope => OSCILLOSCOPE_DATA_LEN,
            _ => header.num_bytes as usize * header.num_packets as usize,
        }
    }

    pub fn push(&mut self, kind: BinType, header: &AsyncHeader, payload: &[u8]) -> Assembled {
        let assembly = self.assemblies.entry(kind).or_default();
        let packet = header.packet_num;

        let order = if packet == FIRST_PACKET_NUMBER {
            assembly.restart(Self::expected_len(kind, header));
            PacketOrder::First
        } else if !assembly.is_live() {
            PacketOrder::Stale
        } else if packet == assembly.last_packet {
            PacketOrder::Duplicate
        } else if packet == assembly.last_packet.wrapping_add(1) {
            PacketOrder::InOrder
        } else if packet > assembly.last_packet {
            PacketOrder::Gap {
                expected: assembly.last_packet + 1,
            }
        } else {
            PacketOrder::Stale
        };

        match order {
            PacketOrder::First | PacketOrder::InOrder => {
                assembly.append(header, payload);
                assembly.last_packet = packet;
            }
            PacketOrder::Duplicate => {
                tracing::warn!(?kind, packet, "duplicate packet discarded");
            }
            PacketOrder::Gap { expected } => {
                tracing::warn!(?kind, packet, expected, "missing packet, dataset incomplete");
                assembly.poisoned = true;
            }
            PacketOrder::Stale => {
                tracing::debug!(?kind, packet, "stale packet ignored");
            }
        }

        let complete = match order {
            PacketOrder::First | PacketOrder::InOrder if packet >= header.num_packets => {
                Some(assembly.take())
            }
            _ => None,
        };

        Assembled { order, complete }
    }

    /// True while a dataset of `kind` is mid-transfer.
    pub fn in_progress(&self, kind: BinType) -> bool {
        self.assemblies.get(&kind).is_some_and(Assembly::is_live)
    }

    /// Abandons every in-flight dataset, e.g. after a connection reset.
    pub fn reset(&mut self) {
        self.assemblies.clear();
    }
}
