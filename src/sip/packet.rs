use crate::defs::{NodeId, BROADCAST_NODE_ID, INFINITE_COST, MAX_SEG_LEN};
use crate::frame::{FrameError, WireMessage};
use crate::stcp::segment::{Segment, STCP_HEADER_LENGTH};
use anyhow::Result;
use std::fmt::{self, Display};

pub const SIP_HEADER_LENGTH: usize = 12;
pub const MAX_SIP_PAYLOAD: usize = STCP_HEADER_LENGTH + MAX_SEG_LEN;
const ROUTE_ENTRY_LENGTH: usize = 8;

// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          Source Node                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       Destination Node                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |        Payload Length         |             Type              |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// :                  Payload (segment or route update)            :
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(PartialEq, Eq, Debug, Clone, Copy, Default)]
pub enum SipPacketType {
    RouteUpdate = 1,
    #[default]
    Sip = 2,
    Unknown,
}

impl From<u16> for SipPacketType {
    fn from(value: u16) -> Self {
        match value {
            v if v == SipPacketType::RouteUpdate as u16 => SipPacketType::RouteUpdate,
            v if v == SipPacketType::Sip as u16 => SipPacketType::Sip,
            _ => SipPacketType::Unknown,
        }
    }
}

impl From<SipPacketType> for u16 {
    fn from(t: SipPacketType) -> Self {
        t as u16
    }
}

impl Display for SipPacketType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SipPacketType::RouteUpdate => write!(f, "ROUTE_UPDATE"),
            SipPacketType::Sip => write!(f, "SIP"),
            SipPacketType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq)]
pub struct SipPacket {
    pub src_node: NodeId,
    pub dst_node: NodeId,
    pub packet_type: SipPacketType,
    pub payload: Vec<u8>,
}

impl SipPacket {
    /// Wraps a segment for delivery to `dst_node`. The payload is opaque here.
    pub fn new_segment(src_node: NodeId, dst_node: NodeId, raw_segment: Vec<u8>) -> Self {
        Self {
            src_node,
            dst_node,
            packet_type: SipPacketType::Sip,
            payload: raw_segment,
        }
    }

    pub fn new_route_update(src_node: NodeId, update: &RouteUpdate) -> Self {
        Self {
            src_node,
            dst_node: BROADCAST_NODE_ID,
            packet_type: SipPacketType::RouteUpdate,
            payload: update.create_packet(),
        }
    }

    /// Notice that `failed_node` is unreachable, sent to every neighbor.
    pub fn new_failure_notice(failed_node: NodeId) -> Self {
        Self::new_route_update(failed_node, &RouteUpdate::failure(failed_node))
    }

    pub fn read(data: &[u8]) -> Result<Self> {
        anyhow::ensure!(
            data.len() >= SIP_HEADER_LENGTH,
            "SIP packet length is {}, must be at least the header length ({}).",
            data.len(),
            SIP_HEADER_LENGTH
        );
        let length = u16::from_be_bytes(data[8..10].try_into()?) as usize;
        anyhow::ensure!(
            data.len() == SIP_HEADER_LENGTH + length,
            "SIP header announces {} payload bytes but {} bytes follow.",
            length,
            data.len() - SIP_HEADER_LENGTH
        );
        let packet = Self {
            src_node: NodeId::from_be_bytes(data[0..4].try_into()?),
            dst_node: NodeId::from_be_bytes(data[4..8].try_into()?),
            packet_type: SipPacketType::from(u16::from_be_bytes(data[10..12].try_into()?)),
            payload: data[SIP_HEADER_LENGTH..].to_vec(),
        };
        anyhow::ensure!(
            packet.packet_type != SipPacketType::Unknown,
            "Unknown SIP packet type {}.",
            u16::from_be_bytes(data[10..12].try_into()?)
        );
        Ok(packet)
    }

    pub fn create_header(&self) -> Vec<u8> {
        let mut header = Vec::with_capacity(SIP_HEADER_LENGTH);
        header.extend_from_slice(&self.src_node.to_be_bytes());
        header.extend_from_slice(&self.dst_node.to_be_bytes());
        header.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        header.extend_from_slice(&u16::from(self.packet_type).to_be_bytes());
        header
    }

    pub fn create_packet(&self) -> Vec<u8> {
        let mut packet = self.create_header();
        packet.extend_from_slice(&self.payload);
        packet
    }

    /// Parses the payload of a SIP data packet as a segment, checksum included.
    pub fn segment(&self) -> Result<Segment> {
        Segment::read(&self.payload)
    }

    pub fn print_general_info(&self) -> String {
        format!(
            "{} {}->{} len={}",
            self.packet_type,
            self.src_node,
            self.dst_node,
            self.payload.len()
        )
    }
}

impl WireMessage for SipPacket {
    const HEADER_LENGTH: usize = SIP_HEADER_LENGTH;

    fn payload_length(header: &[u8]) -> Result<usize, FrameError> {
        let length = u16::from_be_bytes([header[8], header[9]]) as usize;
        if length > MAX_SIP_PAYLOAD {
            return Err(FrameError::malformed(format!(
                "SIP payload length {} exceeds {}.",
                length, MAX_SIP_PAYLOAD
            )));
        }
        Ok(length)
    }

    fn create_packet(&mut self) -> Vec<u8> {
        SipPacket::create_packet(self)
    }

    fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        SipPacket::read(data).map_err(|e| FrameError::malformed(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteUpdateEntry {
    pub node_id: NodeId,
    pub cost: u32,
}

/// Payload of a route update: an entry count followed by (node, cost) pairs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouteUpdate {
    pub entries: Vec<RouteUpdateEntry>,
}

impl RouteUpdate {
    pub fn new(entries: Vec<(NodeId, u32)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(node_id, cost)| RouteUpdateEntry { node_id, cost })
                .collect(),
        }
    }

    pub fn failure(failed_node: NodeId) -> Self {
        Self::new(vec![(failed_node, INFINITE_COST)])
    }

    /// The failed node if this update is a failure notice.
    pub fn failed_node(&self) -> Option<NodeId> {
        match self.entries[..] {
            [RouteUpdateEntry { node_id, cost }] if cost >= INFINITE_COST => Some(node_id),
            _ => None,
        }
    }

    pub fn read(data: &[u8]) -> Result<Self> {
        anyhow::ensure!(data.len() >= 4, "Route update is {} bytes, too short.", data.len());
        let count = u32::from_be_bytes(data[0..4].try_into()?) as usize;
        anyhow::ensure!(
            data.len() == 4 + count * ROUTE_ENTRY_LENGTH,
            "Route update announces {} entries but carries {} bytes.",
            count,
            data.len() - 4
        );
        let mut entries = Vec::with_capacity(count);
        for chunk in data[4..].chunks_exact(ROUTE_ENTRY_LENGTH) {
            entries.push(RouteUpdateEntry {
                node_id: NodeId::from_be_bytes(chunk[0..4].try_into()?),
                cost: u32::from_be_bytes(chunk[4..8].try_into()?),
            });
        }
        Ok(Self { entries })
    }

    pub fn create_packet(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(4 + self.entries.len() * ROUTE_ENTRY_LENGTH);
        packet.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        for entry in &self.entries {
            packet.extend_from_slice(&entry.node_id.to_be_bytes());
            packet.extend_from_slice(&entry.cost.to_be_bytes());
        }
        packet
    }
}
