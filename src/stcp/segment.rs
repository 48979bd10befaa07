use crate::defs::MAX_SEG_LEN;
use crate::frame::{FrameError, WireMessage};
use anyhow::Result;
use std::fmt::{self, Display};

pub const STCP_HEADER_LENGTH: usize = 24;

//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          Source Port                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        Destination Port                       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        Sequence Number                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     Acknowledgment Number                     |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |             Type              |        Receive Window         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |        Payload Length         |           Checksum            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// :                            Payload                            :
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(PartialEq, Eq, Debug, Clone, Copy, Default)]
pub enum SegmentType {
    #[default]
    Syn = 0,
    SynAck = 1,
    Fin = 2,
    FinAck = 3,
    Data = 4,
    DataAck = 5,
    Unknown,
}

impl From<u16> for SegmentType {
    fn from(value: u16) -> Self {
        match value {
            v if v == SegmentType::Syn as u16 => SegmentType::Syn,
            v if v == SegmentType::SynAck as u16 => SegmentType::SynAck,
            v if v == SegmentType::Fin as u16 => SegmentType::Fin,
            v if v == SegmentType::FinAck as u16 => SegmentType::FinAck,
            v if v == SegmentType::Data as u16 => SegmentType::Data,
            v if v == SegmentType::DataAck as u16 => SegmentType::DataAck,
            _ => SegmentType::Unknown,
        }
    }
}

impl From<SegmentType> for u16 {
    fn from(t: SegmentType) -> Self {
        t as u16
    }
}

impl Display for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SegmentType::Syn => write!(f, "SYN"),
            SegmentType::SynAck => write!(f, "SYN_ACK"),
            SegmentType::Fin => write!(f, "FIN"),
            SegmentType::FinAck => write!(f, "FIN_ACK"),
            SegmentType::Data => write!(f, "DATA"),
            SegmentType::DataAck => write!(f, "DATA_ACK"),
            SegmentType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq)]
pub struct Segment {
    pub src_port: u32,
    pub dst_port: u32,
    pub seq_number: u32,
    pub ack_number: u32,
    pub seg_type: SegmentType,
    pub recv_window: u16,
    pub length: u16,
    pub checksum: u16,
    pub payload: Vec<u8>,
}

/// Ones' complement of the ones' complement sum of 16 bit words.
/// An odd trailing byte is padded with zero.
pub fn calc_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for word in data.chunks(2) {
        let hi = word[0];
        let lo = if word.len() == 2 { word[1] } else { 0 };
        sum += u32::from(u16::from_be_bytes([hi, lo]));
    }
    while (sum >> 16) > 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

impl Segment {
    pub fn new(seg_type: SegmentType, src_port: u32, dst_port: u32) -> Self {
        Self {
            seg_type,
            src_port,
            dst_port,
            ..Default::default()
        }
    }

    pub fn new_syn(src_port: u32, dst_port: u32, seq_number: u32) -> Self {
        let mut syn = Self::new(SegmentType::Syn, src_port, dst_port);
        syn.seq_number = seq_number;
        syn
    }

    pub fn new_fin(src_port: u32, dst_port: u32, seq_number: u32) -> Self {
        let mut fin = Self::new(SegmentType::Fin, src_port, dst_port);
        fin.seq_number = seq_number;
        fin
    }

    pub fn new_data(src_port: u32, dst_port: u32, seq_number: u32, payload: &[u8]) -> Self {
        let mut data = Self::new(SegmentType::Data, src_port, dst_port);
        data.seq_number = seq_number;
        data.payload = payload.to_vec();
        data.length = payload.len() as u16;
        data
    }

    /// Reply addressed back to the sender of `self`.
    pub fn create_reply(&self, seg_type: SegmentType, ack_number: u32) -> Self {
        let mut reply = Self::new(seg_type, self.dst_port, self.src_port);
        reply.ack_number = ack_number;
        reply
    }

    pub fn read(data: &[u8]) -> Result<Self> {
        anyhow::ensure!(
            data.len() >= STCP_HEADER_LENGTH,
            "STCP segment length is {}, must be at least the header length ({}).",
            data.len(),
            STCP_HEADER_LENGTH
        );
        let mut segment = Self {
            src_port: u32::from_be_bytes(data[0..4].try_into()?),
            dst_port: u32::from_be_bytes(data[4..8].try_into()?),
            seq_number: u32::from_be_bytes(data[8..12].try_into()?),
            ack_number: u32::from_be_bytes(data[12..16].try_into()?),
            seg_type: SegmentType::from(u16::from_be_bytes(data[16..18].try_into()?)),
            recv_window: u16::from_be_bytes(data[18..20].try_into()?),
            length: u16::from_be_bytes(data[20..22].try_into()?),
            checksum: u16::from_be_bytes(data[22..24].try_into()?),
            payload: Vec::new(),
        };
        anyhow::ensure!(
            data.len() == STCP_HEADER_LENGTH + segment.length as usize,
            "STCP header announces {} payload bytes but {} bytes follow.",
            segment.length,
            data.len() - STCP_HEADER_LENGTH
        );
        segment.payload = data[STCP_HEADER_LENGTH..].to_vec();
        Self::validate(data)?;
        anyhow::ensure!(
            segment.seg_type != SegmentType::Unknown,
            "Unknown STCP segment type {}.",
            u16::from_be_bytes(data[16..18].try_into()?)
        );

        Ok(segment)
    }

    pub fn validate(data: &[u8]) -> Result<()> {
        let residue = calc_checksum(data);
        if residue != 0 {
            log::debug!("STCP checksum residue is 0x{:x}, expected 0.", residue);
            anyhow::bail!("STCP segment has bad checksum (residue 0x{:x}).", residue);
        }
        Ok(())
    }

    pub fn create_header(&self) -> Vec<u8> {
        let mut header = Vec::with_capacity(STCP_HEADER_LENGTH);
        header.extend_from_slice(&self.src_port.to_be_bytes());
        header.extend_from_slice(&self.dst_port.to_be_bytes());
        header.extend_from_slice(&self.seq_number.to_be_bytes());
        header.extend_from_slice(&self.ack_number.to_be_bytes());
        header.extend_from_slice(&u16::from(self.seg_type).to_be_bytes());
        header.extend_from_slice(&self.recv_window.to_be_bytes());
        header.extend_from_slice(&self.length.to_be_bytes());
        header.extend_from_slice(&self.checksum.to_be_bytes());
        header
    }

    /// Sets the length and checksum fields and returns the wire bytes.
    pub fn create_packet(&mut self) -> Vec<u8> {
        self.length = self.payload.len() as u16;
        self.checksum = 0;
        let mut packet = self.create_header();
        packet.extend_from_slice(&self.payload);
        self.checksum = calc_checksum(&packet);
        packet[22..24].copy_from_slice(&self.checksum.to_be_bytes());
        packet
    }

    pub fn print_general_info(&self) -> String {
        format!(
            "{} {}->{} seq={} ack={} len={}",
            self.seg_type,
            self.src_port,
            self.dst_port,
            self.seq_number,
            self.ack_number,
            self.payload.len()
        )
    }
}

impl WireMessage for Segment {
    const HEADER_LENGTH: usize = STCP_HEADER_LENGTH;

    fn payload_length(header: &[u8]) -> Result<usize, FrameError> {
        let length = u16::from_be_bytes([header[20], header[21]]) as usize;
        if length > MAX_SEG_LEN {
            return Err(FrameError::malformed(format!(
                "STCP payload length {} exceeds {}.",
                length, MAX_SEG_LEN
            )));
        }
        Ok(length)
    }

    fn create_packet(&mut self) -> Vec<u8> {
        Segment::create_packet(self)
    }

    fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        Segment::read(data).map_err(|e| FrameError::malformed(e.to_string()))
    }
}
