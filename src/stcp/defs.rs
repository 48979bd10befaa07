use crate::defs::NodeId;
use crate::stcp::segment::SegmentType;
use std::fmt::{self, Display};
use thiserror::Error;

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum StcpStatus {
    Closed,
    Listening,
    SynSent,
    Connected,
    FinWait,
    CloseWait,
}

impl Display for StcpStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StcpStatus::Closed => write!(f, "CLOSED"),
            StcpStatus::Listening => write!(f, "LISTENING"),
            StcpStatus::SynSent => write!(f, "SYN-SENT"),
            StcpStatus::Connected => write!(f, "CONNECTED"),
            StcpStatus::FinWait => write!(f, "FIN-WAIT"),
            StcpStatus::CloseWait => write!(f, "CLOSE-WAIT"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StcpError {
    #[error("No free connection slot. max connections: {max}")]
    NoSlotAvailable { max: usize },
    #[error("Port {port} is already used by socket (id={id}).")]
    PortInUse { port: u32, id: usize },
    #[error("No stcp socket for id={id}.")]
    NoSuchSocket { id: usize },
    #[error("Socket (id={id}) is {status} but {expected} is required.")]
    InvalidState {
        id: usize,
        status: StcpStatus,
        expected: StcpStatus,
    },
    #[error("Connect failed after {attempts} SYN attempts. socket id: {id} server: {node}:{port}")]
    ConnectTimeout {
        id: usize,
        attempts: usize,
        node: NodeId,
        port: u32,
    },
    #[error("Disconnect failed after {attempts} FIN attempts. socket id: {id}")]
    DisconnectTimeout { id: usize, attempts: usize },
    #[error("Connection lost. socket id: {id} status: {status}")]
    ConnectionLost { id: usize, status: StcpStatus },
    #[error("Requested {requested} bytes but the receive buffer holds at most {capacity}.")]
    RequestTooLarge { requested: usize, capacity: usize },
    #[error("Unexpected {seg_type} segment while {status}. port: {port}")]
    ProtocolViolation {
        port: u32,
        status: StcpStatus,
        seg_type: SegmentType,
    },
    #[error("Link to the routing layer is closed. {reason}")]
    TransportClosed { reason: String },
}

impl StcpError {
    /// Sentinel status codes of the socket API.
    pub fn code(&self) -> i32 {
        match self {
            StcpError::NoSuchSocket { .. } => -2,
            StcpError::InvalidState { .. } => -3,
            _ => -1,
        }
    }
}
