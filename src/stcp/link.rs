use crate::defs::NodeId;
use crate::frame::{read_frame_raw, write_frame};
use crate::impair::{Impairment, LinkImpairment};
use crate::stcp::{
    defs::StcpError,
    segment::{Segment, STCP_HEADER_LENGTH},
};
use anyhow::{Context, Result};
use std::io::BufReader;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, PartialEq)]
pub enum Delivery {
    Segment { src_node: NodeId, segment: Segment },
    // Lost, corrupted or unframeable. Nothing reaches the state machine.
    Dropped,
}

/// The path between an STCP stack and the network layer.
pub trait SegmentTransport: Send + Sync {
    fn send_segment(&self, dst_node: NodeId, segment: &Segment) -> Result<(), StcpError>;
    fn recv_segment(&self) -> Result<Delivery, StcpError>;
}

fn deliver(impairment: Option<&LinkImpairment>, src_node: NodeId, mut raw: Vec<u8>) -> Delivery {
    if let Some(impairment) = impairment {
        match impairment.apply(&mut raw) {
            Impairment::Delivered => {}
            Impairment::Lost => {
                log::debug!("Simulated loss of a segment from node {}.", src_node);
                return Delivery::Dropped;
            }
            Impairment::Corrupted { bit } => {
                log::debug!(
                    "Simulated corruption (bit {}) of a segment from node {}.",
                    bit,
                    src_node
                );
            }
        }
    }
    match Segment::read(&raw) {
        Ok(segment) => Delivery::Segment { src_node, segment },
        Err(e) => {
            log::debug!(
                "Dropped a segment from node {}. Err: {:?} head={}",
                src_node,
                e,
                hex::encode(&raw[..raw.len().min(STCP_HEADER_LENGTH)])
            );
            Delivery::Dropped
        }
    }
}

fn transport_closed(reason: impl ToString) -> StcpError {
    StcpError::TransportClosed {
        reason: reason.to_string(),
    }
}

/// Stream connection from an STCP process to its local SIP process.
pub struct SipConnection {
    reader: Mutex<BufReader<TcpStream>>,
    writer: Mutex<TcpStream>,
    impairment: LinkImpairment,
}

impl SipConnection {
    pub fn connect<A: ToSocketAddrs + std::fmt::Debug>(addr: A, loss_rate: f64) -> Result<Self> {
        let stream = TcpStream::connect(&addr)
            .with_context(|| format!("Failed to connect to the SIP process at {:?}.", addr))?;
        log::info!("Connected to the SIP process at {:?}.", addr);
        Self::from_stream(stream, LinkImpairment::new(loss_rate))
    }

    pub fn from_stream(stream: TcpStream, impairment: LinkImpairment) -> Result<Self> {
        let reader = stream.try_clone().context("Failed to clone the SIP stream.")?;
        Ok(Self {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(stream),
            impairment,
        })
    }
}

impl SegmentTransport for SipConnection {
    fn send_segment(&self, dst_node: NodeId, segment: &Segment) -> Result<(), StcpError> {
        let mut segment = segment.clone();
        let mut writer = self.writer.lock().unwrap();
        write_frame(&mut *writer, Some(dst_node), &mut segment).map_err(transport_closed)?;
        log::trace!("Sent to node {}: {}", dst_node, segment.print_general_info());
        Ok(())
    }

    fn recv_segment(&self) -> Result<Delivery, StcpError> {
        let mut reader = self.reader.lock().unwrap();
        match read_frame_raw::<_, Segment>(&mut *reader, true) {
            Ok((src_node, raw)) => Ok(deliver(
                Some(&self.impairment),
                src_node.unwrap_or_default(),
                raw,
            )),
            Err(e) if e.is_fatal() => Err(transport_closed(e)),
            Err(e) => {
                log::debug!("Skipped a frame from the SIP process. Err: {}", e);
                Ok(Delivery::Dropped)
            }
        }
    }
}

type LoopbackFrame = (NodeId, Vec<u8>);

/// In-process point-to-point link between two STCP stacks. Every segment is
/// serialized, optionally impaired and parsed again on the receiving side.
pub struct LoopbackTransport {
    local_node: NodeId,
    tx: Mutex<Sender<LoopbackFrame>>,
    rx: Mutex<Receiver<LoopbackFrame>>,
    impairment: Option<LinkImpairment>,
}

impl LoopbackTransport {
    pub fn pair(node_a: NodeId, node_b: NodeId) -> (Self, Self) {
        let (tx_a, rx_b) = channel();
        let (tx_b, rx_a) = channel();
        (
            Self {
                local_node: node_a,
                tx: Mutex::new(tx_a),
                rx: Mutex::new(rx_a),
                impairment: None,
            },
            Self {
                local_node: node_b,
                tx: Mutex::new(tx_b),
                rx: Mutex::new(rx_b),
                impairment: None,
            },
        )
    }

    /// Impairs segments received on this end.
    pub fn with_impairment(mut self, impairment: LinkImpairment) -> Self {
        self.impairment = Some(impairment);
        self
    }

    pub fn local_node(&self) -> NodeId {
        self.local_node
    }

    /// Waits for the next segment that survives the link. `None` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<(NodeId, Segment)>, StcpError> {
        let rx = self.rx.lock().unwrap();
        loop {
            match rx.recv_timeout(timeout) {
                Ok((src_node, raw)) => match deliver(self.impairment.as_ref(), src_node, raw) {
                    Delivery::Segment { src_node, segment } => {
                        return Ok(Some((src_node, segment)))
                    }
                    Delivery::Dropped => continue,
                },
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(transport_closed("loopback peer is gone"))
                }
            }
        }
    }
}

impl SegmentTransport for LoopbackTransport {
    fn send_segment(&self, _dst_node: NodeId, segment: &Segment) -> Result<(), StcpError> {
        let raw = segment.clone().create_packet();
        self.tx
            .lock()
            .unwrap()
            .send((self.local_node, raw))
            .map_err(|_| transport_closed("loopback peer is gone"))
    }

    fn recv_segment(&self) -> Result<Delivery, StcpError> {
        let rx = self.rx.lock().unwrap();
        let (src_node, raw) = rx
            .recv()
            .map_err(|_| transport_closed("loopback peer is gone"))?;
        Ok(deliver(self.impairment.as_ref(), src_node, raw))
    }
}
