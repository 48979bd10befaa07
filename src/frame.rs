use crate::defs::NodeId;
use anyhow::Context;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const FRAME_START: [u8; 2] = *b"!&";
pub const FRAME_END: [u8; 2] = *b"!#";

// Every message crossing a local stream link is framed as
//
// +------+-----------------+---------------------+------+
// | "!&" | node id (4, BE) |  header | payload   | "!#" |
// +------+-----------------+---------------------+------+
//
// The node id is only present on transport<->routing links (peer node) and
// on routing->overlay links (next hop).

/// A message with a fixed-size header that announces the payload length.
pub trait WireMessage: Sized {
    const HEADER_LENGTH: usize;

    fn payload_length(header: &[u8]) -> Result<usize, FrameError>;
    fn create_packet(&mut self) -> Vec<u8>;
    fn from_bytes(data: &[u8]) -> Result<Self, FrameError>;
}

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Link is closed. Err: {0}")]
    Closed(#[from] io::Error),
    #[error("Frame trailer mismatch, got {got:02x?}.")]
    BadTrailer { got: [u8; 2] },
    #[error("Malformed message. {reason}")]
    Malformed { reason: String },
}

impl FrameError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        FrameError::Malformed {
            reason: reason.into(),
        }
    }

    /// Only a closed link ends a receive loop; other errors skip one frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FrameError::Closed(_))
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum ScanState {
    SeekStart1,
    SeekStart2,
    Receiving,
}

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// Dials `addr` until it accepts or `timeout` passes. Processes of a node
/// start in any order, so the peer may not listen yet.
pub fn connect_with_retry(addr: SocketAddr, timeout: Duration) -> anyhow::Result<TcpStream> {
    let start = Instant::now();
    loop {
        match TcpStream::connect(addr) {
            Ok(stream) => return Ok(stream),
            Err(e) if start.elapsed() < timeout => {
                log::trace!("Retrying {}. Err: {}", addr, e);
                thread::sleep(CONNECT_RETRY_INTERVAL);
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to connect to {} in {:?}.", addr, timeout))
            }
        }
    }
}

pub fn write_frame_raw<W: Write>(
    writer: &mut W,
    node: Option<NodeId>,
    body: &[u8],
) -> Result<(), FrameError> {
    let mut frame = Vec::with_capacity(body.len() + 8);
    frame.extend_from_slice(&FRAME_START);
    if let Some(node_id) = node {
        frame.extend_from_slice(&node_id.to_be_bytes());
    }
    frame.extend_from_slice(body);
    frame.extend_from_slice(&FRAME_END);
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

pub fn write_frame<W: Write, M: WireMessage>(
    writer: &mut W,
    node: Option<NodeId>,
    message: &mut M,
) -> Result<(), FrameError> {
    write_frame_raw(writer, node, &message.create_packet())
}

fn read_byte<R: Read>(reader: &mut R) -> Result<u8, FrameError> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    Ok(byte[0])
}

fn seek_frame_start<R: Read>(reader: &mut R) -> Result<(), FrameError> {
    let mut state = ScanState::SeekStart1;
    while state != ScanState::Receiving {
        let byte = read_byte(reader)?;
        state = match (state, byte) {
            (_, b'!') => ScanState::SeekStart2,
            (ScanState::SeekStart2, b'&') => ScanState::Receiving,
            _ => ScanState::SeekStart1,
        };
    }
    Ok(())
}

/// Reads one frame and returns the optional node id with the undecoded body.
pub fn read_frame_raw<R: Read, M: WireMessage>(
    reader: &mut R,
    with_node: bool,
) -> Result<(Option<NodeId>, Vec<u8>), FrameError> {
    seek_frame_start(reader)?;

    let node = if with_node {
        let mut node_bytes = [0u8; 4];
        reader.read_exact(&mut node_bytes)?;
        Some(NodeId::from_be_bytes(node_bytes))
    } else {
        None
    };

    let mut body = vec![0u8; M::HEADER_LENGTH];
    reader.read_exact(&mut body)?;
    let payload_length = M::payload_length(&body)?;
    body.resize(M::HEADER_LENGTH + payload_length, 0);
    reader.read_exact(&mut body[M::HEADER_LENGTH..])?;

    let mut trailer = [0u8; 2];
    reader.read_exact(&mut trailer)?;
    if trailer != FRAME_END {
        return Err(FrameError::BadTrailer { got: trailer });
    }

    Ok((node, body))
}

pub fn read_frame<R: Read, M: WireMessage>(
    reader: &mut R,
    with_node: bool,
) -> Result<(Option<NodeId>, M), FrameError> {
    let (node, body) = read_frame_raw::<R, M>(reader, with_node)?;
    Ok((node, M::from_bytes(&body)?))
}

#[cfg(test)]
mod frame_tests {
    use super::*;
    use hex::decode;
    use rstest::rstest;
    use std::io::Cursor;

    // 2 byte header holding the payload length.
    #[derive(Debug, PartialEq)]
    struct Blob(Vec<u8>);

    impl WireMessage for Blob {
        const HEADER_LENGTH: usize = 2;

        fn payload_length(header: &[u8]) -> Result<usize, FrameError> {
            let len = u16::from_be_bytes([header[0], header[1]]) as usize;
            if len > 16 {
                return Err(FrameError::malformed(format!("blob length {}", len)));
            }
            Ok(len)
        }

        fn create_packet(&mut self) -> Vec<u8> {
            let mut packet = (self.0.len() as u16).to_be_bytes().to_vec();
            packet.extend_from_slice(&self.0);
            packet
        }

        fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
            Ok(Blob(data[2..].to_vec()))
        }
    }

    #[rstest]
    // plain frame
    #[case("21260003616263 2123", None, "616263")]
    // garbage before the start marker
    #[case("00ff2621260003616263 2123", None, "616263")]
    // "!!&" still starts a frame
    #[case("2121260003616263 2123", None, "616263")]
    // node id prefix
    #[case("2126000000070001 7a2123", Some(7), "7a")]
    // empty payload
    #[case("212600002123", None, "")]
    fn test_read_frame(
        #[case] encoded: &str,
        #[case] expected_node: Option<NodeId>,
        #[case] expected_payload: &str,
    ) {
        let data = decode(encoded.replace(' ', "")).expect("Failed to decode hex string");
        let mut cursor = Cursor::new(data);
        let (node, blob) = read_frame::<_, Blob>(&mut cursor, expected_node.is_some())
            .expect("Failed to read frame");
        assert_eq!(node, expected_node);
        assert_eq!(blob.0, decode(expected_payload).unwrap());
    }

    #[test]
    fn test_write_frame_layout() {
        let mut out = Vec::new();
        write_frame(&mut out, Some(3), &mut Blob(b"hi".to_vec())).unwrap();
        assert_eq!(hex::encode(&out), "212600000003000268692123");

        let mut out = Vec::new();
        write_frame(&mut out, None, &mut Blob(Vec::new())).unwrap();
        assert_eq!(out, b"!&\x00\x00!#".to_vec());
    }

    #[test]
    fn test_read_frame_bad_trailer_then_resync() {
        let mut data = b"!&\x00\x01a!x".to_vec();
        data.extend_from_slice(b"!&\x00\x01b!#");
        let mut cursor = Cursor::new(data);

        let first = read_frame::<_, Blob>(&mut cursor, false);
        assert!(matches!(first, Err(FrameError::BadTrailer { .. })));
        assert!(!first.unwrap_err().is_fatal());

        let (_, second) = read_frame::<_, Blob>(&mut cursor, false).unwrap();
        assert_eq!(second.0, b"b".to_vec());
    }

    #[rstest]
    // stream ends inside the payload
    #[case("2126000561")]
    // stream ends before any start marker
    #[case("0001020304")]
    fn test_read_frame_closed(#[case] encoded: &str) {
        let mut cursor = Cursor::new(decode(encoded).unwrap());
        let result = read_frame::<_, Blob>(&mut cursor, false);
        assert!(result.unwrap_err().is_fatal());
    }

    #[test]
    fn test_read_frame_oversized_length_is_skipped() {
        let mut cursor = Cursor::new(decode("212600ff2123").unwrap());
        let result = read_frame::<_, Blob>(&mut cursor, false);
        assert!(matches!(result, Err(FrameError::Malformed { .. })));
    }
}
