use crate::defs::NodeId;
use crate::frame::{read_frame, write_frame, FrameError};
use crate::sip::packet::SipPacket;
use anyhow::{Context, Result};
use std::io::BufReader;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Mutex;

/// The path between a SIP process and its local overlay process.
pub trait PacketLink: Send + Sync {
    /// Hands `packet` to the overlay for delivery to `next_hop`, which may be
    /// the broadcast id.
    fn send_packet(&self, next_hop: NodeId, packet: &SipPacket) -> Result<(), FrameError>;
    fn recv_packet(&self) -> Result<SipPacket, FrameError>;
}

pub struct SonConnection {
    reader: Mutex<BufReader<TcpStream>>,
    writer: Mutex<TcpStream>,
}

impl SonConnection {
    pub fn connect<A: ToSocketAddrs + std::fmt::Debug>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(&addr)
            .with_context(|| format!("Failed to connect to the SON process at {:?}.", addr))?;
        log::info!("Connected to the SON process at {:?}.", addr);
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        let reader = stream.try_clone().context("Failed to clone the SON stream.")?;
        Ok(Self {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(stream),
        })
    }
}

impl PacketLink for SonConnection {
    fn send_packet(&self, next_hop: NodeId, packet: &SipPacket) -> Result<(), FrameError> {
        let mut packet = packet.clone();
        let mut writer = self.writer.lock().unwrap();
        write_frame(&mut *writer, Some(next_hop), &mut packet)
    }

    fn recv_packet(&self) -> Result<SipPacket, FrameError> {
        let mut reader = self.reader.lock().unwrap();
        let (_, packet) = read_frame::<_, SipPacket>(&mut *reader, false)?;
        Ok(packet)
    }
}

#[cfg(test)]
mod son_link_tests {
    use super::*;
    use crate::defs::BROADCAST_NODE_ID;
    use crate::frame::read_frame_raw;
    use crate::sip::packet::RouteUpdate;
    use std::net::TcpListener;

    #[test]
    fn test_son_connection_framing() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let conn = SonConnection::connect(listener.local_addr().unwrap()).unwrap();
        let (mut son, _) = listener.accept().unwrap();

        let update = RouteUpdate::new(vec![(1, 0), (2, 4)]);
        conn.send_packet(BROADCAST_NODE_ID, &SipPacket::new_route_update(1, &update))
            .unwrap();
        let (next_hop, body) = read_frame_raw::<_, SipPacket>(&mut son, true).unwrap();
        assert_eq!(next_hop, Some(BROADCAST_NODE_ID));
        let packet = SipPacket::read(&body).unwrap();
        assert_eq!(RouteUpdate::read(&packet.payload).unwrap(), update);

        // overlay -> SIP frames carry no node id
        let notice = SipPacket::new_failure_notice(4);
        write_frame(&mut son, None, &mut notice.clone()).unwrap();
        assert_eq!(conn.recv_packet().unwrap(), notice);

        drop(son);
        assert!(conn.recv_packet().unwrap_err().is_fatal());
    }
}
