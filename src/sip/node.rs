use crate::config::NodeConfig;
use crate::defs::{NodeId, BROADCAST_NODE_ID};
use crate::frame::{read_frame_raw, write_frame_raw};
use crate::sip::{
    packet::{RouteUpdate, SipPacket, SipPacketType},
    protocol::RoutingProtocol,
    son_link::PacketLink,
};
use crate::stcp::segment::Segment;
use anyhow::{Context, Result};
use std::io::BufReader;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Network layer of one overlay node. Routes segments from the local STCP
/// process and packets from the overlay, and keeps the routing protocol fed.
pub struct SipNode {
    pub my_node: NodeId,
    pub config: NodeConfig,
    routing: Arc<dyn RoutingProtocol>,
    son: Arc<dyn PacketLink>,
    stcp: Mutex<Option<TcpStream>>,
    pub threads: Mutex<Vec<JoinHandle<()>>>,
}

impl SipNode {
    pub fn new(
        my_node: NodeId,
        config: NodeConfig,
        routing: Arc<dyn RoutingProtocol>,
        son: Arc<dyn PacketLink>,
    ) -> Result<Arc<Self>> {
        let node = Arc::new(Self {
            my_node,
            config,
            routing,
            son,
            stcp: Mutex::new(None),
            threads: Mutex::new(Vec::new()),
        });
        log::info!(
            "[node={}] Starting SIP with {} routing.\n{}",
            my_node,
            node.routing.name(),
            node.routing.dump()
        );

        let node_recv = node.clone();
        let handle_recv = thread::spawn(move || {
            node_recv.packet_handler();
        });
        let node_advertise = node.clone();
        let handle_advertise = thread::spawn(move || {
            node_advertise.route_advertiser();
        });
        node.threads
            .lock()
            .unwrap()
            .extend([handle_recv, handle_advertise]);

        Ok(node)
    }

    pub fn routing(&self) -> &Arc<dyn RoutingProtocol> {
        &self.routing
    }

    fn packet_handler(&self) {
        log::info!("[node={}] Starting packet handler.", self.my_node);
        loop {
            match self.son.recv_packet() {
                Ok(packet) => self.handle_packet(packet),
                Err(e) if e.is_fatal() => {
                    log::error!("[node={}] SON link is gone. Err: {}", self.my_node, e);
                    return;
                }
                Err(e) => log::warn!("[node={}] Skipped a packet. Err: {}", self.my_node, e),
            }
        }
    }

    pub fn handle_packet(&self, packet: SipPacket) {
        log::trace!("[node={}] Received {}.", self.my_node, packet.print_general_info());
        match packet.packet_type {
            SipPacketType::RouteUpdate => self.handle_route_update(&packet),
            SipPacketType::Sip => self.forward(packet),
            SipPacketType::Unknown => {}
        }
    }

    fn handle_route_update(&self, packet: &SipPacket) {
        let update = match RouteUpdate::read(&packet.payload) {
            Ok(update) => update,
            Err(e) => {
                log::warn!(
                    "[node={}] Dropped a route update from {}. Err: {}",
                    self.my_node,
                    packet.src_node,
                    e
                );
                return;
            }
        };
        match self.routing.handle_route_update(packet.src_node, &update) {
            Ok(replies) => {
                for reply in replies {
                    if let Err(e) = self.son.send_packet(BROADCAST_NODE_ID, &reply) {
                        log::warn!("[node={}] Failed to flood an update. Err: {}", self.my_node, e);
                    }
                }
            }
            Err(e) => log::warn!("[node={}] {}", self.my_node, e),
        }
    }

    /// Delivers a data packet addressed to this node, or sends it on towards
    /// its destination.
    pub fn forward(&self, packet: SipPacket) {
        if packet.dst_node == self.my_node {
            self.deliver_local(&packet);
            return;
        }
        match self.routing.next_hop(packet.dst_node) {
            Some(next_hop) => {
                log::trace!(
                    "[node={}] {} via {}.",
                    self.my_node,
                    packet.print_general_info(),
                    next_hop
                );
                if let Err(e) = self.son.send_packet(next_hop, &packet) {
                    log::warn!("[node={}] Failed to send to {}. Err: {}", self.my_node, next_hop, e);
                }
            }
            None => log::warn!(
                "[node={}] No route to {}, dropped {}.",
                self.my_node,
                packet.dst_node,
                packet.print_general_info()
            ),
        }
    }

    fn deliver_local(&self, packet: &SipPacket) {
        let mut stcp = self.stcp.lock().unwrap();
        let Some(stream) = stcp.as_mut() else {
            log::debug!(
                "[node={}] No STCP process, dropped {}.",
                self.my_node,
                packet.print_general_info()
            );
            return;
        };
        if log::log_enabled!(log::Level::Trace) {
            match packet.segment() {
                Ok(segment) => log::trace!(
                    "[node={}] Delivering {} from node {}.",
                    self.my_node,
                    segment.print_general_info(),
                    packet.src_node
                ),
                // STCP drops it on its checksum.
                Err(e) => log::trace!(
                    "[node={}] Delivering an unreadable segment from node {}. Err: {}",
                    self.my_node,
                    packet.src_node,
                    e
                ),
            }
        }
        if let Err(e) = write_frame_raw(stream, Some(packet.src_node), &packet.payload) {
            log::warn!("[node={}] Failed to deliver to STCP. Err: {}", self.my_node, e);
        }
    }

    fn route_advertiser(&self) {
        loop {
            if let Some(update) = self.routing.advertisement() {
                let packet = SipPacket::new_route_update(self.my_node, &update);
                if let Err(e) = self.son.send_packet(BROADCAST_NODE_ID, &packet) {
                    if e.is_fatal() {
                        log::error!("[node={}] Route advertiser stops. Err: {}", self.my_node, e);
                        return;
                    }
                    log::warn!("[node={}] Failed to advertise routes. Err: {}", self.my_node, e);
                }
            }
            log::debug!("[node={}]\n{}", self.my_node, self.routing.dump());
            thread::sleep(self.config.route_update_interval);
        }
    }

    /// Accepts STCP processes one after another. Each one is served until it
    /// disconnects.
    pub fn serve_stcp(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, addr) = listener
                .accept()
                .context("Failed to accept an STCP connection.")?;
            log::info!("[node={}] STCP process connected from {}.", self.my_node, addr);
            *self.stcp.lock().unwrap() = Some(
                stream
                    .try_clone()
                    .context("Failed to clone the STCP stream.")?,
            );
            self.handle_stcp(stream);
            *self.stcp.lock().unwrap() = None;
            log::info!("[node={}] STCP process disconnected.", self.my_node);
        }
    }

    fn handle_stcp(&self, stream: TcpStream) {
        let mut reader = BufReader::new(stream);
        loop {
            match read_frame_raw::<_, Segment>(&mut reader, true) {
                Ok((dst_node, raw)) => {
                    let dst_node = dst_node.unwrap_or(self.my_node);
                    self.forward(SipPacket::new_segment(self.my_node, dst_node, raw));
                }
                Err(e) if e.is_fatal() => return,
                Err(e) => log::warn!("[node={}] Skipped an STCP frame. Err: {}", self.my_node, e),
            }
        }
    }
}
