use crate::config::NodeConfig;
use crate::defs::{NodeId, BROADCAST_NODE_ID};
use crate::frame::{connect_with_retry, read_frame, write_frame};
use crate::sip::packet::SipPacket;
use crate::son::neighbor_table::NeighborTable;
use crate::topology::Topology;
use anyhow::{Context, Result};
use std::io::{BufReader, Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const NEIGHBOR_POLLING_INTERVAL: Duration = Duration::from_millis(50);

/// Overlay process of one node. Keeps one TCP link per topology neighbor and
/// relays SIP packets between them and the local SIP process.
pub struct SonNode {
    pub my_node: NodeId,
    pub addr: Ipv4Addr,
    pub config: NodeConfig,
    pub neighbors: NeighborTable,
    sip: Mutex<Option<TcpStream>>,
    pub threads: Mutex<Vec<JoinHandle<()>>>,
}

impl SonNode {
    /// Starts listening for neighbors with larger ids and dials the ones with
    /// smaller ids. Returns without waiting for the links.
    pub fn new(topology: &Topology, my_node: NodeId, config: NodeConfig) -> Result<Arc<Self>> {
        let addr = topology
            .node(my_node)
            .with_context(|| format!("Node {} is not part of the topology.", my_node))?
            .addr;
        let listener = TcpListener::bind(SocketAddrV4::new(addr, config.connection_port))
            .with_context(|| {
                format!("Failed to bind {}:{} for neighbors.", addr, config.connection_port)
            })?;
        let son = Arc::new(Self {
            my_node,
            addr,
            config,
            neighbors: NeighborTable::new(topology, my_node),
            sip: Mutex::new(None),
            threads: Mutex::new(Vec::new()),
        });
        log::info!(
            "[node={}] Overlay starts at {} with neighbors {:?}.",
            my_node,
            addr,
            son.neighbors.neighbor_ids()
        );

        let son_accept = son.clone();
        let handle_accept = thread::spawn(move || {
            son_accept.accept_neighbors(listener);
        });
        son.threads.lock().unwrap().push(handle_accept);

        for nbr in son.neighbors.neighbor_ids() {
            if nbr >= my_node {
                continue;
            }
            let son_connect = son.clone();
            let handle_connect = thread::spawn(move || {
                if let Err(e) = son_connect.connect_neighbor(nbr) {
                    log::error!("[node={}] {:?}", my_node, e);
                }
            });
            son.threads.lock().unwrap().push(handle_connect);
        }
        Ok(son)
    }

    /// Blocks until every neighbor has a link or `timeout` passes. Returns
    /// whether all links are up.
    pub fn wait_for_neighbors(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        while !self.neighbors.all_connected() {
            if start.elapsed() >= timeout {
                log::warn!(
                    "[node={}] Only {:?} of {:?} are connected.",
                    self.my_node,
                    self.neighbors.connected_ids(),
                    self.neighbors.neighbor_ids()
                );
                return false;
            }
            thread::sleep(NEIGHBOR_POLLING_INTERVAL);
        }
        log::info!("[node={}] All neighbor links are up.", self.my_node);
        true
    }

    fn accept_neighbors(self: Arc<Self>, listener: TcpListener) {
        for incoming in listener.incoming() {
            let mut stream = match incoming {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("[node={}] Failed to accept a neighbor. Err: {}", self.my_node, e);
                    continue;
                }
            };
            let mut hello = [0u8; 4];
            if let Err(e) = stream.read_exact(&mut hello) {
                log::warn!("[node={}] Neighbor sent no hello. Err: {}", self.my_node, e);
                continue;
            }
            let nbr = NodeId::from_be_bytes(hello);
            if nbr <= self.my_node {
                log::warn!("[node={}] Refused a link from node {}.", self.my_node, nbr);
                continue;
            }
            if let Err(e) = self.clone().start_link(nbr, stream) {
                log::warn!("[node={}] {:?}", self.my_node, e);
            }
        }
    }

    fn connect_neighbor(self: Arc<Self>, nbr: NodeId) -> Result<()> {
        let nbr_addr = self
            .neighbors
            .get(nbr)
            .with_context(|| format!("Node {} is not a neighbor.", nbr))?
            .addr;
        let target = SocketAddrV4::new(nbr_addr, self.config.connection_port);
        let mut stream =
            connect_with_retry(target.into(), self.config.neighbor_connect_timeout)
                .with_context(|| format!("Neighbor {} never answered.", nbr))?;
        stream
            .write_all(&self.my_node.to_be_bytes())
            .context("Failed to send the hello.")?;
        self.start_link(nbr, stream)
    }

    fn start_link(self: Arc<Self>, nbr: NodeId, stream: TcpStream) -> Result<()> {
        let reader = stream.try_clone().context("Failed to clone a neighbor stream.")?;
        anyhow::ensure!(
            self.neighbors.attach(nbr, stream),
            "Node {} is not a neighbor or is already linked.",
            nbr
        );
        log::info!("[node={}] Linked with neighbor {}.", self.my_node, nbr);
        let son_listen = self.clone();
        let handle_listen = thread::spawn(move || {
            son_listen.listen_to_neighbor(nbr, reader);
        });
        self.threads.lock().unwrap().push(handle_listen);
        Ok(())
    }

    fn listen_to_neighbor(&self, nbr: NodeId, stream: TcpStream) {
        let mut reader = BufReader::new(stream);
        loop {
            match read_frame::<_, SipPacket>(&mut reader, false) {
                Ok((_, packet)) => self.forward_to_sip(&packet),
                Err(e) if e.is_fatal() => {
                    log::warn!("[node={}] Neighbor {} is lost. Err: {}", self.my_node, nbr, e);
                    self.neighbors.remove(nbr);
                    self.forward_to_sip(&SipPacket::new_failure_notice(nbr));
                    return;
                }
                Err(e) => log::debug!(
                    "[node={}] Skipped a frame from neighbor {}. Err: {}",
                    self.my_node,
                    nbr,
                    e
                ),
            }
        }
    }

    fn forward_to_sip(&self, packet: &SipPacket) {
        let mut sip = self.sip.lock().unwrap();
        let Some(stream) = sip.as_mut() else {
            log::debug!(
                "[node={}] No SIP process, dropped {}.",
                self.my_node,
                packet.print_general_info()
            );
            return;
        };
        if let Err(e) = write_frame(stream, None, &mut packet.clone()) {
            log::warn!("[node={}] Failed to forward to SIP. Err: {}", self.my_node, e);
        }
    }

    /// Serves SIP processes one after another. When one goes away, every
    /// neighbor is told that this node failed.
    pub fn serve_sip(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, addr) = listener
                .accept()
                .context("Failed to accept a SIP connection.")?;
            log::info!("[node={}] SIP process connected from {}.", self.my_node, addr);
            *self.sip.lock().unwrap() =
                Some(stream.try_clone().context("Failed to clone the SIP stream.")?);
            self.handle_sip(stream);
            *self.sip.lock().unwrap() = None;

            let sent = self
                .neighbors
                .broadcast(&SipPacket::new_failure_notice(self.my_node));
            log::warn!(
                "[node={}] SIP process is gone, told {} neighbors.",
                self.my_node,
                sent
            );
        }
    }

    fn handle_sip(&self, stream: TcpStream) {
        let mut reader = BufReader::new(stream);
        loop {
            match read_frame::<_, SipPacket>(&mut reader, true) {
                Ok((Some(BROADCAST_NODE_ID), packet)) => {
                    self.neighbors.broadcast(&packet);
                }
                Ok((Some(next_hop), packet)) => {
                    if let Err(e) = self.neighbors.send_to(next_hop, &packet) {
                        log::warn!(
                            "[node={}] Cannot reach neighbor {}. Err: {}",
                            self.my_node,
                            next_hop,
                            e
                        );
                    }
                }
                Ok((None, _)) => {}
                Err(e) if e.is_fatal() => return,
                Err(e) => log::debug!("[node={}] Skipped a SIP frame. Err: {}", self.my_node, e),
            }
        }
    }
}
