use crate::defs::NodeId;
use crate::frame::{write_frame, FrameError};
use crate::sip::packet::SipPacket;
use crate::topology::Topology;
use std::collections::BTreeMap;
use std::io;
use std::net::{Ipv4Addr, TcpStream};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct Neighbor {
    pub node_id: NodeId,
    pub addr: Ipv4Addr,
    conn: Option<Arc<Mutex<TcpStream>>>,
}

impl Neighbor {
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }
}

/// Overlay neighbors of this node and the live link to each. A neighbor
/// whose link drops is removed for good.
#[derive(Debug, Default)]
pub struct NeighborTable {
    entries: Mutex<BTreeMap<NodeId, Neighbor>>,
}

impl NeighborTable {
    pub fn new(topology: &Topology, my_node: NodeId) -> Self {
        let entries = topology
            .neighbor_ids(my_node)
            .into_iter()
            .filter_map(|id| topology.node(id))
            .map(|node| {
                (
                    node.id,
                    Neighbor {
                        node_id: node.id,
                        addr: node.addr,
                        conn: None,
                    },
                )
            })
            .collect();
        Self {
            entries: Mutex::new(entries),
        }
    }

    pub fn get(&self, node_id: NodeId) -> Option<Neighbor> {
        self.entries.lock().unwrap().get(&node_id).cloned()
    }

    pub fn neighbor_ids(&self) -> Vec<NodeId> {
        self.entries.lock().unwrap().keys().copied().collect()
    }

    pub fn connected_ids(&self) -> Vec<NodeId> {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|nbr| nbr.is_connected())
            .map(|nbr| nbr.node_id)
            .collect()
    }

    pub fn all_connected(&self) -> bool {
        self.entries.lock().unwrap().values().all(Neighbor::is_connected)
    }

    /// Stores the link to `node_id`. Returns false if the node is not a
    /// neighbor or already has a link.
    pub fn attach(&self, node_id: NodeId, stream: TcpStream) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(&node_id) {
            Some(nbr) if nbr.conn.is_none() => {
                nbr.conn = Some(Arc::new(Mutex::new(stream)));
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, node_id: NodeId) -> bool {
        self.entries.lock().unwrap().remove(&node_id).is_some()
    }

    pub fn send_to(&self, node_id: NodeId, packet: &SipPacket) -> Result<(), FrameError> {
        let conn = self
            .entries
            .lock()
            .unwrap()
            .get(&node_id)
            .and_then(|nbr| nbr.conn.clone())
            .ok_or_else(|| FrameError::Closed(io::ErrorKind::NotConnected.into()))?;
        let mut stream = conn.lock().unwrap();
        write_frame(&mut *stream, None, &mut packet.clone())
    }

    /// Sends `packet` to every connected neighbor and returns how many took it.
    pub fn broadcast(&self, packet: &SipPacket) -> usize {
        self.connected_ids()
            .into_iter()
            .filter(|&id| match self.send_to(id, packet) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Failed to send to neighbor {}. Err: {}", id, e);
                    false
                }
            })
            .count()
    }
}
