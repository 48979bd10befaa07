use crate::defs::{NodeId, INFINITE_COST};
use std::collections::BTreeMap;
use std::fs;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("Failed to read topology file. Err: {0}")]
    Io(#[from] std::io::Error),
    #[error("Bad topology line {line}: {content:?}. Expected \"host1 host2 cost\".")]
    Parse { line: usize, content: String },
    #[error("Cannot resolve host {host} to an IPv4 address.")]
    Resolve { host: String },
    #[error("Hosts {first} and {second} share node id {id}.")]
    DuplicateNodeId {
        id: NodeId,
        first: String,
        second: String,
    },
    #[error("Host {host} is not part of the topology.")]
    UnknownHost { host: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopologyNode {
    pub id: NodeId,
    pub hostname: String,
    pub addr: Ipv4Addr,
    pub links: BTreeMap<NodeId, u32>,
}

/// Static overlay graph read from lines of `host1 host2 cost`.
/// Links are symmetric and node ids come from the last address octet.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    nodes: BTreeMap<NodeId, TopologyNode>,
}

pub fn node_id_from_ip(addr: &Ipv4Addr) -> NodeId {
    NodeId::from(addr.octets()[3])
}

/// Literal IPv4 addresses first, then the system resolver.
pub fn resolve_host(host: &str) -> Result<Ipv4Addr, TopologyError> {
    if let Ok(addr) = host.parse::<Ipv4Addr>() {
        return Ok(addr);
    }
    let resolved = (host, 0)
        .to_socket_addrs()
        .map_err(|_| TopologyError::Resolve {
            host: host.to_string(),
        })?
        .find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(*v4.ip()),
            SocketAddr::V6(_) => None,
        });
    resolved.ok_or(TopologyError::Resolve {
        host: host.to_string(),
    })
}

impl Topology {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TopologyError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, TopologyError> {
        Self::parse_with(text, resolve_host)
    }

    pub fn parse_with<F>(text: &str, resolver: F) -> Result<Self, TopologyError>
    where
        F: Fn(&str) -> Result<Ipv4Addr, TopologyError>,
    {
        let mut topology = Self::default();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parse_error = || TopologyError::Parse {
                line: index + 1,
                content: raw.to_string(),
            };
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [host1, host2, cost] = fields[..] else {
                return Err(parse_error());
            };
            let cost: u32 = cost.parse().map_err(|_| parse_error())?;
            let id1 = topology.add_node(host1, resolver(host1)?)?;
            let id2 = topology.add_node(host2, resolver(host2)?)?;
            if id1 == id2 {
                return Err(parse_error());
            }
            topology.add_link(id1, id2, cost);
        }
        Ok(topology)
    }

    fn add_node(&mut self, hostname: &str, addr: Ipv4Addr) -> Result<NodeId, TopologyError> {
        let id = node_id_from_ip(&addr);
        match self.nodes.get(&id) {
            Some(node) if node.hostname != hostname && node.addr != addr => {
                Err(TopologyError::DuplicateNodeId {
                    id,
                    first: node.hostname.clone(),
                    second: hostname.to_string(),
                })
            }
            Some(_) => Ok(id),
            None => {
                self.nodes.insert(
                    id,
                    TopologyNode {
                        id,
                        hostname: hostname.to_string(),
                        addr,
                        links: BTreeMap::new(),
                    },
                );
                Ok(id)
            }
        }
    }

    fn add_link(&mut self, a: NodeId, b: NodeId, cost: u32) {
        if let Some(node) = self.nodes.get_mut(&a) {
            node.links.insert(b, cost);
        }
        if let Some(node) = self.nodes.get_mut(&b) {
            node.links.insert(a, cost);
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn node(&self, id: NodeId) -> Option<&TopologyNode> {
        self.nodes.get(&id)
    }

    pub fn node_by_hostname(&self, hostname: &str) -> Result<&TopologyNode, TopologyError> {
        self.nodes
            .values()
            .find(|node| node.hostname == hostname)
            .or_else(|| {
                hostname
                    .parse::<Ipv4Addr>()
                    .ok()
                    .and_then(|addr| self.nodes.values().find(|node| node.addr == addr))
            })
            .ok_or(TopologyError::UnknownHost {
                host: hostname.to_string(),
            })
    }

    pub fn neighbor_count(&self, id: NodeId) -> usize {
        self.nodes.get(&id).map_or(0, |node| node.links.len())
    }

    pub fn neighbor_ids(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&id)
            .map(|node| node.links.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Direct link cost. Zero to itself, `INFINITE_COST` without a link.
    pub fn cost(&self, from: NodeId, to: NodeId) -> u32 {
        if from == to {
            return 0;
        }
        self.nodes
            .get(&from)
            .and_then(|node| node.links.get(&to).copied())
            .unwrap_or(INFINITE_COST)
    }
}
