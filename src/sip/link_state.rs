use crate::defs::{NodeId, INFINITE_COST, UPDATE_HOP_CEIL, UPDATE_HOP_FLOOR};
use crate::sip::{
    packet::{RouteUpdate, SipPacket},
    protocol::{RoutingError, RoutingProtocol},
    routing_table::RoutingTable,
};
use crate::topology::Topology;
use std::fmt::{self, Display};
use std::sync::Mutex;

/// Cost matrix over every topology node with all-pairs shortest paths.
#[derive(Debug, Clone)]
pub struct LinkStateGraph {
    node_ids: Vec<NodeId>,
    links: Vec<Vec<u32>>,
    removed: Vec<bool>,
    dist: Vec<Vec<u32>>,
    next: Vec<Vec<Option<usize>>>,
}

impl LinkStateGraph {
    pub fn new(topology: &Topology) -> Self {
        let node_ids = topology.node_ids();
        let links = node_ids
            .iter()
            .map(|&from| node_ids.iter().map(|&to| topology.cost(from, to)).collect())
            .collect();
        let n = node_ids.len();
        let mut graph = Self {
            node_ids,
            links,
            removed: vec![false; n],
            dist: Vec::new(),
            next: Vec::new(),
        };
        graph.recompute();
        graph
    }

    fn index(&self, node: NodeId) -> Option<usize> {
        self.node_ids.iter().position(|&n| n == node)
    }

    /// Floyd-Warshall over the direct links of nodes not marked removed.
    pub fn recompute(&mut self) {
        let n = self.node_ids.len();
        self.dist = vec![vec![INFINITE_COST; n]; n];
        self.next = vec![vec![None; n]; n];
        for i in 0..n {
            for j in 0..n {
                if self.removed[i] || self.removed[j] {
                    continue;
                }
                if i == j {
                    self.dist[i][j] = 0;
                } else if self.links[i][j] < INFINITE_COST {
                    self.dist[i][j] = self.links[i][j];
                    self.next[i][j] = Some(j);
                }
            }
        }
        for k in 0..n {
            for i in 0..n {
                if self.dist[i][k] >= INFINITE_COST {
                    continue;
                }
                for j in 0..n {
                    if self.dist[k][j] >= INFINITE_COST {
                        continue;
                    }
                    let via = self.dist[i][k] + self.dist[k][j];
                    if via < self.dist[i][j] {
                        self.dist[i][j] = via;
                        self.next[i][j] = self.next[i][k];
                    }
                }
            }
        }
    }

    /// Marks `node` unreachable in both directions. Returns false if it was
    /// unknown or already removed.
    pub fn remove_node(&mut self, node: NodeId) -> bool {
        match self.index(node) {
            Some(i) if !self.removed[i] => {
                self.removed[i] = true;
                self.recompute();
                true
            }
            _ => false,
        }
    }

    pub fn is_removed(&self, node: NodeId) -> bool {
        self.index(node).is_some_and(|i| self.removed[i])
    }

    pub fn distance(&self, from: NodeId, to: NodeId) -> u32 {
        match (self.index(from), self.index(to)) {
            (Some(i), Some(j)) => self.dist[i][j],
            _ => INFINITE_COST,
        }
    }

    pub fn next_hop(&self, from: NodeId, to: NodeId) -> Option<NodeId> {
        let (i, j) = (self.index(from)?, self.index(to)?);
        self.next[i][j].map(|k| self.node_ids[k])
    }

    pub fn node_ids(&self) -> &[NodeId] {
        &self.node_ids
    }
}

impl Display for LinkStateGraph {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Shortest path costs:\n  from\\to")?;
        for node in &self.node_ids {
            write!(f, " {:>5}", node)?;
        }
        writeln!(f)?;
        for (i, node) in self.node_ids.iter().enumerate() {
            write!(f, "  {:>7}", node)?;
            for cost in &self.dist[i] {
                write!(f, " {:>5}", cost)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Source field of the rebroadcast of a failure notice, `None` to stop.
/// The originator's notice starts the hop budget at `UPDATE_HOP_CEIL` and
/// every relay spends one until `UPDATE_HOP_FLOOR` is reached.
pub fn next_flood_hop(src_field: NodeId, failed_node: NodeId) -> Option<NodeId> {
    if src_field == failed_node {
        Some(UPDATE_HOP_CEIL)
    } else if src_field > UPDATE_HOP_FLOOR && src_field <= UPDATE_HOP_CEIL {
        Some(src_field - 1)
    } else {
        None
    }
}

pub struct LinkState {
    my_node: NodeId,
    // Lock order: graph before routing_table.
    graph: Mutex<LinkStateGraph>,
    routing_table: Mutex<RoutingTable>,
}

impl LinkState {
    pub fn new(topology: &Topology, my_node: NodeId, slots: usize) -> Self {
        let graph = LinkStateGraph::new(topology);
        let mut routing_table = RoutingTable::new(slots);
        Self::update_routing(my_node, &graph, &mut routing_table);
        Self {
            my_node,
            graph: Mutex::new(graph),
            routing_table: Mutex::new(routing_table),
        }
    }

    fn update_routing(my_node: NodeId, graph: &LinkStateGraph, routes: &mut RoutingTable) {
        for &dest in graph.node_ids() {
            if dest == my_node {
                continue;
            }
            match graph.next_hop(my_node, dest) {
                Some(next) => routes.set_next_node(dest, next),
                None => {
                    routes.remove_dest_node(dest);
                }
            }
        }
    }

    pub fn graph(&self) -> LinkStateGraph {
        self.graph.lock().unwrap().clone()
    }
}

impl RoutingProtocol for LinkState {
    fn name(&self) -> &'static str {
        "link-state"
    }

    fn next_hop(&self, dest_node: NodeId) -> Option<NodeId> {
        self.routing_table.lock().unwrap().get_next_node(dest_node)
    }

    fn advertisement(&self) -> Option<RouteUpdate> {
        None
    }

    fn handle_route_update(
        &self,
        src_node: NodeId,
        update: &RouteUpdate,
    ) -> Result<Vec<SipPacket>, RoutingError> {
        let failed = update.failed_node().ok_or_else(|| RoutingError::Malformed {
            src: src_node,
            reason: format!("expected one failure entry, got {:?}", update.entries),
        })?;
        if failed == self.my_node {
            log::debug!("Ignored a failure notice about this node.");
            return Ok(Vec::new());
        }

        let mut graph = self.graph.lock().unwrap();
        if graph.remove_node(failed) {
            log::warn!("Node {} failed, recomputing shortest paths.", failed);
            let mut routes = self.routing_table.lock().unwrap();
            Self::update_routing(self.my_node, &graph, &mut routes);
        }

        Ok(next_flood_hop(src_node, failed)
            .map(|hop| vec![SipPacket::new_route_update(hop, update)])
            .unwrap_or_default())
    }

    fn routing_table(&self) -> RoutingTable {
        self.routing_table.lock().unwrap().clone()
    }

    fn dump(&self) -> String {
        let graph = self.graph.lock().unwrap();
        let routes = self.routing_table.lock().unwrap();
        format!("{}{}", graph, routes)
    }
}
