use crate::defs::{NodeId, INFINITE_COST};
use crate::sip::{
    dv_table::{DvTable, NeighborCostTable},
    packet::{RouteUpdate, SipPacket},
    protocol::{RoutingError, RoutingProtocol},
    routing_table::RoutingTable,
};
use crate::topology::Topology;
use std::sync::Mutex;

/// Bellman-Ford over neighbor advertisements. There is no poisoned reverse,
/// so a lost destination may count to infinity before it settles.
pub struct DistanceVector {
    my_node: NodeId,
    nbr_costs: NeighborCostTable,
    // Lock order: dv_table before routing_table.
    dv_table: Mutex<DvTable>,
    routing_table: Mutex<RoutingTable>,
}

impl DistanceVector {
    pub fn new(topology: &Topology, my_node: NodeId, slots: usize) -> Self {
        let nbr_costs = NeighborCostTable::new(topology, my_node);
        let dv_table = DvTable::new(topology, my_node, &nbr_costs);
        let routing_table = RoutingTable::with_neighbors(slots, &nbr_costs.neighbor_ids());
        Self {
            my_node,
            nbr_costs,
            dv_table: Mutex::new(dv_table),
            routing_table: Mutex::new(routing_table),
        }
    }

    pub fn dv_table(&self) -> DvTable {
        self.dv_table.lock().unwrap().clone()
    }
}

impl RoutingProtocol for DistanceVector {
    fn name(&self) -> &'static str {
        "distance-vector"
    }

    fn next_hop(&self, dest_node: NodeId) -> Option<NodeId> {
        self.routing_table.lock().unwrap().get_next_node(dest_node)
    }

    fn advertisement(&self) -> Option<RouteUpdate> {
        Some(RouteUpdate::new(self.dv_table.lock().unwrap().own_vector()))
    }

    fn handle_route_update(
        &self,
        src_node: NodeId,
        update: &RouteUpdate,
    ) -> Result<Vec<SipPacket>, RoutingError> {
        let me = self.my_node;
        let mut dv = self.dv_table.lock().unwrap();
        if !dv.has_row(src_node) {
            return Err(RoutingError::NotNeighbor { src: src_node });
        }
        let mut routes = self.routing_table.lock().unwrap();

        for entry in &update.entries {
            dv.set_cost(src_node, entry.node_id, entry.cost);
        }

        // Relax over the direct link. The own-row cost to the neighbor may be
        // a multi-hop path or purged to infinity.
        let link_cost = self.nbr_costs.get_cost(src_node);
        for entry in &update.entries {
            let dest = entry.node_id;
            if dest == me || !dv.has_node(dest) {
                continue;
            }
            if dest == src_node && entry.cost >= INFINITE_COST {
                log::warn!("Neighbor {} is lost, purging routes through it.", src_node);
                dv.set_cost(me, src_node, INFINITE_COST);
                for victim in routes.dests_via(src_node) {
                    routes.remove_dest_node(victim);
                    dv.set_cost(me, victim, INFINITE_COST);
                }
                continue;
            }
            let via = entry.cost.saturating_add(link_cost);
            if dv.get_cost(me, dest) > via {
                log::debug!(
                    "Route to {} improves to {} via {} (was {}).",
                    dest,
                    via,
                    src_node,
                    dv.get_cost(me, dest)
                );
                dv.set_cost(me, dest, via);
                routes.set_next_node(dest, src_node);
            }
        }
        Ok(Vec::new())
    }

    fn routing_table(&self) -> RoutingTable {
        self.routing_table.lock().unwrap().clone()
    }

    fn dump(&self) -> String {
        let dv = self.dv_table.lock().unwrap();
        let routes = self.routing_table.lock().unwrap();
        format!("{}{}{}", self.nbr_costs, dv, routes)
    }
}
