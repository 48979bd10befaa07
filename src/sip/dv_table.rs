use crate::defs::{NodeId, INFINITE_COST};
use crate::topology::Topology;
use std::fmt::{self, Display};

/// Direct link costs from this node to each neighbor.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborCostTable {
    entries: Vec<(NodeId, u32)>,
}

impl NeighborCostTable {
    pub fn new(topology: &Topology, my_node: NodeId) -> Self {
        Self {
            entries: topology
                .neighbor_ids(my_node)
                .into_iter()
                .map(|nbr| (nbr, topology.cost(my_node, nbr)))
                .collect(),
        }
    }

    pub fn get_cost(&self, node: NodeId) -> u32 {
        self.entries
            .iter()
            .find(|(nbr, _)| *nbr == node)
            .map_or(INFINITE_COST, |(_, cost)| *cost)
    }

    pub fn neighbor_ids(&self) -> Vec<NodeId> {
        self.entries.iter().map(|(nbr, _)| *nbr).collect()
    }
}

impl Display for NeighborCostTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Neighbor costs:")?;
        for (nbr, cost) in &self.entries {
            writeln!(f, "  {:>5} : {}", nbr, cost)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct DvRow {
    node_id: NodeId,
    costs: Vec<u32>,
}

/// Distance vectors of this node (row 0) and of each neighbor, over every
/// node of the topology.
#[derive(Debug, Clone, PartialEq)]
pub struct DvTable {
    node_ids: Vec<NodeId>,
    rows: Vec<DvRow>,
}

impl DvTable {
    pub fn new(topology: &Topology, my_node: NodeId, nbr_costs: &NeighborCostTable) -> Self {
        let node_ids = topology.node_ids();
        let own = DvRow {
            node_id: my_node,
            costs: node_ids
                .iter()
                .map(|&node| {
                    if node == my_node {
                        0
                    } else {
                        nbr_costs.get_cost(node)
                    }
                })
                .collect(),
        };
        let mut rows = vec![own];
        for nbr in nbr_costs.neighbor_ids() {
            rows.push(DvRow {
                node_id: nbr,
                costs: vec![INFINITE_COST; node_ids.len()],
            });
        }
        Self { node_ids, rows }
    }

    fn column(&self, node: NodeId) -> Option<usize> {
        self.node_ids.iter().position(|&n| n == node)
    }

    pub fn my_node(&self) -> NodeId {
        self.rows[0].node_id
    }

    pub fn has_row(&self, from: NodeId) -> bool {
        self.rows.iter().any(|row| row.node_id == from)
    }

    pub fn has_node(&self, node: NodeId) -> bool {
        self.column(node).is_some()
    }

    /// Returns false if either node is unknown to the table.
    pub fn set_cost(&mut self, from: NodeId, to: NodeId, cost: u32) -> bool {
        let Some(column) = self.column(to) else {
            return false;
        };
        match self.rows.iter_mut().find(|row| row.node_id == from) {
            Some(row) => {
                row.costs[column] = cost.min(INFINITE_COST);
                true
            }
            None => false,
        }
    }

    pub fn get_cost(&self, from: NodeId, to: NodeId) -> u32 {
        if from == to {
            return 0;
        }
        let Some(column) = self.column(to) else {
            return INFINITE_COST;
        };
        self.rows
            .iter()
            .find(|row| row.node_id == from)
            .map_or(INFINITE_COST, |row| row.costs[column])
    }

    /// This node's own vector as (node, cost) pairs.
    pub fn own_vector(&self) -> Vec<(NodeId, u32)> {
        self.node_ids
            .iter()
            .copied()
            .zip(self.rows[0].costs.iter().copied())
            .collect()
    }
}

impl Display for DvTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Distance vectors:\n  from\\to")?;
        for node in &self.node_ids {
            write!(f, " {:>5}", node)?;
        }
        writeln!(f)?;
        for row in &self.rows {
            write!(f, "  {:>7}", row.node_id)?;
            for cost in &row.costs {
                write!(f, " {:>5}", cost)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
