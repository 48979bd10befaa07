use crate::defs::{NodeId, MAX_ROUTINGTABLE_SLOTS};
use std::fmt::{self, Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub dest_node: NodeId,
    pub next_node: NodeId,
}

/// Hash table from destination node to next hop. Buckets are chained and
/// hold at most one entry per destination.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    slots: Vec<Vec<RouteEntry>>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new(MAX_ROUTINGTABLE_SLOTS)
    }
}

impl RoutingTable {
    pub fn new(slots: usize) -> Self {
        Self {
            slots: vec![Vec::new(); slots.max(1)],
        }
    }

    /// Every direct neighbor routes to itself.
    pub fn with_neighbors(slots: usize, neighbors: &[NodeId]) -> Self {
        let mut table = Self::new(slots);
        for &neighbor in neighbors {
            table.set_next_node(neighbor, neighbor);
        }
        table
    }

    fn make_hash(&self, node: NodeId) -> usize {
        node as usize % self.slots.len()
    }

    pub fn set_next_node(&mut self, dest_node: NodeId, next_node: NodeId) {
        let slot = self.make_hash(dest_node);
        match self.slots[slot].iter_mut().find(|e| e.dest_node == dest_node) {
            Some(entry) => entry.next_node = next_node,
            None => self.slots[slot].push(RouteEntry {
                dest_node,
                next_node,
            }),
        }
    }

    pub fn remove_dest_node(&mut self, dest_node: NodeId) -> bool {
        let slot = self.make_hash(dest_node);
        let before = self.slots[slot].len();
        self.slots[slot].retain(|e| e.dest_node != dest_node);
        self.slots[slot].len() != before
    }

    pub fn get_next_node(&self, dest_node: NodeId) -> Option<NodeId> {
        self.slots[self.make_hash(dest_node)]
            .iter()
            .find(|e| e.dest_node == dest_node)
            .map(|e| e.next_node)
    }

    /// Destinations currently routed through `next_node`.
    pub fn dests_via(&self, next_node: NodeId) -> Vec<NodeId> {
        self.entries()
            .into_iter()
            .filter(|e| e.next_node == next_node)
            .map(|e| e.dest_node)
            .collect()
    }

    pub fn entries(&self) -> Vec<RouteEntry> {
        let mut entries: Vec<RouteEntry> = self.slots.iter().flatten().copied().collect();
        entries.sort_by_key(|e| e.dest_node);
        entries
    }

    pub fn len(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Routing table: dest -> next")?;
        for entry in self.entries() {
            writeln!(f, "  {:>5} -> {}", entry.dest_node, entry.next_node)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod routing_table_tests {
    use super::*;

    #[test]
    fn test_neighbors_route_to_themselves() {
        let table = RoutingTable::with_neighbors(10, &[3, 7]);
        assert_eq!(table.get_next_node(3), Some(3));
        assert_eq!(table.get_next_node(7), Some(7));
        assert_eq!(table.get_next_node(4), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_colliding_destinations_share_a_bucket() {
        let mut table = RoutingTable::new(10);
        table.set_next_node(5, 1);
        table.set_next_node(15, 2);
        table.set_next_node(25, 3);
        assert_eq!(table.get_next_node(15), Some(2));

        table.set_next_node(15, 9);
        assert_eq!(table.get_next_node(15), Some(9));
        assert_eq!(table.len(), 3);

        assert!(table.remove_dest_node(15));
        assert!(!table.remove_dest_node(15));
        assert_eq!(table.get_next_node(15), None);
        assert_eq!(table.get_next_node(5), Some(1));
        assert_eq!(table.get_next_node(25), Some(3));
    }

    #[test]
    fn test_dests_via_and_dump() {
        let mut table = RoutingTable::with_neighbors(4, &[2, 3]);
        table.set_next_node(9, 2);
        table.set_next_node(12, 3);
        assert_eq!(table.dests_via(2), vec![2, 9]);
        let dump = table.to_string();
        assert!(dump.contains("    9 -> 2"));
        assert_eq!(dump.lines().count(), 5);
    }
}
