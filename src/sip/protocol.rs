use crate::defs::NodeId;
use crate::sip::{
    distance_vector::DistanceVector,
    link_state::LinkState,
    packet::{RouteUpdate, SipPacket},
    routing_table::RoutingTable,
};
use crate::topology::Topology;
use anyhow::Result;
use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoutingError {
    #[error("Route update from node {src} which is not a neighbor.")]
    NotNeighbor { src: NodeId },
    #[error("Malformed route update from node {src}. {reason}")]
    Malformed { src: NodeId, reason: String },
}

/// Route computation of one SIP node. Implementations keep their own locks
/// and are driven by the packet handler and the advertiser threads.
pub trait RoutingProtocol: Send + Sync {
    fn name(&self) -> &'static str;

    fn next_hop(&self, dest_node: NodeId) -> Option<NodeId>;

    /// Periodic update to broadcast, if the protocol sends any.
    fn advertisement(&self) -> Option<RouteUpdate>;

    /// Applies an update received from the overlay and returns packets to
    /// broadcast in response.
    fn handle_route_update(
        &self,
        src_node: NodeId,
        update: &RouteUpdate,
    ) -> Result<Vec<SipPacket>, RoutingError>;

    fn routing_table(&self) -> RoutingTable;

    fn dump(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMode {
    DistanceVector,
    LinkState,
}

impl FromStr for RoutingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dv" | "distance-vector" => Ok(RoutingMode::DistanceVector),
            "ls" | "link-state" => Ok(RoutingMode::LinkState),
            other => anyhow::bail!("Unknown routing mode {:?}, expected dv or ls.", other),
        }
    }
}

impl Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RoutingMode::DistanceVector => write!(f, "dv"),
            RoutingMode::LinkState => write!(f, "ls"),
        }
    }
}

impl RoutingMode {
    pub fn build(
        &self,
        topology: &Topology,
        my_node: NodeId,
        slots: usize,
    ) -> Arc<dyn RoutingProtocol> {
        match self {
            RoutingMode::DistanceVector => Arc::new(DistanceVector::new(topology, my_node, slots)),
            RoutingMode::LinkState => Arc::new(LinkState::new(topology, my_node, slots)),
        }
    }
}

#[cfg(test)]
mod protocol_tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("dv", RoutingMode::DistanceVector)]
    #[case("LS", RoutingMode::LinkState)]
    #[case("link-state", RoutingMode::LinkState)]
    fn test_routing_mode_from_str(#[case] input: &str, #[case] expected: RoutingMode) {
        assert_eq!(input.parse::<RoutingMode>().unwrap(), expected);
    }

    #[test]
    fn test_routing_mode_unknown() {
        assert!("ospf".parse::<RoutingMode>().is_err());
    }
}
