use serial_test::serial;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use stcp_sip::config::NodeConfig;
use stcp_sip::defs::{NodeId, BROADCAST_NODE_ID};
use stcp_sip::frame::connect_with_retry;
use stcp_sip::sip::packet::{RouteUpdate, SipPacket};
use stcp_sip::sip::son_link::{PacketLink, SonConnection};
use stcp_sip::son::overlay::SonNode;
use stcp_sip::topology::Topology;

const CONNECTION_PORT: u16 = 45690;
const SON_PORT: u16 = 45691;

fn start_son(topology: &Topology, node: NodeId, config: &NodeConfig) -> Arc<SonNode> {
    let son = SonNode::new(topology, node, config.clone()).unwrap();
    let listener = TcpListener::bind(SocketAddrV4::new(son.addr, SON_PORT)).unwrap();
    let son_serve = son.clone();
    thread::spawn(move || son_serve.serve_sip(listener));
    son
}

// Stands in for the SIP process of one node.
fn attach_sip(addr: Ipv4Addr) -> SonConnection {
    let stream = connect_with_retry(SocketAddrV4::new(addr, SON_PORT).into(), Duration::from_secs(5))
        .unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    SonConnection::from_stream(stream).unwrap()
}

#[test]
#[serial]
fn test_overlay_relays_and_reports_sip_loss() {
    let topology = Topology::parse("127.0.0.1 127.0.0.2 1\n").unwrap();
    let config = NodeConfig {
        connection_port: CONNECTION_PORT,
        son_port: SON_PORT,
        neighbor_connect_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let son_1 = start_son(&topology, 1, &config);
    let son_2 = start_son(&topology, 2, &config);
    assert!(son_1.wait_for_neighbors(Duration::from_secs(5)));
    assert!(son_2.wait_for_neighbors(Duration::from_secs(5)));
    assert_eq!(son_1.neighbors.connected_ids(), vec![2]);
    assert_eq!(son_2.neighbors.connected_ids(), vec![1]);

    let sip_1 = attach_sip(son_1.addr);
    let sip_2 = attach_sip(son_2.addr);
    // Let both overlays register their SIP connection.
    thread::sleep(Duration::from_millis(200));

    let data = SipPacket::new_segment(1, 2, b"over the overlay".to_vec());
    sip_1.send_packet(2, &data).unwrap();
    assert_eq!(sip_2.recv_packet().unwrap(), data);

    let update = SipPacket::new_route_update(2, &RouteUpdate::new(vec![(1, 1), (2, 0)]));
    sip_2.send_packet(BROADCAST_NODE_ID, &update).unwrap();
    assert_eq!(sip_1.recv_packet().unwrap(), update);

    // Node 2's SIP goes away and its overlay announces the failure.
    drop(sip_2);
    let notice = sip_1.recv_packet().unwrap();
    assert_eq!(notice, SipPacket::new_failure_notice(2));
    let update = RouteUpdate::read(&notice.payload).unwrap();
    assert_eq!(update.failed_node(), Some(2));
}
