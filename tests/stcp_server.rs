mod common;
use common::{fast_config, wait_until};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use stcp_sip::config::StackConfig;
use stcp_sip::stcp::{
    defs::{StcpError, StcpStatus},
    link::{LoopbackTransport, SegmentTransport},
    segment::{Segment, SegmentType},
    server::StcpServer,
};

const CLIENT_NODE: u32 = 1;
const SERVER_NODE: u32 = 2;
const CLIENT_PORT: u32 = 87;
const SERVER_PORT: u32 = 88;
const RECV_TIMEOUT: Duration = Duration::from_millis(500);

// The test plays the client on the raw end of the loopback pair.
fn server_with_peer(config: StackConfig) -> (Arc<StcpServer>, LoopbackTransport) {
    let (peer, local) = LoopbackTransport::pair(CLIENT_NODE, SERVER_NODE);
    let server = StcpServer::new(config, Arc::new(local)).unwrap();
    (server, peer)
}

fn exchange(peer: &LoopbackTransport, segment: Segment) -> Segment {
    peer.send_segment(SERVER_NODE, &segment).unwrap();
    peer.recv_timeout(RECV_TIMEOUT)
        .unwrap()
        .expect("No reply from the server.")
        .1
}

fn accepted_server(config: StackConfig) -> (Arc<StcpServer>, usize, LoopbackTransport) {
    let (server, peer) = server_with_peer(config);
    let id = server.open(SERVER_PORT).unwrap();
    let server_accept = server.clone();
    let handle = thread::spawn(move || server_accept.accept(id));
    assert!(wait_until(Duration::from_secs(1), || {
        server.status(id).unwrap() == StcpStatus::Listening
    }));
    let syn_ack = exchange(&peer, Segment::new_syn(CLIENT_PORT, SERVER_PORT, 0));
    assert_eq!(syn_ack.seg_type, SegmentType::SynAck);
    assert_eq!(syn_ack.ack_number, 1);
    assert_eq!(handle.join().unwrap(), Ok((CLIENT_NODE, CLIENT_PORT)));
    (server, id, peer)
}

#[test]
fn test_in_order_data_is_buffered() {
    let (server, id, peer) = accepted_server(fast_config());
    let ack = exchange(&peer, Segment::new_data(CLIENT_PORT, SERVER_PORT, 1, b"hello "));
    assert_eq!((ack.seg_type, ack.ack_number), (SegmentType::DataAck, 7));
    let ack = exchange(&peer, Segment::new_data(CLIENT_PORT, SERVER_PORT, 7, b"world"));
    assert_eq!(ack.ack_number, 12);
    assert_eq!(server.receive(id, 11).unwrap(), b"hello world".to_vec());
}

#[test]
fn test_out_of_order_data_is_dropped_and_acked_with_expected() {
    let (server, id, peer) = accepted_server(fast_config());
    let ack = exchange(&peer, Segment::new_data(CLIENT_PORT, SERVER_PORT, 4, b"late"));
    assert_eq!((ack.seg_type, ack.ack_number), (SegmentType::DataAck, 1));

    let ack = exchange(&peer, Segment::new_data(CLIENT_PORT, SERVER_PORT, 1, b"abc"));
    assert_eq!(ack.ack_number, 4);
    // A repeated segment is acked again without being buffered twice.
    let ack = exchange(&peer, Segment::new_data(CLIENT_PORT, SERVER_PORT, 1, b"abc"));
    assert_eq!(ack.ack_number, 4);
    let ack = exchange(&peer, Segment::new_data(CLIENT_PORT, SERVER_PORT, 4, b"late"));
    assert_eq!(ack.ack_number, 8);
    assert_eq!(server.receive(id, 7).unwrap(), b"abclate".to_vec());
}

#[test]
fn test_duplicate_syn_is_answered_again() {
    let (server, id, peer) = accepted_server(fast_config());
    let ack = exchange(&peer, Segment::new_data(CLIENT_PORT, SERVER_PORT, 1, b"abc"));
    assert_eq!(ack.ack_number, 4);
    let syn_ack = exchange(&peer, Segment::new_syn(CLIENT_PORT, SERVER_PORT, 0));
    assert_eq!((syn_ack.seg_type, syn_ack.ack_number), (SegmentType::SynAck, 1));
    assert_eq!(server.status(id).unwrap(), StcpStatus::Connected);

    // The stream starts over, so the bytes buffered before the SYN are gone.
    let ack = exchange(&peer, Segment::new_data(CLIENT_PORT, SERVER_PORT, 1, b"abc"));
    assert_eq!(ack.ack_number, 4);
    let ack = exchange(&peer, Segment::new_data(CLIENT_PORT, SERVER_PORT, 4, b"def"));
    assert_eq!(ack.ack_number, 7);
    assert_eq!(server.receive(id, 6).unwrap(), b"abcdef".to_vec());
}

#[test]
fn test_fin_leads_to_close_wait_then_closed() {
    let config = fast_config();
    let (server, id, peer) = accepted_server(config.clone());
    exchange(&peer, Segment::new_data(CLIENT_PORT, SERVER_PORT, 1, b"bye"));

    let fin_ack = exchange(&peer, Segment::new_fin(CLIENT_PORT, SERVER_PORT, 4));
    assert_eq!(fin_ack.seg_type, SegmentType::FinAck);
    assert_eq!(server.status(id).unwrap(), StcpStatus::CloseWait);
    assert_eq!(
        server.receive(id, 3),
        Err(StcpError::InvalidState {
            id,
            status: StcpStatus::CloseWait,
            expected: StcpStatus::Connected,
        })
    );

    // A retransmitted FIN is answered, and the sweep after it expires the
    // close-wait timer.
    thread::sleep(config.closewait_timeout);
    let fin_ack = exchange(&peer, Segment::new_fin(CLIENT_PORT, SERVER_PORT, 4));
    assert_eq!(fin_ack.seg_type, SegmentType::FinAck);
    assert!(wait_until(Duration::from_secs(1), || {
        server.status(id).unwrap() == StcpStatus::Closed
    }));
    server.close(id).unwrap();
}

#[test]
fn test_receive_fails_when_connection_ends_short() {
    let config = fast_config();
    let (server, id, peer) = accepted_server(config);
    let server_recv = server.clone();
    let handle = thread::spawn(move || server_recv.receive(id, 100));
    thread::sleep(Duration::from_millis(50));
    exchange(&peer, Segment::new_data(CLIENT_PORT, SERVER_PORT, 1, b"short"));
    exchange(&peer, Segment::new_fin(CLIENT_PORT, SERVER_PORT, 6));
    assert_eq!(
        handle.join().unwrap(),
        Err(StcpError::ConnectionLost {
            id,
            status: StcpStatus::CloseWait,
        })
    );
}

#[test]
fn test_receive_larger_than_buffer_is_rejected() {
    let config = StackConfig {
        receive_buf_size: 16,
        ..fast_config()
    };
    let (server, id, _peer) = accepted_server(config);
    assert_eq!(
        server.receive(id, 17),
        Err(StcpError::RequestTooLarge {
            requested: 17,
            capacity: 16,
        })
    );
    assert_eq!(server.receive(id + 1, 17), Err(StcpError::NoSuchSocket { id: id + 1 }));
    assert_eq!(server.receive(id + 1, 17).unwrap_err().code(), -2);
}

#[test]
fn test_segments_for_closed_sockets_are_ignored() {
    let (server, peer) = server_with_peer(fast_config());
    let id = server.open(SERVER_PORT).unwrap();
    peer.send_segment(SERVER_NODE, &Segment::new_syn(CLIENT_PORT, SERVER_PORT, 0))
        .unwrap();
    assert_eq!(peer.recv_timeout(Duration::from_millis(100)).unwrap(), None);
    assert_eq!(server.status(id).unwrap(), StcpStatus::Closed);
    assert_eq!(server.close(id), Ok(()));
}

#[test]
fn test_session_loss_fails_accept() {
    let (server, peer) = server_with_peer(fast_config());
    let id = server.open(SERVER_PORT).unwrap();
    let server_accept = server.clone();
    let handle = thread::spawn(move || server_accept.accept(id));
    assert!(wait_until(Duration::from_secs(1), || {
        server.status(id).unwrap() == StcpStatus::Listening
    }));
    drop(peer);
    assert_eq!(
        handle.join().unwrap(),
        Err(StcpError::ConnectionLost {
            id,
            status: StcpStatus::Closed,
        })
    );
}
