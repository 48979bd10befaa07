mod common;
use common::{fast_config, wait_until};
use rstest::rstest;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use stcp_sip::config::StackConfig;
use stcp_sip::impair::LinkImpairment;
use stcp_sip::stcp::{
    client::StcpClient, defs::StcpStatus, link::LoopbackTransport, server::StcpServer,
};

const CLIENT_NODE: u32 = 1;
const SERVER_NODE: u32 = 2;
const CLIENT_PORT: u32 = 87;
const SERVER_PORT: u32 = 88;

fn transfer(config: StackConfig, seed: u64, data: Vec<u8>) {
    let (client_end, server_end) = LoopbackTransport::pair(CLIENT_NODE, SERVER_NODE);
    let client_end = client_end.with_impairment(LinkImpairment::with_seed(config.loss_rate, seed));
    let server_end =
        server_end.with_impairment(LinkImpairment::with_seed(config.loss_rate, seed + 1));
    let client = StcpClient::new(config.clone(), Arc::new(client_end)).unwrap();
    let server = StcpServer::new(config, Arc::new(server_end)).unwrap();

    let server_id = server.open(SERVER_PORT).unwrap();
    let server_side = server.clone();
    let length = data.len();
    let receiver = thread::spawn(move || {
        let peer = server_side.accept(server_id)?;
        let received = server_side.receive(server_id, length)?;
        Ok::<_, stcp_sip::stcp::defs::StcpError>((peer, received))
    });

    let client_id = client.open(CLIENT_PORT).unwrap();
    client.connect(client_id, SERVER_NODE, SERVER_PORT).unwrap();
    client.send(client_id, &data).unwrap();

    let (peer, received) = receiver.join().unwrap().unwrap();
    assert_eq!(peer, (CLIENT_NODE, CLIENT_PORT));
    assert_eq!(received, data);

    assert!(wait_until(Duration::from_secs(10), || {
        client.pending(client_id).unwrap() == 0
    }));
    client.disconnect(client_id).unwrap();
    client.close(client_id).unwrap();
    // Repeated FINs may already have expired the close-wait timer.
    assert!(wait_until(Duration::from_secs(1), || {
        matches!(
            server.status(server_id).unwrap(),
            StcpStatus::CloseWait | StcpStatus::Closed
        )
    }));
    server.close(server_id).unwrap();
}

#[test]
fn test_transfer_over_clean_link() {
    let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    transfer(fast_config(), 1, data);
}

#[rstest]
#[case(7)]
#[case(42)]
fn test_transfer_over_lossy_link(#[case] seed: u64) {
    let config = StackConfig {
        loss_rate: 0.1,
        syn_max_retry: 20,
        fin_max_retry: 20,
        ..fast_config()
    };
    let data: Vec<u8> = (0..8_000u32).map(|i| (i * 7 % 256) as u8).collect();
    transfer(config, seed, data);
}
