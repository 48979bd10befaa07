mod common;
use anyhow::Result;
use common::{check_stdout_pattern, child_wait_with_timeout, dump_stderr, write_temp_file};
use rstest::rstest;
use serial_test::serial;
use std::fs;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

// 1 -1- 2 -1- 3, plus a direct 1-3 link of cost 5.
const TOPOLOGY: &str = "127.0.0.1 127.0.0.2 1\n127.0.0.2 127.0.0.3 1\n127.0.0.1 127.0.0.3 5\n";
const NODES: [&str; 3] = ["127.0.0.1", "127.0.0.2", "127.0.0.3"];
const SIP_WAIT_MS: u64 = 1500;

struct Ports {
    connection: u16,
    son: u16,
    sip: u16,
}

// Output of the node processes is discarded so that no pipe fills up.
fn spawn(program: &str, args: &[String], capture: bool) -> Result<Child> {
    let pipe = || if capture { Stdio::piped() } else { Stdio::null() };
    Ok(Command::new(program)
        .args(args)
        .env("RUST_LOG", "info")
        .stdout(pipe())
        .stderr(pipe())
        .spawn()?)
}

fn spawn_node(topology: &str, node: &str, routing: &str, ports: &Ports) -> Result<Vec<Child>> {
    let son = spawn(
        env!("CARGO_BIN_EXE_son"),
        &[
            format!("--topology={}", topology),
            format!("--node={}", node),
            format!("--connection-port={}", ports.connection),
            format!("--son-port={}", ports.son),
            "--connect-timeout=10".to_string(),
        ],
        false,
    )?;
    let sip = spawn(
        env!("CARGO_BIN_EXE_sip"),
        &[
            format!("--topology={}", topology),
            format!("--node={}", node),
            format!("--routing={}", routing),
            format!("--son-port={}", ports.son),
            format!("--sip-port={}", ports.sip),
            "--update-interval=200".to_string(),
            format!("--wait={}", SIP_WAIT_MS),
            "--connect-timeout=10".to_string(),
        ],
        false,
    )?;
    Ok(vec![son, sip])
}

#[rstest]
#[case("dv", Ports { connection: 45490, son: 45491, sip: 45492 })]
#[case("ls", Ports { connection: 45590, son: 45591, sip: 45592 })]
#[serial]
fn test_file_transfer_across_overlay(#[case] routing: &str, #[case] ports: Ports) -> Result<()> {
    let data: Vec<u8> = (0..30_000u32).map(|i| (i * 31 % 253) as u8).collect();
    let topology = write_temp_file(&format!("topology_{}.dat", routing), TOPOLOGY.as_bytes())?;
    let input = write_temp_file(&format!("send_{}.bin", routing), &data)?;
    let output = input.with_file_name(format!("received_{}.bin", routing));
    let _ = fs::remove_file(&output);

    let mut stack = Vec::new();
    for node in NODES {
        stack.extend(spawn_node(&topology.to_string_lossy(), node, routing, &ports)?);
    }

    let mut server = spawn(
        env!("CARGO_BIN_EXE_stcp_server"),
        &[
            "--node=127.0.0.3".to_string(),
            format!("--sip-port={}", ports.sip),
            "--port=88".to_string(),
            format!("--output={}", output.display()),
            "--loss-rate=0".to_string(),
        ],
        true,
    )?;
    // The server must be listening before the client's SYN retries run out.
    thread::sleep(Duration::from_millis(SIP_WAIT_MS + 1000));
    let mut client = spawn(
        env!("CARGO_BIN_EXE_stcp_client"),
        &[
            "--node=127.0.0.1".to_string(),
            format!("--sip-port={}", ports.sip),
            "--dst=127.0.0.3".to_string(),
            "--port=88".to_string(),
            format!("--input={}", input.display()),
            "--loss-rate=0".to_string(),
        ],
        true,
    )?;

    let client_status = child_wait_with_timeout(&mut client, Duration::from_secs(30))?;
    let server_status = child_wait_with_timeout(&mut server, Duration::from_secs(10))?;
    for child in stack.iter_mut() {
        let _ = child.kill();
        let _ = child.wait();
    }
    if client_status.is_none() || server_status.is_none() {
        let _ = client.kill();
        let _ = server.kill();
        dump_stderr(&mut client)?;
        dump_stderr(&mut server)?;
        anyhow::bail!("Transfer did not finish in time.");
    }

    assert!(client_status.is_some_and(|s| s.success()));
    assert!(server_status.is_some_and(|s| s.success()));
    let sent = format!("Sent {} bytes!", data.len());
    assert!(check_stdout_pattern(
        &mut client,
        &["Socket connected!", sent.as_str(), "Socket disconnected!"]
    )?);
    let received = format!("Received {} bytes!", data.len());
    assert!(check_stdout_pattern(
        &mut server,
        &["Socket accepted! client=", received.as_str(), "Socket closed!"]
    )?);
    assert_eq!(fs::read(&output)?, data);
    Ok(())
}
