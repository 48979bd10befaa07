use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use stcp_sip::{
    config::StackConfig,
    defs::*,
    frame::connect_with_retry,
    impair::LinkImpairment,
    stcp::{defs::StcpStatus, link::SipConnection, server::StcpServer},
    topology::resolve_host,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(after_help = "EXAMPLES: ./stcp_server -n 127.0.0.2 -p 88 -o received.txt")]
struct Args {
    #[arg(long, short = 'n', help = "Host name or IPv4 address of this node")]
    node: String,

    #[arg(long, help = "Port of the local SIP process", default_value_t = SIP_PORT)]
    sip_port: u16,

    #[arg(long, short = 'p', help = "STCP port to accept on, e.g., 88")]
    port: u32,

    #[arg(long, short = 'o', help = "File the received data is written to")]
    output: PathBuf,

    #[arg(long, help = "Probability that a received segment is lost or corrupted", default_value_t = PKT_LOSS_RATE)]
    loss_rate: f64,

    #[arg(
        long,
        help = "Seconds to keep dialing the SIP process",
        default_value_t = SIP_WAIT_TIME.as_secs() * 2
    )]
    connect_timeout: u64,
}

fn main() -> Result<()> {
    env_logger::builder().format_timestamp_millis().init();
    let args = Args::parse();
    let config = StackConfig {
        loss_rate: args.loss_rate,
        ..Default::default()
    };
    let addr = resolve_host(&args.node)?;
    let stream = connect_with_retry(
        SocketAddrV4::new(addr, args.sip_port).into(),
        Duration::from_secs(args.connect_timeout),
    )?;
    let transport = Arc::new(SipConnection::from_stream(
        stream,
        LinkImpairment::new(config.loss_rate),
    )?);
    let server = StcpServer::new(config.clone(), transport)?;

    let socket = server.open(args.port)?;
    let (client_node, client_port) = server.accept(socket)?;
    println!("Socket accepted! client={}:{}", client_node, client_port);

    // A 4 byte big-endian length precedes the data.
    let header = server.receive(socket, 4)?;
    let length = u32::from_be_bytes(header[..].try_into()?) as usize;
    let data = server.receive(socket, length)?;
    fs::write(&args.output, &data)
        .with_context(|| format!("Failed to write {}.", args.output.display()))?;
    println!("Received {} bytes!", data.len());

    // Wait for the client's FIN, then let the close-wait timer run out.
    let fin_deadline = config.fin_timeout * config.fin_max_retry as u32 + config.closewait_timeout;
    let start = Instant::now();
    while server.status(socket)? == StcpStatus::Connected && start.elapsed() < fin_deadline {
        thread::sleep(config.sendbuf_polling_interval);
    }
    thread::sleep(config.closewait_timeout);
    server.sweep_close_wait();
    server.close(socket)?;
    println!("Socket closed!");
    Ok(())
}
