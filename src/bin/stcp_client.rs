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
    stcp::{client::StcpClient, link::SipConnection},
    topology::{node_id_from_ip, resolve_host},
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(after_help = "EXAMPLES: ./stcp_client -n 127.0.0.1 -d 127.0.0.2 -p 88 -i send_this.txt")]
struct Args {
    #[arg(long, short = 'n', help = "Host name or IPv4 address of this node")]
    node: String,

    #[arg(long, help = "Port of the local SIP process", default_value_t = SIP_PORT)]
    sip_port: u16,

    #[arg(long, short = 'd', help = "Host name or IPv4 address of the server node")]
    dst: String,

    #[arg(long, short = 'p', help = "STCP port of the server, e.g., 88")]
    port: u32,

    #[arg(long, help = "Local STCP port", default_value_t = 87)]
    lport: u32,

    #[arg(long, short = 'i', help = "File to send")]
    input: PathBuf,

    #[arg(long, help = "Probability that a received segment is lost or corrupted", default_value_t = PKT_LOSS_RATE)]
    loss_rate: f64,

    #[arg(
        long,
        help = "Seconds to keep dialing the SIP process",
        default_value_t = SIP_WAIT_TIME.as_secs() * 2
    )]
    connect_timeout: u64,

    #[arg(long, help = "Seconds to wait for the data to be acknowledged", default_value_t = 30)]
    drain_timeout: u64,
}

fn main() -> Result<()> {
    env_logger::builder().format_timestamp_millis().init();
    let args = Args::parse();
    let config = StackConfig {
        loss_rate: args.loss_rate,
        ..Default::default()
    };
    let data = fs::read(&args.input)
        .with_context(|| format!("Failed to read {}.", args.input.display()))?;
    let server_node = node_id_from_ip(&resolve_host(&args.dst)?);

    let addr = resolve_host(&args.node)?;
    let stream = connect_with_retry(
        SocketAddrV4::new(addr, args.sip_port).into(),
        Duration::from_secs(args.connect_timeout),
    )?;
    let transport = Arc::new(SipConnection::from_stream(
        stream,
        LinkImpairment::new(config.loss_rate),
    )?);
    let client = StcpClient::new(config.clone(), transport)?;

    let socket = client.open(args.lport)?;
    client.connect(socket, server_node, args.port)?;
    println!("Socket connected!");

    client.send(socket, &(data.len() as u32).to_be_bytes())?;
    client.send(socket, &data)?;
    let start = Instant::now();
    while client.pending(socket)? > 0 {
        anyhow::ensure!(
            start.elapsed() < Duration::from_secs(args.drain_timeout),
            "{} segments are still unacknowledged.",
            client.pending(socket)?
        );
        thread::sleep(config.sendbuf_polling_interval);
    }
    println!("Sent {} bytes!", data.len());

    client.disconnect(socket)?;
    client.close(socket)?;
    println!("Socket disconnected!");
    Ok(())
}
