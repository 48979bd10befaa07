use anyhow::{Context, Result};
use clap::Parser;
use std::net::{SocketAddrV4, TcpListener};
use std::path::PathBuf;
use std::time::Duration;
use stcp_sip::{config::NodeConfig, defs::*, son::overlay::SonNode, topology::Topology};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(after_help = "EXAMPLES: ./son -t topology.dat -n 127.0.0.1")]
struct Args {
    #[arg(long, short = 't', help = "Topology file with lines of \"host1 host2 cost\"")]
    topology: PathBuf,

    #[arg(long, short = 'n', help = "Host name or IPv4 address of this node")]
    node: String,

    #[arg(long, help = "Port for links between overlay nodes", default_value_t = CONNECTION_PORT)]
    connection_port: u16,

    #[arg(long, help = "Port the local SIP process connects to", default_value_t = SON_PORT)]
    son_port: u16,

    #[arg(
        long,
        help = "Seconds to wait for every neighbor link",
        default_value_t = NEIGHBOR_CONNECT_TIMEOUT.as_secs()
    )]
    connect_timeout: u64,
}

fn main() -> Result<()> {
    env_logger::builder().format_timestamp_millis().init();
    let args = Args::parse();
    let topology = Topology::load(&args.topology)?;
    let me = topology.node_by_hostname(&args.node)?;
    let config = NodeConfig {
        connection_port: args.connection_port,
        son_port: args.son_port,
        neighbor_connect_timeout: Duration::from_secs(args.connect_timeout),
        ..Default::default()
    };
    println!("Overlay network: node {} initializing...", me.id);

    let son = SonNode::new(&topology, me.id, config.clone())?;
    if !son.wait_for_neighbors(config.neighbor_connect_timeout) {
        println!("Some neighbors are missing.");
    }
    println!("Overlay ready!");

    let listener = TcpListener::bind(SocketAddrV4::new(me.addr, config.son_port))
        .with_context(|| format!("Failed to bind {}:{} for SIP.", me.addr, config.son_port))?;
    son.serve_sip(listener)
}
