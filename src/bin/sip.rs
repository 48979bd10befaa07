use anyhow::{Context, Result};
use clap::Parser;
use std::net::{SocketAddrV4, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use stcp_sip::{
    config::NodeConfig,
    defs::*,
    frame::connect_with_retry,
    sip::{node::SipNode, protocol::RoutingMode, son_link::SonConnection},
    topology::Topology,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(after_help = "EXAMPLES: ./sip -t topology.dat -n 127.0.0.1 -r ls")]
struct Args {
    #[arg(long, short = 't', help = "Topology file with lines of \"host1 host2 cost\"")]
    topology: PathBuf,

    #[arg(long, short = 'n', help = "Host name or IPv4 address of this node")]
    node: String,

    #[arg(long, short = 'r', help = "Routing protocol, dv or ls", default_value_t = RoutingMode::DistanceVector)]
    routing: RoutingMode,

    #[arg(long, help = "Port of the local SON process", default_value_t = SON_PORT)]
    son_port: u16,

    #[arg(long, help = "Port the local STCP process connects to", default_value_t = SIP_PORT)]
    sip_port: u16,

    #[arg(
        long,
        help = "Milliseconds between route advertisements",
        default_value_t = ROUTEUPDATE_INTERVAL.as_millis() as u64
    )]
    update_interval: u64,

    #[arg(
        long,
        help = "Milliseconds to let routes settle before serving STCP",
        default_value_t = SIP_WAIT_TIME.as_millis() as u64
    )]
    wait: u64,

    #[arg(
        long,
        help = "Seconds to keep dialing the SON process",
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
        son_port: args.son_port,
        sip_port: args.sip_port,
        route_update_interval: Duration::from_millis(args.update_interval),
        sip_wait_time: Duration::from_millis(args.wait),
        neighbor_connect_timeout: Duration::from_secs(args.connect_timeout),
        ..Default::default()
    };
    println!("SIP layer of node {} is starting ({}).", me.id, args.routing);

    let stream = connect_with_retry(
        SocketAddrV4::new(me.addr, config.son_port).into(),
        config.neighbor_connect_timeout,
    )?;
    let son = Arc::new(SonConnection::from_stream(stream)?);
    let routing = args.routing.build(&topology, me.id, config.slots);
    let sip = SipNode::new(me.id, config.clone(), routing, son)?;

    thread::sleep(config.sip_wait_time);
    println!("{}", sip.routing().routing_table());
    println!("SIP ready!");

    let listener = TcpListener::bind(SocketAddrV4::new(me.addr, config.sip_port))
        .with_context(|| format!("Failed to bind {}:{} for STCP.", me.addr, config.sip_port))?;
    sip.serve_stcp(listener)
}
