use std::time::Duration;

// Node ids are the last octet of a node's IPv4 address.
pub type NodeId = u32;

// Transport (STCP)
pub const MAX_TRANSPORT_CONNECTIONS: usize = 10;
pub const MAX_SEG_LEN: usize = 1464;
pub const GBN_WINDOW: usize = 10;
pub const RECEIVE_BUF_SIZE: usize = 1_000_000;
pub const SYN_TIMEOUT: Duration = Duration::from_millis(100);
pub const SYN_MAX_RETRY: usize = 5;
pub const FIN_TIMEOUT: Duration = Duration::from_millis(100);
pub const FIN_MAX_RETRY: usize = 5;
pub const DATA_TIMEOUT: Duration = Duration::from_millis(100);
pub const SENDBUF_POLLING_INTERVAL: Duration = Duration::from_millis(10);
pub const ACCEPT_POLLING_INTERVAL: Duration = Duration::from_millis(100);
pub const RECVBUF_POLLING_INTERVAL: Duration = Duration::from_secs(1);
pub const CLOSEWAIT_TIMEOUT: Duration = Duration::from_secs(1);
pub const PKT_LOSS_RATE: f64 = 0.1;

// Network (SIP)
pub const INFINITE_COST: u32 = 999;
pub const BROADCAST_NODE_ID: NodeId = 9999;
pub const MAX_ROUTINGTABLE_SLOTS: usize = 10;
pub const ROUTEUPDATE_INTERVAL: Duration = Duration::from_secs(5);
pub const SIP_WAIT_TIME: Duration = Duration::from_secs(30);
// A failure notice carries its remaining hop budget in the source node field.
// Real node ids never reach this range because they are a single octet.
pub const UPDATE_HOP_FLOOR: NodeId = 1020;
pub const UPDATE_HOP_CEIL: NodeId = 1024;

// Overlay (SON)
pub const CONNECTION_PORT: u16 = 3490;
pub const SON_PORT: u16 = 3491;
pub const SIP_PORT: u16 = 3492;
pub const NEIGHBOR_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
