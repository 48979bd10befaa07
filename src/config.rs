use crate::defs::*;
use anyhow::Result;
use std::time::Duration;

/// Tunables of the STCP client and server stacks.
#[derive(Debug, Clone)]
pub struct StackConfig {
    pub max_connections: usize,
    pub max_seg_len: usize,
    pub window: usize,
    pub receive_buf_size: usize,
    pub syn_timeout: Duration,
    pub syn_max_retry: usize,
    pub fin_timeout: Duration,
    pub fin_max_retry: usize,
    pub data_timeout: Duration,
    pub sendbuf_polling_interval: Duration,
    pub accept_polling_interval: Duration,
    pub recvbuf_polling_interval: Duration,
    pub closewait_timeout: Duration,
    pub loss_rate: f64,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            max_connections: MAX_TRANSPORT_CONNECTIONS,
            max_seg_len: MAX_SEG_LEN,
            window: GBN_WINDOW,
            receive_buf_size: RECEIVE_BUF_SIZE,
            syn_timeout: SYN_TIMEOUT,
            syn_max_retry: SYN_MAX_RETRY,
            fin_timeout: FIN_TIMEOUT,
            fin_max_retry: FIN_MAX_RETRY,
            data_timeout: DATA_TIMEOUT,
            sendbuf_polling_interval: SENDBUF_POLLING_INTERVAL,
            accept_polling_interval: ACCEPT_POLLING_INTERVAL,
            recvbuf_polling_interval: RECVBUF_POLLING_INTERVAL,
            closewait_timeout: CLOSEWAIT_TIMEOUT,
            loss_rate: PKT_LOSS_RATE,
        }
    }
}

impl StackConfig {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.max_seg_len > 0 && self.max_seg_len <= MAX_SEG_LEN,
            "max_seg_len is {} but must be in 1..={}.",
            self.max_seg_len,
            MAX_SEG_LEN
        );
        anyhow::ensure!(self.window > 0, "GBN window must not be zero.");
        anyhow::ensure!(self.max_connections > 0, "max_connections must not be zero.");
        anyhow::ensure!(
            self.syn_max_retry > 0 && self.fin_max_retry > 0,
            "SYN/FIN retry counts must not be zero."
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.loss_rate),
            "loss_rate {} is out of range [0, 1].",
            self.loss_rate
        );
        Ok(())
    }
}

/// Ports and timers of one overlay node (SON and SIP processes).
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub connection_port: u16,
    pub son_port: u16,
    pub sip_port: u16,
    pub neighbor_connect_timeout: Duration,
    pub route_update_interval: Duration,
    pub sip_wait_time: Duration,
    pub slots: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            connection_port: CONNECTION_PORT,
            son_port: SON_PORT,
            sip_port: SIP_PORT,
            neighbor_connect_timeout: NEIGHBOR_CONNECT_TIMEOUT,
            route_update_interval: ROUTEUPDATE_INTERVAL,
            sip_wait_time: SIP_WAIT_TIME,
            slots: MAX_ROUTINGTABLE_SLOTS,
        }
    }
}
