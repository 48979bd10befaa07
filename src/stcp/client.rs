use crate::config::StackConfig;
use crate::defs::NodeId;
use crate::stcp::{
    defs::{StcpError, StcpStatus},
    link::{Delivery, SegmentTransport},
    segment::{Segment, SegmentType},
    send_buffer::SendBuffer,
};
use anyhow::Result;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

#[derive(Debug)]
pub struct ClientConnection {
    pub server_node: NodeId,
    pub server_port: u32,
    pub status: StcpStatus,
    pub next_seq_num: u32,
    pub send_buffer: SendBuffer,
    // Set while a retransmission timer thread owns this connection.
    timer_running: bool,
}

/// Transport control block of one client socket.
pub struct ClientTcb {
    pub socket_id: usize,
    pub local_port: u32,
    conn: Mutex<ClientConnection>,
    event: Condvar,
    // Last retransmission timer. Joined before the next one starts.
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl ClientTcb {
    fn new(socket_id: usize, local_port: u32) -> Self {
        Self {
            socket_id,
            local_port,
            conn: Mutex::new(ClientConnection {
                server_node: 0,
                server_port: 0,
                status: StcpStatus::Closed,
                next_seq_num: 0,
                send_buffer: SendBuffer::new(),
                timer_running: false,
            }),
            event: Condvar::new(),
            timer: Mutex::new(None),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, ClientConnection> {
        self.conn.lock().unwrap()
    }

    fn print_log_prefix(&self, conn: &ClientConnection) -> String {
        format!(
            "[id={} {}->{}:{} {}]",
            self.socket_id, self.local_port, conn.server_node, conn.server_port, conn.status
        )
    }
}

pub struct StcpClient {
    pub config: StackConfig,
    transport: Arc<dyn SegmentTransport>,
    tcbs: Mutex<Vec<Option<Arc<ClientTcb>>>>,
    pub threads: Mutex<Vec<JoinHandle<()>>>,
}

impl StcpClient {
    pub fn new(config: StackConfig, transport: Arc<dyn SegmentTransport>) -> Result<Arc<Self>> {
        config.validate()?;
        let client = Arc::new(Self {
            tcbs: Mutex::new(vec![None; config.max_connections]),
            config,
            transport,
            threads: Mutex::new(Vec::new()),
        });

        let client_recv = client.clone();
        let handle_recv = thread::spawn(move || {
            client_recv.segment_handler();
        });
        client.threads.lock().unwrap().push(handle_recv);

        Ok(client)
    }

    fn get_tcb(&self, socket_id: usize) -> Result<Arc<ClientTcb>, StcpError> {
        let tcbs = self.tcbs.lock().unwrap();
        tcbs.get(socket_id)
            .and_then(|slot| slot.clone())
            .ok_or(StcpError::NoSuchSocket { id: socket_id })
    }

    pub fn status(&self, socket_id: usize) -> Result<StcpStatus, StcpError> {
        Ok(self.get_tcb(socket_id)?.lock().status)
    }

    /// Segments queued and not yet acknowledged.
    pub fn pending(&self, socket_id: usize) -> Result<usize, StcpError> {
        Ok(self.get_tcb(socket_id)?.lock().send_buffer.len())
    }

    pub fn open(&self, local_port: u32) -> Result<usize, StcpError> {
        let mut tcbs = self.tcbs.lock().unwrap();
        if let Some(tcb) = tcbs.iter().flatten().find(|tcb| tcb.local_port == local_port) {
            return Err(StcpError::PortInUse {
                port: local_port,
                id: tcb.socket_id,
            });
        }
        let socket_id = tcbs
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(StcpError::NoSlotAvailable {
                max: self.config.max_connections,
            })?;
        tcbs[socket_id] = Some(Arc::new(ClientTcb::new(socket_id, local_port)));
        log::info!("Opened stcp client socket. id={} port={}", socket_id, local_port);
        Ok(socket_id)
    }

    pub fn connect(
        &self,
        socket_id: usize,
        server_node: NodeId,
        server_port: u32,
    ) -> Result<(), StcpError> {
        let tcb = self.get_tcb(socket_id)?;
        let mut conn = tcb.lock();
        if conn.status != StcpStatus::Closed {
            return Err(StcpError::InvalidState {
                id: socket_id,
                status: conn.status,
                expected: StcpStatus::Closed,
            });
        }
        conn.server_node = server_node;
        conn.server_port = server_port;
        let syn = Segment::new_syn(tcb.local_port, server_port, conn.next_seq_num);
        conn.next_seq_num = conn.next_seq_num.wrapping_add(1);
        conn.status = StcpStatus::SynSent;

        let mut attempts = 0;
        let mut last_sent = Instant::now();
        while conn.status == StcpStatus::SynSent {
            let elapsed = last_sent.elapsed();
            if attempts == 0 || elapsed >= self.config.syn_timeout {
                if attempts >= self.config.syn_max_retry {
                    break;
                }
                log::debug!("{} SYN attempt {}.", tcb.print_log_prefix(&conn), attempts + 1);
                if let Err(e) = self.transport.send_segment(server_node, &syn) {
                    conn.status = StcpStatus::Closed;
                    return Err(e);
                }
                attempts += 1;
                last_sent = Instant::now();
                continue;
            }
            conn = tcb
                .event
                .wait_timeout(conn, self.config.syn_timeout.saturating_sub(elapsed))
                .unwrap()
                .0;
        }

        match conn.status {
            StcpStatus::Connected => {
                log::info!("{} Connected.", tcb.print_log_prefix(&conn));
                Ok(())
            }
            StcpStatus::SynSent => {
                conn.status = StcpStatus::Closed;
                log::warn!("{} No SYN_ACK after {} attempts.", tcb.print_log_prefix(&conn), attempts);
                Err(StcpError::ConnectTimeout {
                    id: socket_id,
                    attempts,
                    node: server_node,
                    port: server_port,
                })
            }
            status => Err(StcpError::ConnectionLost {
                id: socket_id,
                status,
            }),
        }
    }

    /// Queues `data` as segments of at most `max_seg_len` bytes and sends what
    /// fits in the window. Never blocks on acknowledgments.
    pub fn send(&self, socket_id: usize, data: &[u8]) -> Result<(), StcpError> {
        let tcb = self.get_tcb(socket_id)?;
        let mut conn = tcb.lock();
        if conn.status != StcpStatus::Connected {
            return Err(StcpError::InvalidState {
                id: socket_id,
                status: conn.status,
                expected: StcpStatus::Connected,
            });
        }

        for chunk in data.chunks(self.config.max_seg_len) {
            let segment =
                Segment::new_data(tcb.local_port, conn.server_port, conn.next_seq_num, chunk);
            conn.next_seq_num = conn.next_seq_num.wrapping_add(chunk.len() as u32);
            conn.send_buffer.push(segment);
        }
        if !conn.send_buffer.is_empty() && !conn.timer_running {
            conn.timer_running = true;
            let (tcb_timer, transport, config) =
                (tcb.clone(), self.transport.clone(), self.config.clone());
            let handle = thread::spawn(move || {
                retransmission_timer(tcb_timer, transport, config);
            });
            // A cleared timer_running means the previous timer has left its loop.
            if let Some(previous) = tcb.timer.lock().unwrap().replace(handle) {
                let _ = previous.join();
            }
        }

        let server_node = conn.server_node;
        let sent = conn
            .send_buffer
            .send_pending(self.config.window, |seg| {
                self.transport.send_segment(server_node, seg)
            })?;
        log::trace!(
            "{} Sent {} segments, {} unacked, {} queued.",
            tcb.print_log_prefix(&conn),
            sent,
            conn.send_buffer.unacked(),
            conn.send_buffer.unsent()
        );
        Ok(())
    }

    pub fn disconnect(&self, socket_id: usize) -> Result<(), StcpError> {
        let tcb = self.get_tcb(socket_id)?;
        let mut conn = tcb.lock();
        if conn.status != StcpStatus::Connected {
            return Err(StcpError::InvalidState {
                id: socket_id,
                status: conn.status,
                expected: StcpStatus::Connected,
            });
        }
        let fin = Segment::new_fin(tcb.local_port, conn.server_port, conn.next_seq_num);
        conn.next_seq_num = conn.next_seq_num.wrapping_add(1);
        conn.status = StcpStatus::FinWait;
        let server_node = conn.server_node;

        let mut attempts = 0;
        let mut last_sent = Instant::now();
        while conn.status == StcpStatus::FinWait {
            let elapsed = last_sent.elapsed();
            if attempts == 0 || elapsed >= self.config.fin_timeout {
                if attempts >= self.config.fin_max_retry {
                    break;
                }
                if let Err(e) = self.transport.send_segment(server_node, &fin) {
                    conn.status = StcpStatus::Closed;
                    conn.send_buffer.clear();
                    return Err(e);
                }
                attempts += 1;
                last_sent = Instant::now();
                continue;
            }
            conn = tcb
                .event
                .wait_timeout(conn, self.config.fin_timeout.saturating_sub(elapsed))
                .unwrap()
                .0;
        }

        let timed_out = conn.status == StcpStatus::FinWait;
        conn.status = StcpStatus::Closed;
        conn.send_buffer.clear();
        if timed_out {
            log::warn!("{} No FIN_ACK after {} attempts.", tcb.print_log_prefix(&conn), attempts);
            return Err(StcpError::DisconnectTimeout {
                id: socket_id,
                attempts,
            });
        }
        log::info!("{} Disconnected.", tcb.print_log_prefix(&conn));
        Ok(())
    }

    pub fn close(&self, socket_id: usize) -> Result<(), StcpError> {
        let mut tcbs = self.tcbs.lock().unwrap();
        let Some(tcb) = tcbs.get(socket_id).and_then(|slot| slot.clone()) else {
            return Err(StcpError::NoSuchSocket { id: socket_id });
        };
        let status = tcb.lock().status;
        if status != StcpStatus::Closed {
            return Err(StcpError::InvalidState {
                id: socket_id,
                status,
                expected: StcpStatus::Closed,
            });
        }
        tcbs[socket_id] = None;
        log::info!("Closed stcp client socket. id={}", socket_id);
        Ok(())
    }

    fn lookup(&self, local_port: u32, remote_port: u32) -> Option<Arc<ClientTcb>> {
        let tcbs = self.tcbs.lock().unwrap();
        tcbs.iter()
            .flatten()
            .find(|tcb| {
                if tcb.local_port != local_port {
                    return false;
                }
                let conn = tcb.lock();
                conn.status != StcpStatus::Closed && conn.server_port == remote_port
            })
            .cloned()
    }

    pub fn segment_handler(&self) {
        log::info!("Starting StcpClient segment handler.");
        loop {
            match self.transport.recv_segment() {
                Ok(Delivery::Segment { src_node, segment }) => {
                    if let Err(e) = self.handle_segment(src_node, &segment) {
                        log::warn!("Failed to handle a segment. Err: {}", e);
                    }
                }
                Ok(Delivery::Dropped) => {}
                Err(e) => {
                    log::error!("Segment handler stops. Err: {}", e);
                    self.close_all();
                    return;
                }
            }
        }
    }

    // Session to the routing layer is gone. Nothing can be delivered anymore.
    fn close_all(&self) {
        let tcbs = self.tcbs.lock().unwrap();
        for tcb in tcbs.iter().flatten() {
            let mut conn = tcb.lock();
            if conn.status != StcpStatus::Closed {
                log::warn!("{} Forced to CLOSED.", tcb.print_log_prefix(&conn));
            }
            conn.status = StcpStatus::Closed;
            conn.send_buffer.clear();
            tcb.event.notify_all();
        }
    }

    pub fn handle_segment(&self, src_node: NodeId, segment: &Segment) -> Result<(), StcpError> {
        let Some(tcb) = self.lookup(segment.dst_port, segment.src_port) else {
            log::debug!(
                "No client socket for {} from node {}.",
                segment.print_general_info(),
                src_node
            );
            return Ok(());
        };
        let mut conn = tcb.lock();
        log::trace!("{} Received {}.", tcb.print_log_prefix(&conn), segment.print_general_info());

        match (conn.status, segment.seg_type) {
            (StcpStatus::SynSent, SegmentType::SynAck) => {
                conn.status = StcpStatus::Connected;
                tcb.event.notify_all();
            }
            (StcpStatus::FinWait, SegmentType::FinAck) => {
                conn.status = StcpStatus::Closed;
                tcb.event.notify_all();
            }
            (StcpStatus::Connected, SegmentType::DataAck) => {
                let acked = conn.send_buffer.acknowledge(segment.ack_number);
                if acked > 0 {
                    let server_node = conn.server_node;
                    conn.send_buffer
                        .send_pending(self.config.window, |seg| {
                            self.transport.send_segment(server_node, seg)
                        })?;
                }
            }
            // Duplicates of replies already consumed.
            (StcpStatus::Connected, SegmentType::SynAck) | (_, SegmentType::DataAck) => {}
            (status, seg_type) => {
                return Err(StcpError::ProtocolViolation {
                    port: tcb.local_port,
                    status,
                    seg_type,
                })
            }
        }
        Ok(())
    }
}

/// Go-Back-N timer of one connection. Exits once the connection leaves
/// CONNECTED or its send queue drains.
fn retransmission_timer(
    tcb: Arc<ClientTcb>,
    transport: Arc<dyn SegmentTransport>,
    config: StackConfig,
) {
    loop {
        thread::sleep(config.sendbuf_polling_interval);
        let mut conn = tcb.lock();
        if conn.status != StcpStatus::Connected || conn.send_buffer.is_empty() {
            conn.timer_running = false;
            log::trace!("{} Retransmission timer stops.", tcb.print_log_prefix(&conn));
            return;
        }
        if !conn.send_buffer.is_timed_out(config.data_timeout) {
            continue;
        }
        let server_node = conn.server_node;
        match conn
            .send_buffer
            .retransmit_unacked(|seg| transport.send_segment(server_node, seg))
        {
            Ok(count) => log::debug!("{} Retransmitted {} segments.", tcb.print_log_prefix(&conn), count),
            Err(e) => log::warn!("{} Retransmission failed. Err: {}", tcb.print_log_prefix(&conn), e),
        }
    }
}
