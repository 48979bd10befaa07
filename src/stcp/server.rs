use crate::config::StackConfig;
use crate::defs::NodeId;
use crate::stcp::{
    defs::{StcpError, StcpStatus},
    link::{Delivery, SegmentTransport},
    segment::{Segment, SegmentType},
};
use anyhow::Result;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

#[derive(Debug)]
pub struct ServerConnection {
    pub client_node: NodeId,
    pub client_port: u32,
    pub status: StcpStatus,
    pub expect_seq_num: u32,
    pub recv_buffer: Vec<u8>,
    pub close_wait_since: Option<Instant>,
}

pub struct ServerTcb {
    pub socket_id: usize,
    pub local_port: u32,
    conn: Mutex<ServerConnection>,
    event: Condvar,
}

impl ServerTcb {
    fn new(socket_id: usize, local_port: u32) -> Self {
        Self {
            socket_id,
            local_port,
            conn: Mutex::new(ServerConnection {
                client_node: 0,
                client_port: 0,
                status: StcpStatus::Closed,
                expect_seq_num: 0,
                recv_buffer: Vec::new(),
                close_wait_since: None,
            }),
            event: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, ServerConnection> {
        self.conn.lock().unwrap()
    }

    fn print_log_prefix(&self, conn: &ServerConnection) -> String {
        format!(
            "[id={} {}<-{}:{} {}]",
            self.socket_id, self.local_port, conn.client_node, conn.client_port, conn.status
        )
    }
}

pub struct StcpServer {
    pub config: StackConfig,
    transport: Arc<dyn SegmentTransport>,
    tcbs: Mutex<Vec<Option<Arc<ServerTcb>>>>,
    pub threads: Mutex<Vec<JoinHandle<()>>>,
}

impl StcpServer {
    pub fn new(config: StackConfig, transport: Arc<dyn SegmentTransport>) -> Result<Arc<Self>> {
        config.validate()?;
        let server = Arc::new(Self {
            tcbs: Mutex::new(vec![None; config.max_connections]),
            config,
            transport,
            threads: Mutex::new(Vec::new()),
        });

        let server_recv = server.clone();
        let handle_recv = thread::spawn(move || {
            server_recv.segment_handler();
        });
        server.threads.lock().unwrap().push(handle_recv);

        Ok(server)
    }

    fn get_tcb(&self, socket_id: usize) -> Result<Arc<ServerTcb>, StcpError> {
        let tcbs = self.tcbs.lock().unwrap();
        tcbs.get(socket_id)
            .and_then(|slot| slot.clone())
            .ok_or(StcpError::NoSuchSocket { id: socket_id })
    }

    pub fn status(&self, socket_id: usize) -> Result<StcpStatus, StcpError> {
        Ok(self.get_tcb(socket_id)?.lock().status)
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
        tcbs[socket_id] = Some(Arc::new(ServerTcb::new(socket_id, local_port)));
        log::info!("Opened stcp server socket. id={} port={}", socket_id, local_port);
        Ok(socket_id)
    }

    /// Blocks until a client completes the handshake. Returns the client node
    /// and port.
    pub fn accept(&self, socket_id: usize) -> Result<(NodeId, u32), StcpError> {
        let tcb = self.get_tcb(socket_id)?;
        let mut conn = tcb.lock();
        if conn.status != StcpStatus::Closed {
            return Err(StcpError::InvalidState {
                id: socket_id,
                status: conn.status,
                expected: StcpStatus::Closed,
            });
        }
        conn.status = StcpStatus::Listening;
        log::debug!("{} Waiting for a SYN.", tcb.print_log_prefix(&conn));
        while conn.status == StcpStatus::Listening {
            conn = tcb
                .event
                .wait_timeout(conn, self.config.accept_polling_interval)
                .unwrap()
                .0;
        }
        if conn.status == StcpStatus::Closed {
            return Err(StcpError::ConnectionLost {
                id: socket_id,
                status: conn.status,
            });
        }
        log::info!("{} Accepted.", tcb.print_log_prefix(&conn));
        Ok((conn.client_node, conn.client_port))
    }

    /// Blocks until `length` bytes are buffered, then removes and returns them.
    pub fn receive(&self, socket_id: usize, length: usize) -> Result<Vec<u8>, StcpError> {
        let tcb = self.get_tcb(socket_id)?;
        if length > self.config.receive_buf_size {
            return Err(StcpError::RequestTooLarge {
                requested: length,
                capacity: self.config.receive_buf_size,
            });
        }
        let mut conn = tcb.lock();
        if conn.status != StcpStatus::Connected {
            return Err(StcpError::InvalidState {
                id: socket_id,
                status: conn.status,
                expected: StcpStatus::Connected,
            });
        }
        while conn.recv_buffer.len() < length {
            if conn.status != StcpStatus::Connected {
                log::warn!(
                    "{} Connection ended with {} of {} bytes buffered.",
                    tcb.print_log_prefix(&conn),
                    conn.recv_buffer.len(),
                    length
                );
                return Err(StcpError::ConnectionLost {
                    id: socket_id,
                    status: conn.status,
                });
            }
            conn = tcb
                .event
                .wait_timeout(conn, self.config.recvbuf_polling_interval)
                .unwrap()
                .0;
        }
        Ok(conn.recv_buffer.drain(..length).collect())
    }

    pub fn close(&self, socket_id: usize) -> Result<(), StcpError> {
        let mut tcbs = self.tcbs.lock().unwrap();
        let Some(tcb) = tcbs.get(socket_id).and_then(|slot| slot.clone()) else {
            return Err(StcpError::NoSuchSocket { id: socket_id });
        };
        let status = tcb.lock().status;
        if !matches!(status, StcpStatus::Closed | StcpStatus::CloseWait) {
            return Err(StcpError::InvalidState {
                id: socket_id,
                status,
                expected: StcpStatus::Closed,
            });
        }
        tcbs[socket_id] = None;
        log::info!("Closed stcp server socket. id={}", socket_id);
        Ok(())
    }

    fn lookup(&self, local_port: u32) -> Option<Arc<ServerTcb>> {
        let tcbs = self.tcbs.lock().unwrap();
        tcbs.iter()
            .flatten()
            .find(|tcb| tcb.local_port == local_port)
            .cloned()
    }

    pub fn segment_handler(&self) {
        log::info!("Starting StcpServer segment handler.");
        loop {
            match self.transport.recv_segment() {
                Ok(Delivery::Segment { src_node, segment }) => {
                    if let Err(e) = self.handle_segment(src_node, &segment) {
                        log::warn!("Failed to handle a segment. Err: {}", e);
                    }
                    self.sweep_close_wait();
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

    fn close_all(&self) {
        let tcbs = self.tcbs.lock().unwrap();
        for tcb in tcbs.iter().flatten() {
            let mut conn = tcb.lock();
            if conn.status != StcpStatus::Closed {
                log::warn!("{} Forced to CLOSED.", tcb.print_log_prefix(&conn));
            }
            conn.status = StcpStatus::Closed;
            conn.close_wait_since = None;
            tcb.event.notify_all();
        }
    }

    /// Moves connections that sat in CLOSE-WAIT for `closewait_timeout` to
    /// CLOSED.
    pub fn sweep_close_wait(&self) {
        let tcbs = self.tcbs.lock().unwrap();
        for tcb in tcbs.iter().flatten() {
            let mut conn = tcb.lock();
            let expired = conn.status == StcpStatus::CloseWait
                && conn
                    .close_wait_since
                    .is_some_and(|since| since.elapsed() >= self.config.closewait_timeout);
            if expired {
                conn.status = StcpStatus::Closed;
                conn.close_wait_since = None;
                log::info!("{} Close-wait expired.", tcb.print_log_prefix(&conn));
                tcb.event.notify_all();
            }
        }
    }

    pub fn handle_segment(&self, src_node: NodeId, segment: &Segment) -> Result<(), StcpError> {
        let Some(tcb) = self.lookup(segment.dst_port) else {
            log::debug!(
                "No server socket for {} from node {}.",
                segment.print_general_info(),
                src_node
            );
            return Ok(());
        };
        let mut conn = tcb.lock();
        log::trace!("{} Received {}.", tcb.print_log_prefix(&conn), segment.print_general_info());

        match (conn.status, segment.seg_type) {
            (StcpStatus::Closed, _) => {
                log::debug!("{} Ignored {}.", tcb.print_log_prefix(&conn), segment.seg_type);
            }
            // A repeated SYN means our SYN_ACK was lost or the client started
            // over. Either way the stream restarts at seq+1.
            (StcpStatus::Listening | StcpStatus::Connected, SegmentType::Syn) => {
                conn.client_node = src_node;
                conn.client_port = segment.src_port;
                conn.expect_seq_num = segment.seq_number.wrapping_add(1);
                conn.recv_buffer.clear();
                conn.close_wait_since = None;
                let syn_ack = segment.create_reply(SegmentType::SynAck, conn.expect_seq_num);
                self.transport.send_segment(src_node, &syn_ack)?;
                conn.status = StcpStatus::Connected;
                tcb.event.notify_all();
            }
            (StcpStatus::Connected | StcpStatus::CloseWait, SegmentType::Fin) => {
                let fin_ack = segment.create_reply(SegmentType::FinAck, conn.expect_seq_num);
                self.transport.send_segment(src_node, &fin_ack)?;
                if conn.status == StcpStatus::Connected {
                    conn.status = StcpStatus::CloseWait;
                    conn.close_wait_since = Some(Instant::now());
                    tcb.event.notify_all();
                }
            }
            (StcpStatus::Connected, SegmentType::Data) => {
                let fits = conn.recv_buffer.len() + segment.payload.len()
                    <= self.config.receive_buf_size;
                if segment.seq_number == conn.expect_seq_num && fits {
                    conn.recv_buffer.extend_from_slice(&segment.payload);
                    conn.expect_seq_num = conn
                        .expect_seq_num
                        .wrapping_add(segment.payload.len() as u32);
                    tcb.event.notify_all();
                } else {
                    log::debug!(
                        "{} Discarded seq={} (expect={} fits={}).",
                        tcb.print_log_prefix(&conn),
                        segment.seq_number,
                        conn.expect_seq_num,
                        fits
                    );
                }
                let data_ack = segment.create_reply(SegmentType::DataAck, conn.expect_seq_num);
                self.transport.send_segment(src_node, &data_ack)?;
            }
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
