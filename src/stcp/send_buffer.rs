use crate::stcp::segment::Segment;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct SendEntry {
    segment: Segment,
    sent_at: Option<Instant>,
}

/// Go-Back-N send queue. Entries `[0, unacked)` are in flight, the rest are
/// waiting for window space.
#[derive(Debug, Default)]
pub struct SendBuffer {
    queue: VecDeque<SendEntry>,
    unacked: usize,
}

impl SendBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn unacked(&self) -> usize {
        self.unacked
    }

    pub fn unsent(&self) -> usize {
        self.queue.len() - self.unacked
    }

    /// Appends a segment at the tail. Returns true if the queue was empty.
    pub fn push(&mut self, segment: Segment) -> bool {
        let was_empty = self.queue.is_empty();
        self.queue.push_back(SendEntry {
            segment,
            sent_at: None,
        });
        was_empty
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.unacked = 0;
    }

    /// Sends unsent segments while fewer than `window` are in flight.
    pub fn send_pending<F, E>(&mut self, window: usize, mut send: F) -> Result<usize, E>
    where
        F: FnMut(&Segment) -> Result<(), E>,
    {
        let mut sent = 0;
        while self.unacked < window && self.unacked < self.queue.len() {
            let entry = &mut self.queue[self.unacked];
            send(&entry.segment)?;
            entry.sent_at = Some(Instant::now());
            self.unacked += 1;
            sent += 1;
        }
        Ok(sent)
    }

    /// Cumulative acknowledgment. Removes every in-flight segment whose
    /// sequence number is below `ack_number`.
    pub fn acknowledge(&mut self, ack_number: u32) -> usize {
        let mut removed = 0;
        while self.unacked > 0 {
            match self.queue.front() {
                Some(entry) if entry.segment.seq_number < ack_number => {
                    self.queue.pop_front();
                    self.unacked -= 1;
                    removed += 1;
                }
                _ => break,
            }
        }
        removed
    }

    pub fn head_sent_at(&self) -> Option<Instant> {
        if self.unacked == 0 {
            return None;
        }
        self.queue.front().and_then(|entry| entry.sent_at)
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.head_sent_at()
            .is_some_and(|sent_at| sent_at.elapsed() >= timeout)
    }

    /// Resends every in-flight segment in order and refreshes its send time.
    pub fn retransmit_unacked<F, E>(&mut self, mut send: F) -> Result<usize, E>
    where
        F: FnMut(&Segment) -> Result<(), E>,
    {
        let now = Instant::now();
        for entry in self.queue.iter_mut().take(self.unacked) {
            send(&entry.segment)?;
            entry.sent_at = Some(now);
        }
        Ok(self.unacked)
    }
}

#[cfg(test)]
mod send_buffer_tests {
    use super::*;
    use rstest::rstest;
    use std::convert::Infallible;
    use std::thread;

    fn buffer_with(seqs: &[u32], seg_len: usize) -> SendBuffer {
        let mut buffer = SendBuffer::new();
        for &seq in seqs {
            buffer.push(Segment::new_data(1, 2, seq, &vec![0u8; seg_len]));
        }
        buffer
    }

    fn collect_sent(buffer: &mut SendBuffer, window: usize) -> Vec<u32> {
        let mut sent = Vec::new();
        buffer
            .send_pending::<_, Infallible>(window, |seg| {
                sent.push(seg.seq_number);
                Ok(())
            })
            .unwrap();
        sent
    }

    #[test]
    fn test_push_reports_empty_transition() {
        let mut buffer = SendBuffer::new();
        assert!(buffer.push(Segment::new_data(1, 2, 0, b"a")));
        assert!(!buffer.push(Segment::new_data(1, 2, 1, b"b")));
    }

    #[rstest]
    #[case(5, 3, vec![0, 10, 20])]
    #[case(2, 10, vec![0, 10])]
    #[case(0, 4, vec![])]
    fn test_send_pending_respects_window(
        #[case] queued: usize,
        #[case] window: usize,
        #[case] expected: Vec<u32>,
    ) {
        let seqs: Vec<u32> = (0..queued as u32).map(|i| i * 10).collect();
        let mut buffer = buffer_with(&seqs, 10);
        assert_eq!(collect_sent(&mut buffer, window), expected);
        assert_eq!(buffer.unacked(), expected.len());
        assert!(buffer.unacked() <= window);
        // nothing more goes out until an ack arrives
        assert!(collect_sent(&mut buffer, window).is_empty());
    }

    #[rstest]
    // ack covers the first two segments
    #[case(20, 2, vec![30])]
    // ack inside a segment's range still removes every lower sequence number
    #[case(15, 2, vec![30])]
    // ack below the head removes nothing and the window stays full
    #[case(0, 0, vec![])]
    // ack beyond every in-flight segment stops at the unsent region
    #[case(1000, 3, vec![30])]
    fn test_acknowledge_is_cumulative(
        #[case] ack_number: u32,
        #[case] expected_removed: usize,
        #[case] expected_next: Vec<u32>,
    ) {
        let mut buffer = buffer_with(&[0, 10, 20, 30], 10);
        collect_sent(&mut buffer, 3);
        assert_eq!(buffer.acknowledge(ack_number), expected_removed);
        assert_eq!(buffer.unacked(), 3 - expected_removed);
        assert_eq!(buffer.len(), 4 - expected_removed);
        assert_eq!(collect_sent(&mut buffer, 3), expected_next);
    }

    #[test]
    fn test_retransmit_resends_in_flight_in_order() {
        let mut buffer = buffer_with(&[0, 10, 20, 30, 40], 10);
        collect_sent(&mut buffer, 3);
        assert!(!buffer.is_timed_out(Duration::from_secs(60)));
        let first_sent_at = buffer.head_sent_at().unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(buffer.is_timed_out(Duration::from_millis(10)));

        let mut resent = Vec::new();
        let count = buffer
            .retransmit_unacked::<_, Infallible>(|seg| {
                resent.push(seg.seq_number);
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(resent, vec![0, 10, 20]);
        assert!(buffer.head_sent_at().unwrap() > first_sent_at);
    }

    #[test]
    fn test_failed_send_keeps_segment_unsent() {
        let mut buffer = buffer_with(&[0, 10], 10);
        let result = buffer.send_pending(10, |seg| {
            if seg.seq_number == 10 {
                Err("link down")
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Err("link down"));
        assert_eq!(buffer.unacked(), 1);
        assert_eq!(buffer.unsent(), 1);
    }
}
