//! FIFO of encoded packets waiting for the gateway connection.

use std::collections::VecDeque;

use bytes::Bytes;

/// Packets not yet written to the gateway channel, oldest first.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    packets: VecDeque<Bytes>,
}

impl OutboundQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a packet to the tail.
    pub fn enqueue(&mut self, packet: Bytes) {
        self.packets.push_back(packet);
    }

    /// Pop packets head-first into `write` until the queue is empty or a
    /// write fails.
    ///
    /// A packet is popped before it is written, so the one whose write failed
    /// is not re-queued: delivery is at most once per packet. Returns the
    /// number of packets written successfully.
    pub fn flush_into<E>(
        &mut self,
        mut write: impl FnMut(Bytes) -> Result<(), E>,
    ) -> Result<usize, E> {
        let mut written = 0;
        while let Some(packet) = self.packets.pop_front() {
            write(packet)?;
            written += 1;
        }
        Ok(written)
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Number of waiting packets.
    pub fn len(&self) -> usize {
        self.packets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flushes_in_arrival_order() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(Bytes::from_static(b"a"));
        queue.enqueue(Bytes::from_static(b"b"));
        queue.enqueue(Bytes::from_static(b"c"));

        let mut seen = Vec::new();
        let written = queue
            .flush_into(|p| {
                seen.push(p);
                Ok::<_, ()>(())
            })
            .unwrap();

        assert_eq!(written, 3);
        assert_eq!(seen, vec![&b"a"[..], &b"b"[..], &b"c"[..]]);
        assert!(queue.is_empty());
    }

    #[test]
    fn stops_on_first_failed_write() {
        let mut queue = OutboundQueue::new();
        for p in [b"1", b"2", b"3"] {
            queue.enqueue(Bytes::from_static(p));
        }

        let mut attempts = 0;
        let result = queue.flush_into(|_| {
            attempts += 1;
            if attempts == 2 { Err("broken pipe") } else { Ok(()) }
        });

        assert_eq!(result, Err("broken pipe"));
        // The failed packet was popped and counts as sent.
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn flush_empty_queue_is_noop() {
        let mut queue = OutboundQueue::new();
        let written = queue.flush_into(|_| Err::<(), _>("unreachable")).unwrap();
        assert_eq!(written, 0);
    }
}
