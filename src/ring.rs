//! Single-producer / single-consumer packet ring with a byte-oriented
//! wakeup channel.
//!
//! The pacing thread pushes one 188-byte payload and one `0x00` signal
//! byte per packet; the event loop pops exactly one payload per signal
//! byte it receives. A single `0xFF` signal byte announces end of stream
//! and carries no payload. Only the fill counter is shared between the
//! two sides; each index has a single owner.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::error;

use crate::constants::{SYNC_BUFFER_PACKETS, SYNC_BUFFER_SIZE, TS_PACKET_SIZE};

/// Signal byte announcing one packet in the ring.
pub const SIGNAL_PACKET: u8 = 0x00;
/// Signal byte announcing end of stream, no payload attached.
pub const SIGNAL_EOF: u8 = 0xFF;

struct Shared {
    buf: Box<[UnsafeCell<u8>]>,
    fill: AtomicUsize,
}

// The producer writes and the consumer reads disjoint regions of `buf`;
// the fill counter's release/acquire pairing orders those accesses.
unsafe impl Sync for Shared {}

/// Producer half, owned by the pacing thread.
pub struct RingProducer {
    shared: Arc<Shared>,
    write: usize,
    overflow: u32,
    signal: mpsc::Sender<u8>,
}

/// Consumer half, owned by the event loop.
pub struct RingConsumer {
    shared: Arc<Shared>,
    read: usize,
    signal: mpsc::Receiver<u8>,
}

/// One consumer-side event: a popped payload or the EOF sentinel.
pub enum RingEvent {
    Packet([u8; TS_PACKET_SIZE]),
    Eof,
}

/// Allocates the ring and its wakeup channel. The channel holds one byte
/// per ring slot plus the sentinel, so a producer send never blocks.
pub fn channel() -> (RingProducer, RingConsumer) {
    let shared = Arc::new(Shared {
        buf: (0..SYNC_BUFFER_SIZE).map(|_| UnsafeCell::new(0)).collect(),
        fill: AtomicUsize::new(0),
    });
    let (tx, rx) = mpsc::channel(SYNC_BUFFER_PACKETS + 1);
    (
        RingProducer {
            shared: Arc::clone(&shared),
            write: 0,
            overflow: 0,
            signal: tx,
        },
        RingConsumer {
            shared,
            read: 0,
            signal: rx,
        },
    )
}

impl RingProducer {
    /// Copies one TS payload into the ring and wakes the consumer.
    /// A full ring drops the packet and tallies it; the tally is logged
    /// on the next successful push.
    pub fn push(&mut self, ts: &[u8]) {
        debug_assert_eq!(ts.len(), TS_PACKET_SIZE);

        if self.shared.fill.load(Ordering::Acquire) >= SYNC_BUFFER_SIZE {
            self.overflow += 1;
            return;
        }

        if self.overflow > 0 {
            error!("sync buffer overflow. dropped {} packets", self.overflow);
            self.overflow = 0;
        }

        unsafe {
            ptr::copy_nonoverlapping(
                ts.as_ptr(),
                self.shared.buf[self.write].get(),
                TS_PACKET_SIZE,
            );
        }
        self.write += TS_PACKET_SIZE;
        if self.write >= SYNC_BUFFER_SIZE {
            self.write = 0;
        }
        self.shared.fill.fetch_add(TS_PACKET_SIZE, Ordering::Release);

        if self.signal.blocking_send(SIGNAL_PACKET).is_err() {
            error!("failed to push signal to queue");
        }
    }

    /// Announces end of stream with the sentinel signal byte.
    pub fn push_eof(&mut self) {
        if self.signal.blocking_send(SIGNAL_EOF).is_err() {
            error!("failed to push exit signal to queue");
        }
    }

    #[cfg(test)]
    fn dropped(&self) -> u32 {
        self.overflow
    }
}

impl RingConsumer {
    /// Waits for the next signal byte and pops the matching payload.
    /// Returns `None` once the producer is gone and the channel drained.
    pub async fn next(&mut self) -> Option<RingEvent> {
        let cmd = self.signal.recv().await?;
        if cmd == SIGNAL_EOF {
            return Some(RingEvent::Eof);
        }

        // Pairs with the producer's release add: the payload bytes for
        // this signal are visible after the acquire load.
        let _ = self.shared.fill.load(Ordering::Acquire);

        let mut ts = [0u8; TS_PACKET_SIZE];
        unsafe {
            ptr::copy_nonoverlapping(
                self.shared.buf[self.read].get(),
                ts.as_mut_ptr(),
                TS_PACKET_SIZE,
            );
        }
        self.read += TS_PACKET_SIZE;
        if self.read >= SYNC_BUFFER_SIZE {
            self.read = 0;
        }
        self.shared.fill.fetch_sub(TS_PACKET_SIZE, Ordering::Release);
        Some(RingEvent::Packet(ts))
    }

    /// Bytes currently held in the ring.
    pub fn fill(&self) -> usize {
        self.shared.fill.load(Ordering::Acquire)
    }
}
