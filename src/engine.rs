//! Replay instance lifecycle: the pacing thread, the consumer bridge and
//! the lock-file timer.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use tracing::info;

use crate::control::{self, ReplayShared};
use crate::error::{ReplayError, Result};
use crate::probe;
use crate::ring::{self, RingConsumer, RingEvent};
use crate::types::{EofCallback, Options, PacketSink};
use crate::{pacer, constants::M2TS_PACKET_SIZE};

/// One replaying file. Owns the pacing thread and the event-loop tasks
/// draining the ring into the sink.
pub struct FileInput {
    shared: Arc<ReplayShared>,
    producer: Option<thread::JoinHandle<()>>,
    bridge: Option<tokio::task::JoinHandle<()>>,
    lock_timer: Option<tokio::task::JoinHandle<()>>,
}

impl FileInput {
    /// Starts replaying `opts.filename` into `sink`. Must be called from
    /// within a tokio runtime.
    ///
    /// A missing or unreadable file is not an error here: the pacing
    /// thread exits on its own and the sink simply never sees a packet,
    /// so a transient problem never tears down the configuration that
    /// created this instance.
    pub fn spawn(
        opts: Options,
        sink: Box<dyn PacketSink>,
        callback: Option<EofCallback>,
    ) -> Result<Self> {
        let shared = ReplayShared::new(&opts);

        if opts.check_length {
            // probe-only mode: populate length() and friends, no pacing
            if let Ok(info) = probe::probe_file(&opts.filename, opts.buffer_size_mib) {
                shared.file_size.store(info.file_size, Ordering::Relaxed);
                shared
                    .packet_size
                    .store(info.format.packet_size(), Ordering::Relaxed);
                shared.start_time.store(info.start_time_ms, Ordering::Relaxed);
                shared.length.store(info.length_ms, Ordering::Relaxed);
            }
            return Ok(Self {
                shared,
                producer: None,
                bridge: None,
                lock_timer: None,
            });
        }

        if let Some(lock) = shared.lock.as_deref() {
            if let Some(skip) = control::read_lock_offset(lock) {
                info!("resuming at byte offset {}", skip);
                shared.file_skip.store(skip, Ordering::Relaxed);
            }
        }

        let (producer_half, consumer_half) = ring::channel();

        let producer = {
            let shared = Arc::clone(&shared);
            let window_bytes = opts.window_bytes();
            thread::Builder::new()
                .name("ts-pacer".into())
                .spawn(move || pacer::run(shared, producer_half, window_bytes))
                .map_err(ReplayError::ThreadSpawn)?
        };

        let bridge = tokio::spawn(bridge_loop(consumer_half, sink, callback));
        let lock_timer = shared
            .lock
            .is_some()
            .then(|| tokio::spawn(control::lock_timer(Arc::clone(&shared))));

        Ok(Self {
            shared,
            producer: Some(producer),
            bridge: Some(bridge),
            lock_timer,
        })
    }

    /// Stream length in ms. 0 for TS files or when unknown.
    pub fn length(&self) -> u32 {
        self.shared.length.load(Ordering::Relaxed)
    }

    /// Sets the pause flag: nonzero suspends pacing, 0 resumes it.
    pub fn pause(&self, state: i32) {
        self.shared.pause.store(state, Ordering::Relaxed);
    }

    /// Seeks to `pos` ms and returns the playback position in ms before
    /// the seek. `position(None)` only reports the current position.
    /// Seeking works for M2TS input only and only inside the known
    /// length; anything else returns 0 without repositioning.
    pub fn position(&self, pos: Option<u32>) -> u32 {
        let current = self
            .shared
            .position_ms
            .load(Ordering::Relaxed)
            .saturating_sub(self.shared.start_time.load(Ordering::Relaxed));

        let Some(pos) = pos else {
            return current;
        };

        let length = self.shared.length.load(Ordering::Relaxed);
        let packet_size = self.shared.packet_size.load(Ordering::Relaxed);
        if pos >= length || packet_size != M2TS_PACKET_SIZE {
            return 0;
        }

        let file_size = self.shared.file_size.load(Ordering::Relaxed);
        self.shared
            .file_skip
            .store(control::seek_offset(pos, file_size, length), Ordering::Relaxed);
        self.shared.reposition.store(true, Ordering::Relaxed);
        current
    }

    /// Stops replay: ends the pacing thread, drains the bridge and
    /// cancels the lock timer. The last persisted offset stays on disk.
    pub async fn stop(mut self) {
        if let Some(timer) = self.lock_timer.take() {
            timer.abort();
        }
        self.shared.running.store(false, Ordering::Relaxed);
        if let Some(producer) = self.producer.take() {
            // the pacing thread wakes from its current sleep slot and
            // observes the cleared flag, so this join is short
            let _ = producer.join();
        }
        // the producer half of the wakeup channel is gone now, the
        // bridge finishes once it drained the remaining signals
        if let Some(bridge) = self.bridge.take() {
            let _ = bridge.await;
        }
    }
}

/// Event-loop side: pop exactly one payload per wakeup signal and pass
/// it downstream; run the EOF callback once when the sentinel arrives.
async fn bridge_loop(
    mut ring: RingConsumer,
    mut sink: Box<dyn PacketSink>,
    mut callback: Option<EofCallback>,
) {
    while let Some(event) = ring.next().await {
        match event {
            RingEvent::Packet(ts) => sink.send(&ts),
            RingEvent::Eof => {
                if let Some(callback) = callback.take() {
                    callback();
                }
            }
        }
    }
}
