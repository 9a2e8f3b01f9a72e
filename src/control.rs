//! Shared control state and read-offset persistence.
//!
//! The pacing thread owns the file and the input window; everything the
//! control surface or the event loop needs to see crosses over as
//! word-sized atomics. The flags are polled, so relaxed ordering is
//! enough everywhere here.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::constants::{LOCK_READ_MAX, LOCK_REWRITE_INTERVAL, M2TS_PACKET_SIZE};
use crate::types::Options;

pub struct ReplayShared {
    pub filename: PathBuf,
    pub lock: Option<PathBuf>,
    pub loop_playback: bool,

    /// Nonzero suspends pacing.
    pub pause: AtomicI32,
    /// Asks the pacing thread to reopen the file at `file_skip`.
    pub reposition: AtomicBool,
    /// Cleared on teardown; the pacing thread polls it between sleeps.
    pub running: AtomicBool,

    /// Byte offset of the input window within the file. Written by the
    /// pacing thread, read by the lock timer and `position()`.
    pub file_skip: AtomicU64,
    pub file_size: AtomicU64,
    /// 188 or 192 once probed, 0 before.
    pub packet_size: AtomicUsize,
    /// First M2TS arrival timestamp in ms.
    pub start_time: AtomicU32,
    /// Stream length in ms (M2TS only, 0 if unknown).
    pub length: AtomicU32,
    /// Arrival timestamp in ms of the most recently emitted M2TS cell.
    pub position_ms: AtomicU32,
}

impl ReplayShared {
    pub fn new(opts: &Options) -> Arc<Self> {
        Arc::new(Self {
            filename: opts.filename.clone(),
            lock: opts.lock.clone(),
            loop_playback: opts.loop_playback,
            pause: AtomicI32::new(opts.pause),
            reposition: AtomicBool::new(false),
            running: AtomicBool::new(true),
            file_skip: AtomicU64::new(0),
            file_size: AtomicU64::new(0),
            packet_size: AtomicUsize::new(0),
            start_time: AtomicU32::new(0),
            length: AtomicU32::new(0),
            position_ms: AtomicU32::new(0),
        })
    }
}

/// Maps a position in ms to a cell-aligned byte offset, proportional to
/// the stream length.
pub fn seek_offset(pos_ms: u32, file_size: u64, length_ms: u32) -> u64 {
    let ts_count = file_size / M2TS_PACKET_SIZE as u64;
    let ts_skip = (pos_ms as u64 * ts_count) / length_ms as u64;
    ts_skip * M2TS_PACKET_SIZE as u64
}

/// Reads the persisted read offset back: a leading decimal ASCII run in
/// the first 64 bytes of the lock file.
pub fn read_lock_offset(path: &Path) -> Option<u64> {
    let mut file = File::open(path).ok()?;
    let mut buf = [0u8; LOCK_READ_MAX];
    let n = file.read(&mut buf).ok()?;
    let digits = buf[..n]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 {
        return None;
    }
    std::str::from_utf8(&buf[..digits]).ok()?.parse().ok()
}

/// Rewrites the lock file with the current offset as decimal ASCII.
/// Failures are quietly ignored, the next tick tries again.
pub fn write_lock_offset(path: &Path, skip: u64) {
    if let Ok(mut file) = File::create(path) {
        let _ = file.write_all(skip.to_string().as_bytes());
    }
}

/// Event-loop task persisting `file_skip` every two seconds.
pub async fn lock_timer(shared: Arc<ReplayShared>) {
    let Some(path) = shared.lock.clone() else {
        return;
    };
    let start = tokio::time::Instant::now() + LOCK_REWRITE_INTERVAL;
    let mut interval = tokio::time::interval_at(start, LOCK_REWRITE_INTERVAL);
    loop {
        interval.tick().await;
        write_lock_offset(&path, shared.file_skip.load(Ordering::Relaxed));
    }
}
