//! The pacing thread: emits packets into the ring at the rate embedded
//! in consecutive PCRs.
//!
//! Pacing is two-level. Inside a block (the packets between two PCRs)
//! every packet is followed by the same nominal sleep, and the sleep is
//! zeroed whenever real elapsed time runs ahead of the accumulated
//! nominal time. Across blocks the residual error feeds into the next
//! block's per-packet sleep, so short-term jitter cancels instead of
//! accumulating.

use std::fs::File;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, warn};

use crate::constants::{
    MAX_BLOCK_TIME_MS, MAX_SYNC_DIFF_MS, PAUSE_POLL, TIMETRAVEL_SYNC_DIFF_MS, TS_PACKET_SIZE,
};
use crate::control::ReplayShared;
use crate::pcr;
use crate::probe;
use crate::ring::RingProducer;
use crate::types::FileFormat;

/// Microseconds on the system wall clock. Pacing follows the wall clock
/// on purpose: a system time jump shows up as "timetravel" and gets
/// recovered instead of silently stretching playback.
fn wall_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

struct Pacer {
    shared: Arc<ReplayShared>,
    ring: RingProducer,
    window: Vec<u8>,
    /// Valid bytes in the window.
    valid: usize,
    /// Offset of the next packet, always stride-aligned.
    cursor: usize,
    file: Option<File>,
    format: FileFormat,
    pcr_last: u64,
}

/// Thread entry point. Returns when the file cannot be opened, on
/// non-looping EOF, or when teardown clears the running flag.
pub fn run(shared: Arc<ReplayShared>, ring: RingProducer, window_bytes: usize) {
    Pacer {
        shared,
        ring,
        window: vec![0u8; window_bytes],
        valid: 0,
        cursor: 0,
        file: None,
        format: FileFormat::Ts,
        pcr_last: 0,
    }
    .run_loop();
}

impl Pacer {
    /// (Re)opens the file at the shared skip offset and re-probes it.
    /// All probe results the control surface needs are published here.
    fn reopen(&mut self) -> bool {
        let mut skip = self.shared.file_skip.load(Ordering::Relaxed);
        match probe::open_file(&self.shared.filename, &mut self.window, &mut skip) {
            Ok(opened) => {
                self.shared.file_skip.store(skip, Ordering::Relaxed);
                self.shared.file_size.store(opened.file_size, Ordering::Relaxed);
                self.shared
                    .packet_size
                    .store(opened.format.packet_size(), Ordering::Relaxed);
                self.shared.start_time.store(opened.start_time, Ordering::Relaxed);
                self.shared.length.store(opened.length, Ordering::Relaxed);
                self.valid = opened.valid;
                self.cursor = opened.cursor;
                self.format = opened.format;
                self.pcr_last = opened.pcr;
                self.file = Some(opened.file);
                true
            }
            Err(_) => false,
        }
    }

    /// Sleeps in small steps while the pause flag holds. Returns false
    /// when teardown was requested meanwhile.
    fn wait_while_paused(&self) -> bool {
        while self.shared.pause.load(Ordering::Relaxed) != 0 {
            if !self.shared.running.load(Ordering::Relaxed) {
                return false;
            }
            thread::sleep(PAUSE_POLL);
        }
        true
    }

    /// Slides the window forward to the cursor and refills it. Returns
    /// false when the pacing thread should terminate.
    fn refill(&mut self) -> bool {
        // a full window with nothing consumed means no PCR anywhere ahead
        if self.cursor == 0 && self.valid == self.window.len() {
            error!("no PCR found in the input window");
            self.ring.push_eof();
            return false;
        }

        let skip = self.shared.file_skip.load(Ordering::Relaxed) + self.cursor as u64;
        self.shared.file_skip.store(skip, Ordering::Relaxed);
        self.cursor = 0;

        let len = match self.file.as_ref() {
            Some(file) => probe::pread_full(file, &mut self.window, skip),
            None => return false,
        };

        match len {
            Ok(len) if len == self.window.len() => {
                self.valid = len;
                true
            }
            _ => {
                // short read: end of file
                if !self.shared.loop_playback {
                    self.ring.push_eof();
                    return false;
                }
                self.valid = 0;
                self.shared.file_skip.store(0, Ordering::Relaxed);
                self.shared.reposition.store(true, Ordering::Relaxed);
                true
            }
        }
    }

    fn run_loop(&mut self) {
        if !self.reopen() {
            return;
        }

        let mut time_sync_b = wall_micros();
        let mut block_time_total = 0.0f64;
        let mut total_sync_diff = 0.0f64;
        let mut pause_total = 0.0f64;

        'stream: while self.shared.running.load(Ordering::Relaxed) {
            if self.shared.pause.load(Ordering::Relaxed) != 0 {
                if !self.wait_while_paused() {
                    break;
                }
                time_sync_b = wall_micros();
                block_time_total = 0.0;
                total_sync_diff = 0.0;
                pause_total = 0.0;
            }

            if self.shared.reposition.load(Ordering::Relaxed) {
                if !self.reopen() {
                    break;
                }
                self.shared.reposition.store(false, Ordering::Relaxed);
                time_sync_b = wall_micros();
                block_time_total = 0.0;
                total_sync_diff = 0.0;
                pause_total = 0.0;
            }

            let packet_size = self.format.packet_size();
            let hdr = self.format.header_len();

            let block_end = match pcr::seek_pcr(
                &self.window[..self.valid],
                self.cursor + packet_size,
                packet_size,
            ) {
                Some(end) => end,
                None => {
                    if !self.refill() {
                        break;
                    }
                    continue;
                }
            };

            let block_size = ((block_end - self.cursor) / packet_size) as u32;
            let pcr = pcr::calc_pcr(&self.window[block_end + hdr..]);
            let delta_pcr = pcr.wrapping_sub(self.pcr_last);
            self.pcr_last = pcr;
            let block_time = pcr::delta_to_ms(delta_pcr);

            if !(0.0..=MAX_BLOCK_TIME_MS).contains(&block_time) {
                error!(
                    "block time out of range: {:.2} block_size:{}",
                    block_time, block_size
                );
                self.cursor = block_end;
                time_sync_b = wall_micros();
                block_time_total = 0.0;
                total_sync_diff = 0.0;
                pause_total = 0.0;
                continue;
            }
            block_time_total += block_time;

            // nominal per-packet sleep, with the previous residual folded in
            let ts_sync_nsec = if block_time + total_sync_diff > 0.0 {
                ((block_time + total_sync_diff) * 1_000_000.0 / block_size as f64) as u64
            } else {
                0
            };
            let mut sleep_ns = ts_sync_nsec;

            let mut calc_block_time_ns: u64 = 0;
            let time_sync_bb = wall_micros();
            let mut pause_block_us: u64 = 0;

            while self.cursor < block_end {
                if self.shared.pause.load(Ordering::Relaxed) != 0 {
                    let pause_start = wall_micros();
                    if !self.wait_while_paused() {
                        break 'stream;
                    }
                    let pause_stop = wall_micros();
                    if pause_stop < pause_start {
                        self.shared.reposition.store(true, Ordering::Relaxed); // timetravel
                    } else {
                        pause_block_us += pause_stop - pause_start;
                    }
                }

                if self.shared.reposition.load(Ordering::Relaxed) {
                    break;
                }
                if !self.shared.running.load(Ordering::Relaxed) {
                    break 'stream;
                }

                let packet = &self.window[self.cursor + hdr..self.cursor + hdr + TS_PACKET_SIZE];
                self.ring.push(packet);
                if hdr > 0 {
                    let arrival = pcr::m2ts_time(&self.window[self.cursor..]) / 1000;
                    self.shared.position_ms.store(arrival, Ordering::Relaxed);
                }
                self.cursor += packet_size;

                if sleep_ns > 0 {
                    thread::sleep(Duration::from_nanos(sleep_ns));
                }

                // block syncing
                calc_block_time_ns += ts_sync_nsec;
                let time_sync_be = wall_micros();
                if time_sync_be < time_sync_bb {
                    break; // timetravel
                }
                let real_block_time_ns =
                    (time_sync_be - time_sync_bb).saturating_sub(pause_block_us) * 1000;
                sleep_ns = if real_block_time_ns > calc_block_time_ns {
                    0
                } else {
                    ts_sync_nsec
                };
            }
            pause_total += pause_block_us as f64 / 1000.0;

            if self.shared.reposition.load(Ordering::Relaxed) {
                continue;
            }

            // stream syncing
            let time_sync_e = wall_micros();
            if time_sync_e < time_sync_b {
                warn!("timetravel detected");
                total_sync_diff = TIMETRAVEL_SYNC_DIFF_MS;
            } else {
                let time_sync_diff = (time_sync_e - time_sync_b) as f64 / 1000.0;
                total_sync_diff = block_time_total - time_sync_diff - pause_total;
            }

            // reset pacing after a pause in the system clock or heavy drift
            if total_sync_diff < -MAX_SYNC_DIFF_MS || total_sync_diff > MAX_SYNC_DIFF_MS {
                warn!(
                    "wrong syncing time: {:.2}ms. reset time values",
                    total_sync_diff
                );
                time_sync_b = wall_micros();
                block_time_total = 0.0;
                total_sync_diff = 0.0;
                pause_total = 0.0;
            }
        }
    }
}
