//! Constants for MPEG-TS replay and PCR pacing

use std::time::Duration;

/// MPEG-TS packet constants
pub const TS_PACKET_SIZE: usize = 188;
pub const M2TS_PACKET_SIZE: usize = 192;
pub const TS_SYNC_BYTE: u8 = 0x47;

/// PCR constants. A PCR is a 33-bit 90 kHz base and a 9-bit 27 MHz
/// extension, packed as `base * 300 + ext`.
pub const PCR_EXT_PER_BASE: u64 = 300;
pub const PCR_BASE_TICKS_PER_MS: f64 = 90.0; // 90 kHz
pub const PCR_EXT_TICKS_PER_MS: f64 = 27_000.0; // 27 MHz

/// Input window over the file, refilled with positioned reads
pub const DEFAULT_INPUT_BUFFER_MIB: usize = 2;

/// Sync ring between the pacing thread and the event loop
pub const SYNC_BUFFER_PACKETS: usize = 2048;
pub const SYNC_BUFFER_SIZE: usize = TS_PACKET_SIZE * SYNC_BUFFER_PACKETS;

/// Pacing guards (in milliseconds)
pub const MAX_BLOCK_TIME_MS: f64 = 250.0; // PCR blocks longer than this are skipped
pub const MAX_SYNC_DIFF_MS: f64 = 100.0; // accumulated drift beyond this resets pacing
pub const TIMETRAVEL_SYNC_DIFF_MS: f64 = -1000.0; // forced catch-up after a clock jump

/// Pause flag polling period for the pacing thread
pub const PAUSE_POLL: Duration = Duration::from_micros(500);

/// Lock file (read-offset persistence) constants
pub const LOCK_REWRITE_INTERVAL: Duration = Duration::from_secs(2);
pub const LOCK_READ_MAX: usize = 64;
