//! Options and public data types for the replay engine

use crate::constants::{DEFAULT_INPUT_BUFFER_MIB, M2TS_PACKET_SIZE, TS_PACKET_SIZE};
use std::path::PathBuf;

/// Detected container layout of the input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// Plain transport stream, 188 bytes per packet.
    Ts,
    /// Blu-ray/AVCHD layout: 4-byte arrival timestamp + 188-byte packet.
    M2ts,
}

impl FileFormat {
    /// Stride between packet starts in the file.
    pub fn packet_size(self) -> usize {
        match self {
            FileFormat::Ts => TS_PACKET_SIZE,
            FileFormat::M2ts => M2TS_PACKET_SIZE,
        }
    }

    /// Bytes before the TS sync byte within one stride.
    pub fn header_len(self) -> usize {
        self.packet_size() - TS_PACKET_SIZE
    }

    pub fn name(self) -> &'static str {
        match self {
            FileFormat::Ts => "TS",
            FileFormat::M2ts => "M2TS",
        }
    }
}

/// Configuration options for one replay instance.
#[derive(Debug, Clone)]
pub struct Options {
    /// Path of the TS or M2TS file to replay.
    pub filename: PathBuf,
    /// Path used to persist the current read offset across restarts.
    pub lock: Option<PathBuf>,
    /// On EOF rewind to the file start instead of finishing.
    pub loop_playback: bool,
    /// Initial pause state (nonzero = paused).
    pub pause: i32,
    /// Input window size in MiB (0 selects the default of 2).
    pub buffer_size_mib: usize,
    /// Probe the file to populate `length()` and skip pacing entirely.
    pub check_length: bool,
}

impl Options {
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            lock: None,
            loop_playback: false,
            pause: 0,
            buffer_size_mib: DEFAULT_INPUT_BUFFER_MIB,
            check_length: false,
        }
    }

    /// Window size in bytes, with the zero-means-default rule applied.
    pub(crate) fn window_bytes(&self) -> usize {
        let mib = if self.buffer_size_mib == 0 {
            DEFAULT_INPUT_BUFFER_MIB
        } else {
            self.buffer_size_mib
        };
        mib * 1024 * 1024
    }
}

/// Downstream consumer of replayed packets. Called from the event-loop
/// side, one packet per wakeup.
pub trait PacketSink: Send {
    fn send(&mut self, ts: &[u8; TS_PACKET_SIZE]);
}

/// Invoked exactly once when a non-looping replay reaches end of file.
pub type EofCallback = Box<dyn FnOnce() + Send>;
