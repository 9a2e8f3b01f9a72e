//! Byte-format probe: classifies a file as TS or M2TS, locates the first
//! PCR-bearing packet and, for M2TS, derives start time and length from
//! the head and tail arrival timestamps.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use tracing::{error, warn};

use crate::constants::{DEFAULT_INPUT_BUFFER_MIB, M2TS_PACKET_SIZE, TS_PACKET_SIZE, TS_SYNC_BYTE};
use crate::error::{ReplayError, Result};
use crate::pcr;
use crate::types::FileFormat;

/// Everything the pacing loop needs after a successful open.
pub struct OpenedFile {
    pub file: File,
    pub file_size: u64,
    pub format: FileFormat,
    /// Offset of the first PCR-bearing packet past the window head.
    pub cursor: usize,
    /// Valid bytes in the window.
    pub valid: usize,
    /// PCR of the packet at `cursor`.
    pub pcr: u64,
    /// First M2TS arrival timestamp in ms (0 for TS).
    pub start_time: u32,
    /// Last minus first M2TS arrival timestamp in ms (0 for TS or unknown).
    pub length: u32,
}

/// Summary of a probe-only open, the `check_length` surface.
#[derive(Debug, Clone, Copy)]
pub struct ProbeInfo {
    pub format: FileFormat,
    pub file_size: u64,
    pub start_time_ms: u32,
    pub length_ms: u32,
}

/// Positioned read that retries short reads until `buf` is full or the
/// file ends. Returns the number of bytes actually read.
pub(crate) fn pread_full(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut done = 0;
    while done < buf.len() {
        match file.read_at(&mut buf[done..], offset + done as u64) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}

/// Opens `path`, fills `window` from `*skip` and probes the content.
///
/// A `*skip` at or beyond the file size is reset to zero with a warning.
/// A window shorter than requested is probed as far as it goes; content
/// that cannot be classified fails with [`ReplayError::WrongFormat`].
pub fn open_file(path: &Path, window: &mut [u8], skip: &mut u64) -> Result<OpenedFile> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();

    if *skip > 0 && *skip >= file_size {
        warn!("skip value is greater than the file size");
        *skip = 0;
    }

    let valid = pread_full(&file, window, *skip)?;
    if valid < window.len() {
        warn!("file is too small");
    }
    let window = &window[..valid];

    let format = classify(window).ok_or_else(|| {
        error!("wrong file format");
        ReplayError::WrongFormat
    })?;

    // the scan starts one stride in: the window's first packet is never
    // accepted as the PCR start
    let cursor = pcr::seek_pcr(window, format.packet_size(), format.packet_size()).ok_or_else(|| {
        error!("first PCR is not found");
        ReplayError::FirstPcrNotFound
    })?;

    let pcr = pcr::calc_pcr(&window[cursor + format.header_len()..]);

    let (start_time, length) = match format {
        FileFormat::Ts => (0, 0),
        FileFormat::M2ts => {
            let start_time = pcr::m2ts_time(&window[cursor..]) / 1000;
            (start_time, m2ts_length(&file, file_size, start_time))
        }
    };

    Ok(OpenedFile {
        file,
        file_size,
        format,
        cursor,
        valid,
        pcr,
        start_time,
        length,
    })
}

/// TS if packets 0 and 1 both start with the sync byte, M2TS if the sync
/// byte sits 4 bytes into cells 0 and 1.
fn classify(window: &[u8]) -> Option<FileFormat> {
    if window.len() > TS_PACKET_SIZE
        && window[0] == TS_SYNC_BYTE
        && window[TS_PACKET_SIZE] == TS_SYNC_BYTE
    {
        Some(FileFormat::Ts)
    } else if window.len() > 4 + M2TS_PACKET_SIZE
        && window[4] == TS_SYNC_BYTE
        && window[4 + M2TS_PACKET_SIZE] == TS_SYNC_BYTE
    {
        Some(FileFormat::M2ts)
    } else {
        None
    }
}

/// Reads the final M2TS cell and derives the stream length in ms.
/// Stays 0 when the tail does not carry a sync byte.
fn m2ts_length(file: &File, file_size: u64, start_time: u32) -> u32 {
    let mut tail = [0u8; M2TS_PACKET_SIZE];
    if file_size < M2TS_PACKET_SIZE as u64 {
        return 0;
    }
    match pread_full(file, &mut tail, file_size - M2TS_PACKET_SIZE as u64) {
        Ok(n) if n == M2TS_PACKET_SIZE && tail[4] == TS_SYNC_BYTE => {
            let stop_time = pcr::m2ts_time(&tail) / 1000;
            stop_time.saturating_sub(start_time)
        }
        _ => {
            warn!("failed to get M2TS file length");
            0
        }
    }
}

/// Probe-only open used by the `check_length` option: classifies the file
/// and reports size, start time and length without starting replay.
pub fn probe_file(path: &Path, buffer_size_mib: usize) -> Result<ProbeInfo> {
    let mib = if buffer_size_mib == 0 {
        DEFAULT_INPUT_BUFFER_MIB
    } else {
        buffer_size_mib
    };
    let mut window = vec![0u8; mib * 1024 * 1024];
    let mut skip = 0u64;
    let opened = open_file(path, &mut window, &mut skip)?;
    Ok(ProbeInfo {
        format: opened.format,
        file_size: opened.file_size,
        start_time_ms: opened.start_time,
        length_ms: opened.length,
    })
}
