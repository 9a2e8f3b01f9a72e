//! Whole-engine scenarios: probing, paced replay, EOF handling, looping,
//! seeking and lock-file persistence. All fixtures are synthetic streams
//! built in-test; timing assertions use generous bounds since pacing
//! rides on the OS sleep granularity.

use mpegts_replayer::replayer::{
    probe_file, FileFormat, FileInput, Options, PacketSink, M2TS_PACKET_SIZE, TS_PACKET_SIZE,
};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

/// Adaptation-field-only packet carrying a PCR, with a test index stowed
/// in the stuffing bytes.
fn pcr_packet(pcr: u64, index: u32) -> [u8; TS_PACKET_SIZE] {
    let mut ts = [0xFFu8; TS_PACKET_SIZE];
    ts[0] = 0x47;
    ts[1] = 0x00;
    ts[2] = 0x64;
    ts[3] = 0x20;
    ts[4] = 183;
    ts[5] = 0x10;
    let base = pcr / 300;
    let ext = pcr % 300;
    ts[6] = (base >> 25) as u8;
    ts[7] = (base >> 17) as u8;
    ts[8] = (base >> 9) as u8;
    ts[9] = (base >> 1) as u8;
    ts[10] = (((base & 1) << 7) as u8) | ((ext >> 8) as u8 & 1);
    ts[11] = ext as u8;
    ts[180..184].copy_from_slice(&index.to_be_bytes());
    ts
}

/// Payload-only packet with a test index at the start of the payload.
fn filler_packet(index: u32) -> [u8; TS_PACKET_SIZE] {
    let mut ts = [0x00u8; TS_PACKET_SIZE];
    ts[0] = 0x47;
    ts[1] = 0x00;
    ts[2] = 0x65;
    ts[3] = 0x10;
    ts[4..8].copy_from_slice(&index.to_be_bytes());
    ts
}

fn m2ts_cell(arrival: u32, ts: &[u8; TS_PACKET_SIZE]) -> [u8; M2TS_PACKET_SIZE] {
    let mut cell = [0u8; M2TS_PACKET_SIZE];
    cell[..4].copy_from_slice(&arrival.to_be_bytes());
    cell[4..].copy_from_slice(ts);
    cell
}

/// Recovers the test index regardless of packet flavor.
fn packet_index(ts: &[u8; TS_PACKET_SIZE]) -> u32 {
    if ts[3] & 0x20 != 0 && ts[4] > 0 {
        u32::from_be_bytes(ts[180..184].try_into().unwrap())
    } else {
        u32::from_be_bytes(ts[4..8].try_into().unwrap())
    }
}

fn write_fixture(chunks: impl IntoIterator<Item = [u8; TS_PACKET_SIZE]>) -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    for c in chunks {
        f.write_all(&c).unwrap();
    }
    f.flush().unwrap();
    f
}

/// 201 packets: a PCR every 50th packet, 1 ms per block.
fn ts_fixture() -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    for i in 0..201u32 {
        let packet = if i % 50 == 0 {
            pcr_packet((i / 50) as u64 * 27_000, i)
        } else {
            filler_packet(i)
        };
        f.write_all(&packet).unwrap();
    }
    f.flush().unwrap();
    f
}

struct CollectSink {
    packets: Arc<Mutex<Vec<[u8; TS_PACKET_SIZE]>>>,
}

impl CollectSink {
    fn new() -> (Self, Arc<Mutex<Vec<[u8; TS_PACKET_SIZE]>>>) {
        let packets = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                packets: Arc::clone(&packets),
            },
            packets,
        )
    }
}

impl PacketSink for CollectSink {
    fn send(&mut self, ts: &[u8; TS_PACKET_SIZE]) {
        self.packets.lock().unwrap().push(*ts);
    }
}

async fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if pred() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    pred()
}

fn eof_counter() -> (Arc<AtomicUsize>, Box<dyn FnOnce() + Send>) {
    let counter = Arc::new(AtomicUsize::new(0));
    let cloned = Arc::clone(&counter);
    (
        counter,
        Box::new(move || {
            cloned.fetch_add(1, Ordering::SeqCst);
        }),
    )
}

#[test]
fn probe_classifies_ts() {
    let f = write_fixture([filler_packet(0), pcr_packet(500, 1)]);
    let info = probe_file(f.path(), 1).unwrap();
    assert_eq!(info.format, FileFormat::Ts);
    assert_eq!(info.file_size, 2 * TS_PACKET_SIZE as u64);
    assert_eq!(info.length_ms, 0);
}

#[test]
fn probe_reports_m2ts_length() {
    // the first PCR start is the cell after the leading non-PCR cell
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(&m2ts_cell(500_000, &filler_packet(0))).unwrap();
    for (arrival, pcr) in [(1_000_000u32, 0u64), (2_000_000, 27_000), (11_000_000, 54_000)] {
        f.write_all(&m2ts_cell(arrival, &pcr_packet(pcr, 0))).unwrap();
    }
    f.flush().unwrap();
    let info = probe_file(f.path(), 1).unwrap();
    assert_eq!(info.format, FileFormat::M2ts);
    assert_eq!(info.start_time_ms, 1000);
    assert_eq!(info.length_ms, 10_000);
}

#[tokio::test(flavor = "multi_thread")]
async fn replays_whole_file_then_signals_eof_once() {
    let f = ts_fixture();
    let (sink, collected) = CollectSink::new();
    let (eof, callback) = eof_counter();

    let input = FileInput::spawn(
        Options::new(f.path()),
        Box::new(sink),
        Some(callback),
    )
    .unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || eof.load(Ordering::SeqCst) == 1).await,
        "EOF callback never fired"
    );

    let packets = collected.lock().unwrap();
    // the PCR at packet 0 is never the start, so replay covers packet 50
    // (the next PCR) up to but not including the last PCR at packet 200
    assert_eq!(packets.len(), 150);
    for (i, ts) in packets.iter().enumerate() {
        assert_eq!(ts[0], 0x47);
        assert_eq!(packet_index(ts), i as u32 + 50);
    }
    drop(packets);

    assert_eq!(eof.load(Ordering::SeqCst), 1);
    // seeking is meaningless for plain TS
    assert_eq!(input.position(Some(1)), 0);
    input.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn pacing_spreads_a_block_over_its_pcr_delta() {
    // one 200 ms block of 11 packets behind a leading non-PCR packet
    let mut packets = vec![filler_packet(0), pcr_packet(0, 1)];
    packets.extend((2..12).map(filler_packet));
    packets.push(pcr_packet(200 * 27_000, 12));
    let f = write_fixture(packets);

    let (sink, collected) = CollectSink::new();
    let (eof, callback) = eof_counter();
    let started = Instant::now();
    let input = FileInput::spawn(Options::new(f.path()), Box::new(sink), Some(callback)).unwrap();

    assert!(wait_until(Duration::from_secs(5), || eof.load(Ordering::SeqCst) == 1).await);
    let elapsed = started.elapsed();

    assert_eq!(collected.lock().unwrap().len(), 11);
    assert!(
        elapsed >= Duration::from_millis(100),
        "block replayed too fast: {elapsed:?}"
    );
    input.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn looping_replay_rewinds_without_eof() {
    // a leading non-PCR packet, then a PCR every 10th packet starting at
    // index 1, 1 ms per block, 20 emitted per pass
    let mut packets = vec![filler_packet(0)];
    for i in 0..21u32 {
        packets.push(if i % 10 == 0 {
            pcr_packet((i / 10) as u64 * 27_000, i + 1)
        } else {
            filler_packet(i + 1)
        });
    }
    let f = write_fixture(packets);

    let (sink, collected) = CollectSink::new();
    let (eof, callback) = eof_counter();
    let mut opts = Options::new(f.path());
    opts.loop_playback = true;
    let input = FileInput::spawn(opts, Box::new(sink), Some(callback)).unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || collected.lock().unwrap().len() >= 65).await,
        "loop did not keep producing"
    );

    let packets = collected.lock().unwrap();
    // every pass restarts at the first PCR, the packet at index 1
    let rewinds = packets.iter().filter(|ts| packet_index(ts) == 1).count();
    assert!(rewinds >= 3, "expected several rewinds, saw {rewinds}");
    drop(packets);
    assert_eq!(eof.load(Ordering::SeqCst), 0);
    input.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn initial_pause_holds_replay_until_resumed() {
    let mut packets = vec![filler_packet(0), pcr_packet(0, 1)];
    packets.extend((2..12).map(filler_packet));
    packets.push(pcr_packet(200 * 27_000, 12));
    let f = write_fixture(packets);

    let (sink, collected) = CollectSink::new();
    let (eof, callback) = eof_counter();
    let mut opts = Options::new(f.path());
    opts.pause = 1;
    let input = FileInput::spawn(opts, Box::new(sink), Some(callback)).unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(collected.lock().unwrap().len(), 0, "paused replay emitted packets");

    input.pause(0);
    assert!(
        wait_until(Duration::from_secs(5), || eof.load(Ordering::SeqCst) == 1).await,
        "replay did not resume after pause(0)"
    );
    assert_eq!(collected.lock().unwrap().len(), 11);
    input.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn seeking_jumps_to_the_proportional_cell() {
    // 1000 cells, all PCR except the leading one, 5 ms per block,
    // arrivals 10 ms apart
    let mut f = NamedTempFile::new().unwrap();
    for i in 0..1000u32 {
        let ts = if i == 0 {
            filler_packet(i)
        } else {
            pcr_packet(i as u64 * 135_000, i)
        };
        f.write_all(&m2ts_cell(i * 10_000, &ts)).unwrap();
    }
    f.flush().unwrap();

    let (sink, collected) = CollectSink::new();
    let mut opts = Options::new(f.path());
    opts.loop_playback = true;
    let input = FileInput::spawn(opts, Box::new(sink), None).unwrap();

    assert!(wait_until(Duration::from_secs(5), || collected.lock().unwrap().len() >= 20).await);

    // start time is the arrival of cell 1, the first PCR start
    let length = input.length();
    assert_eq!(length, 9980);
    // out-of-range positions are rejected without repositioning
    assert_eq!(input.position(Some(length)), 0);

    // length/2 maps onto cell 500; replay restarts at the PCR after it
    input.position(Some(length / 2));
    assert!(
        wait_until(Duration::from_secs(5), || {
            collected
                .lock()
                .unwrap()
                .iter()
                .any(|ts| packet_index(ts) == 501)
        })
        .await,
        "seek target never showed up"
    );

    let packets = collected.lock().unwrap();
    let jump = packets.iter().position(|ts| packet_index(ts) == 501).unwrap();
    assert!(packet_index(&packets[jump - 1]) < 100, "no jump before the seek target");
    if let Some(next) = packets.get(jump + 1) {
        assert_eq!(packet_index(next), 502);
    }
    drop(packets);
    input.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn lock_file_restores_and_persists_the_offset() {
    // every packet a PCR, 1 ms per block
    let f = write_fixture((0..200u32).map(|i| pcr_packet(i as u64 * 27_000, i)));
    let dir = tempfile::tempdir().unwrap();
    let lock = dir.path().join("input.lock");
    std::fs::write(&lock, (2 * TS_PACKET_SIZE).to_string()).unwrap();

    let (sink, collected) = CollectSink::new();
    let mut opts = Options::new(f.path());
    opts.lock = Some(lock.clone());
    opts.loop_playback = true;
    let input = FileInput::spawn(opts, Box::new(sink), None).unwrap();

    assert!(wait_until(Duration::from_secs(5), || !collected.lock().unwrap().is_empty()).await);
    // replay resumed at the persisted offset, not at the file start: the
    // window begins at packet 2 and the first PCR start is the packet after
    assert_eq!(packet_index(&collected.lock().unwrap()[0]), 3);

    // the timer rewrites the lock with a current decimal offset
    tokio::time::sleep(Duration::from_millis(2300)).await;
    let persisted = std::fs::read_to_string(&lock).unwrap();
    assert!(persisted.bytes().all(|b| b.is_ascii_digit()));
    input.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn check_length_probes_without_replaying() {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(&m2ts_cell(500_000, &filler_packet(0))).unwrap();
    for (arrival, pcr) in [(1_000_000u32, 0u64), (2_000_000, 27_000), (11_000_000, 54_000)] {
        f.write_all(&m2ts_cell(arrival, &pcr_packet(pcr, 0))).unwrap();
    }
    f.flush().unwrap();

    let (sink, collected) = CollectSink::new();
    let mut opts = Options::new(f.path());
    opts.check_length = true;
    let input = FileInput::spawn(opts, Box::new(sink), None).unwrap();

    assert_eq!(input.length(), 10_000);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(collected.lock().unwrap().is_empty());
    input.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_file_stays_silent() {
    let (sink, collected) = CollectSink::new();
    let (eof, callback) = eof_counter();
    let input = FileInput::spawn(
        Options::new("/nonexistent/stream.ts"),
        Box::new(sink),
        Some(callback),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(collected.lock().unwrap().is_empty());
    assert_eq!(eof.load(Ordering::SeqCst), 0);
    input.stop().await;
}
