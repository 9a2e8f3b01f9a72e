use clap::Parser;
use mpegts_replayer::replayer::{
    probe_file, FileInput, Options, PacketSink, ProbeReport, TS_PACKET_SIZE,
};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
struct Opt {
    /// Input TS or M2TS file
    file: PathBuf,

    /// Path used to persist the current read offset across restarts
    #[clap(long)]
    lock: Option<PathBuf>,

    /// Replay the file in an infinite loop
    #[clap(long = "loop", default_value_t = false)]
    loop_playback: bool,

    /// Initial pause state (nonzero = paused)
    #[clap(long, default_value_t = 0)]
    pause: i32,

    /// Input window size in MiB
    #[clap(long, default_value_t = 2)]
    buffer_size: usize,

    /// Probe the file and print a JSON report instead of replaying
    #[clap(long, default_value_t = false)]
    check_length: bool,
}

/// Writes replayed packets to stdout, ready to pipe into a player or
/// analyzer. Write errors mean the downstream is gone; replay keeps
/// running and the pipe stays broken, which is fine for a CLI.
struct StdoutSink {
    out: std::io::Stdout,
}

impl PacketSink for StdoutSink {
    fn send(&mut self, ts: &[u8; TS_PACKET_SIZE]) {
        let _ = self.out.write_all(ts);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let opt = Opt::parse();

    if opt.check_length {
        let info = probe_file(&opt.file, opt.buffer_size)?;
        println!("{}", ProbeReport::new(&opt.file, &info).to_json());
        return Ok(());
    }

    let (eof_tx, eof_rx) = tokio::sync::oneshot::channel::<()>();
    let sink = StdoutSink {
        out: std::io::stdout(),
    };

    let input = FileInput::spawn(
        Options {
            filename: opt.file,
            lock: opt.lock,
            loop_playback: opt.loop_playback,
            pause: opt.pause,
            buffer_size_mib: opt.buffer_size,
            check_length: false,
        },
        Box::new(sink),
        Some(Box::new(move || {
            let _ = eof_tx.send(());
        })),
    )?;

    tokio::select! {
        _ = eof_rx => {}
        _ = tokio::signal::ctrl_c() => {}
    }
    input.stop().await;
    Ok(())
}
