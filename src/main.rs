use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use uci_bridge_lib::engine::types::{deadline_after, remaining_until};
use uci_bridge_lib::engine::{recommended_threads, ENGINE_INIT_TIMEOUT};
use uci_bridge_lib::{init_logging, uci_handshake, EngineSession, SessionConfig, TransportKind};

#[derive(Parser, Debug)]
#[command(author, version, about = "Drive a UCI engine through the line bridge")]
struct Args {
    /// Engine binary (located automatically when omitted)
    #[arg(short, long)]
    engine: Option<PathBuf>,

    /// Threads option sent before anything else (0 keeps the engine default)
    #[arg(short, long, default_value_t = 0)]
    threads: u32,

    /// Pick the thread count from the available cores (overrides --threads)
    #[arg(long)]
    auto_threads: bool,

    /// Command to send after the handshake (repeatable)
    #[arg(short, long = "command")]
    commands: Vec<String>,

    /// Stop printing once a line contains this token
    #[arg(short, long, default_value = "bestmove")]
    until: String,

    /// Give up after this many milliseconds
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,

    /// Seconds the engine gets to exit after `quit` before it is killed
    #[arg(long, default_value_t = 5)]
    stop_timeout_secs: u64,
}

fn main() {
    let args = Args::parse();
    init_logging();

    if let Err(e) = run(args) {
        log::error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> uci_bridge_lib::BridgeResult<()> {
    let threads = if args.auto_threads {
        recommended_threads()
    } else {
        args.threads
    };
    let config = SessionConfig {
        threads,
        transport: TransportKind::Process,
        engine_path: args.engine,
        stop_timeout_ms: Some(args.stop_timeout_secs.saturating_mul(1000)),
        ..SessionConfig::default()
    };
    let session = EngineSession::new(config)?;
    session.start()?;

    let identity = uci_handshake(&session, ENGINE_INIT_TIMEOUT)?;
    println!("# {} by {} ({} options)", identity.name, identity.author, identity.options.len());

    for command in &args.commands {
        session.send(command);
    }

    let deadline = deadline_after(Duration::from_millis(args.timeout_ms));
    loop {
        let remaining = remaining_until(deadline);
        let Some(line) = session.receive(remaining) else {
            if session.is_running() {
                log::warn!("No '{}' within {} ms", args.until, args.timeout_ms);
            } else {
                log::warn!("Engine exited before '{}'", args.until);
            }
            break;
        };
        println!("{line}");
        if !args.until.is_empty() && line.contains(&args.until) {
            break;
        }
        if remaining.is_zero() {
            log::warn!("No '{}' within {} ms", args.until, args.timeout_ms);
            break;
        }
    }

    session.stop();
    Ok(())
}
