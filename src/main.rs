//! rfbterm entry point: parse flags, layer configuration, spawn the host
//! PTY, then hand the event loop to the RFB session.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use rfbterm::config::{parse_geometry, read_password_file, FileConfig, ServerConfig};
use rfbterm::pty::HostPty;
use rfbterm::render::Depth;
use rfbterm::rfb::{ServerOptions, Session};
use rfbterm::logging;
use rfbterm::system::{NullSink, TerminalSystem};

/// Serve a text terminal over RFB/VNC 3.3.
#[derive(Parser, Debug)]
#[command(name = "rfbterm", version, about = "Text terminal over RFB/VNC")]
struct Args {
    /// Address to listen on (e.g. 127.0.0.1:5900)
    #[arg(short, long)]
    listen: Option<std::net::SocketAddr>,

    /// Terminal geometry as COLSxROWS
    #[arg(short, long)]
    geometry: Option<String>,

    /// Internal framebuffer depth: 8, 15, 16 or 32
    #[arg(short, long)]
    depth: Option<u32>,

    /// Desktop title announced to clients
    #[arg(short, long)]
    title: Option<String>,

    /// File holding the VNC password (enables VNC authentication)
    #[arg(long)]
    password_file: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Terminal state snapshot: loaded at startup, written at shutdown
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Send raw scancodes to the host instead of byte sequences
    #[arg(long)]
    graphic_keyboard: bool,

    /// Command to run on the PTY (defaults to $SHELL)
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = logging::init();

    let cfg = resolve_config(args)?;
    info!(listen = %cfg.listen, cols = cfg.cols, rows = cfg.rows, "starting");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    runtime.block_on(run(cfg))
}

/// Defaults, then the TOML file, then CLI flags.
fn resolve_config(args: Args) -> Result<ServerConfig> {
    let mut cfg = ServerConfig::default();
    if let Some(path) = &args.config {
        cfg.apply_file(&FileConfig::load(path)?)?;
    }
    if let Some(listen) = args.listen {
        cfg.listen = listen;
    }
    if let Some(geometry) = &args.geometry {
        (cfg.cols, cfg.rows) = parse_geometry(geometry)?;
    }
    if let Some(depth) = args.depth {
        cfg.depth = Depth::from_bits(depth)
            .with_context(|| format!("unsupported depth {depth} (use 8, 15, 16 or 32)"))?;
    }
    if let Some(title) = args.title {
        cfg.title = title;
    }
    if let Some(path) = &args.password_file {
        cfg.password = Some(read_password_file(path)?);
    }
    if let Some(path) = args.state_file {
        cfg.state_file = Some(path);
    }
    if args.graphic_keyboard {
        cfg.graphic_keyboard = true;
    }
    if !args.command.is_empty() {
        cfg.command = args.command;
    }
    Ok(cfg)
}

async fn run(cfg: ServerConfig) -> Result<()> {
    let mut system = TerminalSystem::new(
        cfg.cols,
        cfg.rows,
        cfg.depth,
        cfg.scrollback,
        cfg.title.clone(),
    );

    // Restore the previous terminal state before anything is displayed.
    if let Some(path) = &cfg.state_file {
        match std::fs::read(path) {
            Ok(bytes) => match system.term.load_state(&bytes, &mut NullSink) {
                Ok(()) => info!(path = %path.display(), "terminal state restored"),
                Err(e) => warn!(path = %path.display(), error = %e, "snapshot ignored"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "snapshot unreadable"),
        }
    }

    let (host_tx, host_rx) = mpsc::unbounded_channel();
    let host = HostPty::spawn(
        &cfg.command,
        system.term.width() as u16,
        system.term.height() as u16,
        host_tx,
    )?;

    let listener = tokio::net::TcpListener::bind(cfg.listen)
        .await
        .with_context(|| format!("binding {}", cfg.listen))?;

    let opts = ServerOptions {
        password: cfg.password.clone(),
        graphic_keyboard: cfg.graphic_keyboard,
    };
    let mut session = Session::new(listener, system, host, host_rx, opts);
    session.run().await?;

    // Durable snapshot on the way out.
    if let Some(path) = &cfg.state_file {
        let snapshot = session.system.term.save_state();
        match std::fs::write(path, &snapshot) {
            Ok(()) => info!(path = %path.display(), bytes = snapshot.len(), "state saved"),
            Err(e) => warn!(path = %path.display(), error = %e, "state save failed"),
        }
    }
    Ok(())
}
