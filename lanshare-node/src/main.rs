// lanshare: discover peers on the LAN, receive files, send one file.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lanshare_core::TransferEvent;
use lanshare_node::{config, EventReceiver, Node, NodeEvent};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lanshare", version, about = "Send files to machines on the same LAN")]
struct Cli {
    /// Print events as JSON lines instead of text.
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, global = true)]
    discovery_port: Option<u16>,
    #[arg(long, global = true)]
    transfer_port: Option<u16>,
    #[arg(long, global = true)]
    broadcast_addr: Option<Ipv4Addr>,
    /// Directory incoming files are written to.
    #[arg(long, global = true)]
    download_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer discovery probes and receive files until interrupted.
    Listen,
    /// Probe the LAN and print the peers that answer.
    Peers {
        /// How long to wait for responses.
        #[arg(long, default_value_t = 1500)]
        wait_ms: u64,
    },
    /// Send one file to a peer.
    Send { peer: IpAddr, file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load();
    if let Some(p) = cli.discovery_port {
        cfg.discovery_port = p;
    }
    if let Some(p) = cli.transfer_port {
        cfg.transfer_port = p;
    }
    if let Some(a) = cli.broadcast_addr {
        cfg.broadcast_addr = a;
    }
    if let Some(d) = cli.download_dir {
        cfg.download_dir = d;
    }

    let (node, mut events) = Node::new(cfg);
    let out = Printer { json: cli.json };
    match cli.command {
        Command::Listen => listen(&node, &mut events, &out).await,
        Command::Peers { wait_ms } => peers(&node, &mut events, &out, wait_ms).await,
        Command::Send { peer, file } => send(&node, &mut events, &out, peer, file).await,
    }
}

async fn listen(node: &Node, events: &mut EventReceiver, out: &Printer) -> Result<()> {
    node.start_discovery().await.context("starting discovery")?;
    let addr = node.start_acceptor().await.context("starting transfer listener")?;
    info!(%addr, dir = %node.config().download_dir.display(), "listening");
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            r = &mut shutdown => {
                r?;
                info!("shutting down");
                return Ok(());
            }
            ev = events.recv() => match ev {
                Some(ev) => out.event(&ev),
                None => return Ok(()),
            },
        }
    }
}

async fn peers(node: &Node, events: &mut EventReceiver, out: &Printer, wait_ms: u64) -> Result<()> {
    node.start_discovery().await.context("starting discovery")?;
    let deadline = tokio::time::sleep(Duration::from_millis(wait_ms));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            ev = events.recv() => match ev {
                Some(ev) => out.event(&ev),
                None => break,
            },
        }
    }
    if !out.json {
        let found = node.known_peers().await;
        println!("{} peer(s)", found.len());
    }
    Ok(())
}

async fn send(
    node: &Node,
    events: &mut EventReceiver,
    out: &Printer,
    peer: IpAddr,
    file: PathBuf,
) -> Result<()> {
    let handle = node.send_file(peer, file).await?;
    let id = handle.id();
    while let Some(ev) = events.recv().await {
        out.event(&ev);
        if let NodeEvent::Transfer(t) = &ev {
            if t.id() == id && t.is_terminal() {
                break;
            }
        }
    }
    let outcome = handle.wait().await;
    match outcome.error {
        None => Ok(()),
        Some(e) => bail!("transfer failed: {}", e),
    }
}

struct Printer {
    json: bool,
}

impl Printer {
    fn event(&self, ev: &NodeEvent) {
        if self.json {
            match serde_json::to_string(ev) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!(error = %e, "cannot encode event"),
            }
            return;
        }
        match ev {
            NodeEvent::PeerDiscovered { peer } => println!("peer {}", peer.label),
            NodeEvent::DiscoveryFailed { reason } => println!("discovery error: {}", reason),
            NodeEvent::AcceptFailed { reason } => println!("accept error: {}", reason),
            NodeEvent::Transfer(TransferEvent::Started {
                id,
                direction,
                peer,
                file_name,
                total_bytes,
            }) => println!(
                "[{}] {:?} {} ({} bytes) peer {}",
                id, direction, file_name, total_bytes, peer
            ),
            NodeEvent::Transfer(TransferEvent::Progress { id, percent, .. }) => {
                println!("[{}] {}%", id, percent)
            }
            NodeEvent::Transfer(TransferEvent::Finished { id, outcome, .. }) => {
                if let Some(e) = &outcome.error {
                    println!("[{}] failed after {} bytes: {}", id, outcome.bytes_transferred, e);
                } else {
                    let saved = outcome
                        .saved_path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    println!(
                        "[{}] done, {} bytes, sha256 {} {}",
                        id,
                        outcome.bytes_transferred,
                        outcome.sha256.as_deref().unwrap_or("-"),
                        saved
                    );
                }
            }
        }
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r.context("waiting for Ctrl+C")?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("waiting for Ctrl+C")?;
    }
    Ok(())
}
