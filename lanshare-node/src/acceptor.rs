//! Transfer listener. Each accepted connection gets a fresh `InboundTransfer`; only one inbound
//! transfer is tracked at a time, and a new connection supersedes an unfinished one.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lanshare_core::{
    resolve_destination, Direction, Feed, InboundTransfer, TransferCounters, TransferError,
    TransferEvent, TransferId, TransferOutcome,
};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::NodeError;
use crate::events::{emit, EventSender, NodeEvent};
use crate::history::{HistoryEntry, TransferHistory};

const READ_BUF_SIZE: usize = 64 * 1024;
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(250);

/// The inbound transfer currently being received, if any.
#[derive(Debug, Clone)]
pub struct ActiveInbound {
    pub id: TransferId,
    pub peer: SocketAddr,
    pub counters: Arc<TransferCounters>,
}

pub type InboundSlot = Arc<Mutex<Option<ActiveInbound>>>;

/// Shared by the accept loop and every connection task.
#[derive(Clone)]
struct InboundContext {
    download_dir: PathBuf,
    events: EventSender,
    history: TransferHistory,
    active: InboundSlot,
}

/// Owns the listener task. Dropping it stops accepting.
pub struct Acceptor {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Acceptor {
    pub async fn bind(
        transfer_port: u16,
        download_dir: PathBuf,
        events: EventSender,
        history: TransferHistory,
        active: InboundSlot,
    ) -> Result<Self, NodeError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, transfer_port));
        let listener = match TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                warn!(%addr, error = %e, "transfer listener bind failed");
                emit(
                    &events,
                    NodeEvent::AcceptFailed {
                        reason: format!("bind {}: {}", addr, e),
                    },
                );
                return Err(NodeError::Bind {
                    what: "transfer",
                    addr,
                    source: e,
                });
            }
        };
        let local_addr = listener.local_addr().map_err(|e| NodeError::Bind {
            what: "transfer",
            addr,
            source: e,
        })?;
        info!(addr = %local_addr, dir = %download_dir.display(), "accepting transfers");
        let ctx = InboundContext {
            download_dir,
            events,
            history,
            active,
        };
        let task = tokio::spawn(accept_loop(listener, ctx));
        Ok(Self { local_addr, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(listener: TcpListener, ctx: InboundContext) {
    // Supersede signal and task of the most recent connection.
    let mut current: Option<(oneshot::Sender<()>, JoinHandle<()>)> = None;
    loop {
        match listener.accept().await {
            Ok((stream, from)) => {
                debug!(%from, "connection accepted");
                let previous = current.take().map(|(supersede, task)| {
                    let _ = supersede.send(());
                    task
                });
                let (supersede_tx, supersede_rx) = oneshot::channel();
                let task = tokio::spawn(handle_connection(
                    stream,
                    from,
                    supersede_rx,
                    previous,
                    ctx.clone(),
                ));
                current = Some((supersede_tx, task));
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                emit(
                    &ctx.events,
                    NodeEvent::AcceptFailed {
                        reason: e.to_string(),
                    },
                );
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    from: SocketAddr,
    mut superseded: oneshot::Receiver<()>,
    previous: Option<JoinHandle<()>>,
    ctx: InboundContext,
) {
    // The superseded transfer reports its terminal event before this one reports anything.
    if let Some(previous) = previous {
        let _ = previous.await;
    }

    let id = TransferId::new();
    let counters = Arc::new(TransferCounters::default());
    *ctx.active.lock().await = Some(ActiveInbound {
        id,
        peer: from,
        counters: counters.clone(),
    });

    let mut rx = InboundTransfer::new();
    let mut saved: Option<(PathBuf, String)> = None;
    let outcome = receive(
        &mut stream,
        from,
        id,
        &mut rx,
        &mut saved,
        &counters,
        &mut superseded,
        &ctx,
    )
    .await;
    drop(stream);

    {
        let mut active = ctx.active.lock().await;
        if active.as_ref().map(|a| a.id) == Some(id) {
            *active = None;
        }
    }
    if outcome.success {
        info!(%id, %from, bytes = outcome.bytes_transferred, "receive complete");
        if let Some((path, file_name)) = saved {
            ctx.history
                .record(HistoryEntry {
                    id,
                    direction: Direction::Inbound,
                    peer: from,
                    file_name,
                    bytes: outcome.bytes_transferred,
                    path,
                })
                .await;
        }
    } else if let Some(e) = &outcome.error {
        warn!(%id, %from, error = %e, "receive failed");
    }
    emit(
        &ctx.events,
        NodeEvent::Transfer(TransferEvent::Finished {
            id,
            direction: Direction::Inbound,
            outcome,
        }),
    );
}

#[allow(clippy::too_many_arguments)]
async fn receive(
    stream: &mut TcpStream,
    from: SocketAddr,
    id: TransferId,
    rx: &mut InboundTransfer,
    saved: &mut Option<(PathBuf, String)>,
    counters: &TransferCounters,
    superseded: &mut oneshot::Receiver<()>,
    ctx: &InboundContext,
) -> TransferOutcome {
    let mut out: Option<File> = None;
    let mut buf = vec![0u8; READ_BUF_SIZE];
    // Cleared if the accept loop goes away without superseding us.
    let mut watch_supersede = true;

    loop {
        let n = tokio::select! {
            r = stream.read(&mut buf) => match r {
                Ok(n) => n,
                Err(e) => return fail(rx, saved, &mut out, TransferError::io(&e)).await,
            },
            signal = &mut *superseded, if watch_supersede => match signal {
                Ok(()) => return fail(rx, saved, &mut out, TransferError::Superseded).await,
                Err(_) => {
                    watch_supersede = false;
                    continue;
                }
            },
        };
        if n == 0 {
            let err = rx.on_disconnect().unwrap_or(TransferError::Io {
                reason: "connection closed".to_string(),
            });
            return fail(rx, saved, &mut out, err).await;
        }

        let body: &[u8] = match rx.feed(&buf[..n]) {
            Ok(Feed::NeedMore) => continue,
            Ok(Feed::Discarded(k)) => {
                debug!(%id, bytes = k, "discarding bytes past payload");
                continue;
            }
            Ok(Feed::Body(b)) => b,
            Ok(Feed::Header { header, body }) => {
                let Some(path) = resolve_destination(&ctx.download_dir, &header.file_name) else {
                    return fail(
                        rx,
                        saved,
                        &mut out,
                        TransferError::FileCreate {
                            path: ctx.download_dir.join(&header.file_name).display().to_string(),
                            reason: "file name has no usable base name".to_string(),
                        },
                    )
                    .await;
                };
                let file = match create_output(&path).await {
                    Ok(f) => f,
                    Err(e) => return fail(rx, saved, &mut out, e).await,
                };
                info!(%id, %from, file = %path.display(), size = header.payload_size, "receiving");
                out = Some(file);
                *saved = Some((path, header.file_name.clone()));
                let size = header.payload_size;
                counters.set_total(size);
                emit(
                    &ctx.events,
                    NodeEvent::Transfer(TransferEvent::Started {
                        id,
                        direction: Direction::Inbound,
                        peer: from,
                        file_name: header.file_name,
                        total_bytes: header.payload_size,
                    }),
                );
                // An empty payload completes on the header alone.
                if !body.is_empty() || size == 0 {
                    if let Err(e) = write_body(rx, out.as_mut(), &body, counters, id, ctx).await {
                        return fail(rx, saved, &mut out, e).await;
                    }
                }
                if rx.is_complete() {
                    break;
                }
                continue;
            }
            Err(e) => {
                // Malformed header: drop the connection right away.
                return fail(rx, saved, &mut out, e).await;
            }
        };
        if let Err(e) = write_body(rx, out.as_mut(), body, counters, id, ctx).await {
            return fail(rx, saved, &mut out, e).await;
        }
        if rx.is_complete() {
            break;
        }
    }

    if let Some(mut file) = out.take() {
        if let Err(e) = file.flush().await {
            return fail(rx, saved, &mut out, TransferError::io(&e)).await;
        }
    }
    TransferOutcome::succeeded(
        rx.bytes_received(),
        saved.as_ref().map(|(p, _)| p.clone()),
        rx.digest_hex(),
    )
}

/// Flush whatever part of the file was written, then build the failed outcome.
async fn fail(
    rx: &mut InboundTransfer,
    saved: &Option<(PathBuf, String)>,
    out: &mut Option<File>,
    e: TransferError,
) -> TransferOutcome {
    if let Some(mut file) = out.take() {
        if let Err(flush_err) = file.flush().await {
            warn!(error = %flush_err, "flushing partial file failed");
        }
    }
    rx.abort();
    TransferOutcome::failed(e, rx.bytes_received(), rx.expected_bytes())
        .with_saved_path(saved.as_ref().map(|(p, _)| p.clone()))
}

async fn create_output(path: &Path) -> Result<File, TransferError> {
    File::create(path)
        .await
        .map_err(|e| TransferError::FileCreate {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

/// Write one body slice, record it, and emit progress.
async fn write_body(
    rx: &mut InboundTransfer,
    out: Option<&mut File>,
    body: &[u8],
    counters: &TransferCounters,
    id: TransferId,
    ctx: &InboundContext,
) -> Result<(), TransferError> {
    let Some(file) = out else {
        return Err(TransferError::Io {
            reason: "body bytes without an open output file".to_string(),
        });
    };
    file.write_all(body)
        .await
        .map_err(|e| TransferError::io(&e))?;
    let progress = rx.record_written(body);
    counters.advance(body.len() as u64);
    emit(
        &ctx.events,
        NodeEvent::Transfer(TransferEvent::Progress {
            id,
            direction: Direction::Inbound,
            percent: progress.percent,
            bytes_done: progress.bytes_received,
        }),
    );
    Ok(())
}
